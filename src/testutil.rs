//! Mock plugins and catalogs for unit tests.

use crate::buffer::AudioBuffer;
use crate::catalog::{PluginCatalog, PluginDescription, PluginFormat};
use crate::frame::{MidiEventVec, SampleFormat, TransportInfo};
use crate::instance::{ParameterObserver, PluginInstance};
use crate::layout::{BusesLayout, ChannelSet};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Serializes tests that assert on the process-wide loaded-plugin counter.
static LOAD_LOCK: Mutex<()> = Mutex::new(());

pub fn load_lock() -> MutexGuard<'static, ()> {
    LOAD_LOCK.lock()
}

/// Shared observation point for a mock plugin's lifecycle.
#[derive(Default)]
pub struct MockProbe {
    pub prepare_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub process_calls: AtomicUsize,
    pub suspended: AtomicBool,
    pub has_observer: AtomicBool,
    pub destroyed_on: Mutex<Option<String>>,
}

/// How a mock plugin responds to layout negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPolicy {
    AcceptAll,
    /// Accepts only layouts without a sidechain bus.
    MainOnly,
    /// Accepts at most a mono sidechain bus.
    MonoSidechainOnly,
    /// Rejects everything; negotiation falls back to the preferred layout.
    RejectAll,
}

pub struct MockPlugin {
    desc: PluginDescription,
    gain: f32,
    latency: usize,
    tail: f64,
    supports_f64: bool,
    policy: LayoutPolicy,
    layout: BusesLayout,
    params: Vec<f32>,
    precision: SampleFormat,
    observer: Option<Arc<dyn ParameterObserver>>,
    probe: Option<Arc<MockProbe>>,
}

impl MockPlugin {
    pub fn new(desc: PluginDescription) -> Self {
        let layout = BusesLayout {
            input_buses: vec![ChannelSet::of(desc.num_inputs)],
            output_buses: vec![ChannelSet::of(desc.num_outputs)],
        };
        Self {
            desc,
            gain: 1.0,
            latency: 0,
            tail: 0.0,
            supports_f64: false,
            policy: LayoutPolicy::AcceptAll,
            layout,
            params: Vec::new(),
            precision: SampleFormat::Float32,
            observer: None,
            probe: None,
        }
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn latency(mut self, latency: usize) -> Self {
        self.latency = latency;
        self
    }

    pub fn tail(mut self, tail: f64) -> Self {
        self.tail = tail;
        self
    }

    pub fn f64(mut self, supports: bool) -> Self {
        self.supports_f64 = supports;
        self
    }

    pub fn layout_policy(mut self, policy: LayoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn preferred_layout(mut self, layout: BusesLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn params(mut self, params: Vec<f32>) -> Self {
        self.params = params;
        self
    }

    pub fn probe(mut self, probe: Arc<MockProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn accepts(&self, layout: &BusesLayout) -> bool {
        match self.policy {
            LayoutPolicy::AcceptAll => true,
            LayoutPolicy::MainOnly => layout.input_buses.len() <= 1,
            LayoutPolicy::MonoSidechainOnly => {
                layout.sidechain().map_or(true, |bus| bus.size() == 1)
            }
            LayoutPolicy::RejectAll => false,
        }
    }
}

impl PluginInstance for MockPlugin {
    fn description(&self) -> &PluginDescription {
        &self.desc
    }

    fn prepare_to_play(&mut self, _sample_rate: f64, _block_size: usize) {
        if let Some(probe) = &self.probe {
            probe.prepare_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release_resources(&mut self) {
        if let Some(probe) = &self.probe {
            probe.release_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn supports_f64(&self) -> bool {
        self.supports_f64
    }

    fn set_precision(&mut self, format: SampleFormat) {
        self.precision = format;
    }

    fn process_f32(
        &mut self,
        buffer: &mut AudioBuffer<f32>,
        _midi: &mut MidiEventVec,
        _transport: &TransportInfo,
    ) {
        if let Some(probe) = &self.probe {
            probe.process_calls.fetch_add(1, Ordering::SeqCst);
        }
        for ch in 0..buffer.channels() {
            for sample in buffer.channel_mut(ch) {
                *sample *= self.gain;
            }
        }
    }

    fn process_f64(
        &mut self,
        buffer: &mut AudioBuffer<f64>,
        _midi: &mut MidiEventVec,
        _transport: &TransportInfo,
    ) {
        if let Some(probe) = &self.probe {
            probe.process_calls.fetch_add(1, Ordering::SeqCst);
        }
        for ch in 0..buffer.channels() {
            for sample in buffer.channel_mut(ch) {
                *sample *= f64::from(self.gain);
            }
        }
    }

    fn suspend_processing(&mut self, suspended: bool) {
        if let Some(probe) = &self.probe {
            probe.suspended.store(suspended, Ordering::SeqCst);
        }
    }

    fn latency_samples(&self) -> usize {
        self.latency
    }

    fn tail_seconds(&self) -> f64 {
        self.tail
    }

    fn buses_layout(&self) -> BusesLayout {
        self.layout.clone()
    }

    fn check_buses_layout(&self, layout: &BusesLayout) -> bool {
        self.accepts(layout)
    }

    fn set_buses_layout(&mut self, layout: &BusesLayout) -> bool {
        if self.accepts(layout) {
            self.layout = layout.clone();
            true
        } else {
            false
        }
    }

    fn enable_all_buses(&mut self) {}

    fn parameter_count(&self) -> usize {
        self.params.len()
    }

    fn parameter_value(&self, index: usize) -> Option<f32> {
        self.params.get(index).copied()
    }

    fn set_parameter_observer(&mut self, observer: Option<Arc<dyn ParameterObserver>>) {
        if let Some(probe) = &self.probe {
            probe.has_observer.store(observer.is_some(), Ordering::SeqCst);
        }
        self.observer = observer;
    }
}

impl Drop for MockPlugin {
    fn drop(&mut self) {
        if let Some(probe) = &self.probe {
            *probe.destroyed_on.lock() =
                std::thread::current().name().map(str::to_string);
        }
    }
}

type Factory =
    Box<dyn Fn(&PluginDescription, f64, usize) -> Box<dyn PluginInstance> + Send + Sync>;

enum Entry {
    Works(Factory),
    Fails(String),
}

/// In-memory catalog of mock plugins.
#[derive(Default)]
pub struct MockCatalog {
    types: Vec<PluginDescription>,
    entries: HashMap<i32, Entry>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, desc: PluginDescription, factory: F)
    where
        F: Fn(&PluginDescription, f64, usize) -> Box<dyn PluginInstance> + Send + Sync + 'static,
    {
        self.entries.insert(desc.uid, Entry::Works(Box::new(factory)));
        self.types.push(desc);
    }

    pub fn register_failing(&mut self, name: &str, uid: i32, reason: &str) {
        let desc = PluginDescription::new(PluginFormat::Vst3, name, uid);
        self.entries.insert(uid, Entry::Fails(reason.to_string()));
        self.types.push(desc);
    }

    pub fn register_gain(&mut self, name: &str, uid: i32, gain: f32) {
        self.register(
            PluginDescription::new(PluginFormat::Vst3, name, uid),
            move |desc, _, _| Box::new(MockPlugin::new(desc.clone()).gain(gain)),
        );
    }

    pub fn register_with_latency(&mut self, name: &str, uid: i32, latency: usize) {
        self.register(
            PluginDescription::new(PluginFormat::Vst3, name, uid),
            move |desc, _, _| Box::new(MockPlugin::new(desc.clone()).latency(latency)),
        );
    }

    pub fn with_gain_plugin(name: &str, uid: i32) -> Self {
        let mut catalog = Self::new();
        let desc = PluginDescription::new(PluginFormat::Vst3, name, uid)
            .file(format!("/Library/Audio/Plug-Ins/VST3/{name}.vst3"));
        catalog.register(desc, |desc, _, _| {
            Box::new(MockPlugin::new(desc.clone()).gain(2.0))
        });
        catalog
    }

    pub fn with_plugins(plugins: Vec<(&str, i32)>) -> Self {
        let mut catalog = Self::new();
        for (name, uid) in plugins {
            catalog.register_gain(name, uid, 1.0);
        }
        catalog
    }
}

impl PluginCatalog for MockCatalog {
    fn get_types(&self) -> Vec<PluginDescription> {
        self.types.clone()
    }

    fn get_type_for_file(&self, path: &str) -> Option<PluginDescription> {
        self.types
            .iter()
            .find(|desc| desc.file_or_identifier == path)
            .cloned()
    }

    fn create_instance(
        &self,
        desc: &PluginDescription,
        sample_rate: f64,
        block_size: usize,
    ) -> std::result::Result<Box<dyn PluginInstance>, String> {
        match self.entries.get(&desc.uid) {
            Some(Entry::Works(factory)) => Ok(factory(desc, sample_rate, block_size)),
            Some(Entry::Fails(reason)) => Err(reason.clone()),
            None => Err(format!("unknown plugin uid {}", desc.uid)),
        }
    }
}
