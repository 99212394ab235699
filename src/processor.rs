//! Plugin instance wrapper.
//!
//! A [`PluginProcessor`] owns one slot in the chain: it loads the plugin
//! described by its id, tracks prepared/suspended state, and provides the
//! bypass path with sample-accurate latency compensation.
//!
//! The plugin handle is shared: an in-flight block keeps the instance alive
//! even if a concurrent unload clears the wrapper's slot, and the last
//! reference defers destruction to the message thread as the plugin SDK
//! requires. The slot mutex is only ever held for handle swaps, never across
//! a `process` call.

use crate::buffer::AudioBuffer;
use crate::catalog::find_plugin_description;
use crate::chain::ProcessorChain;
use crate::frame::{MidiEventVec, TransportInfo};
use crate::instance::{ParameterObserver, PluginInstance};
use crate::msg_thread::MessageThread;
use crate::{Result, ServerError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Process-wide count of currently loaded plugins.
static LOADED_PLUGINS: AtomicU32 = AtomicU32::new(0);

/// Serializes load/unload windows when parallel loading is disabled.
static PLUGIN_LOADER_MTX: Mutex<()> = Mutex::new(());

pub fn loaded_plugin_count() -> u32 {
    LOADED_PLUGINS.load(Ordering::SeqCst)
}

/// Reference-counted handle to a loaded plugin. The last clone to drop posts
/// the instance to the message thread for destruction.
#[derive(Clone)]
pub struct SharedPlugin {
    cell: Arc<PluginCell>,
}

struct PluginCell {
    inner: Mutex<Option<Box<dyn PluginInstance>>>,
}

impl SharedPlugin {
    fn new(plugin: Box<dyn PluginInstance>) -> Self {
        Self {
            cell: Arc::new(PluginCell {
                inner: Mutex::new(Some(plugin)),
            }),
        }
    }

    /// Run `f` against the instance. The cell lock outlives the call, so the
    /// instance cannot be destroyed underneath it.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn PluginInstance) -> R) -> R {
        let mut guard = self.cell.inner.lock();
        f(guard
            .as_mut()
            .expect("BUG: plugin taken before the last handle dropped")
            .as_mut())
    }
}

impl Drop for PluginCell {
    fn drop(&mut self) {
        if let Some(plugin) = self.inner.get_mut().take() {
            MessageThread::global().post(move || drop(plugin));
        }
    }
}

#[derive(Default)]
struct BypassBuffers {
    single: Vec<VecDeque<f32>>,
    double: Vec<VecDeque<f64>>,
}

/// One loaded (or loadable) plugin in a chain.
pub struct PluginProcessor {
    id: String,
    sample_rate: f64,
    block_size: usize,
    parallel_load_allowed: bool,
    plugin: Mutex<Option<SharedPlugin>>,
    prepared: AtomicBool,
    suspended: AtomicBool,
    last_known_latency: AtomicUsize,
    extra_in_channels: AtomicI32,
    extra_out_channels: AtomicI32,
    needs_disabled_sidechain: AtomicBool,
    chain_index: AtomicUsize,
    bypass: Mutex<BypassBuffers>,
}

impl PluginProcessor {
    pub fn new(id: String, sample_rate: f64, block_size: usize, parallel_load_allowed: bool) -> Self {
        Self {
            id,
            sample_rate,
            block_size,
            parallel_load_allowed,
            plugin: Mutex::new(None),
            prepared: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            last_known_latency: AtomicUsize::new(0),
            extra_in_channels: AtomicI32::new(0),
            extra_out_channels: AtomicI32::new(0),
            needs_disabled_sidechain: AtomicBool::new(false),
            chain_index: AtomicUsize::new(0),
            bypass: Mutex::new(BypassBuffers::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Clone of the shared handle, if a plugin is loaded.
    pub fn plugin(&self) -> Option<SharedPlugin> {
        self.plugin.lock().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.plugin.lock().is_some()
    }

    pub fn name(&self) -> String {
        self.plugin()
            .map(|p| p.with(|i| i.description().name.clone()))
            .unwrap_or_else(|| self.id.clone())
    }

    /// Resolve the id, instantiate the plugin on the message thread, and let
    /// the chain configure its buses. A second call with a plugin already
    /// loaded is a no-op.
    pub fn load(self: Arc<Self>, chain: &ProcessorChain) -> Result<()> {
        if self.plugin.lock().is_some() {
            return Ok(());
        }
        let _serial = (!self.parallel_load_allowed).then(|| PLUGIN_LOADER_MTX.lock());

        let desc = find_plugin_description(chain.catalog().as_ref(), &self.id)
            .ok_or_else(|| ServerError::InvalidPluginId(self.id.clone()))?;

        let catalog = Arc::clone(chain.catalog());
        let (rate, block) = (self.sample_rate, self.block_size);
        let create_desc = desc.clone();
        let created = MessageThread::global()
            .run_sync(move || catalog.create_instance(&create_desc, rate, block));
        let instance = created.map_err(|reason| {
            warn!("failed loading plugin {}: {reason}", desc.file_or_identifier);
            ServerError::LoadFailed {
                id: self.id.clone(),
                reason,
            }
        })?;

        *self.plugin.lock() = Some(SharedPlugin::new(instance));

        match chain.init_plugin_instance(&self) {
            Ok(()) => {
                if let Some(plugin) = self.plugin() {
                    let observer: Arc<dyn ParameterObserver> = Arc::new(ParameterSink {
                        proc: Arc::downgrade(&self),
                    });
                    plugin.with(|p| {
                        p.set_parameter_observer(Some(observer));
                        self.last_known_latency
                            .store(p.latency_samples(), Ordering::SeqCst);
                    });
                }
                self.update_latency_buffers();
                LOADED_PLUGINS.fetch_add(1, Ordering::SeqCst);
                info!("loaded plugin {} ({})", self.id, desc.name);
                Ok(())
            }
            Err(err) => {
                *self.plugin.lock() = None;
                Err(err)
            }
        }
    }

    /// Release the plugin. Final destruction happens on the message thread
    /// once in-flight handles drop.
    pub fn unload(&self) {
        let taken = {
            let mut slot = self.plugin.lock();
            match slot.take() {
                Some(shared) => {
                    if self.prepared.swap(false, Ordering::SeqCst) {
                        shared.with(|p| p.release_resources());
                    }
                    shared.with(|p| p.set_parameter_observer(None));
                    LOADED_PLUGINS.fetch_sub(1, Ordering::SeqCst);
                    Some(shared)
                }
                None => None,
            }
        };
        if let Some(shared) = taken {
            let _serial = (!self.parallel_load_allowed).then(|| PLUGIN_LOADER_MTX.lock());
            drop(shared);
            debug!("unloaded plugin {}", self.id);
        }
    }

    pub fn prepare_to_play(&self, sample_rate: f64, block_size: usize) {
        if let Some(plugin) = self.plugin() {
            plugin.with(|p| p.prepare_to_play(sample_rate, block_size));
            self.prepared.store(true, Ordering::SeqCst);
        }
    }

    pub fn release_resources(&self) {
        if let Some(plugin) = self.plugin() {
            if self.prepared.swap(false, Ordering::SeqCst) {
                plugin.with(|p| p.release_resources());
            }
        }
    }

    /// Logical bypass. Suspending releases the plugin's resources; resuming
    /// re-prepares at the chain's current rate and block size.
    pub fn suspend_processing(&self, suspended: bool, sample_rate: f64, block_size: usize) {
        if let Some(plugin) = self.plugin() {
            if suspended {
                plugin.with(|p| p.suspend_processing(true));
                self.release_resources();
            } else {
                self.prepare_to_play(sample_rate, block_size);
                plugin.with(|p| p.suspend_processing(false));
            }
        }
        self.suspended.store(suspended, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn process_block_f32(
        &self,
        buffer: &mut AudioBuffer<f32>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    ) {
        if let Some(plugin) = self.plugin() {
            plugin.with(|p| p.process_f32(buffer, midi, transport));
        }
    }

    pub fn process_block_f64(
        &self,
        buffer: &mut AudioBuffer<f64>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    ) {
        if let Some(plugin) = self.plugin() {
            plugin.with(|p| p.process_f64(buffer, midi, transport));
        }
    }

    pub fn process_block_bypassed_f32(
        &self,
        buffer: &mut AudioBuffer<f32>,
        total_in: usize,
        total_out: usize,
    ) {
        bypass_block(&mut self.bypass.lock().single, buffer, total_in, total_out);
    }

    pub fn process_block_bypassed_f64(
        &self,
        buffer: &mut AudioBuffer<f64>,
        total_in: usize,
        total_out: usize,
    ) {
        bypass_block(&mut self.bypass.lock().double, buffer, total_in, total_out);
    }

    /// Resize each per-channel FIFO to exactly the last known latency,
    /// zero-padding growth and dropping from the head on shrink. Channels are
    /// created up to the plugin's output channel count.
    pub fn update_latency_buffers(&self) {
        let latency = self.last_known_latency.load(Ordering::SeqCst);
        debug!("updating latency buffers for {latency} samples");
        let channels = self
            .plugin()
            .map(|p| p.with(|i| i.buses_layout().total_output_channels()))
            .unwrap_or(0);
        let mut bypass = self.bypass.lock();
        resize_fifos(&mut bypass.single, channels, latency);
        resize_fifos(&mut bypass.double, channels, latency);
    }

    /// Re-read the plugin's latency; resize the bypass FIFOs if it moved.
    pub fn refresh_latency(&self) {
        let Some(plugin) = self.plugin() else {
            return;
        };
        let latency = plugin.with(|p| p.latency_samples());
        if latency != self.last_known_latency.swap(latency, Ordering::SeqCst) {
            self.update_latency_buffers();
        }
    }

    pub fn last_known_latency(&self) -> usize {
        self.last_known_latency.load(Ordering::SeqCst)
    }

    pub fn tail_seconds(&self) -> f64 {
        self.plugin()
            .map(|p| p.with(|i| i.tail_seconds()))
            .unwrap_or(0.0)
    }

    pub fn supports_f64(&self) -> bool {
        self.plugin()
            .map(|p| p.with(|i| i.supports_f64()))
            .unwrap_or(true)
    }

    pub fn set_extra_channels(&self, extra_in: i32, extra_out: i32) {
        self.extra_in_channels.store(extra_in, Ordering::SeqCst);
        self.extra_out_channels.store(extra_out, Ordering::SeqCst);
    }

    pub fn extra_in_channels(&self) -> i32 {
        self.extra_in_channels.load(Ordering::SeqCst)
    }

    pub fn extra_out_channels(&self) -> i32 {
        self.extra_out_channels.load(Ordering::SeqCst)
    }

    pub fn set_needs_disabled_sidechain(&self, needs: bool) {
        self.needs_disabled_sidechain.store(needs, Ordering::SeqCst);
    }

    pub fn needs_disabled_sidechain(&self) -> bool {
        self.needs_disabled_sidechain.load(Ordering::SeqCst)
    }

    pub fn set_chain_index(&self, index: usize) {
        self.chain_index.store(index, Ordering::SeqCst);
    }

    pub fn chain_index(&self) -> usize {
        self.chain_index.load(Ordering::SeqCst)
    }
}

/// Parameter listener registered with the hosted plugin. Holds the wrapper
/// weakly: the plugin owns this sink, so a strong reference would keep the
/// wrapper (and with it the plugin) alive forever.
struct ParameterSink {
    proc: Weak<PluginProcessor>,
}

impl ParameterObserver for ParameterSink {
    fn parameter_changed(&self, param_index: usize, value: f32) {
        let Some(proc) = self.proc.upgrade() else {
            return;
        };
        // take the shared handle first: the notification may race an unload
        if proc.plugin().is_some() {
            trace!(
                "parameter {param_index} of {} changed to {value}",
                proc.id()
            );
        }
    }
}

impl Drop for PluginProcessor {
    fn drop(&mut self) {
        self.unload();
    }
}

/// Delay-line bypass: each sample is pushed on the FIFO tail while the head
/// is written back, keeping the wrapper's latency in the signal path.
fn bypass_block<T: Copy + Default>(
    fifos: &mut [VecDeque<T>],
    buffer: &mut AudioBuffer<T>,
    total_in: usize,
    total_out: usize,
) {
    let mut total_in = total_in;
    let mut total_out = total_out;
    if total_in > buffer.channels() {
        warn!("buffer has less channels than main input channels");
        total_in = buffer.channels();
    }
    if total_out > buffer.channels() {
        warn!("buffer has less channels than main output channels");
        total_out = buffer.channels();
    }

    // output-only channels must not leak previous content
    for ch in total_in..total_out {
        buffer.clear_channel(ch);
    }

    if fifos.len() < total_out {
        warn!(
            "bypass buffer has less channels than needed, buffer: {}, needed: {}",
            fifos.len(),
            total_out
        );
        for ch in 0..total_out {
            buffer.clear_channel(ch);
        }
        return;
    }

    for (ch, fifo) in fifos.iter_mut().enumerate().take(total_out) {
        for sample in buffer.channel_mut(ch) {
            fifo.push_back(*sample);
            *sample = fifo.pop_front().unwrap_or_default();
        }
    }
}

fn resize_fifos<T: Copy + Default>(fifos: &mut Vec<VecDeque<T>>, channels: usize, latency: usize) {
    while fifos.len() < channels {
        fifos.push(VecDeque::from(vec![T::default(); latency]));
    }
    for fifo in fifos.iter_mut() {
        while fifo.len() > latency {
            fifo.pop_front();
        }
        while fifo.len() < latency {
            fifo.push_back(T::default());
        }
    }
}
