//! The processor chain.
//!
//! An ordered sequence of [`PluginProcessor`]s sharing one working buffer.
//! The chain negotiates every plugin's bus layout against the session layout,
//! aggregates latency/tail/precision across the sequence, and pumps blocks
//! through the wrappers in order.
//!
//! Lock order: chain state → session layout → wrapper slot → plugin cell.
//! The chain state mutex is held for the whole per-block dispatch, so
//! mutations from control threads land between blocks.

use crate::buffer::AudioBuffer;
use crate::catalog::PluginCatalog;
use crate::config::ServerConfig;
use crate::frame::{MidiEventVec, SampleFormat, TransportInfo};
use crate::layout::{BusesLayout, ChannelSet};
use crate::processor::PluginProcessor;
use crate::{Result, ServerError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Silent blocks pushed through a fresh instance to settle internal state.
const PRE_PROCESS_BLOCKS: usize = 16;

/// Per-block processing beyond this is logged (never throttled).
const SLOW_BLOCK_WARN: Duration = Duration::from_millis(20);

#[derive(Default)]
struct ChainState {
    processors: Vec<Arc<PluginProcessor>>,
    extra_channels: i32,
    supports_f64: bool,
    tail_seconds: f64,
    latency_samples: usize,
    sidechain_disabled: bool,
}

pub struct ProcessorChain {
    catalog: Arc<dyn PluginCatalog>,
    config: ServerConfig,
    state: Mutex<ChainState>,
    layout: Mutex<BusesLayout>,
    play_head: Mutex<TransportInfo>,
    has_sidechain: AtomicBool,
    double_precision: AtomicBool,
    sample_rate_bits: AtomicU64,
    block_size: AtomicUsize,
    /// Mirror of `state.latency_samples` for lock-free reads per block.
    latency: AtomicUsize,
}

impl ProcessorChain {
    pub fn new(
        catalog: Arc<dyn PluginCatalog>,
        config: ServerConfig,
        sample_rate: f64,
        block_size: usize,
    ) -> Self {
        Self {
            catalog,
            config,
            state: Mutex::new(ChainState {
                supports_f64: true,
                ..Default::default()
            }),
            layout: Mutex::new(BusesLayout::default()),
            play_head: Mutex::new(TransportInfo::default()),
            has_sidechain: AtomicBool::new(false),
            double_precision: AtomicBool::new(false),
            sample_rate_bits: AtomicU64::new(sample_rate.to_bits()),
            block_size: AtomicUsize::new(block_size),
            latency: AtomicUsize::new(0),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn PluginCatalog> {
        &self.catalog
    }

    pub fn sample_rate(&self) -> f64 {
        f64::from_bits(self.sample_rate_bits.load(Ordering::SeqCst))
    }

    pub fn block_size(&self) -> usize {
        self.block_size.load(Ordering::SeqCst)
    }

    pub fn set_double_precision(&self, double: bool) {
        self.double_precision.store(double, Ordering::SeqCst);
    }

    pub fn is_double_precision(&self) -> bool {
        self.double_precision.load(Ordering::SeqCst)
    }

    pub fn supports_f64(&self) -> bool {
        self.state.lock().supports_f64
    }

    pub fn latency_samples(&self) -> usize {
        self.latency.load(Ordering::SeqCst)
    }

    pub fn tail_seconds(&self) -> f64 {
        self.state.lock().tail_seconds
    }

    pub fn extra_channels(&self) -> i32 {
        self.state.lock().extra_channels
    }

    pub fn sidechain_disabled(&self) -> bool {
        self.state.lock().sidechain_disabled
    }

    pub fn has_sidechain(&self) -> bool {
        self.has_sidechain.load(Ordering::SeqCst)
    }

    pub fn num_processors(&self) -> usize {
        self.state.lock().processors.len()
    }

    pub fn get_processor(&self, index: usize) -> Option<Arc<PluginProcessor>> {
        self.state.lock().processors.get(index).cloned()
    }

    pub fn buses_layout(&self) -> BusesLayout {
        self.layout.lock().clone()
    }

    fn total_io_channels(&self) -> (usize, usize) {
        let layout = self.layout.lock();
        (layout.total_input_channels(), layout.total_output_channels())
    }

    /// Load the plugin behind `id` and append it to the chain.
    pub fn add_plugin(&self, id: &str) -> Result<()> {
        let proc = Arc::new(PluginProcessor::new(
            id.to_string(),
            self.sample_rate(),
            self.block_size(),
            self.config.parallel_plugin_load,
        ));
        Arc::clone(&proc).load(self)?;
        let mut state = self.state.lock();
        proc.set_chain_index(state.processors.len());
        state.processors.push(proc);
        self.update_aggregates_locked(&mut state);
        Ok(())
    }

    /// Remove the processor at `index`; out-of-range is a no-op.
    pub fn del_processor(&self, index: usize) {
        let removed = {
            let mut state = self.state.lock();
            if index >= state.processors.len() {
                return;
            }
            let removed = state.processors.remove(index);
            for (i, proc) in state.processors.iter().enumerate().skip(index) {
                proc.set_chain_index(i);
            }
            self.update_aggregates_locked(&mut state);
            removed
        };
        drop(removed);
    }

    /// Swap two processors, reassigning their observable indices.
    pub fn exchange_processors(&self, idx_a: usize, idx_b: usize) {
        let mut state = self.state.lock();
        if idx_a == idx_b
            || idx_a >= state.processors.len()
            || idx_b >= state.processors.len()
        {
            return;
        }
        state.processors.swap(idx_a, idx_b);
        state.processors[idx_a].set_chain_index(idx_a);
        state.processors[idx_b].set_chain_index(idx_b);
        self.update_aggregates_locked(&mut state);
    }

    /// Install the session layout and renegotiate every processor's buses.
    pub fn update_channels(&self, channels_in: u16, channels_out: u16, channels_sc: u16) {
        let layout = BusesLayout::session(channels_in, channels_out, channels_sc);
        debug!("setting chain layout {layout:?}");
        *self.layout.lock() = layout;
        self.has_sidechain.store(channels_sc > 0, Ordering::SeqCst);

        let mut state = self.state.lock();
        state.extra_channels = 0;
        state.sidechain_disabled = false;
        let procs = state.processors.clone();
        for proc in &procs {
            if !self.negotiate_layout(&mut state, proc) {
                warn!("no working I/O layout found for {}", proc.name());
            }
        }
    }

    /// Bus negotiation: session layout as-is, then mono sidechain, then no
    /// sidechain, then the plugin's own layout with extra channels.
    fn negotiate_layout(&self, state: &mut ChainState, proc: &PluginProcessor) -> bool {
        let Some(plugin) = proc.plugin() else {
            return false;
        };

        let mut layout = self.layout.lock().clone();
        let has_sidechain = self.has_sidechain.load(Ordering::SeqCst);

        if has_sidechain && state.sidechain_disabled {
            debug!("the sidechain has been disabled, removing it from the standard layout");
            layout.input_buses.remove(1);
        }
        let want_sidechain = has_sidechain && !state.sidechain_disabled;

        let mut supported =
            plugin.with(|p| p.check_buses_layout(&layout) && p.set_buses_layout(&layout));

        if !supported {
            debug!("standard layout not supported by {}", proc.name());

            if want_sidechain {
                if layout.sidechain().map_or(0, |b| b.size()) > 1 {
                    debug!("trying with mono sidechain bus");
                    layout.input_buses[1] = ChannelSet::Mono;
                    supported = plugin
                        .with(|p| p.check_buses_layout(&layout) && p.set_buses_layout(&layout));
                }
                if !supported {
                    debug!("trying without sidechain bus");
                    layout.input_buses.remove(1);
                    supported = plugin
                        .with(|p| p.check_buses_layout(&layout) && p.set_buses_layout(&layout));
                    if supported {
                        proc.set_needs_disabled_sidechain(true);
                        state.sidechain_disabled = true;
                    }
                }
            }

            if !supported {
                if want_sidechain {
                    debug!("disabling sidechain input to use the plugin's I/O layout");
                    state.sidechain_disabled = true;
                }
                // from here on the sidechain stays off for this plugin
                proc.set_needs_disabled_sidechain(true);

                debug!("falling back to the plugin's default layout");
                let proc_layout = plugin.with(|p| p.buses_layout());

                let mut extra_in = proc_layout.main_input_channels() as i32
                    - layout.main_input_channels() as i32;
                for bus in proc_layout.input_buses.iter().skip(1) {
                    extra_in += bus.size() as i32;
                }
                let mut extra_out = proc_layout.main_output_channels() as i32
                    - layout.main_output_channels() as i32;
                for bus in proc_layout.output_buses.iter().skip(1) {
                    extra_out += bus.size() as i32;
                }

                proc.set_extra_channels(extra_in, extra_out);
                state.extra_channels = state.extra_channels.max(extra_in).max(extra_out);
                info!(
                    "{extra_in} extra input(s), {extra_out} extra output(s) -> {} extra channel(s) in total",
                    state.extra_channels
                );
                supported = true;
            }
        }

        supported
    }

    /// Bring a freshly loaded instance into service: negotiate buses, pick
    /// the processing precision, prepare, and warm up with silent blocks.
    pub fn init_plugin_instance(&self, proc: &PluginProcessor) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !self.negotiate_layout(&mut state, proc) {
                return Err(ServerError::NoSupportedLayout { name: proc.name() });
            }
        }
        let Some(plugin) = proc.plugin() else {
            return Err(ServerError::NoSupportedLayout { name: proc.name() });
        };

        let mut precision = SampleFormat::Float32;
        if self.is_double_precision() && self.supports_f64() {
            if plugin.with(|p| p.supports_f64()) {
                precision = SampleFormat::Float64;
            } else {
                warn!(
                    "host wants double precision but plugin '{}' does not support it",
                    proc.name()
                );
            }
        }
        plugin.with(|p| p.set_precision(precision));
        proc.prepare_to_play(self.sample_rate(), self.block_size());
        plugin.with(|p| p.enable_all_buses());
        self.pre_process_blocks(proc, precision);
        Ok(())
    }

    fn pre_process_blocks(&self, proc: &PluginProcessor, precision: SampleFormat) {
        let Some(plugin) = proc.plugin() else {
            return;
        };
        let channels = plugin.with(|p| {
            let layout = p.buses_layout();
            layout
                .total_input_channels()
                .max(layout.total_output_channels())
        });
        let samples = self.block_size();
        let transport = *self.play_head.lock();
        let mut midi = MidiEventVec::new();
        match precision {
            SampleFormat::Float64 => {
                let mut buffer = AudioBuffer::<f64>::new(channels, samples);
                for _ in 0..PRE_PROCESS_BLOCKS {
                    buffer.clear();
                    midi.clear();
                    proc.process_block_f64(&mut buffer, &mut midi, &transport);
                }
            }
            SampleFormat::Float32 => {
                let mut buffer = AudioBuffer::<f32>::new(channels, samples);
                for _ in 0..PRE_PROCESS_BLOCKS {
                    buffer.clear();
                    midi.clear();
                    proc.process_block_f32(&mut buffer, &mut midi, &transport);
                }
            }
        }
    }

    pub fn prepare_to_play(&self, sample_rate: f64, block_size: usize) {
        self.sample_rate_bits
            .store(sample_rate.to_bits(), Ordering::SeqCst);
        self.block_size.store(block_size, Ordering::SeqCst);
        let state = self.state.lock();
        for proc in &state.processors {
            proc.prepare_to_play(sample_rate, block_size);
        }
    }

    pub fn release_resources(&self) {
        let state = self.state.lock();
        for proc in &state.processors {
            proc.release_resources();
        }
    }

    /// Suspend or resume one processor (observable externally as bypass).
    pub fn suspend_processor(&self, index: usize, suspended: bool) {
        let proc = self.get_processor(index);
        if let Some(proc) = proc {
            proc.suspend_processing(suspended, self.sample_rate(), self.block_size());
            let mut state = self.state.lock();
            self.update_aggregates_locked(&mut state);
        }
    }

    pub fn process_block_f32(
        &self,
        buffer: &mut AudioBuffer<f32>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    ) {
        let start = Instant::now();
        self.process_block_real_f32(buffer, midi, transport);
        let elapsed = start.elapsed();
        if elapsed > SLOW_BLOCK_WARN {
            warn!(
                "chain ({}): high audio processing time: {elapsed:?}",
                self.describe()
            );
        }
    }

    pub fn process_block_f64(
        &self,
        buffer: &mut AudioBuffer<f64>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    ) {
        let start = Instant::now();
        self.process_block_real_f64(buffer, midi, transport);
        let elapsed = start.elapsed();
        if elapsed > SLOW_BLOCK_WARN {
            warn!(
                "chain ({}): high audio processing time: {elapsed:?}",
                self.describe()
            );
        }
    }

    fn process_block_real_f32(
        &self,
        buffer: &mut AudioBuffer<f32>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    ) {
        *self.play_head.lock() = *transport;
        let state = self.state.lock();
        let (total_in, total_out) = self.total_io_channels();
        for proc in &state.processors {
            if proc.is_suspended() {
                proc.process_block_bypassed_f32(buffer, total_in, total_out);
            } else {
                proc.process_block_f32(buffer, midi, transport);
            }
        }
    }

    fn process_block_real_f64(
        &self,
        buffer: &mut AudioBuffer<f64>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    ) {
        *self.play_head.lock() = *transport;
        let state = self.state.lock();
        let (total_in, total_out) = self.total_io_channels();
        for proc in &state.processors {
            if proc.is_suspended() {
                proc.process_block_bypassed_f64(buffer, total_in, total_out);
            } else {
                proc.process_block_f64(buffer, midi, transport);
            }
        }
    }

    /// Normalized parameter value; 0 on any out-of-range index.
    pub fn get_parameter_value(&self, proc_index: usize, param_index: usize) -> f32 {
        let state = self.state.lock();
        state
            .processors
            .get(proc_index)
            .and_then(|proc| proc.plugin())
            .and_then(|plugin| plugin.with(|p| p.parameter_value(param_index)))
            .unwrap_or(0.0)
    }

    /// Release everything and drop all processors.
    pub fn clear(&self) {
        self.release_resources();
        let removed: Vec<_> = {
            let mut state = self.state.lock();
            let removed = std::mem::take(&mut state.processors);
            self.update_aggregates_locked(&mut state);
            removed
        };
        drop(removed);
    }

    /// Recompute latency, precision support, extra channels, sidechain state,
    /// and tail from the current sequence.
    pub fn update_aggregates(&self) {
        let mut state = self.state.lock();
        self.update_aggregates_locked(&mut state);
    }

    fn update_aggregates_locked(&self, state: &mut ChainState) {
        let mut latency = 0usize;
        let mut supports_double = true;
        state.extra_channels = 0;
        state.sidechain_disabled = false;
        let has_sidechain = self.has_sidechain.load(Ordering::SeqCst);
        for proc in &state.processors {
            if proc.is_loaded() {
                proc.refresh_latency();
                latency += proc.last_known_latency();
                if !proc.supports_f64() {
                    supports_double = false;
                }
                state.extra_channels = state
                    .extra_channels
                    .max(proc.extra_in_channels())
                    .max(proc.extra_out_channels());
                state.sidechain_disabled = has_sidechain
                    && (state.sidechain_disabled || proc.needs_disabled_sidechain());
            }
        }
        if latency != state.latency_samples {
            info!("updating latency samples to {latency}");
            state.latency_samples = latency;
            self.latency.store(latency, Ordering::SeqCst);
        }
        state.supports_f64 = supports_double;
        state.tail_seconds = state
            .processors
            .iter()
            .rev()
            .find(|proc| !proc.is_suspended())
            .map(|proc| proc.tail_seconds())
            .unwrap_or(0.0);
    }

    /// `" > "`-joined plugin names, `<bypassed>` for suspended slots.
    pub fn describe(&self) -> String {
        let state = self.state.lock();
        state
            .processors
            .iter()
            .map(|proc| {
                if proc.is_suspended() {
                    "<bypassed>".to_string()
                } else {
                    proc.name()
                }
            })
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

impl Drop for ProcessorChain {
    fn drop(&mut self) {
        self.clear();
    }
}
