//! Plugin instance trait.
//!
//! This module defines the seam between the processing core and the plugin
//! SDK. Format loaders implement [`PluginInstance`]; the core only ever talks
//! to the trait. Instances are created and finally destroyed on the message
//! thread; everything else may happen on the session's worker thread.

use crate::buffer::AudioBuffer;
use crate::catalog::PluginDescription;
use crate::frame::{MidiEventVec, SampleFormat, TransportInfo};
use crate::layout::BusesLayout;
use std::sync::Arc;

/// Sink for parameter-change notifications from a hosted plugin.
///
/// Callbacks may arrive on arbitrary SDK threads, including while the owning
/// wrapper is concurrently unloading.
pub trait ParameterObserver: Send + Sync {
    fn parameter_changed(&self, param_index: usize, value: f32);
}

/// Unified interface over loaded plugins of any format.
pub trait PluginInstance: Send {
    fn description(&self) -> &PluginDescription;

    fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize);

    fn release_resources(&mut self);

    fn supports_f64(&self) -> bool;

    /// Select the precision subsequent `process_*` calls will use.
    fn set_precision(&mut self, format: SampleFormat);

    fn process_f32(
        &mut self,
        buffer: &mut AudioBuffer<f32>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    );

    fn process_f64(
        &mut self,
        buffer: &mut AudioBuffer<f64>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    );

    fn suspend_processing(&mut self, suspended: bool);

    fn latency_samples(&self) -> usize;

    fn tail_seconds(&self) -> f64;

    /// The layout the plugin is currently configured with (its preference
    /// when nothing has been negotiated yet).
    fn buses_layout(&self) -> BusesLayout;

    fn check_buses_layout(&self, layout: &BusesLayout) -> bool;

    fn set_buses_layout(&mut self, layout: &BusesLayout) -> bool;

    fn enable_all_buses(&mut self);

    fn parameter_count(&self) -> usize;

    /// Normalized parameter value; `None` when the index is out of range.
    fn parameter_value(&self, index: usize) -> Option<f32>;

    /// Register (`Some`) or remove (`None`) the observer notified on every
    /// parameter change.
    fn set_parameter_observer(&mut self, observer: Option<Arc<dyn ParameterObserver>>);
}
