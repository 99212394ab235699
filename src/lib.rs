//! # plugrid-server - processing core
//!
//! Server-side engine of a network-transparent audio plugin host. A client
//! streams audio/MIDI blocks over a socket; this crate hosts an ordered chain
//! of native plugins, pumps each block through them under real-time
//! deadlines, and streams the processed result back with compensated latency.
//!
//! ## Architecture
//!
//! - [`worker`] - one [`AudioWorker`] per session: socket-driven per-block
//!   loop, strictly FIFO, no pipelining
//! - [`chain`] - [`ProcessorChain`]: ordered plugin wrappers, bus-layout
//!   negotiation, latency/tail/precision aggregation
//! - [`processor`] - [`PluginProcessor`]: one loaded plugin, bypass path with
//!   sample-accurate latency compensation
//! - [`catalog`] - plugin descriptions, id forms, and the read-only catalog
//!   seam the server resolves plugins through
//! - [`instance`] - the [`PluginInstance`] trait format loaders implement
//! - [`frame`] - wire frames and the blocking length-prefixed codec
//! - [`msg_thread`] - the process-wide thread plugin SDKs require for
//!   instantiation and destruction
//!
//! Plugin discovery, session handshake, and the editor GUI bridge live
//! outside this crate.

pub mod buffer;
pub mod catalog;
pub mod chain;
pub mod config;
pub mod error;
pub mod frame;
pub mod instance;
pub mod layout;
pub mod mapper;
pub mod metrics;
pub mod msg_thread;
pub mod processor;
pub mod recents;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use buffer::AudioBuffer;
pub use catalog::{
    convert_legacy_id, create_plugin_id, find_plugin_description, PluginCatalog,
    PluginDescription, PluginFormat,
};
pub use chain::ProcessorChain;
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use frame::{
    read_frame, write_frame, AudioFrame, AudioReply, FramePayload, MidiEvent, MidiEventVec,
    SampleFormat, TransportInfo,
};
pub use instance::{ParameterObserver, PluginInstance};
pub use layout::{BusesLayout, ChannelSet};
pub use mapper::{ActiveChannelMask, ChannelMapper};
pub use processor::{loaded_plugin_count, PluginProcessor, SharedPlugin};
pub use worker::{AudioWorker, SessionParams};
