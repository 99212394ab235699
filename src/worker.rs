//! Session worker.
//!
//! One worker per client session. It owns the connected socket, drives the
//! per-block read → process → write loop synchronously, and delegates plugin
//! control to its chain. Blocks are handled strictly in FIFO order; there is
//! no pipelining.

use crate::buffer::AudioBuffer;
use crate::catalog::PluginCatalog;
use crate::chain::ProcessorChain;
use crate::config::ServerConfig;
use crate::frame::{
    read_frame, write_frame, AudioFrame, AudioReply, FramePayload, MidiEventVec, TransportInfo,
};
use crate::mapper::{ActiveChannelMask, ChannelMapper};
use crate::metrics::SessionMetrics;
use crate::recents;
use crate::Result;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Socket readiness poll interval; shutdown is observed at this cadence.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Fixed parameters of one client session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub channels_in: u16,
    pub channels_out: u16,
    pub channels_sc: u16,
    pub active_channels: u64,
    pub sample_rate: f64,
    pub block_size: usize,
    pub double_precision: bool,
}

pub struct AudioWorker {
    socket: TcpStream,
    params: SessionParams,
    mask: ActiveChannelMask,
    mapper: ChannelMapper,
    chain: Arc<ProcessorChain>,
    catalog: Arc<dyn PluginCatalog>,
    config: ServerConfig,
    io_mtx: Mutex<()>,
    should_exit: AtomicBool,
    metrics: SessionMetrics,
    work_f32: Mutex<AudioBuffer<f32>>,
    work_f64: Mutex<AudioBuffer<f64>>,
}

impl AudioWorker {
    /// Take ownership of a connected socket and build the session's chain.
    pub fn new(
        socket: TcpStream,
        params: SessionParams,
        catalog: Arc<dyn PluginCatalog>,
        config: ServerConfig,
    ) -> Self {
        let mut mask = ActiveChannelMask::new(params.active_channels);
        mask.set_with_input(params.channels_in > 0);
        mask.set_num_channels(
            (params.channels_in + params.channels_sc) as usize,
            params.channels_out as usize,
        );
        let mapper = ChannelMapper::new(&mask);

        let chain = Arc::new(ProcessorChain::new(
            Arc::clone(&catalog),
            config.clone(),
            params.sample_rate,
            params.block_size,
        ));
        if params.double_precision && chain.supports_f64() {
            chain.set_double_precision(true);
        }
        chain.update_channels(params.channels_in, params.channels_out, params.channels_sc);

        Self {
            socket,
            params,
            mask,
            mapper,
            chain,
            catalog,
            config,
            io_mtx: Mutex::new(()),
            should_exit: AtomicBool::new(false),
            metrics: SessionMetrics::default(),
            work_f32: Mutex::new(AudioBuffer::empty()),
            work_f64: Mutex::new(AudioBuffer::empty()),
        }
    }

    pub fn chain(&self) -> &Arc<ProcessorChain> {
        &self.chain
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Poll the socket for readability. Held under the worker mutex so chain
    /// mutation from control threads can observe a quiescent window.
    fn wait_for_data(&self) -> bool {
        let _io = self.io_mtx.lock();
        if self.socket.set_read_timeout(Some(POLL_TIMEOUT)).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        match self.socket.peek(&mut probe) {
            // n == 0 is end-of-stream; let the read path observe it
            Ok(_) => {
                let _ = self.socket.set_read_timeout(None);
                true
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => false,
            // surface the failure on the read path
            Err(_) => {
                let _ = self.socket.set_read_timeout(None);
                true
            }
        }
    }

    /// The per-block loop. Returns when the client disconnects, a fatal
    /// per-block error occurs, or shutdown is requested.
    pub fn run(&self) {
        info!("audio processor started");
        self.chain
            .prepare_to_play(self.params.sample_rate, self.params.block_size);

        while !self.should_exit.load(Ordering::Acquire) {
            if !self.wait_for_data() {
                continue;
            }
            let frame: AudioFrame = match read_frame(&mut &self.socket) {
                Ok((frame, bytes)) => {
                    self.metrics.bytes_in.add(bytes as u64);
                    frame
                }
                Err(e) => {
                    error!("failed to read audio frame: {e}");
                    break;
                }
            };

            let _io = self.io_mtx.lock();
            let started = Instant::now();

            let needed = self.mask.num_active(true);
            let got = frame.payload.channels();
            if needed > got {
                error!(
                    "error processing audio frame: buffer has not enough channels: \
                     needed channels is {needed}, but buffer has {got}"
                );
                self.chain.release_resources();
                break;
            }

            let mut midi = frame.midi;
            let transport = frame.transport;
            let payload = match frame.payload {
                FramePayload::F64(mut buffer) => {
                    if self.chain.supports_f64() {
                        self.process_block_f64(&mut buffer, &mut midi, &transport);
                    } else {
                        // precision fallback: run the chain in single precision
                        let mut single = AudioBuffer::<f32>::empty();
                        single.copy_from_f64(&buffer);
                        self.process_block_f32(&mut single, &mut midi, &transport);
                        buffer.copy_from_f32(&single);
                    }
                    FramePayload::F64(buffer)
                }
                FramePayload::F32(mut buffer) => {
                    self.process_block_f32(&mut buffer, &mut midi, &transport);
                    FramePayload::F32(buffer)
                }
            };

            let reply = AudioReply {
                channels: payload.channels(),
                latency_samples: self.chain.latency_samples(),
                midi,
                payload,
            };
            match write_frame(&mut &self.socket, &reply) {
                Ok(bytes) => self.metrics.bytes_out.add(bytes as u64),
                Err(e) => {
                    error!("failed to send audio frame: {e}");
                    break;
                }
            }
            self.metrics.block_time.record(started.elapsed());
        }

        let _ = self.socket.shutdown(Shutdown::Both);
        self.metrics.block_time.clear();
        self.clear();
        info!("audio processor terminated");
    }

    /// Route a block through the chain, repacking through the working buffer
    /// when the client sent fewer channels than the chain needs.
    fn process_block_f32(
        &self,
        buffer: &mut AudioBuffer<f32>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    ) {
        let needed = self.chain_channels();
        if needed <= buffer.channels() {
            self.chain.process_block_f32(buffer, midi, transport);
        } else {
            let mut work = self.work_f32.lock();
            work.resize(needed, buffer.samples());
            if self.mask.num_active(true) > 0 {
                self.mapper.map(buffer, &mut work);
            } else {
                work.clear();
            }
            self.chain.process_block_f32(&mut work, midi, transport);
            self.mapper.map_reverse(&work, buffer);
        }
    }

    fn process_block_f64(
        &self,
        buffer: &mut AudioBuffer<f64>,
        midi: &mut MidiEventVec,
        transport: &TransportInfo,
    ) {
        let needed = self.chain_channels();
        if needed <= buffer.channels() {
            self.chain.process_block_f64(buffer, midi, transport);
        } else {
            let mut work = self.work_f64.lock();
            work.resize(needed, buffer.samples());
            if self.mask.num_active(true) > 0 {
                self.mapper.map(buffer, &mut work);
            } else {
                work.clear();
            }
            self.chain.process_block_f64(&mut work, midi, transport);
            self.mapper.map_reverse(&work, buffer);
        }
    }

    fn chain_channels(&self) -> usize {
        let declared = (self.params.channels_in + self.params.channels_sc)
            .max(self.params.channels_out) as usize;
        declared + self.chain.extra_channels().max(0) as usize
    }

    /// Signal the loop to exit; the in-flight block completes normally.
    pub fn shutdown(&self) {
        self.should_exit.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.chain.clear();
    }

    pub fn add_plugin(&self, id: &str) -> Result<()> {
        self.chain.add_plugin(id)
    }

    pub fn del_plugin(&self, index: usize) {
        debug!("deleting plugin {index}");
        self.chain.del_processor(index);
    }

    pub fn exchange_plugins(&self, idx_a: usize, idx_b: usize) {
        debug!("exchanging plugins idx_a={idx_a} idx_b={idx_b}");
        self.chain.exchange_processors(idx_a, idx_b);
    }

    pub fn add_to_recents(&self, id: &str, host: &str) {
        recents::add_to_recents(self.catalog.as_ref(), id, host, self.config.num_recents);
    }

    pub fn get_recents(&self, host: &str) -> String {
        recents::recents_list(host)
    }
}
