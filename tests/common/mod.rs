//! Shared fixtures for integration tests: a mock catalog of scriptable
//! plugins and localhost socket plumbing for driving a session worker.

use parking_lot::Mutex;
use plugrid_server::{
    AudioBuffer, AudioFrame, AudioWorker, BusesLayout, ChannelSet, FramePayload, MidiEventVec,
    ParameterObserver, PluginCatalog, PluginDescription, PluginFormat, PluginInstance,
    SampleFormat, ServerConfig, SessionParams, TransportInfo,
};
use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

pub const TEST_SAMPLE_RATE: f64 = 48000.0;
pub const TEST_BLOCK_SIZE: usize = 64;

/// Scriptable mock plugin: applies a gain, reports a fixed latency/tail.
pub struct TestPlugin {
    desc: PluginDescription,
    gain: f32,
    latency: usize,
    supports_f64: bool,
    layout: BusesLayout,
    observer: Option<Arc<dyn ParameterObserver>>,
}

impl TestPlugin {
    pub fn new(desc: PluginDescription, gain: f32, latency: usize, supports_f64: bool) -> Self {
        let layout = BusesLayout {
            input_buses: vec![ChannelSet::of(desc.num_inputs)],
            output_buses: vec![ChannelSet::of(desc.num_outputs)],
        };
        Self {
            desc,
            gain,
            latency,
            supports_f64,
            layout,
            observer: None,
        }
    }
}

impl PluginInstance for TestPlugin {
    fn description(&self) -> &PluginDescription {
        &self.desc
    }

    fn prepare_to_play(&mut self, _sample_rate: f64, _block_size: usize) {}

    fn release_resources(&mut self) {}

    fn supports_f64(&self) -> bool {
        self.supports_f64
    }

    fn set_precision(&mut self, _format: SampleFormat) {}

    fn process_f32(
        &mut self,
        buffer: &mut AudioBuffer<f32>,
        _midi: &mut MidiEventVec,
        _transport: &TransportInfo,
    ) {
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
        for ch in 0..buffer.channels() {
            for sample in buffer.channel_mut(ch) {
                *sample *= f64::from(self.gain);
            }
        }
    }

    fn suspend_processing(&mut self, _suspended: bool) {}

    fn latency_samples(&self) -> usize {
        self.latency
    }

    fn tail_seconds(&self) -> f64 {
        0.0
    }

    fn buses_layout(&self) -> BusesLayout {
        self.layout.clone()
    }

    fn check_buses_layout(&self, _layout: &BusesLayout) -> bool {
        true
    }

    fn set_buses_layout(&mut self, layout: &BusesLayout) -> bool {
        self.layout = layout.clone();
        true
    }

    fn enable_all_buses(&mut self) {}

    fn parameter_count(&self) -> usize {
        0
    }

    fn parameter_value(&self, _index: usize) -> Option<f32> {
        None
    }

    fn set_parameter_observer(&mut self, observer: Option<Arc<dyn ParameterObserver>>) {
        self.observer = observer;
    }
}

struct TestEntry {
    desc: PluginDescription,
    gain: f32,
    latency: usize,
    supports_f64: bool,
}

/// Catalog of [`TestPlugin`]s keyed by uid.
#[derive(Default)]
pub struct TestCatalog {
    entries: Mutex<HashMap<i32, TestEntry>>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str, uid: i32, gain: f32, latency: usize, supports_f64: bool) {
        let desc = PluginDescription::new(PluginFormat::Vst3, name, uid).f64_support(supports_f64);
        self.entries.lock().insert(
            uid,
            TestEntry {
                desc,
                gain,
                latency,
                supports_f64,
            },
        );
    }
}

impl PluginCatalog for TestCatalog {
    fn get_types(&self) -> Vec<PluginDescription> {
        self.entries.lock().values().map(|e| e.desc.clone()).collect()
    }

    fn get_type_for_file(&self, _path: &str) -> Option<PluginDescription> {
        None
    }

    fn create_instance(
        &self,
        desc: &PluginDescription,
        _sample_rate: f64,
        _block_size: usize,
    ) -> Result<Box<dyn PluginInstance>, String> {
        let entries = self.entries.lock();
        let entry = entries
            .get(&desc.uid)
            .ok_or_else(|| format!("unknown plugin uid {}", desc.uid))?;
        Ok(Box::new(TestPlugin::new(
            entry.desc.clone(),
            entry.gain,
            entry.latency,
            entry.supports_f64,
        )))
    }
}

pub fn stereo_session() -> SessionParams {
    SessionParams {
        channels_in: 2,
        channels_out: 2,
        channels_sc: 0,
        active_channels: u64::MAX,
        sample_rate: TEST_SAMPLE_RATE,
        block_size: TEST_BLOCK_SIZE,
        double_precision: false,
    }
}

/// A worker running on a localhost TCP pair, plus the client end.
pub struct Session {
    pub worker: Arc<AudioWorker>,
    pub client: TcpStream,
    handle: Option<JoinHandle<()>>,
}

impl Session {
    pub fn start(params: SessionParams, catalog: Arc<TestCatalog>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind localhost");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).expect("connect");
        let (server_end, _) = listener.accept().expect("accept");

        let worker = Arc::new(AudioWorker::new(
            server_end,
            params,
            catalog,
            ServerConfig::default(),
        ));
        let runner = Arc::clone(&worker);
        let handle = std::thread::spawn(move || runner.run());
        Self {
            worker,
            client,
            handle: Some(handle),
        }
    }

    /// Send one block and wait for the processed reply.
    pub fn roundtrip(&mut self, frame: &AudioFrame) -> plugrid_server::AudioReply {
        plugrid_server::write_frame(&mut self.client, frame).expect("write frame");
        let (reply, _) = plugrid_server::read_frame(&mut self.client).expect("read reply");
        reply
    }

    pub fn finish(mut self) {
        self.worker.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.join().expect("worker thread");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.worker.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn f32_frame(channels: usize, samples: &[f32]) -> AudioFrame {
    let mut buffer = AudioBuffer::<f32>::new(channels, samples.len());
    for ch in 0..channels {
        buffer.channel_mut(ch).copy_from_slice(samples);
    }
    AudioFrame {
        payload: FramePayload::F32(buffer),
        midi: MidiEventVec::new(),
        transport: TransportInfo::default(),
    }
}

pub fn f64_frame(channels: usize, samples: &[f64]) -> AudioFrame {
    let mut buffer = AudioBuffer::<f64>::new(channels, samples.len());
    for ch in 0..channels {
        buffer.channel_mut(ch).copy_from_slice(samples);
    }
    AudioFrame {
        payload: FramePayload::F64(buffer),
        midi: MidiEventVec::new(),
        transport: TransportInfo::default(),
    }
}
