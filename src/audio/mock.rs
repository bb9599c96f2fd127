//! Scripted decoder/device backend for unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io::Cursor,
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::decoder::SampleDecoder;
use super::output::{BufferNeededHandler, BufferSink, PlaybackDevice, QueueReader, QueuedDevice};
use super::AudioBackend;
use crate::config::DeviceConfig;
use crate::error::{MediaError, Result};
use crate::library::{Track, TrackSource};

pub(crate) fn track(name: &str) -> Track {
    Track::new(
        TrackSource::memory(format!("{name}.ogg"), Vec::<u8>::new()),
        name,
    )
}

fn key(name: &str) -> String {
    format!("<memory:{name}.ogg>")
}

/// 16-bit PCM WAV with a sawtooth in every channel.
pub(crate) fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for frame in 0..frames {
            for _ in 0..channels {
                let value = ((frame % 100) as i16 - 50) * 200;
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// What a decoder yields each time its track is opened.
#[derive(Clone, Debug)]
pub(crate) struct Clip {
    chunks: Vec<Vec<f32>>,
    ends: bool,
    tone: bool,
    channels: u16,
    sample_rate: u32,
    duration: Option<Duration>,
}

impl Clip {
    pub(crate) fn new(chunks: usize) -> Self {
        Self {
            chunks: (0..chunks).map(|i| vec![i as f32 * 0.1; 4]).collect(),
            ends: true,
            tone: false,
            channels: 2,
            sample_rate: 48_000,
            duration: None,
        }
    }

    pub(crate) fn endless(mut self) -> Self {
        self.ends = false;
        self
    }

    /// Never runs dry once the scripted chunks are used up.
    pub(crate) fn tone(mut self) -> Self {
        self.ends = false;
        self.tone = true;
        self
    }

    pub(crate) fn duration_secs(mut self, secs: u64) -> Self {
        self.duration = Some(Duration::from_secs(secs));
        self
    }

    pub(crate) fn format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }
}

/// Live decoder contents. An empty chunk is a transient underrun.
#[derive(Debug, Default)]
pub(crate) struct DecoderState {
    chunks: VecDeque<Vec<f32>>,
    finished: bool,
    tone: bool,
    reads: usize,
}

#[derive(Clone)]
pub(crate) struct DecoderHandle(Arc<Mutex<DecoderState>>);

impl DecoderHandle {
    pub(crate) fn push(&self, chunk: Vec<f32>) {
        self.0.lock().unwrap().chunks.push_back(chunk);
    }

    pub(crate) fn push_underrun(&self) {
        self.push(Vec::new());
    }

    pub(crate) fn finish(&self) {
        self.0.lock().unwrap().finished = true;
    }

    /// Drops anything not yet read and reports end of stream.
    pub(crate) fn exhaust(&self) {
        let mut state = self.0.lock().unwrap();
        state.chunks.clear();
        state.finished = true;
    }

    pub(crate) fn reads(&self) -> usize {
        self.0.lock().unwrap().reads
    }
}

struct MockDecoder {
    state: Arc<Mutex<DecoderState>>,
    channels: u16,
    sample_rate: u32,
    duration: Option<Duration>,
}

impl SampleDecoder for MockDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        self.duration
    }

    fn read_samples(&mut self, out: &mut [f32]) -> usize {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        let Some(mut chunk) = state.chunks.pop_front() else {
            if !state.tone {
                return 0;
            }
            let count = out.len().min(16);
            out[..count].fill(0.25);
            return count;
        };
        let count = chunk.len().min(out.len());
        out[..count].copy_from_slice(&chunk[..count]);
        if count < chunk.len() {
            let rest = chunk.split_off(count);
            state.chunks.push_front(rest);
        }
        count
    }

    fn is_end_of_stream(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.finished && state.chunks.is_empty()
    }
}

#[derive(Default)]
pub(crate) struct DeviceLog {
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
    pub(crate) submitted: Vec<Vec<f32>>,
    pub(crate) pending: usize,
    pub(crate) gain: Option<f32>,
    pub(crate) calls: Vec<&'static str>,
    pub(crate) closed: bool,
    handler: Option<BufferNeededHandler>,
}

#[derive(Clone)]
pub(crate) struct DeviceHandle(Arc<Mutex<DeviceLog>>);

impl DeviceHandle {
    pub(crate) fn log(&self) -> std::sync::MutexGuard<'_, DeviceLog> {
        self.0.lock().unwrap()
    }

    pub(crate) fn has_handler(&self) -> bool {
        self.log().handler.is_some()
    }

    /// Raises buffer-needed once; false when nothing is subscribed.
    pub(crate) fn fire_buffer_needed(&self) -> bool {
        let Some(mut handler) = self.log().handler.take() else {
            return false;
        };
        let mut sink = MockSink(Arc::clone(&self.0));
        let target: &mut dyn BufferSink = &mut sink;
        if handler(target).is_continue() {
            let mut log = self.log();
            if log.handler.is_none() && !log.closed {
                log.handler = Some(handler);
            }
        }
        true
    }

    /// Pretends the device played everything queued.
    pub(crate) fn drain(&self) {
        self.log().pending = 0;
    }
}

struct MockSink(Arc<Mutex<DeviceLog>>);

fn submit(log: &Mutex<DeviceLog>, samples: &[f32]) -> Result<()> {
    let mut log = log.lock().map_err(|_| MediaError::LockPoisoned)?;
    if log.closed {
        return Err(MediaError::Device("device closed".to_string()));
    }
    log.submitted.push(samples.to_vec());
    log.pending += 1;
    Ok(())
}

impl BufferSink for MockSink {
    fn submit_buffer(&mut self, samples: &[f32]) -> Result<()> {
        submit(&self.0, samples)
    }

    fn pending_buffer_count(&self) -> usize {
        self.0.lock().unwrap().pending
    }
}

struct MockDevice(Arc<Mutex<DeviceLog>>);

impl MockDevice {
    fn record(&self, call: &'static str) {
        self.0.lock().unwrap().calls.push(call);
    }
}

impl BufferSink for MockDevice {
    fn submit_buffer(&mut self, samples: &[f32]) -> Result<()> {
        submit(&self.0, samples)
    }

    fn pending_buffer_count(&self) -> usize {
        self.0.lock().unwrap().pending
    }
}

impl PlaybackDevice for MockDevice {
    fn set_gain(&mut self, gain: f32) {
        let mut log = self.0.lock().unwrap();
        log.gain = Some(gain);
        log.calls.push("set_gain");
    }

    fn play(&mut self) {
        self.record("play");
    }

    fn pause(&mut self) {
        self.record("pause");
    }

    fn resume(&mut self) {
        self.record("resume");
    }

    fn stop(&mut self) {
        self.record("stop");
    }

    fn set_buffer_needed(&mut self, handler: BufferNeededHandler) {
        let mut log = self.0.lock().unwrap();
        log.handler = Some(handler);
        log.calls.push("set_buffer_needed");
    }

    fn clear_buffer_needed(&mut self) {
        let mut log = self.0.lock().unwrap();
        log.handler = None;
        log.calls.push("clear_buffer_needed");
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if let Ok(mut log) = self.0.lock() {
            log.closed = true;
            log.handler = None;
            log.calls.push("close");
        }
    }
}

#[derive(Default)]
struct BackendState {
    clips: HashMap<String, Clip>,
    live: HashMap<String, DecoderHandle>,
    devices: Vec<DeviceHandle>,
    decoder_opens: Vec<String>,
    failing_decoders: HashSet<String>,
    fail_devices: bool,
    queued: Option<DeviceConfig>,
}

pub(crate) struct MockBackend(Arc<Mutex<BackendState>>);

/// Test-side view of a `MockBackend` that has been handed to an engine.
#[derive(Clone)]
pub(crate) struct MockControl(Arc<Mutex<BackendState>>);

impl MockBackend {
    pub(crate) fn new() -> (Self, MockControl) {
        let state = Arc::new(Mutex::new(BackendState::default()));
        (Self(Arc::clone(&state)), MockControl(state))
    }
}

impl MockControl {
    pub(crate) fn define(&self, name: &str, clip: Clip) {
        self.0.lock().unwrap().clips.insert(key(name), clip);
    }

    /// Decoder opened most recently for `name`.
    pub(crate) fn decoder(&self, name: &str) -> DecoderHandle {
        self.0
            .lock()
            .unwrap()
            .live
            .get(&key(name))
            .cloned()
            .unwrap_or_else(|| panic!("no decoder opened for {name}"))
    }

    pub(crate) fn last_device(&self) -> DeviceHandle {
        self.0
            .lock()
            .unwrap()
            .devices
            .last()
            .cloned()
            .expect("no device opened")
    }

    pub(crate) fn devices(&self) -> Vec<DeviceHandle> {
        self.0.lock().unwrap().devices.clone()
    }

    pub(crate) fn decoder_opens(&self) -> Vec<String> {
        self.0.lock().unwrap().decoder_opens.clone()
    }

    pub(crate) fn fail_decoder(&self, name: &str) {
        self.0.lock().unwrap().failing_decoders.insert(key(name));
    }

    pub(crate) fn fail_devices(&self, fail: bool) {
        self.0.lock().unwrap().fail_devices = fail;
    }

    /// Opens real `QueuedDevice`s, drained by a background thread, instead
    /// of recording devices. `devices()` stays empty in this mode.
    pub(crate) fn queue_devices(&self, config: DeviceConfig) {
        self.0.lock().unwrap().queued = Some(config);
    }

    /// Exhausts the playing decoder and drains the newest device.
    pub(crate) fn finish_playback(&self, name: &str) {
        self.decoder(name).exhaust();
        self.last_device().drain();
    }
}

impl AudioBackend for MockBackend {
    fn open_decoder(&self, source: &TrackSource) -> Result<Box<dyn SampleDecoder>> {
        let mut state = self.0.lock().map_err(|_| MediaError::LockPoisoned)?;
        let name = source.to_string();
        if state.failing_decoders.contains(&name) {
            return Err(MediaError::DecoderOpen {
                track: name,
                reason: "scripted failure".to_string(),
            });
        }

        let clip = state.clips.get(&name).cloned().unwrap_or_else(|| Clip::new(2));
        let live = Arc::new(Mutex::new(DecoderState {
            chunks: clip.chunks.iter().cloned().collect(),
            finished: clip.ends,
            tone: clip.tone,
            reads: 0,
        }));
        state.live.insert(name.clone(), DecoderHandle(Arc::clone(&live)));
        state.decoder_opens.push(name);

        Ok(Box::new(MockDecoder {
            state: live,
            channels: clip.channels,
            sample_rate: clip.sample_rate,
            duration: clip.duration,
        }))
    }

    fn open_device(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn PlaybackDevice>> {
        let mut state = self.0.lock().map_err(|_| MediaError::LockPoisoned)?;
        if state.fail_devices {
            return Err(MediaError::DeviceOpen {
                sample_rate,
                channels,
                reason: "scripted failure".to_string(),
            });
        }
        if let Some(config) = &state.queued {
            let device = QueuedDevice::open(sample_rate, channels, 64, config, move |reader| {
                Ok(DrainedOutput::start(reader, channels))
            })?;
            return Ok(Box::new(device));
        }
        let log = Arc::new(Mutex::new(DeviceLog {
            sample_rate,
            channels,
            ..DeviceLog::default()
        }));
        state.devices.push(DeviceHandle(Arc::clone(&log)));
        Ok(Box::new(MockDevice(log)))
    }
}

/// Stand-in for an output stream: pulls from the queue every millisecond.
struct DrainedOutput {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DrainedOutput {
    fn start(mut reader: QueueReader, channels: u16) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let channels = usize::from(channels.max(1));
        let worker = thread::spawn(move || {
            let mut out = vec![0.0_f32; 32 * channels];
            while !flag.load(Ordering::Acquire) {
                reader.fill(&mut out, channels, |s| s);
                thread::sleep(Duration::from_millis(1));
            }
        });
        Self {
            stop,
            worker: Some(worker),
        }
    }
}

impl Drop for DrainedOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
