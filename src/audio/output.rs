use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering},
        mpsc, Arc, Mutex, OnceLock,
    },
    thread::{self, JoinHandle, Thread},
    time::Duration,
};

use log::{debug, warn};
use ringbuf::{
    traits::{Consumer as _, Observer as _, Producer as _, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::config::DeviceConfig;
use crate::error::{lock_err, MediaError, Result};

const STATE_STOPPED: u8 = 0;
const STATE_PLAYING: u8 = 1;
const STATE_PAUSED: u8 = 2;

/// Raised whenever the device wants more audio. Returning `Break` unsubscribes.
pub type BufferNeededHandler = Box<dyn FnMut(&mut dyn BufferSink) -> ControlFlow<()> + Send>;

pub trait BufferSink {
    /// Queues a copy of `samples`; they play after everything already queued.
    fn submit_buffer(&mut self, samples: &[f32]) -> Result<()>;
    fn pending_buffer_count(&self) -> usize;
}

/// Releasing the device (dropping it) must stop its buffer-needed notifications.
pub trait PlaybackDevice: BufferSink + Send {
    fn set_gain(&mut self, gain: f32);
    fn play(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn set_buffer_needed(&mut self, handler: BufferNeededHandler);
    /// Returns only once no handler invocation is in flight.
    fn clear_buffer_needed(&mut self);
}

/// State shared between the host side, the service thread and the real-time reader.
pub struct OutputShared {
    state: AtomicU8,
    gain_bits: AtomicU32,
    pending: AtomicUsize,
    flush_requested: AtomicBool,
    shutdown: AtomicBool,
    service: OnceLock<Thread>,
}

impl OutputShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_STOPPED),
            gain_bits: AtomicU32::new(1.0_f32.to_bits()),
            pending: AtomicUsize::new(0),
            flush_requested: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            service: OnceLock::new(),
        }
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn release_one(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn wake_service(&self) {
        if let Some(thread) = self.service.get() {
            thread.unpark();
        }
    }
}

/// Host-side half of the buffer queue.
pub struct QueueWriter {
    filled: HeapProd<Vec<f32>>,
    free: HeapCons<Vec<f32>>,
    shared: Arc<OutputShared>,
}

impl BufferSink for QueueWriter {
    fn submit_buffer(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        if self.filled.is_full() {
            return Err(MediaError::Device(format!(
                "output queue is full ({} buffers pending)",
                self.shared.pending()
            )));
        }

        let mut buffer = self.free.try_pop().unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(samples);

        // Counted before the push so the reader can never release it first.
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.filled.try_push(buffer).is_err() {
            self.shared.release_one();
            return Err(MediaError::Device("output queue rejected buffer".to_string()));
        }
        Ok(())
    }

    fn pending_buffer_count(&self) -> usize {
        self.shared.pending()
    }
}

/// Real-time half of the buffer queue, driven from the output callback.
pub struct QueueReader {
    filled: HeapCons<Vec<f32>>,
    free: HeapProd<Vec<f32>>,
    current: Option<Vec<f32>>,
    cursor: usize,
    frame: Vec<f32>,
    shared: Arc<OutputShared>,
}

impl QueueReader {
    /// Writes one callback's worth of interleaved output.
    ///
    /// Outputs silence unless playing; short reads are padded with silence.
    /// When the output channel count differs from the source, channels are
    /// copied cyclically (mono to both sides, extra source channels dropped).
    pub fn fill<T: Copy>(&mut self, output: &mut [T], output_channels: usize, convert: impl Fn(f32) -> T) {
        if self.shared.flush_requested.swap(false, Ordering::AcqRel) {
            self.flush();
        }

        let silence = convert(0.0);
        if self.shared.state() != STATE_PLAYING {
            output.fill(silence);
            return;
        }

        let gain = self.shared.gain();
        let output_channels = output_channels.max(1);
        if output_channels == self.frame.len() {
            for sample in output.iter_mut() {
                *sample = match self.next_sample() {
                    Some(value) => convert(value * gain),
                    None => silence,
                };
            }
            return;
        }

        for out_frame in output.chunks_mut(output_channels) {
            for slot in 0..self.frame.len() {
                self.frame[slot] = self.next_sample().unwrap_or(0.0);
            }
            let source_channels = self.frame.len();
            for (ch, sample) in out_frame.iter_mut().enumerate() {
                *sample = convert(self.frame[ch % source_channels] * gain);
            }
        }
    }

    fn next_sample(&mut self) -> Option<f32> {
        loop {
            if let Some(buffer) = &self.current {
                if self.cursor < buffer.len() {
                    let value = buffer[self.cursor];
                    self.cursor += 1;
                    return Some(value);
                }
                self.finish_current();
            }
            self.current = Some(self.filled.try_pop()?);
            self.cursor = 0;
        }
    }

    fn finish_current(&mut self) {
        if let Some(buffer) = self.current.take() {
            let _ = self.free.try_push(buffer);
            self.cursor = 0;
            self.shared.release_one();
            self.shared.wake_service();
        }
    }

    fn flush(&mut self) {
        if let Some(buffer) = self.current.take() {
            let _ = self.free.try_push(buffer);
        }
        while let Some(buffer) = self.filled.try_pop() {
            let _ = self.free.try_push(buffer);
        }
        self.cursor = 0;
        self.shared.pending.store(0, Ordering::Release);
    }
}

fn output_queue(
    max_buffers: usize,
    buffer_samples: usize,
    source_channels: u16,
    shared: &Arc<OutputShared>,
) -> (QueueWriter, QueueReader) {
    let max_buffers = max_buffers.max(1);
    let (filled_prod, filled_cons) = HeapRb::<Vec<f32>>::new(max_buffers).split();
    let (mut free_prod, free_cons) = HeapRb::<Vec<f32>>::new(max_buffers + 1).split();
    for _ in 0..max_buffers {
        let _ = free_prod.try_push(Vec::with_capacity(buffer_samples));
    }

    let writer = QueueWriter {
        filled: filled_prod,
        free: free_cons,
        shared: Arc::clone(shared),
    };
    let reader = QueueReader {
        filled: filled_cons,
        free: free_prod,
        current: None,
        cursor: 0,
        frame: vec![0.0; usize::from(source_channels.max(1))],
        shared: Arc::clone(shared),
    };
    (writer, reader)
}

/// A playback device built on a bounded buffer queue.
///
/// A service thread opens the actual output (through `open_output`), keeps
/// whatever it returns alive until the device is dropped, and raises
/// buffer-needed while playing and fewer than the configured threshold of
/// buffers are pending.
pub struct QueuedDevice {
    shared: Arc<OutputShared>,
    writer: Arc<Mutex<QueueWriter>>,
    handler: Arc<Mutex<Option<BufferNeededHandler>>>,
    service: Option<JoinHandle<()>>,
}

impl QueuedDevice {
    pub fn open<F, G>(
        sample_rate: u32,
        channels: u16,
        buffer_samples: usize,
        config: &DeviceConfig,
        open_output: F,
    ) -> Result<Self>
    where
        F: FnOnce(QueueReader) -> Result<G> + Send + 'static,
        G: 'static,
    {
        let shared = Arc::new(OutputShared::new());
        let (writer, reader) =
            output_queue(config.max_pending_buffers, buffer_samples, channels, &shared);
        let writer = Arc::new(Mutex::new(writer));
        let handler: Arc<Mutex<Option<BufferNeededHandler>>> = Arc::new(Mutex::new(None));

        let threshold = config.buffer_needed_threshold;
        let interval = config.service_interval();
        let service_shared = Arc::clone(&shared);
        let service_writer = Arc::clone(&writer);
        let service_handler = Arc::clone(&handler);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let service = thread::Builder::new()
            .name("nowplaying-output".to_string())
            .spawn(move || {
                let _ = service_shared.service.set(thread::current());
                let guard = match open_output(reader) {
                    Ok(guard) => guard,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_service(
                    &service_shared,
                    &service_writer,
                    &service_handler,
                    threshold,
                    interval,
                );
                drop(guard);
            })
            .map_err(|e| MediaError::DeviceOpen {
                sample_rate,
                channels,
                reason: format!("cannot spawn output thread: {e}"),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("Output queue ready: {sample_rate} Hz, {channels} ch");
                Ok(Self {
                    shared,
                    writer,
                    handler,
                    service: Some(service),
                })
            }
            Ok(Err(err)) => {
                let _ = service.join();
                Err(err)
            }
            Err(_) => {
                let _ = service.join();
                Err(MediaError::DeviceOpen {
                    sample_rate,
                    channels,
                    reason: "output thread exited during startup".to_string(),
                })
            }
        }
    }
}

fn run_service(
    shared: &OutputShared,
    writer: &Mutex<QueueWriter>,
    handler: &Mutex<Option<BufferNeededHandler>>,
    threshold: usize,
    interval: Duration,
) {
    while !shared.shutdown.load(Ordering::Acquire) {
        if shared.state() == STATE_PLAYING {
            raise_buffer_needed(shared, writer, handler, threshold);
        }
        thread::park_timeout(interval);
    }
}

fn raise_buffer_needed(
    shared: &OutputShared,
    writer: &Mutex<QueueWriter>,
    handler: &Mutex<Option<BufferNeededHandler>>,
    threshold: usize,
) {
    while shared.pending() < threshold {
        let Ok(mut slot) = handler.lock() else {
            warn!("Buffer-needed handler lock poisoned; no longer feeding output");
            return;
        };
        let Some(callback) = slot.as_mut() else {
            return;
        };

        // The writer is locked per submission only: a host thread refilling
        // the same feed takes the feed lock before the writer lock.
        let mut sink = ServiceSink { writer, added: 0 };
        let target: &mut dyn BufferSink = &mut sink;
        let flow = callback(target);

        if flow.is_break() {
            *slot = None;
            return;
        }
        // Nothing ready yet; wait for the next wake-up instead of spinning.
        if sink.added == 0 {
            return;
        }
    }
}

/// Sink handed to the buffer-needed handler on the service thread.
struct ServiceSink<'a> {
    writer: &'a Mutex<QueueWriter>,
    added: usize,
}

impl BufferSink for ServiceSink<'_> {
    fn submit_buffer(&mut self, samples: &[f32]) -> Result<()> {
        self.writer.lock().map_err(lock_err)?.submit_buffer(samples)?;
        if !samples.is_empty() {
            self.added += 1;
        }
        Ok(())
    }

    fn pending_buffer_count(&self) -> usize {
        match self.writer.lock() {
            Ok(writer) => writer.pending_buffer_count(),
            Err(_) => 0,
        }
    }
}

impl BufferSink for QueuedDevice {
    fn submit_buffer(&mut self, samples: &[f32]) -> Result<()> {
        self.writer.lock().map_err(lock_err)?.submit_buffer(samples)
    }

    fn pending_buffer_count(&self) -> usize {
        self.shared.pending()
    }
}

impl PlaybackDevice for QueuedDevice {
    fn set_gain(&mut self, gain: f32) {
        self.shared
            .gain_bits
            .store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    fn play(&mut self) {
        self.shared.state.store(STATE_PLAYING, Ordering::Release);
        self.shared.wake_service();
    }

    fn pause(&mut self) {
        let _ = self.shared.state.compare_exchange(
            STATE_PLAYING,
            STATE_PAUSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn resume(&mut self) {
        if self
            .shared
            .state
            .compare_exchange(STATE_PAUSED, STATE_PLAYING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.wake_service();
        }
    }

    fn stop(&mut self) {
        self.shared.state.store(STATE_STOPPED, Ordering::Release);
        self.shared.flush_requested.store(true, Ordering::Release);
    }

    fn set_buffer_needed(&mut self, handler: BufferNeededHandler) {
        match self.handler.lock() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
        self.shared.wake_service();
    }

    fn clear_buffer_needed(&mut self) {
        match self.handler.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl Drop for QueuedDevice {
    fn drop(&mut self) {
        self.clear_buffer_needed();
        self.shared.state.store(STATE_STOPPED, Ordering::Release);
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(service) = self.service.take() {
            service.thread().unpark();
            let _ = service.join();
        }
    }
}
