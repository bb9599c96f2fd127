use std::{
    ops::ControlFlow,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{info, trace, warn};

use super::decoder::SampleDecoder;
use super::output::{BufferSink, PlaybackDevice};
use super::AudioBackend;
use crate::config::EngineConfig;
use crate::error::{lock_err, Result};
use crate::library::Track;

/// Decoder plus the scratch buffer every refill reuses.
struct StreamFeed {
    decoder: Box<dyn SampleDecoder>,
    scratch: Vec<f32>,
}

impl StreamFeed {
    /// Decodes one scratch buffer's worth and submits it.
    ///
    /// `Break` means the decoder is exhausted and buffer-needed is no longer wanted.
    fn refill<S: BufferSink + ?Sized>(&mut self, sink: &mut S) -> ControlFlow<()> {
        let count = self.decoder.read_samples(&mut self.scratch);
        if count > 0 {
            if let Err(err) = sink.submit_buffer(&self.scratch[..count]) {
                warn!("Dropping {count} decoded samples: {err}");
            }
            return ControlFlow::Continue(());
        }
        if self.decoder.is_end_of_stream() {
            return ControlFlow::Break(());
        }
        trace!("Decoder underrun; waiting for the next buffer request");
        ControlFlow::Continue(())
    }
}

/// The live decoder and device pairing for one track.
///
/// Dropping the session detaches buffer-needed first, then releases the
/// device, then the decoder.
pub struct StreamSession {
    // Field order is drop order: the device goes before the decoder it reads.
    device: Box<dyn PlaybackDevice>,
    feed: Arc<Mutex<StreamFeed>>,
    sample_rate: u32,
    channels: u16,
    duration: Option<Duration>,
}

impl StreamSession {
    /// Opens decoder and device for `track` and pre-fills the device queue.
    ///
    /// The device is left stopped; the caller starts it.
    pub fn open(
        backend: &dyn AudioBackend,
        track: &Track,
        config: &EngineConfig,
        gain: f32,
    ) -> Result<Self> {
        let decoder = backend.open_decoder(track.source())?;
        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        let duration = decoder.total_duration();

        let mut device = backend.open_device(sample_rate, channels)?;
        device.set_gain(gain);

        let feed = Arc::new(Mutex::new(StreamFeed {
            decoder,
            scratch: vec![0.0; config.scratch_samples],
        }));
        let callback_feed = Arc::clone(&feed);
        device.set_buffer_needed(Box::new(move |sink: &mut dyn BufferSink| {
            match callback_feed.lock() {
                Ok(mut feed) => feed.refill(sink),
                Err(_) => {
                    warn!("Stream feed lock poisoned; no longer feeding output");
                    ControlFlow::Break(())
                }
            }
        }));

        let mut session = Self {
            device,
            feed,
            sample_rate,
            channels,
            duration,
        };
        session.prefill(config.prefill_buffers)?;

        info!(
            "Opened stream for '{}': {sample_rate} Hz, {channels} ch, duration {:?}, {} buffers queued",
            track.name(),
            duration,
            session.device.pending_buffer_count()
        );
        Ok(session)
    }

    fn prefill(&mut self, attempts: usize) -> Result<()> {
        for attempt in 0..attempts {
            if self.refill()?.is_break() {
                break;
            }
            // This pass queued nothing: the clip is shorter than the pre-fill.
            if self.device.pending_buffer_count() == attempt {
                break;
            }
        }
        Ok(())
    }

    /// Runs the refill routine directly against this session's device.
    pub fn refill(&mut self) -> Result<ControlFlow<()>> {
        let flow = self
            .feed
            .lock()
            .map_err(lock_err)?
            .refill(&mut *self.device);
        if flow.is_break() {
            self.device.clear_buffer_needed();
        }
        Ok(flow)
    }

    pub fn is_end_of_stream(&self) -> bool {
        match self.feed.lock() {
            Ok(feed) => feed.decoder.is_end_of_stream(),
            Err(_) => true,
        }
    }

    /// Decoder exhausted and every submitted buffer played.
    pub fn is_finished(&self) -> bool {
        self.is_end_of_stream() && self.device.pending_buffer_count() == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn pending_buffer_count(&self) -> usize {
        self.device.pending_buffer_count()
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.device.set_gain(gain);
    }

    pub fn play(&mut self) {
        self.device.play();
    }

    pub fn pause(&mut self) {
        self.device.pause();
    }

    pub fn resume(&mut self) {
        self.device.resume();
    }

    pub fn stop(&mut self) {
        self.device.stop();
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.device.clear_buffer_needed();
        self.device.stop();
    }
}
