pub mod clock;
#[cfg(feature = "cpal-output")]
pub mod cpal_output;
pub mod decoder;
pub mod engine;
#[cfg(test)]
pub(crate) mod mock;
pub mod output;
pub mod session;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::library::TrackSource;

pub use clock::PlaybackClock;
pub use decoder::{SampleDecoder, SymphoniaDecoder};
pub use engine::{PlaybackEngine, PlaybackState};
pub use output::{BufferNeededHandler, BufferSink, PlaybackDevice, QueuedDevice};

/// Opens decoders and playback devices for the engine.
pub trait AudioBackend: Send {
    fn open_decoder(&self, source: &TrackSource) -> Result<Box<dyn SampleDecoder>>;
    fn open_device(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn PlaybackDevice>>;
}

/// symphonia decoding and, with the `cpal-output` feature, the default cpal output device.
pub struct SystemBackend {
    #[cfg(feature = "cpal-output")]
    device: crate::config::DeviceConfig,
    #[cfg(feature = "cpal-output")]
    buffer_samples: usize,
}

impl SystemBackend {
    #[cfg_attr(not(feature = "cpal-output"), allow(unused_variables))]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            #[cfg(feature = "cpal-output")]
            device: config.device.clone(),
            #[cfg(feature = "cpal-output")]
            buffer_samples: config.scratch_samples,
        }
    }
}

impl AudioBackend for SystemBackend {
    fn open_decoder(&self, source: &TrackSource) -> Result<Box<dyn SampleDecoder>> {
        Ok(Box::new(SymphoniaDecoder::open(source)?))
    }

    #[cfg(feature = "cpal-output")]
    fn open_device(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn PlaybackDevice>> {
        let device =
            cpal_output::open_cpal_device(sample_rate, channels, self.buffer_samples, &self.device)?;
        Ok(Box::new(device))
    }

    #[cfg(not(feature = "cpal-output"))]
    fn open_device(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn PlaybackDevice>> {
        Err(crate::error::MediaError::DeviceOpen {
            sample_rate,
            channels,
            reason: "audio output requires the `cpal-output` feature".to_string(),
        })
    }
}
