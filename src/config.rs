use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};

/// 4096 stereo frames per refill; matches the chunk size the engine has always decoded.
pub const DEFAULT_SCRATCH_SAMPLES: usize = 4096 * 2;
pub const DEFAULT_PREFILL_BUFFERS: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the reusable scratch buffer, in samples (not frames).
    pub scratch_samples: usize,
    /// Synchronous refill attempts made before a session starts playing.
    pub prefill_buffers: usize,
    pub initial_volume: f32,
    pub device: DeviceConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub max_pending_buffers: usize,
    /// Buffer-needed is raised while fewer than this many buffers are pending.
    pub buffer_needed_threshold: usize,
    pub service_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scratch_samples: DEFAULT_SCRATCH_SAMPLES,
            prefill_buffers: DEFAULT_PREFILL_BUFFERS,
            initial_volume: 1.0,
            device: DeviceConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_pending_buffers: 8,
            buffer_needed_threshold: 3,
            service_interval_ms: 10,
        }
    }
}

impl DeviceConfig {
    pub fn service_interval(&self) -> Duration {
        Duration::from_millis(self.service_interval_ms.max(1))
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scratch_samples == 0 {
            return Err(MediaError::Config(
                "scratch_samples must be greater than 0".to_string(),
            ));
        }
        if self.device.buffer_needed_threshold == 0 {
            return Err(MediaError::Config(
                "device.buffer_needed_threshold must be greater than 0".to_string(),
            ));
        }
        if self.device.max_pending_buffers < self.prefill_buffers.max(1) {
            return Err(MediaError::Config(format!(
                "device.max_pending_buffers ({}) cannot hold {} pre-filled buffers",
                self.device.max_pending_buffers, self.prefill_buffers
            )));
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(MediaError::Config(format!(
                "initial_volume {} is outside [0, 1]",
                self.initial_volume
            )));
        }
        Ok(())
    }
}
