use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("queue index {index} out of range for {len} tracks")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cannot open decoder for {track}: {reason}")]
    DecoderOpen { track: String, reason: String },

    #[error("cannot open playback device ({sample_rate} Hz, {channels} ch): {reason}")]
    DeviceOpen {
        sample_rate: u32,
        channels: u16,
        reason: String,
    },

    #[error("playback device error: {0}")]
    Device(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("now-playing engine is already installed")]
    AlreadyInitialized,

    #[error("now-playing engine is not installed")]
    NotInitialized,

    #[error("playback state lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, MediaError>;

pub(crate) fn lock_err<T>(_: T) -> MediaError {
    MediaError::LockPoisoned
}
