//! Streaming "now playing" engine.
//!
//! A [`PlaybackEngine`] walks a [`TrackQueue`], decoding the active track
//! incrementally into a playback device that asks for more audio whenever its
//! buffer queue runs low. The host calls [`MediaDispatcher::tick`] once per
//! frame to detect track completion and receive change notifications.

pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod library;
pub mod now_playing;

pub use audio::{AudioBackend, PlaybackEngine, PlaybackState, SystemBackend};
pub use config::{DeviceConfig, EngineConfig};
pub use dispatch::{ChangeNotifier, MediaDispatcher, PendingChanges};
pub use error::{MediaError, Result};
pub use library::{Track, TrackQueue, TrackSource};
