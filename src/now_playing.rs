//! Process-wide "now playing" engine.
//!
//! A host has one active media session; this module holds it behind an
//! explicit install/shutdown lifecycle. Independent `PlaybackEngine`s can
//! still be created directly.

use std::sync::Mutex;

use log::info;

use crate::audio::PlaybackEngine;
use crate::error::{lock_err, MediaError, Result};

static NOW_PLAYING: Mutex<Option<PlaybackEngine>> = Mutex::new(None);

pub fn install(engine: PlaybackEngine) -> Result<()> {
    let mut slot = NOW_PLAYING.lock().map_err(lock_err)?;
    if slot.is_some() {
        return Err(MediaError::AlreadyInitialized);
    }
    *slot = Some(engine);
    info!("Now-playing engine installed");
    Ok(())
}

/// Removes the installed engine and tears down its session.
///
/// Returns false when nothing was installed.
pub fn shutdown() -> Result<bool> {
    let engine = NOW_PLAYING.lock().map_err(lock_err)?.take();
    let Some(engine) = engine else {
        return Ok(false);
    };
    // Dropped outside the lock so teardown never blocks other callers.
    drop(engine);
    info!("Now-playing engine shut down");
    Ok(true)
}

pub fn is_installed() -> bool {
    NOW_PLAYING
        .lock()
        .map(|slot| slot.is_some())
        .unwrap_or(false)
}

pub fn with_now_playing<R>(f: impl FnOnce(&mut PlaybackEngine) -> R) -> Result<R> {
    let mut slot = NOW_PLAYING.lock().map_err(lock_err)?;
    let engine = slot.as_mut().ok_or(MediaError::NotInitialized)?;
    Ok(f(engine))
}
