//! Edge-triggered change flags and the per-frame host hook that drains them.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::PlaybackEngine;
use crate::error::Result;

/// Flags raised by the engine and cleared by whoever drains them.
///
/// Raising an already-raised flag is a no-op, so any number of changes
/// between two drains are reported once.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    active_track_changed: AtomicBool,
    state_changed: AtomicBool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pub active_track_changed: bool,
    pub state_changed: bool,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        !self.active_track_changed && !self.state_changed
    }
}

impl ChangeNotifier {
    pub fn raise_active_track_changed(&self) {
        self.active_track_changed.store(true, Ordering::Release);
    }

    pub fn raise_state_changed(&self) {
        self.state_changed.store(true, Ordering::Release);
    }

    /// Clears both flags, returning what was raised.
    pub fn take(&self) -> PendingChanges {
        PendingChanges {
            active_track_changed: self.active_track_changed.swap(false, Ordering::AcqRel),
            state_changed: self.state_changed.swap(false, Ordering::AcqRel),
        }
    }
}

pub type MediaListener = Box<dyn FnMut(&PlaybackEngine) + Send>;

/// What the host loop runs once per frame: tick the engine, then fan out
/// whatever changed to the registered listeners.
#[derive(Default)]
pub struct MediaDispatcher {
    active_track_listeners: Vec<MediaListener>,
    state_listeners: Vec<MediaListener>,
}

impl MediaDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_active_track_changed(&mut self, listener: impl FnMut(&PlaybackEngine) + Send + 'static) {
        self.active_track_listeners.push(Box::new(listener));
    }

    pub fn on_state_changed(&mut self, listener: impl FnMut(&PlaybackEngine) + Send + 'static) {
        self.state_listeners.push(Box::new(listener));
    }

    /// Listeners still run when `update` fails; the error is returned afterwards.
    pub fn tick(&mut self, engine: &mut PlaybackEngine) -> Result<PendingChanges> {
        let updated = engine.update();
        let changes = self.dispatch(engine);
        updated.map(|()| changes)
    }

    pub fn dispatch(&mut self, engine: &PlaybackEngine) -> PendingChanges {
        let changes = engine.notifier().take();
        if changes.active_track_changed {
            for listener in &mut self.active_track_listeners {
                listener(engine);
            }
        }
        if changes.state_changed {
            for listener in &mut self.state_listeners {
                listener(engine);
            }
        }
        changes
    }
}
