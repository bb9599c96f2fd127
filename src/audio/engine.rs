use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use super::clock::PlaybackClock;
use super::session::StreamSession;
use super::{AudioBackend, SystemBackend};
use crate::config::EngineConfig;
use crate::dispatch::ChangeNotifier;
use crate::error::Result;
use crate::library::{Track, TrackQueue, TrackSource};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Transport state machine over a `TrackQueue`.
///
/// Owns at most one `StreamSession`. Every transition that replaces or ends
/// playback tears the previous session down before returning.
pub struct PlaybackEngine {
    session: Option<StreamSession>,
    backend: Box<dyn AudioBackend>,
    config: EngineConfig,
    queue: TrackQueue,
    state: PlaybackState,
    clock: PlaybackClock,
    volume: f32,
    muted: bool,
    repeating: bool,
    shuffled: bool,
    // Completed tracks since the queue was loaded; the queue is done once this reaches its length.
    played_in_queue: usize,
    rng: Box<dyn RngCore + Send>,
    notifier: Arc<ChangeNotifier>,
}

impl PlaybackEngine {
    pub fn new(backend: impl AudioBackend + 'static, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            session: None,
            backend: Box::new(backend),
            volume: config.initial_volume,
            config,
            queue: TrackQueue::new(),
            state: PlaybackState::Stopped,
            clock: PlaybackClock::new(),
            muted: false,
            repeating: false,
            shuffled: false,
            played_in_queue: 0,
            rng: Box::new(StdRng::from_os_rng()),
            notifier: Arc::new(ChangeNotifier::default()),
        })
    }

    /// Engine backed by symphonia decoding and the system output device.
    pub fn with_system_backend(config: EngineConfig) -> Result<Self> {
        let backend = SystemBackend::new(&config);
        Self::new(backend, config)
    }

    /// Replaces the random source used for shuffle.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    /// Replaces the queue with `track` and starts it.
    pub fn play(&mut self, track: &Track) -> Result<()> {
        self.play_collection(std::slice::from_ref(track), 0)
    }

    /// Replaces the queue with `tracks` and starts the one at `index` (clamped).
    ///
    /// On a decoder or device failure the new queue stays loaded and the
    /// engine is left stopped.
    pub fn play_collection(&mut self, tracks: &[Track], index: usize) -> Result<()> {
        let previous = self.active_source();
        self.queue.clear();
        self.played_in_queue = 0;
        for track in tracks {
            self.queue.add(track);
        }
        self.queue.set_active_index(index);

        let started = self.start_active();
        self.notify_if_active_changed(previous.as_ref());
        started
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing || self.queue.is_empty() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.pause();
        }
        self.clock.stop();
        self.set_state(PlaybackState::Paused);
    }

    pub fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.resume();
        }
        self.clock.start();
        self.set_state(PlaybackState::Playing);
    }

    /// Position and play-counts are zeroed even when already stopped.
    pub fn stop(&mut self) {
        self.clock.reset();
        self.queue.reset_play_counts();
        if self.state == PlaybackState::Stopped {
            return;
        }
        self.teardown_session();
        self.set_state(PlaybackState::Stopped);
    }

    pub fn move_next(&mut self) -> Result<()> {
        self.advance(1)
    }

    pub fn move_previous(&mut self) -> Result<()> {
        self.advance(-1)
    }

    /// Host-loop tick: advances once the active track has fully played out.
    pub fn update(&mut self) -> Result<()> {
        if self.state != PlaybackState::Playing || self.queue.is_empty() {
            return Ok(());
        }
        let finished = self
            .session
            .as_ref()
            .map_or(true, StreamSession::is_finished);
        if !finished {
            return Ok(());
        }

        self.played_in_queue += 1;
        if self.played_in_queue >= self.queue.len() {
            self.played_in_queue = 0;
            if !self.repeating {
                debug!("Queue finished after {} tracks", self.queue.len());
                self.stop();
                self.notifier.raise_active_track_changed();
                return Ok(());
            }
        }
        self.move_next()
    }

    fn advance(&mut self, direction: isize) -> Result<()> {
        let previous = self.active_source();
        self.stop();
        if self.queue.is_empty() {
            return Ok(());
        }

        let last = self.queue.len() - 1;
        let mut direction = direction;
        if self.repeating && self.queue.active_index() >= last {
            self.queue.set_active_index(0);
            direction = 0;
        }

        let next = if self.shuffled {
            self.rng.random_range(0..self.queue.len())
        } else {
            let target = self.queue.active_index() as isize + direction;
            target.clamp(0, last as isize) as usize
        };
        debug!(
            "Advancing queue from {} to {next} of {}",
            self.queue.active_index(),
            self.queue.len()
        );
        self.queue.set_active_index(next);

        let started = self.start_active();
        self.notify_if_active_changed(previous.as_ref());
        started
    }

    fn start_active(&mut self) -> Result<()> {
        self.teardown_session();
        let gain = self.effective_gain();
        let Some(track) = self.queue.active_track() else {
            self.halt();
            return Ok(());
        };
        let name = track.name().to_string();

        match StreamSession::open(self.backend.as_ref(), track, &self.config, gain) {
            Ok(mut session) => {
                if let Some(queued) = self.queue.active_track_mut() {
                    queued.set_duration(session.duration());
                    queued.record_play();
                }
                session.play();
                self.session = Some(session);
                self.clock.restart();
                debug!("Playing '{name}'");
                self.set_state(PlaybackState::Playing);
                Ok(())
            }
            Err(err) => {
                warn!("Cannot start '{name}': {err}");
                self.halt();
                Err(err)
            }
        }
    }

    /// Back to Stopped without a session, leaving the queue as it is.
    fn halt(&mut self) {
        self.teardown_session();
        self.clock.reset();
        self.set_state(PlaybackState::Stopped);
    }

    fn teardown_session(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
        }
    }

    fn active_source(&self) -> Option<TrackSource> {
        self.queue.active_track().map(|t| t.source().clone())
    }

    fn notify_if_active_changed(&self, previous: Option<&TrackSource>) {
        let current = self.queue.active_track().map(Track::source);
        if previous != current {
            self.notifier.raise_active_track_changed();
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("Playback state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.notifier.raise_state_changed();
        }
    }

    fn push_gain(&mut self) {
        let gain = self.effective_gain();
        if let Some(session) = self.session.as_mut() {
            session.set_gain(gain);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Clamped to `[0, 1]`; NaN counts as silence.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.push_gain();
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.push_gain();
    }

    pub fn effective_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    pub fn set_repeating(&mut self, repeating: bool) {
        self.repeating = repeating;
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn set_shuffled(&mut self, shuffled: bool) {
        self.shuffled = shuffled;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn play_position(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared so a host can watch for changes from another thread.
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.teardown_session();
    }
}
