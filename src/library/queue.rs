use std::ops::Index;

use super::track::Track;
use crate::error::{MediaError, Result};

/// Ordered tracks with an active cursor.
///
/// Tracks are copied in on `add`, so later changes to a caller's `Track`
/// never reach the queued copy. The cursor is clamped into range after every
/// mutation and sits at 0 while the queue is empty.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: Vec<Track>,
    active_index: usize,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, track: &Track) {
        self.tracks.push(track.duplicate());
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.active_index = 0;
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track(&self, index: usize) -> Result<&Track> {
        self.tracks.get(index).ok_or(MediaError::IndexOutOfRange {
            index,
            len: self.tracks.len(),
        })
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn set_active_index(&mut self, index: usize) {
        self.active_index = index.min(self.tracks.len().saturating_sub(1));
    }

    pub fn active_track(&self) -> Option<&Track> {
        self.tracks.get(self.active_index)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    pub(crate) fn active_track_mut(&mut self) -> Option<&mut Track> {
        self.tracks.get_mut(self.active_index)
    }

    pub(crate) fn reset_play_counts(&mut self) {
        for track in &mut self.tracks {
            track.reset_play_count();
        }
    }
}

impl Index<usize> for TrackQueue {
    type Output = Track;

    fn index(&self, index: usize) -> &Track {
        match self.tracks.get(index) {
            Some(track) => track,
            None => panic!(
                "queue index {index} out of range for {} tracks",
                self.tracks.len()
            ),
        }
    }
}

impl<'a> IntoIterator for &'a TrackQueue {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
