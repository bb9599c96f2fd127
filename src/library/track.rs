use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::audio::decoder::read_track_metadata;
use crate::error::Result;

/// Where a track's compressed audio lives.
///
/// Two sources are the same track when they name the same file, or when they
/// share the same in-memory buffer (clones of a `Memory` source share it).
#[derive(Clone)]
pub enum TrackSource {
    File(PathBuf),
    Memory { label: String, bytes: Arc<[u8]> },
}

impl TrackSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn memory(label: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory {
            label: label.into(),
            bytes: bytes.into(),
        }
    }

    /// File extension used as a probing hint.
    pub fn extension(&self) -> Option<&str> {
        let name = match self {
            Self::File(path) => return path.extension().and_then(|ext| ext.to_str()),
            Self::Memory { label, .. } => label.as_str(),
        };
        Path::new(name).extension().and_then(|ext| ext.to_str())
    }
}

impl PartialEq for TrackSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::File(a), Self::File(b)) => a == b,
            (Self::Memory { bytes: a, .. }, Self::Memory { bytes: b, .. }) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for TrackSource {}

impl fmt::Debug for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Memory { label, bytes } => f
                .debug_struct("Memory")
                .field("label", label)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory { label, .. } => write!(f, "<memory:{label}>"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Track {
    source: TrackSource,
    name: String,
    duration: Option<Duration>,
    play_count: u32,
}

impl Track {
    pub fn new(source: TrackSource, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
            duration: None,
            play_count: 0,
        }
    }

    /// Track named after the file stem; nothing is read from disk.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        Self::new(TrackSource::File(path), name)
    }

    /// Reads title and duration from the container's metadata.
    pub fn probe(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = read_track_metadata(path)?;
        let mut track = Self::from_path(path);
        if let Some(title) = metadata.title {
            track.name = title;
        }
        track.duration = metadata.duration;
        Ok(track)
    }

    /// Fresh copy for the queue: same identity and name, no decode-time state.
    pub fn duplicate(&self) -> Self {
        Self::new(self.source.clone(), self.name.clone())
    }

    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Known once the track has been opened for playback (or probed).
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn play_count(&self) -> u32 {
        self.play_count
    }

    pub fn is_same_track(&self, other: &Track) -> bool {
        self.source == other.source
    }

    pub(crate) fn set_duration(&mut self, duration: Option<Duration>) {
        if duration.is_some() {
            self.duration = duration;
        }
    }

    pub(crate) fn record_play(&mut self) {
        self.play_count = self.play_count.saturating_add(1);
    }

    pub(crate) fn reset_play_count(&mut self) {
        self.play_count = 0;
    }
}
