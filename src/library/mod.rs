pub mod queue;
pub mod track;

pub use queue::TrackQueue;
pub use track::{Track, TrackSource};
