use std::{fs::File, io::Cursor, path::Path, sync::Arc, time::Duration};

use log::warn;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions},
    errors::Error,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream},
    meta::{MetadataOptions, MetadataRevision, StandardTagKey},
    probe::{Hint, ProbeResult},
};

use crate::error::{MediaError, Result};
use crate::library::TrackSource;

/// Incremental source of interleaved PCM samples.
///
/// `read_samples` never blocks waiting for data: returning 0 without
/// `is_end_of_stream` means "nothing ready yet".
pub trait SampleDecoder: Send {
    fn channels(&self) -> u16;
    fn sample_rate(&self) -> u32;
    fn total_duration(&self) -> Option<Duration>;
    /// Fills `out` from the start and returns how many samples were written.
    fn read_samples(&mut self, out: &mut [f32]) -> usize;
    fn is_end_of_stream(&self) -> bool;
}

#[derive(Clone, Debug, Default)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub duration: Option<Duration>,
}

pub fn read_track_metadata(path: &Path) -> Result<TrackMetadata> {
    let source = TrackSource::file(path);
    let mut probed = probe_source(&source)?;
    let mut metadata = TrackMetadata::default();

    if let Some(pre_metadata) = probed.metadata.get() {
        if let Some(revision) = pre_metadata.current() {
            apply_metadata_revision(revision, &mut metadata);
        }
    }

    let format = &mut probed.format;
    if let Some(revision) = format.metadata().current() {
        apply_metadata_revision(revision, &mut metadata);
    }

    if let Some(track) = format.default_track() {
        metadata.duration = frames_to_duration(
            track.codec_params.n_frames,
            track.codec_params.sample_rate,
        );
    }

    Ok(metadata)
}

fn apply_metadata_revision(revision: &MetadataRevision, metadata: &mut TrackMetadata) {
    for tag in revision.tags() {
        if metadata.title.is_none() && matches!(tag.std_key, Some(StandardTagKey::TrackTitle)) {
            metadata.title = Some(tag.value.to_string());
        }
    }
}

fn probe_source(source: &TrackSource) -> Result<ProbeResult> {
    let media: Box<dyn MediaSource> = match source {
        TrackSource::File(path) => Box::new(
            File::open(path).map_err(|e| decoder_open(source, format!("cannot open file: {e}")))?,
        ),
        TrackSource::Memory { bytes, .. } => Box::new(Cursor::new(Arc::clone(bytes))),
    };
    let mss = MediaSourceStream::new(media, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = source.extension() {
        hint.with_extension(ext);
    }

    symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decoder_open(source, format!("format probe failed: {e}")))
}

fn decoder_open(source: &TrackSource, reason: String) -> MediaError {
    MediaError::DecoderOpen {
        track: source.to_string(),
        reason,
    }
}

fn frames_to_duration(n_frames: Option<u64>, sample_rate: Option<u32>) -> Option<Duration> {
    match (n_frames, sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => {
            Some(Duration::from_secs_f64(frames as f64 / rate as f64))
        }
        _ => None,
    }
}

/// Packet-at-a-time decoder over any container/codec symphonia can probe.
///
/// Samples decoded past what the caller asked for are held in `pending` and
/// handed out on the next read, so chunk boundaries never drop audio.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    total_duration: Option<Duration>,
    sample_buffer: Option<SampleBuffer<f32>>,
    pending: Vec<f32>,
    pending_pos: usize,
    end_of_stream: bool,
}

impl SymphoniaDecoder {
    pub fn open(source: &TrackSource) -> Result<Self> {
        let probed = probe_source(source)?;
        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| decoder_open(source, "no default audio track found".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| decoder_open(source, format!("decoder creation failed: {e}")))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| decoder_open(source, "track has no sample-rate metadata".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| decoder_open(source, "track has no channel metadata".to_string()))?
            .count() as u16;
        let total_duration =
            frames_to_duration(track.codec_params.n_frames, track.codec_params.sample_rate);
        let track_id = track.id;

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            total_duration,
            sample_buffer: None,
            pending: Vec::new(),
            pending_pos: 0,
            end_of_stream: false,
        })
    }

    /// Decodes packets until one yields samples or the stream ends.
    fn decode_next_packet(&mut self) {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => {
                    self.end_of_stream = true;
                    return;
                }
                Err(Error::ResetRequired) => {
                    warn!("Decoder reset required; unsupported stream transition, ending track");
                    self.end_of_stream = true;
                    return;
                }
                Err(err) => {
                    warn!("Error reading packet, ending track: {err}");
                    self.end_of_stream = true;
                    return;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::DecodeError(err)) => {
                    warn!("Skipping undecodable packet: {err}");
                    continue;
                }
                Err(err) => {
                    warn!("Decode failure, ending track: {err}");
                    self.end_of_stream = true;
                    return;
                }
            };

            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if self
                .sample_buffer
                .as_ref()
                .map_or(true, |buffer| buffer.capacity() < needed)
            {
                self.sample_buffer =
                    Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }
            let Some(buffer) = self.sample_buffer.as_mut() else {
                continue;
            };
            buffer.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(buffer.samples());
            self.pending_pos = 0;
            if !self.pending.is_empty() {
                return;
            }
        }
    }
}

impl SampleDecoder for SymphoniaDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        self.total_duration
    }

    fn read_samples(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos < self.pending.len() {
                let available = &self.pending[self.pending_pos..];
                let count = available.len().min(out.len() - written);
                out[written..written + count].copy_from_slice(&available[..count]);
                written += count;
                self.pending_pos += count;
                continue;
            }
            if self.end_of_stream {
                break;
            }
            self.decode_next_packet();
        }
        written
    }

    fn is_end_of_stream(&self) -> bool {
        self.end_of_stream && self.pending_pos >= self.pending.len()
    }
}
