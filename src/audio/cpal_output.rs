use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfigRange,
};
use log::{info, warn};

use super::output::{QueueReader, QueuedDevice};
use crate::config::DeviceConfig;
use crate::error::{MediaError, Result};

/// Opens the default output device and feeds it from a `QueuedDevice`.
pub fn open_cpal_device(
    sample_rate: u32,
    channels: u16,
    buffer_samples: usize,
    config: &DeviceConfig,
) -> Result<QueuedDevice> {
    QueuedDevice::open(sample_rate, channels, buffer_samples, config, move |reader| {
        build_stream(reader, sample_rate, channels)
    })
}

fn build_stream(reader: QueueReader, sample_rate: u32, channels: u16) -> Result<Stream> {
    let open_err = |reason: String| MediaError::DeviceOpen {
        sample_rate,
        channels,
        reason,
    };

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| open_err("no default output device".to_string()))?;
    let (stream_config, sample_format) =
        output_config_for(&device, sample_rate, channels).map_err(open_err)?;

    let output_rate = stream_config.sample_rate.0;
    let output_channels = stream_config.channels;
    info!("Output stream: {output_rate} Hz, {output_channels} ch, {sample_format:?}");
    if output_rate != sample_rate {
        warn!("Device runs at {output_rate} Hz but the track is {sample_rate} Hz; pitch will shift");
    }
    if output_channels != channels {
        warn!("Mapping {channels} source channels onto {output_channels} output channels");
    }

    let output_channels = usize::from(output_channels);
    let stream = match sample_format {
        SampleFormat::F32 => build_typed::<f32>(&device, &stream_config, reader, output_channels),
        SampleFormat::I16 => build_typed::<i16>(&device, &stream_config, reader, output_channels),
        SampleFormat::U16 => build_typed::<u16>(&device, &stream_config, reader, output_channels),
        other => return Err(open_err(format!("unsupported sample format {other:?}"))),
    }
    .map_err(|e| open_err(format!("cannot build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| open_err(format!("cannot start output stream: {e}")))?;
    Ok(stream)
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut reader: QueueReader,
    output_channels: usize,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    device.build_output_stream(
        config,
        move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
            reader.fill(output, output_channels, |s: f32| T::from_sample(s));
        },
        |err| warn!("Audio stream error: {err}"),
        None,
    )
}

fn output_config_for(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
) -> std::result::Result<(StreamConfig, SampleFormat), String> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| format!("cannot query output configs: {e}"))?;
    let best = best_range(ranges, sample_rate, channels)
        .ok_or_else(|| "device reports no output configs".to_string())?;

    let rate = sample_rate.clamp(best.min_sample_rate().0, best.max_sample_rate().0);
    let config = StreamConfig {
        channels: best.channels(),
        sample_rate: SampleRate(rate),
        buffer_size: cpal::BufferSize::Default,
    };
    Ok((config, best.sample_format()))
}

/// Ranked by: track rate and channel count both supported, then the rate
/// alone, then f32 samples. Later ranges win ties.
fn best_range(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
    channels: u16,
) -> Option<SupportedStreamConfigRange> {
    ranges.max_by_key(|range| {
        let rate = (range.min_sample_rate().0..=range.max_sample_rate().0).contains(&sample_rate);
        (
            rate && range.channels() == channels,
            rate,
            range.sample_format() == SampleFormat::F32,
        )
    })
}
