//! In-memory WAV fixtures
//!
//! Deterministic audio for exercising the symphonia decode path without
//! touching the filesystem.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Cursor;

/// Encode a sine wave as 16-bit PCM WAV bytes
///
/// # Arguments
/// * `sample_rate` - Output rate in Hz
/// * `channels` - 1 (mono) or 2 (stereo, same signal on both channels)
/// * `duration_ms` - Duration in milliseconds
/// * `frequency_hz` - Sine frequency
/// * `amplitude` - Peak amplitude 0.0-1.0
pub fn sine_wav_bytes(
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        let total_frames = frame_count(sample_rate, duration_ms);
        let peak = amplitude * i16::MAX as f32;

        for frame in 0..total_frames {
            let t = frame as f32 / sample_rate as f32;
            let sample = ((2.0 * PI * frequency_hz * t).sin() * peak) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Frames in `duration_ms` at `sample_rate`
pub fn frame_count(sample_rate: u32, duration_ms: u64) -> u64 {
    (sample_rate as u64 * duration_ms) / 1000
}
