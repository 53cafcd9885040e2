//! Audio decoder using symphonia
//!
//! Decodes in-memory payloads (MP3, AAC/M4A, Vorbis, FLAC, WAV) to PCM samples.
//! A truncated payload decodes up to the last complete packet.

use crate::audio::types::DecodedAudio;
use crate::error::{Error, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Decode primitive used by the cache and the noise bed
///
/// Implementations return stereo audio at the source's native rate.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: Vec<u8>, content_type: &str) -> Result<DecodedAudio>;
}

/// Audio decoder backed by symphonia's default codec registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, content_type: &str) -> Result<DecodedAudio> {
        let (samples, sample_rate, channels) = Self::decode_bytes(bytes, content_type)?;
        Ok(DecodedAudio::from_interleaved(samples, sample_rate, channels))
    }
}

impl SymphoniaDecoder {
    /// Decode an entire payload to interleaved PCM samples.
    ///
    /// # Returns
    /// - `samples`: Interleaved f32 samples in the source channel layout
    /// - `sample_rate`: Original sample rate (before resampling)
    /// - `channels`: Number of channels in source (1=mono, 2=stereo, etc.)
    ///
    /// # Errors
    /// - Unsupported or unrecognized format
    /// - No audio track
    /// - Nothing decodable in the payload
    pub fn decode_bytes(bytes: Vec<u8>, content_type: &str) -> Result<(Vec<f32>, u32, u16)> {
        let payload_len = bytes.len();
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        // Create a hint to help the format registry guess the format
        let mut hint = Hint::new();
        if let Some(ext) = extension_for_content_type(content_type) {
            hint.with_extension(ext);
        }
        if !content_type.is_empty() {
            hint.mime_type(content_type);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

        let mut format = probed.format;

        // Get the default audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        let mut samples = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    // End of stream (or end of a truncated payload)
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    warn!("Error reading packet: {}", e);
                    break;
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;

                    let needed = decoded.capacity() * spec.channels.count();
                    if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                        sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        samples.extend_from_slice(buf.samples());
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    skipped_packets += 1;
                    debug!("Skipping undecodable packet: {}", e);
                }
                Err(e) => {
                    warn!("Decode error: {}", e);
                    break;
                }
            }
        }

        if samples.is_empty() || sample_rate == 0 || channels == 0 {
            return Err(Error::Decode(format!(
                "No audio decoded from {} byte payload",
                payload_len
            )));
        }

        debug!(
            "Decoded {} frames at {}Hz, {} channels ({} packets skipped)",
            samples.len() / channels as usize,
            sample_rate,
            channels,
            skipped_packets
        );

        Ok((samples, sample_rate, channels))
    }
}

/// File extension hint for a MIME type
fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Some("mp3"),
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" => Some("m4a"),
        "audio/aac" | "audio/aacp" => Some("aac"),
        "audio/ogg" | "audio/vorbis" | "application/ogg" => Some("ogg"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => Some("wav"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(extension_for_content_type("audio/mpeg"), Some("mp3"));
        assert_eq!(
            extension_for_content_type("audio/x-m4a; charset=binary"),
            Some("m4a")
        );
        assert_eq!(extension_for_content_type("AUDIO/WAV"), Some("wav"));
        assert_eq!(extension_for_content_type("text/html"), None);
        assert_eq!(extension_for_content_type(""), None);
    }

    #[test]
    fn test_garbage_payload_is_decode_error() {
        let result = SymphoniaDecoder.decode(b"<html>not audio</html>".to_vec(), "text/html");
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_empty_payload_is_decode_error() {
        let result = SymphoniaDecoder.decode(Vec::new(), "audio/mpeg");
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
