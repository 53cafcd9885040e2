//! Core audio data types
//!
//! Defines the decoded buffer shared between the cache, the noise bed and the
//! mixing graph, and the stereo frame used throughout rendering.

/// Decoded audio ready for playback.
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Stereo interleaved: [L, R, L, R, ...]
/// - Sample rate is the graph's working rate once stored in the cache
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// PCM audio samples (interleaved stereo)
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Build a stereo buffer from interleaved samples with any channel count.
    ///
    /// Mono is duplicated to both channels; sources with more than two
    /// channels keep only the first two.
    pub fn from_interleaved(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let samples = match channels {
            0 => Vec::new(),
            1 => samples.iter().flat_map(|&s| [s, s]).collect(),
            2 => samples,
            n => samples
                .chunks_exact(n as usize)
                .flat_map(|frame| [frame[0], frame[1]])
                .collect(),
        };
        Self {
            samples,
            sample_rate,
        }
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Get audio frame at specific frame index
    pub fn frame(&self, frame_index: usize) -> Option<AudioFrame> {
        let sample_index = frame_index * 2;
        if sample_index + 1 < self.samples.len() {
            Some(AudioFrame {
                left: self.samples[sample_index],
                right: self.samples[sample_index + 1],
            })
        } else {
            None
        }
    }
}

/// Single stereo audio frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFrame {
    /// Left channel sample (-1.0 to 1.0)
    pub left: f32,

    /// Right channel sample (-1.0 to 1.0)
    pub right: f32,
}

impl AudioFrame {
    /// Create a silent frame
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_stereo(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Frame scaled by a gain
    pub fn scaled(self, gain: f32) -> Self {
        Self {
            left: self.left * gain,
            right: self.right * gain,
        }
    }

    /// Add another frame to this one (for mixing)
    pub fn add(&mut self, other: &AudioFrame) {
        self.left += other.left;
        self.right += other.right;
    }

    /// Clamp samples to valid range [-1.0, 1.0]
    pub fn clamp(&mut self) {
        self.left = self.left.clamp(-1.0, 1.0);
        self.right = self.right.clamp(-1.0, 1.0);
    }
}
