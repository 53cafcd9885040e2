//! Sources feeding the mixing graph
//!
//! A [`NoiseVoice`] loops its buffer through its own fader until a scheduled
//! stop frame. A [`SnippetVoice`] plays one excerpt of a buffer with a short
//! S-curve edge envelope so cuts at arbitrary offsets do not click.

use crate::audio::types::{AudioFrame, DecodedAudio};
use crate::graph::param::GainParam;
use sleepcast_common::FadeCurve;
use std::sync::Arc;

/// Edge envelope length for snippets
pub const SNIPPET_EDGE_SECS: f64 = 0.25;

/// Looped noise source with a per-source fader
pub struct NoiseVoice {
    id: u64,
    buffer: Arc<DecodedAudio>,
    position: usize,
    pub(crate) fader: GainParam,
    stop_at: Option<u64>,
}

impl NoiseVoice {
    pub fn new(id: u64, buffer: Arc<DecodedAudio>, initial_gain: f32) -> Self {
        Self {
            id,
            buffer,
            position: 0,
            fader: GainParam::new(initial_gain),
            stop_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Schedule the stop frame (earliest request wins)
    pub fn stop_at(&mut self, frame: u64) {
        self.stop_at = Some(self.stop_at.map_or(frame, |f| f.min(frame)));
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_at.is_some()
    }

    pub fn is_finished(&self, frame: u64) -> bool {
        self.buffer.is_empty() || self.stop_at.map_or(false, |f| frame >= f)
    }

    /// Fader gain at `frame` (zero once stopped)
    pub fn gain_at(&self, frame: u64) -> f32 {
        if self.is_finished(frame) {
            0.0
        } else {
            self.fader.value_at(frame)
        }
    }

    #[inline]
    pub fn next_frame(&mut self, frame: u64) -> AudioFrame {
        if self.is_finished(frame) {
            return AudioFrame::zero();
        }
        let sample = self.buffer.frame(self.position).unwrap_or_default();
        self.position += 1;
        if self.position >= self.buffer.frames() {
            self.position = 0;
        }
        sample.scaled(self.fader.value_at(frame))
    }
}

/// One excerpt of an episode
pub struct SnippetVoice {
    buffer: Arc<DecodedAudio>,
    position: usize,
    end: usize,
    played: usize,
    length: usize,
    edge: usize,
}

impl SnippetVoice {
    /// Play `duration_secs` of `buffer` starting at `offset_secs`
    ///
    /// The excerpt is cut short when the buffer ends first.
    pub fn new(buffer: Arc<DecodedAudio>, offset_secs: f64, duration_secs: f64) -> Self {
        let rate = buffer.sample_rate as f64;
        let total = buffer.frames();
        let start = ((offset_secs.max(0.0) * rate) as usize).min(total);
        let end = (start + (duration_secs.max(0.0) * rate) as usize).min(total);
        let length = end - start;
        let edge = ((SNIPPET_EDGE_SECS * rate) as usize).min(length / 2);

        Self {
            buffer,
            position: start,
            end,
            played: 0,
            length,
            edge,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.end
    }

    /// Frames left to play
    pub fn remaining_frames(&self) -> usize {
        self.end.saturating_sub(self.position)
    }

    fn envelope(&self) -> f32 {
        if self.edge == 0 {
            return 1.0;
        }
        let from_end = self.length - self.played;
        if self.played < self.edge {
            FadeCurve::SCurve.calculate_fade_in(self.played as f32 / self.edge as f32)
        } else if from_end <= self.edge {
            FadeCurve::SCurve.calculate_fade_in(from_end as f32 / self.edge as f32)
        } else {
            1.0
        }
    }

    #[inline]
    pub fn next_frame(&mut self) -> AudioFrame {
        if self.is_finished() {
            return AudioFrame::zero();
        }
        let gain = self.envelope();
        let sample = self.buffer.frame(self.position).unwrap_or_default();
        self.position += 1;
        self.played += 1;
        sample.scaled(gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(frames: usize, rate: u32) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio {
            samples: vec![1.0; frames * 2],
            sample_rate: rate,
        })
    }

    #[test]
    fn test_noise_loops() {
        let buffer = Arc::new(DecodedAudio {
            samples: vec![0.1, 0.1, 0.2, 0.2],
            sample_rate: 1000,
        });
        let mut voice = NoiseVoice::new(1, buffer, 1.0);
        let lefts: Vec<f32> = (0..5).map(|f| voice.next_frame(f).left).collect();
        assert_eq!(lefts, vec![0.1, 0.2, 0.1, 0.2, 0.1]);
    }

    #[test]
    fn test_noise_stops_at_frame() {
        let mut voice = NoiseVoice::new(1, constant(10, 1000), 1.0);
        voice.stop_at(3);
        voice.stop_at(8);
        assert!(voice.is_stopping());
        assert_eq!(voice.next_frame(2).left, 1.0);
        assert!(voice.is_finished(3));
        assert_eq!(voice.next_frame(3), AudioFrame::zero());
        assert_eq!(voice.gain_at(3), 0.0);
    }

    #[test]
    fn test_snippet_bounds() {
        let voice = SnippetVoice::new(constant(1000, 100), 2.0, 3.0);
        assert_eq!(voice.remaining_frames(), 300);

        // Past the end of the buffer
        let voice = SnippetVoice::new(constant(1000, 100), 8.0, 5.0);
        assert_eq!(voice.remaining_frames(), 200);
    }

    #[test]
    fn test_snippet_edges_are_shaped() {
        let mut voice = SnippetVoice::new(constant(1000, 100), 0.0, 2.0);
        let gains: Vec<f32> = std::iter::from_fn(|| {
            (!voice.is_finished()).then(|| voice.next_frame().left)
        })
        .collect();

        assert_eq!(gains.len(), 200);
        assert_eq!(gains[0], 0.0);
        assert_eq!(gains[100], 1.0);
        assert!(gains[199] < 0.01);
        assert!(gains[10] < gains[20]);
    }
}
