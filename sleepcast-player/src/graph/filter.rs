//! Stereo low-pass biquad
//!
//! RBJ cookbook coefficients with Butterworth Q, run in transposed direct
//! form II. Changing the cutoff recomputes coefficients but keeps the delay
//! state, so in-flight audio is not interrupted.

use crate::audio::types::AudioFrame;
use std::f32::consts::{FRAC_1_SQRT_2, PI};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    fn lowpass(cutoff_hz: f32, sample_rate: u32, q: f32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let cutoff = cutoff_hz.clamp(10.0, nyquist * 0.99);
        let w0 = 2.0 * PI * cutoff / sample_rate as f32;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha;
        let b1 = (1.0 - cos_w0) / a0;
        Self {
            b0: b1 / 2.0,
            b1,
            b2: b1 / 2.0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    z1: f32,
    z2: f32,
}

impl ChannelState {
    #[inline]
    fn process(&mut self, c: &Coefficients, x: f32) -> f32 {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }
}

/// Two-channel low-pass filter
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    sample_rate: u32,
    cutoff_hz: f32,
    coefficients: Coefficients,
    left: ChannelState,
    right: ChannelState,
}

impl LowPassFilter {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            cutoff_hz,
            coefficients: Coefficients::lowpass(cutoff_hz, sample_rate, FRAC_1_SQRT_2),
            left: ChannelState::default(),
            right: ChannelState::default(),
        }
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn set_cutoff(&mut self, cutoff_hz: f32) {
        if cutoff_hz == self.cutoff_hz {
            return;
        }
        self.cutoff_hz = cutoff_hz;
        self.coefficients = Coefficients::lowpass(cutoff_hz, self.sample_rate, FRAC_1_SQRT_2);
    }

    #[inline]
    pub fn process(&mut self, frame: AudioFrame) -> AudioFrame {
        AudioFrame {
            left: self.left.process(&self.coefficients, frame.left),
            right: self.right.process(&self.coefficients, frame.right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_rms(filter: &mut LowPassFilter, freq: f32, sample_rate: u32) -> f32 {
        let frames = sample_rate as usize / 2;
        let mut sum = 0.0f32;
        let mut counted = 0;
        for i in 0..frames {
            let x = (2.0 * PI * freq * i as f32 / sample_rate as f32).sin();
            let y = filter.process(AudioFrame::from_stereo(x, x)).left;
            // Skip the transient
            if i > frames / 4 {
                sum += y * y;
                counted += 1;
            }
        }
        (sum / counted as f32).sqrt()
    }

    #[test]
    fn test_dc_passes() {
        let mut filter = LowPassFilter::new(2200.0, 44100);
        let mut out = AudioFrame::zero();
        for _ in 0..10_000 {
            out = filter.process(AudioFrame::from_stereo(1.0, -1.0));
        }
        assert!((out.left - 1.0).abs() < 1e-3);
        assert!((out.right + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_high_frequencies_attenuated() {
        let mut low = LowPassFilter::new(400.0, 44100);
        let passband = sine_rms(&mut low, 100.0, 44100);
        let mut low = LowPassFilter::new(400.0, 44100);
        let stopband = sine_rms(&mut low, 6000.0, 44100);

        // ~0.707 RMS for a full-scale sine in the passband
        assert!(passband > 0.6, "passband rms {}", passband);
        assert!(stopband < 0.05, "stopband rms {}", stopband);
    }

    #[test]
    fn test_cutoff_change_keeps_state() {
        let mut filter = LowPassFilter::new(2200.0, 44100);
        for _ in 0..1000 {
            filter.process(AudioFrame::from_stereo(1.0, 1.0));
        }
        filter.set_cutoff(800.0);
        assert_eq!(filter.cutoff_hz(), 800.0);

        // Settled output continues without a jump back to zero
        let next = filter.process(AudioFrame::from_stereo(1.0, 1.0));
        assert!(next.left > 0.9);
    }
}
