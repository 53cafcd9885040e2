//! Convolution reverb
//!
//! Uniformly partitioned overlap-save convolution (rustfft). The impulse is cut
//! into [`PARTITION_FRAMES`]-frame partitions whose spectra are multiplied
//! against a frequency-domain delay line of input blocks. Output lags input by
//! one partition.

use crate::audio::types::AudioFrame;
use rand::Rng;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Block and partition size in frames
pub const PARTITION_FRAMES: usize = 512;

/// Impulse length in seconds
pub const IMPULSE_SECS: f32 = 1.0;

/// Decay exponent of the synthetic impulse envelope
pub const IMPULSE_DECAY: f32 = 1.8;

const GAIN_CALIBRATION_DB: f32 = -58.0;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

/// Two-channel impulse response
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub channels: [Vec<f32>; 2],
    pub sample_rate: u32,
}

impl ImpulseResponse {
    /// Synthetic decaying noise: sample i of n is `rand(-1, 1) * (1 - i/n)^decay`
    pub fn decaying_noise<R: Rng + ?Sized>(
        rng: &mut R,
        sample_rate: u32,
        duration_secs: f32,
        decay: f32,
    ) -> Self {
        let length = (sample_rate as f32 * duration_secs).round() as usize;
        let mut channel = || {
            (0..length)
                .map(|i| {
                    let t = i as f32 / length as f32;
                    rng.gen_range(-1.0f32..1.0) * (1.0 - t).powf(decay)
                })
                .collect::<Vec<f32>>()
        };
        let left = channel();
        let right = channel();
        Self {
            channels: [left, right],
            sample_rate,
        }
    }

    /// Default room: one second, decay exponent 1.8
    pub fn room<R: Rng + ?Sized>(rng: &mut R, sample_rate: u32) -> Self {
        Self::decaying_noise(rng, sample_rate, IMPULSE_SECS, IMPULSE_DECAY)
    }

    pub fn len(&self) -> usize {
        self.channels[0].len().max(self.channels[1].len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scale that brings the impulse to a calibrated loudness
    ///
    /// Inverse RMS power with a -58 dB calibration, adjusted for sample rate.
    pub fn normalization_scale(&self) -> f32 {
        let length = self.len();
        if length == 0 {
            return 1.0;
        }
        let power: f32 = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|s| s * s)
            .sum();
        let mut rms = (power / (2 * length) as f32).sqrt();
        if !rms.is_finite() || rms < MIN_POWER {
            rms = MIN_POWER;
        }

        let mut scale = 1.0 / rms;
        scale *= 10f32.powf(GAIN_CALIBRATION_DB * 0.05);
        if self.sample_rate > 0 {
            scale *= GAIN_CALIBRATION_SAMPLE_RATE / self.sample_rate as f32;
        }
        scale
    }
}

struct ChannelConvolver {
    /// Spectra of the impulse partitions
    partitions: Vec<Vec<Complex<f32>>>,
    /// Ring of input block spectra, newest at `fdl_pos`
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_pos: usize,
    /// Previous block followed by the current block
    window: Vec<f32>,
    accum: Vec<Complex<f32>>,
    output: Vec<f32>,
}

impl ChannelConvolver {
    fn new(impulse: &[f32], scale: f32, fft: &Arc<dyn Fft<f32>>, scratch: &mut [Complex<f32>]) -> Self {
        let n = PARTITION_FRAMES * 2;
        let norm = scale / n as f32;

        let partitions: Vec<Vec<Complex<f32>>> = impulse
            .chunks(PARTITION_FRAMES)
            .map(|chunk| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); n];
                for (bin, &sample) in spectrum.iter_mut().zip(chunk) {
                    bin.re = sample * norm;
                }
                fft.process_with_scratch(&mut spectrum, scratch);
                spectrum
            })
            .collect();

        let count = partitions.len();
        Self {
            partitions,
            fdl: vec![vec![Complex::new(0.0, 0.0); n]; count],
            fdl_pos: 0,
            window: vec![0.0; n],
            accum: vec![Complex::new(0.0, 0.0); n],
            output: vec![0.0; PARTITION_FRAMES],
        }
    }

    fn process_block(
        &mut self,
        block: impl Iterator<Item = f32>,
        fft: &Arc<dyn Fft<f32>>,
        ifft: &Arc<dyn Fft<f32>>,
        scratch: &mut [Complex<f32>],
    ) {
        let count = self.partitions.len();
        if count == 0 {
            return;
        }

        self.window.copy_within(PARTITION_FRAMES.., 0);
        for (slot, sample) in self.window[PARTITION_FRAMES..].iter_mut().zip(block) {
            *slot = sample;
        }

        self.fdl_pos = (self.fdl_pos + count - 1) % count;
        let newest = &mut self.fdl[self.fdl_pos];
        for (bin, &sample) in newest.iter_mut().zip(&self.window) {
            *bin = Complex::new(sample, 0.0);
        }
        fft.process_with_scratch(newest, scratch);

        self.accum.fill(Complex::new(0.0, 0.0));
        for (p, partition) in self.partitions.iter().enumerate() {
            let input = &self.fdl[(self.fdl_pos + p) % count];
            for ((acc, x), h) in self.accum.iter_mut().zip(input).zip(partition) {
                *acc += x * h;
            }
        }

        ifft.process_with_scratch(&mut self.accum, scratch);
        for (out, bin) in self.output.iter_mut().zip(&self.accum[PARTITION_FRAMES..]) {
            *out = bin.re;
        }
    }
}

/// Stereo convolution reverb
///
/// Left input convolves with impulse channel 0, right with channel 1.
pub struct ConvolutionReverb {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    left: ChannelConvolver,
    right: ChannelConvolver,
    input: Vec<AudioFrame>,
    position: usize,
}

impl ConvolutionReverb {
    /// Build a reverb, normalizing the impulse loudness
    pub fn new(impulse: &ImpulseResponse) -> Self {
        Self::with_scale(impulse, impulse.normalization_scale())
    }

    /// Build a reverb with an explicit impulse scale
    pub fn with_scale(impulse: &ImpulseResponse, scale: f32) -> Self {
        let n = PARTITION_FRAMES * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        let left = ChannelConvolver::new(&impulse.channels[0], scale, &fft, &mut scratch);
        let right = ChannelConvolver::new(&impulse.channels[1], scale, &fft, &mut scratch);

        Self {
            fft,
            ifft,
            scratch,
            left,
            right,
            input: vec![AudioFrame::zero(); PARTITION_FRAMES],
            position: 0,
        }
    }

    /// Push one frame, return the wet frame from one partition ago
    #[inline]
    pub fn process(&mut self, frame: AudioFrame) -> AudioFrame {
        let out = AudioFrame {
            left: self.left.output[self.position],
            right: self.right.output[self.position],
        };
        self.input[self.position] = frame;
        self.position += 1;

        if self.position == PARTITION_FRAMES {
            self.position = 0;
            self.left.process_block(
                self.input.iter().map(|f| f.left),
                &self.fft,
                &self.ifft,
                &mut self.scratch,
            );
            self.right.process_block(
                self.input.iter().map(|f| f.right),
                &self.fft,
                &self.ifft,
                &mut self.scratch,
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn delta_impulse(left_at: usize, right_at: usize, length: usize) -> ImpulseResponse {
        let mut left = vec![0.0; length];
        let mut right = vec![0.0; length];
        left[left_at] = 1.0;
        right[right_at] = 0.5;
        ImpulseResponse {
            channels: [left, right],
            sample_rate: 44100,
        }
    }

    fn run(reverb: &mut ConvolutionReverb, frames: usize) -> Vec<AudioFrame> {
        (0..frames)
            .map(|i| {
                let x = if i == 0 { 1.0 } else { 0.0 };
                reverb.process(AudioFrame::from_stereo(x, x))
            })
            .collect()
    }

    #[test]
    fn test_delta_within_first_partition() {
        let mut reverb = ConvolutionReverb::with_scale(&delta_impulse(3, 10, 64), 1.0);
        let out = run(&mut reverb, PARTITION_FRAMES * 3);

        for (i, frame) in out.iter().enumerate() {
            let expected_left = if i == PARTITION_FRAMES + 3 { 1.0 } else { 0.0 };
            let expected_right = if i == PARTITION_FRAMES + 10 { 0.5 } else { 0.0 };
            assert!((frame.left - expected_left).abs() < 1e-4, "left[{}]={}", i, frame.left);
            assert!((frame.right - expected_right).abs() < 1e-4, "right[{}]={}", i, frame.right);
        }
    }

    #[test]
    fn test_delta_in_later_partition() {
        let tap = PARTITION_FRAMES * 2 + 17;
        let mut reverb = ConvolutionReverb::with_scale(&delta_impulse(tap, tap, tap + 1), 1.0);
        let out = run(&mut reverb, PARTITION_FRAMES * 5);

        let peak = PARTITION_FRAMES + tap;
        assert!((out[peak].left - 1.0).abs() < 1e-4);
        assert!(out[peak - 1].left.abs() < 1e-4);
        assert!(out[peak + 1].left.abs() < 1e-4);
    }

    #[test]
    fn test_room_impulse_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let ir = ImpulseResponse::room(&mut rng, 8000);

        assert_eq!(ir.len(), 8000);
        assert_ne!(ir.channels[0], ir.channels[1]);
        for channel in &ir.channels {
            for (i, &s) in channel.iter().enumerate() {
                let envelope = (1.0 - i as f32 / 8000.0).powf(IMPULSE_DECAY);
                assert!(s.abs() <= envelope + 1e-6);
            }
        }
    }

    #[test]
    fn test_normalization_scale() {
        let silent = ImpulseResponse {
            channels: [vec![0.0; 10], vec![0.0; 10]],
            sample_rate: 44100,
        };
        // Silence clamps to the minimum power
        let expected = (1.0 / MIN_POWER) * 10f32.powf(-58.0 * 0.05);
        assert!((silent.normalization_scale() - expected).abs() / expected < 1e-4);

        let unit = ImpulseResponse {
            channels: [vec![1.0; 10], vec![1.0; 10]],
            sample_rate: 22050,
        };
        let expected = 10f32.powf(-58.0 * 0.05) * 2.0;
        assert!((unit.normalization_scale() - expected).abs() < 1e-6);
    }
}
