//! Mixing graph
//!
//! Persistent routing built once per session:
//!
//! ```text
//! noise voice -> fader --+
//! noise voice -> fader --+--> noise bus ----------------------------+--> master
//!                                                                   |
//! snippet voices --> snippet gain --> low-pass --+--> dry gain -----+
//!                                                +--> reverb --> wet gain
//! ```
//!
//! The graph is pull-rendered by the output device. Every parameter change is
//! scheduled against the frame clock that [`MixingGraph::render`] advances.

pub mod filter;
pub mod param;
pub mod reverb;
pub mod voice;

use crate::audio::types::{AudioFrame, DecodedAudio};
use filter::LowPassFilter;
use param::GainParam;
use reverb::{ConvolutionReverb, ImpulseResponse};
use sleepcast_common::{FadeCurve, SessionConfig};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use voice::{NoiseVoice, SnippetVoice};

/// Graph shared with the audio thread; `None` until first built
pub type SharedGraph = Arc<Mutex<Option<MixingGraph>>>;

/// Lock the shared graph, recovering from a poisoned lock
pub fn lock_graph(graph: &SharedGraph) -> MutexGuard<'_, Option<MixingGraph>> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Master gain while playing
pub const MASTER_PLAYING_GAIN: f32 = 0.9;

/// Mixing graph state
pub struct MixingGraph {
    sample_rate: u32,
    /// Frames rendered so far
    frame: u64,
    master: GainParam,
    noise_bus: GainParam,
    noise_voices: Vec<NoiseVoice>,
    snippet_gain: GainParam,
    snippet_voices: Vec<SnippetVoice>,
    lowpass: LowPassFilter,
    dry: GainParam,
    wet: GainParam,
    reverb: ConvolutionReverb,
    next_voice_id: u64,
}

impl MixingGraph {
    /// Build the graph with the given reverb impulse
    ///
    /// Master gain starts at zero; bus levels and tone come from `config`.
    pub fn new(sample_rate: u32, impulse: &ImpulseResponse, config: &SessionConfig) -> Self {
        let mut graph = Self {
            sample_rate,
            frame: 0,
            master: GainParam::new(0.0),
            noise_bus: GainParam::new(config.noise_level),
            noise_voices: Vec::new(),
            snippet_gain: GainParam::new(config.snippet_level),
            snippet_voices: Vec::new(),
            lowpass: LowPassFilter::new(config.tone_hz, sample_rate),
            dry: GainParam::new(config.dry_gain()),
            wet: GainParam::new(config.reverb_mix),
            reverb: ConvolutionReverb::new(impulse),
            next_voice_id: 1,
        };
        graph.apply_config(config);
        debug!(
            "Mixing graph built at {}Hz with {}-frame impulse",
            sample_rate,
            impulse.len()
        );
        graph
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current frame clock
    pub fn now_frame(&self) -> u64 {
        self.frame
    }

    /// Current clock in seconds
    pub fn now_secs(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn frames_for(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    /// Apply levels, tone and reverb mix without interrupting playback
    pub fn apply_config(&mut self, config: &SessionConfig) {
        self.noise_bus.set_value(config.noise_level);
        self.snippet_gain.set_value(config.snippet_level);
        self.lowpass.set_cutoff(config.tone_hz);
        self.dry.set_value(config.dry_gain());
        self.wet.set_value(config.reverb_mix);
    }

    pub fn master(&self) -> &GainParam {
        &self.master
    }

    /// Jump the master gain to `value` and ramp linearly to `target`
    pub fn ramp_master_from(&mut self, value: f32, target: f32, duration: Duration) {
        self.master.set_value(value);
        self.ramp_master(target, duration);
    }

    /// Ramp master gain from its current value
    pub fn ramp_master(&mut self, target: f32, duration: Duration) {
        let frames = self.frames_for(duration);
        self.master.linear_ramp(target, self.frame, frames);
    }

    pub fn noise_bus(&self) -> &GainParam {
        &self.noise_bus
    }

    pub fn snippet_gain(&self) -> &GainParam {
        &self.snippet_gain
    }

    pub fn dry_gain(&self) -> &GainParam {
        &self.dry
    }

    pub fn wet_gain(&self) -> &GainParam {
        &self.wet
    }

    pub fn tone_hz(&self) -> f32 {
        self.lowpass.cutoff_hz()
    }

    /// Start a looped noise source, crossfading from the current one
    ///
    /// The new source ramps 0 to 1 over `fade`; every other source ramps to 0
    /// over the same window and stops at its end.
    pub fn crossfade_noise(
        &mut self,
        buffer: Arc<DecodedAudio>,
        fade: Duration,
        curve: FadeCurve,
    ) -> u64 {
        let now = self.frame;
        let frames = self.frames_for(fade);

        for voice in self.noise_voices.iter_mut().filter(|v| !v.is_finished(now)) {
            voice.fader.ramp_with(0.0, now, frames, curve);
            voice.stop_at(now + frames);
        }

        let id = self.next_voice_id;
        self.next_voice_id += 1;
        let mut voice = NoiseVoice::new(id, buffer, 0.0);
        voice.fader.ramp_with(1.0, now, frames, curve);
        self.noise_voices.push(voice);
        id
    }

    /// Stop every noise source after `delay`
    pub fn stop_noise_after(&mut self, delay: Duration) {
        let stop = self.frame + self.frames_for(delay);
        for voice in &mut self.noise_voices {
            voice.stop_at(stop);
        }
    }

    /// Noise sources still audible at the current frame
    pub fn active_noise_voices(&self) -> usize {
        self.noise_voices
            .iter()
            .filter(|v| !v.is_finished(self.frame))
            .count()
    }

    /// Sum of noise fader gains at `frame`
    pub fn noise_gain_at(&self, frame: u64) -> f32 {
        self.noise_voices.iter().map(|v| v.gain_at(frame)).sum()
    }

    /// Play an excerpt into the snippet input
    pub fn play_snippet(&mut self, buffer: Arc<DecodedAudio>, offset_secs: f64, duration_secs: f64) {
        self.snippet_voices
            .push(SnippetVoice::new(buffer, offset_secs, duration_secs));
    }

    pub fn active_snippet_voices(&self) -> usize {
        self.snippet_voices.iter().filter(|v| !v.is_finished()).count()
    }

    /// Render interleaved stereo frames and advance the clock
    pub fn render(&mut self, out: &mut [f32]) {
        for stereo in out.chunks_exact_mut(2) {
            let frame = self.next_frame();
            stereo[0] = frame.left;
            stereo[1] = frame.right;
        }
        self.prune();
    }

    #[inline]
    fn next_frame(&mut self) -> AudioFrame {
        let now = self.frame;

        let mut noise = AudioFrame::zero();
        for voice in &mut self.noise_voices {
            noise.add(&voice.next_frame(now));
        }
        let noise = noise.scaled(self.noise_bus.value_at(now));

        let mut snippets = AudioFrame::zero();
        for voice in &mut self.snippet_voices {
            snippets.add(&voice.next_frame());
        }
        let filtered = self
            .lowpass
            .process(snippets.scaled(self.snippet_gain.value_at(now)));
        let dry = filtered.scaled(self.dry.value_at(now));
        let wet = self.reverb.process(filtered).scaled(self.wet.value_at(now));

        let mut mix = noise;
        mix.add(&dry);
        mix.add(&wet);

        self.frame += 1;
        mix.scaled(self.master.value_at(now))
    }

    /// Drop finished sources and settled ramps
    fn prune(&mut self) {
        let now = self.frame;
        self.noise_voices.retain(|v| !v.is_finished(now));
        self.snippet_voices.retain(|v| !v.is_finished());
        for voice in &mut self.noise_voices {
            voice.fader.settle(now);
        }
        self.master.settle(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    fn graph() -> MixingGraph {
        let impulse = ImpulseResponse {
            channels: [vec![0.0; 16], vec![0.0; 16]],
            sample_rate: RATE,
        };
        MixingGraph::new(RATE, &impulse, &SessionConfig::default())
    }

    fn constant(value: f32, frames: usize) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio {
            samples: vec![value; frames * 2],
            sample_rate: RATE,
        })
    }

    fn advance(graph: &mut MixingGraph, duration: Duration) -> Vec<f32> {
        let frames = graph.frames_for(duration) as usize;
        let mut out = vec![0.0; frames * 2];
        graph.render(&mut out);
        out
    }

    #[test]
    fn test_master_starts_silent() {
        let mut graph = graph();
        graph.crossfade_noise(constant(0.5, 100), Duration::ZERO, FadeCurve::Linear);
        let out = advance(&mut graph, Duration::from_millis(10));
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.master().target(), 0.0);
    }

    #[test]
    fn test_master_ramp_follows_clock() {
        let mut graph = graph();
        graph.ramp_master_from(0.0, MASTER_PLAYING_GAIN, Duration::from_millis(1500));
        advance(&mut graph, Duration::from_millis(750));
        let mid = graph.master().value_at(graph.now_frame());
        assert!((mid - 0.45).abs() < 1e-3, "mid {}", mid);

        advance(&mut graph, Duration::from_millis(750));
        assert_eq!(graph.master().value_at(graph.now_frame()), MASTER_PLAYING_GAIN);
    }

    #[test]
    fn test_noise_reaches_output() {
        let mut graph = graph();
        graph.ramp_master_from(1.0, 1.0, Duration::ZERO);
        graph.crossfade_noise(constant(0.5, 100), Duration::ZERO, FadeCurve::Linear);
        let out = advance(&mut graph, Duration::from_millis(10));

        let expected = 0.5 * SessionConfig::default().noise_level;
        assert!((out[0] - expected).abs() < 1e-6);
        assert_eq!(graph.active_noise_voices(), 1);
    }

    #[test]
    fn test_crossfade_never_doubles() {
        let mut graph = graph();
        graph.crossfade_noise(constant(0.5, 100), Duration::ZERO, FadeCurve::Linear);
        advance(&mut graph, Duration::from_millis(100));

        let start = graph.now_frame();
        graph.crossfade_noise(constant(0.5, 100), Duration::from_millis(1500), FadeCurve::Linear);
        let fade_frames = graph.frames_for(Duration::from_millis(1500));

        for offset in (0..=fade_frames).step_by(100) {
            let total = graph.noise_gain_at(start + offset);
            assert!(total <= 1.0 + 1e-5, "combined gain {} at {}", total, offset);
        }
        let midpoint = graph.noise_gain_at(start + fade_frames / 2);
        assert!((midpoint - 1.0).abs() < 1e-3);

        advance(&mut graph, Duration::from_millis(1600));
        assert_eq!(graph.active_noise_voices(), 1);
    }

    #[test]
    fn test_stop_noise_after_delay() {
        let mut graph = graph();
        graph.crossfade_noise(constant(0.5, 100), Duration::ZERO, FadeCurve::Linear);
        graph.stop_noise_after(Duration::from_secs(2));

        advance(&mut graph, Duration::from_millis(1900));
        assert_eq!(graph.active_noise_voices(), 1);
        advance(&mut graph, Duration::from_millis(200));
        assert_eq!(graph.active_noise_voices(), 0);
    }

    #[test]
    fn test_snippet_plays_through_dry_path() {
        let mut graph = graph();
        graph.ramp_master_from(1.0, 1.0, Duration::ZERO);
        graph.play_snippet(constant(0.5, RATE as usize * 4), 1.0, 1.0);
        assert_eq!(graph.active_snippet_voices(), 1);

        let out = advance(&mut graph, Duration::from_millis(500));
        // Silent impulse: only the dry path contributes
        assert!(out.iter().any(|&s| s.abs() > 0.0));
        advance(&mut graph, Duration::from_millis(600));
        assert_eq!(graph.active_snippet_voices(), 0);
    }

    #[test]
    fn test_apply_config_is_live() {
        let mut graph = graph();
        let config = SessionConfig {
            tone_hz: 900.0,
            reverb_mix: 0.2,
            noise_level: 0.1,
            ..Default::default()
        };
        graph.apply_config(&config);
        assert_eq!(graph.tone_hz(), 900.0);
        assert!((graph.dry_gain().target() - 0.8).abs() < 1e-6);
        assert_eq!(graph.wet_gain().target(), 0.2);
        assert_eq!(graph.noise_bus().target(), 0.1);
        assert_eq!(graph.snippet_gain().target(), config.snippet_level);
    }
}
