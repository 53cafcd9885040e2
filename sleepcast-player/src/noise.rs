//! Noise bed controller
//!
//! Resolves the ambient loop from a built-in generated preset, a configured
//! preset, a URL or a local file, and crossfades it into the mixing graph.
//! Resolution failures fall back to generated white noise.

use crate::audio::cache::DecodedAudioCache;
use crate::audio::types::DecodedAudio;
use crate::error::{Error, Result};
use crate::graph::MixingGraph;
use rand::rngs::StdRng;
use rand::Rng;
use sleepcast_common::FadeCurve;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Crossfade window between noise loops
pub const NOISE_CROSSFADE: Duration = Duration::from_millis(1500);

/// Length of generated noise loops
pub const GENERATED_NOISE_SECS: f32 = 2.0;

/// Procedurally generated noise colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

impl NoiseColor {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "white" => Some(NoiseColor::White),
            "pink" => Some(NoiseColor::Pink),
            "brown" | "brownian" | "red" => Some(NoiseColor::Brown),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NoiseColor::White => "white",
            NoiseColor::Pink => "pink",
            NoiseColor::Brown => "brown",
        }
    }

    /// Generate a mono loop duplicated to both channels
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, sample_rate: u32, secs: f32) -> DecodedAudio {
        let frames = (sample_rate as f32 * secs).round() as usize;
        let mut white = || rng.gen_range(-1.0f32..1.0);

        let mono: Vec<f32> = match self {
            NoiseColor::White => (0..frames).map(|_| white()).collect(),
            NoiseColor::Pink => {
                // Paul Kellet's refined pink filter
                let mut b = [0.0f32; 7];
                (0..frames)
                    .map(|_| {
                        let w = white();
                        b[0] = 0.99886 * b[0] + w * 0.0555179;
                        b[1] = 0.99332 * b[1] + w * 0.0750759;
                        b[2] = 0.96900 * b[2] + w * 0.1538520;
                        b[3] = 0.86650 * b[3] + w * 0.3104856;
                        b[4] = 0.55000 * b[4] + w * 0.5329522;
                        b[5] = -0.7616 * b[5] - w * 0.0168980;
                        let pink = b.iter().sum::<f32>() + w * 0.5362;
                        b[6] = w * 0.115926;
                        (pink * 0.11).clamp(-1.0, 1.0)
                    })
                    .collect()
            }
            NoiseColor::Brown => {
                let mut last = 0.0f32;
                (0..frames)
                    .map(|_| {
                        last = (last + 0.02 * white()) / 1.02;
                        (last * 3.5).clamp(-1.0, 1.0)
                    })
                    .collect()
            }
        };

        DecodedAudio::from_interleaved(mono, sample_rate, 1)
    }
}

/// Where a noise loop comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoiseSource {
    /// Built-in color or configured preset name
    Preset(String),
    Url(String),
    File(PathBuf),
}

impl NoiseSource {
    /// Interpret a user string: http(s) URLs, then existing paths, then presets
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if is_http_url(input) {
            NoiseSource::Url(input.to_string())
        } else if Path::new(input).exists() {
            NoiseSource::File(PathBuf::from(input))
        } else {
            NoiseSource::Preset(input.to_string())
        }
    }

    pub fn label(&self) -> String {
        match self {
            NoiseSource::Preset(name) => name.clone(),
            NoiseSource::Url(url) => url.clone(),
            NoiseSource::File(path) => path.display().to_string(),
        }
    }
}

impl Default for NoiseSource {
    fn default() -> Self {
        NoiseSource::Preset(NoiseColor::White.name().to_string())
    }
}

fn is_http_url(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A resolved noise loop
#[derive(Debug, Clone)]
pub struct NoiseLoop {
    pub label: String,
    pub buffer: Arc<DecodedAudio>,
    /// True when resolution failed and generated white noise was substituted
    pub fallback: bool,
}

/// Noise bed controller
pub struct NoiseBed {
    presets: BTreeMap<String, String>,
    curve: FadeCurve,
    sample_rate: u32,
    selected: Mutex<Option<NoiseLoop>>,
}

impl NoiseBed {
    /// # Arguments
    /// - `presets`: extra preset names mapping to URLs or file paths
    /// - `curve`: crossfade curve
    pub fn new(presets: BTreeMap<String, String>, curve: FadeCurve, sample_rate: u32) -> Self {
        Self {
            presets,
            curve,
            sample_rate,
            selected: Mutex::new(None),
        }
    }

    /// Names of every selectable preset
    pub fn preset_names(&self) -> Vec<String> {
        [NoiseColor::White, NoiseColor::Pink, NoiseColor::Brown]
            .iter()
            .map(|c| c.name().to_string())
            .chain(self.presets.keys().cloned())
            .collect()
    }

    /// Resolve `source` to a loop, falling back to generated white noise
    pub async fn load(
        &self,
        source: &NoiseSource,
        cache: &DecodedAudioCache,
        rng: &Mutex<StdRng>,
    ) -> NoiseLoop {
        match self.try_load(source, cache, rng).await {
            Ok(noise) => noise,
            Err(e) => {
                warn!("Noise source '{}' unavailable: {} - using generated noise", source.label(), e);
                NoiseLoop {
                    label: NoiseColor::White.name().to_string(),
                    buffer: Arc::new(self.generate(NoiseColor::White, rng)),
                    fallback: true,
                }
            }
        }
    }

    async fn try_load(
        &self,
        source: &NoiseSource,
        cache: &DecodedAudioCache,
        rng: &Mutex<StdRng>,
    ) -> Result<NoiseLoop> {
        let label = source.label();
        let buffer = match source {
            NoiseSource::Preset(name) => {
                if let Some(color) = NoiseColor::parse(name) {
                    Arc::new(self.generate(color, rng))
                } else {
                    let target = self.presets.get(name).ok_or_else(|| {
                        sleepcast_common::Error::NotFound(format!("Unknown noise preset: {}", name))
                    })?;
                    if is_http_url(target) {
                        cache.get(target).await?
                    } else {
                        cache.get_file(Path::new(target)).await?
                    }
                }
            }
            NoiseSource::Url(url) => cache.get(url).await?,
            NoiseSource::File(path) => cache.get_file(path).await?,
        };

        if buffer.is_empty() {
            return Err(Error::Decode(format!("Noise source '{}' is empty", label)));
        }
        Ok(NoiseLoop {
            label,
            buffer,
            fallback: false,
        })
    }

    /// Generated loop of the given color
    pub fn generate(&self, color: NoiseColor, rng: &Mutex<StdRng>) -> DecodedAudio {
        let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
        color.generate(&mut *rng, self.sample_rate, GENERATED_NOISE_SECS)
    }

    fn selected_slot(&self) -> MutexGuard<'_, Option<NoiseLoop>> {
        self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the loop used from now on
    pub fn select(&self, noise: NoiseLoop) {
        info!("Noise bed: {}", noise.label);
        *self.selected_slot() = Some(noise);
    }

    /// Forget any selected loop; the next start uses generated white noise
    pub fn reset(&self) {
        *self.selected_slot() = None;
    }

    pub fn selected(&self) -> Option<NoiseLoop> {
        self.selected_slot().clone()
    }

    /// Active label ("white" when nothing was selected)
    pub fn label(&self) -> String {
        self.selected_slot()
            .as_ref()
            .map(|n| n.label.clone())
            .unwrap_or_else(|| NoiseColor::White.name().to_string())
    }

    /// Crossfade the selected loop into the graph, generating white noise if none
    pub fn start(&self, graph: &mut MixingGraph, rng: &Mutex<StdRng>) {
        let mut selected = self.selected_slot();
        let noise = match selected.as_ref() {
            Some(noise) => noise.clone(),
            None => {
                let noise = NoiseLoop {
                    label: NoiseColor::White.name().to_string(),
                    buffer: Arc::new(self.generate(NoiseColor::White, rng)),
                    fallback: false,
                };
                *selected = Some(noise.clone());
                noise
            }
        };
        graph.crossfade_noise(noise.buffer, NOISE_CROSSFADE, self.curve);
    }

    /// Stop all noise sources after `delay`
    pub fn stop(&self, graph: &mut MixingGraph, delay: Duration) {
        graph.stop_noise_after(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rms(audio: &DecodedAudio) -> f32 {
        let sum: f32 = audio.samples.iter().map(|s| s * s).sum();
        (sum / audio.samples.len() as f32).sqrt()
    }

    #[test]
    fn test_generated_colors() {
        let mut rng = StdRng::seed_from_u64(3);
        for color in [NoiseColor::White, NoiseColor::Pink, NoiseColor::Brown] {
            let audio = color.generate(&mut rng, 8000, 2.0);
            assert_eq!(audio.frames(), 16000);
            assert!(audio.samples.iter().all(|s| s.abs() <= 1.0));
            assert!(rms(&audio) > 0.01, "{} is silent", color.name());
            // Mono duplicated to both channels
            assert_eq!(audio.samples[0], audio.samples[1]);
        }
    }

    #[test]
    fn test_color_parse() {
        assert_eq!(NoiseColor::parse("Pink"), Some(NoiseColor::Pink));
        assert_eq!(NoiseColor::parse("brownian"), Some(NoiseColor::Brown));
        assert_eq!(NoiseColor::parse("rain"), None);
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(
            NoiseSource::parse("https://example.com/rain.mp3"),
            NoiseSource::Url("https://example.com/rain.mp3".to_string())
        );
        assert_eq!(
            NoiseSource::parse("pink"),
            NoiseSource::Preset("pink".to_string())
        );
        assert_eq!(NoiseSource::default().label(), "white");

        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(
            NoiseSource::parse(file.path().to_str().unwrap()),
            NoiseSource::File(file.path().to_path_buf())
        );
    }

    #[test]
    fn test_preset_names_include_config() {
        let mut presets = BTreeMap::new();
        presets.insert("rain".to_string(), "https://example.com/rain.mp3".to_string());
        let bed = NoiseBed::new(presets, FadeCurve::Linear, 8000);
        assert_eq!(bed.preset_names(), vec!["white", "pink", "brown", "rain"]);
        assert_eq!(bed.label(), "white");
    }
}
