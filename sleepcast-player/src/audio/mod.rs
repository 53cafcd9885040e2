//! Audio subsystem
//!
//! Fetching, decoding, resampling and caching of audio sources, and the
//! output device stream.

pub mod cache;
pub mod decoder;
pub mod fetch;
pub mod output;
pub mod resampler;
pub mod types;

pub use cache::DecodedAudioCache;
pub use decoder::{AudioDecoder, SymphoniaDecoder};
pub use fetch::{AudioFetcher, FetchedAudio, HttpAudioFetcher};
pub use output::AudioOutput;
pub use resampler::Resampler;
pub use types::{AudioFrame, DecodedAudio};
