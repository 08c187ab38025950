//! AutoMix Core - Automatic DJ engine
//!
//! Given a library of analyzed tracks (BPM, beat grid, Camelot key, MFCC,
//! chroma, energy curve), this crate selects a musically coherent sequence
//! and plays it back with seamless, beat-aligned transitions:
//!
//! - [`matcher::SimilarityCalculator`] — six-dimensional track distance
//! - [`matcher::PlaylistGenerator`] — seeded, rule-constrained selection
//! - [`matcher::TransitionPlanner`] — out/in points, stretch, EQ hints
//! - [`engine::AutoMixEngine`] — two-deck real-time playback with a strict
//!   audio-thread / control-thread split

pub mod types;
pub mod error;
pub mod music;
pub mod store;
pub mod decoder;
pub mod matcher;
pub mod timestretch;
pub mod engine;

pub use error::{EngineError, EngineResult};
pub use types::*;
