//! Real-time playback engine
//!
//! - [`Deck`]: single-track player with volume smoothing, EQ, time-stretch
//! - [`Crossfader`]: position automation and mix-parameter curves
//! - [`Scheduler`]: two-deck orchestration with the audio/control split
//! - [`AutoMixEngine`]: facade wiring the store, decoder, generator, and
//!   scheduler together

mod eq;
mod deck;
mod crossfader;
mod scheduler;
mod engine;

pub use eq::{BiquadCoeffs, BiquadState, ThreeBandEq};
pub use deck::Deck;
pub use crossfader::{Crossfader, CrossfaderCurve, MixParams};
pub use scheduler::{Scheduler, StatusCallback, TrackLoader};
pub use engine::AutoMixEngine;
