//! Track matching: similarity, transition planning, playlist generation
//!
//! The offline half of the engine. [`SimilarityCalculator`] judges how
//! mixable two analyzed tracks are, [`TransitionPlanner`] decides where and
//! how to blend a pair, and [`PlaylistGenerator`] strings tracks into an
//! ordered set shaped by an energy arc.

mod similarity;
mod transition;
mod playlist;

pub use similarity::{SimilarityCalculator, SimilarityWeights};
pub use transition::{
    EqTransitionHint, TransitionConfig, TransitionPlan, TransitionPlanner, TransitionPoint,
};
pub use playlist::{EnergyArc, Playlist, PlaylistEntry, PlaylistGenerator, PlaylistRules};
