//! Engine error types

use thiserror::Error;

/// Errors originated or propagated by the engine core
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid caller input (empty path, impossible config, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Track id not present in the store
    #[error("Track not found: {0}")]
    TrackNotFound(i64),

    /// Decoder failed to produce audio for a track
    #[error("Failed to load track audio: {0}")]
    LoadFailed(String),

    /// Playback control call could not be honored
    #[error("Playback error: {0}")]
    PlaybackError(String),

    /// A feature vector has an invalid length; the dimension is skipped
    /// in similarity rather than failing the whole operation
    #[error("Analysis incomplete: {0}")]
    AnalysisIncomplete(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
