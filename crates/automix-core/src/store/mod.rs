//! Track store contract
//!
//! Analyzed track records and the lookup interface the engine consumes.
//! Persistent storage is a host concern; the engine only needs
//! lookup-by-id, list-all, and substring search. [`MemoryTrackStore`]
//! provides the in-process implementation used by tests and embedders that
//! manage persistence themselves.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{EngineError, EngineResult};

/// Expected MFCC vector length
pub const MFCC_LEN: usize = 13;

/// Expected chroma vector length
pub const CHROMA_LEN: usize = 12;

/// An analyzed track record (immutable once analyzed)
///
/// Produced by an external feature extractor; the engine treats every
/// field as read-only. Feature vectors with invalid lengths do not make a
/// record unusable — the affected similarity dimension is skipped instead.
#[derive(Debug, Clone, Default)]
pub struct TrackRecord {
    /// Stable store id
    pub id: i64,
    /// Source file path
    pub path: String,
    /// Detected tempo in beats per minute (> 0 when known)
    pub bpm: f32,
    /// Beat times in seconds, strictly increasing
    pub beats: Vec<f32>,
    /// Camelot key notation, e.g. "8A" (empty when unknown)
    pub key: String,
    /// 13-dimensional MFCC mean vector
    pub mfcc: Vec<f32>,
    /// 12-dimensional chroma vector
    pub chroma: Vec<f32>,
    /// Normalized energy over time on a uniform grid spanning the track
    pub energy_curve: Vec<f32>,
    /// Total duration in seconds
    pub duration: f32,
}

impl TrackRecord {
    /// Whether the MFCC vector has the expected length
    pub fn has_valid_mfcc(&self) -> bool {
        self.mfcc.len() == MFCC_LEN
    }

    /// Whether the chroma vector has the expected length
    pub fn has_valid_chroma(&self) -> bool {
        self.chroma.len() == CHROMA_LEN
    }

    /// Mean of the energy curve, or 0.5 when no curve is present
    pub fn mean_energy(&self) -> f32 {
        if self.energy_curve.is_empty() {
            return 0.5;
        }
        self.energy_curve.iter().sum::<f32>() / self.energy_curve.len() as f32
    }

    /// Check feature vectors, reporting the first malformed dimension
    ///
    /// Callers that want strict records can surface this; the similarity
    /// calculator does not require it.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.mfcc.is_empty() && !self.has_valid_mfcc() {
            return Err(EngineError::AnalysisIncomplete(format!(
                "track {}: mfcc length {} (expected {})",
                self.id,
                self.mfcc.len(),
                MFCC_LEN
            )));
        }
        if !self.chroma.is_empty() && !self.has_valid_chroma() {
            return Err(EngineError::AnalysisIncomplete(format!(
                "track {}: chroma length {} (expected {})",
                self.id,
                self.chroma.len(),
                CHROMA_LEN
            )));
        }
        Ok(())
    }
}

/// Lookup interface over the track library
///
/// Implementations must be callable from the control thread while playback
/// runs; the engine never calls the store from the audio thread.
pub trait TrackStore: Send + Sync {
    /// Fetch a single record by id
    fn get_track(&self, id: i64) -> Option<TrackRecord>;

    /// List every analyzed record
    fn all_tracks(&self) -> Vec<TrackRecord>;

    /// Case-insensitive substring search over paths
    fn search(&self, pattern: &str) -> Vec<TrackRecord>;

    /// Number of records
    fn track_count(&self) -> usize {
        self.all_tracks().len()
    }
}

/// In-memory track store
///
/// Backs tests and hosts that keep their own persistence. Records are
/// shared by value, so readers never observe partial updates.
#[derive(Default)]
pub struct MemoryTrackStore {
    tracks: RwLock<HashMap<i64, TrackRecord>>,
}

impl MemoryTrackStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record keyed by its id
    pub fn insert(&self, track: TrackRecord) {
        self.tracks.write().unwrap().insert(track.id, track);
    }

    /// Remove a record, returning it if present
    pub fn remove(&self, id: i64) -> Option<TrackRecord> {
        self.tracks.write().unwrap().remove(&id)
    }
}

impl TrackStore for MemoryTrackStore {
    fn get_track(&self, id: i64) -> Option<TrackRecord> {
        self.tracks.read().unwrap().get(&id).cloned()
    }

    fn all_tracks(&self) -> Vec<TrackRecord> {
        let mut tracks: Vec<TrackRecord> =
            self.tracks.read().unwrap().values().cloned().collect();
        // Stable iteration order for reproducible playlist generation
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    fn search(&self, pattern: &str) -> Vec<TrackRecord> {
        let needle = pattern.to_lowercase();
        let mut tracks: Vec<TrackRecord> = self
            .tracks
            .read()
            .unwrap()
            .values()
            .filter(|t| t.path.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    fn track_count(&self) -> usize {
        self.tracks.read().unwrap().len()
    }
}
