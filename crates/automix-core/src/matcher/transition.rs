//! Transition point selection
//!
//! Decides, for each adjacent pair in a playlist, where the outgoing track
//! hands over (out-point), where the incoming track enters (in-point), how
//! much time-stretch and pitch shift to apply, which EQ moves to hint, and
//! how long the crossfade runs. Candidates are scored against the beat
//! grid, phrase boundaries, and the energy curve; lower scores win.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::music;
use crate::store::TrackRecord;

/// Uniform samples laid across each search window
const SEARCH_SAMPLES: usize = 40;

/// Beats per bar assumed for phrase boundaries
const BEATS_PER_BAR: usize = 4;

/// Phrase lengths in bars whose boundaries anchor transitions
const PHRASE_BARS: [usize; 2] = [8, 16];

/// A beat-aligned position within a track
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransitionPoint {
    /// Position in seconds
    pub time_seconds: f32,
    /// Index into the track's beat list (-1 when the track has no beats)
    pub beat_index: i32,
    /// Interpolated energy at this position
    pub energy: f32,
}

/// EQ automation hints for an EQ-swap transition
///
/// All phase positions are fractions of transition progress in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqTransitionHint {
    /// Whether the transition should swap bass between decks
    pub use_eq_swap: bool,
    /// When the outgoing low band starts ducking
    pub low_cut_start: f32,
    /// When the outgoing low band is fully cut
    pub low_cut_end: f32,
    /// When the incoming low band starts restoring
    pub low_restore_start: f32,
    /// When the incoming low band is fully restored
    pub low_restore_end: f32,
}

impl Default for EqTransitionHint {
    fn default() -> Self {
        Self {
            use_eq_swap: false,
            low_cut_start: 0.0,
            low_cut_end: 0.5,
            low_restore_start: 0.5,
            low_restore_end: 1.0,
        }
    }
}

/// Configuration for transition planning and playback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Crossfade length in beats
    pub crossfade_beats: f32,
    /// Select the EQ-swap crossfader curve for every transition
    pub use_eq_swap: bool,
    /// Maximum fractional time-stretch (0.06 = ±6%)
    pub stretch_limit: f32,
    /// Shortest allowed transition in seconds
    pub min_transition_seconds: f32,
    /// Longest allowed transition in seconds
    pub max_transition_seconds: f32,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            crossfade_beats: 16.0,
            use_eq_swap: false,
            stretch_limit: 0.06,
            min_transition_seconds: 4.0,
            max_transition_seconds: 32.0,
        }
    }
}

impl TransitionConfig {
    /// Reject impossible configurations
    pub fn validate(&self) -> EngineResult<()> {
        if self.min_transition_seconds >= self.max_transition_seconds {
            return Err(EngineError::InvalidArgument(format!(
                "min_transition_seconds ({}) must be below max_transition_seconds ({})",
                self.min_transition_seconds, self.max_transition_seconds
            )));
        }
        if self.crossfade_beats <= 0.0 {
            return Err(EngineError::InvalidArgument(
                "crossfade_beats must be positive".into(),
            ));
        }
        if self.stretch_limit < 0.0 {
            return Err(EngineError::InvalidArgument(
                "stretch_limit must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// A fully planned transition between two tracks
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub from_track_id: i64,
    pub to_track_id: i64,
    /// Where the outgoing track starts fading
    pub out_point: TransitionPoint,
    /// Where the incoming track enters
    pub in_point: TransitionPoint,
    /// Stretch applied to the incoming track (1.0 = none)
    pub stretch_ratio: f32,
    /// Pitch shift metadata in semitones; never auto-applied during playback
    pub pitch_shift_semitones: i8,
    /// Crossfade length in seconds
    pub crossfade_duration: f32,
    /// EQ automation hints
    pub eq_hint: EqTransitionHint,
}

/// Plans transitions between analyzed tracks
#[derive(Debug, Clone, Default)]
pub struct TransitionPlanner;

impl TransitionPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Pick the point where the outgoing track should hand over
    ///
    /// Searches `[duration - max_transition, duration - min_transition]`,
    /// preferring low, falling energy on a phrase boundary near 16 seconds
    /// before the end. Falls back to 70% of the duration for tracks too
    /// short to hold the window.
    pub fn find_out_point(&self, track: &TrackRecord, config: &TransitionConfig) -> TransitionPoint {
        if track.duration <= 0.0 {
            return TransitionPoint::default();
        }

        let search_start = (track.duration - config.max_transition_seconds).max(0.0);
        let search_end = (track.duration - config.min_transition_seconds).max(0.0);

        if search_start >= search_end {
            // Track too short for the window
            let t = track.duration * 0.7;
            return self.point_at(track, t);
        }

        let boundaries = phrase_boundaries(&track.beats);
        let default_out = (track.duration - 16.0).max(0.0);

        let score = |t: f32, energy: f32| {
            let align = phrase_alignment(&boundaries, t);
            let trend = energy_trend(track, t);
            0.35 * energy
                + 0.30 * align
                + 0.15 * (t - default_out).abs() / track.duration
                + 0.20 * ((trend + 1.0) / 2.0)
        };

        self.search_window(track, search_start, search_end, &boundaries, score)
            .unwrap_or_else(|| self.point_at(track, default_out))
    }

    /// Pick the point where the incoming track should enter
    ///
    /// Searches `[min_transition, min(duration, max_transition)]`,
    /// preferring low but rising energy on a phrase boundary.
    pub fn find_in_point(&self, track: &TrackRecord, config: &TransitionConfig) -> TransitionPoint {
        if track.duration <= 0.0 {
            return TransitionPoint::default();
        }

        let search_start = config.min_transition_seconds;
        let search_end = track.duration.min(config.max_transition_seconds);

        if search_start >= search_end {
            return self.point_at(track, 0.0);
        }

        let boundaries = phrase_boundaries(&track.beats);

        let score = |t: f32, energy: f32| {
            let align = phrase_alignment(&boundaries, t);
            let trend = energy_trend(track, t);
            0.35 * energy + 0.35 * align + 0.30 * ((-trend + 1.0) / 2.0)
        };

        self.search_window(track, search_start, search_end, &boundaries, score)
            .unwrap_or_else(|| self.point_at(track, search_start))
    }

    /// Build a full plan for the pair `from -> to`
    pub fn create_plan(
        &self,
        from: &TrackRecord,
        to: &TrackRecord,
        config: &TransitionConfig,
    ) -> TransitionPlan {
        let out_point = self.find_out_point(from, config);
        let in_point = self.find_in_point(to, config);

        let stretch_ratio = if from.bpm > 0.0 && to.bpm > 0.0 {
            bounded_stretch_ratio(from.bpm, to.bpm, config.stretch_limit)
        } else {
            1.0
        };

        let pitch_shift_semitones = pitch_shift(from, to);
        let crossfade_duration = crossfade_duration(from.bpm, to.bpm, config);
        let eq_hint = eq_hint(config, &out_point, &in_point);

        TransitionPlan {
            from_track_id: from.id,
            to_track_id: to.id,
            out_point,
            in_point,
            stretch_ratio,
            pitch_shift_semitones,
            crossfade_duration,
            eq_hint,
        }
    }

    /// Score beat-snapped candidates across a window; lower score wins
    fn search_window<F>(
        &self,
        track: &TrackRecord,
        start: f32,
        end: f32,
        boundaries: &[f32],
        score: F,
    ) -> Option<TransitionPoint>
    where
        F: Fn(f32, f32) -> f32,
    {
        let mut best: Option<(f32, TransitionPoint)> = None;

        let uniform = (0..SEARCH_SAMPLES)
            .map(|i| start + (end - start) * i as f32 / (SEARCH_SAMPLES - 1) as f32);
        let anchors = boundaries
            .iter()
            .copied()
            .filter(|&b| b >= start && b <= end);

        for candidate in uniform.chain(anchors) {
            let mut t = candidate;
            let mut beat_index = -1i32;

            if let Some(idx) = closest_beat(&track.beats, t) {
                t = track.beats[idx];
                beat_index = idx as i32;
                // Snapping may pull the candidate outside the window
                if t < start || t > end {
                    continue;
                }
            }

            let energy = energy_at(&track.energy_curve, t, track.duration);
            let s = score(t, energy);

            if best.as_ref().map_or(true, |(b, _)| s < *b) {
                best = Some((
                    s,
                    TransitionPoint {
                        time_seconds: t,
                        beat_index,
                        energy,
                    },
                ));
            }
        }

        best.map(|(_, p)| p)
    }

    /// Beat-snap and measure energy at an arbitrary time
    fn point_at(&self, track: &TrackRecord, t: f32) -> TransitionPoint {
        TransitionPoint {
            time_seconds: t,
            beat_index: closest_beat(&track.beats, t).map_or(-1, |i| i as i32),
            energy: energy_at(&track.energy_curve, t, track.duration),
        }
    }
}

/// Stretch ratio for matching `source_bpm` to `target_bpm`, folded through
/// half/double time and zeroed out beyond the configured limit
fn bounded_stretch_ratio(target_bpm: f32, source_bpm: f32, limit: f32) -> f32 {
    let mut ratio = target_bpm / source_bpm;

    if (1.0 - ratio).abs() < 0.01 {
        return 1.0;
    }

    if ratio > 1.5 {
        ratio /= 2.0;
    }
    if ratio < 0.67 {
        ratio *= 2.0;
    }

    if (1.0 - ratio).abs() > limit {
        1.0
    } else {
        ratio
    }
}

/// Pitch shift to reconcile nearby keys, or 0
///
/// Only considered when the keys sit close on the wheel
/// (0 < distance <= 2) and the semitone interval is small (|diff| <= 2).
/// The value is metadata for the plan; playback never applies it.
fn pitch_shift(from: &TrackRecord, to: &TrackRecord) -> i8 {
    if from.key.is_empty() || to.key.is_empty() {
        return 0;
    }

    let key_dist = music::camelot_distance(&from.key, &to.key);
    if key_dist == 0 || key_dist > 2 {
        return 0;
    }

    match music::semitone_interval(&to.key, &from.key) {
        Some(diff) if diff.abs() <= 2 => diff,
        _ => 0,
    }
}

/// Beat-derived crossfade length clamped to the configured range
fn crossfade_duration(from_bpm: f32, to_bpm: f32, config: &TransitionConfig) -> f32 {
    let avg_bpm = if from_bpm > 0.0 && to_bpm > 0.0 {
        (from_bpm + to_bpm) / 2.0
    } else {
        120.0
    };

    let duration = 60.0 / avg_bpm * config.crossfade_beats;
    duration.clamp(config.min_transition_seconds, config.max_transition_seconds)
}

/// EQ hint with phases adapted to the measured transition energy
fn eq_hint(
    config: &TransitionConfig,
    out_point: &TransitionPoint,
    in_point: &TransitionPoint,
) -> EqTransitionHint {
    let mut hint = EqTransitionHint {
        use_eq_swap: config.use_eq_swap,
        ..Default::default()
    };

    // A hot outro needs the bass out of the way sooner
    if out_point.energy > 0.7 {
        hint.low_cut_end = 0.4;
    }

    // A sparse intro can wait before taking over the low end
    if in_point.energy < 0.3 {
        hint.low_restore_start = 0.6;
    }

    hint
}

/// Phrase boundary times: every 8 and 16 bars of the beat grid, merged
fn phrase_boundaries(beats: &[f32]) -> Vec<f32> {
    let mut boundaries: Vec<f32> = Vec::new();

    for bars in PHRASE_BARS {
        let step = bars * BEATS_PER_BAR;
        for time in beats.iter().step_by(step) {
            boundaries.push(*time);
        }
    }

    boundaries.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    boundaries.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
    boundaries
}

/// Alignment score: 0 on a boundary, 1 at 2 seconds or further away
fn phrase_alignment(boundaries: &[f32], t: f32) -> f32 {
    let min_dist = boundaries
        .iter()
        .map(|b| (b - t).abs())
        .fold(f32::INFINITY, f32::min);

    if min_dist.is_finite() {
        (min_dist / 2.0).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Interpolated energy at time `t` (0.5 when no curve exists)
fn energy_at(energy_curve: &[f32], t: f32, duration: f32) -> f32 {
    if energy_curve.is_empty() || duration <= 0.0 {
        return 0.5;
    }

    let normalized = (t / duration).clamp(0.0, 1.0);
    let index_f = normalized * (energy_curve.len() - 1) as f32;
    let index = index_f as usize;

    if index >= energy_curve.len() - 1 {
        return *energy_curve.last().unwrap();
    }

    let frac = index_f - index as f32;
    energy_curve[index] * (1.0 - frac) + energy_curve[index + 1] * frac
}

/// Energy slope around `t`: energy(t+1s) - energy(t-1s), clamped to [-1, 1]
fn energy_trend(track: &TrackRecord, t: f32) -> f32 {
    let after = energy_at(&track.energy_curve, t + 1.0, track.duration);
    let before = energy_at(&track.energy_curve, t - 1.0, track.duration);
    (after - before).clamp(-1.0, 1.0)
}

/// Index of the beat nearest to `time`
fn closest_beat(beats: &[f32], time: f32) -> Option<usize> {
    if beats.is_empty() {
        return None;
    }

    let idx = beats.partition_point(|&b| b < time);

    if idx == beats.len() {
        return Some(beats.len() - 1);
    }
    if idx == 0 {
        return Some(0);
    }

    if (beats[idx] - time).abs() < (beats[idx - 1] - time).abs() {
        Some(idx)
    } else {
        Some(idx - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Track with beats on a regular grid and a flat-ish energy curve
    fn gridded_track(id: i64, bpm: f32, key: &str, duration: f32, beat_interval: f32) -> TrackRecord {
        let beat_count = (duration / beat_interval) as usize;
        TrackRecord {
            id,
            path: format!("/music/{}.wav", id),
            bpm,
            key: key.to_string(),
            beats: (0..beat_count).map(|i| i as f32 * beat_interval).collect(),
            energy_curve: (0..200)
                .map(|i| 0.5 + 0.1 * (i as f32 * 0.1).sin())
                .collect(),
            duration,
            ..Default::default()
        }
    }

    #[test]
    fn test_closest_beat() {
        let beats = [0.0, 0.5, 1.0, 1.5];
        assert_eq!(closest_beat(&beats, 0.6), Some(1));
        assert_eq!(closest_beat(&beats, 0.8), Some(2));
        assert_eq!(closest_beat(&beats, -1.0), Some(0));
        assert_eq!(closest_beat(&beats, 99.0), Some(3));
        assert_eq!(closest_beat(&[], 1.0), None);
    }

    #[test]
    fn test_energy_at_interpolates() {
        let curve = [0.0, 1.0];
        assert!((energy_at(&curve, 5.0, 10.0) - 0.5).abs() < 1e-6);
        assert_eq!(energy_at(&curve, 0.0, 10.0), 0.0);
        assert_eq!(energy_at(&curve, 10.0, 10.0), 1.0);
        assert_eq!(energy_at(&[], 5.0, 10.0), 0.5);
    }

    #[test]
    fn test_phrase_boundaries_union() {
        let beats: Vec<f32> = (0..128).map(|i| i as f32 * 0.5).collect();
        let boundaries = phrase_boundaries(&beats);

        // 8-bar spacing = every 32 beats: 0, 16s, 32s, 48s
        // 16-bar spacing = every 64 beats: 0, 32s — subset, deduped
        assert_eq!(boundaries, vec![0.0, 16.0, 32.0, 48.0]);
    }

    #[test]
    fn test_phrase_alignment_scores() {
        let boundaries = [16.0, 32.0];
        assert_eq!(phrase_alignment(&boundaries, 16.0), 0.0);
        assert!((phrase_alignment(&boundaries, 17.0) - 0.5).abs() < 1e-6);
        assert_eq!(phrase_alignment(&boundaries, 24.0), 1.0);
        assert_eq!(phrase_alignment(&[], 5.0), 1.0);
    }

    #[test]
    fn test_out_point_within_window() {
        let config = TransitionConfig::default();
        let track = gridded_track(1, 120.0, "8A", 240.0, 0.5);

        let point = TransitionPlanner::new().find_out_point(&track, &config);
        assert!(point.time_seconds >= 240.0 - config.max_transition_seconds);
        assert!(point.time_seconds <= 240.0 - config.min_transition_seconds);
        assert!(point.beat_index >= 0);
        // Beat index must actually reference the snapped time
        assert!(
            (track.beats[point.beat_index as usize] - point.time_seconds).abs() < 1e-6
        );
    }

    #[test]
    fn test_out_point_short_track_fallback() {
        // 3 seconds is shorter than min_transition, so the search window
        // collapses and the planner falls back to 70% of the duration
        let config = TransitionConfig::default();
        let track = gridded_track(1, 120.0, "8A", 3.0, 0.5);

        let point = TransitionPlanner::new().find_out_point(&track, &config);
        assert!((point.time_seconds - 2.1).abs() <= 0.5);
    }

    #[test]
    fn test_in_point_within_window() {
        let config = TransitionConfig::default();
        let track = gridded_track(2, 120.0, "8A", 240.0, 0.5);

        let point = TransitionPlanner::new().find_in_point(&track, &config);
        assert!(point.time_seconds >= config.min_transition_seconds);
        assert!(point.time_seconds <= config.max_transition_seconds);
    }

    #[test]
    fn test_plan_matched_bpm() {
        // Same BPM, same key: crossfade ~8s at 120 BPM with 16 beats,
        // no stretch, no pitch shift
        let config = TransitionConfig::default();
        let from = gridded_track(1, 120.0, "8A", 240.0, 0.5);
        let to = gridded_track(2, 120.0, "8A", 240.0, 0.5);

        let plan = TransitionPlanner::new().create_plan(&from, &to, &config);
        assert!((plan.crossfade_duration - 8.0).abs() <= 0.5);
        assert_eq!(plan.stretch_ratio, 1.0);
        assert_eq!(plan.pitch_shift_semitones, 0);
        assert_eq!(plan.from_track_id, 1);
        assert_eq!(plan.to_track_id, 2);

        let out_idx = plan.out_point.beat_index;
        assert!(out_idx >= 0);
        let out_time = from.beats[out_idx as usize];
        assert!(out_time >= 240.0 - 32.0 && out_time <= 240.0 - 4.0);
    }

    #[test]
    fn test_stretch_within_limit_is_applied() {
        let ratio = bounded_stretch_ratio(128.0, 125.0, 0.06);
        assert!((ratio - 128.0 / 125.0).abs() < 1e-6);
    }

    #[test]
    fn test_stretch_beyond_limit_is_dropped() {
        // 128 -> 180 needs far more than 6%
        assert_eq!(bounded_stretch_ratio(128.0, 180.0, 0.06), 1.0);
    }

    #[test]
    fn test_stretch_folds_half_and_double_time() {
        // 140 target over 70 source is double time, folds to 1.0
        assert_eq!(bounded_stretch_ratio(140.0, 70.0, 0.06), 1.0);
        // 70 target over 140 source is half time, folds to 1.0
        assert_eq!(bounded_stretch_ratio(70.0, 140.0, 0.06), 1.0);
    }

    #[test]
    fn test_plan_stretch_ratio_invariant() {
        let config = TransitionConfig::default();
        let planner = TransitionPlanner::new();
        for to_bpm in [100.0f32, 120.0, 124.0, 128.0, 132.0, 160.0, 180.0] {
            let from = gridded_track(1, 128.0, "8A", 240.0, 60.0 / 128.0);
            let to = gridded_track(2, to_bpm, "8A", 240.0, 60.0 / to_bpm);
            let plan = planner.create_plan(&from, &to, &config);
            assert!(
                plan.stretch_ratio == 1.0
                    || (1.0 - plan.stretch_ratio).abs() <= config.stretch_limit,
                "bpm {}: ratio {}",
                to_bpm,
                plan.stretch_ratio
            );
            assert!(plan.crossfade_duration >= config.min_transition_seconds);
            assert!(plan.crossfade_duration <= config.max_transition_seconds);
        }
    }

    #[test]
    fn test_pitch_shift_only_for_near_keys() {
        let from = gridded_track(1, 128.0, "8A", 240.0, 0.5);

        // Same key: no shift
        let same = gridded_track(2, 128.0, "8A", 240.0, 0.5);
        assert_eq!(pitch_shift(&from, &same), 0);

        // 9A -> 8A is -5 semitones, too far to shift even though the
        // wheel distance is 1
        let adjacent = gridded_track(3, 128.0, "9A", 240.0, 0.5);
        assert_eq!(pitch_shift(&from, &adjacent), 0);

        // 3A (Bbm, root 10) -> 8A (Am, root 9): wheel distance 5, skipped
        let far = gridded_track(4, 128.0, "3A", 240.0, 0.5);
        assert_eq!(pitch_shift(&from, &far), 0);
    }

    #[test]
    fn test_pitch_shift_small_interval() {
        // 10A (Bm, root 11) -> 8A (Am, root 9): wheel distance 2,
        // interval -2 semitones applied to the incoming track
        let from = gridded_track(1, 128.0, "8A", 240.0, 0.5);
        let to = gridded_track(2, 128.0, "10A", 240.0, 0.5);
        assert_eq!(pitch_shift(&from, &to), -2);
    }

    #[test]
    fn test_eq_hint_energy_adjustments() {
        let config = TransitionConfig {
            use_eq_swap: true,
            ..Default::default()
        };

        let hot_out = TransitionPoint { energy: 0.9, ..Default::default() };
        let quiet_in = TransitionPoint { energy: 0.1, ..Default::default() };
        let hint = eq_hint(&config, &hot_out, &quiet_in);
        assert!(hint.use_eq_swap);
        assert_eq!(hint.low_cut_end, 0.4);
        assert_eq!(hint.low_restore_start, 0.6);

        let mild = TransitionPoint { energy: 0.5, ..Default::default() };
        let hint = eq_hint(&config, &mild, &mild);
        assert_eq!(hint.low_cut_end, 0.5);
        assert_eq!(hint.low_restore_start, 0.5);
    }

    #[test]
    fn test_config_validation() {
        assert!(TransitionConfig::default().validate().is_ok());

        let inverted = TransitionConfig {
            min_transition_seconds: 32.0,
            max_transition_seconds: 4.0,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_crossfade_duration_without_bpm() {
        let config = TransitionConfig::default();
        // Unknown BPM falls back to 120 -> 8 seconds for 16 beats
        assert!((crossfade_duration(0.0, 0.0, &config) - 8.0).abs() < 1e-6);
    }
}
