//! Six-dimensional track similarity
//!
//! Distance is a weighted blend of BPM, key, MFCC, energy, chroma, and
//! duration distances, normalized by the weights of the dimensions that
//! actually contributed (both tracks must carry usable values for a
//! dimension to count). `similarity = 1 / (1 + distance)`.

use serde::{Deserialize, Serialize};

use crate::music;
use crate::store::TrackRecord;

use super::playlist::PlaylistRules;

/// Length both energy curves are resampled to before comparison
const ENERGY_RESAMPLE_LEN: usize = 100;

/// Number of windows for the segmented energy comparison
const ENERGY_SEGMENTS: usize = 5;

/// Per-dimension weights for the similarity blend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub bpm: f32,
    pub key: f32,
    pub mfcc: f32,
    pub energy: f32,
    pub chroma: f32,
    pub duration: f32,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            bpm: 1.0,
            key: 1.0,
            mfcc: 0.5,
            energy: 0.3,
            chroma: 0.4,
            duration: 0.2,
        }
    }
}

impl SimilarityWeights {
    /// Preset tuned for electronic sets: tempo and key dominate
    pub fn electronic() -> Self {
        Self {
            bpm: 1.5,
            key: 1.2,
            mfcc: 0.3,
            energy: 0.5,
            chroma: 0.3,
            duration: 0.1,
        }
    }

    /// Preset tuned for ambient sets: texture and energy dominate
    pub fn ambient() -> Self {
        Self {
            bpm: 0.3,
            key: 0.8,
            mfcc: 0.8,
            energy: 1.0,
            chroma: 0.6,
            duration: 0.3,
        }
    }
}

/// BPM distance tolerating half- and double-time relationships
///
/// Takes the minimum of |1-r|, |2-r|, |0.5-r| for r = bpm1/bpm2, so a
/// 70 BPM track sits close to a 140 BPM one.
pub fn bpm_distance(bpm1: f32, bpm2: f32) -> f32 {
    if bpm1 <= 0.0 || bpm2 <= 0.0 {
        return 0.0;
    }

    let ratio = bpm1 / bpm2;
    let direct = (1.0 - ratio).abs();
    let double = (2.0 - ratio).abs();
    let half = (0.5 - ratio).abs();

    direct.min(double).min(half)
}

/// Cosine distance `1 - cos(θ)` clamped to [0, 1]
///
/// Returns 1 for mismatched lengths or zero-norm vectors.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    let cos = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    (1.0 - cos).clamp(0.0, 1.0)
}

/// Resample a curve to `len` points by linear interpolation
fn resample(curve: &[f32], len: usize) -> Vec<f32> {
    if curve.len() <= 1 {
        return vec![curve.first().copied().unwrap_or(0.0); len];
    }

    (0..len)
        .map(|i| {
            let src = i as f32 * (curve.len() - 1) as f32 / (len - 1) as f32;
            let idx = src as usize;
            let next = (idx + 1).min(curve.len() - 1);
            let frac = src - idx as f32;
            curve[idx] * (1.0 - frac) + curve[next] * frac
        })
        .collect()
}

/// Segmented energy comparison over equal windows
///
/// Each window contributes `0.7·|μ₁-μ₂| + 0.3·|σ₁-σ₂|`; the mean over
/// windows is clamped to [0, 1].
fn segment_energy_distance(e1: &[f32], e2: &[f32], segments: usize) -> f32 {
    if e1.len() != e2.len() || e1.is_empty() || segments == 0 {
        return 0.0;
    }

    let len = e1.len();
    let seg_len = (len / segments).max(1);

    let mut total = 0.0f32;
    let mut count = 0usize;

    for s in 0..segments {
        let start = s * seg_len;
        let end = if s == segments - 1 { len } else { (s + 1) * seg_len };
        if start >= len {
            break;
        }

        let n = (end - start) as f32;
        let (mut sum1, mut sum2, mut sq1, mut sq2) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for i in start..end {
            sum1 += e1[i];
            sum2 += e2[i];
            sq1 += e1[i] * e1[i];
            sq2 += e2[i] * e2[i];
        }

        let mean1 = sum1 / n;
        let mean2 = sum2 / n;
        let var1 = (sq1 / n - mean1 * mean1).max(0.0);
        let var2 = (sq2 / n - mean2 * mean2).max(0.0);

        total += 0.7 * (mean1 - mean2).abs() + 0.3 * (var1.sqrt() - var2.sqrt()).abs();
        count += 1;
    }

    if count > 0 {
        (total / count as f32).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Energy curve distance: 60% global correlation, 40% segmented
pub fn energy_distance(energy1: &[f32], energy2: &[f32]) -> f32 {
    if energy1.is_empty() || energy2.is_empty() {
        return 0.0;
    }

    let e1 = resample(energy1, ENERGY_RESAMPLE_LEN);
    let e2 = resample(energy2, ENERGY_RESAMPLE_LEN);

    // Global shape via Pearson correlation
    let n = ENERGY_RESAMPLE_LEN as f32;
    let mean1 = e1.iter().sum::<f32>() / n;
    let mean2 = e2.iter().sum::<f32>() / n;

    let (mut num, mut var1, mut var2) = (0.0f32, 0.0f32, 0.0f32);
    for i in 0..ENERGY_RESAMPLE_LEN {
        let d1 = e1[i] - mean1;
        let d2 = e2[i] - mean2;
        num += d1 * d2;
        var1 += d1 * d1;
        var2 += d2 * d2;
    }

    let denom = (var1 * var2).sqrt();
    let correlation = if denom > 1e-10 { num / denom } else { 0.0 };
    let global = (1.0 - correlation) / 2.0;

    let segmented = segment_energy_distance(&e1, &e2, ENERGY_SEGMENTS);

    (0.6 * global + 0.4 * segmented).clamp(0.0, 1.0)
}

/// Duration distance `1 - min/max`, clamped to [0, 1]
fn duration_distance(dur1: f32, dur2: f32) -> f32 {
    if dur1 <= 0.0 || dur2 <= 0.0 {
        return 0.0;
    }
    (1.0 - dur1.min(dur2) / dur1.max(dur2)).clamp(0.0, 1.0)
}

/// Weighted multi-dimensional track distance and compatibility checks
#[derive(Debug, Clone, Default)]
pub struct SimilarityCalculator {
    weights: SimilarityWeights,
}

impl SimilarityCalculator {
    /// Create a calculator with the given weights
    pub fn new(weights: SimilarityWeights) -> Self {
        Self { weights }
    }

    /// Replace the weights
    pub fn set_weights(&mut self, weights: SimilarityWeights) {
        self.weights = weights;
    }

    /// Weighted distance between two tracks
    ///
    /// Dimensions where either track lacks usable data are skipped and
    /// their weight excluded from normalization, so incomplete analysis
    /// degrades gracefully rather than failing.
    pub fn distance(&self, a: &TrackRecord, b: &TrackRecord) -> f32 {
        let w = &self.weights;
        let mut d = 0.0f32;
        let mut total_weight = 0.0f32;

        if w.bpm > 0.0 && a.bpm > 0.0 && b.bpm > 0.0 {
            d += w.bpm * bpm_distance(a.bpm, b.bpm);
            total_weight += w.bpm;
        }

        if w.key > 0.0 && !a.key.is_empty() && !b.key.is_empty() {
            d += w.key * (music::camelot_distance(&a.key, &b.key) as f32 / 6.0);
            total_weight += w.key;
        }

        if w.mfcc > 0.0 && a.has_valid_mfcc() && b.has_valid_mfcc() {
            d += w.mfcc * cosine_distance(&a.mfcc, &b.mfcc);
            total_weight += w.mfcc;
        }

        if w.energy > 0.0 && !a.energy_curve.is_empty() && !b.energy_curve.is_empty() {
            d += w.energy * energy_distance(&a.energy_curve, &b.energy_curve);
            total_weight += w.energy;
        }

        if w.chroma > 0.0 && a.has_valid_chroma() && b.has_valid_chroma() {
            d += w.chroma * cosine_distance(&a.chroma, &b.chroma);
            total_weight += w.chroma;
        }

        if w.duration > 0.0 && a.duration > 0.0 && b.duration > 0.0 {
            d += w.duration * duration_distance(a.duration, b.duration);
            total_weight += w.duration;
        }

        if total_weight > 0.0 {
            d / total_weight
        } else {
            0.0
        }
    }

    /// Similarity in (0, 1]: `1 / (1 + distance)`
    pub fn similarity(&self, a: &TrackRecord, b: &TrackRecord) -> f32 {
        1.0 / (1.0 + self.distance(a, b))
    }

    /// Rank candidates by ascending distance to the target
    ///
    /// The target itself is excluded; at most `count` results are
    /// returned.
    pub fn find_similar(
        &self,
        target: &TrackRecord,
        candidates: &[TrackRecord],
        count: usize,
    ) -> Vec<(TrackRecord, f32)> {
        let mut results: Vec<(TrackRecord, f32)> = candidates
            .iter()
            .filter(|c| c.id != target.id)
            .map(|c| (c.clone(), self.distance(target, c)))
            .collect();

        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(count);
        results
    }

    /// Hard compatibility gate used by the playlist generator
    ///
    /// A rule with a zero/unset value places no restriction.
    pub fn are_compatible(&self, a: &TrackRecord, b: &TrackRecord, rules: &PlaylistRules) -> bool {
        if rules.bpm_tolerance > 0.0
            && a.bpm > 0.0
            && b.bpm > 0.0
            && bpm_distance(a.bpm, b.bpm) > rules.bpm_tolerance
        {
            return false;
        }

        if !a.key.is_empty() && !b.key.is_empty() {
            let key_dist = music::camelot_distance(&a.key, &b.key);
            if !rules.allow_key_change {
                if key_dist > 0 {
                    return false;
                }
            } else if rules.max_key_distance > 0 && key_dist > rules.max_key_distance {
                return false;
            }
        }

        if rules.min_energy_match > 0.0
            && !a.energy_curve.is_empty()
            && !b.energy_curve.is_empty()
        {
            let energy_sim = 1.0 - energy_distance(&a.energy_curve, &b.energy_curve);
            if energy_sim < rules.min_energy_match {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CHROMA_LEN, MFCC_LEN};

    fn track(id: i64, bpm: f32, key: &str) -> TrackRecord {
        TrackRecord {
            id,
            path: format!("/music/{}.wav", id),
            bpm,
            key: key.to_string(),
            mfcc: (0..MFCC_LEN).map(|i| (i as f32 * 0.3).sin()).collect(),
            chroma: vec![1.0 / CHROMA_LEN as f32; CHROMA_LEN],
            energy_curve: (0..50).map(|i| 0.3 + 0.4 * (i as f32 / 49.0)).collect(),
            duration: 240.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        let calc = SimilarityCalculator::default();
        let a = track(1, 128.0, "8A");
        assert!((calc.similarity(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_similarity_bounds() {
        let calc = SimilarityCalculator::default();
        let a = track(1, 128.0, "8A");
        let b = track(2, 80.0, "2B");
        let sim = calc.similarity(&a, &b);
        assert!(sim > 0.0 && sim <= 1.0);
    }

    #[test]
    fn test_bpm_distance_half_double_time() {
        // 70 vs 140 is half time, not a huge jump
        assert!(bpm_distance(70.0, 140.0) < 0.01);
        assert!(bpm_distance(140.0, 70.0) < 0.01);
        // 128 vs 130 is a small stretch
        assert!(bpm_distance(128.0, 130.0) < 0.02);
        // Unknown BPM contributes nothing
        assert_eq!(bpm_distance(0.0, 120.0), 0.0);
    }

    #[test]
    fn test_closer_bpm_means_smaller_distance() {
        let calc = SimilarityCalculator::default();
        let a = track(1, 128.0, "8A");
        let near = track(2, 126.0, "8A");
        let far = track(3, 100.0, "8A");
        assert!(calc.distance(&a, &near) < calc.distance(&a, &far));
    }

    #[test]
    fn test_invalid_mfcc_dimension_is_skipped() {
        let calc = SimilarityCalculator::default();
        let a = track(1, 128.0, "8A");
        let mut b = track(2, 128.0, "8A");
        b.mfcc = vec![0.0; 4]; // malformed analysis

        // Distance must still compute from the remaining dimensions
        let d = calc.distance(&a, &b);
        assert!(d.is_finite());
        assert!(d >= 0.0);
    }

    #[test]
    fn test_zero_norm_vectors_are_max_distance() {
        assert_eq!(cosine_distance(&[0.0; 4], &[1.0, 0.0, 0.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), 1.0);
    }

    #[test]
    fn test_energy_distance_identical_curves() {
        let curve: Vec<f32> = (0..80).map(|i| (i as f32 / 10.0).sin().abs()).collect();
        let d = energy_distance(&curve, &curve);
        assert!(d < 1e-3, "identical curves should be near zero: {}", d);
    }

    #[test]
    fn test_energy_distance_opposed_curves() {
        let rising: Vec<f32> = (0..100).map(|i| i as f32 / 99.0).collect();
        let falling: Vec<f32> = (0..100).map(|i| 1.0 - i as f32 / 99.0).collect();
        let d = energy_distance(&rising, &falling);
        assert!(d > 0.5, "opposed curves should be distant: {}", d);
    }

    #[test]
    fn test_find_similar_excludes_self_and_sorts() {
        let calc = SimilarityCalculator::default();
        let target = track(1, 128.0, "8A");
        let candidates = vec![
            target.clone(),
            track(2, 129.0, "8A"),
            track(3, 90.0, "3B"),
            track(4, 127.0, "8A"),
        ];

        let results = calc.find_similar(&target, &candidates, 10);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(t, _)| t.id != 1));
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn test_compatibility_bpm_gate() {
        let calc = SimilarityCalculator::default();
        let rules = PlaylistRules {
            bpm_tolerance: 0.05,
            ..Default::default()
        };

        let a = track(1, 128.0, "8A");
        let close = track(2, 130.0, "8A");
        let far = track(3, 150.0, "8A");

        assert!(calc.are_compatible(&a, &close, &rules));
        assert!(!calc.are_compatible(&a, &far, &rules));
    }

    #[test]
    fn test_compatibility_key_gates() {
        let calc = SimilarityCalculator::default();
        let a = track(1, 128.0, "8A");
        let adjacent = track(2, 128.0, "9A");
        let distant = track(3, 128.0, "2A");

        let strict = PlaylistRules {
            allow_key_change: false,
            ..Default::default()
        };
        assert!(!calc.are_compatible(&a, &adjacent, &strict));

        let bounded = PlaylistRules {
            allow_key_change: true,
            max_key_distance: 2,
            ..Default::default()
        };
        assert!(calc.are_compatible(&a, &adjacent, &bounded));
        assert!(!calc.are_compatible(&a, &distant, &bounded));
    }

    #[test]
    fn test_compatibility_energy_gate() {
        let calc = SimilarityCalculator::default();
        let mut a = track(1, 128.0, "8A");
        let mut b = track(2, 128.0, "8A");
        a.energy_curve = (0..100).map(|i| i as f32 / 99.0).collect();
        b.energy_curve = (0..100).map(|i| 1.0 - i as f32 / 99.0).collect();

        let rules = PlaylistRules {
            min_energy_match: 0.8,
            ..Default::default()
        };
        assert!(!calc.are_compatible(&a, &b, &rules));

        let loose = PlaylistRules::default();
        assert!(calc.are_compatible(&a, &b, &loose));
    }
}
