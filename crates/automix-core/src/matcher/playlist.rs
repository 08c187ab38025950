//! Playlist generation
//!
//! A seeded, rule-constrained stochastic search. Each step filters the
//! remaining pool through the hard compatibility gate, scores survivors on
//! similarity, energy-arc fit, BPM progression, and variety, then draws
//! from the top five with exponentially decaying weights. A transition
//! plan is attached to every adjacent pair as it is chosen.

use std::collections::{HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::store::TrackRecord;

use super::similarity::{bpm_distance, SimilarityCalculator, SimilarityWeights};
use super::transition::{TransitionConfig, TransitionPlan, TransitionPlanner};

/// How many recently played tracks feed the variety score
const RECENT_WINDOW: usize = 5;

/// How many top-scored candidates the weighted draw considers
const DRAW_POOL: usize = 5;

/// Energy shape of a generated set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnergyArc {
    /// No energy control
    #[default]
    None,
    /// Gradually increase energy
    Ascending,
    /// Low, then peak around 60% of the set, then wind down
    Peak,
    /// Gradually decrease energy (closing set)
    Descending,
    /// Oscillating energy
    Wave,
}

impl EnergyArc {
    /// Target mean energy at `progress` in [0, 1] through the set
    pub fn target_energy(&self, progress: f32) -> f32 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            EnergyArc::Ascending => 0.2 + 0.7 * p,
            EnergyArc::Peak => {
                if p < 0.6 {
                    0.3 + 0.7 * (p / 0.6)
                } else {
                    1.0 - 0.6 * (p - 0.6) / 0.4
                }
            }
            EnergyArc::Descending => 0.9 - 0.7 * p,
            EnergyArc::Wave => 0.5 + 0.3 * (4.0 * std::f32::consts::PI * p).sin(),
            EnergyArc::None => 0.5,
        }
    }
}

/// Constraints and preferences for playlist generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistRules {
    /// Maximum fractional BPM distance between adjacent tracks
    /// (0 = unrestricted)
    pub bpm_tolerance: f32,
    /// Whether adjacent tracks may change key at all
    pub allow_key_change: bool,
    /// Maximum Camelot wheel distance between adjacent tracks
    /// (0 = unrestricted)
    pub max_key_distance: u8,
    /// Minimum energy similarity between adjacent tracks (0 = unrestricted)
    pub min_energy_match: f32,
    /// Similarity dimension weights
    pub weights: SimilarityWeights,
    /// Energy shape over the whole set
    pub energy_arc: EnergyArc,
    /// Maximum BPM jump between adjacent tracks in percent (0 = off)
    pub bpm_step_limit: f32,
    /// Prefer small BPM movements over large ones
    pub prefer_bpm_progression: bool,
    /// RNG seed; 0 draws a seed from OS entropy (non-deterministic)
    pub random_seed: u64,
}

impl Default for PlaylistRules {
    fn default() -> Self {
        Self {
            bpm_tolerance: 0.0,
            allow_key_change: true,
            max_key_distance: 0,
            min_energy_match: 0.0,
            weights: SimilarityWeights::default(),
            energy_arc: EnergyArc::None,
            bpm_step_limit: 0.0,
            prefer_bpm_progression: false,
            random_seed: 0,
        }
    }
}

impl PlaylistRules {
    /// The fallback rule set used when no candidate passes the gate
    fn relaxed(&self) -> Self {
        Self {
            bpm_tolerance: 0.0,
            max_key_distance: 12,
            allow_key_change: true,
            min_energy_match: 0.0,
            bpm_step_limit: 0.0,
            ..self.clone()
        }
    }
}

/// One playlist slot with its outgoing transition
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub track_id: i64,
    /// Plan into the next entry; absent on the last entry
    pub transition_to_next: Option<TransitionPlan>,
}

/// An ordered set of tracks with per-edge transition plans
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    pub entries: Vec<PlaylistEntry>,
}

impl Playlist {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Track ids in playback order
    pub fn track_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.track_id).collect()
    }
}

/// Seeded stochastic playlist builder
#[derive(Debug, Clone, Default)]
pub struct PlaylistGenerator {
    similarity: SimilarityCalculator,
    planner: TransitionPlanner,
}

impl PlaylistGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a playlist of up to `count` entries starting from `seed`
    ///
    /// With a non-zero `rules.random_seed` the output is fully
    /// deterministic for identical inputs; a zero seed draws from OS
    /// entropy.
    pub fn generate(
        &mut self,
        seed: &TrackRecord,
        candidates: &[TrackRecord],
        count: usize,
        rules: &PlaylistRules,
        config: &TransitionConfig,
    ) -> Playlist {
        self.similarity.set_weights(rules.weights);

        let mut rng = if rules.random_seed != 0 {
            StdRng::seed_from_u64(rules.random_seed)
        } else {
            StdRng::from_entropy()
        };

        let mut playlist = Playlist::default();
        if count == 0 {
            return playlist;
        }

        let mut used_ids: HashSet<i64> = HashSet::new();
        let mut recent: VecDeque<TrackRecord> = VecDeque::new();

        playlist.entries.push(PlaylistEntry {
            track_id: seed.id,
            transition_to_next: None,
        });
        used_ids.insert(seed.id);
        recent.push_back(seed.clone());

        let mut available: Vec<TrackRecord> = candidates
            .iter()
            .filter(|t| t.id != seed.id)
            .cloned()
            .collect();

        let mut current = seed.clone();

        while playlist.len() < count && !available.is_empty() {
            let progress = playlist.len() as f32 / count as f32;

            let picked = self
                .select_next(&current, &available, rules, progress, &recent, &mut rng)
                .or_else(|| {
                    // Nothing passed the gate: one retry with relaxed rules
                    self.select_next(
                        &current,
                        &available,
                        &rules.relaxed(),
                        progress,
                        &recent,
                        &mut rng,
                    )
                });

            let Some(next) = picked else {
                log::debug!(
                    "playlist terminated early at {} of {} entries",
                    playlist.len(),
                    count
                );
                break;
            };

            let plan = self.planner.create_plan(&current, &next, config);
            if let Some(last) = playlist.entries.last_mut() {
                last.transition_to_next = Some(plan);
            }

            playlist.entries.push(PlaylistEntry {
                track_id: next.id,
                transition_to_next: None,
            });

            used_ids.insert(next.id);
            available.retain(|t| !used_ids.contains(&t.id));

            recent.push_back(next.clone());
            if recent.len() > RECENT_WINDOW {
                recent.pop_front();
            }

            current = next;
        }

        playlist
    }

    /// Build a playlist over a fixed track order, planning each edge
    pub fn create_with_transitions(
        &self,
        tracks: &[TrackRecord],
        config: &TransitionConfig,
    ) -> Playlist {
        let entries = tracks
            .iter()
            .enumerate()
            .map(|(i, track)| PlaylistEntry {
                track_id: track.id,
                transition_to_next: tracks
                    .get(i + 1)
                    .map(|next| self.planner.create_plan(track, next, config)),
            })
            .collect();

        Playlist { entries }
    }

    /// Filter, score, and draw the next track
    fn select_next(
        &self,
        current: &TrackRecord,
        available: &[TrackRecord],
        rules: &PlaylistRules,
        progress: f32,
        recent: &VecDeque<TrackRecord>,
        rng: &mut StdRng,
    ) -> Option<TrackRecord> {
        let compatible: Vec<&TrackRecord> = available
            .iter()
            .filter(|t| self.similarity.are_compatible(current, t, rules))
            .filter(|t| {
                // Step limit bounds the per-transition BPM jump
                if rules.bpm_step_limit > 0.0 && current.bpm > 0.0 && t.bpm > 0.0 {
                    bpm_distance(current.bpm, t.bpm) <= rules.bpm_step_limit / 100.0
                } else {
                    true
                }
            })
            .collect();

        if compatible.is_empty() {
            return None;
        }

        let mut scored: Vec<(&TrackRecord, f32)> = compatible
            .iter()
            .map(|t| (*t, self.score_candidate(current, t, rules, progress, recent)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Weighted draw from the top of the ranking
        let pool = scored.len().min(DRAW_POOL);
        let weights: Vec<f32> = (0..pool).map(|i| (-0.5 * i as f32).exp()).collect();
        let total: f32 = weights.iter().sum();

        let mut roll = rng.gen::<f32>() * total;
        for (i, weight) in weights.iter().enumerate() {
            roll -= weight;
            if roll <= 0.0 {
                return Some(scored[i].0.clone());
            }
        }

        Some(scored[pool - 1].0.clone())
    }

    /// Blend of similarity, energy-arc fit, BPM progression, and variety
    fn score_candidate(
        &self,
        current: &TrackRecord,
        candidate: &TrackRecord,
        rules: &PlaylistRules,
        progress: f32,
        recent: &VecDeque<TrackRecord>,
    ) -> f32 {
        let sim_score = self.similarity.similarity(current, candidate);

        let energy_arc_score = if rules.energy_arc != EnergyArc::None {
            let target = rules.energy_arc.target_energy(progress);
            1.0 - (target - candidate.mean_energy()).abs().clamp(0.0, 1.0)
        } else {
            1.0
        };

        let bpm_prog_score =
            if rules.prefer_bpm_progression && current.bpm > 0.0 && candidate.bpm > 0.0 {
                1.0 / (1.0 + 20.0 * bpm_distance(current.bpm, candidate.bpm))
            } else {
                1.0
            };

        let variety_score = if !recent.is_empty() {
            let total: f32 = recent
                .iter()
                .map(|r| self.similarity.distance(candidate, r))
                .sum();
            (2.0 * total / recent.len() as f32).clamp(0.0, 1.0)
        } else {
            1.0
        };

        0.35 * sim_score + 0.25 * energy_arc_score + 0.20 * bpm_prog_score + 0.20 * variety_score
    }
}
