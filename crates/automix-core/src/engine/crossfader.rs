//! Crossfader with position automation and EQ-swap support
//!
//! Position runs from -1.0 (full deck A) to +1.0 (full deck B). All state
//! lives in atomics: the control thread arms automation, the audio thread
//! advances it while pulling per-block [`MixParams`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use crossbeam::atomic::AtomicCell;

/// Crossfade curve shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CrossfaderCurve {
    /// Straight volume trade
    Linear = 0,
    /// Constant perceived loudness (cos/sin)
    #[default]
    EqualPower = 1,
    /// Both decks loud; bass swapped via EQ automation
    EqSwap = 2,
    /// Instant switch at center
    HardCut = 3,
}

impl CrossfaderCurve {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CrossfaderCurve::Linear,
            2 => CrossfaderCurve::EqSwap,
            3 => CrossfaderCurve::HardCut,
            _ => CrossfaderCurve::EqualPower,
        }
    }
}

/// Per-block mix parameters applied to both decks
///
/// Volumes are linear [0, 1]; EQ gains are dB offsets applied on top of
/// flat (0 = unity, -60 = kill).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MixParams {
    pub volume_a: f32,
    pub volume_b: f32,
    pub eq_low_a: f32,
    pub eq_mid_a: f32,
    pub eq_high_a: f32,
    pub eq_low_b: f32,
    pub eq_mid_b: f32,
    pub eq_high_b: f32,
}

/// EQ kill level in dB
const KILL_DB: f32 = -60.0;

/// Two-deck crossfader
///
/// Thread model: `start_automation`/`stop_automation`/`set_position` run on
/// the control thread; `get_volumes`/`get_mix_params` run on the audio
/// thread and advance the automation clock. Every field is a single-word
/// atomic, so neither side ever blocks.
pub struct Crossfader {
    /// Current position in [-1, +1]
    position: AtomicCell<f32>,
    curve: AtomicU8,
    auto_active: AtomicBool,
    auto_start: AtomicCell<f32>,
    auto_end: AtomicCell<f32>,
    auto_total_frames: AtomicU64,
    auto_current_frame: AtomicU64,
}

impl Crossfader {
    pub fn new() -> Self {
        Self {
            position: AtomicCell::new(-1.0),
            curve: AtomicU8::new(CrossfaderCurve::EqualPower as u8),
            auto_active: AtomicBool::new(false),
            auto_start: AtomicCell::new(-1.0),
            auto_end: AtomicCell::new(1.0),
            auto_total_frames: AtomicU64::new(0),
            auto_current_frame: AtomicU64::new(0),
        }
    }

    /// Set the position directly (control thread)
    pub fn set_position(&self, position: f32) {
        self.position.store(position.clamp(-1.0, 1.0));
    }

    /// Current position in [-1, +1]
    pub fn position(&self) -> f32 {
        self.position.load()
    }

    /// Select the curve shape
    pub fn set_curve(&self, curve: CrossfaderCurve) {
        self.curve.store(curve as u8, Ordering::Release);
    }

    /// Current curve shape
    pub fn curve(&self) -> CrossfaderCurve {
        CrossfaderCurve::from_u8(self.curve.load(Ordering::Acquire))
    }

    /// Arm an automated sweep from `from` to `to` over `total_frames`
    ///
    /// A non-positive frame count finishes immediately on the first
    /// render block.
    pub fn start_automation(&self, from: f32, to: f32, total_frames: u64) {
        self.auto_start.store(from);
        self.auto_end.store(to);
        self.auto_total_frames.store(total_frames, Ordering::Release);
        self.auto_current_frame.store(0, Ordering::Release);
        self.position.store(from);
        self.auto_active.store(true, Ordering::Release);
    }

    /// Cancel any running automation, keeping the current position
    pub fn stop_automation(&self) {
        self.auto_active.store(false, Ordering::Release);
    }

    /// Whether an automation sweep is still running
    pub fn is_automating(&self) -> bool {
        self.auto_active.load(Ordering::Acquire)
    }

    /// Advance the automation clock by `frames` and return the position
    fn advance_automation(&self, frames: u64) -> f32 {
        if !self.auto_active.load(Ordering::Acquire) || frames == 0 {
            return self.position.load();
        }

        let current = self.auto_current_frame.load(Ordering::Acquire) + frames;
        self.auto_current_frame.store(current, Ordering::Release);

        let total = self.auto_total_frames.load(Ordering::Acquire);
        if current >= total {
            let pos = self.auto_end.load();
            self.position.store(pos);
            self.auto_active.store(false, Ordering::Release);
            return pos;
        }

        let t = current as f32 / total as f32;
        // Smoothstep ease-in-out
        let t = t * t * (3.0 - 2.0 * t);
        let start = self.auto_start.load();
        let pos = start + t * (self.auto_end.load() - start);
        self.position.store(pos);
        pos
    }

    /// Deck volumes for the next `frames` (audio thread, advances
    /// automation)
    pub fn get_volumes(&self, frames: u64) -> (f32, f32) {
        let pos = self.advance_automation(frames);
        self.compute_volumes(pos)
    }

    /// Full mix parameters for the next `frames` (audio thread, advances
    /// automation)
    pub fn get_mix_params(&self, frames: u64) -> MixParams {
        let pos = self.advance_automation(frames);
        self.compute_mix_params(pos)
    }

    /// Volumes at a given position, by the current curve
    pub fn compute_volumes(&self, pos: f32) -> (f32, f32) {
        let n = ((pos + 1.0) / 2.0).clamp(0.0, 1.0);

        match self.curve() {
            CrossfaderCurve::Linear => (1.0 - n, n),
            CrossfaderCurve::EqualPower => {
                let angle = n * std::f32::consts::FRAC_PI_2;
                (angle.cos(), angle.sin())
            }
            CrossfaderCurve::EqSwap => {
                // Both decks stay loud through the swap
                if n < 0.5 {
                    (1.0, n * 2.0)
                } else {
                    ((1.0 - n) * 2.0, 1.0)
                }
            }
            CrossfaderCurve::HardCut => {
                if n < 0.5 {
                    (1.0, 0.0)
                } else {
                    (0.0, 1.0)
                }
            }
        }
    }

    /// Volumes plus EQ gains at a given position
    ///
    /// For non-EqSwap curves all EQ gains stay at unity. EqSwap runs the
    /// classic bass-exchange in three phases:
    ///
    ///   Phase 1 (0.0-0.4): duck A's bass while B enters highs-first
    ///   Phase 2 (0.4-0.6): swap zone, B's bass fades in over A's kill
    ///   Phase 3 (0.6-1.0): A's remaining bands fade out, B fully restored
    pub fn compute_mix_params(&self, pos: f32) -> MixParams {
        let n = ((pos + 1.0) / 2.0).clamp(0.0, 1.0);
        let (volume_a, volume_b) = self.compute_volumes(pos);

        let mut params = MixParams {
            volume_a,
            volume_b,
            ..Default::default()
        };

        if self.curve() != CrossfaderCurve::EqSwap {
            return params;
        }

        if n < 0.4 {
            let t = n / 0.4;
            params.eq_low_a = KILL_DB * t;
            params.eq_low_b = KILL_DB;
            params.eq_mid_b = KILL_DB * (1.0 - t);
        } else if n < 0.6 {
            let t = (n - 0.4) / 0.2;
            params.eq_low_a = KILL_DB;
            params.eq_low_b = KILL_DB * (1.0 - t);
        } else {
            let t = (n - 0.6) / 0.4;
            params.eq_low_a = KILL_DB;
            params.eq_mid_a = KILL_DB * t;
            params.eq_high_a = KILL_DB * t;
        }

        params
    }
}

impl Default for Crossfader {
    fn default() -> Self {
        Self::new()
    }
}
