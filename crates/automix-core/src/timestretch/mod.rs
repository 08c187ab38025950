//! Time-stretching via signalsmith-stretch
//!
//! Wraps the signalsmith-stretch library to provide tempo-matched playback
//! without pitch change. The deck feeds input sized by the stretch ratio
//! and pulls fixed-size output blocks.

use signalsmith_stretch::Stretch;

use crate::types::DEFAULT_SAMPLE_RATE;

/// Number of channels (stereo)
const CHANNELS: u32 = 2;

/// Time stretcher for BPM-matched playback
///
/// Takes stereo audio at the track's original tempo and outputs audio
/// stretched or compressed by the configured ratio. Uses zero-copy format
/// conversion: `StereoBuffer` regions are reinterpreted as interleaved f32
/// without per-frame copying.
pub struct TimeStretcher {
    /// The underlying signalsmith stretcher
    stretcher: Stretch,
    /// Current stretch ratio (target tempo / source tempo)
    ratio: f32,
}

impl TimeStretcher {
    /// Create a new time stretcher for the given sample rate
    pub fn new_with_sample_rate(sample_rate: u32) -> Self {
        Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
            ratio: 1.0,
        }
    }

    /// Create a new time stretcher at the default sample rate
    pub fn new() -> Self {
        Self::new_with_sample_rate(DEFAULT_SAMPLE_RATE)
    }

    /// Set the stretch ratio (target tempo / source tempo)
    ///
    /// ratio > 1.0: play faster (more input per output frame)
    /// ratio < 1.0: play slower
    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.clamp(0.5, 2.0);
    }

    /// Get the current stretch ratio
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Input frames needed to produce `output_frames` at the current ratio
    pub fn input_frames_for(&self, output_frames: usize) -> usize {
        (output_frames as f32 * self.ratio).round() as usize
    }

    /// Reset the stretcher state (call on load and seek)
    pub fn reset(&mut self) {
        self.stretcher.reset();
    }

    /// Process interleaved input into interleaved output
    ///
    /// The effective stretch is determined by the size difference between
    /// the two slices; the caller sizes the input via
    /// [`input_frames_for`](Self::input_frames_for).
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        output.fill(0.0);
        if input.is_empty() {
            return;
        }
        self.stretcher.process(input, output);
    }
}

impl Default for TimeStretcher {
    fn default() -> Self {
        Self::new()
    }
}
