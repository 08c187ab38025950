//! Playback scheduler - two-deck orchestration
//!
//! Thread model:
//!   `render()` — real-time audio thread (no alloc, no I/O, no callbacks;
//!                only atomics, pre-allocated buffers, and DSP)
//!   `poll()`   — control thread (loading, callback delivery, deck swaps)
//!
//! The audio thread never mutates scheduler topology. It raises
//! single-producer/single-consumer edge flags (`transition_trigger_pending`,
//! `transition_finished`, `playback_finished`); `poll()` consumes them with
//! a read-clear and performs every load, swap, and playlist advance.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::atomic::AtomicCell;

use crate::error::{EngineError, EngineResult};
use crate::matcher::{Playlist, TransitionConfig};
use crate::types::{AudioBuffer, PlaybackState, StereoSample, DEFAULT_SAMPLE_RATE};

use super::crossfader::{Crossfader, CrossfaderCurve};
use super::deck::Deck;

/// Loads track audio by id; supplied by the engine at construction so the
/// scheduler never holds a back-pointer
pub type TrackLoader = Box<dyn Fn(i64) -> EngineResult<AudioBuffer> + Send + Sync>;

/// Invoked from `poll()` with one atomically sampled scheduler snapshot:
/// `(state, current_track_id, position_seconds, next_track_id_or_zero)`
pub type StatusCallback = Box<dyn FnMut(PlaybackState, i64, f32, i64) + Send>;

/// Control-thread-owned state
struct SchedulerControl {
    playlist: Playlist,
    current_index: usize,
    loader: Option<TrackLoader>,
    transition_config: TransitionConfig,
    last_error: Option<String>,
}

/// Pre-allocated per-deck mix buffers; only the audio thread takes this
/// lock, so it is always uncontended
struct RenderBuffers {
    deck_a: Vec<StereoSample>,
    deck_b: Vec<StereoSample>,
}

/// Two-deck playback scheduler with automatic transitions
pub struct Scheduler {
    decks: [Deck; 2],
    crossfader: Crossfader,
    /// Which deck is currently active (the other one is "next")
    active_idx: AtomicUsize,
    state: AtomicU8,
    transitioning: AtomicBool,

    // SPSC edge flags: audio thread raises, poll() read-clears
    transition_trigger_pending: AtomicBool,
    transition_finished: AtomicBool,
    playback_finished: AtomicBool,
    skip_requested: AtomicBool,
    need_status_notify: AtomicBool,

    sample_rate: AtomicU32,
    max_buffer_frames: usize,

    // Cue data published by the control thread for the audio thread:
    // where the current track hands over and whether anything follows
    rt_out_threshold: AtomicCell<f32>,
    rt_has_next: AtomicBool,

    control: Mutex<SchedulerControl>,
    status_callback: Mutex<Option<StatusCallback>>,
    render_buffers: Mutex<RenderBuffers>,
}

impl Scheduler {
    /// Create a scheduler with buffers sized for `max_buffer_frames`
    pub fn new(max_buffer_frames: usize) -> Self {
        Self {
            decks: [Deck::new(), Deck::new()],
            crossfader: Crossfader::new(),
            active_idx: AtomicUsize::new(0),
            state: AtomicU8::new(PlaybackState::Stopped as u8),
            transitioning: AtomicBool::new(false),
            transition_trigger_pending: AtomicBool::new(false),
            transition_finished: AtomicBool::new(false),
            playback_finished: AtomicBool::new(false),
            skip_requested: AtomicBool::new(false),
            need_status_notify: AtomicBool::new(false),
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
            max_buffer_frames,
            rt_out_threshold: AtomicCell::new(f32::MAX),
            rt_has_next: AtomicBool::new(false),
            control: Mutex::new(SchedulerControl {
                playlist: Playlist::default(),
                current_index: 0,
                loader: None,
                transition_config: TransitionConfig::default(),
                last_error: None,
            }),
            status_callback: Mutex::new(None),
            render_buffers: Mutex::new(RenderBuffers {
                deck_a: vec![StereoSample::silence(); max_buffer_frames],
                deck_b: vec![StereoSample::silence(); max_buffer_frames],
            }),
        }
    }

    /// Install the track loader capability (call before `load_playlist`)
    pub fn set_track_loader(&self, loader: TrackLoader) {
        self.control.lock().unwrap().loader = Some(loader);
    }

    /// Install the status callback; it fires only from `poll()`
    pub fn set_status_callback(&self, callback: StatusCallback) {
        *self.status_callback.lock().unwrap() = Some(callback);
    }

    /// Replace the transition config, applied from the next transition on
    pub fn set_transition_config(&self, config: TransitionConfig) {
        let mut control = self.control.lock().unwrap();
        control.transition_config = config;
        self.publish_rt_cue(&control);
    }

    /// Current playback state
    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Playhead of the active deck in seconds
    pub fn position(&self) -> f32 {
        self.active_deck().position()
    }

    /// Id of the track on the active deck (0 when empty)
    pub fn current_track_id(&self) -> i64 {
        self.active_deck().track_id()
    }

    /// Id of the upcoming track, or 0 at the end of the playlist
    pub fn next_track_id(&self) -> i64 {
        let control = self.control.lock().unwrap();
        control
            .playlist
            .entries
            .get(control.current_index + 1)
            .map(|e| e.track_id)
            .unwrap_or(0)
    }

    /// Most recent control-path error, if any
    pub fn last_error(&self) -> Option<String> {
        self.control.lock().unwrap().last_error.clone()
    }

    fn active_deck(&self) -> &Deck {
        &self.decks[self.active_idx.load(Ordering::Acquire)]
    }

    fn next_deck(&self) -> &Deck {
        &self.decks[1 - self.active_idx.load(Ordering::Acquire)]
    }

    /// Load a playlist and prime both decks (control thread)
    ///
    /// The first entry lands on the active deck; the second is preloaded
    /// onto the next deck so the first transition never waits on I/O.
    pub fn load_playlist(&self, playlist: Playlist) -> EngineResult<()> {
        self.stop();

        let mut control = self.control.lock().unwrap();

        if playlist.is_empty() {
            control.last_error = Some("empty playlist".into());
            return Err(EngineError::PlaybackError("empty playlist".into()));
        }

        control.playlist = playlist;
        control.current_index = 0;

        let first_id = control.playlist.entries[0].track_id;
        if let Err(e) = self.load_deck(self.active_deck(), first_id, control.loader.as_ref()) {
            control.last_error = Some(e.to_string());
            return Err(e);
        }

        if let Some(second) = control.playlist.entries.get(1) {
            let second_id = second.track_id;
            if let Err(e) = self.load_deck(self.next_deck(), second_id, control.loader.as_ref()) {
                // Not fatal: start_transition retries on demand
                log::warn!("preload of track {} failed: {}", second_id, e);
                control.last_error = Some(e.to_string());
            }
        }

        self.crossfader.set_position(-1.0);
        self.publish_rt_cue(&control);
        Ok(())
    }

    /// Start playback of the loaded playlist (control thread)
    pub fn play(&self) -> EngineResult<()> {
        let mut control = self.control.lock().unwrap();
        if control.playlist.is_empty() {
            control.last_error = Some("empty playlist".into());
            return Err(EngineError::PlaybackError("empty playlist".into()));
        }
        if !self.active_deck().is_loaded() {
            control.last_error = Some("active deck not loaded".into());
            return Err(EngineError::PlaybackError("active deck not loaded".into()));
        }

        self.active_deck().play();
        self.set_state(PlaybackState::Playing);
        drop(control);
        self.need_status_notify.store(true, Ordering::Release);
        Ok(())
    }

    /// Pause both decks
    pub fn pause(&self) {
        self.active_deck().pause();
        self.next_deck().pause();
        self.set_state(PlaybackState::Paused);
        self.need_status_notify.store(true, Ordering::Release);
    }

    /// Resume from pause, restoring a transition in flight
    pub fn resume(&self) {
        if self.state() != PlaybackState::Paused {
            return;
        }

        self.active_deck().play();
        let transitioning = self.transitioning.load(Ordering::Acquire);
        if transitioning {
            self.next_deck().play();
        }
        self.set_state(if transitioning {
            PlaybackState::Transitioning
        } else {
            PlaybackState::Playing
        });
        self.need_status_notify.store(true, Ordering::Release);
    }

    /// Stop playback, unload both decks, and clear every flag
    pub fn stop(&self) {
        for deck in &self.decks {
            deck.pause();
            deck.unload();
        }

        self.transitioning.store(false, Ordering::Release);
        self.transition_trigger_pending.store(false, Ordering::Release);
        self.transition_finished.store(false, Ordering::Release);
        self.playback_finished.store(false, Ordering::Release);
        self.skip_requested.store(false, Ordering::Release);
        self.rt_has_next.store(false, Ordering::Release);
        self.rt_out_threshold.store(f32::MAX);

        self.crossfader.stop_automation();
        self.crossfader.set_position(-1.0);

        self.set_state(PlaybackState::Stopped);
        self.need_status_notify.store(true, Ordering::Release);
    }

    /// Request a jump to the next track; with nothing left, stops
    ///
    /// The transition itself happens on the next `poll()`.
    pub fn skip(&self) {
        let has_next = {
            let control = self.control.lock().unwrap();
            control.current_index + 1 < control.playlist.len()
        };

        if has_next {
            self.skip_requested.store(true, Ordering::Release);
        } else {
            self.stop();
        }
    }

    /// Seek within the active deck (control thread)
    pub fn seek(&self, position_seconds: f32) {
        let deck = self.active_deck();
        if deck.is_loaded() {
            deck.seek(position_seconds);
        }
    }

    // =========================================================================
    // render() — AUDIO THREAD
    // =========================================================================

    /// Render `frames` stereo frames of the two-deck mix
    ///
    /// Returns the larger per-deck rendered count. Stopped and paused
    /// states produce exact silence.
    pub fn render(&self, out: &mut [StereoSample], frames: usize, sample_rate: u32) -> usize {
        let frames = frames.min(out.len()).min(self.max_buffer_frames);

        match self.state() {
            PlaybackState::Stopped | PlaybackState::Paused => {
                out[..frames].fill(StereoSample::silence());
                return frames;
            }
            _ => {}
        }

        if sample_rate > 0 {
            self.sample_rate.store(sample_rate, Ordering::Release);
        }

        self.rt_update();

        let mix = self.crossfader.get_mix_params(frames as u64);

        let mut buffers = self.render_buffers.lock().unwrap();
        let RenderBuffers { deck_a, deck_b } = &mut *buffers;

        let active = self.active_deck();
        let next = self.next_deck();

        deck_a[..frames].fill(StereoSample::silence());
        deck_b[..frames].fill(StereoSample::silence());

        let mut rendered_a = 0;
        let mut rendered_b = 0;

        if active.is_playing() {
            active.set_volume(mix.volume_a);
            active.set_eq(mix.eq_low_a, mix.eq_mid_a, mix.eq_high_a);
            rendered_a = active.render(&mut deck_a[..frames], frames);
        }

        if next.is_playing() {
            next.set_volume(mix.volume_b);
            next.set_eq(mix.eq_low_b, mix.eq_mid_b, mix.eq_high_b);
            rendered_b = next.render(&mut deck_b[..frames], frames);
        }

        // Sum and soft-clamp; NaN from stretcher edge cases must not
        // propagate into the output
        for i in 0..frames {
            let sum = deck_a[i] + deck_b[i];
            out[i] = StereoSample::new(
                soft_clamp(sum.left),
                soft_clamp(sum.right),
            );
        }

        rendered_a.max(rendered_b)
    }

    /// Audio-thread state inspection: raises flags, mutates nothing else
    fn rt_update(&self) {
        let active = self.active_deck();
        if !active.is_loaded() {
            return;
        }

        let transitioning = self.transitioning.load(Ordering::Acquire);

        if !transitioning && self.rt_has_next.load(Ordering::Acquire) {
            let threshold = self.rt_out_threshold.load();
            if active.position() >= threshold {
                self.transition_trigger_pending.store(true, Ordering::Release);
            }
        }

        if transitioning && !self.crossfader.is_automating() {
            self.transition_finished.store(true, Ordering::Release);
        }

        if active.is_finished() && !transitioning {
            self.playback_finished.store(true, Ordering::Release);
        }
    }

    // =========================================================================
    // poll() — CONTROL THREAD
    // =========================================================================

    /// Service the edge flags raised by the audio thread
    ///
    /// Performs loads, deck swaps, playlist advances, and callback
    /// delivery. Call roughly every 10-50 ms. The status callback must
    /// not re-enter `poll()`.
    pub fn poll(&self) {
        if self.state() != PlaybackState::Stopped {
            if self.skip_requested.swap(false, Ordering::AcqRel) {
                self.start_transition();
            }

            if self.transition_trigger_pending.swap(false, Ordering::AcqRel)
                && !self.transitioning.load(Ordering::Acquire)
            {
                self.start_transition();
            }

            if self.transition_finished.swap(false, Ordering::AcqRel) {
                self.finish_transition();
            }

            if self.playback_finished.swap(false, Ordering::AcqRel) {
                self.advance_after_finish();
            }
        }

        if self.need_status_notify.swap(false, Ordering::AcqRel) {
            self.deliver_status();
        }
    }

    /// Arm the next transition (control thread only)
    fn start_transition(&self) {
        let mut control = self.control.lock().unwrap();

        if control.current_index + 1 >= control.playlist.len() {
            return;
        }

        let next_deck = self.next_deck();
        let next_id = control.playlist.entries[control.current_index + 1].track_id;

        if !next_deck.is_loaded() || next_deck.track_id() != next_id {
            if let Err(e) = self.load_deck(next_deck, next_id, control.loader.as_ref()) {
                // Transition stays blocked; a later poll retries
                log::warn!("cannot start transition, track {} failed: {}", next_id, e);
                control.last_error = Some(e.to_string());
                return;
            }
        }

        let plan = control.playlist.entries[control.current_index]
            .transition_to_next
            .as_ref();

        let (crossfade_seconds, stretch_ratio, in_point, plan_wants_swap) = match plan {
            Some(plan) => (
                plan.crossfade_duration,
                plan.stretch_ratio,
                plan.in_point.time_seconds,
                plan.eq_hint.use_eq_swap,
            ),
            None => (
                control.transition_config.crossfade_beats * 60.0 / 120.0,
                1.0,
                0.0,
                false,
            ),
        };

        next_deck.set_stretch_ratio(stretch_ratio);
        next_deck.seek(in_point);
        next_deck.play();

        let curve = if plan_wants_swap || control.transition_config.use_eq_swap {
            CrossfaderCurve::EqSwap
        } else {
            CrossfaderCurve::EqualPower
        };
        self.crossfader.set_curve(curve);

        let sample_rate = self.sample_rate.load(Ordering::Acquire);
        let crossfade_frames = (crossfade_seconds * sample_rate as f32).round() as u64;

        // Plan fields must be visible to the audio thread before the
        // crossfader arms and the state flips
        self.crossfader.start_automation(-1.0, 1.0, crossfade_frames);
        self.transitioning.store(true, Ordering::Release);
        self.set_state(PlaybackState::Transitioning);

        log::debug!(
            "transition {} -> {} over {:.2}s",
            self.active_deck().track_id(),
            next_id,
            crossfade_seconds
        );

        drop(control);
        self.need_status_notify.store(true, Ordering::Release);
    }

    /// Crossfade completed: swap decks, advance, preload (control thread)
    fn finish_transition(&self) {
        let mut control = self.control.lock().unwrap();

        let retired_idx = self.active_idx.load(Ordering::Acquire);
        self.active_idx.store(1 - retired_idx, Ordering::Release);

        let retired = &self.decks[retired_idx];
        retired.pause();
        retired.unload();

        control.current_index += 1;
        self.transitioning.store(false, Ordering::Release);
        self.set_state(PlaybackState::Playing);
        self.crossfader.set_position(-1.0);

        if let Some(upcoming) = control.playlist.entries.get(control.current_index + 1) {
            let upcoming_id = upcoming.track_id;
            if let Err(e) = self.load_deck(retired, upcoming_id, control.loader.as_ref()) {
                log::warn!("preload of track {} failed: {}", upcoming_id, e);
                control.last_error = Some(e.to_string());
            }
        }

        self.publish_rt_cue(&control);
        drop(control);
        self.need_status_notify.store(true, Ordering::Release);
    }

    /// Active deck ran out without a transition: hard-advance or stop
    fn advance_after_finish(&self) {
        let should_stop = {
            let mut control = self.control.lock().unwrap();

            if control.current_index + 1 >= control.playlist.len() {
                true
            } else {
                control.current_index += 1;

                let retired_idx = self.active_idx.load(Ordering::Acquire);
                self.active_idx.store(1 - retired_idx, Ordering::Release);

                let retired = &self.decks[retired_idx];
                retired.pause();

                let new_active = self.active_deck();
                let current_id = control.playlist.entries[control.current_index].track_id;
                if !new_active.is_loaded() || new_active.track_id() != current_id {
                    if let Err(e) = self.load_deck(new_active, current_id, control.loader.as_ref()) {
                        log::warn!("track {} failed at playlist advance: {}", current_id, e);
                        control.last_error = Some(e.to_string());
                        drop(control);
                        self.stop();
                        return;
                    }
                }
                new_active.play();

                if let Some(upcoming) = control.playlist.entries.get(control.current_index + 1) {
                    let upcoming_id = upcoming.track_id;
                    if let Err(e) = self.load_deck(retired, upcoming_id, control.loader.as_ref()) {
                        log::warn!("preload of track {} failed: {}", upcoming_id, e);
                        control.last_error = Some(e.to_string());
                    }
                }

                self.crossfader.set_position(-1.0);
                self.publish_rt_cue(&control);
                false
            }
        };

        if should_stop {
            self.stop();
        } else {
            self.need_status_notify.store(true, Ordering::Release);
        }
    }

    /// Load audio into a deck through the loader capability
    fn load_deck(
        &self,
        deck: &Deck,
        track_id: i64,
        loader: Option<&TrackLoader>,
    ) -> EngineResult<()> {
        let loader = loader
            .ok_or_else(|| EngineError::PlaybackError("no track loader installed".into()))?;
        let audio = loader(track_id)?;
        deck.load(audio, track_id)
    }

    /// Publish the out-point threshold and next-track flag for the audio
    /// thread (control thread, before any state flip that uses them)
    fn publish_rt_cue(&self, control: &SchedulerControl) {
        let threshold = control
            .playlist
            .entries
            .get(control.current_index)
            .and_then(|e| e.transition_to_next.as_ref())
            .map(|plan| plan.out_point.time_seconds)
            .unwrap_or_else(|| {
                (self.active_deck().duration() - control.transition_config.max_transition_seconds)
                    .max(0.0)
            });

        self.rt_out_threshold.store(threshold);
        self.rt_has_next.store(
            control.current_index + 1 < control.playlist.len(),
            Ordering::Release,
        );
    }

    /// Deliver one status snapshot; the control lock is released before
    /// the callback runs
    fn deliver_status(&self) {
        let snapshot = {
            let control = self.control.lock().unwrap();
            let active = self.active_deck();
            let next_id = control
                .playlist
                .entries
                .get(control.current_index + 1)
                .map(|e| e.track_id)
                .unwrap_or(0);
            (self.state(), active.track_id(), active.position(), next_id)
        };

        if let Some(callback) = self.status_callback.lock().unwrap().as_mut() {
            callback(snapshot.0, snapshot.1, snapshot.2, snapshot.3);
        }
    }
}

/// Clamp a sample into [-1, 1], flushing NaN to silence
#[inline]
fn soft_clamp(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(-1.0, 1.0)
    }
}
