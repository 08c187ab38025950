//! Deck - single-track player
//!
//! Each deck owns an immutable audio buffer, a playhead, a 3-band EQ, and
//! an optional time-stretcher. Control inputs (volume, stretch ratio, EQ
//! gains, play state) live in lock-free atomics so the scheduler's audio
//! step can write them and the control thread can read them without
//! blocking. The heavier render state sits behind a mutex that is
//! uncontended in practice: the audio thread takes it per render block,
//! the control thread only during load/unload/seek of a deck that is not
//! rendering.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam::atomic::AtomicCell;

use crate::error::{EngineError, EngineResult};
use crate::timestretch::TimeStretcher;
use crate::types::{AudioBuffer, StereoSample};

use super::eq::ThreeBandEq;

/// Output block size for pulls from the time-stretcher
const STRETCH_BLOCK_FRAMES: usize = 512;

/// Stretch ratios closer to unity than this render unstretched
const STRETCH_EPSILON: f32 = 0.001;

/// Lock-free control block shared across the thread boundary
#[derive(Debug)]
struct DeckControl {
    loaded: AtomicBool,
    playing: AtomicBool,
    finished: AtomicBool,
    track_id: AtomicI64,
    volume: AtomicCell<f32>,
    stretch_ratio: AtomicCell<f32>,
    eq_low_db: AtomicCell<f32>,
    eq_mid_db: AtomicCell<f32>,
    eq_high_db: AtomicCell<f32>,
    /// Playhead in frames, published by the render path
    position_frames: AtomicU64,
    duration_frames: AtomicU64,
    sample_rate: AtomicU32,
}

impl Default for DeckControl {
    fn default() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            track_id: AtomicI64::new(0),
            volume: AtomicCell::new(1.0),
            stretch_ratio: AtomicCell::new(1.0),
            eq_low_db: AtomicCell::new(0.0),
            eq_mid_db: AtomicCell::new(0.0),
            eq_high_db: AtomicCell::new(0.0),
            position_frames: AtomicU64::new(0),
            duration_frames: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
        }
    }
}

/// Render-side state, owned by whichever thread currently drives the deck
struct DeckInner {
    buffer: AudioBuffer,
    /// Playhead in frames
    position: usize,
    /// Volume at the end of the previous block; negative means "no
    /// previous block yet", which skips the ramp on first render
    prev_volume: f32,
    eq: ThreeBandEq,
    stretcher: Option<TimeStretcher>,
}

impl DeckInner {
    fn new() -> Self {
        Self {
            buffer: AudioBuffer::default(),
            position: 0,
            prev_volume: -1.0,
            eq: ThreeBandEq::new(),
            stretcher: None,
        }
    }
}

/// A single-track player with volume smoothing, 3-band EQ, and optional
/// time-stretch
pub struct Deck {
    control: DeckControl,
    inner: Mutex<DeckInner>,
}

impl Deck {
    /// Create a new empty deck
    pub fn new() -> Self {
        Self {
            control: DeckControl::default(),
            inner: Mutex::new(DeckInner::new()),
        }
    }

    /// Load audio into the deck (control thread)
    ///
    /// Resets the playhead, EQ state, and stretcher. The deck stays
    /// paused; call [`play`](Self::play) to start.
    pub fn load(&self, audio: AudioBuffer, track_id: i64) -> EngineResult<()> {
        if audio.sample_rate == 0 {
            return Err(EngineError::LoadFailed(format!(
                "track {}: zero sample rate",
                track_id
            )));
        }

        let duration_frames = audio.frame_count() as u64;
        let sample_rate = audio.sample_rate;

        {
            let mut inner = self.inner.lock().unwrap();
            inner.stretcher = Some(TimeStretcher::new_with_sample_rate(sample_rate.max(1)));
            inner.buffer = audio;
            inner.position = 0;
            inner.prev_volume = -1.0;
            inner.eq.reset();
        }

        self.control.track_id.store(track_id, Ordering::Release);
        self.control.duration_frames.store(duration_frames, Ordering::Release);
        self.control.sample_rate.store(sample_rate, Ordering::Release);
        self.control.position_frames.store(0, Ordering::Release);
        self.control.finished.store(false, Ordering::Release);
        self.control.loaded.store(true, Ordering::Release);

        Ok(())
    }

    /// Unload the current audio (control thread)
    pub fn unload(&self) {
        self.control.playing.store(false, Ordering::Release);
        self.control.loaded.store(false, Ordering::Release);
        self.control.finished.store(false, Ordering::Release);
        self.control.track_id.store(0, Ordering::Release);
        self.control.position_frames.store(0, Ordering::Release);
        self.control.duration_frames.store(0, Ordering::Release);
        self.control.eq_low_db.store(0.0);
        self.control.eq_mid_db.store(0.0);
        self.control.eq_high_db.store(0.0);

        let mut inner = self.inner.lock().unwrap();
        inner.buffer = AudioBuffer::default();
        inner.position = 0;
        inner.prev_volume = -1.0;
        inner.eq.reset();
        inner.stretcher = None;
    }

    /// Start playback (no-op while unloaded)
    pub fn play(&self) {
        if self.control.loaded.load(Ordering::Acquire) {
            self.control.playing.store(true, Ordering::Release);
        }
    }

    /// Pause playback
    pub fn pause(&self) {
        self.control.playing.store(false, Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.control.loaded.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.control.playing.load(Ordering::Acquire)
    }

    /// Whether the playhead has consumed the whole buffer
    pub fn is_finished(&self) -> bool {
        self.control.finished.load(Ordering::Acquire)
    }

    /// Id of the loaded track (0 when empty)
    pub fn track_id(&self) -> i64 {
        self.control.track_id.load(Ordering::Acquire)
    }

    /// Seek to a position in seconds, clamped to the track bounds
    /// (control thread)
    pub fn seek(&self, position_seconds: f32) {
        let mut inner = self.inner.lock().unwrap();
        let sample_rate = inner.buffer.sample_rate;
        if sample_rate == 0 {
            return;
        }

        let frame = (position_seconds.max(0.0) * sample_rate as f32) as usize;
        let frame = frame.min(inner.buffer.frame_count());
        inner.position = frame;
        if let Some(stretcher) = inner.stretcher.as_mut() {
            stretcher.reset();
        }

        self.control.position_frames.store(frame as u64, Ordering::Release);
        self.control
            .finished
            .store(frame >= inner.buffer.frame_count(), Ordering::Release);
    }

    /// Playhead position in seconds
    pub fn position(&self) -> f32 {
        let sample_rate = self.control.sample_rate.load(Ordering::Acquire);
        if sample_rate == 0 {
            return 0.0;
        }
        self.control.position_frames.load(Ordering::Acquire) as f32 / sample_rate as f32
    }

    /// Track duration in seconds
    pub fn duration(&self) -> f32 {
        let sample_rate = self.control.sample_rate.load(Ordering::Acquire);
        if sample_rate == 0 {
            return 0.0;
        }
        self.control.duration_frames.load(Ordering::Acquire) as f32 / sample_rate as f32
    }

    /// Set playback volume [0, 1]
    pub fn set_volume(&self, volume: f32) {
        self.control.volume.store(volume.clamp(0.0, 1.0));
    }

    pub fn volume(&self) -> f32 {
        self.control.volume.load()
    }

    /// Set the time-stretch ratio, clamped to [0.5, 2.0]
    pub fn set_stretch_ratio(&self, ratio: f32) {
        self.control.stretch_ratio.store(ratio.clamp(0.5, 2.0));
    }

    pub fn stretch_ratio(&self) -> f32 {
        self.control.stretch_ratio.load()
    }

    /// Set 3-band EQ gains in dB, clamped to [-60, +12]
    pub fn set_eq(&self, low_db: f32, mid_db: f32, high_db: f32) {
        self.control.eq_low_db.store(low_db.clamp(-60.0, 12.0));
        self.control.eq_mid_db.store(mid_db.clamp(-60.0, 12.0));
        self.control.eq_high_db.store(high_db.clamp(-60.0, 12.0));
    }

    /// Current EQ gains (low, mid, high) in dB
    pub fn eq(&self) -> (f32, f32, f32) {
        (
            self.control.eq_low_db.load(),
            self.control.eq_mid_db.load(),
            self.control.eq_high_db.load(),
        )
    }

    /// Render up to `frames` stereo frames into `out` (audio thread)
    ///
    /// Returns the number of frames actually produced from track audio;
    /// the remainder of the block is zero-filled. Volume changes ramp
    /// linearly across the block to avoid zipper noise.
    pub fn render(&self, out: &mut [StereoSample], frames: usize) -> usize {
        let frames = frames.min(out.len());

        if !self.is_playing() || !self.is_loaded() {
            out[..frames].fill(StereoSample::silence());
            return 0;
        }

        let volume = self.control.volume.load();
        let stretch = self.control.stretch_ratio.load();
        let (low_db, mid_db, high_db) = (
            self.control.eq_low_db.load(),
            self.control.eq_mid_db.load(),
            self.control.eq_high_db.load(),
        );

        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;

        let sample_rate = inner.buffer.sample_rate.max(1) as f32;
        inner.eq.update(sample_rate, low_db, mid_db, high_db);

        let vol_start = if inner.prev_volume < 0.0 { volume } else { inner.prev_volume };
        inner.prev_volume = volume;

        let use_stretch = (stretch - 1.0).abs() > STRETCH_EPSILON && inner.stretcher.is_some();
        let rendered = if use_stretch {
            Self::render_stretched(inner, out, frames, stretch)
        } else {
            Self::render_direct(inner, out, frames)
        };

        // Shape the block: EQ cascade, then the volume ramp
        let denom = (frames.saturating_sub(1)).max(1) as f32;
        for (i, sample) in out.iter_mut().take(rendered).enumerate() {
            let t = i as f32 / denom;
            let vol = vol_start + t * (volume - vol_start);
            sample.left = inner.eq.process(sample.left, 0) * vol;
            sample.right = inner.eq.process(sample.right, 1) * vol;
        }

        // Zero-fill the tail if the track ran out
        out[rendered..frames].fill(StereoSample::silence());

        if inner.position >= inner.buffer.frame_count() {
            self.control.finished.store(true, Ordering::Release);
        }
        self.control
            .position_frames
            .store(inner.position as u64, Ordering::Release);

        rendered
    }

    /// Copy frames straight from the buffer
    fn render_direct(inner: &mut DeckInner, out: &mut [StereoSample], frames: usize) -> usize {
        let available = inner.buffer.frame_count().saturating_sub(inner.position);
        let count = frames.min(available);

        out[..count]
            .copy_from_slice(&inner.buffer.samples.as_slice()[inner.position..inner.position + count]);
        inner.position += count;
        count
    }

    /// Pull frames through the time-stretcher in bounded blocks
    ///
    /// Input is sized as `output · ratio` per block and handed to the
    /// stretcher as a zero-copy interleaved view of the track buffer.
    fn render_stretched(
        inner: &mut DeckInner,
        out: &mut [StereoSample],
        frames: usize,
        ratio: f32,
    ) -> usize {
        let stretcher = inner.stretcher.as_mut().expect("stretcher present");
        stretcher.set_ratio(ratio);

        let mut rendered = 0;
        while rendered < frames {
            let block = (frames - rendered).min(STRETCH_BLOCK_FRAMES);
            let wanted = stretcher.input_frames_for(block);
            let available = inner.buffer.frame_count().saturating_sub(inner.position);
            let input_frames = wanted.min(available);
            if input_frames == 0 {
                break;
            }

            let input = &inner.buffer.samples.as_interleaved()
                [inner.position * 2..(inner.position + input_frames) * 2];
            let output: &mut [f32] =
                bytemuck::cast_slice_mut(&mut out[rendered..rendered + block]);

            stretcher.process(input, output);

            inner.position += input_frames;
            rendered += block;
        }

        rendered
    }
}

impl Default for Deck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoBuffer;

    /// Mono sine tone as a stereo audio buffer
    fn sine_buffer(freq: f32, seconds: f32, sample_rate: u32) -> AudioBuffer {
        let frames = (seconds * sample_rate as f32) as usize;
        let samples: Vec<StereoSample> = (0..frames)
            .map(|i| {
                let v = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
                    * 0.5;
                StereoSample::new(v, v)
            })
            .collect();
        AudioBuffer {
            samples: StereoBuffer::from_vec(samples),
            sample_rate,
        }
    }

    #[test]
    fn test_unloaded_deck_renders_silence() {
        let deck = Deck::new();
        let mut out = vec![StereoSample::new(1.0, 1.0); 256];

        let rendered = deck.render(&mut out, 256);
        assert_eq!(rendered, 0);
        assert!(out.iter().all(|s| s.left == 0.0 && s.right == 0.0));
    }

    #[test]
    fn test_paused_deck_renders_silence() {
        let deck = Deck::new();
        deck.load(sine_buffer(440.0, 1.0, 44100), 1).unwrap();

        let mut out = vec![StereoSample::new(1.0, 1.0); 256];
        let rendered = deck.render(&mut out, 256);
        assert_eq!(rendered, 0);
        assert!(out.iter().all(|s| s.left == 0.0));
    }

    #[test]
    fn test_playback_produces_audio_and_advances() {
        let deck = Deck::new();
        deck.load(sine_buffer(440.0, 1.0, 44100), 7).unwrap();
        deck.play();

        assert_eq!(deck.track_id(), 7);
        assert!((deck.duration() - 1.0).abs() < 1e-3);

        let mut out = vec![StereoSample::silence(); 512];
        let rendered = deck.render(&mut out, 512);

        assert_eq!(rendered, 512);
        assert!(out.iter().any(|s| s.left.abs() > 0.01));
        assert!((deck.position() - 512.0 / 44100.0).abs() < 1e-4);
    }

    #[test]
    fn test_end_of_track_zero_fills_and_finishes() {
        let deck = Deck::new();
        // 100 frames of audio only
        let audio = AudioBuffer {
            samples: StereoBuffer::from_vec(vec![StereoSample::new(0.5, 0.5); 100]),
            sample_rate: 44100,
        };
        deck.load(audio, 1).unwrap();
        deck.play();

        let mut out = vec![StereoSample::new(9.0, 9.0); 256];
        let rendered = deck.render(&mut out, 256);

        assert_eq!(rendered, 100);
        assert!(out[100..].iter().all(|s| s.left == 0.0 && s.right == 0.0));
        assert!(deck.is_finished());
    }

    #[test]
    fn test_seek_clamps_and_resets_finished() {
        let deck = Deck::new();
        deck.load(sine_buffer(440.0, 2.0, 44100), 1).unwrap();

        deck.seek(1.0);
        assert!((deck.position() - 1.0).abs() < 1e-3);

        deck.seek(100.0);
        assert!((deck.position() - 2.0).abs() < 1e-3);
        assert!(deck.is_finished());

        deck.seek(0.5);
        assert!(!deck.is_finished());
    }

    #[test]
    fn test_volume_ramps_across_first_change() {
        let deck = Deck::new();
        deck.load(
            AudioBuffer {
                samples: StereoBuffer::from_vec(vec![StereoSample::new(1.0, 1.0); 4096]),
                sample_rate: 44100,
            },
            1,
        )
        .unwrap();
        deck.play();
        deck.set_volume(1.0);

        let mut out = vec![StereoSample::silence(); 256];
        deck.render(&mut out, 256);
        // First block: no previous volume, constant gain
        assert!((out[0].left - 1.0).abs() < 1e-6);
        assert!((out[255].left - 1.0).abs() < 1e-6);

        // Drop the volume; block must ramp from 1.0 down to 0.25
        deck.set_volume(0.25);
        deck.render(&mut out, 256);
        assert!(out[0].left > 0.9);
        assert!((out[255].left - 0.25).abs() < 1e-3);
        // Monotone decrease, no zipper jumps
        for pair in out.windows(2) {
            assert!(pair[1].left <= pair[0].left + 1e-6);
        }
    }

    #[test]
    fn test_stretched_render_produces_frames() {
        let deck = Deck::new();
        deck.load(sine_buffer(440.0, 2.0, 44100), 1).unwrap();
        deck.play();
        deck.set_stretch_ratio(1.05);

        let mut out = vec![StereoSample::silence(); 1024];
        let rendered = deck.render(&mut out, 1024);
        assert_eq!(rendered, 1024);

        // 5% faster: the playhead must have consumed more than 1024 frames
        let consumed = deck.position() * 44100.0;
        assert!(consumed > 1024.0 * 1.03, "consumed {}", consumed);
    }

    #[test]
    fn test_unload_clears_state() {
        let deck = Deck::new();
        deck.load(sine_buffer(440.0, 1.0, 44100), 5).unwrap();
        deck.play();
        deck.set_eq(-12.0, 0.0, 3.0);

        deck.unload();
        assert!(!deck.is_loaded());
        assert!(!deck.is_playing());
        assert_eq!(deck.track_id(), 0);
        assert_eq!(deck.eq(), (0.0, 0.0, 0.0));
        assert_eq!(deck.duration(), 0.0);
    }

    #[test]
    fn test_control_clamping() {
        let deck = Deck::new();
        deck.set_volume(1.7);
        assert_eq!(deck.volume(), 1.0);
        deck.set_stretch_ratio(5.0);
        assert_eq!(deck.stretch_ratio(), 2.0);
        deck.set_eq(-100.0, 50.0, 0.0);
        assert_eq!(deck.eq(), (-60.0, 12.0, 0.0));
    }
}
