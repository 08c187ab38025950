//! Main engine facade
//!
//! Wires the track store, decoder, playlist generator, and scheduler
//! together and exposes the host-facing control surface. The scheduler
//! receives a track-loader closure capturing the store and decoder at
//! construction, so no component holds a back-pointer to the engine.

use std::sync::{Arc, Mutex};

use crate::decoder::{AudioDecoder, WavDecoder};
use crate::error::{EngineError, EngineResult};
use crate::matcher::{Playlist, PlaylistGenerator, PlaylistRules, TransitionConfig};
use crate::store::{TrackRecord, TrackStore};
use crate::types::{PlaybackState, Sample, StereoSample, MAX_BUFFER_FRAMES};

use super::scheduler::{Scheduler, StatusCallback};

/// The automatic DJ engine
///
/// Control methods run on the host's control thread; [`render`] is the
/// only method meant for the audio thread. Pair every active playback
/// session with periodic [`poll`] calls (roughly every 10-50 ms).
///
/// [`render`]: Self::render
/// [`poll`]: Self::poll
pub struct AutoMixEngine {
    store: Arc<dyn TrackStore>,
    generator: Mutex<PlaylistGenerator>,
    scheduler: Arc<Scheduler>,
    transition_config: Mutex<TransitionConfig>,
    last_error: Mutex<Option<String>>,
}

impl AutoMixEngine {
    /// Create an engine over a track store, decoding with the bundled
    /// WAV decoder
    pub fn new(store: Arc<dyn TrackStore>) -> Self {
        Self::with_decoder(store, Arc::new(WavDecoder::new()))
    }

    /// Create an engine with a custom decoder implementation
    pub fn with_decoder(store: Arc<dyn TrackStore>, decoder: Arc<dyn AudioDecoder>) -> Self {
        let scheduler = Arc::new(Scheduler::new(MAX_BUFFER_FRAMES));

        // The loader capability breaks the engine <-> scheduler cycle:
        // the scheduler only ever sees this closure
        let loader_store = Arc::clone(&store);
        let loader_decoder = Arc::clone(&decoder);
        scheduler.set_track_loader(Box::new(move |track_id| {
            let track = loader_store
                .get_track(track_id)
                .ok_or(EngineError::TrackNotFound(track_id))?;
            loader_decoder.decode(&track.path)
        }));

        Self {
            store,
            generator: Mutex::new(PlaylistGenerator::new()),
            scheduler,
            transition_config: Mutex::new(TransitionConfig::default()),
            last_error: Mutex::new(None),
        }
    }

    // --- Track library ---

    /// Number of analyzed tracks in the store
    pub fn track_count(&self) -> usize {
        self.store.track_count()
    }

    /// Fetch a single track record
    pub fn get_track(&self, id: i64) -> Option<TrackRecord> {
        self.store.get_track(id)
    }

    /// List every track record
    pub fn all_tracks(&self) -> Vec<TrackRecord> {
        self.store.all_tracks()
    }

    /// Substring search over track paths
    pub fn search_tracks(&self, pattern: &str) -> Vec<TrackRecord> {
        self.store.search(pattern)
    }

    // --- Playlist building ---

    /// Generate a playlist from a seed track
    ///
    /// Pure with respect to the stored records: nothing about playback
    /// changes until the playlist is handed to [`play`](Self::play).
    pub fn generate_playlist(
        &self,
        seed_track_id: i64,
        count: usize,
        rules: &PlaylistRules,
    ) -> EngineResult<Playlist> {
        let seed = self
            .store
            .get_track(seed_track_id)
            .ok_or(EngineError::TrackNotFound(seed_track_id))?;

        let candidates = self.store.all_tracks();
        let config = *self.transition_config.lock().unwrap();

        Ok(self
            .generator
            .lock()
            .unwrap()
            .generate(&seed, &candidates, count, rules, &config))
    }

    /// Build a playlist over an explicit track order
    ///
    /// Unknown ids are skipped with a warning; transitions are planned
    /// between each surviving consecutive pair.
    pub fn create_playlist(&self, track_ids: &[i64]) -> EngineResult<Playlist> {
        if track_ids.is_empty() {
            return Err(EngineError::InvalidArgument("no track ids given".into()));
        }

        let mut tracks = Vec::with_capacity(track_ids.len());
        for &id in track_ids {
            match self.store.get_track(id) {
                Some(track) => tracks.push(track),
                None => log::warn!("create_playlist: track {} not in store, skipping", id),
            }
        }

        if tracks.is_empty() {
            return Err(EngineError::TrackNotFound(track_ids[0]));
        }

        let config = *self.transition_config.lock().unwrap();
        Ok(self
            .generator
            .lock()
            .unwrap()
            .create_with_transitions(&tracks, &config))
    }

    // --- Playback control (control thread) ---

    /// Load a playlist into the scheduler and start playback
    ///
    /// Returns false on failure; the reason is available from
    /// [`last_error`](Self::last_error). A failed load of the first
    /// track leaves the engine stopped.
    pub fn play(&self, playlist: &Playlist) -> bool {
        if let Err(e) = self.scheduler.load_playlist(playlist.clone()) {
            log::error!("play failed: {}", e);
            *self.last_error.lock().unwrap() = Some(e.to_string());
            return false;
        }
        if let Err(e) = self.scheduler.play() {
            *self.last_error.lock().unwrap() = Some(e.to_string());
            return false;
        }
        true
    }

    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Jump to the next track via a normal transition
    pub fn skip(&self) {
        self.scheduler.skip();
    }

    /// Seek within the active track
    pub fn seek(&self, position_seconds: f32) {
        self.scheduler.seek(position_seconds);
    }

    /// Service scheduler flags; delivers status callbacks
    pub fn poll(&self) {
        self.scheduler.poll();
    }

    /// Replace the transition configuration (next transition onward)
    pub fn set_transition_config(&self, config: TransitionConfig) -> EngineResult<()> {
        config.validate()?;
        *self.transition_config.lock().unwrap() = config;
        self.scheduler.set_transition_config(config);
        Ok(())
    }

    /// Install the status callback, invoked from `poll` only
    pub fn set_status_callback(&self, callback: StatusCallback) {
        self.scheduler.set_status_callback(callback);
    }

    // --- Playback state ---

    pub fn playback_state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    /// Playhead of the active track in seconds
    pub fn playback_position(&self) -> f32 {
        self.scheduler.position()
    }

    /// Id of the active track (0 when nothing is loaded)
    pub fn current_track_id(&self) -> i64 {
        self.scheduler.current_track_id()
    }

    /// Most recent control-path error
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap()
            .clone()
            .or_else(|| self.scheduler.last_error())
    }

    // --- Audio thread ---

    /// Render `frames` stereo frames into an interleaved f32 buffer
    ///
    /// The only engine method intended for the audio thread. `buffer`
    /// must hold at least `frames * 2` floats.
    pub fn render(&self, buffer: &mut [Sample], frames: usize, sample_rate: u32) -> usize {
        let frames = frames.min(buffer.len() / 2);
        let stereo: &mut [StereoSample] = bytemuck::cast_slice_mut(&mut buffer[..frames * 2]);
        self.scheduler.render(stereo, frames, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTrackStore;
    use crate::types::{AudioBuffer, StereoBuffer};

    /// Decoder producing synthetic tones keyed by path suffix
    struct ToneDecoder;

    impl AudioDecoder for ToneDecoder {
        fn decode(&self, path: &str) -> EngineResult<AudioBuffer> {
            let freq: f32 = path
                .rsplit('/')
                .next()
                .and_then(|name| name.strip_suffix(".wav"))
                .and_then(|stem| stem.parse().ok())
                .ok_or_else(|| EngineError::LoadFailed(format!("bad test path {}", path)))?;

            let frames = 44100 * 2;
            let samples: Vec<StereoSample> = (0..frames)
                .map(|i| {
                    let v =
                        (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin() * 0.4;
                    StereoSample::new(v, v)
                })
                .collect();
            Ok(AudioBuffer {
                samples: StereoBuffer::from_vec(samples),
                sample_rate: 44100,
            })
        }
    }

    fn record(id: i64, bpm: f32, freq: u32) -> TrackRecord {
        let beat_interval = 60.0 / bpm;
        TrackRecord {
            id,
            path: format!("/tones/{}.wav", freq),
            bpm,
            key: "8A".to_string(),
            beats: (0..(120.0 / beat_interval) as usize)
                .map(|i| i as f32 * beat_interval)
                .collect(),
            energy_curve: vec![0.5; 50],
            duration: 120.0,
            ..Default::default()
        }
    }

    fn engine_with_tones() -> AutoMixEngine {
        let store = Arc::new(MemoryTrackStore::new());
        store.insert(record(1, 128.0, 440));
        store.insert(record(2, 126.0, 880));
        store.insert(record(3, 130.0, 660));
        AutoMixEngine::with_decoder(store, Arc::new(ToneDecoder))
    }

    #[test]
    fn test_store_passthrough() {
        let engine = engine_with_tones();
        assert_eq!(engine.track_count(), 3);
        assert_eq!(engine.get_track(2).unwrap().path, "/tones/880.wav");
        assert!(engine.get_track(42).is_none());
        assert_eq!(engine.search_tracks("880").len(), 1);
    }

    #[test]
    fn test_generate_playlist_from_seed() {
        let engine = engine_with_tones();
        let rules = PlaylistRules {
            random_seed: 42,
            ..Default::default()
        };

        let playlist = engine.generate_playlist(1, 3, &rules).unwrap();
        assert_eq!(playlist.len(), 3);
        assert_eq!(playlist.track_ids()[0], 1);
    }

    #[test]
    fn test_generate_playlist_unknown_seed() {
        let engine = engine_with_tones();
        assert!(matches!(
            engine.generate_playlist(99, 3, &PlaylistRules::default()),
            Err(EngineError::TrackNotFound(99))
        ));
    }

    #[test]
    fn test_create_playlist_skips_unknown_ids() {
        let engine = engine_with_tones();
        let playlist = engine.create_playlist(&[3, 42, 1]).unwrap();
        assert_eq!(playlist.track_ids(), vec![3, 1]);
        assert!(playlist.entries[0].transition_to_next.is_some());
    }

    #[test]
    fn test_create_playlist_rejects_empty() {
        let engine = engine_with_tones();
        assert!(matches!(
            engine.create_playlist(&[]),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.create_playlist(&[404]),
            Err(EngineError::TrackNotFound(404))
        ));
    }

    #[test]
    fn test_play_and_render_interleaved() {
        let engine = engine_with_tones();
        let playlist = engine.create_playlist(&[1, 2]).unwrap();
        assert!(engine.play(&playlist));
        assert_eq!(engine.playback_state(), PlaybackState::Playing);
        assert_eq!(engine.current_track_id(), 1);

        let mut buffer = vec![0.0f32; 512 * 2];
        let rendered = engine.render(&mut buffer, 512, 44100);
        assert_eq!(rendered, 512);
        assert!(buffer.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn test_pause_renders_exact_silence() {
        let engine = engine_with_tones();
        let playlist = engine.create_playlist(&[1, 2]).unwrap();
        assert!(engine.play(&playlist));

        engine.pause();
        let mut buffer = vec![1.0f32; 512 * 2];
        engine.render(&mut buffer, 512, 44100);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_invalid_transition_config_rejected() {
        let engine = engine_with_tones();
        let bad = TransitionConfig {
            min_transition_seconds: 10.0,
            max_transition_seconds: 5.0,
            ..Default::default()
        };
        assert!(matches!(
            engine.set_transition_config(bad),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(engine.set_transition_config(TransitionConfig::default()).is_ok());
    }

    #[test]
    fn test_play_with_missing_audio_leaves_stopped() {
        let store = Arc::new(MemoryTrackStore::new());
        store.insert(TrackRecord {
            id: 1,
            path: "/nonexistent.wav".into(),
            bpm: 120.0,
            duration: 60.0,
            ..Default::default()
        });
        let engine = AutoMixEngine::new(store);

        let playlist = engine.create_playlist(&[1]).unwrap();
        assert!(!engine.play(&playlist));
        assert_eq!(engine.playback_state(), PlaybackState::Stopped);
        assert!(engine.last_error().is_some());
    }
}
