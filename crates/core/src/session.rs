use std::path::Path;

use lavoe_engine::{OutputDevice, PlaybackEvent, Scheduler, Transport};
use lavoe_project::{OfflineAudio, load_project, save_project};
use lavoe_render::{render_timeline, write_wav};
use lavoe_transport::{
    BoundAudio, FIRST_MEASURE, MAX_BPM, MIN_BPM, NewBlock, Timeline, TimelineError, TrackId,
    audio_duration_measures, is_valid_bpm,
};
use tokio::sync::mpsc;

use crate::backend::{BackendClient, BackendError, TaskReport};
use crate::config::Config;
use crate::poll::{GenerationError, GenerationStatus, generate_track};

fn file_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

fn extension(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|e| e.to_str())
}

/// One editing session: the timeline under the transport, the output it plays
/// through, and the backend it pulls content from.
pub struct Session {
    config: Config,
    backend: BackendClient,
    transport: Transport,
    events: mpsc::UnboundedReceiver<PlaybackEvent>,
    generation: GenerationStatus,
    /// Bumped whenever the backend's track list changed because of us.
    remote_revision: u64,
}

impl Session {
    pub fn new(
        config: Config,
        timeline: Timeline,
        device: Box<dyn OutputDevice>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            is_valid_bpm(config.bpm),
            "tempo must be within {MIN_BPM}..={MAX_BPM} bpm, got {}",
            config.bpm
        );
        Timeline::check_length(timeline.total_measures())?;
        let backend = BackendClient::new(config.backend_url.clone(), config.request_timeout())?;
        let (transport, events) = Transport::new(Scheduler::new(timeline, config.bpm), device);
        let transport = transport
            .with_seek_settle(config.seek_settle())
            .with_skip_measures(config.skip_measures);
        let bound = transport.attach_sources()?;
        tracing::debug!(bound, "session ready");

        Ok(Self {
            config,
            backend,
            transport,
            events,
            generation: GenerationStatus::Idle,
            remote_revision: 0,
        })
    }

    /// A fresh session with the default Melody, Bass, Drums and Percussion tracks.
    pub fn with_default_tracks(config: Config, device: Box<dyn OutputDevice>) -> anyhow::Result<Self> {
        let timeline = Timeline::with_default_tracks(config.total_measures);
        Self::new(config, timeline, device)
    }

    /// Open a saved arrangement. Its tempo replaces the configured one.
    pub fn from_project(
        path: &Path,
        mut config: Config,
        device: Box<dyn OutputDevice>,
    ) -> anyhow::Result<(Self, Vec<OfflineAudio>)> {
        let loaded = load_project(path)?;
        config.bpm = loaded.bpm;
        config.total_measures = loaded.timeline.total_measures();
        let session = Self::new(config, loaded.timeline, device)?;
        Ok((session, loaded.offline))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn bpm(&self) -> f64 {
        self.transport.with_scheduler(|s| s.bpm())
    }

    /// A snapshot of the timeline. Audio is shared, not copied.
    pub fn timeline(&self) -> Timeline {
        self.transport.with_scheduler(|s| s.timeline().clone())
    }

    pub fn generation_status(&self) -> &GenerationStatus {
        &self.generation
    }

    pub fn remote_revision(&self) -> u64 {
        self.remote_revision
    }

    // Transport

    pub fn play(&mut self) -> bool {
        self.transport.start()
    }

    pub fn stop(&mut self) {
        self.transport.stop();
    }

    pub fn reset(&mut self) {
        self.transport.reset();
    }

    pub fn fast_forward(&mut self) -> f64 {
        self.transport.fast_forward()
    }

    pub fn rewind(&mut self) -> f64 {
        self.transport.rewind()
    }

    pub fn scrub(&mut self, position: f64) {
        self.transport.set_time_direct(position);
    }

    pub fn position(&self) -> f64 {
        self.transport.position()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_running()
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.transport.set_bpm(bpm);
    }

    pub fn toggle_mute(&mut self, track: TrackId) -> Result<bool, TimelineError> {
        self.transport.with_scheduler(|s| s.toggle_mute(track))
    }

    pub fn set_volume(&mut self, track: TrackId, volume: u8) -> Result<(), TimelineError> {
        self.transport.with_scheduler(|s| s.set_volume(track, volume))
    }

    pub async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.events.recv().await
    }

    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    // Content

    /// Add a track playing `audio`, with a block spanning it at the first
    /// measure, and bind it to the output. The timeline is left untouched if
    /// the output cannot take the audio.
    pub fn add_audio_track(
        &mut self,
        name: impl Into<String>,
        audio: BoundAudio,
    ) -> anyhow::Result<TrackId> {
        let name = name.into();
        let bpm = self.bpm();
        let duration = audio_duration_measures(audio.audio.duration_secs(), bpm);
        if !duration.is_finite() {
            return Err(TimelineError::InvalidDuration(duration).into());
        }

        let source = self.transport.create_source(&audio.audio)?;
        let track = self.transport.with_scheduler(|s| {
            let timeline = s.timeline_mut();
            let track = timeline.add_audio_track(name.clone(), audio);
            timeline.add_block(NewBlock::new(name.clone(), track, FIRST_MEASURE, duration))?;
            s.bind_source(track, source);
            Ok::<_, TimelineError>(track)
        })?;

        tracing::info!(%track, name = %name, duration, "added audio track");
        Ok(track)
    }

    /// Add a local audio file without uploading it.
    pub fn add_file(&mut self, path: &Path) -> anyhow::Result<TrackId> {
        let audio = lavoe_decode::decode_file(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Audio")
            .to_string();
        self.add_audio_track(name, BoundAudio::from_file(audio, path))
    }

    /// Upload a file to the backend, then add it to the timeline.
    pub async fn upload_file(&mut self, path: &Path) -> anyhow::Result<TrackId> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("audio")
            .to_string();

        self.backend.upload_audio(&file_name, bytes.clone()).await?;
        self.remote_revision += 1;

        let audio = lavoe_decode::decode_bytes(bytes, extension(&file_name))?;
        self.add_audio_track(file_stem(&file_name), BoundAudio::from_file(audio, path))
    }

    /// Name the next recording gets.
    pub fn next_recording_name(&self) -> String {
        let tracks = self.transport.with_scheduler(|s| s.timeline().tracks().len());
        format!("Recording {}", tracks + 1)
    }

    /// Upload a WAV recording and add it as `Recording N`.
    pub async fn add_recording(&mut self, wav: Vec<u8>) -> anyhow::Result<TrackId> {
        let name = self.next_recording_name();
        self.backend
            .upload_audio(&format!("{name}.wav"), wav.clone())
            .await?;
        self.remote_revision += 1;

        let audio = lavoe_decode::decode_bytes(wav, Some("wav"))?;
        self.add_audio_track(name.clone(), BoundAudio::in_memory(audio, name))
    }

    /// Download a stored track and add it, named after `filename`.
    pub async fn import_remote_track(
        &mut self,
        track_id: &str,
        filename: &str,
    ) -> anyhow::Result<TrackId> {
        let bytes = self.backend.download_track(track_id).await?;
        let audio = lavoe_decode::decode_bytes(bytes, extension(filename))?;
        self.add_audio_track(file_stem(filename), BoundAudio::in_memory(audio, filename))
    }

    /// Ask the backend for a new track and wait until it is composed.
    /// `on_status` sees every status change.
    pub async fn generate_track(
        &mut self,
        prompt: &str,
        mut on_status: impl FnMut(&GenerationStatus),
    ) -> Result<TaskReport, GenerationError> {
        let policy = self.config.poll_policy();
        let generation = &mut self.generation;
        let result = generate_track(&self.backend, prompt, policy, |status| {
            on_status(&status);
            *generation = status;
        })
        .await;

        if result.is_ok() {
            self.remote_revision += 1;
        }
        result
    }

    /// Returns the id of the derived track.
    pub async fn adjust_speed(&mut self, track_id: &str, factor: f64) -> Result<String, BackendError> {
        let derived = self.backend.adjust_speed(track_id, factor).await?;
        self.remote_revision += 1;
        Ok(derived)
    }

    // Files

    /// Render the arrangement to a WAV file.
    pub fn export(&self, path: &Path) -> anyhow::Result<()> {
        let timeline = self.timeline();
        let buffer = render_timeline(
            &timeline,
            self.bpm(),
            self.config.export_sample_rate,
            self.config.export_channels,
        )?;
        write_wav(&buffer, path)?;
        tracing::info!(path = %path.display(), seconds = buffer.duration_secs(), "exported");
        Ok(())
    }

    pub fn save(&self, path: &Path, name: &str) -> anyhow::Result<()> {
        save_project(path, name.to_string(), self.bpm(), &self.timeline())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lavoe_engine::DeviceError;
    use lavoe_engine::testing::FakeDevice;
    use lavoe_transport::AudioArc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config() -> Config {
        Config {
            export_sample_rate: 8000,
            export_channels: 1,
            ..Config::default()
        }
    }

    fn session() -> Session {
        Session::with_default_tracks(config(), Box::new(FakeDevice::new())).unwrap()
    }

    fn tone(seconds: f64) -> BoundAudio {
        BoundAudio::in_memory(AudioArc::new(vec![0.5; (seconds * 8000.0) as usize], 8000, 1), "tone")
    }

    fn write_wav_file(path: &Path, seconds: f64) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(seconds * 8000.0) as usize {
            writer.write_sample(1000i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_starts_with_default_tracks() {
        let session = session();
        let names: Vec<_> = session
            .timeline()
            .tracks()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, ["Melody", "Bass", "Drums", "Percussion"]);
        assert!(session.timeline().tracks().iter().all(|t| t.volume == 75));
        assert_eq!(session.bpm(), 160.0);
    }

    #[test]
    fn test_rejects_invalid_tempo() {
        let config = Config {
            bpm: 0.0,
            ..config()
        };
        assert!(Session::with_default_tracks(config, Box::new(FakeDevice::new())).is_err());

        for bpm in [1e-300, 1e12, f64::NAN] {
            let config = Config { bpm, ..self::config() };
            assert!(Session::with_default_tracks(config, Box::new(FakeDevice::new())).is_err());
        }
    }

    #[test]
    fn test_rejects_invalid_length() {
        let config = Config {
            total_measures: -8.0,
            ..config()
        };
        assert!(Session::with_default_tracks(config, Box::new(FakeDevice::new())).is_err());

        for total in [0.0, 0.5, f64::NAN] {
            let err = Session::new(self::config(), Timeline::new(total), Box::new(FakeDevice::new()))
                .err()
                .unwrap();
            assert!(matches!(
                err.downcast_ref::<TimelineError>(),
                Some(TimelineError::InvalidLength(_))
            ));
        }
    }

    #[test]
    fn test_add_audio_track_places_block_and_binds_source() {
        let mut session = session();
        // 6 s at 160 bpm is 4 measures
        let track = session.add_audio_track("Lead", tone(6.0)).unwrap();

        let timeline = session.timeline();
        let block = timeline.blocks_on_track(track).next().unwrap();
        assert_eq!(block.start, FIRST_MEASURE);
        assert!((block.duration - 4.0).abs() < 1e-9);
        assert_eq!(block.name, "Lead");
        assert!(
            session
                .transport()
                .with_scheduler(|s| s.registry().get(track).is_some())
        );
    }

    #[test]
    fn test_failed_source_leaves_timeline_untouched() {
        let mut session =
            Session::with_default_tracks(config(), Box::new(FakeDevice::failing_sources())).unwrap();

        let err = session.add_audio_track("Lead", tone(6.0)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeviceError>(),
            Some(DeviceError::VoicesExhausted)
        ));
        let timeline = session.timeline();
        assert_eq!(timeline.tracks().len(), 4);
        assert!(timeline.blocks().is_empty());
        assert_eq!(session.next_recording_name(), "Recording 5");
    }

    #[test]
    fn test_playback_and_export_sound_the_same_audio() {
        let dir = tempdir().unwrap();
        let mut timeline = Timeline::new(64.0);
        let voiced = timeline.add_audio_track("Lead", tone(6.0));
        timeline.set_volume(voiced, 100).unwrap();
        let bare = timeline.add_track();
        let own = BoundAudio::in_memory(AudioArc::new(vec![0.25; 16_000], 8000, 1), "own");
        timeline
            .add_block(NewBlock::new("lead", voiced, 1.0, 1.0).with_audio(own.clone()))
            .unwrap();
        timeline
            .add_block(NewBlock::new("stray", bare, 2.0, 1.0).with_audio(own))
            .unwrap();

        let session = Session::new(config(), timeline, Box::new(FakeDevice::new())).unwrap();
        let (live, bare_bound) = session.transport().with_scheduler(|s| {
            (
                s.registry().get(voiced).and_then(|source| source.duration()),
                s.registry().get(bare).is_some(),
            )
        });
        assert_eq!(live, Some(6.0));
        assert!(!bare_bound);

        let path = dir.path().join("mix.wav");
        session.export(&path).unwrap();
        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        // 160 bpm: measure 1 starts at 1.5 s, measure 2 at 3 s
        assert_eq!(samples.len(), 36_000);
        assert_eq!(samples[12_100], 0.5);
        assert!(samples[24_000..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_short_audio_gets_one_measure() {
        let mut session = session();
        let track = session.add_audio_track("Hit", tone(0.2)).unwrap();
        let timeline = session.timeline();
        assert_eq!(timeline.blocks_on_track(track).next().unwrap().duration, 1.0);
    }

    #[test]
    fn test_add_file_names_track_after_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("groove.wav");
        write_wav_file(&path, 1.5);

        let mut session = session();
        let track = session.add_file(&path).unwrap();
        let timeline = session.timeline();
        assert_eq!(timeline.track(track).unwrap().name, "groove");
    }

    #[test]
    fn test_next_recording_name_counts_tracks() {
        let mut session = session();
        assert_eq!(session.next_recording_name(), "Recording 5");
        session.add_audio_track("x", tone(1.0)).unwrap();
        assert_eq!(session.next_recording_name(), "Recording 6");
    }

    #[test]
    fn test_export_matches_timeline_length() {
        let dir = tempdir().unwrap();
        let mut session = session();
        session.add_audio_track("Lead", tone(6.0)).unwrap();

        let path = dir.path().join("mix.wav");
        session.export(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        // block ends at measure 5, 7.5 s at 160 bpm
        assert_eq!(reader.duration(), 60_000);
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempdir().unwrap();
        let wav = dir.path().join("bass.wav");
        write_wav_file(&wav, 3.0);
        let mut session = session();
        let track = session.add_file(&wav).unwrap();
        session.set_volume(track, 60).unwrap();

        let path = dir.path().join("song.lavoe");
        session.save(&path, "Song").unwrap();

        let (reopened, offline) =
            Session::from_project(&path, config(), Box::new(FakeDevice::new())).unwrap();
        assert!(offline.is_empty());
        let timeline = reopened.timeline();
        assert_eq!(timeline.tracks().len(), 5);
        assert_eq!(timeline.track(track).unwrap().volume, 60);
        assert!(
            reopened
                .transport()
                .with_scheduler(|s| s.registry().get(track).is_some())
        );
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected_without_request() {
        let mut session = session();
        let mut seen = Vec::new();
        let err = session
            .generate_track("   ", |s| seen.push(s.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyPrompt));
        assert!(seen.is_empty());
        assert_eq!(session.generation_status(), &GenerationStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_stop_reset() {
        let mut session = session();
        session.add_audio_track("Lead", tone(6.0)).unwrap();

        assert!(session.play());
        // 160 bpm ticks every 93.75 ms
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(session.is_playing());
        assert_eq!(session.position(), 1.0);

        session.stop();
        assert!(!session.is_playing());
        assert_eq!(session.position(), 1.0);

        session.reset();
        assert_eq!(session.position(), 0.0);
        assert!(!session.is_playing());
    }

    #[test]
    fn test_mute_and_volume_unknown_track() {
        let mut session = session();
        assert!(session.toggle_mute(TrackId(99)).is_err());
        assert!(session.set_volume(TrackId(99), 10).is_err());
    }
}
