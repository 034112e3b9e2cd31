//! Owned scheduler state and the synchronous half of the transport.
//!
//! Everything here runs to completion without awaiting: a tick, a stop, a
//! seek. Play completions are handed back to the caller as `PlayRequest`s so
//! the async layer can observe them; the scheduler itself never awaits audio.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lavoe_transport::{BlockId, Timeline, TimelineError, TrackId};

use crate::clock::{Clock, Step};
use crate::detector::{StartCause, Transition, detect};
use crate::driver::{DriveOutcome, PlayRequest, PlaybackDriver};
use crate::registry::SourceRegistry;
use crate::source::AudioSource;

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub prev: f64,
    pub next: f64,
    pub wrapped: bool,
    pub requests: Vec<PlayRequest>,
    pub stopped: Vec<BlockId>,
}

pub struct Scheduler {
    timeline: Timeline,
    registry: SourceRegistry,
    driver: PlaybackDriver,
    clock: Clock,
    running: bool,
    just_resumed: bool,
    /// Bumped whenever audio is cut (stop, reset, seek) so that play
    /// completions issued before the cut can tell they are stale.
    epoch: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(timeline: Timeline, bpm: f64) -> Self {
        let clock = Clock::new(timeline.total_measures());
        Self {
            timeline,
            registry: SourceRegistry::new(),
            driver: PlaybackDriver::new(bpm),
            clock,
            running: false,
            just_resumed: false,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn bind_source(&mut self, track: TrackId, source: Arc<dyn AudioSource>) {
        self.registry.bind(track, source);
    }

    pub fn position(&self) -> f64 {
        self.clock.position()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn just_resumed(&self) -> bool {
        self.just_resumed
    }

    pub fn bpm(&self) -> f64 {
        self.driver.bpm()
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.driver.set_bpm(bpm);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn epoch_handle(&self) -> Arc<AtomicU64> {
        self.epoch.clone()
    }

    /// Enter the running state. Returns false if already running.
    pub fn begin(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.just_resumed = true;
        tracing::info!(
            tracks = self.timeline.tracks().len(),
            sources = self.registry.len(),
            position = self.clock.position(),
            "playback started"
        );
        true
    }

    /// Advance the clock one step and apply every block's transition.
    pub fn tick(&mut self) -> TickReport {
        if !self.running {
            return TickReport::default();
        }

        let step = self.clock.next_step();
        let mut report = self.evaluate(step, self.just_resumed);

        if self.just_resumed {
            tracing::debug!("clearing resume flag after first tick");
            self.just_resumed = false;
        }

        report.wrapped = self.clock.commit(step);
        report
    }

    fn evaluate(&self, step: Step, just_resumed: bool) -> TickReport {
        let epoch = self.epoch();
        let mut report = TickReport {
            prev: step.prev,
            next: step.next,
            ..TickReport::default()
        };

        for block in self.timeline.blocks() {
            let transition = detect(step.prev, step.next, just_resumed, block);
            if matches!(transition, Transition::Continue | Transition::None) {
                continue;
            }
            let Some(track) = self.timeline.track(block.track) else {
                tracing::error!(block = %block.id, track = %block.track, "block references a missing track");
                continue;
            };
            match self
                .driver
                .drive(transition, block, track, &self.registry, step.next, epoch)
            {
                DriveOutcome::Started(request) => report.requests.push(request),
                DriveOutcome::Stopped => report.stopped.push(block.id),
                DriveOutcome::Skipped(_) | DriveOutcome::Idle => {}
            }
        }

        report
    }

    /// Leave the running state and pause every source, keeping their offsets.
    pub fn halt(&mut self) {
        self.running = false;
        self.just_resumed = false;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for source in self.registry.sources() {
            source.pause();
        }
        tracing::info!(position = self.clock.position(), "playback stopped");
    }

    /// Halt, return to 0, rewind every source of known length, and arm the
    /// resume flag so a block spanning 0 is picked up by the next start.
    pub fn reset(&mut self) {
        self.halt();
        self.clock.set(0.0);
        for source in self.registry.sources() {
            if source.duration().is_some_and(f64::is_finite) {
                source.seek(0.0);
            }
        }
        self.just_resumed = true;
    }

    /// Jump by `delta` measures, silencing and rewinding every source. While
    /// running, [`Scheduler::resync`] must follow to restart audio.
    pub fn seek_relative(&mut self, delta: f64) -> f64 {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for source in self.registry.sources() {
            source.pause();
            source.seek(0.0);
        }
        let position = self.clock.seek_relative(delta);
        tracing::info!(delta, position, "seek");
        position
    }

    /// Start every block containing the current position, mid-block. A direct
    /// one-shot re-sync, not a tick: the clock does not move.
    pub fn resync(&self) -> Vec<PlayRequest> {
        if !self.running {
            return Vec::new();
        }
        let position = self.clock.position();
        let epoch = self.epoch();
        let mut requests = Vec::new();
        for block in self.timeline.blocks().iter().filter(|b| b.contains(position)) {
            let Some(track) = self.timeline.track(block.track) else {
                continue;
            };
            if let DriveOutcome::Started(request) = self.driver.drive(
                Transition::Start(StartCause::Resumed),
                block,
                track,
                &self.registry,
                position,
                epoch,
            ) {
                requests.push(request);
            }
        }
        requests
    }

    /// Scrub: move the playhead without touching any source.
    pub fn set_time_direct(&mut self, position: f64) {
        self.clock.set(position);
    }

    /// Mute or unmute a track. Muting silences its source right away, since the
    /// driver will not touch a muted track again to stop it.
    pub fn set_muted(&mut self, track: TrackId, muted: bool) -> Result<(), TimelineError> {
        self.timeline.set_muted(track, muted)?;
        if muted {
            if let Some(source) = self.registry.get(track) {
                source.pause();
            }
        }
        Ok(())
    }

    pub fn toggle_mute(&mut self, track: TrackId) -> Result<bool, TimelineError> {
        let muted = !self
            .timeline
            .track(track)
            .ok_or(TimelineError::UnknownTrack(track))?
            .muted;
        self.set_muted(track, muted)?;
        Ok(muted)
    }

    /// Change a track's volume, applying it to a bound source immediately.
    pub fn set_volume(&mut self, track: TrackId, volume: u8) -> Result<(), TimelineError> {
        self.timeline.set_volume(track, volume)?;
        if let (Some(source), Some(track)) = (self.registry.get(track), self.timeline.track(track)) {
            source.set_volume(track.gain());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("position", &self.clock.position())
            .field("running", &self.running)
            .field("just_resumed", &self.just_resumed)
            .field("bpm", &self.driver.bpm())
            .field("blocks", &self.timeline.blocks().len())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;
    use lavoe_transport::NewBlock;

    struct Fixture {
        scheduler: Scheduler,
        melody: TrackId,
        bass: TrackId,
        melody_source: Arc<FakeSource>,
        bass_source: Arc<FakeSource>,
    }

    fn fixture(total: f64) -> Fixture {
        let timeline = Timeline::with_default_tracks(total);
        let melody = timeline.tracks()[0].id;
        let bass = timeline.tracks()[1].id;
        let mut scheduler = Scheduler::new(timeline, 160.0);
        let melody_source = FakeSource::new(Some(20.0));
        let bass_source = FakeSource::new(Some(20.0));
        scheduler.bind_source(melody, melody_source.clone());
        scheduler.bind_source(bass, bass_source.clone());
        Fixture {
            scheduler,
            melody,
            bass,
            melody_source,
            bass_source,
        }
    }

    fn add_block(scheduler: &mut Scheduler, track: TrackId, start: f64, duration: f64) -> BlockId {
        scheduler
            .timeline_mut()
            .add_block(NewBlock::new("block", track, start, duration))
            .unwrap()
    }

    #[test]
    fn test_tick_is_noop_while_stopped() {
        let mut fx = fixture(64.0);
        let report = fx.scheduler.tick();
        assert!(report.requests.is_empty());
        assert_eq!(fx.scheduler.position(), 0.0);
    }

    #[test]
    fn test_begin_sets_resume_flag_once() {
        let mut fx = fixture(64.0);
        assert!(fx.scheduler.begin());
        assert!(fx.scheduler.just_resumed());
        assert!(!fx.scheduler.begin());

        fx.scheduler.tick();
        assert!(!fx.scheduler.just_resumed());
        assert_eq!(fx.scheduler.position(), 0.25);
    }

    #[test]
    fn test_crossing_a_block_starts_and_stops_once() {
        let mut fx = fixture(64.0);
        let id = add_block(&mut fx.scheduler, fx.melody, 2.0, 1.0);
        fx.scheduler.begin();

        let mut starts = Vec::new();
        let mut stops = Vec::new();
        for _ in 0..20 {
            let report = fx.scheduler.tick();
            starts.extend(report.requests.iter().map(|r| (r.block, report.next)));
            stops.extend(report.stopped.iter().map(|b| (*b, report.next)));
        }

        assert_eq!(starts, vec![(id, 2.0)]);
        assert_eq!(stops, vec![(id, 3.0)]);
        assert_eq!(fx.melody_source.play_calls(), 1);
        assert!(!fx.melody_source.is_playing());
    }

    #[test]
    fn test_resume_inside_block_seeks_mid_block() {
        let mut fx = fixture(64.0);
        add_block(&mut fx.scheduler, fx.melody, 4.0, 4.0);
        fx.scheduler.set_time_direct(5.75);
        fx.scheduler.begin();

        let report = fx.scheduler.tick();
        assert_eq!(report.next, 6.0);
        assert_eq!(report.requests.len(), 1);
        // (6 - 4) measures at 1.5 s per measure
        assert!((report.requests[0].offset - 3.0).abs() < 1e-12);
        assert_eq!(fx.melody_source.last_seek(), Some(report.requests[0].offset));

        // the following tick inside the block does not re-trigger
        let report = fx.scheduler.tick();
        assert!(report.requests.is_empty());
        assert_eq!(fx.melody_source.play_calls(), 1);
    }

    #[test]
    fn test_zero_start_block_after_wrap() {
        let mut fx = fixture(4.0);
        add_block(&mut fx.scheduler, fx.bass, 0.0, 2.0);
        fx.scheduler.begin();

        // resume start at 0.25, then stop at 2.0
        fx.scheduler.tick();
        assert_eq!(fx.bass_source.play_calls(), 1);

        let mut wrapped = false;
        for _ in 0..15 {
            wrapped |= fx.scheduler.tick().wrapped;
        }
        assert!(wrapped);
        assert_eq!(fx.scheduler.position(), 0.0);

        let report = fx.scheduler.tick();
        assert_eq!((report.prev, report.next), (0.0, 0.25));
        assert_eq!(report.requests.len(), 1);
        assert_eq!(report.requests[0].offset, 0.0);
        assert_eq!(fx.bass_source.play_calls(), 2);
    }

    #[test]
    fn test_wrap_sets_position_to_exactly_zero() {
        let mut fx = fixture(8.0);
        fx.scheduler.set_time_direct(7.75);
        fx.scheduler.begin();
        let report = fx.scheduler.tick();
        assert!(report.wrapped);
        assert_eq!(report.next, 8.0);
        assert_eq!(fx.scheduler.position(), 0.0);
    }

    #[test]
    fn test_halt_is_idempotent() {
        let mut fx = fixture(64.0);
        add_block(&mut fx.scheduler, fx.melody, 0.0, 8.0);
        fx.scheduler.begin();
        for _ in 0..6 {
            fx.scheduler.tick();
        }
        let source_offset = fx.melody_source.position();

        fx.scheduler.halt();
        let position = fx.scheduler.position();
        fx.scheduler.halt();

        assert_eq!(fx.scheduler.position(), position);
        assert!(!fx.scheduler.is_running());
        assert!(!fx.scheduler.just_resumed());
        assert!(!fx.melody_source.is_playing());
        assert!(!fx.bass_source.is_playing());
        // offsets are kept on stop
        assert_eq!(fx.melody_source.position(), source_offset);
    }

    #[test]
    fn test_reset_returns_to_zero_from_any_state() {
        for running in [false, true] {
            let mut fx = fixture(64.0);
            fx.scheduler.set_time_direct(12.0);
            fx.melody_source.seek(7.5);
            fx.bass_source.seek(2.0);
            if running {
                fx.scheduler.begin();
                fx.scheduler.tick();
            }

            fx.scheduler.reset();

            assert_eq!(fx.scheduler.position(), 0.0);
            assert_eq!(fx.melody_source.position(), 0.0);
            assert_eq!(fx.bass_source.position(), 0.0);
            assert!(!fx.scheduler.is_running());
            assert!(fx.scheduler.just_resumed());
        }
    }

    #[test]
    fn test_reset_skips_sources_of_unknown_length() {
        let mut fx = fixture(64.0);
        let pending = FakeSource::new(None);
        let drums = fx.scheduler.timeline().tracks()[2].id;
        fx.scheduler.bind_source(drums, pending.clone());
        pending.seek(3.0);

        fx.scheduler.reset();
        assert_eq!(pending.position(), 3.0);
    }

    #[test]
    fn test_stop_bumps_epoch() {
        let mut fx = fixture(64.0);
        let before = fx.scheduler.epoch();
        fx.scheduler.begin();
        fx.scheduler.halt();
        assert_eq!(fx.scheduler.epoch(), before + 1);
    }

    #[test]
    fn test_seek_relative_silences_and_clamps() {
        let mut fx = fixture(64.0);
        drop(fx.melody_source.play());
        fx.melody_source.seek(4.0);
        fx.scheduler.set_time_direct(60.0);

        let position = fx.scheduler.seek_relative(8.0);

        assert_eq!(position, 63.0);
        assert!(!fx.melody_source.is_playing());
        assert_eq!(fx.melody_source.position(), 0.0);
        assert_eq!(fx.scheduler.seek_relative(-100.0), 0.0);
    }

    #[test]
    fn test_resync_starts_blocks_under_playhead() {
        let mut fx = fixture(64.0);
        add_block(&mut fx.scheduler, fx.melody, 8.0, 8.0);
        add_block(&mut fx.scheduler, fx.bass, 20.0, 4.0);
        fx.scheduler.set_time_direct(2.0);
        fx.scheduler.begin();

        fx.scheduler.seek_relative(8.0);
        let requests = fx.scheduler.resync();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].track, fx.melody);
        assert!((requests[0].offset - 3.0).abs() < 1e-12);
        assert_eq!(requests[0].epoch, fx.scheduler.epoch());
        assert_eq!(fx.bass_source.play_calls(), 0);
    }

    #[test]
    fn test_resync_does_nothing_while_stopped() {
        let mut fx = fixture(64.0);
        add_block(&mut fx.scheduler, fx.melody, 0.0, 8.0);
        fx.scheduler.seek_relative(2.0);
        assert!(fx.scheduler.resync().is_empty());
        assert_eq!(fx.melody_source.play_calls(), 0);
    }

    #[test]
    fn test_scrub_has_no_side_effects() {
        let mut fx = fixture(64.0);
        fx.melody_source.seek(5.0);
        fx.scheduler.set_time_direct(30.5);
        assert_eq!(fx.scheduler.position(), 30.5);
        assert_eq!(fx.melody_source.state().seeks, vec![5.0]);
        assert_eq!(fx.melody_source.state().pause_calls, 0);
    }

    #[test]
    fn test_muting_pauses_source() {
        let mut fx = fixture(64.0);
        drop(fx.melody_source.play());
        assert!(fx.scheduler.toggle_mute(fx.melody).unwrap());
        assert!(!fx.melody_source.is_playing());
        assert!(!fx.scheduler.toggle_mute(fx.melody).unwrap());
    }

    #[test]
    fn test_volume_applies_to_bound_source() {
        let mut fx = fixture(64.0);
        fx.scheduler.set_volume(fx.bass, 50).unwrap();
        assert!((fx.bass_source.state().volume - 0.5).abs() < 1e-6);
        assert_eq!(
            fx.scheduler.set_volume(TrackId(99), 50),
            Err(TimelineError::UnknownTrack(TrackId(99)))
        );
    }

    #[test]
    fn test_overlapping_blocks_on_one_track_are_deterministic() {
        let mut fx = fixture(64.0);
        let first = add_block(&mut fx.scheduler, fx.melody, 2.0, 4.0);
        let second = add_block(&mut fx.scheduler, fx.melody, 2.0, 2.0);
        fx.scheduler.set_time_direct(1.75);
        fx.scheduler.begin();
        fx.scheduler.tick();
        fx.scheduler.halt();
        fx.scheduler.set_time_direct(1.75);
        fx.scheduler.begin();

        let report = fx.scheduler.tick();
        let order: Vec<_> = report.requests.iter().map(|r| r.block).collect();
        assert_eq!(order, vec![first, second]);
    }
}
