//! The running transport: a tokio interval drives [`Scheduler::tick`], and
//! every play request it issues is awaited on its own task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lavoe_transport::{AudioArc, BlockId, TrackId, is_valid_bpm, tick_period};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::device::{DeviceError, OutputDevice};
use crate::driver::PlayRequest;
use crate::scheduler::Scheduler;
use crate::source::{AudioSource, SourceError};

pub const DEFAULT_SEEK_SETTLE: Duration = Duration::from_millis(50);
pub const DEFAULT_SKIP_MEASURES: f64 = 8.0;

/// How an issued `play()` turned out.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Playing {
        track: TrackId,
        block: BlockId,
    },
    Failed {
        track: TrackId,
        block: BlockId,
        error: SourceError,
    },
    /// Resolved after a stop, reset or seek made it stale.
    Superseded {
        track: TrackId,
        block: BlockId,
    },
}

fn lock(scheduler: &Mutex<Scheduler>) -> MutexGuard<'_, Scheduler> {
    scheduler.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Transport {
    scheduler: Arc<Mutex<Scheduler>>,
    device: Box<dyn OutputDevice>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    ticker: Option<JoinHandle<()>>,
    seek_settle: Duration,
    skip_measures: f64,
}

impl Transport {
    pub fn new(
        scheduler: Scheduler,
        device: Box<dyn OutputDevice>,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            scheduler: Arc::new(Mutex::new(scheduler)),
            device,
            events,
            ticker: None,
            seek_settle: DEFAULT_SEEK_SETTLE,
            skip_measures: DEFAULT_SKIP_MEASURES,
        };
        (transport, rx)
    }

    pub fn with_seek_settle(mut self, settle: Duration) -> Self {
        self.seek_settle = settle;
        self
    }

    pub fn with_skip_measures(mut self, measures: f64) -> Self {
        self.skip_measures = measures;
        self
    }

    pub fn scheduler(&self) -> Arc<Mutex<Scheduler>> {
        self.scheduler.clone()
    }

    /// Run `f` against the scheduler state.
    pub fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        f(&mut lock(&self.scheduler))
    }

    pub fn position(&self) -> f64 {
        lock(&self.scheduler).position()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.scheduler).is_running()
    }

    /// Create an output source without binding it to any track.
    pub fn create_source(&self, audio: &AudioArc) -> Result<Arc<dyn AudioSource>, DeviceError> {
        self.device.create_source(audio)
    }

    /// Create and bind an output source for `track` from its audio. Returns
    /// false if the track has no audio.
    pub fn attach_track(&self, track: TrackId) -> Result<bool, DeviceError> {
        let mut scheduler = lock(&self.scheduler);
        let Some(audio) = scheduler
            .timeline()
            .track(track)
            .and_then(|t| t.audio.as_ref())
            .map(|bound| bound.audio.clone())
        else {
            return Ok(false);
        };
        let source = self.device.create_source(&audio)?;
        scheduler.bind_source(track, source);
        tracing::debug!(%track, duration = audio.duration_secs(), "bound track audio");
        Ok(true)
    }

    /// Bind every track that has audio but no source yet.
    pub fn attach_sources(&self) -> Result<usize, DeviceError> {
        let pending: Vec<TrackId> = {
            let scheduler = lock(&self.scheduler);
            scheduler
                .timeline()
                .tracks()
                .iter()
                .filter(|t| t.has_audio() && scheduler.registry().get(t.id).is_none())
                .map(|t| t.id)
                .collect()
        };
        let mut bound = 0;
        for track in pending {
            if self.attach_track(track)? {
                bound += 1;
            }
        }
        Ok(bound)
    }

    /// Start playback from the current position. No-op if already running,
    /// in which case the output is not touched either.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        if self.device.is_suspended() {
            if let Err(err) = self.device.resume() {
                tracing::warn!(%err, "could not resume audio output, continuing anyway");
            }
        }
        if !lock(&self.scheduler).begin() {
            return false;
        }
        self.spawn_ticker();
        true
    }

    pub fn stop(&mut self) {
        self.cancel_ticker();
        lock(&self.scheduler).halt();
    }

    pub fn reset(&mut self) {
        self.cancel_ticker();
        lock(&self.scheduler).reset();
    }

    /// Jump by `delta` measures. While running, audio is re-synced at the new
    /// position once the seek has settled; a later seek cancels the pending one.
    pub fn seek_relative(&mut self, delta: f64) -> f64 {
        let (position, running, epoch) = {
            let mut scheduler = lock(&self.scheduler);
            let position = scheduler.seek_relative(delta);
            (position, scheduler.is_running(), scheduler.epoch())
        };
        if running {
            let scheduler = self.scheduler.clone();
            let events = self.events.clone();
            let settle = self.seek_settle;
            tokio::spawn(async move {
                tokio::time::sleep(settle).await;
                let (requests, epoch_handle) = {
                    let guard = lock(&scheduler);
                    if guard.epoch() != epoch {
                        return;
                    }
                    (guard.resync(), guard.epoch_handle())
                };
                for request in requests {
                    spawn_play(request, scheduler.clone(), epoch_handle.clone(), events.clone());
                }
            });
        }
        position
    }

    pub fn fast_forward(&mut self) -> f64 {
        self.seek_relative(self.skip_measures)
    }

    pub fn rewind(&mut self) -> f64 {
        self.seek_relative(-self.skip_measures)
    }

    pub fn set_time_direct(&mut self, position: f64) {
        lock(&self.scheduler).set_time_direct(position);
    }

    /// Change tempo. A running ticker is restarted at the new period.
    /// Tempos outside `MIN_BPM..=MAX_BPM` are ignored.
    pub fn set_bpm(&mut self, bpm: f64) {
        if !is_valid_bpm(bpm) {
            tracing::warn!(bpm, "ignoring invalid tempo");
            return;
        }
        let running = {
            let mut scheduler = lock(&self.scheduler);
            scheduler.set_bpm(bpm);
            scheduler.is_running()
        };
        if running {
            self.cancel_ticker();
            self.spawn_ticker();
        }
    }

    fn spawn_ticker(&mut self) {
        self.cancel_ticker();

        let scheduler = self.scheduler.clone();
        let events = self.events.clone();
        let (period, epoch) = {
            let guard = lock(&scheduler);
            (tick_period(guard.bpm()), guard.epoch_handle())
        };
        tracing::debug!(?period, "starting ticker");

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let report = {
                    let mut guard = lock(&scheduler);
                    if !guard.is_running() {
                        break;
                    }
                    guard.tick()
                };
                if report.wrapped {
                    tracing::debug!("wrapped to start of timeline");
                }
                for request in report.requests {
                    spawn_play(request, scheduler.clone(), epoch.clone(), events.clone());
                }
            }
        }));
    }

    fn cancel_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel_ticker();
    }
}

/// Await one play completion. A completion that lands after the transport
/// moved on is reported as superseded, and silenced if playback is stopped.
fn spawn_play(
    request: PlayRequest,
    scheduler: Arc<Mutex<Scheduler>>,
    epoch: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) {
    let PlayRequest {
        track,
        block,
        block_name,
        epoch: issued,
        source,
        completion,
        ..
    } = request;

    tokio::spawn(async move {
        let result = completion.await;

        let event = if epoch.load(Ordering::SeqCst) != issued {
            if result.is_ok() && !lock(&scheduler).is_running() {
                source.pause();
            }
            tracing::debug!(%track, block = %block_name, "play resolved after transport moved on");
            PlaybackEvent::Superseded { track, block }
        } else {
            match result {
                Ok(()) => PlaybackEvent::Playing { track, block },
                Err(error) => {
                    tracing::warn!(%track, block = %block_name, %error, "audio source failed to play");
                    PlaybackEvent::Failed {
                        track,
                        block,
                        error,
                    }
                }
            }
        };

        // receiver may be gone; nothing else to do then
        let _ = events.send(event);
    });
}
