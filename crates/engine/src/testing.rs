//! In-memory stand-ins for audio sources and the output device.
//!
//! `FakeSource::play` can be told to succeed, fail, or resolve after a delay,
//! which is how the race between play completions and stop/seek is exercised.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lavoe_transport::AudioArc;

use crate::device::{DeviceError, OutputDevice};
use crate::source::{AudioSource, PlayFuture, SourceError};

#[derive(Debug, Clone, PartialEq)]
pub enum PlayBehavior {
    Succeed,
    Fail(SourceError),
    /// Resolve successfully after the given delay (tokio time).
    Delay(Duration),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FakeState {
    pub position: f64,
    pub playing: bool,
    pub volume: f32,
    pub play_calls: usize,
    pub pause_calls: usize,
    pub seeks: Vec<f64>,
}

#[derive(Debug)]
pub struct FakeSource {
    duration: Option<f64>,
    behavior: Mutex<PlayBehavior>,
    state: Mutex<FakeState>,
}

impl FakeSource {
    pub fn new(duration: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            duration,
            behavior: Mutex::new(PlayBehavior::Succeed),
            state: Mutex::new(FakeState {
                volume: 1.0,
                ..FakeState::default()
            }),
        })
    }

    pub fn with_behavior(duration: Option<f64>, behavior: PlayBehavior) -> Arc<Self> {
        let source = Self::new(duration);
        source.set_behavior(behavior);
        source
    }

    pub fn set_behavior(&self, behavior: PlayBehavior) {
        *self.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    pub fn state(&self) -> FakeState {
        self.lock().clone()
    }

    pub fn play_calls(&self) -> usize {
        self.lock().play_calls
    }

    pub fn last_seek(&self) -> Option<f64> {
        self.lock().seeks.last().copied()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioSource for FakeSource {
    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn position(&self) -> f64 {
        self.lock().position
    }

    fn seek(&self, seconds: f64) {
        let mut state = self.lock();
        state.position = seconds;
        state.seeks.push(seconds);
    }

    fn set_volume(&self, gain: f32) {
        self.lock().volume = gain;
    }

    fn play(&self) -> PlayFuture {
        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut state = self.lock();
        state.play_calls += 1;
        match behavior {
            PlayBehavior::Succeed => {
                state.playing = true;
                Box::pin(std::future::ready(Ok(())))
            }
            PlayBehavior::Fail(error) => {
                state.playing = false;
                Box::pin(std::future::ready(Err(error)))
            }
            PlayBehavior::Delay(delay) => {
                state.playing = true;
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
            }
        }
    }

    fn pause(&self) {
        let mut state = self.lock();
        state.playing = false;
        state.pause_calls += 1;
    }

    fn is_playing(&self) -> bool {
        self.lock().playing
    }
}

/// Output device that hands out `FakeSource`s and starts out suspended.
#[derive(Debug, Default)]
pub struct FakeDevice {
    suspended: AtomicBool,
    fail_resume: AtomicBool,
    fail_sources: AtomicBool,
    resumes: AtomicUsize,
    sources: Mutex<Vec<Arc<FakeSource>>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            suspended: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn failing_resume() -> Self {
        let device = Self::new();
        device.fail_resume.store(true, Ordering::SeqCst);
        device
    }

    /// A device that runs out of voices on every `create_source`.
    pub fn failing_sources() -> Self {
        let device = Self::new();
        device.fail_sources.store(true, Ordering::SeqCst);
        device
    }

    pub fn resume_calls(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// Every source handed out so far, in creation order.
    pub fn sources(&self) -> Vec<Arc<FakeSource>> {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl OutputDevice for FakeDevice {
    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn resume(&self) -> Result<(), DeviceError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(DeviceError::Resume("device refused to resume".to_string()));
        }
        self.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn create_source(&self, audio: &AudioArc) -> Result<Arc<dyn AudioSource>, DeviceError> {
        if self.fail_sources.load(Ordering::SeqCst) {
            return Err(DeviceError::VoicesExhausted);
        }
        let source = FakeSource::new(Some(audio.duration_secs()));
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(source.clone());
        Ok(source)
    }
}
