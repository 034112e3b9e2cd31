//! The controllable audio handle the scheduler drives, one per track.

use std::future::Future;
use std::pin::Pin;

/// Completion of a `play()` request. Resolves once playback actually started
/// or was refused.
pub type PlayFuture = Pin<Box<dyn Future<Output = Result<(), SourceError>> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// The output refused to start (suspended device, autoplay policy).
    #[error("playback not allowed: {0}")]
    NotAllowed(String),

    #[error("audio could not be decoded: {0}")]
    Decode(String),

    #[error("audio output unavailable: {0}")]
    Unavailable(String),
}

/// A seekable, playable, pausable, volume-adjustable audio handle.
///
/// All methods except `play` take effect immediately. `play` returns a future
/// the caller may await or hand off; dropping it does not cancel playback.
pub trait AudioSource: Send + Sync {
    /// Length in seconds, `None` while unknown.
    fn duration(&self) -> Option<f64>;

    /// Current playback offset in seconds.
    fn position(&self) -> f64;

    fn seek(&self, seconds: f64);

    /// Linear gain, 0.0..=1.0.
    fn set_volume(&self, gain: f32);

    fn play(&self) -> PlayFuture;

    fn pause(&self);

    fn is_playing(&self) -> bool;
}
