//! Applies detector decisions to the track's audio source.

use std::sync::Arc;

use lavoe_transport::{Block, BlockId, Track, TrackId, measures_to_seconds};

use crate::detector::{StartCause, Transition};
use crate::registry::SourceRegistry;
use crate::source::{AudioSource, PlayFuture};

/// A `play()` that has been issued but not yet resolved.
pub struct PlayRequest {
    pub track: TrackId,
    pub block: BlockId,
    pub block_name: String,
    /// Offset in seconds the source was seeked to before playing.
    pub offset: f64,
    /// Transport epoch the request was issued under.
    pub epoch: u64,
    pub source: Arc<dyn AudioSource>,
    pub completion: PlayFuture,
}

impl std::fmt::Debug for PlayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayRequest")
            .field("track", &self.track)
            .field("block", &self.block)
            .field("block_name", &self.block_name)
            .field("offset", &self.offset)
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Muted,
    NoSource,
}

#[derive(Debug)]
pub enum DriveOutcome {
    Started(PlayRequest),
    Stopped,
    Skipped(SkipReason),
    Idle,
}

/// Seconds into `block` the audio should be at when the playhead is at `position`.
pub fn block_offset_seconds(position: f64, block: &Block, bpm: f64) -> f64 {
    measures_to_seconds(position - block.start, bpm)
}

#[derive(Debug, Clone)]
pub struct PlaybackDriver {
    bpm: f64,
}

impl PlaybackDriver {
    pub fn new(bpm: f64) -> Self {
        Self { bpm }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
    }

    /// Execute `transition` for `block` on its own track's source only.
    pub fn drive(
        &self,
        transition: Transition,
        block: &Block,
        track: &Track,
        registry: &SourceRegistry,
        position: f64,
        epoch: u64,
    ) -> DriveOutcome {
        if matches!(transition, Transition::Continue | Transition::None) {
            return DriveOutcome::Idle;
        }
        if track.muted {
            return DriveOutcome::Skipped(SkipReason::Muted);
        }
        let Some(source) = registry.get(track.id) else {
            tracing::warn!(track = %track.id, block = %block.name, "no audio source bound to track");
            return DriveOutcome::Skipped(SkipReason::NoSource);
        };

        match transition {
            Transition::Start(cause) => {
                let offset = self.start_offset(cause, block, source.as_ref(), position);
                source.seek(offset);
                source.set_volume(track.gain());
                tracing::debug!(
                    block = %block.name,
                    track = %track.id,
                    ?cause,
                    position,
                    offset,
                    "starting block audio"
                );
                DriveOutcome::Started(PlayRequest {
                    track: track.id,
                    block: block.id,
                    block_name: block.name.clone(),
                    offset,
                    epoch,
                    source: source.clone(),
                    completion: source.play(),
                })
            }
            Transition::Stop => {
                tracing::debug!(block = %block.name, track = %track.id, position, "playhead left block");
                source.pause();
                source.seek(0.0);
                DriveOutcome::Stopped
            }
            Transition::Continue | Transition::None => DriveOutcome::Idle,
        }
    }

    /// Seek target for a start: mid-block on resume, otherwise the top of the
    /// audio. Sources of unknown length cannot be seeked into.
    fn start_offset(
        &self,
        cause: StartCause,
        block: &Block,
        source: &dyn AudioSource,
        position: f64,
    ) -> f64 {
        let offset = block_offset_seconds(position, block, self.bpm);
        if cause == StartCause::Resumed && offset > 0.0 {
            offset.clamp(0.0, source.duration().unwrap_or(0.0))
        } else {
            0.0
        }
    }
}
