//! Per-block playback decisions for a single clock step.

use lavoe_transport::Block;

/// Why a block starts sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCause {
    /// The playhead crossed into the block.
    Entered,
    /// The block starts at 0 and the playhead is leaving 0 (first tick after a
    /// wrap).
    ZeroStart,
    /// Playback was just (re)started with the playhead already inside the
    /// block; audio must pick up mid-block.
    Resumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start(StartCause),
    /// Still inside the block; the source is left alone.
    Continue,
    /// The playhead left the block, in either direction.
    Stop,
    None,
}

impl Transition {
    pub fn is_start(&self) -> bool {
        matches!(self, Transition::Start(_))
    }
}

pub fn detect(prev: f64, next: f64, just_resumed: bool, block: &Block) -> Transition {
    let was_in = block.contains(prev);
    let is_in = block.contains(next);

    if is_in {
        if just_resumed {
            return Transition::Start(StartCause::Resumed);
        }
        if !was_in {
            return Transition::Start(StartCause::Entered);
        }
        if block.start == 0.0 && prev == 0.0 {
            return Transition::Start(StartCause::ZeroStart);
        }
        return Transition::Continue;
    }

    if was_in {
        Transition::Stop
    } else {
        Transition::None
    }
}
