use serde::{Deserialize, Serialize};

use crate::audio::BoundAudio;
use crate::time::{FIRST_MEASURE, snap_to_grid};

pub const DEFAULT_TRACK_VOLUME: u8 = 75;

const TRACK_NAMES: [&str; 10] = [
    "Melody",
    "Bass",
    "Drums",
    "Percussion",
    "Lead",
    "Pad",
    "Arp",
    "FX",
    "Vocals",
    "Strings",
];

const TRACK_COLORS: [&str; 10] = [
    "blue-600",
    "cyan-500",
    "violet-600",
    "pink-500",
    "emerald-500",
    "orange-500",
    "red-500",
    "yellow-500",
    "indigo-500",
    "purple-500",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    #[default]
    Melody,
    Bass,
    Drums,
    Percussion,
    Vocals,
    Fx,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub color: String,
    pub muted: bool,
    /// 0..=100, linear gain is `volume / 100`.
    pub volume: u8,
    pub audio: Option<BoundAudio>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: color.into(),
            muted: false,
            volume: DEFAULT_TRACK_VOLUME,
            audio: None,
        }
    }

    pub fn gain(&self) -> f32 {
        self.volume as f32 / 100.0
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// A time-positioned region of a track during which the track's source sounds.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub kind: BlockKind,
    pub color: String,
    pub track: TrackId,
    /// Start position in measures.
    pub start: f64,
    /// Length in measures, always > 0.
    pub duration: f64,
    pub audio: Option<BoundAudio>,
}

impl Block {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Half-open membership: `start <= position < start + duration`.
    #[inline]
    pub fn contains(&self, position: f64) -> bool {
        self.start <= position && position < self.end()
    }
}

/// Everything needed to add a block; the timeline assigns the id.
#[derive(Debug, Clone)]
pub struct NewBlock {
    pub name: String,
    pub kind: BlockKind,
    /// Falls back to the owning track's color.
    pub color: Option<String>,
    pub track: TrackId,
    pub start: f64,
    pub duration: f64,
    pub audio: Option<BoundAudio>,
}

impl NewBlock {
    pub fn new(name: impl Into<String>, track: TrackId, start: f64, duration: f64) -> Self {
        Self {
            name: name.into(),
            kind: BlockKind::default(),
            color: None,
            track,
            start,
            duration,
            audio: None,
        }
    }

    pub fn with_kind(mut self, kind: BlockKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_audio(mut self, audio: BoundAudio) -> Self {
        self.audio = Some(audio);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("block references unknown track {0}")]
    UnknownTrack(TrackId),

    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("duplicate track id {0}")]
    DuplicateTrack(TrackId),

    #[error("duplicate block id {0}")]
    DuplicateBlock(BlockId),

    #[error("block duration must be positive, got {0}")]
    InvalidDuration(f64),

    #[error("block start must be a non-negative position, got {0}")]
    InvalidStart(f64),

    #[error("timeline must be at least one measure long, got {0}")]
    InvalidLength(f64),
}

/// The block index: tracks and the blocks positioned on them.
///
/// Blocks keep insertion order, which is also the order the scheduler
/// evaluates them in every tick.
#[derive(Debug, Clone)]
pub struct Timeline {
    tracks: Vec<Track>,
    blocks: Vec<Block>,
    total_measures: f64,
    next_track_id: u64,
    next_block_id: u64,
}

impl Timeline {
    pub fn new(total_measures: f64) -> Self {
        Self {
            tracks: Vec::new(),
            blocks: Vec::new(),
            total_measures,
            next_track_id: 1,
            next_block_id: 1,
        }
    }

    /// Check a length before building a timeline from untrusted input.
    pub fn check_length(total_measures: f64) -> Result<(), TimelineError> {
        if total_measures.is_finite() && total_measures >= FIRST_MEASURE {
            Ok(())
        } else {
            Err(TimelineError::InvalidLength(total_measures))
        }
    }

    /// A timeline with the four session-start tracks.
    pub fn with_default_tracks(total_measures: f64) -> Self {
        let mut timeline = Self::new(total_measures);
        for _ in 0..4 {
            timeline.add_track();
        }
        timeline
    }

    pub fn total_measures(&self) -> f64 {
        self.total_measures
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn blocks_on_track(&self, track: TrackId) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(move |b| b.track == track)
    }

    /// Latest block end, in measures.
    pub fn end_measure(&self) -> f64 {
        self.blocks.iter().map(Block::end).fold(0.0, f64::max)
    }

    /// Add an empty track with the next default name and color.
    pub fn add_track(&mut self) -> TrackId {
        let index = self.tracks.len();
        self.push_track(TRACK_NAMES[index % TRACK_NAMES.len()].to_string(), None)
    }

    /// Add a track carrying its own name and audio.
    pub fn add_audio_track(&mut self, name: impl Into<String>, audio: BoundAudio) -> TrackId {
        self.push_track(name.into(), Some(audio))
    }

    fn push_track(&mut self, name: String, audio: Option<BoundAudio>) -> TrackId {
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;
        let color = TRACK_COLORS[self.tracks.len() % TRACK_COLORS.len()];
        let mut track = Track::new(id, name, color);
        track.audio = audio;
        self.tracks.push(track);
        id
    }

    /// Insert a fully specified track, keeping its id.
    pub fn insert_track(&mut self, track: Track) -> Result<(), TimelineError> {
        if self.track(track.id).is_some() {
            return Err(TimelineError::DuplicateTrack(track.id));
        }
        self.next_track_id = self.next_track_id.max(track.id.0 + 1);
        self.tracks.push(track);
        Ok(())
    }

    pub fn add_block(&mut self, new_block: NewBlock) -> Result<BlockId, TimelineError> {
        let color = match new_block.color {
            Some(color) => color,
            None => self
                .track(new_block.track)
                .map(|t| t.color.clone())
                .unwrap_or_default(),
        };
        let id = BlockId(self.next_block_id);
        self.insert_block(Block {
            id,
            name: new_block.name,
            kind: new_block.kind,
            color,
            track: new_block.track,
            start: new_block.start,
            duration: new_block.duration,
            audio: new_block.audio,
        })?;
        Ok(id)
    }

    /// Insert a fully specified block, keeping its id.
    pub fn insert_block(&mut self, block: Block) -> Result<(), TimelineError> {
        if self.block(block.id).is_some() {
            return Err(TimelineError::DuplicateBlock(block.id));
        }
        self.validate(block.track, block.start, block.duration)?;
        self.next_block_id = self.next_block_id.max(block.id.0 + 1);
        self.blocks.push(block);
        Ok(())
    }

    /// Reposition a block (drag): start snaps to the quarter-measure grid and is
    /// clamped to `[FIRST_MEASURE, total_measures]`.
    pub fn move_block(
        &mut self,
        id: BlockId,
        start: f64,
        track: TrackId,
    ) -> Result<(), TimelineError> {
        if self.track(track).is_none() {
            return Err(TimelineError::UnknownTrack(track));
        }
        if !start.is_finite() {
            return Err(TimelineError::InvalidStart(start));
        }
        let upper = self.total_measures.max(FIRST_MEASURE);
        let start = snap_to_grid(start).clamp(FIRST_MEASURE, upper);
        let block = self.block_mut(id)?;
        block.start = start;
        block.track = track;
        Ok(())
    }

    pub fn set_block_duration(&mut self, id: BlockId, duration: f64) -> Result<(), TimelineError> {
        if !(duration.is_finite() && duration > 0.0) {
            return Err(TimelineError::InvalidDuration(duration));
        }
        self.block_mut(id)?.duration = duration;
        Ok(())
    }

    pub fn set_volume(&mut self, id: TrackId, volume: u8) -> Result<(), TimelineError> {
        self.track_mut(id)?.volume = volume.min(100);
        Ok(())
    }

    pub fn set_muted(&mut self, id: TrackId, muted: bool) -> Result<(), TimelineError> {
        self.track_mut(id)?.muted = muted;
        Ok(())
    }

    pub fn bind_audio(&mut self, id: TrackId, audio: BoundAudio) -> Result<(), TimelineError> {
        self.track_mut(id)?.audio = Some(audio);
        Ok(())
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Track, TimelineError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(TimelineError::UnknownTrack(id))
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut Block, TimelineError> {
        self.blocks
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(TimelineError::UnknownBlock(id))
    }

    fn validate(&self, track: TrackId, start: f64, duration: f64) -> Result<(), TimelineError> {
        if self.track(track).is_none() {
            return Err(TimelineError::UnknownTrack(track));
        }
        if !(start.is_finite() && start >= 0.0) {
            return Err(TimelineError::InvalidStart(start));
        }
        if !(duration.is_finite() && duration > 0.0) {
            return Err(TimelineError::InvalidDuration(duration));
        }
        Ok(())
    }
}
