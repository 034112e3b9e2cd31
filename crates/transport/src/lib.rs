mod audio;
pub mod time;
mod timeline;

pub use audio::{AudioArc, AudioOrigin, BoundAudio, resample_audio_arc};
pub use time::{
    FIRST_MEASURE, MAX_BPM, MIN_BPM, TICK_MEASURES, audio_duration_measures, is_valid_bpm,
    measures_to_seconds, seconds_per_measure, seconds_to_measures, snap_to_grid, tick_period,
};
pub use timeline::{
    Block, BlockId, BlockKind, DEFAULT_TRACK_VOLUME, NewBlock, Timeline, TimelineError, Track,
    TrackId,
};
