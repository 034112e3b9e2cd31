mod load;
mod save;

use lavoe_transport::{BlockKind, TimelineError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use load::{
    AudioOwner, LoadedProject, OfflineAudio, ProjectMetadata, load_project, load_project_metadata,
};
pub use save::save_project;

pub const PROJECT_EXTENSION: &str = "lavoe";

/// On-disk arrangement. Audio is referenced by path, relative to the
/// arrangement file where possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub bpm: f64,
    pub total_measures: f64,
    pub tracks: Vec<TrackData>,
    #[serde(default)]
    pub blocks: Vec<BlockData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackData {
    pub id: u64,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub muted: bool,
    pub volume: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub kind: BlockKind,
    pub color: String,
    pub track_id: u64,
    pub start: f64,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("Invalid arrangement: {0}")]
    Timeline(#[from] TimelineError),
}

/// Directory that relative audio paths in the arrangement at `path` resolve against.
fn project_root(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}
