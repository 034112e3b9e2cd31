use crate::{Project, ProjectError, project_root};
use lavoe_transport::{AudioArc, Block, BlockId, BoundAudio, Timeline, Track, TrackId};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// What a piece of offline audio belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOwner {
    Track(TrackId),
    Block(BlockId),
}

/// Audio referenced by the arrangement that could not be loaded. The track or
/// block is still loaded, just without audio.
#[derive(Debug, Clone)]
pub struct OfflineAudio {
    pub owner: AudioOwner,
    /// Path as resolved against the arrangement's directory.
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug)]
pub struct LoadedProject {
    pub name: String,
    pub bpm: f64,
    pub timeline: Timeline,
    pub offline: Vec<OfflineAudio>,
}

#[derive(Debug, Clone)]
pub struct ProjectMetadata {
    pub name: String,
    pub bpm: f64,
    pub total_measures: f64,
    pub track_count: usize,
    pub block_count: usize,
}

fn load_project_data(path: &Path) -> Result<Project, ProjectError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    // Try JSON first, fall back to MessagePack
    serde_json::from_reader(reader).or_else(|_| {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        rmp_serde::decode::from_read(reader).map_err(ProjectError::from)
    })
}

pub fn load_project_metadata(path: &Path) -> Result<ProjectMetadata, ProjectError> {
    let project = load_project_data(path)?;

    Ok(ProjectMetadata {
        name: project.name,
        bpm: project.bpm,
        total_measures: project.total_measures,
        track_count: project.tracks.len(),
        block_count: project.blocks.len(),
    })
}

/// Decodes each referenced file once, however many tracks and blocks use it.
#[derive(Default)]
struct AudioCache {
    decoded: HashMap<PathBuf, AudioArc>,
}

impl AudioCache {
    fn load(&mut self, path: &Path) -> anyhow::Result<AudioArc> {
        if let Some(audio) = self.decoded.get(path) {
            return Ok(audio.clone());
        }
        let audio = lavoe_decode::decode_file(path)?;
        self.decoded.insert(path.to_path_buf(), audio.clone());
        Ok(audio)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Load an arrangement and decode the audio it references.
///
/// Unreadable files and malformed arrangements are errors. Audio that is
/// missing or cannot be decoded is reported in [`LoadedProject::offline`].
pub fn load_project(path: &Path) -> Result<LoadedProject, ProjectError> {
    let project = load_project_data(path)?;
    Timeline::check_length(project.total_measures)?;
    let root = project_root(path);

    let mut cache = AudioCache::default();
    let mut offline = Vec::new();
    let mut timeline = Timeline::new(project.total_measures);

    let mut bind = |owner: AudioOwner, relative: &Path| -> Option<BoundAudio> {
        let resolved = resolve(root, relative);
        match cache.load(&resolved) {
            Ok(audio) => Some(BoundAudio::from_file(audio, resolved)),
            Err(err) => {
                tracing::warn!(path = %resolved.display(), ?owner, "audio offline: {err:#}");
                offline.push(OfflineAudio {
                    owner,
                    path: resolved,
                    error: format!("{err:#}"),
                });
                None
            }
        }
    };

    for data in &project.tracks {
        let id = TrackId(data.id);
        let mut track = Track::new(id, data.name.clone(), data.color.clone());
        track.muted = data.muted;
        track.volume = data.volume.min(100);
        track.audio = data
            .audio_path
            .as_deref()
            .and_then(|p| bind(AudioOwner::Track(id), p));
        timeline.insert_track(track)?;
    }

    for data in &project.blocks {
        let id = BlockId(data.id);
        let audio = data
            .audio_path
            .as_deref()
            .and_then(|p| bind(AudioOwner::Block(id), p));
        let track = TrackId(data.track_id);
        timeline.insert_block(Block {
            id,
            name: data.name.clone(),
            kind: data.kind,
            color: data.color.clone(),
            track,
            start: data.start,
            duration: data.duration,
            audio: audio.clone(),
        })?;

        // Playback and export sound track audio only, so a block's file
        // stands in for a track that has none.
        if let Some(audio) = audio {
            if timeline.track(track).is_some_and(|t| !t.has_audio()) {
                timeline.bind_audio(track, audio)?;
            }
        }
    }

    tracing::info!(
        path = %path.display(),
        tracks = timeline.tracks().len(),
        blocks = timeline.blocks().len(),
        offline = offline.len(),
        "loaded arrangement"
    );

    Ok(LoadedProject {
        name: project.name,
        bpm: project.bpm,
        timeline,
        offline,
    })
}
