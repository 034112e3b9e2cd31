use crate::{BlockData, Project, ProjectError, TrackData, project_root};
use lavoe_transport::{AudioOrigin, BoundAudio, Timeline};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Path to store for `audio`: relative to `root` when it lives below it.
/// In-memory audio has no path and is left out.
fn audio_path(audio: Option<&BoundAudio>, root: &Path, owner: &str) -> Option<PathBuf> {
    match &audio?.origin {
        AudioOrigin::File(path) => Some(
            path.strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone()),
        ),
        AudioOrigin::Memory { name } => {
            tracing::warn!(owner, audio = %name, "in-memory audio is not saved with the arrangement");
            None
        }
    }
}

pub fn save_project(
    path: &Path,
    name: String,
    bpm: f64,
    timeline: &Timeline,
) -> Result<(), ProjectError> {
    let root = project_root(path);

    let project = Project {
        name,
        bpm,
        total_measures: timeline.total_measures(),
        tracks: timeline
            .tracks()
            .iter()
            .map(|track| TrackData {
                id: track.id.0,
                name: track.name.clone(),
                color: track.color.clone(),
                muted: track.muted,
                volume: track.volume,
                audio_path: audio_path(track.audio.as_ref(), root, &track.name),
            })
            .collect(),
        blocks: timeline
            .blocks()
            .iter()
            .map(|block| BlockData {
                id: block.id.0,
                name: block.name.clone(),
                kind: block.kind,
                color: block.color.clone(),
                track_id: block.track.0,
                start: block.start,
                duration: block.duration,
                audio_path: audio_path(block.audio.as_ref(), root, &block.name),
            })
            .collect(),
    };

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &project)?;

    tracing::info!(path = %path.display(), "saved arrangement");
    Ok(())
}
