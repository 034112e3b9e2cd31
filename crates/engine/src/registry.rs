use std::collections::HashMap;
use std::sync::Arc;

use lavoe_transport::TrackId;

use crate::source::AudioSource;

/// Track → live audio source bindings. At most one source per track; bindings
/// live for the whole session.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<TrackId, Arc<dyn AudioSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, track: TrackId) -> Option<&Arc<dyn AudioSource>> {
        self.sources.get(&track)
    }

    /// Bind `source` to `track`. A source already bound to the track is paused
    /// and returned.
    pub fn bind(
        &mut self,
        track: TrackId,
        source: Arc<dyn AudioSource>,
    ) -> Option<Arc<dyn AudioSource>> {
        let previous = self.sources.insert(track, source);
        if let Some(previous) = &previous {
            previous.pause();
        }
        previous
    }

    /// Pause and drop every binding.
    pub fn unbind_all(&mut self) {
        for source in self.sources.values() {
            source.pause();
        }
        self.sources.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &Arc<dyn AudioSource>)> {
        self.sources.iter().map(|(id, source)| (*id, source))
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<dyn AudioSource>> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tracks: Vec<_> = self.sources.keys().collect();
        tracks.sort();
        f.debug_struct("SourceRegistry")
            .field("tracks", &tracks)
            .finish()
    }
}
