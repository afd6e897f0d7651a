use std::{collections::BTreeMap, sync::Arc};

use crate::descriptor::Operation;
use crate::errors::{SongError, SongResult};
use crate::songs::{self, ShellSong, Song};

/// Songs addressable by name from the migration descriptor.
#[derive(Clone, Default)]
pub struct SongRegistry {
    songs: BTreeMap<String, Arc<dyn Song>>,
}

impl SongRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in song.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        songs::register_builtin(&mut registry);
        registry
    }

    /// Add a song, replacing any song registered under the same name.
    pub fn register(&mut self, song: Arc<dyn Song>) {
        self.songs.insert(song.name().to_string(), song);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Song>> {
        self.songs.get(name).cloned()
    }

    /// Turn a descriptor operation into a playable song.
    pub fn resolve(&self, operation: &Operation) -> SongResult<Arc<dyn Song>> {
        match operation {
            Operation::Song(name) => self
                .get(name)
                .ok_or_else(|| SongError::UnknownSong { name: name.clone() }),
            Operation::Shell { shell } => Ok(Arc::new(ShellSong::new(shell.clone()))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Song>> {
        self.songs.values()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}
