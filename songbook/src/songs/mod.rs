//! Migration songs.
//!
//! A song is one named, idempotent migration script. Songs are looked up
//! by name from the [`SongRegistry`](crate::registry::SongRegistry) and
//! played by the executor.

pub mod migration;
pub mod tools;

use std::{process::Stdio, sync::Arc};

use async_trait::async_trait;
use tokio::process::Command;

use crate::context::MigrationContext;
use crate::errors::{SongError, SongResult};
use crate::executor::play_logged;
use crate::registry::SongRegistry;

#[async_trait]
pub trait Song: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Run the song. Must be safe to call again after a partial failure.
    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()>;
}

/// Composite song playing its children in order through the logging wrapper.
///
/// A child's soft error is logged and the next child runs; a hard error
/// stops the medley.
pub struct Medley {
    name: String,
    description: String,
    songs: Vec<Arc<dyn Song>>,
}

impl Medley {
    pub fn new(name: impl Into<String>, description: impl Into<String>, songs: Vec<Arc<dyn Song>>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            songs,
        }
    }

    pub fn songs(&self) -> &[Arc<dyn Song>] {
        &self.songs
    }
}

#[async_trait]
impl Song for Medley {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        for song in &self.songs {
            play_logged(song.as_ref(), ctx).await?;
        }
        Ok(())
    }
}

/// Shell command run through `sh -c`. Output lines go to the migration log.
pub struct ShellSong {
    name: String,
    command: String,
}

impl ShellSong {
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            name: format!("shell: {command}"),
            command,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Song for ShellSong {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Run a shell command"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            ctx.log_line(line);
        }

        if !output.status.success() {
            return Err(SongError::Command {
                program: self.command.clone(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Register every built-in song.
pub fn register_builtin(registry: &mut SongRegistry) {
    migration::register(registry);
    tools::register(registry);
}
