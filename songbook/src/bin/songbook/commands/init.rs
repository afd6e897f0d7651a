use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

use crate::context::{CONFIG_FILE, SongbookConfig};
use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Initialize",
    commands: &[
        "songbook init              # Write songbook.toml with default settings",
        "songbook init --force      # Overwrite an existing songbook.toml",
    ],
}];

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

pub async fn handle_init(args: InitArgs, output: &OutputManager) -> Result<()> {
    let root = std::env::current_dir().context("Failed to get current directory")?;
    output.heading("Initialize songbook");

    let written = write_default_config(&root, args.force)?;
    if !written {
        output.warning(&format!("{CONFIG_FILE} already exists"));
        output.info("Use --force to overwrite it.");
        return Ok(());
    }

    output.success(&format!("Created {CONFIG_FILE}"));
    output.info("Next steps:");
    output.bullet("Point [database] url at the database to migrate (default: ${DATABASE_URL})");
    output.bullet("List renamed, moved and removed modules under [migration]");
    output.bullet("Run 'songbook migrate plan' to review the steps");
    Ok(())
}

/// Returns `false` when the file exists and `force` is not set.
fn write_default_config(root: &Path, force: bool) -> Result<bool> {
    let path = root.join(CONFIG_FILE);
    if path.exists() && !force {
        return Ok(false);
    }
    let content = toml::to_string_pretty(&SongbookConfig::default())
        .context("Failed to serialize default configuration")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProjectContext;

    #[test]
    fn default_config_round_trips_through_project_context() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(write_default_config(dir.path(), false).unwrap());
        assert!(!write_default_config(dir.path(), false).unwrap());

        let ctx = ProjectContext::from_root(dir.path().to_path_buf()).unwrap();
        assert_eq!(ctx.config, SongbookConfig::default());
    }
}
