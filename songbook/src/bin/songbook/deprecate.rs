//! Rename of the `demo` migration mode to `sample` in a project checkout.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::git;
use crate::shell::CommandRunner;
use crate::utils::search_replace;

const MODE_VARS: [&str; 2] = ["MIGRATION_MODE", "MARABUNTA_MODE"];

const DEMO_DATA_DIR: &str = "odoo/data/demo";
const SAMPLE_DATA_DIR: &str = "odoo/data/sample";
const DEMO_SONG: &str = "odoo/songs/install/data_demo.py";
const SAMPLE_SONGS_DIR: &str = "odoo/songs/sample";
const SAMPLE_SONG: &str = "odoo/songs/sample/data_sample.py";

/// What `demo-to-sample` changed.
#[derive(Debug, Default, Serialize)]
pub struct DeprecationReport {
    pub modified: Vec<String>,
    pub moved: Vec<(String, String)>,
    pub notes: Vec<String>,
}

/// One textual rewrite of a project file.
struct Rewrite {
    path: String,
    pairs: Vec<(String, String)>,
}

fn mode_pairs(prefix: &str) -> Vec<(String, String)> {
    MODE_VARS
        .iter()
        .map(|var| (format!("{prefix}{var}=demo"), format!("{prefix}{var}=sample")))
        .collect()
}

fn rewrites(migration_file: &str) -> Vec<Rewrite> {
    vec![
        Rewrite {
            path: ".travis.yml".to_string(),
            pairs: mode_pairs("-e "),
        },
        Rewrite {
            path: "docker-compose.override.yml".to_string(),
            pairs: mode_pairs("- "),
        },
        Rewrite {
            path: migration_file.to_string(),
            pairs: vec![(
                "anthem songs.install.data_demo".to_string(),
                "anthem songs.sample.data_sample".to_string(),
            )],
        },
        Rewrite {
            path: "odoo/songs/install/data_all.py".to_string(),
            pairs: vec![(
                "The data loaded here will be loaded in the 'demo' and".to_string(),
                "The data loaded here will be loaded in the 'sample' and".to_string(),
            )],
        },
        Rewrite {
            path: "test.yml".to_string(),
            pairs: mode_pairs("- "),
        },
        Rewrite {
            path: "travis/minion-files/rancher.list".to_string(),
            pairs: mode_pairs(""),
        },
    ]
}

/// Rename direct children keyed `from` of every `modes:` mapping.
///
/// Works on the text so comments and layout of the descriptor survive.
pub fn rename_mode_key(content: &str, from: &str, to: &str) -> String {
    let mut modes_indent: Option<usize> = None;
    let mut child_indent: Option<usize> = None;
    let from_key = format!("{from}:");

    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        let meaningful = !trimmed.trim().is_empty() && !trimmed.starts_with('#');

        if meaningful && modes_indent.is_some_and(|modes| indent <= modes) {
            modes_indent = None;
            child_indent = None;
        }

        let mut rewritten = None;
        if meaningful {
            if modes_indent.is_some() {
                let child = *child_indent.get_or_insert(indent);
                if indent == child
                    && let Some(rest) = trimmed.strip_prefix(&from_key)
                {
                    rewritten = Some(format!("{}{to}:{rest}", &line[..indent]));
                }
            } else if trimmed.trim_end() == "modes:" {
                modes_indent = Some(indent);
            }
        }

        match rewritten {
            Some(line) => out.push_str(&line),
            None => out.push_str(line),
        }
    }
    out
}

fn entries(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Apply the rename in `root`. Files are staged, nothing is committed.
pub async fn demo_to_sample(
    runner: &dyn CommandRunner,
    root: &Path,
    migration_file: &str,
) -> Result<DeprecationReport> {
    let mut report = DeprecationReport::default();

    for rewrite in rewrites(migration_file) {
        let path = root.join(&rewrite.path);
        if !path.exists() {
            continue;
        }
        let mut changed = false;
        for (old, new) in &rewrite.pairs {
            changed |= search_replace(&path, old, new)?;
        }
        if rewrite.path == migration_file {
            let content = std::fs::read_to_string(&path)?;
            let renamed = rename_mode_key(&content, "demo", "sample");
            if renamed != content {
                std::fs::write(&path, renamed)?;
                changed = true;
            }
        }
        if changed {
            report.modified.push(rewrite.path);
        }
    }
    git::add(runner, &report.modified).await?;

    let sample_data = root.join(SAMPLE_DATA_DIR);
    if sample_data.exists() {
        report.notes.push(format!("{SAMPLE_DATA_DIR} directory already exists"));
    } else {
        std::fs::create_dir_all(&sample_data)?;
    }
    let demo_data = root.join(DEMO_DATA_DIR);
    let demo_entries = if demo_data.is_dir() { entries(&demo_data)? } else { Vec::new() };
    if demo_entries.is_empty() {
        report.notes.push(format!("nothing to move in {DEMO_DATA_DIR}"));
    }
    for name in demo_entries {
        let from = format!("{DEMO_DATA_DIR}/{name}");
        git::mv(runner, &from, SAMPLE_DATA_DIR).await?;
        report.moved.push((from, format!("{SAMPLE_DATA_DIR}/{name}")));
    }

    let sample_songs = root.join(SAMPLE_SONGS_DIR);
    if sample_songs.exists() {
        report.notes.push(format!("{SAMPLE_SONGS_DIR} directory already exists"));
    } else {
        std::fs::create_dir_all(&sample_songs)?;
        std::fs::write(sample_songs.join("__init__.py"), "")?;
    }
    if root.join(DEMO_SONG).is_file() {
        git::mv(runner, DEMO_SONG, SAMPLE_SONG).await?;
        report.moved.push((DEMO_SONG.to_string(), SAMPLE_SONG.to_string()));
    } else {
        report.notes.push(format!("nothing to move for {DEMO_SONG}"));
    }

    let sample_song = root.join(SAMPLE_SONG);
    if sample_song.is_file() && search_replace(&sample_song, "data/demo", "data/sample")? {
        report.modified.push(SAMPLE_SONG.to_string());
    }
    git::add(runner, &[SAMPLE_SONGS_DIR.to_string()]).await?;

    Ok(report)
}
