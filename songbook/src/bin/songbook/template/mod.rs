//! Project template synchronization.
//!
//! The template is rendered with cookiecutter from the answers stored in the
//! project. Its `.sync.yml` decides which rendered files are copied back:
//!
//! ```yaml
//! sync:
//!   include: ["./docker/*", "./tasks/*.py"]
//!   exclude: ["./odoo/local-src"]
//!   comment: |
//!     This file has been generated with 'invoke project.sync'.
//! ```

mod comments;
mod fnmatch;

pub use comments::add_comment;
pub use fnmatch::Pattern;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::context::CookiecutterContext;
use crate::shell::{CommandRunner, run_checked};

pub const SYNC_FILE: &str = ".sync.yml";
pub const COMMIT_MESSAGE: &str = "Update project from odoo-template";

#[derive(Debug, Deserialize)]
struct SyncFile {
    sync: SyncSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncSpec {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl SyncSpec {
    pub fn parse(content: &str) -> Result<Self> {
        let file: SyncFile = serde_yaml::from_str(content)?;
        Ok(file.sync)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid pattern {p:?}")))
        .collect()
}

/// `./`-prefixed relative path, the form patterns are written against.
fn dotted(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut dotted = String::from(".");
    for component in relative.components() {
        dotted.push('/');
        dotted.push_str(&component.as_os_str().to_string_lossy());
    }
    Some(dotted)
}

/// Files under `root` matching an include pattern.
///
/// Excluded directories are not descended into.
pub fn select_files(root: &Path, spec: &SyncSpec) -> Result<BTreeSet<String>> {
    let include = compile(&spec.include)?;
    let exclude = compile(&spec.exclude)?;
    let excluded = |path: &str| exclude.iter().any(|p| p.matches(path));

    let mut selected = BTreeSet::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || dotted(root, entry.path()).is_none_or(|path| !excluded(&path))
        });

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Some(path) = dotted(root, entry.path())
            && include.iter().any(|p| p.matches(&path))
        {
            selected.insert(path);
        }
    }
    Ok(selected)
}

/// Render the template into `output_dir` and return the rendered project directory.
pub async fn render(
    runner: &dyn CommandRunner,
    template_git: &str,
    context: &CookiecutterContext,
    output_dir: &Path,
) -> Result<PathBuf> {
    let repo_name = context
        .repo_name
        .as_deref()
        .context("No repo_name in the cookiecutter context")?;
    let output = output_dir.to_string_lossy().into_owned();
    let extra: Vec<String> = context
        .answers()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    let mut args: Vec<&str> = vec![template_git, "--no-input", "--output-dir", output.as_str(), "--overwrite-if-exists"];
    args.extend(extra.iter().map(String::as_str));
    run_checked(runner, "cookiecutter", &args)
        .await
        .context("Failed to render the project template")?;

    Ok(output_dir.join(repo_name))
}

/// Copy `files` from the rendered template into the project.
///
/// Returns the files whose type has no comment syntax.
pub fn copy_selected(template: &Path, project: &Path, files: &BTreeSet<String>, comment: &str) -> Result<Vec<String>> {
    let mut uncommented = Vec::new();
    for relative in files {
        let source = template.join(relative);
        let target = project.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::copy(&source, &target)
            .with_context(|| format!("Failed to copy {relative}"))?;
        if target.is_file() && !add_comment(&target, comment)? {
            uncommented.push(relative.clone());
        }
    }
    Ok(uncommented)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::scripted::ScriptedRunner;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn parses_sync_file() {
        let spec = SyncSpec::parse("sync:\n  include:\n    - ./tasks/*\n  comment: |\n    Synced\n").unwrap();
        assert_eq!(spec.include, vec!["./tasks/*"]);
        assert!(spec.exclude.is_empty());
        assert_eq!(spec.comment, "Synced\n");
    }

    #[test]
    fn selects_included_files_and_prunes_excluded_dirs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "tasks/common.py", "");
        touch(root, "tasks/project.py", "");
        touch(root, "docker/bin/entrypoint.sh", "");
        touch(root, "odoo/local-src/custom/__init__.py", "");
        touch(root, "README.md", "");

        let spec = SyncSpec {
            include: vec!["./tasks/*".into(), "*.py".into(), "./docker/*".into()],
            exclude: vec!["./odoo/local-src".into(), "./tasks/project.py".into()],
            comment: String::new(),
        };
        let selected: Vec<_> = select_files(root, &spec).unwrap().into_iter().collect();
        assert_eq!(selected, vec!["./docker/bin/entrypoint.sh", "./tasks/common.py"]);
    }

    #[test]
    fn copies_and_comments() {
        let template = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        touch(template.path(), "tasks/common.py", "import os\n");
        touch(template.path(), "docker/Dockerfile", "FROM odoo\n");

        let files: BTreeSet<String> = ["./tasks/common.py", "./docker/Dockerfile"]
            .into_iter()
            .map(String::from)
            .collect();
        let uncommented = copy_selected(template.path(), project.path(), &files, "Synced\n").unwrap();

        assert_eq!(uncommented, vec!["./docker/Dockerfile"]);
        assert_eq!(
            std::fs::read_to_string(project.path().join("tasks/common.py")).unwrap(),
            "# Synced\nimport os\n"
        );
    }

    #[tokio::test]
    async fn renders_with_stored_answers() {
        let runner = ScriptedRunner::succeeding();
        let context = CookiecutterContext::parse("project_name: acme\nrepo_name: acme_odoo\n").unwrap();
        let out = TempDir::new().unwrap();

        let rendered = render(&runner, "git@github.com:camptocamp/odoo-template.git", &context, out.path())
            .await
            .unwrap();
        assert_eq!(rendered, out.path().join("acme_odoo"));

        let call = &runner.calls()[0];
        assert!(call.starts_with("cookiecutter git@github.com:camptocamp/odoo-template.git --no-input --output-dir "));
        assert!(call.ends_with("--overwrite-if-exists project_name=acme repo_name=acme_odoo"));
    }
}
