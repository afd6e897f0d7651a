use anyhow::{Context, Result};
use clap::Subcommand;
use tempfile::TempDir;

use crate::context::ProjectContext;
use crate::deprecate::demo_to_sample;
use crate::examples::ExampleGroup;
use crate::git;
use crate::output::OutputManager;
use crate::shell::SystemShell;
use crate::template::{self, SYNC_FILE, SyncSpec};
use crate::theme::ICONS;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Template",
        commands: &[
            "songbook project sync               # Copy template files and open the commit editor",
            "songbook project sync --no-commit   # Stage the synced files only",
        ],
    },
    ExampleGroup {
        title: "Deprecations",
        commands: &["songbook project demo-to-sample     # Rename the demo mode to sample"],
    },
];

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Sync files from the project template
    #[command(name = "sync")]
    Sync {
        /// Stage the synced files without committing
        #[arg(long)]
        no_commit: bool,
    },

    /// Rename the demo migration mode to sample (asks first on a dirty work tree)
    #[command(name = "demo-to-sample")]
    DemoToSample,
}

pub async fn handle_project_commands(command: ProjectCommands, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;
    let shell = SystemShell::new().in_dir(&ctx.project_root);

    match command {
        ProjectCommands::Sync { no_commit } => {
            handle_sync(&ctx, &shell, !no_commit, output).await?;
        }
        ProjectCommands::DemoToSample => {
            handle_demo_to_sample(&ctx, &shell, output).await?;
        }
    }

    Ok(())
}

async fn handle_sync(ctx: &ProjectContext, shell: &SystemShell, commit: bool, output: &OutputManager) -> Result<()> {
    git::check_git_diff(shell, true).await?;
    let answers = ctx.cookiecutter_context()?;

    let tmp = TempDir::new().context("Failed to create a temporary directory")?;
    output.progress("Rendering the project template");
    let rendered = template::render(shell, &ctx.config.template.git, &answers, tmp.path()).await;
    output.clear_line();
    let rendered = rendered?;

    let spec = SyncSpec::load(&rendered.join(SYNC_FILE))?;
    let files = template::select_files(&rendered, &spec)?;

    output.info("Syncing files:");
    for file in &files {
        output.indented("*", file);
    }

    let uncommented = template::copy_selected(&rendered, &ctx.project_root, &files, &spec.comment)?;
    for file in &uncommented {
        output.warning(&format!("No function to add a comment in {file}"));
    }

    let staged: Vec<String> = files.into_iter().collect();
    git::add(shell, &staged).await?;
    if commit {
        git::commit_with_editor(shell, template::COMMIT_MESSAGE).await?;
        output.success("Project synced and committed");
    } else {
        output.success(&format!("{} file(s) synced and staged", staged.len()));
    }
    Ok(())
}

async fn handle_demo_to_sample(ctx: &ProjectContext, shell: &SystemShell, output: &OutputManager) -> Result<()> {
    git::check_git_diff(shell, false).await?;
    let migration_file = ctx.config.project.migration_file.to_string_lossy().into_owned();
    let report = demo_to_sample(shell, &ctx.project_root, &migration_file).await?;

    if output.is_json() {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for note in &report.notes {
        output.verbose(note);
    }
    output.success("Deprecation applied");

    output.heading("Modified");
    if report.modified.is_empty() {
        output.info("No file referenced the demo mode");
    }
    for path in &report.modified {
        output.bullet(path);
    }

    output.heading("Moved");
    for (from, to) in &report.moved {
        output.indented(ICONS.arrow, &format!("{from} to {to}"));
    }

    output.heading("Next steps");
    output.bullet("Check your staged files: git diff --cached");
    output.bullet("Search odoo/songs for any remaining 'demo' string and fix it manually");
    output.bullet("Commit: git commit -m 'Apply deprecation of demo in favor of sample'");
    Ok(())
}
