use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Table};
use serde::Serialize;

use songbook::catalog::VersionRecord;
use songbook::executor::play_logged;
use songbook::{
    Catalog, MigrationContext, MigrationDescriptor, MigrationRunner, PgCatalog, RunEnvironment, SongError,
    SongRegistry, StepStatus,
};

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::{OutputManager, TableDisplay};
use crate::theme::ICONS;
use crate::utils::format_datetime;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Review",
        commands: &[
            "songbook migrate plan                       # Steps of every version",
            "songbook migrate plan --history             # Only the versions the database still needs",
            "songbook migrate songs                      # Songs usable in migration.yml",
        ],
    },
    ExampleGroup {
        title: "Run",
        commands: &[
            "songbook migrate run                        # Apply pending versions",
            "songbook migrate run --mode sample          # Include the sample mode operations",
            "songbook migrate run --force 14.0.1.2       # Re-run a finished version",
            "songbook migrate song migration.post        # Play one song outside any version",
        ],
    },
    ExampleGroup {
        title: "History",
        commands: &["songbook migrate history                    # Versions recorded in the database"],
    },
];

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Show the steps a run would execute
    #[command(name = "plan")]
    Plan {
        /// Mode whose operations are appended to the base ones
        #[arg(long, env = "MIGRATION_MODE")]
        mode: Option<String>,

        /// Read the version history to skip finished versions
        #[arg(long)]
        history: bool,

        /// Version to plan even when finished
        #[arg(long)]
        force: Vec<String>,
    },

    /// Apply pending versions to the database
    #[command(name = "run")]
    Run {
        /// Mode whose operations are appended to the base ones
        #[arg(long, env = "MIGRATION_MODE")]
        mode: Option<String>,

        /// Re-run this version even when finished (repeatable)
        #[arg(long)]
        force: Vec<String>,
    },

    /// Play one registered song against the database
    #[command(name = "song")]
    Song {
        /// Song name, e.g. migration.clean_unavailable_modules
        name: String,
    },

    /// List the registered songs
    #[command(name = "songs")]
    Songs,

    /// Show the version history table
    #[command(name = "history")]
    History,
}

pub async fn handle_migrate_commands(command: MigrateCommands, output: &OutputManager) -> Result<()> {
    let registry = SongRegistry::with_builtin();

    if let MigrateCommands::Songs = command {
        return output.display(&SongListing::from_registry(&registry));
    }

    let ctx = ProjectContext::find()?;

    match command {
        MigrateCommands::Plan { mode, history, force } => {
            handle_plan(&ctx, &registry, mode, history, force, output).await?;
        }
        MigrateCommands::Run { mode, force } => {
            handle_run(&ctx, &registry, mode, force, output).await?;
        }
        MigrateCommands::Song { name } => {
            handle_song(&ctx, &registry, &name, output).await?;
        }
        MigrateCommands::History => {
            handle_history(&ctx, output).await?;
        }
        MigrateCommands::Songs => {}
    }

    Ok(())
}

fn load_descriptor(ctx: &ProjectContext, output: &OutputManager) -> Result<MigrationDescriptor> {
    let path = ctx.migration_file();
    output.verbose(&format!("Config: {}", ctx.config_path.display()));
    output.verbose(&format!("Descriptor: {}", path.display()));
    MigrationDescriptor::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

async fn connect(ctx: &ProjectContext, output: &OutputManager) -> Result<PgCatalog> {
    let url = ctx.database_url().context("A database URL is required (set DATABASE_URL)")?;
    output.progress("Connecting to PostgreSQL");
    let catalog = PgCatalog::connect(&url).await.context("Failed to connect to PostgreSQL");
    output.clear_line();
    let catalog = catalog?;
    output.success("Connected to PostgreSQL");
    Ok(catalog)
}

async fn handle_plan(
    ctx: &ProjectContext,
    registry: &SongRegistry,
    mode: Option<String>,
    read_history: bool,
    force: Vec<String>,
    output: &OutputManager,
) -> Result<()> {
    let descriptor = load_descriptor(ctx, output)?;

    let history = if read_history {
        let mut catalog = connect(ctx, output).await?;
        let history = catalog.version_history().await?;
        catalog.close().await?;
        history
    } else {
        Vec::new()
    };

    let runner = MigrationRunner::new(&descriptor, registry)
        .with_mode(mode)
        .with_force(force);
    let plans = runner.plan(&history)?;

    let listing = PlanListing {
        steps: plans
            .iter()
            .flat_map(|plan| {
                plan.steps.iter().map(|step| PlannedStep {
                    version: plan.version.clone(),
                    phase: step.phase.as_str().to_string(),
                    song: step.name.clone(),
                })
            })
            .collect(),
    };

    if plans.is_empty() {
        output.success("Database is up to date");
        return Ok(());
    }
    output.display(&listing)
}

async fn handle_run(
    ctx: &ProjectContext,
    registry: &SongRegistry,
    mode: Option<String>,
    force: Vec<String>,
    output: &OutputManager,
) -> Result<()> {
    output.heading("Migrate");
    let descriptor = load_descriptor(ctx, output)?;
    let env = RunEnvironment::from_env().with_mode(mode);
    let running_env = env.running_env.as_str();
    output.key_value("Environment", if running_env.is_empty() { "(unset)" } else { running_env });
    if let Some(mode) = &env.mode {
        output.key_value("Mode", mode);
    }

    let mut catalog = connect(ctx, output).await?;
    let runner = MigrationRunner::new(&descriptor, registry)
        .with_mode(env.mode.clone())
        .with_force(force);

    let mut migration = MigrationContext::new(&mut catalog, env, ctx.song_settings());
    let result = runner.run(&mut migration).await;
    let lines = migration.log.lines().to_vec();
    drop(migration);
    catalog.close().await?;

    for line in &lines {
        output.log_line(line);
    }
    let stats = result?;

    let summary = RunSummary {
        versions_applied: stats.versions_applied,
        versions_skipped: stats.versions_skipped,
        steps_completed: stats.report.completed(),
        soft_failures: stats
            .report
            .soft_failures()
            .map(|outcome| match &outcome.status {
                StepStatus::SoftFailed { message } => format!("{}: {message}", outcome.name),
                StepStatus::Completed => outcome.name.clone(),
            })
            .collect(),
        total_time_ms: stats.total_time_ms,
    };

    if output.is_json() {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    output.heading("Summary");
    if summary.versions_applied.is_empty() {
        output.success("Database is up to date");
    } else {
        output.success(&format!(
            "{} version(s) applied in {}ms",
            summary.versions_applied.len(),
            summary.total_time_ms
        ));
        for version in &summary.versions_applied {
            output.bullet(version);
        }
    }
    if summary.versions_skipped > 0 {
        output.indented(ICONS.skipped, &format!("{} version(s) already applied", summary.versions_skipped));
    }
    for failure in &summary.soft_failures {
        output.warning(failure);
    }
    Ok(())
}

async fn handle_song(ctx: &ProjectContext, registry: &SongRegistry, name: &str, output: &OutputManager) -> Result<()> {
    let song = registry
        .get(name)
        .ok_or_else(|| SongError::UnknownSong { name: name.to_string() })?;

    let mut catalog = connect(ctx, output).await?;
    let mut migration = MigrationContext::new(&mut catalog, RunEnvironment::from_env(), ctx.song_settings());
    let result = play_logged(song.as_ref(), &mut migration).await;
    let lines = migration.log.lines().to_vec();
    drop(migration);
    catalog.close().await?;

    for line in &lines {
        output.log_line(line);
    }
    match result? {
        (StepStatus::Completed, elapsed) => output.success(&format!("{name} done in {elapsed}ms")),
        (StepStatus::SoftFailed { message }, _) => output.warning(&format!("{name}: {message}")),
    }
    Ok(())
}

async fn handle_history(ctx: &ProjectContext, output: &OutputManager) -> Result<()> {
    let mut catalog = connect(ctx, output).await?;
    let versions = catalog.version_history().await?;
    catalog.close().await?;

    if versions.is_empty() {
        output.info("No version recorded yet");
        return Ok(());
    }
    output.display(&VersionHistory { versions })
}

#[derive(Serialize)]
struct PlannedStep {
    version: String,
    phase: String,
    song: String,
}

#[derive(Serialize)]
struct PlanListing {
    steps: Vec<PlannedStep>,
}

impl TableDisplay for PlanListing {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.table(&["Version", "Phase", "Step"]);
        for step in &self.steps {
            let song = match step.song.strip_prefix("shell: ") {
                Some(command) => format!("{} {command}", ICONS.shell),
                None => step.song.clone(),
            };
            table.add_row(vec![Cell::new(&step.version), Cell::new(&step.phase), Cell::new(song)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("{} {} {}", s.version, s.phase, s.song))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Serialize)]
struct RunSummary {
    versions_applied: Vec<String>,
    versions_skipped: u32,
    steps_completed: usize,
    soft_failures: Vec<String>,
    total_time_ms: u64,
}

#[derive(Serialize)]
struct SongEntry {
    name: String,
    description: String,
}

#[derive(Serialize)]
struct SongListing {
    songs: Vec<SongEntry>,
}

impl SongListing {
    fn from_registry(registry: &SongRegistry) -> Self {
        Self {
            songs: registry
                .iter()
                .map(|song| SongEntry {
                    name: song.name().to_string(),
                    description: song.description().to_string(),
                })
                .collect(),
        }
    }
}

impl TableDisplay for SongListing {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.table(&["Song", "Description"]);
        for song in &self.songs {
            table.add_row(vec![
                Cell::new(format!("{} {}", ICONS.song, song.name)),
                Cell::new(&song.description),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.songs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join("\n")
    }
}

#[derive(Serialize)]
struct VersionHistory {
    versions: Vec<VersionRecord>,
}

impl TableDisplay for VersionHistory {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.table(&["Version", "Started", "Done"]);
        for record in &self.versions {
            table.add_row(vec![
                Cell::new(&record.number),
                Cell::new(record.date_start.map(format_datetime).unwrap_or_default()),
                Cell::new(
                    record
                        .date_done
                        .map(format_datetime)
                        .unwrap_or_else(|| format!("{} unfinished", ICONS.warning)),
                ),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.versions
            .iter()
            .map(|r| format!("{} {}", r.number, if r.is_done() { "done" } else { "unfinished" }))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
