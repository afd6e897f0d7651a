//! Version-by-version migration runner.

use std::{sync::Arc, time::Instant};

use crate::catalog::VersionRecord;
use crate::context::MigrationContext;
use crate::descriptor::{MigrationDescriptor, MigrationOptions, VersionSpec};
use crate::errors::SongResult;
use crate::executor::{ExecutionReport, execute_steps};
use crate::plan::{MigrationStep, Phase, VersionPlan};
use crate::registry::SongRegistry;
use crate::songs::{ShellSong, Song};

/// Statistics from a migration run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Versions executed in this run
    pub versions_applied: Vec<String>,
    /// Versions skipped because they are already done
    pub versions_skipped: u32,
    pub report: ExecutionReport,
    pub total_time_ms: u64,
}

/// Versions to run given the recorded history.
///
/// An empty history runs everything, `setup` included. Otherwise `setup` and
/// finished versions are skipped unless forced; unfinished ones run again.
pub fn select_versions<'d>(
    versions: &'d [VersionSpec],
    history: &[VersionRecord],
    force: &[String],
) -> Vec<&'d VersionSpec> {
    if history.is_empty() {
        return versions.iter().collect();
    }
    versions
        .iter()
        .filter(|spec| {
            if force.contains(&spec.version) {
                return true;
            }
            if spec.is_setup() {
                return false;
            }
            !history.iter().any(|record| record.number == spec.version && record.is_done())
        })
        .collect()
}

/// Resolve one version into its ordered steps.
pub fn plan_version(
    spec: &VersionSpec,
    options: &MigrationOptions,
    registry: &SongRegistry,
    mode: Option<&str>,
) -> SongResult<VersionPlan> {
    let mut steps = Vec::new();

    for (position, operation) in spec.operations_for(Phase::Pre, mode).into_iter().enumerate() {
        steps.push(MigrationStep::new(Phase::Pre, position, registry.resolve(operation)?));
    }

    let addons = spec.addons_for(mode);
    if !addons.is_empty() {
        let upgrade: Arc<dyn Song> = Arc::new(ShellSong::new(options.upgrade_command(&addons)));
        steps.push(MigrationStep::new(Phase::Addons, 0, upgrade));
    }

    for (position, operation) in spec.operations_for(Phase::Post, mode).into_iter().enumerate() {
        steps.push(MigrationStep::new(Phase::Post, position, registry.resolve(operation)?));
    }

    Ok(VersionPlan {
        version: spec.version.clone(),
        steps,
    })
}

/// Runs the pending versions of a descriptor against a context.
pub struct MigrationRunner<'r> {
    descriptor: &'r MigrationDescriptor,
    registry: &'r SongRegistry,
    mode: Option<String>,
    force: Vec<String>,
}

impl<'r> MigrationRunner<'r> {
    pub fn new(descriptor: &'r MigrationDescriptor, registry: &'r SongRegistry) -> Self {
        Self {
            descriptor,
            registry,
            mode: None,
            force: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: Option<String>) -> Self {
        self.mode = mode;
        self
    }

    /// Re-run these versions even when they are done.
    pub fn with_force(mut self, force: Vec<String>) -> Self {
        self.force = force;
        self
    }

    /// Plans of the versions that would run, without touching the database.
    pub fn plan(&self, history: &[VersionRecord]) -> SongResult<Vec<VersionPlan>> {
        select_versions(self.descriptor.versions(), history, &self.force)
            .into_iter()
            .map(|spec| plan_version(spec, self.descriptor.options(), self.registry, self.mode.as_deref()))
            .collect()
    }

    pub async fn run(&self, ctx: &mut MigrationContext<'_>) -> SongResult<RunStats> {
        let started = Instant::now();
        let history = ctx.catalog().version_history().await?;
        // Resolve every version up front so an unknown song fails before any change.
        let plans = self.plan(&history)?;

        let mut stats = RunStats {
            versions_skipped: (self.descriptor.versions().len() - plans.len()) as u32,
            ..RunStats::default()
        };

        if plans.is_empty() {
            ctx.log_line("Database is up to date");
        }

        for plan in plans {
            ctx.catalog().start_version(&plan.version).await?;
            let mark = ctx.log.len();
            ctx.log_line(format!("version {}", plan.version));

            let report = execute_steps(&plan.steps, ctx).await?;

            let log = ctx.log.since(mark).join("\n");
            ctx.catalog().finish_version(&plan.version, &log).await?;

            stats.report.extend(report);
            stats.versions_applied.push(plan.version);
        }

        stats.total_time_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }
}
