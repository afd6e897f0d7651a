//! Step executor.
//!
//! Runs songs one after the other with a shared [`MigrationContext`],
//! wrapping each one with a start line and an end line. Soft errors
//! ([`SongError::User`]) are logged and the run continues; any other error
//! is returned immediately and no later step runs.

use std::time::Instant;

use serde::Serialize;

use crate::context::MigrationContext;
use crate::errors::SongResult;
use crate::plan::{MigrationStep, Phase};
use crate::songs::Song;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    SoftFailed { message: String },
}

impl StepStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub name: String,
    pub phase: Phase,
    #[serde(flatten)]
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

/// Outcomes of every executed step, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<StepOutcome>,
}

impl ExecutionReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_completed()).count()
    }

    pub fn soft_failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_completed())
    }

    pub fn extend(&mut self, other: ExecutionReport) {
        self.outcomes.extend(other.outcomes);
    }
}

/// Play one song inside the logging wrapper.
///
/// Returns the step status and elapsed milliseconds, or the hard error that
/// stopped it.
pub async fn play_logged(song: &dyn Song, ctx: &mut MigrationContext<'_>) -> SongResult<(StepStatus, u64)> {
    let name = song.name().to_string();
    let started = Instant::now();
    ctx.log_line(format!("{name}..."));

    ctx.log.enter();
    let result = song.play(ctx).await;
    ctx.log.leave();

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(()) => {
            ctx.log_line(format!("{name}: done in {elapsed_ms}ms"));
            Ok((StepStatus::Completed, elapsed_ms))
        }
        Err(err) if err.is_soft() => {
            let message = err.to_string();
            log::warn!("{name}: {message}");
            ctx.log_line(format!("{name}: {message} (continuing) after {elapsed_ms}ms"));
            Ok((StepStatus::SoftFailed { message }, elapsed_ms))
        }
        Err(err) => {
            ctx.log_line(format!("{name}: failed after {elapsed_ms}ms: {err}"));
            Err(err)
        }
    }
}

/// Execute `steps` ordered by (phase, position); ties keep their input order.
pub async fn execute_steps(steps: &[MigrationStep], ctx: &mut MigrationContext<'_>) -> SongResult<ExecutionReport> {
    let mut ordered: Vec<&MigrationStep> = steps.iter().collect();
    ordered.sort_by_key(|step| (step.phase, step.position));

    let mut report = ExecutionReport::default();
    for step in ordered {
        let (status, elapsed_ms) = play_logged(step.song.as_ref(), ctx).await?;
        report.outcomes.push(StepOutcome {
            name: step.name.clone(),
            phase: step.phase,
            status,
            elapsed_ms,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::context::{RunEnvironment, SongSettings};
    use crate::errors::SongError;

    enum Outcome {
        Ok,
        Soft,
        Hard,
    }

    struct Recorder {
        name: String,
        outcome: Outcome,
        played: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Song for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn play(&self, _ctx: &mut MigrationContext<'_>) -> SongResult<()> {
            self.played.lock().unwrap().push(self.name.clone());
            match self.outcome {
                Outcome::Ok => Ok(()),
                Outcome::Soft => Err(SongError::user("still referenced")),
                Outcome::Hard => Err(SongError::other("connection lost")),
            }
        }
    }

    fn step(name: &str, phase: Phase, position: usize, outcome: Outcome, played: &Arc<Mutex<Vec<String>>>) -> MigrationStep {
        MigrationStep::new(
            phase,
            position,
            Arc::new(Recorder {
                name: name.to_string(),
                outcome,
                played: played.clone(),
            }),
        )
    }

    #[tokio::test]
    async fn runs_pre_before_post_in_declared_order() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![
            step("post-a", Phase::Post, 0, Outcome::Ok, &played),
            step("pre-b", Phase::Pre, 1, Outcome::Ok, &played),
            step("addons", Phase::Addons, 0, Outcome::Ok, &played),
            step("pre-a", Phase::Pre, 0, Outcome::Ok, &played),
            step("post-b", Phase::Post, 1, Outcome::Ok, &played),
        ];

        let mut catalog = MemoryCatalog::new();
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        let report = execute_steps(&steps, &mut ctx).await.unwrap();

        assert_eq!(
            *played.lock().unwrap(),
            vec!["pre-a", "pre-b", "addons", "post-a", "post-b"]
        );
        assert_eq!(report.completed(), 5);
        assert!(ctx.log.lines().iter().any(|l| l == "pre-a..."));
        assert!(ctx.log.lines().iter().any(|l| l.starts_with("post-b: done in")));
    }

    #[tokio::test]
    async fn soft_errors_are_logged_and_skipped() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![
            step("first", Phase::Pre, 0, Outcome::Soft, &played),
            step("second", Phase::Pre, 1, Outcome::Ok, &played),
        ];

        let mut catalog = MemoryCatalog::new();
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        let report = execute_steps(&steps, &mut ctx).await.unwrap();

        assert_eq!(*played.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(report.completed(), 1);
        let failed: Vec<_> = report.soft_failures().map(|o| o.name.as_str()).collect();
        assert_eq!(failed, vec!["first"]);
    }

    #[tokio::test]
    async fn hard_errors_stop_the_run() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![
            step("first", Phase::Pre, 0, Outcome::Hard, &played),
            step("second", Phase::Post, 0, Outcome::Ok, &played),
        ];

        let mut catalog = MemoryCatalog::new();
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        let err = execute_steps(&steps, &mut ctx).await.unwrap_err();

        assert!(!err.is_soft());
        assert_eq!(*played.lock().unwrap(), vec!["first"]);
    }
}
