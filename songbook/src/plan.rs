use std::{fmt, sync::Arc};

use serde::Serialize;

use crate::songs::Song;

/// Migration phase. Phases run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pre,
    Addons,
    Post,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Pre, Phase::Addons, Phase::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pre => "pre",
            Phase::Addons => "addons",
            Phase::Post => "post",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named song bound to a phase and a position within it.
#[derive(Clone)]
pub struct MigrationStep {
    pub name: String,
    pub phase: Phase,
    pub position: usize,
    pub song: Arc<dyn Song>,
}

impl MigrationStep {
    pub fn new(phase: Phase, position: usize, song: Arc<dyn Song>) -> Self {
        Self {
            name: song.name().to_string(),
            phase,
            position,
            song,
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("position", &self.position)
            .finish()
    }
}

/// Steps of one descriptor version, in execution order.
#[derive(Debug, Clone)]
pub struct VersionPlan {
    pub version: String,
    pub steps: Vec<MigrationStep>,
}

impl VersionPlan {
    pub fn steps_in(&self, phase: Phase) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter().filter(move |step| step.phase == phase)
    }
}
