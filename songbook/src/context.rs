//! Shared state handed to every song during a migration run.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;

pub const RUNNING_ENV_VAR: &str = "RUNNING_ENV";
pub const CHECK_FIELDS_VAR: &str = "MIGRATION_CHECK_FIELDS";
pub const MODE_VAR: &str = "MIGRATION_MODE";

/// Deployment environment the migration runs in.
///
/// An unset `RUNNING_ENV` is `Other("")`, never `Dev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunningEnv {
    Dev,
    Test,
    Integration,
    Prod,
    Other(String),
}

impl RunningEnv {
    pub fn as_str(&self) -> &str {
        match self {
            RunningEnv::Dev => "dev",
            RunningEnv::Test => "test",
            RunningEnv::Integration => "integration",
            RunningEnv::Prod => "prod",
            RunningEnv::Other(name) => name,
        }
    }

    /// Environments whose attachments live on the object storage.
    pub fn uses_remote_storage(&self) -> bool {
        matches!(self, RunningEnv::Prod | RunningEnv::Integration)
    }
}

impl Default for RunningEnv {
    fn default() -> Self {
        RunningEnv::Other(String::new())
    }
}

impl FromStr for RunningEnv {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "dev" => RunningEnv::Dev,
            "test" => RunningEnv::Test,
            "integration" => RunningEnv::Integration,
            "prod" => RunningEnv::Prod,
            other => RunningEnv::Other(other.to_string()),
        })
    }
}

impl fmt::Display for RunningEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment flags read once at the start of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunEnvironment {
    pub running_env: RunningEnv,
    /// `MIGRATION_CHECK_FIELDS=True`
    pub check_fields: bool,
    pub mode: Option<String>,
}

impl RunEnvironment {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let running_env = lookup(RUNNING_ENV_VAR)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();
        let check_fields = lookup(CHECK_FIELDS_VAR).is_some_and(|value| value == "True");
        let mode = lookup(MODE_VAR).filter(|value| !value.trim().is_empty());

        Self {
            running_env,
            check_fields,
            mode,
        }
    }

    pub fn is_dev(&self) -> bool {
        self.running_env == RunningEnv::Dev
    }

    pub fn with_mode(mut self, mode: Option<String>) -> Self {
        if mode.is_some() {
            self.mode = mode;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRename {
    pub old: String,
    pub new: String,
}

/// Models relocated from one module to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedModels {
    pub models: Vec<String>,
    pub old_module: String,
    pub new_module: String,
}

/// Fields of one model relocated from one module to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedFields {
    pub model: String,
    pub fields: Vec<String>,
    pub old_module: String,
    pub new_module: String,
}

/// Project-specific inputs of the built-in songs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongSettings {
    pub renamed_modules: Vec<ModuleRename>,
    pub moved_models: Vec<MovedModels>,
    pub moved_fields: Vec<MovedFields>,
    /// Modules flagged for removal by `migration.uninstall_modules`.
    pub uninstall: Vec<String>,
    /// Modules `migration.clean_unavailable_modules` must leave alone.
    pub keep_unavailable: Vec<String>,
    pub addons_paths: Vec<PathBuf>,
    pub database_cleanup: bool,
    pub check_fields_file: PathBuf,
    /// Object-storage bucket; defaults to `odoo-<running env>`.
    pub attachment_bucket: Option<String>,
}

impl Default for SongSettings {
    fn default() -> Self {
        Self {
            renamed_modules: Vec::new(),
            moved_models: Vec::new(),
            moved_fields: Vec::new(),
            uninstall: Vec::new(),
            keep_unavailable: Vec::new(),
            addons_paths: Vec::new(),
            database_cleanup: false,
            check_fields_file: PathBuf::from("/data/odoo/pre_check_fields.csv"),
            attachment_bucket: None,
        }
    }
}

impl SongSettings {
    pub fn bucket_for(&self, env: &RunningEnv) -> String {
        self.attachment_bucket
            .clone()
            .unwrap_or_else(|| format!("odoo-{env}"))
    }
}

/// Line-oriented migration log.
///
/// Every line is forwarded to the `log` facade and kept, so the runner can
/// store a version's output in the history table.
#[derive(Debug, Clone, Default)]
pub struct SongLog {
    lines: Vec<String>,
    depth: usize,
}

impl SongLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, message: impl AsRef<str>) {
        let line = format!("{}{}", "  ".repeat(self.depth), message.as_ref());
        log::info!("{line}");
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines recorded after `mark` (a previous [`SongLog::len`]).
    pub fn since(&self, mark: usize) -> &[String] {
        &self.lines[mark.min(self.lines.len())..]
    }

    pub fn enter(&mut self) {
        self.depth += 1;
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Created once per run and passed by `&mut` to every song.
pub struct MigrationContext<'a> {
    catalog: &'a mut (dyn Catalog + 'a),
    pub env: RunEnvironment,
    pub settings: SongSettings,
    pub log: SongLog,
}

impl<'a> MigrationContext<'a> {
    pub fn new(catalog: &'a mut (dyn Catalog + 'a), env: RunEnvironment, settings: SongSettings) -> Self {
        Self {
            catalog,
            env,
            settings,
            log: SongLog::new(),
        }
    }

    pub fn catalog(&mut self) -> &mut (dyn Catalog + 'a) {
        self.catalog
    }

    pub fn log_line(&mut self, message: impl AsRef<str>) {
        self.log.line(message);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_environment_is_not_dev() {
        let env = RunEnvironment::from_lookup(lookup(&[]));
        assert!(!env.is_dev());
        assert!(!env.check_fields);
        assert_eq!(env.mode, None);

        let env = RunEnvironment::from_lookup(lookup(&[("MIGRATION_CHECK_FIELDS", "True")]));
        assert!(env.check_fields);
        assert!(!env.is_dev());

        let env = RunEnvironment::from_lookup(lookup(&[("RUNNING_ENV", "dev")]));
        assert!(env.is_dev());
    }

    #[test]
    fn check_fields_requires_exact_true() {
        let env = RunEnvironment::from_lookup(lookup(&[("MIGRATION_CHECK_FIELDS", "true")]));
        assert!(!env.check_fields);

        let env = RunEnvironment::from_lookup(lookup(&[
            ("RUNNING_ENV", "prod"),
            ("MIGRATION_CHECK_FIELDS", "True"),
            ("MIGRATION_MODE", "sample"),
        ]));
        assert_eq!(env.running_env, RunningEnv::Prod);
        assert!(env.check_fields);
        assert_eq!(env.mode.as_deref(), Some("sample"));
    }

    #[test]
    fn explicit_mode_overrides_environment() {
        let env = RunEnvironment::from_lookup(lookup(&[("MIGRATION_MODE", "demo")]))
            .with_mode(Some("sample".to_string()));
        assert_eq!(env.mode.as_deref(), Some("sample"));
    }

    #[test]
    fn bucket_defaults_to_environment_name() {
        let settings = SongSettings::default();
        assert_eq!(settings.bucket_for(&RunningEnv::Integration), "odoo-integration");

        let settings = SongSettings {
            attachment_bucket: Some("acme-prod".to_string()),
            ..SongSettings::default()
        };
        assert_eq!(settings.bucket_for(&RunningEnv::Prod), "acme-prod");
    }

    #[test]
    fn log_indents_nested_lines() {
        let mut log = SongLog::new();
        log.line("outer");
        log.enter();
        log.line("inner");
        log.leave();
        log.leave();
        log.line("back");

        assert_eq!(log.lines(), &["outer", "  inner", "back"]);
        assert_eq!(log.since(1), &["  inner", "back"]);
    }
}
