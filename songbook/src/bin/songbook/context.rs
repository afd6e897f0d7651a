use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use songbook::SongSettings;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "songbook.toml";

/// Project context for songbook operations
pub struct ProjectContext {
    /// Directory holding `songbook.toml`
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub config: SongbookConfig,
}

/// Configuration stored in songbook.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongbookConfig {
    #[serde(default)]
    pub project: ProjectSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub container: ContainerSettings,
    #[serde(default)]
    pub dumps: DumpSettings,
    #[serde(default)]
    pub template: TemplateSettings,
    #[serde(default)]
    pub migration: SongSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default = "default_migration_file")]
    pub migration_file: PathBuf,
    #[serde(default = "default_cookiecutter_context")]
    pub cookiecutter_context: PathBuf,
    #[serde(default = "default_pending_merges")]
    pub pending_merges: PathBuf,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            migration_file: default_migration_file(),
            cookiecutter_context: default_cookiecutter_context(),
            pending_merges: default_pending_merges(),
        }
    }
}

fn default_migration_file() -> PathBuf {
    PathBuf::from("odoo/migration.yml")
}

fn default_cookiecutter_context() -> PathBuf {
    PathBuf::from(".cookiecutter.context.yml")
}

fn default_pending_merges() -> PathBuf {
    PathBuf::from("odoo/pending-merges.yaml")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "${DATABASE_URL}".to_string()
}

/// Local database container managed through docker-compose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSettings {
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_user")]
    pub password: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            service: default_service(),
            user: default_db_user(),
            password: default_db_user(),
        }
    }
}

fn default_service() -> String {
    "db".to_string()
}

fn default_db_user() -> String {
    "odoo".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpSettings {
    #[serde(default = "default_keys_url")]
    pub keys_url: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_aws_profile")]
    pub aws_profile: String,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            keys_url: default_keys_url(),
            bucket: default_bucket(),
            aws_profile: default_aws_profile(),
        }
    }
}

fn default_keys_url() -> String {
    "https://dump-bag.odoo.camptocamp.ch/keys".to_string()
}

fn default_bucket() -> String {
    "odoo-dumps".to_string()
}

fn default_aws_profile() -> String {
    "odoo-dumps".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSettings {
    #[serde(default = "default_template_git")]
    pub git: String,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            git: default_template_git(),
        }
    }
}

fn default_template_git() -> String {
    "git@github.com:camptocamp/odoo-template.git".to_string()
}

/// Answers recorded when the project was generated from the template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookiecutterContext {
    pub project_name: Option<String>,
    pub repo_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl CookiecutterContext {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Project name used in dump file names.
    pub fn project(&self) -> Result<&str> {
        self.project_name
            .as_deref()
            .or(self.repo_name.as_deref())
            .context("No project_name or repo_name in the cookiecutter context")
    }

    /// Scalar answers as `key=value` pairs for re-rendering the template.
    pub fn answers(&self) -> Vec<(String, String)> {
        let named = [("project_name", &self.project_name), ("repo_name", &self.repo_name)]
            .into_iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone())));
        let extra = self.extra.iter().filter_map(|(key, value)| {
            let rendered = match value {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), rendered))
        });
        named.chain(extra).collect()
    }
}

impl ProjectContext {
    /// Find and load project context from current directory or ancestors
    pub fn find() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::find_from(&current_dir)
    }

    /// Find project context starting from the given directory
    pub fn find_from(start: &Path) -> Result<Self> {
        let project_root = Self::find_project_root(start)?;
        Self::from_root(project_root)
    }

    /// Create context from a known project root
    pub fn from_root(project_root: PathBuf) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {CONFIG_FILE}"))?;
        let config: SongbookConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {CONFIG_FILE}"))?;

        Ok(Self {
            project_root,
            config_path,
            config,
        })
    }

    /// Find project root by looking for songbook.toml
    fn find_project_root(start: &Path) -> Result<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            if current.join(CONFIG_FILE).exists() {
                return Ok(current);
            }

            if !current.pop() {
                anyhow::bail!(
                    "Could not find {CONFIG_FILE} in {start:?} or any parent directory. \
                     Run 'songbook init' at the project root first."
                );
            }
        }
    }

    /// Resolve a configured path against the project root.
    pub fn path(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.project_root.join(relative)
        }
    }

    pub fn migration_file(&self) -> PathBuf {
        self.path(&self.config.project.migration_file)
    }

    pub fn cookiecutter_context(&self) -> Result<CookiecutterContext> {
        CookiecutterContext::load(&self.path(&self.config.project.cookiecutter_context))
    }

    /// Song settings with addons paths resolved against the project root.
    pub fn song_settings(&self) -> SongSettings {
        let mut settings = self.config.migration.clone();
        settings.addons_paths = settings.addons_paths.iter().map(|p| self.path(p)).collect();
        settings
    }

    /// Get the database URL, expanding environment variables
    pub fn database_url(&self) -> Result<String> {
        expand_env(&self.config.database.url)
    }
}

/// Expand a whole-value `${VAR}` reference.
pub fn expand_env(value: &str) -> Result<String> {
    match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name)
            .with_context(|| format!("Environment variable {var_name} not set")),
        None => Ok(value.to_string()),
    }
}
