//! Migration descriptor (`migration.yml`).
//!
//! ```yaml
//! migration:
//!   options:
//!     install_command: odoo
//!   versions:
//!     - version: setup
//!       operations:
//!         pre: [migration.pre]
//!         post: [migration.post, {shell: "echo done"}]
//!       addons:
//!         upgrade: [sale]
//!       modes:
//!         sample:
//!           addons:
//!             upgrade: [sample_data]
//! ```

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    path::Path,
};

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};

use crate::errors::{SongError, SongResult};
use crate::plan::Phase;

pub const SETUP_VERSION: &str = "setup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDescriptor {
    pub migration: MigrationSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSection {
    #[serde(default)]
    pub options: MigrationOptions,
    #[serde(default)]
    pub versions: Vec<VersionSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    pub install_command: String,
    pub install_args: Option<String>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            install_command: "odoo".to_string(),
            install_args: None,
        }
    }
}

impl MigrationOptions {
    /// Shell command upgrading `addons`.
    pub fn upgrade_command(&self, addons: &[String]) -> String {
        let mut command = self.install_command.clone();
        if let Some(args) = self.install_args.as_deref().map(str::trim)
            && !args.is_empty()
        {
            command.push(' ');
            command.push_str(args);
        }
        command.push_str(" -u ");
        command.push_str(&addons.join(","));
        command.push_str(" --stop-after-init");
        command
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Operations {
    #[serde(default)]
    pub pre: Vec<Operation>,
    #[serde(default)]
    pub post: Vec<Operation>,
}

impl Operations {
    fn phase(&self, phase: Phase) -> &[Operation] {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Post => &self.post,
            Phase::Addons => &[],
        }
    }
}

/// A song name or an inline shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operation {
    Song(String),
    Shell { shell: String },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Song(name) => f.write_str(name),
            Operation::Shell { shell } => write!(f, "shell: {shell}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Addons {
    #[serde(default)]
    pub upgrade: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeSpec {
    #[serde(default)]
    pub operations: Operations,
    #[serde(default)]
    pub addons: Addons,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpec {
    #[serde(deserialize_with = "version_string")]
    pub version: String,
    #[serde(default)]
    pub operations: Operations,
    #[serde(default)]
    pub addons: Addons,
    #[serde(default)]
    pub modes: BTreeMap<String, ModeSpec>,
}

impl VersionSpec {
    pub fn is_setup(&self) -> bool {
        self.version == SETUP_VERSION
    }

    /// Base operations of `phase`, followed by the mode's.
    pub fn operations_for(&self, phase: Phase, mode: Option<&str>) -> Vec<&Operation> {
        let mut operations: Vec<&Operation> = self.operations.phase(phase).iter().collect();
        if let Some(spec) = mode.and_then(|m| self.modes.get(m)) {
            operations.extend(spec.operations.phase(phase));
        }
        operations
    }

    /// Base addons to upgrade, followed by the mode's.
    pub fn addons_for(&self, mode: Option<&str>) -> Vec<String> {
        let mut addons = self.addons.upgrade.clone();
        if let Some(spec) = mode.and_then(|m| self.modes.get(m)) {
            for addon in &spec.addons.upgrade {
                if !addons.contains(addon) {
                    addons.push(addon.clone());
                }
            }
        }
        addons
    }
}

/// Accept quoted versions and bare integers. A bare `1.10` is a YAML float
/// that reads back as `1.1`, so it is rejected.
fn version_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(value) => Ok(value),
        serde_yaml::Value::Number(value) if value.is_f64() => Err(D::Error::custom(format!(
            "version {value} is read as a number, quote dotted versions (version: \"{value}\")"
        ))),
        serde_yaml::Value::Number(value) => Ok(value.to_string()),
        other => Err(D::Error::custom(format!("invalid version number: {other:?}"))),
    }
}

/// Sortable version number: `setup` first, then dotted numbers compared
/// component by component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionNumber {
    Setup,
    Dotted(Vec<u64>),
}

impl VersionNumber {
    pub fn parse(value: &str) -> SongResult<Self> {
        if value == SETUP_VERSION {
            return Ok(VersionNumber::Setup);
        }
        value
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map(VersionNumber::Dotted)
            .map_err(|_| SongError::descriptor(format!("'{value}' is not a valid version number")))
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionNumber::Setup, VersionNumber::Setup) => Ordering::Equal,
            (VersionNumber::Setup, _) => Ordering::Less,
            (_, VersionNumber::Setup) => Ordering::Greater,
            (VersionNumber::Dotted(a), VersionNumber::Dotted(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl MigrationDescriptor {
    pub fn from_yaml(source: &str) -> SongResult<Self> {
        let descriptor: Self = serde_yaml::from_str(source).map_err(|err| SongError::descriptor(err.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn load(path: &Path) -> SongResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.migration.options
    }

    pub fn versions(&self) -> &[VersionSpec] {
        &self.migration.versions
    }

    pub fn version(&self, number: &str) -> Option<&VersionSpec> {
        self.versions().iter().find(|v| v.version == number)
    }

    /// Every mode named by any version.
    pub fn modes(&self) -> Vec<&str> {
        let mut modes: Vec<&str> = self
            .versions()
            .iter()
            .flat_map(|v| v.modes.keys().map(String::as_str))
            .collect();
        modes.sort_unstable();
        modes.dedup();
        modes
    }

    fn validate(&self) -> SongResult<()> {
        let mut previous: Option<(VersionNumber, &str)> = None;
        for spec in self.versions() {
            let number = VersionNumber::parse(&spec.version)?;
            if let Some((last, last_name)) = &previous
                && number <= *last
            {
                return Err(SongError::descriptor(format!(
                    "version '{}' must come after '{last_name}' (versions are unique and increasing)",
                    spec.version
                )));
            }
            previous = Some((number, &spec.version));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
migration:
  options:
    install_command: odoo
    install_args: --log-level=warn
  versions:
    - version: setup
      operations:
        pre:
          - migration.pre
        post:
          - migration.post
          - shell: echo post
      addons:
        upgrade:
          - sale
      modes:
        sample:
          operations:
            post:
              - shell: echo sample
          addons:
            upgrade:
              - sample_data
    - version: 11.0.1
    - version: 11.0.10
"#;

    #[test]
    fn parses_operations_and_modes() {
        let descriptor = MigrationDescriptor::from_yaml(SAMPLE).unwrap();
        let setup = descriptor.version("setup").unwrap();

        assert_eq!(
            setup.operations_for(Phase::Post, Some("sample")),
            vec![
                &Operation::Song("migration.post".to_string()),
                &Operation::Shell {
                    shell: "echo post".to_string()
                },
                &Operation::Shell {
                    shell: "echo sample".to_string()
                },
            ]
        );
        assert_eq!(setup.operations_for(Phase::Post, Some("other")).len(), 2);
        assert_eq!(setup.addons_for(Some("sample")), vec!["sale", "sample_data"]);
        assert_eq!(descriptor.modes(), vec!["sample"]);
    }

    #[test]
    fn upgrade_command_includes_args() {
        let descriptor = MigrationDescriptor::from_yaml(SAMPLE).unwrap();
        assert_eq!(
            descriptor
                .options()
                .upgrade_command(&["sale".to_string(), "stock".to_string()]),
            "odoo --log-level=warn -u sale,stock --stop-after-init"
        );
        assert_eq!(
            MigrationOptions::default().upgrade_command(&["base".to_string()]),
            "odoo -u base --stop-after-init"
        );
    }

    #[test]
    fn dotted_versions_compare_numerically() {
        let setup = VersionNumber::parse("setup").unwrap();
        let v2 = VersionNumber::parse("11.0.2").unwrap();
        let v10 = VersionNumber::parse("11.0.10").unwrap();
        assert!(setup < v2);
        assert!(v2 < v10);
        assert!(VersionNumber::parse("11.0.x").is_err());
    }

    #[test]
    fn rejects_unordered_or_duplicate_versions() {
        let duplicate = "migration:\n  versions:\n    - version: 1.0.0\n    - version: 1.0.0\n";
        assert!(matches!(
            MigrationDescriptor::from_yaml(duplicate),
            Err(SongError::Descriptor { .. })
        ));

        let setup_last = "migration:\n  versions:\n    - version: 1.0.0\n    - version: setup\n";
        assert!(MigrationDescriptor::from_yaml(setup_last).is_err());
    }

    #[test]
    fn bare_dotted_versions_must_be_quoted() {
        let bare = "migration:\n  versions:\n    - version: 1.10\n";
        let err = MigrationDescriptor::from_yaml(bare).unwrap_err();
        assert!(matches!(err, SongError::Descriptor { .. }));
        assert!(err.to_string().contains("quote dotted versions"));

        let quoted = "migration:\n  versions:\n    - version: \"1.10\"\n    - version: 2\n";
        let descriptor = MigrationDescriptor::from_yaml(quoted).unwrap();
        let numbers: Vec<&str> = descriptor.versions().iter().map(|v| v.version.as_str()).collect();
        assert_eq!(numbers, vec!["1.10", "2"]);
    }
}
