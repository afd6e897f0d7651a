use crate::catalog::{PurgeCandidate, PurgeKind, PurgeLocator, VERSION_TABLE};

/// Metadata whose xml id contains one of these markers was created by an
/// export, import or project setup and is kept by the cleanup.
pub const PROTECTED_DATA_MARKERS: [&str; 3] = ["__export__", "__setup__", "__import__"];

/// Framework tables. Several of them (`ir_act_window`, `ir_act_client`, ...)
/// are not named after their model, so no catalog query can vouch for them.
pub const PROTECTED_TABLE_PREFIXES: [&str; 1] = ["ir_"];

/// Filters purge candidates before the database cleanup removes them.
#[derive(Debug, Clone)]
pub struct PurgePolicy {
    protected_tables: Vec<String>,
    protected_prefixes: Vec<String>,
    protected_markers: Vec<String>,
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self {
            protected_tables: vec![VERSION_TABLE.to_string()],
            protected_prefixes: PROTECTED_TABLE_PREFIXES.iter().map(|p| p.to_string()).collect(),
            protected_markers: PROTECTED_DATA_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl PurgePolicy {
    pub fn with_protected_table(mut self, table: impl Into<String>) -> Self {
        self.protected_tables.push(table.into());
        self
    }

    pub fn is_protected(&self, candidate: &PurgeCandidate) -> bool {
        match (&candidate.kind, &candidate.locator) {
            (_, PurgeLocator::Table(table)) => self.is_protected_table(table),
            (_, PurgeLocator::Column { table, .. }) => self.is_protected_table(table),
            (PurgeKind::Table, _) => self.is_protected_table(&candidate.name),
            (PurgeKind::Data, _) => self
                .protected_markers
                .iter()
                .any(|marker| candidate.name.contains(marker.as_str())),
            _ => false,
        }
    }

    fn is_protected_table(&self, table: &str) -> bool {
        self.protected_tables.iter().any(|t| t == table)
            || self.protected_prefixes.iter().any(|p| table.starts_with(p.as_str()))
    }

    /// Candidates the cleanup may remove, in their original order.
    pub fn filter(&self, candidates: Vec<PurgeCandidate>) -> Vec<PurgeCandidate> {
        candidates.into_iter().filter(|c| !self.is_protected(c)).collect()
    }
}
