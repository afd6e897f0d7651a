//! Typed access to the ERP bookkeeping tables.
//!
//! Songs never issue SQL themselves: every read or write of module, model,
//! field, attachment or version metadata goes through a [`Catalog`]. Two
//! implementations are provided:
//! - [`PgCatalog`] - raw SQL over a single PostgreSQL connection
//! - [`MemoryCatalog`] - in-memory rows with the same semantics, used by tests

mod memory;
mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::SongResult;

pub use memory::{AttachmentRow, FieldRow, MemoryCatalog, ModelDataRow, ModelRow};
pub use postgres::{PgCatalog, list_databases};

/// Version-history table maintained by the migration runner.
///
/// The name is shared with the rest of the ERP tooling and must not change.
pub const VERSION_TABLE: &str = "marabunta_version";

/// `ir_model_data.model` value for model records.
pub const MODEL_XMLID_MODEL: &str = "ir.model";
/// `ir_model_data.model` value for field records.
pub const FIELD_XMLID_MODEL: &str = "ir.model.fields";

/// A (model, owning module, field) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleFieldRecord {
    pub model: String,
    pub module: String,
    pub field: String,
}

impl ModuleFieldRecord {
    pub fn new(model: impl Into<String>, module: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            module: module.into(),
            field: field.into(),
        }
    }
}

/// Row of the module registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub state: String,
}

impl ModuleRecord {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
        }
    }

    /// Uninstalled modules can be dropped from the registry without side effects.
    pub fn is_uninstalled(&self) -> bool {
        matches!(self.state.as_str(), "uninstalled" | "uninstallable")
    }
}

/// Row of the version-history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub number: String,
    pub date_start: Option<NaiveDateTime>,
    pub date_done: Option<NaiveDateTime>,
    pub log: Option<String>,
}

impl VersionRecord {
    pub fn is_done(&self) -> bool {
        self.date_done.is_some()
    }
}

/// Categories handled by the database cleanup, in the order they are purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurgeKind {
    Model,
    Column,
    Table,
    Data,
    Menu,
}

impl PurgeKind {
    pub const ALL: [PurgeKind; 5] = [
        PurgeKind::Model,
        PurgeKind::Column,
        PurgeKind::Table,
        PurgeKind::Data,
        PurgeKind::Menu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PurgeKind::Model => "model",
            PurgeKind::Column => "column",
            PurgeKind::Table => "table",
            PurgeKind::Data => "data",
            PurgeKind::Menu => "menu",
        }
    }
}

impl fmt::Display for PurgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a purge candidate lives in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurgeLocator {
    /// A row id in the table backing the candidate's kind.
    Row(i64),
    Column { table: String, column: String },
    Table(String),
}

/// Database artifact no longer referenced by any installed module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCandidate {
    pub kind: PurgeKind,
    /// Display name (model name, `table.column`, table name, xml id, menu name).
    pub name: String,
    pub locator: PurgeLocator,
}

impl PurgeCandidate {
    pub fn table(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: PurgeKind::Table,
            locator: PurgeLocator::Table(name.clone()),
            name,
        }
    }

    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        let table = table.into();
        let column = column.into();
        Self {
            kind: PurgeKind::Column,
            name: format!("{table}.{column}"),
            locator: PurgeLocator::Column { table, column },
        }
    }

    pub fn row(kind: PurgeKind, id: i64, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            locator: PurgeLocator::Row(id),
        }
    }
}

/// Bookkeeping-table operations used by songs and the runner.
///
/// Methods that rewrite metadata return the number of affected rows and must
/// be idempotent: calling them again with the same arguments is a no-op.
#[async_trait]
pub trait Catalog: Send {
    /// Id of `model` in the model catalog, `None` when unknown.
    async fn model_id(&mut self, model: &str) -> SongResult<Option<i64>>;

    /// Move the xml ids of a model and of all its fields from `old_module` to `new_module`.
    async fn reassign_model_data(&mut self, model_id: i64, old_module: &str, new_module: &str) -> SongResult<u64>;

    /// Move the xml ids of the named fields of `model` from `old_module` to `new_module`.
    async fn reassign_field_data(
        &mut self,
        model: &str,
        fields: &[String],
        old_module: &str,
        new_module: &str,
    ) -> SongResult<u64>;

    /// Rename a module everywhere, merging into `new` when it already exists.
    async fn rename_module(&mut self, old: &str, new: &str) -> SongResult<u64>;

    /// Every field joined with the module owning its xml id.
    async fn field_ownership(&mut self) -> SongResult<Vec<ModuleFieldRecord>>;

    async fn modules(&mut self) -> SongResult<Vec<ModuleRecord>>;

    /// Whether any `ir_model_data` row belongs to `module`.
    async fn module_has_metadata(&mut self, module: &str) -> SongResult<bool>;

    async fn delete_module(&mut self, module: &str) -> SongResult<()>;

    /// Flag installed modules for removal at the next framework upgrade.
    async fn mark_modules_to_remove(&mut self, modules: &[String]) -> SongResult<u64>;

    async fn purge_candidates(&mut self, kind: PurgeKind) -> SongResult<Vec<PurgeCandidate>>;

    /// Remove one candidate. Refusals surface as soft errors.
    async fn purge(&mut self, candidate: &PurgeCandidate) -> SongResult<()>;

    /// Prefix every local `store_fname` with `prefix`.
    async fn prefix_attachment_store(&mut self, prefix: &str) -> SongResult<u64>;

    /// Delete attachments stored on the remote object storage.
    async fn delete_remote_attachments(&mut self) -> SongResult<u64>;

    /// Ensure the trigram index on `ir_attachment.url`. Returns `false` when
    /// the `pg_trgm` extension is unavailable.
    async fn ensure_attachment_url_index(&mut self) -> SongResult<bool>;

    /// Version rows, most recently finished first. Empty when the table is missing.
    async fn version_history(&mut self) -> SongResult<Vec<VersionRecord>>;

    /// Record (or restart) a version before its first step.
    async fn start_version(&mut self, number: &str) -> SongResult<()>;

    /// Mark a version done and store its log.
    async fn finish_version(&mut self, number: &str, log: &str) -> SongResult<()>;
}
