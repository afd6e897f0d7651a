//! Songbook core library.
//!
//! Migration songs for ERP database upgrades: an ordered, logged pipeline of
//! idempotent steps run against the framework's bookkeeping tables, plus the
//! helpers those steps share (module/field relocation, field-drift checks,
//! purge filtering).

pub mod catalog;
pub mod context;
pub mod descriptor;
pub mod drift;
pub mod errors;
pub mod executor;
pub mod plan;
pub mod purge;
pub mod registry;
pub mod relocation;
pub mod runner;
pub mod songs;

pub use catalog::{Catalog, MemoryCatalog, ModuleFieldRecord, PgCatalog};
pub use context::{MigrationContext, RunEnvironment, SongSettings};
pub use descriptor::MigrationDescriptor;
pub use errors::{SongError, SongResult};
pub use executor::{ExecutionReport, StepOutcome, StepStatus, execute_steps};
pub use plan::{MigrationStep, Phase};
pub use registry::SongRegistry;
pub use runner::{MigrationRunner, RunStats};
pub use songs::Song;
