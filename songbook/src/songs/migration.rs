//! Built-in songs for version upgrades.
//!
//! Pre songs prepare the bookkeeping tables before modules are upgraded;
//! post songs clean up what the upgrade left behind.

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{Medley, Song};
use crate::catalog::{ModuleRecord, PurgeKind};
use crate::context::MigrationContext;
use crate::drift::{FieldSnapshot, detect_drift};
use crate::errors::{SongError, SongResult};
use crate::purge::PurgePolicy;
use crate::registry::SongRegistry;
use crate::relocation;

pub const FIX_ATTACHMENT_PATHS: &str = "migration.fix_attachment_paths";
pub const RENAME_MODULES: &str = "migration.rename_modules";
pub const UPDATE_MOVED_MODELS: &str = "migration.update_moved_models";
pub const UPDATE_MOVED_FIELDS: &str = "migration.update_moved_fields";
pub const PRE_CHECK_FIELDS: &str = "migration.pre_check_fields";
pub const PRE: &str = "migration.pre";
pub const UNINSTALL_MODULES: &str = "migration.uninstall_modules";
pub const DATABASE_CLEANUP: &str = "migration.database_cleanup";
pub const CLEAN_UNAVAILABLE_MODULES: &str = "migration.clean_unavailable_modules";
pub const POST_CHECK_FIELDS: &str = "migration.post_check_fields";
pub const POST: &str = "migration.post";

const MANIFEST_FILES: [&str; 2] = ["__manifest__.py", "__openerp__.py"];

pub struct FixAttachmentPaths;

#[async_trait]
impl Song for FixAttachmentPaths {
    fn name(&self) -> &str {
        FIX_ATTACHMENT_PATHS
    }

    fn description(&self) -> &str {
        "Point attachments at the object storage, or drop remote ones outside prod"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        let env = ctx.env.running_env.clone();
        if env.uses_remote_storage() {
            let prefix = format!("s3://{}/", ctx.settings.bucket_for(&env));
            let updated = ctx.catalog().prefix_attachment_store(&prefix).await?;
            ctx.log_line(format!("{updated} attachment(s) moved under {prefix}"));
        } else {
            let deleted = ctx.catalog().delete_remote_attachments().await?;
            ctx.log_line(format!("{deleted} remote attachment(s) removed ({env})"));
        }
        Ok(())
    }
}

pub struct RenameModules;

#[async_trait]
impl Song for RenameModules {
    fn name(&self) -> &str {
        RENAME_MODULES
    }

    fn description(&self) -> &str {
        "Rename modules, merging into existing ones"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        let renames = ctx.settings.renamed_modules.clone();
        relocation::update_module_names(ctx, &renames).await?;
        Ok(())
    }
}

pub struct UpdateMovedModels;

#[async_trait]
impl Song for UpdateMovedModels {
    fn name(&self) -> &str {
        UPDATE_MOVED_MODELS
    }

    fn description(&self) -> &str {
        "Re-own models moved to another module"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        let moves = ctx.settings.moved_models.clone();
        for entry in &moves {
            relocation::update_module_moved_models(ctx, &entry.models, &entry.old_module, &entry.new_module).await?;
        }
        Ok(())
    }
}

pub struct UpdateMovedFields;

#[async_trait]
impl Song for UpdateMovedFields {
    fn name(&self) -> &str {
        UPDATE_MOVED_FIELDS
    }

    fn description(&self) -> &str {
        "Re-own fields moved to another module"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        let moves = ctx.settings.moved_fields.clone();
        for entry in &moves {
            relocation::update_module_moved_fields(
                ctx,
                &entry.model,
                &entry.fields,
                &entry.old_module,
                &entry.new_module,
            )
            .await?;
        }
        Ok(())
    }
}

/// Drift checks only run in dev with `MIGRATION_CHECK_FIELDS=True`.
fn field_checks_enabled(ctx: &mut MigrationContext<'_>) -> bool {
    if !ctx.env.is_dev() {
        return false;
    }
    if !ctx.env.check_fields {
        ctx.log_line("If you never check the fields, please do it!");
        return false;
    }
    true
}

pub struct PreCheckFields;

#[async_trait]
impl Song for PreCheckFields {
    fn name(&self) -> &str {
        PRE_CHECK_FIELDS
    }

    fn description(&self) -> &str {
        "Snapshot field ownership before the upgrade"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        if !field_checks_enabled(ctx) {
            return Ok(());
        }
        let snapshot = FieldSnapshot::from_records(ctx.catalog().field_ownership().await?);
        let path = ctx.settings.check_fields_file.clone();
        snapshot.save(&path)?;
        ctx.log_line(format!("{} field(s) saved to {}", snapshot.len(), path.display()));
        Ok(())
    }
}

pub struct PostCheckFields;

#[async_trait]
impl Song for PostCheckFields {
    fn name(&self) -> &str {
        POST_CHECK_FIELDS
    }

    fn description(&self) -> &str {
        "Report fields whose owning modules changed during the upgrade"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        if !field_checks_enabled(ctx) {
            return Ok(());
        }
        let path = ctx.settings.check_fields_file.clone();
        if !path.exists() {
            return Err(SongError::user(format!(
                "no field snapshot at {}, run {PRE_CHECK_FIELDS} first",
                path.display()
            )));
        }
        let before = FieldSnapshot::load(&path)?;
        let after = FieldSnapshot::from_records(ctx.catalog().field_ownership().await?);

        for drift in detect_drift(&before, &after) {
            log::warn!("{drift}");
            ctx.log_line(drift.to_string());
        }
        Ok(())
    }
}

pub struct UninstallModules;

#[async_trait]
impl Song for UninstallModules {
    fn name(&self) -> &str {
        UNINSTALL_MODULES
    }

    fn description(&self) -> &str {
        "Flag configured modules for removal"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        let modules = ctx.settings.uninstall.clone();
        if modules.is_empty() {
            return Ok(());
        }
        let marked = ctx.catalog().mark_modules_to_remove(&modules).await?;
        ctx.log_line(format!("{marked} module(s) marked to remove: {}", modules.join(", ")));
        Ok(())
    }
}

/// Purges leftovers of uninstalled modules, one category at a time.
#[derive(Default)]
pub struct DatabaseCleanup {
    policy: PurgePolicy,
}

impl DatabaseCleanup {
    pub fn new(policy: PurgePolicy) -> Self {
        Self { policy }
    }

    async fn purge_kind(&self, ctx: &mut MigrationContext<'_>, kind: PurgeKind) -> SongResult<()> {
        let candidates = self.policy.filter(ctx.catalog().purge_candidates(kind).await?);
        for candidate in candidates {
            ctx.log_line(format!("Try to purge: {}", candidate.name));
            ctx.catalog().purge(&candidate).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Song for DatabaseCleanup {
    fn name(&self) -> &str {
        DATABASE_CLEANUP
    }

    fn description(&self) -> &str {
        "Purge models, columns, tables, data and menus of uninstalled modules"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        if !ctx.settings.database_cleanup {
            ctx.log_line("Database cleanup is disabled (migration.database_cleanup = false)");
            return Ok(());
        }
        for kind in PurgeKind::ALL {
            ctx.log_line(format!("Start purging {kind}s"));
            match self.purge_kind(ctx, kind).await {
                Ok(()) => {}
                Err(err) if err.is_soft() => {
                    ctx.log_line(format!("Cleanup resulted in error: '{err}'"));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Drops registry rows of modules that no addons path provides.
pub struct CleanUnavailableModules;

impl CleanUnavailableModules {
    /// Module directories holding a manifest, across every addons path.
    pub fn available_modules(addons_paths: &[PathBuf]) -> BTreeSet<String> {
        let mut available = BTreeSet::new();
        for root in addons_paths {
            for entry in WalkDir::new(root)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(Result::ok)
            {
                let is_manifest = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| MANIFEST_FILES.contains(&name));
                if !is_manifest {
                    continue;
                }
                if let Some(module) = entry
                    .path()
                    .parent()
                    .and_then(|dir| dir.file_name())
                    .and_then(|name| name.to_str())
                {
                    available.insert(module.to_string());
                }
            }
        }
        available
    }
}

#[async_trait]
impl Song for CleanUnavailableModules {
    fn name(&self) -> &str {
        CLEAN_UNAVAILABLE_MODULES
    }

    fn description(&self) -> &str {
        "Delete uninstalled modules missing from every addons path"
    }

    async fn play(&self, ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        if ctx.settings.addons_paths.is_empty() {
            ctx.log_line("No addons path configured, module list left untouched");
            return Ok(());
        }
        let available = Self::available_modules(&ctx.settings.addons_paths);
        let keep = ctx.settings.keep_unavailable.clone();
        let modules: Vec<ModuleRecord> = ctx.catalog().modules().await?;

        for module in modules {
            if available.contains(&module.name) || keep.contains(&module.name) {
                continue;
            }
            if !module.is_uninstalled() {
                ctx.log_line(format!(
                    "MODULE UNAVAILABLE BUT BAD STATE : {} ({})",
                    module.name, module.state
                ));
                continue;
            }
            ctx.log_line(format!("MODULE UNAVAILABLE (will be deleted) : {}", module.name));
            if ctx.catalog().module_has_metadata(&module.name).await? {
                ctx.log_line(
                    "===> CAN'T UNLINK MODULE, WE HAVE METADATA (See if we want to migrate or uninstall the module)",
                );
            } else {
                ctx.catalog().delete_module(&module.name).await?;
            }
        }
        Ok(())
    }
}

pub fn register(registry: &mut SongRegistry) {
    let fix_paths: Arc<dyn Song> = Arc::new(FixAttachmentPaths);
    let rename: Arc<dyn Song> = Arc::new(RenameModules);
    let moved_models: Arc<dyn Song> = Arc::new(UpdateMovedModels);
    let moved_fields: Arc<dyn Song> = Arc::new(UpdateMovedFields);
    let uninstall: Arc<dyn Song> = Arc::new(UninstallModules);
    let cleanup: Arc<dyn Song> = Arc::new(DatabaseCleanup::default());
    let clean_unavailable: Arc<dyn Song> = Arc::new(CleanUnavailableModules);

    registry.register(Arc::new(Medley::new(
        PRE,
        "PRE: migration",
        vec![
            fix_paths.clone(),
            rename.clone(),
            moved_models.clone(),
            moved_fields.clone(),
        ],
    )));
    registry.register(Arc::new(Medley::new(
        POST,
        "POST: migration",
        vec![uninstall.clone(), cleanup.clone(), clean_unavailable.clone()],
    )));

    for song in [fix_paths, rename, moved_models, moved_fields, uninstall, cleanup, clean_unavailable] {
        registry.register(song);
    }
    registry.register(Arc::new(PreCheckFields));
    registry.register(Arc::new(PostCheckFields));
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::catalog::{MemoryCatalog, PurgeCandidate, VERSION_TABLE};
    use crate::context::{RunEnvironment, RunningEnv, SongSettings};

    fn dev_with_checks() -> RunEnvironment {
        RunEnvironment {
            running_env: RunningEnv::Dev,
            check_fields: true,
            mode: None,
        }
    }

    #[tokio::test]
    async fn attachments_are_prefixed_in_prod() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_attachment(Some("ab/cdef"));
        let env = RunEnvironment {
            running_env: RunningEnv::Prod,
            ..RunEnvironment::default()
        };
        {
            let mut ctx = MigrationContext::new(&mut catalog, env, SongSettings::default());
            FixAttachmentPaths.play(&mut ctx).await.unwrap();
        }
        assert_eq!(
            catalog.attachments[0].store_fname.as_deref(),
            Some("s3://odoo-prod/ab/cdef")
        );
    }

    #[tokio::test]
    async fn remote_attachments_are_dropped_outside_prod() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_attachment(Some("ab/cdef"));
        catalog.add_attachment(Some("s3://odoo-prod/ab/cdef"));
        {
            let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
            FixAttachmentPaths.play(&mut ctx).await.unwrap();
        }
        assert_eq!(catalog.attachments.len(), 1);
        assert_eq!(catalog.attachments[0].store_fname.as_deref(), Some("ab/cdef"));
    }

    #[tokio::test]
    async fn field_checks_only_remind_without_flag() {
        let mut catalog = MemoryCatalog::new();
        let dev = RunEnvironment {
            check_fields: false,
            ..dev_with_checks()
        };
        let mut ctx = MigrationContext::new(&mut catalog, dev, SongSettings::default());
        PreCheckFields.play(&mut ctx).await.unwrap();
        assert_eq!(ctx.log.lines(), &["If you never check the fields, please do it!"]);

        let prod = RunEnvironment {
            running_env: RunningEnv::Prod,
            check_fields: true,
            mode: None,
        };
        let mut catalog = MemoryCatalog::new();
        let mut ctx = MigrationContext::new(&mut catalog, prod, SongSettings::default());
        PostCheckFields.play(&mut ctx).await.unwrap();
        assert!(ctx.log.is_empty());
    }

    #[tokio::test]
    async fn check_flag_alone_does_not_snapshot_outside_dev() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = SongSettings {
            check_fields_file: dir.path().join("pre_check_fields.csv"),
            ..SongSettings::default()
        };
        let unset = RunEnvironment {
            check_fields: true,
            ..RunEnvironment::default()
        };

        let mut catalog = MemoryCatalog::new();
        catalog.add_field("res.partner", "x_code", "modA");
        let mut ctx = MigrationContext::new(&mut catalog, unset, settings.clone());
        PreCheckFields.play(&mut ctx).await.unwrap();
        assert!(ctx.log.is_empty());
        assert!(!settings.check_fields_file.exists());
    }

    #[tokio::test]
    async fn pre_and_post_checks_report_moved_field() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = SongSettings {
            check_fields_file: dir.path().join("pre_check_fields.csv"),
            ..SongSettings::default()
        };

        let mut catalog = MemoryCatalog::new();
        catalog.add_field("res.partner", "x_code", "modA");
        {
            let mut ctx = MigrationContext::new(&mut catalog, dev_with_checks(), settings.clone());
            PreCheckFields.play(&mut ctx).await.unwrap();
        }

        for row in catalog.model_data.iter_mut().filter(|d| d.module == "modA") {
            row.module = "modB".to_string();
        }

        let mut ctx = MigrationContext::new(&mut catalog, dev_with_checks(), settings);
        PostCheckFields.play(&mut ctx).await.unwrap();
        let problems: Vec<_> = ctx
            .log
            .lines()
            .iter()
            .filter(|l| l.starts_with("PROBLEM ON DEFINED FIELD"))
            .collect();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("Model res.partner / Field x_code"));
        assert!(problems[0].contains("Old modules [modA] / New modules [modB]"));
    }

    #[tokio::test]
    async fn cleanup_is_opt_in() {
        let mut catalog = MemoryCatalog::new();
        catalog.seed_purge_candidates(PurgeKind::Table, vec![PurgeCandidate::table("x_old")]);
        {
            let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
            DatabaseCleanup::default().play(&mut ctx).await.unwrap();
        }
        assert!(catalog.purged.is_empty());
    }

    #[tokio::test]
    async fn cleanup_continues_after_refused_category() {
        let mut catalog = MemoryCatalog::new();
        catalog.seed_purge_candidates(
            PurgeKind::Model,
            vec![PurgeCandidate::row(PurgeKind::Model, 1, "x.old.model")],
        );
        catalog.seed_purge_candidates(
            PurgeKind::Table,
            vec![PurgeCandidate::table("x_old"), PurgeCandidate::table(VERSION_TABLE)],
        );
        catalog.refuse_purge.insert(PurgeKind::Model);

        let settings = SongSettings {
            database_cleanup: true,
            ..SongSettings::default()
        };
        let lines = {
            let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), settings);
            DatabaseCleanup::default().play(&mut ctx).await.unwrap();
            ctx.log.lines().to_vec()
        };

        assert!(lines.iter().any(|l| l.starts_with("Cleanup resulted in error: '")));
        assert!(lines.iter().any(|l| l == "Start purging menus"));
        assert_eq!(catalog.purged, vec![PurgeCandidate::table("x_old")]);
    }

    #[tokio::test]
    async fn unavailable_modules_are_deleted_when_safe() {
        let addons = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(addons.path().join("sale")).unwrap();
        fs::write(addons.path().join("sale/__manifest__.py"), "{}").unwrap();
        fs::create_dir_all(addons.path().join("legacy_report")).unwrap();
        fs::write(addons.path().join("legacy_report/__openerp__.py"), "{}").unwrap();

        let mut catalog = MemoryCatalog::new();
        catalog.add_module("sale", "installed");
        catalog.add_module("legacy_report", "uninstalled");
        catalog.add_module("gone_clean", "uninstalled");
        catalog.add_module("gone_with_data", "uninstallable");
        catalog.add_module("gone_installed", "installed");
        catalog.add_module("to_migrate", "uninstalled");
        catalog.add_xmlid("gone_with_data", "some_view", "ir.ui.view", 1);

        let settings = SongSettings {
            addons_paths: vec![addons.path().to_path_buf()],
            keep_unavailable: vec!["to_migrate".to_string()],
            ..SongSettings::default()
        };
        let lines = {
            let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), settings);
            CleanUnavailableModules.play(&mut ctx).await.unwrap();
            ctx.log.lines().to_vec()
        };

        let remaining: Vec<_> = catalog.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            remaining,
            vec!["sale", "legacy_report", "gone_with_data", "gone_installed", "to_migrate"]
        );
        assert!(lines.iter().any(|l| l.starts_with("===> CAN'T UNLINK MODULE")));
        assert!(
            lines
                .iter()
                .any(|l| l == "MODULE UNAVAILABLE BUT BAD STATE : gone_installed (installed)")
        );
    }
}
