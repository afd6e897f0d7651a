//! Ownership rewrites for models, fields and modules that moved between
//! packaging modules.
//!
//! These only touch metadata rows and are idempotent: a second call with
//! the same arguments finds nothing left to move.

use crate::context::{MigrationContext, ModuleRename};
use crate::errors::SongResult;

/// Re-own `models` (and their fields) from `old_module` to `new_module`.
///
/// Models missing from the model catalog are skipped silently.
pub async fn update_module_moved_models(
    ctx: &mut MigrationContext<'_>,
    models: &[String],
    old_module: &str,
    new_module: &str,
) -> SongResult<u64> {
    let mut moved = 0;
    for model in models {
        let Some(model_id) = ctx.catalog().model_id(model).await? else {
            log::debug!("model {model} not found, nothing to move");
            continue;
        };
        let rows = ctx
            .catalog()
            .reassign_model_data(model_id, old_module, new_module)
            .await?;
        ctx.log_line(format!("{model}: {rows} metadata row(s) moved from {old_module} to {new_module}"));
        moved += rows;
    }
    Ok(moved)
}

pub async fn update_module_moved_fields(
    ctx: &mut MigrationContext<'_>,
    model: &str,
    fields: &[String],
    old_module: &str,
    new_module: &str,
) -> SongResult<u64> {
    let rows = ctx
        .catalog()
        .reassign_field_data(model, fields, old_module, new_module)
        .await?;
    ctx.log_line(format!(
        "{model} [{}]: {rows} metadata row(s) moved from {old_module} to {new_module}",
        fields.join(", ")
    ));
    Ok(rows)
}

/// Rename modules in the bookkeeping tables, merging into existing targets.
pub async fn update_module_names(ctx: &mut MigrationContext<'_>, renames: &[ModuleRename]) -> SongResult<u64> {
    let mut affected = 0;
    for rename in renames {
        let rows = ctx.catalog().rename_module(&rename.old, &rename.new).await?;
        ctx.log_line(format!("{} -> {}: {rows} row(s) updated", rename.old, rename.new));
        affected += rows;
    }
    Ok(affected)
}
