//! Module renames and model/field moves played through the `migration.pre` medley.

use songbook::{
    MemoryCatalog, MigrationContext, RunEnvironment, SongRegistry, SongSettings,
    context::{ModuleRename, MovedFields, MovedModels},
    songs::migration::PRE,
};

fn settings() -> SongSettings {
    SongSettings {
        renamed_modules: vec![
            ModuleRename {
                old: "sale_legacy".to_string(),
                new: "sale_custom".to_string(),
            },
            ModuleRename {
                old: "crm_old".to_string(),
                new: "crm".to_string(),
            },
        ],
        moved_models: vec![MovedModels {
            models: vec!["my.custom.model".to_string(), "not.installed".to_string()],
            old_module: "old_module".to_string(),
            new_module: "new_module".to_string(),
        }],
        moved_fields: vec![MovedFields {
            model: "product.template".to_string(),
            fields: vec!["purchase_ok".to_string()],
            old_module: "invoice_webkit".to_string(),
            new_module: "product".to_string(),
        }],
        ..SongSettings::default()
    }
}

fn seeded_catalog() -> MemoryCatalog {
    let mut catalog = MemoryCatalog::new();
    catalog.add_module("sale_legacy", "installed");
    catalog.add_module("crm_old", "installed");
    catalog.add_module("crm", "installed");
    catalog.add_xmlid("base", "module_sale_legacy", "ir.module.module", 1);
    catalog.add_xmlid("base", "module_crm_old", "ir.module.module", 2);
    catalog.add_xmlid("crm_old", "view_lead_form", "ir.ui.view", 10);
    catalog
        .dependencies
        .push(("sale_report".to_string(), "sale_legacy".to_string()));

    catalog.add_field("my.custom.model", "name", "old_module");
    catalog.add_field("my.custom.model", "code", "old_module");
    catalog.add_field("product.template", "purchase_ok", "invoice_webkit");
    catalog.add_field("product.template", "sale_ok", "invoice_webkit");
    catalog
}

async fn play_pre(catalog: &mut MemoryCatalog) {
    let registry = SongRegistry::with_builtin();
    let song = registry.get(PRE).expect("migration.pre is built in");
    let mut ctx = MigrationContext::new(catalog, RunEnvironment::default(), settings());
    song.play(&mut ctx).await.expect("relocation should succeed");
}

fn owners(catalog: &MemoryCatalog, model: &str, field: &str) -> Vec<String> {
    catalog.field_owners(model, field).into_iter().collect()
}

// ============================================================================
// Relocation
// ============================================================================

#[tokio::test]
async fn renames_and_moves_rewrite_ownership() {
    let mut catalog = seeded_catalog();
    play_pre(&mut catalog).await;

    let modules: Vec<&str> = catalog.modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(modules, vec!["sale_custom", "crm"]);

    assert!(
        catalog
            .model_data
            .iter()
            .any(|d| d.module == "base" && d.name == "module_sale_custom")
    );
    assert!(!catalog.model_data.iter().any(|d| d.name == "module_crm_old"));
    assert!(
        catalog
            .model_data
            .iter()
            .any(|d| d.module == "crm" && d.name == "view_lead_form")
    );
    assert_eq!(
        catalog.dependencies,
        vec![("sale_report".to_string(), "sale_custom".to_string())]
    );

    assert_eq!(owners(&catalog, "my.custom.model", "code"), vec!["new_module"]);
    assert_eq!(owners(&catalog, "product.template", "purchase_ok"), vec!["product"]);
    assert_eq!(owners(&catalog, "product.template", "sale_ok"), vec!["invoice_webkit"]);
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let mut catalog = seeded_catalog();
    play_pre(&mut catalog).await;
    let after_first = catalog.clone();

    play_pre(&mut catalog).await;
    assert_eq!(catalog, after_first);
}

#[tokio::test]
async fn target_owning_the_same_xmlid_keeps_its_row() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_module("crm_old", "installed");
    catalog.add_module("crm", "installed");
    catalog.add_xmlid("crm_old", "menu_root", "ir.ui.menu", 1);
    catalog.add_xmlid("crm", "menu_root", "ir.ui.menu", 2);

    play_pre(&mut catalog).await;

    let menus: Vec<(&str, i64)> = catalog
        .model_data
        .iter()
        .filter(|d| d.name == "menu_root")
        .map(|d| (d.module.as_str(), d.res_id))
        .collect();
    assert_eq!(menus, vec![("crm", 2)]);
}
