//! In-memory catalog mirroring the SQL semantics of [`super::PgCatalog`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    Catalog, FIELD_XMLID_MODEL, MODEL_XMLID_MODEL, ModuleFieldRecord, ModuleRecord, PurgeCandidate, PurgeKind,
    PurgeLocator, VersionRecord,
};
use crate::errors::{SongError, SongResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRow {
    pub id: i64,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRow {
    pub id: i64,
    pub model_id: i64,
    pub model: String,
    pub name: String,
}

/// `ir_model_data` row: an xml id owned by `module` pointing at `model`/`res_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDataRow {
    pub id: i64,
    pub module: String,
    pub name: String,
    pub model: String,
    pub res_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRow {
    pub id: i64,
    pub store_fname: Option<String>,
}

/// Bookkeeping tables held in memory.
///
/// Purge candidates are seeded by the caller. Unseeded data candidates are
/// derived from `model_data` like the SQL catalog does. `refuse_purge` makes every
/// purge of a kind fail with a soft error, the way the framework refuses to
/// drop an artifact that is still referenced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryCatalog {
    pub modules: Vec<ModuleRecord>,
    /// (module, dependency name)
    pub dependencies: Vec<(String, String)>,
    pub models: Vec<ModelRow>,
    pub fields: Vec<FieldRow>,
    pub model_data: Vec<ModelDataRow>,
    pub attachments: Vec<AttachmentRow>,
    pub purge_candidates: BTreeMap<PurgeKind, Vec<PurgeCandidate>>,
    pub refuse_purge: BTreeSet<PurgeKind>,
    pub purged: Vec<PurgeCandidate>,
    pub versions: Vec<VersionRecord>,
    pub url_index: bool,
    next_id: i64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_module(&mut self, name: &str, state: &str) {
        self.modules.push(ModuleRecord::new(name, state));
    }

    /// Add a model whose `ir.model` xml id belongs to `module`. Returns the model id.
    pub fn add_model(&mut self, model: &str, module: &str) -> i64 {
        let id = self.allocate_id();
        self.models.push(ModelRow {
            id,
            model: model.to_string(),
        });
        self.add_xmlid(module, &format!("model_{}", model.replace('.', "_")), MODEL_XMLID_MODEL, id);
        id
    }

    /// Add a field to an existing (or new) model, owned by `module`. Returns the field id.
    pub fn add_field(&mut self, model: &str, field: &str, module: &str) -> i64 {
        let model_id = match self.models.iter().find(|m| m.model == model) {
            Some(row) => row.id,
            None => self.add_model(model, module),
        };
        let id = self.allocate_id();
        self.fields.push(FieldRow {
            id,
            model_id,
            model: model.to_string(),
            name: field.to_string(),
        });
        self.add_xmlid(
            module,
            &format!("field_{}__{field}", model.replace('.', "_")),
            FIELD_XMLID_MODEL,
            id,
        );
        id
    }

    pub fn add_xmlid(&mut self, module: &str, name: &str, model: &str, res_id: i64) -> i64 {
        let id = self.allocate_id();
        self.model_data.push(ModelDataRow {
            id,
            module: module.to_string(),
            name: name.to_string(),
            model: model.to_string(),
            res_id,
        });
        id
    }

    pub fn add_attachment(&mut self, store_fname: Option<&str>) -> i64 {
        let id = self.allocate_id();
        self.attachments.push(AttachmentRow {
            id,
            store_fname: store_fname.map(str::to_string),
        });
        id
    }

    pub fn seed_purge_candidates(&mut self, kind: PurgeKind, candidates: Vec<PurgeCandidate>) {
        self.purge_candidates.insert(kind, candidates);
    }

    /// Modules owning the xml ids of `model.field`.
    pub fn field_owners(&self, model: &str, field: &str) -> BTreeSet<String> {
        self.fields
            .iter()
            .filter(|f| f.model == model && f.name == field)
            .flat_map(|f| {
                self.model_data
                    .iter()
                    .filter(move |d| d.model == FIELD_XMLID_MODEL && d.res_id == f.id)
            })
            .map(|d| d.module.clone())
            .collect()
    }

    fn move_xmlids<F>(&mut self, old_module: &str, new_module: &str, selects: F) -> u64
    where
        F: Fn(&ModelDataRow) -> bool,
    {
        let taken: BTreeSet<String> = self
            .model_data
            .iter()
            .filter(|d| d.module == new_module)
            .map(|d| d.name.clone())
            .collect();

        let mut moved = 0;
        for row in self.model_data.iter_mut() {
            if row.module == old_module && selects(row) && !taken.contains(&row.name) {
                row.module = new_module.to_string();
                moved += 1;
            }
        }
        moved
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn model_id(&mut self, model: &str) -> SongResult<Option<i64>> {
        Ok(self.models.iter().find(|m| m.model == model).map(|m| m.id))
    }

    async fn reassign_model_data(&mut self, model_id: i64, old_module: &str, new_module: &str) -> SongResult<u64> {
        let field_ids: BTreeSet<i64> = self
            .fields
            .iter()
            .filter(|f| f.model_id == model_id)
            .map(|f| f.id)
            .collect();

        let model_rows = self.move_xmlids(old_module, new_module, |d| {
            d.model == MODEL_XMLID_MODEL && d.res_id == model_id
        });
        let field_rows = self.move_xmlids(old_module, new_module, |d| {
            d.model == FIELD_XMLID_MODEL && field_ids.contains(&d.res_id)
        });
        Ok(model_rows + field_rows)
    }

    async fn reassign_field_data(
        &mut self,
        model: &str,
        fields: &[String],
        old_module: &str,
        new_module: &str,
    ) -> SongResult<u64> {
        let field_ids: BTreeSet<i64> = self
            .fields
            .iter()
            .filter(|f| f.model == model && fields.contains(&f.name))
            .map(|f| f.id)
            .collect();

        Ok(self.move_xmlids(old_module, new_module, |d| {
            d.model == FIELD_XMLID_MODEL && field_ids.contains(&d.res_id)
        }))
    }

    async fn rename_module(&mut self, old: &str, new: &str) -> SongResult<u64> {
        let old_xmlid = format!("module_{old}");
        let new_xmlid = format!("module_{new}");
        let mut affected = 0;

        if self.modules.iter().any(|m| m.name == new) {
            let before = self.modules.len();
            self.modules.retain(|m| m.name != old);
            affected += (before - self.modules.len()) as u64;
            self.model_data
                .retain(|d| !(d.module == "base" && d.model == "ir.module.module" && d.name == old_xmlid));
        } else {
            for module in self.modules.iter_mut().filter(|m| m.name == old) {
                module.name = new.to_string();
                affected += 1;
            }
            for row in self
                .model_data
                .iter_mut()
                .filter(|d| d.module == "base" && d.model == "ir.module.module" && d.name == old_xmlid)
            {
                row.name = new_xmlid.clone();
            }
        }

        affected += self.move_xmlids(old, new, |_| true);

        let before = self.model_data.len();
        self.model_data.retain(|d| d.module != old);
        affected += (before - self.model_data.len()) as u64;

        for dependency in self.dependencies.iter_mut().filter(|(_, name)| name == old) {
            dependency.1 = new.to_string();
            affected += 1;
        }

        Ok(affected)
    }

    async fn field_ownership(&mut self) -> SongResult<Vec<ModuleFieldRecord>> {
        let mut records = Vec::new();
        for field in &self.fields {
            for data in self
                .model_data
                .iter()
                .filter(|d| d.model == FIELD_XMLID_MODEL && d.res_id == field.id)
            {
                records.push(ModuleFieldRecord::new(&field.model, &data.module, &field.name));
            }
        }
        Ok(records)
    }

    async fn modules(&mut self) -> SongResult<Vec<ModuleRecord>> {
        let mut modules = self.modules.clone();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(modules)
    }

    async fn module_has_metadata(&mut self, module: &str) -> SongResult<bool> {
        Ok(self.model_data.iter().any(|d| d.module == module))
    }

    async fn delete_module(&mut self, module: &str) -> SongResult<()> {
        let xmlid = format!("module_{module}");
        self.modules.retain(|m| m.name != module);
        self.dependencies.retain(|(owner, _)| owner != module);
        self.model_data
            .retain(|d| !(d.module == "base" && d.model == "ir.module.module" && d.name == xmlid));
        Ok(())
    }

    async fn mark_modules_to_remove(&mut self, modules: &[String]) -> SongResult<u64> {
        let mut marked = 0;
        for module in self
            .modules
            .iter_mut()
            .filter(|m| modules.contains(&m.name) && matches!(m.state.as_str(), "installed" | "to upgrade"))
        {
            module.state = "to remove".to_string();
            marked += 1;
        }
        Ok(marked)
    }

    async fn purge_candidates(&mut self, kind: PurgeKind) -> SongResult<Vec<PurgeCandidate>> {
        if let Some(seeded) = self.purge_candidates.get(&kind) {
            return Ok(seeded.clone());
        }
        if kind != PurgeKind::Data {
            return Ok(Vec::new());
        }

        let mut orphans: Vec<&ModelDataRow> = self
            .model_data
            .iter()
            .filter(|d| {
                self.modules
                    .iter()
                    .find(|m| m.name == d.module)
                    .is_none_or(ModuleRecord::is_uninstalled)
            })
            .collect();
        orphans.sort_by(|a, b| (&a.module, &a.name).cmp(&(&b.module, &b.name)));
        Ok(orphans
            .into_iter()
            .map(|d| PurgeCandidate::row(PurgeKind::Data, d.id, format!("{}.{}", d.module, d.name)))
            .collect())
    }

    async fn purge(&mut self, candidate: &PurgeCandidate) -> SongResult<()> {
        if self.refuse_purge.contains(&candidate.kind) {
            return Err(SongError::user(format!(
                "cannot purge {} '{}': still referenced",
                candidate.kind, candidate.name
            )));
        }
        if let Some(candidates) = self.purge_candidates.get_mut(&candidate.kind) {
            candidates.retain(|c| c != candidate);
        }
        if let (PurgeKind::Data, PurgeLocator::Row(id)) = (candidate.kind, &candidate.locator) {
            self.model_data.retain(|d| d.id != *id);
        }
        self.purged.push(candidate.clone());
        Ok(())
    }

    async fn prefix_attachment_store(&mut self, prefix: &str) -> SongResult<u64> {
        let mut updated = 0;
        for attachment in self.attachments.iter_mut() {
            if let Some(fname) = attachment.store_fname.as_mut()
                && !fname.starts_with("s3://")
            {
                *fname = format!("{prefix}{fname}");
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_remote_attachments(&mut self) -> SongResult<u64> {
        let before = self.attachments.len();
        self.attachments
            .retain(|a| !a.store_fname.as_deref().is_some_and(|f| f.starts_with("s3://")));
        Ok((before - self.attachments.len()) as u64)
    }

    async fn ensure_attachment_url_index(&mut self) -> SongResult<bool> {
        self.url_index = true;
        Ok(true)
    }

    async fn version_history(&mut self) -> SongResult<Vec<VersionRecord>> {
        let mut history = self.versions.clone();
        // Finished versions first, latest first; unfinished ones last.
        history.sort_by(|a, b| match (a.date_done, b.date_done) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(history)
    }

    async fn start_version(&mut self, number: &str) -> SongResult<()> {
        let now = Utc::now().naive_utc();
        match self.versions.iter_mut().find(|v| v.number == number) {
            Some(version) => {
                version.date_start = Some(now);
                version.date_done = None;
                version.log = None;
            }
            None => self.versions.push(VersionRecord {
                number: number.to_string(),
                date_start: Some(now),
                date_done: None,
                log: None,
            }),
        }
        Ok(())
    }

    async fn finish_version(&mut self, number: &str, log: &str) -> SongResult<()> {
        if let Some(version) = self.versions.iter_mut().find(|v| v.number == number) {
            version.date_done = Some(Utc::now().naive_utc());
            version.log = Some(log.to_string());
        }
        Ok(())
    }
}
