//! Field-drift checker.
//!
//! Compares the owning modules of every field before and after a schema
//! refresh. A field whose module set changed is reported, never rejected.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    fs::File,
    io::{Read, Write},
    path::Path,
};

use crate::catalog::ModuleFieldRecord;
use crate::errors::{SongError, SongResult};

const HEADER: [&str; 3] = ["model", "module", "field"];

/// Owning modules per (model, field).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSnapshot {
    owners: BTreeMap<(String, String), BTreeSet<String>>,
}

impl FieldSnapshot {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ModuleFieldRecord>,
    {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    pub fn insert(&mut self, record: ModuleFieldRecord) {
        self.owners
            .entry((record.model, record.field))
            .or_default()
            .insert(record.module);
    }

    pub fn owners(&self, model: &str, field: &str) -> Option<&BTreeSet<String>> {
        self.owners.get(&(model.to_string(), field.to_string()))
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Flatten back into sorted triples.
    pub fn records(&self) -> Vec<ModuleFieldRecord> {
        self.owners
            .iter()
            .flat_map(|((model, field), modules)| {
                modules
                    .iter()
                    .map(move |module| ModuleFieldRecord::new(model, module, field))
            })
            .collect()
    }

    /// Write as `model,module,field` CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> SongResult<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(HEADER)?;
        for record in self.records() {
            csv.write_record([&record.model, &record.module, &record.field])?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Read `model,module,field` CSV. The header row is optional.
    pub fn read_csv<R: Read>(reader: R) -> SongResult<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut snapshot = Self::default();
        for (index, row) in csv.records().enumerate() {
            let row = row?;
            if index == 0 && row.iter().eq(HEADER) {
                continue;
            }
            if row.len() != HEADER.len() {
                return Err(SongError::other(format!(
                    "snapshot line {} has {} columns, expected {}",
                    index + 1,
                    row.len(),
                    HEADER.len()
                )));
            }
            snapshot.insert(ModuleFieldRecord::new(&row[0], &row[1], &row[2]));
        }
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> SongResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        self.write_csv(File::create(path)?)
    }

    pub fn load(path: &Path) -> SongResult<Self> {
        Self::read_csv(File::open(path)?)
    }
}

/// A field whose owning modules changed across the refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDrift {
    pub model: String,
    pub field: String,
    pub old_modules: BTreeSet<String>,
    pub new_modules: BTreeSet<String>,
}

impl fmt::Display for FieldDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PROBLEM ON DEFINED FIELD: Model {} / Field {} / Old modules {} / New modules {}",
            self.model,
            self.field,
            module_list(&self.old_modules),
            module_list(&self.new_modules)
        )
    }
}

fn module_list(modules: &BTreeSet<String>) -> String {
    let names: Vec<&str> = modules.iter().map(String::as_str).collect();
    format!("[{}]", names.join(", "))
}

/// Fields present in both snapshots whose non-empty "before" module set differs from "after".
pub fn detect_drift(before: &FieldSnapshot, after: &FieldSnapshot) -> Vec<FieldDrift> {
    after
        .owners
        .iter()
        .filter_map(|(key, new_modules)| {
            let old_modules = before.owners.get(key)?;
            if old_modules.is_empty() || old_modules == new_modules {
                return None;
            }
            Some(FieldDrift {
                model: key.0.clone(),
                field: key.1.clone(),
                old_modules: old_modules.clone(),
                new_modules: new_modules.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(triples: &[(&str, &str, &str)]) -> FieldSnapshot {
        FieldSnapshot::from_records(
            triples
                .iter()
                .map(|(model, module, field)| ModuleFieldRecord::new(*model, *module, *field)),
        )
    }

    #[test]
    fn identical_snapshots_have_no_drift() {
        let before = snapshot(&[("m1", "modA", "f1"), ("m1", "modB", "f1"), ("m2", "modA", "f2")]);
        let after = snapshot(&[("m2", "modA", "f2"), ("m1", "modB", "f1"), ("m1", "modA", "f1")]);
        assert!(detect_drift(&before, &after).is_empty());
    }

    #[test]
    fn changed_owner_yields_one_warning() {
        let before = snapshot(&[("m1", "modA", "f1")]);
        let after = snapshot(&[("m1", "modB", "f1")]);
        assert!(before.owners("m1", "f1").is_some_and(|owners| owners.contains("modA")));

        let drift = detect_drift(&before, &after);
        assert_eq!(drift.len(), 1);
        assert_eq!(
            drift[0].to_string(),
            "PROBLEM ON DEFINED FIELD: Model m1 / Field f1 / Old modules [modA] / New modules [modB]"
        );
    }

    #[test]
    fn new_and_removed_fields_are_not_drift() {
        let before = snapshot(&[("m1", "modA", "gone")]);
        let after = snapshot(&[("m1", "modA", "added")]);
        assert!(detect_drift(&before, &after).is_empty());
    }

    #[test]
    fn csv_reads_with_or_without_header() {
        let original = snapshot(&[("res.partner", "base", "name"), ("res.partner", "sale", "name")]);

        let mut buffer = Vec::new();
        original.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("model,module,field\n"));
        assert_eq!(FieldSnapshot::read_csv(buffer.as_slice()).unwrap(), original);

        let headerless = "res.partner,base,name\nres.partner,sale,name\n";
        assert_eq!(FieldSnapshot::read_csv(headerless.as_bytes()).unwrap(), original);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/pre_check_fields.csv");
        let original = snapshot(&[("m", "mod", "f")]);

        original.save(&path).unwrap();
        assert_eq!(FieldSnapshot::load(&path).unwrap(), original);
    }
}
