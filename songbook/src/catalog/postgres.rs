//! PostgreSQL catalog over a single connection.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Connection, PgConnection};

use super::{
    Catalog, FIELD_XMLID_MODEL, MODEL_XMLID_MODEL, ModuleFieldRecord, ModuleRecord, PurgeCandidate, PurgeKind,
    PurgeLocator, VERSION_TABLE, VersionRecord,
};
use crate::errors::{SongError, SongResult};

const FIELD_OWNERSHIP_QUERY: &str = "\
    SELECT f.model, d.module, f.name \
    FROM ir_model_fields f \
    INNER JOIN ir_model_data d ON f.id = d.res_id AND d.model = 'ir.model.fields'";

const PURGE_MODELS_QUERY: &str = "\
    SELECT m.id, m.model FROM ir_model m \
    WHERE m.state <> 'manual' \
    AND NOT EXISTS ( \
        SELECT 1 FROM ir_model_data d \
        JOIN ir_module_module mm ON mm.name = d.module \
        WHERE d.model = 'ir.model' AND d.res_id = m.id \
        AND COALESCE(mm.state, 'uninstalled') NOT IN ('uninstalled', 'uninstallable')) \
    ORDER BY m.model";

const PURGE_COLUMNS_QUERY: &str = "\
    SELECT c.table_name::text, c.column_name::text \
    FROM information_schema.columns c \
    JOIN ir_model m ON replace(m.model, '.', '_') = c.table_name \
    WHERE c.table_schema = current_schema() \
    AND c.column_name NOT IN ('id', 'create_uid', 'create_date', 'write_uid', 'write_date') \
    AND (SELECT count(*) FROM ir_model o WHERE replace(o.model, '.', '_') = c.table_name) = 1 \
    AND EXISTS (SELECT 1 FROM ir_model_fields f WHERE f.model_id = m.id) \
    AND NOT EXISTS ( \
        SELECT 1 FROM ir_model_fields f WHERE f.model_id = m.id AND f.name = c.column_name) \
    ORDER BY c.table_name, c.column_name";

/// Many2many tables recorded for modules that are gone or uninstalled, and
/// that no live module or field still claims.
const PURGE_TABLES_QUERY: &str = "\
    SELECT DISTINCT r.name::text FROM ir_model_relation r \
    JOIN information_schema.tables t ON t.table_name = r.name \
        AND t.table_schema = current_schema() AND t.table_type = 'BASE TABLE' \
    LEFT JOIN ir_module_module mm ON mm.id = r.module \
    WHERE COALESCE(mm.state, 'uninstalled') IN ('uninstalled', 'uninstallable') \
    AND NOT EXISTS ( \
        SELECT 1 FROM ir_model_relation live \
        JOIN ir_module_module lm ON lm.id = live.module \
        WHERE live.name = r.name AND COALESCE(lm.state, 'uninstalled') NOT IN ('uninstalled', 'uninstallable')) \
    AND NOT EXISTS (SELECT 1 FROM ir_model_fields f WHERE f.relation_table = r.name) \
    ORDER BY 1";

/// Xml ids of modules that are gone or uninstalled. Modules pending an
/// install, upgrade or removal keep theirs for the framework.
const PURGE_DATA_QUERY: &str = "\
    SELECT d.id, d.module || '.' || d.name FROM ir_model_data d \
    WHERE NOT EXISTS ( \
        SELECT 1 FROM ir_module_module mm WHERE mm.name = d.module \
        AND COALESCE(mm.state, 'uninstalled') NOT IN ('uninstalled', 'uninstallable')) \
    ORDER BY d.module, d.name";

const PURGE_MENUS_QUERY: &str = "\
    SELECT m.id, COALESCE(m.name::text, m.id::text) FROM ir_ui_menu m \
    JOIN ir_act_window a ON m.action = 'ir.actions.act_window,' || a.id \
    WHERE NOT EXISTS (SELECT 1 FROM ir_model im WHERE im.model = a.res_model) \
    ORDER BY m.id";

const CREATE_VERSION_TABLE: &str = "\
    CREATE TABLE IF NOT EXISTS marabunta_version ( \
        id SERIAL PRIMARY KEY, \
        number VARCHAR NOT NULL, \
        date_start TIMESTAMP NOT NULL, \
        date_done TIMESTAMP, \
        log TEXT, \
        addons TEXT)";

/// Catalog backed by raw SQL on one PostgreSQL connection.
///
/// Statements run in autocommit mode; only multi-statement purges use a
/// transaction.
pub struct PgCatalog {
    conn: PgConnection,
}

impl PgCatalog {
    pub async fn connect(url: &str) -> SongResult<Self> {
        let conn = PgConnection::connect(url).await?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap a connection whose session (search path, role) is already set up.
    pub fn from_connection(conn: PgConnection) -> Self {
        Self { conn }
    }

    pub async fn close(self) -> SongResult<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> SongResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&mut self.conn)
        .await?;
        Ok(exists)
    }

    async fn purge_row(&mut self, kind: PurgeKind, id: i64) -> Result<(), sqlx::Error> {
        let mut tx = self.conn.begin().await?;
        match kind {
            PurgeKind::Model => {
                sqlx::query(
                    "DELETE FROM ir_model_data WHERE model = $1 \
                     AND res_id IN (SELECT id FROM ir_model_fields WHERE model_id = $2)",
                )
                .bind(FIELD_XMLID_MODEL)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM ir_model_fields WHERE model_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM ir_model_data WHERE model = $1 AND res_id = $2")
                    .bind(MODEL_XMLID_MODEL)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM ir_model WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            PurgeKind::Data => {
                sqlx::query("DELETE FROM ir_model_data WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            PurgeKind::Menu => {
                sqlx::query("DELETE FROM ir_ui_menu WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            PurgeKind::Column | PurgeKind::Table => {}
        }
        tx.commit().await
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn model_id(&mut self, model: &str) -> SongResult<Option<i64>> {
        let id: Option<i32> = sqlx::query_scalar("SELECT id FROM ir_model WHERE model = $1")
            .bind(model)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(id.map(i64::from))
    }

    async fn reassign_model_data(&mut self, model_id: i64, old_module: &str, new_module: &str) -> SongResult<u64> {
        let model_rows = sqlx::query(
            "UPDATE ir_model_data d SET module = $1 \
             WHERE d.module = $2 AND d.model = $3 AND d.res_id = $4 \
             AND NOT EXISTS (SELECT 1 FROM ir_model_data x WHERE x.module = $1 AND x.name = d.name)",
        )
        .bind(new_module)
        .bind(old_module)
        .bind(MODEL_XMLID_MODEL)
        .bind(model_id)
        .execute(&mut self.conn)
        .await?
        .rows_affected();

        let field_rows = sqlx::query(
            "UPDATE ir_model_data d SET module = $1 \
             WHERE d.module = $2 AND d.model = $3 \
             AND d.res_id IN (SELECT id FROM ir_model_fields WHERE model_id = $4) \
             AND NOT EXISTS (SELECT 1 FROM ir_model_data x WHERE x.module = $1 AND x.name = d.name)",
        )
        .bind(new_module)
        .bind(old_module)
        .bind(FIELD_XMLID_MODEL)
        .bind(model_id)
        .execute(&mut self.conn)
        .await?
        .rows_affected();

        log::debug!("model {model_id}: {model_rows} model and {field_rows} field xml id(s) moved to {new_module}");
        Ok(model_rows + field_rows)
    }

    async fn reassign_field_data(
        &mut self,
        model: &str,
        fields: &[String],
        old_module: &str,
        new_module: &str,
    ) -> SongResult<u64> {
        let rows = sqlx::query(
            "UPDATE ir_model_data d SET module = $1 \
             WHERE d.module = $2 AND d.model = $3 \
             AND d.res_id IN (SELECT id FROM ir_model_fields WHERE model = $4 AND name = ANY($5)) \
             AND NOT EXISTS (SELECT 1 FROM ir_model_data x WHERE x.module = $1 AND x.name = d.name)",
        )
        .bind(new_module)
        .bind(old_module)
        .bind(FIELD_XMLID_MODEL)
        .bind(model)
        .bind(fields)
        .execute(&mut self.conn)
        .await?
        .rows_affected();

        log::debug!("{model}: {rows} field xml id(s) moved from {old_module} to {new_module}");
        Ok(rows)
    }

    async fn rename_module(&mut self, old: &str, new: &str) -> SongResult<u64> {
        let target_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM ir_module_module WHERE name = $1)")
            .bind(new)
            .fetch_one(&mut self.conn)
            .await?;

        let old_xmlid = format!("module_{old}");
        let new_xmlid = format!("module_{new}");
        let mut affected = 0;

        if target_exists {
            affected += sqlx::query("DELETE FROM ir_module_module WHERE name = $1")
                .bind(old)
                .execute(&mut self.conn)
                .await?
                .rows_affected();
            sqlx::query("DELETE FROM ir_model_data WHERE module = 'base' AND model = 'ir.module.module' AND name = $1")
                .bind(&old_xmlid)
                .execute(&mut self.conn)
                .await?;
        } else {
            affected += sqlx::query("UPDATE ir_module_module SET name = $1 WHERE name = $2")
                .bind(new)
                .bind(old)
                .execute(&mut self.conn)
                .await?
                .rows_affected();
            sqlx::query(
                "UPDATE ir_model_data SET name = $1 \
                 WHERE module = 'base' AND model = 'ir.module.module' AND name = $2",
            )
            .bind(&new_xmlid)
            .bind(&old_xmlid)
            .execute(&mut self.conn)
            .await?;
        }

        affected += sqlx::query(
            "UPDATE ir_model_data d SET module = $1 WHERE d.module = $2 \
             AND NOT EXISTS (SELECT 1 FROM ir_model_data x WHERE x.module = $1 AND x.name = d.name)",
        )
        .bind(new)
        .bind(old)
        .execute(&mut self.conn)
        .await?
        .rows_affected();

        // Leftovers collide with xml ids the target module already owns.
        affected += sqlx::query("DELETE FROM ir_model_data WHERE module = $1")
            .bind(old)
            .execute(&mut self.conn)
            .await?
            .rows_affected();

        affected += sqlx::query("UPDATE ir_module_module_dependency SET name = $1 WHERE name = $2")
            .bind(new)
            .bind(old)
            .execute(&mut self.conn)
            .await?
            .rows_affected();

        log::debug!("rename {old} -> {new}: {affected} row(s)");
        Ok(affected)
    }

    async fn field_ownership(&mut self) -> SongResult<Vec<ModuleFieldRecord>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(FIELD_OWNERSHIP_QUERY)
            .fetch_all(&mut self.conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(model, module, field)| ModuleFieldRecord { model, module, field })
            .collect())
    }

    async fn modules(&mut self) -> SongResult<Vec<ModuleRecord>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as("SELECT name, state FROM ir_module_module ORDER BY name")
            .fetch_all(&mut self.conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name, state)| ModuleRecord {
                name,
                state: state.unwrap_or_default(),
            })
            .collect())
    }

    async fn module_has_metadata(&mut self, module: &str) -> SongResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM ir_model_data WHERE module = $1)")
            .bind(module)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(exists)
    }

    async fn delete_module(&mut self, module: &str) -> SongResult<()> {
        sqlx::query("DELETE FROM ir_module_module WHERE name = $1")
            .bind(module)
            .execute(&mut self.conn)
            .await?;
        sqlx::query("DELETE FROM ir_model_data WHERE module = 'base' AND model = 'ir.module.module' AND name = $1")
            .bind(format!("module_{module}"))
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn mark_modules_to_remove(&mut self, modules: &[String]) -> SongResult<u64> {
        let rows = sqlx::query(
            "UPDATE ir_module_module SET state = 'to remove' \
             WHERE name = ANY($1) AND state IN ('installed', 'to upgrade')",
        )
        .bind(modules)
        .execute(&mut self.conn)
        .await?
        .rows_affected();
        Ok(rows)
    }

    async fn purge_candidates(&mut self, kind: PurgeKind) -> SongResult<Vec<PurgeCandidate>> {
        let candidates = match kind {
            PurgeKind::Column => {
                let rows: Vec<(String, String)> = sqlx::query_as(PURGE_COLUMNS_QUERY).fetch_all(&mut self.conn).await?;
                rows.into_iter()
                    .map(|(table, column)| PurgeCandidate::column(table, column))
                    .collect()
            }
            PurgeKind::Table => {
                let rows: Vec<String> = sqlx::query_scalar(PURGE_TABLES_QUERY).fetch_all(&mut self.conn).await?;
                rows.into_iter().map(PurgeCandidate::table).collect()
            }
            PurgeKind::Model | PurgeKind::Data | PurgeKind::Menu => {
                let query = match kind {
                    PurgeKind::Model => PURGE_MODELS_QUERY,
                    PurgeKind::Data => PURGE_DATA_QUERY,
                    _ => PURGE_MENUS_QUERY,
                };
                let rows: Vec<(i32, String)> = sqlx::query_as(query).fetch_all(&mut self.conn).await?;
                rows.into_iter()
                    .map(|(id, name)| PurgeCandidate::row(kind, i64::from(id), name))
                    .collect()
            }
        };
        Ok(candidates)
    }

    async fn purge(&mut self, candidate: &PurgeCandidate) -> SongResult<()> {
        let result = match (&candidate.locator, candidate.kind) {
            (PurgeLocator::Table(table), PurgeKind::Table) => {
                let statement = format!("DROP TABLE {}", quote_ident(table));
                sqlx::query(&statement).execute(&mut self.conn).await.map(|_| ())
            }
            (PurgeLocator::Column { table, column }, PurgeKind::Column) => {
                let statement = format!("ALTER TABLE {} DROP COLUMN {}", quote_ident(table), quote_ident(column));
                sqlx::query(&statement).execute(&mut self.conn).await.map(|_| ())
            }
            (PurgeLocator::Row(id), kind @ (PurgeKind::Model | PurgeKind::Data | PurgeKind::Menu)) => {
                self.purge_row(kind, *id).await
            }
            (locator, kind) => {
                return Err(SongError::other(format!("cannot purge {kind} through {locator:?}")));
            }
        };

        result.map_err(|err| SongError::user(format!("cannot purge {} '{}': {err}", candidate.kind, candidate.name)))
    }

    async fn prefix_attachment_store(&mut self, prefix: &str) -> SongResult<u64> {
        let rows = sqlx::query(
            "UPDATE ir_attachment SET store_fname = $1 || store_fname \
             WHERE store_fname IS NOT NULL AND store_fname NOT LIKE 's3://%'",
        )
        .bind(prefix)
        .execute(&mut self.conn)
        .await?
        .rows_affected();
        Ok(rows)
    }

    async fn delete_remote_attachments(&mut self) -> SongResult<u64> {
        let rows = sqlx::query("DELETE FROM ir_attachment WHERE store_fname IS NOT NULL AND store_fname LIKE 's3://%'")
            .execute(&mut self.conn)
            .await?
            .rows_affected();
        Ok(rows)
    }

    async fn ensure_attachment_url_index(&mut self) -> SongResult<bool> {
        if let Err(err) = sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
            .execute(&mut self.conn)
            .await
        {
            log::warn!("pg_trgm extension could not be installed: {err}");
        }

        let installed: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'pg_trgm')")
            .fetch_one(&mut self.conn)
            .await?;
        if !installed {
            return Ok(false);
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS ir_attachment_url_trgm_index ON ir_attachment USING gin (url gin_trgm_ops)")
            .execute(&mut self.conn)
            .await?;
        Ok(true)
    }

    async fn version_history(&mut self) -> SongResult<Vec<VersionRecord>> {
        if !self.table_exists(VERSION_TABLE).await? {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, Option<NaiveDateTime>, Option<NaiveDateTime>, Option<String>)> = sqlx::query_as(
            "SELECT number, date_start, date_done, log FROM marabunta_version \
             ORDER BY date_done DESC NULLS LAST, id DESC",
        )
        .fetch_all(&mut self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(number, date_start, date_done, log)| VersionRecord {
                number,
                date_start,
                date_done,
                log,
            })
            .collect())
    }

    async fn start_version(&mut self, number: &str) -> SongResult<()> {
        sqlx::query(CREATE_VERSION_TABLE).execute(&mut self.conn).await?;

        let restarted = sqlx::query(
            "UPDATE marabunta_version SET date_start = now() AT TIME ZONE 'utc', date_done = NULL, log = NULL \
             WHERE number = $1",
        )
        .bind(number)
        .execute(&mut self.conn)
        .await?
        .rows_affected();

        if restarted == 0 {
            sqlx::query("INSERT INTO marabunta_version (number, date_start) VALUES ($1, now() AT TIME ZONE 'utc')")
                .bind(number)
                .execute(&mut self.conn)
                .await?;
        }
        Ok(())
    }

    async fn finish_version(&mut self, number: &str, log: &str) -> SongResult<()> {
        sqlx::query("UPDATE marabunta_version SET date_done = now() AT TIME ZONE 'utc', log = $2 WHERE number = $1")
            .bind(number)
            .bind(log)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }
}

/// Names of the user databases reachable through `url`, excluding maintenance databases.
pub async fn list_databases(url: &str) -> SongResult<Vec<String>> {
    let mut conn = PgConnection::connect(url).await?;
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT datname::text FROM pg_database \
         WHERE datistemplate = false AND datname NOT IN ('postgres', 'odoo') \
         ORDER BY datname",
    )
    .fetch_all(&mut conn)
    .await?;
    conn.close().await?;
    Ok(names)
}

/// Quote a SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
