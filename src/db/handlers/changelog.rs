//! Repository for the change log and the triggers that feed it.

use sqlx::{FromRow, PgConnection};
use tracing::instrument;

use crate::collections::sql::quote_ident;
use crate::db::errors::{DbError, Result};
use crate::db::models::changelog::ChangeRow;

/// Name of the trigger installed on replicated tables.
pub const CHANGELOG_TRIGGER: &str = "_ayb_changelog_trg";

#[derive(Debug, Clone, FromRow)]
pub struct ReplicatedTable {
    pub schema_name: String,
    pub table_name: String,
}

pub struct Changelog<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Changelog<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Change rows after `after_id`, oldest first.
    #[instrument(skip(self), err)]
    pub async fn fetch_since(&mut self, after_id: i64, limit: i64) -> Result<Vec<ChangeRow>> {
        let rows = sqlx::query_as::<_, ChangeRow>("SELECT * FROM _ayb_changelog WHERE id > $1 ORDER BY id ASC LIMIT $2")
            .bind(after_id)
            .bind(limit)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(rows)
    }

    /// Highest change id, or 0 for an empty log.
    #[instrument(skip(self), err)]
    pub async fn latest_id(&mut self) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>("SELECT COALESCE(max(id), 0) FROM _ayb_changelog")
            .fetch_one(&mut *self.db)
            .await?;
        Ok(id)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, id: i64) -> Result<Option<ChangeRow>> {
        let row = sqlx::query_as::<_, ChangeRow>("SELECT * FROM _ayb_changelog WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row)
    }

    /// Delete change rows older than the retention window.
    #[instrument(skip(self), err)]
    pub async fn prune(&mut self, retention_secs: f64) -> Result<u64> {
        let done = sqlx::query("DELETE FROM _ayb_changelog WHERE ts < now() - make_interval(secs => $1)")
            .bind(retention_secs)
            .execute(&mut *self.db)
            .await?;
        Ok(done.rows_affected())
    }

    /// Install the change-log trigger on a table, replacing any previous copy.
    #[instrument(skip(self), err)]
    pub async fn install_trigger(&mut self, schema: &str, table: &str) -> Result<()> {
        require_identifier(schema)?;
        require_identifier(table)?;
        let target = format!("{}.{}", quote_ident(schema), quote_ident(table));
        let drop = format!("DROP TRIGGER IF EXISTS {CHANGELOG_TRIGGER} ON {target}");
        let create = format!(
            "CREATE TRIGGER {CHANGELOG_TRIGGER} AFTER INSERT OR UPDATE OR DELETE ON {target} \
             FOR EACH ROW EXECUTE FUNCTION _ayb_changelog_fn()"
        );
        sqlx::query(&drop).execute(&mut *self.db).await?;
        sqlx::query(&create).execute(&mut *self.db).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn drop_trigger(&mut self, schema: &str, table: &str) -> Result<()> {
        require_identifier(schema)?;
        require_identifier(table)?;
        let target = format!("{}.{}", quote_ident(schema), quote_ident(table));
        let drop = format!("DROP TRIGGER IF EXISTS {CHANGELOG_TRIGGER} ON {target}");
        sqlx::query(&drop).execute(&mut *self.db).await?;
        Ok(())
    }

    /// Tables currently carrying the change-log trigger.
    #[instrument(skip(self), err)]
    pub async fn list_replicated(&mut self) -> Result<Vec<ReplicatedTable>> {
        let tables = sqlx::query_as::<_, ReplicatedTable>(
            r#"
            SELECT n.nspname AS schema_name, c.relname AS table_name
            FROM pg_trigger t
            JOIN pg_class c ON c.oid = t.tgrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE t.tgname = $1 AND NOT t.tgisinternal
            ORDER BY n.nspname, c.relname
            "#,
        )
        .bind(CHANGELOG_TRIGGER)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(tables)
    }
}

/// Validate `^[A-Za-z_][A-Za-z0-9_]*$` before an identifier reaches DDL text.
pub fn require_identifier(name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(DbError::Other(anyhow::anyhow!("invalid identifier: {name}")))
    }
}

pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation_enforces_the_format() {
        assert!(is_valid_identifier("leaderboard"));
        assert!(is_valid_identifier("_ayb_jobs"));
        assert!(is_valid_identifier("Tbl2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("semi;colon"));
        assert!(!is_valid_identifier("quote\"d"));
    }
}
