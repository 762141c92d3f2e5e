//! Repository for materialized view registrations.

use sqlx::{FromRow, PgConnection};
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::matviews::{MatviewCreateDBRequest, MatviewRegistration, MatviewUpdateDBRequest};
use crate::types::{abbrev_uuid, MatviewId};

/// What the catalogs say about a relation the refresher is about to touch.
#[derive(Debug, Clone, FromRow)]
pub struct MatviewCatalogInfo {
    pub is_matview: bool,
    pub populated: bool,
}

pub struct Matviews<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Matviews<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), err)]
    pub async fn create(&mut self, request: &MatviewCreateDBRequest) -> Result<MatviewRegistration> {
        let registration = sqlx::query_as::<_, MatviewRegistration>(
            r#"
            INSERT INTO _ayb_matviews (schema_name, view_name, refresh_mode)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&request.schema_name)
        .bind(&request.view_name)
        .bind(request.refresh_mode.as_str())
        .fetch_one(&mut *self.db)
        .await?;
        Ok(registration)
    }

    #[instrument(skip(self), fields(matview_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, id: MatviewId) -> Result<Option<MatviewRegistration>> {
        let registration = sqlx::query_as::<_, MatviewRegistration>("SELECT * FROM _ayb_matviews WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(registration)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_name(&mut self, schema_name: &str, view_name: &str) -> Result<Option<MatviewRegistration>> {
        let registration =
            sqlx::query_as::<_, MatviewRegistration>("SELECT * FROM _ayb_matviews WHERE schema_name = $1 AND view_name = $2")
                .bind(schema_name)
                .bind(view_name)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(registration)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<MatviewRegistration>> {
        let registrations = sqlx::query_as::<_, MatviewRegistration>("SELECT * FROM _ayb_matviews ORDER BY schema_name, view_name")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(registrations)
    }

    #[instrument(skip(self, request), fields(matview_id = %abbrev_uuid(&id)), err)]
    pub async fn update(&mut self, id: MatviewId, request: &MatviewUpdateDBRequest) -> Result<Option<MatviewRegistration>> {
        let registration = sqlx::query_as::<_, MatviewRegistration>(
            r#"
            UPDATE _ayb_matviews
            SET refresh_mode = COALESCE($2, refresh_mode), updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(request.refresh_mode.map(|m| m.as_str()))
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(registration)
    }

    #[instrument(skip(self), fields(matview_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: MatviewId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM _ayb_matviews WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Record the outcome of a refresh run.
    #[instrument(skip(self, error), fields(matview_id = %abbrev_uuid(&id)), err)]
    pub async fn record_refresh(&mut self, id: MatviewId, duration_ms: i64, error: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE _ayb_matviews
            SET last_refresh_at = now(),
                last_refresh_duration_ms = $2,
                last_refresh_status = CASE WHEN $3::text IS NULL THEN 'success' ELSE 'error' END,
                last_refresh_error = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(duration_ms)
        .bind(error)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    /// Look the target up in the catalogs: is it a materialized view, and is
    /// it populated?
    #[instrument(skip(self), err)]
    pub async fn catalog_info(&mut self, schema_name: &str, view_name: &str) -> Result<Option<MatviewCatalogInfo>> {
        let info = sqlx::query_as::<_, MatviewCatalogInfo>(
            r#"
            SELECT (c.relkind = 'm') AS is_matview, c.relispopulated AS populated
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
            "#,
        )
        .bind(schema_name)
        .bind(view_name)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(info)
    }

    /// Whether the view has an index usable by `REFRESH ... CONCURRENTLY`:
    /// unique, non-partial, no expression columns.
    #[instrument(skip(self), err)]
    pub async fn has_concurrent_refresh_index(&mut self, schema_name: &str, view_name: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM pg_index i
                JOIN pg_class c ON c.oid = i.indrelid
                JOIN pg_namespace n ON n.oid = c.relnamespace
                WHERE n.nspname = $1 AND c.relname = $2
                  AND i.indisunique
                  AND i.indpred IS NULL
                  AND i.indexprs IS NULL
            )
            "#,
        )
        .bind(schema_name)
        .bind(view_name)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(found)
    }
}
