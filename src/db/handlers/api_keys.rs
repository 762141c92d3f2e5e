//! Repository for API keys.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::api_keys::{ApiKey, ApiKeyCreateDBRequest};
use crate::types::{abbrev_uuid, ApiKeyId};

pub struct ApiKeys<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ApiKeys<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    pub async fn create(&mut self, request: &ApiKeyCreateDBRequest) -> Result<ApiKey> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO _ayb_api_keys (name, key_hash, scope, app_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.key_hash)
        .bind(&request.scope)
        .bind(request.app_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(key)
    }

    #[instrument(skip(self), fields(key_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, id: ApiKeyId) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>("SELECT * FROM _ayb_api_keys WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(key)
    }

    /// Look a presented key up by its digest and stamp `last_used_at`.
    #[instrument(skip(self, key_hash), err)]
    pub async fn authenticate(&mut self, key_hash: &str) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            UPDATE _ayb_api_keys
            SET last_used_at = now()
            WHERE key_hash = $1
            RETURNING *
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(key)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>("SELECT * FROM _ayb_api_keys ORDER BY created_at DESC")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(keys)
    }

    #[instrument(skip(self), fields(key_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: ApiKeyId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM _ayb_api_keys WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
