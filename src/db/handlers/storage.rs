//! Repository for stored object metadata. The metadata row is the source of
//! truth; blob bytes live in the filesystem backend.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::storage::{StorageObject, StorageObjectCreateDBRequest};

pub struct StorageObjects<'c> {
    db: &'c mut PgConnection,
}

impl<'c> StorageObjects<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert or replace the metadata row for `(bucket, name)`.
    #[instrument(skip(self, request), fields(bucket = %request.bucket, name = %request.name), err)]
    pub async fn upsert(&mut self, request: &StorageObjectCreateDBRequest) -> Result<StorageObject> {
        let object = sqlx::query_as::<_, StorageObject>(
            r#"
            INSERT INTO _ayb_storage_objects (bucket, name, size, content_type)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (bucket, name) DO UPDATE
                SET size = EXCLUDED.size, content_type = EXCLUDED.content_type
            RETURNING *
            "#,
        )
        .bind(&request.bucket)
        .bind(&request.name)
        .bind(request.size)
        .bind(&request.content_type)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(object)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, bucket: &str, name: &str) -> Result<Option<StorageObject>> {
        let object = sqlx::query_as::<_, StorageObject>("SELECT * FROM _ayb_storage_objects WHERE bucket = $1 AND name = $2")
            .bind(bucket)
            .bind(name)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(object)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self, bucket: &str, limit: i64, offset: i64) -> Result<Vec<StorageObject>> {
        let objects = sqlx::query_as::<_, StorageObject>(
            r#"
            SELECT * FROM _ayb_storage_objects
            WHERE bucket = $1
            ORDER BY name
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(bucket)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(objects)
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&mut self, bucket: &str, name: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM _ayb_storage_objects WHERE bucket = $1 AND name = $2")
            .bind(bucket)
            .bind(name)
            .execute(&mut *self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
