//! Repository for registered applications.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::apps::{App, AppCreateDBRequest, AppUpdateDBRequest};
use crate::types::{abbrev_uuid, AppId};

pub struct Apps<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Apps<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    pub async fn create(&mut self, request: &AppCreateDBRequest) -> Result<App> {
        let app = sqlx::query_as::<_, App>(
            r#"
            INSERT INTO _ayb_apps (name, description)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(app)
    }

    #[instrument(skip(self), fields(app_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, id: AppId) -> Result<Option<App>> {
        let app = sqlx::query_as::<_, App>("SELECT * FROM _ayb_apps WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(app)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<App>> {
        let apps = sqlx::query_as::<_, App>("SELECT * FROM _ayb_apps ORDER BY name")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(apps)
    }

    #[instrument(skip(self, request), fields(app_id = %abbrev_uuid(&id)), err)]
    pub async fn update(&mut self, id: AppId, request: &AppUpdateDBRequest) -> Result<Option<App>> {
        let app = sqlx::query_as::<_, App>(
            r#"
            UPDATE _ayb_apps
            SET name = COALESCE($2, name),
                description = CASE WHEN $3::boolean THEN $4 ELSE description END,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(request.description.is_some())
        .bind(request.description.clone().flatten())
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(app)
    }

    #[instrument(skip(self), fields(app_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: AppId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM _ayb_apps WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
