//! Repository for row-level security management: policy CRUD and per-table
//! RLS toggles. Table and policy names are validated identifiers; policy
//! expressions are admin-supplied SQL fragments (this surface is reachable
//! only from the admin plane, which can run arbitrary SQL anyway).

use sqlx::{FromRow, PgConnection};
use tracing::instrument;

use crate::collections::sql::quote_ident;
use crate::db::errors::{DbError, Result};
use crate::db::handlers::changelog::require_identifier;

#[derive(Debug, Clone, FromRow)]
pub struct PolicyRow {
    pub schema_name: String,
    pub table_name: String,
    pub policy_name: String,
    pub command: String,
    pub permissive: bool,
    pub roles: Vec<String>,
    pub using_expr: Option<String>,
    pub check_expr: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TableRlsStatus {
    pub schema_name: String,
    pub table_name: String,
    pub rls_enabled: bool,
    pub rls_forced: bool,
}

/// Policy command scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PolicyCommand {
    All,
    Select,
    Insert,
    Update,
    Delete,
}

impl PolicyCommand {
    pub fn sql(&self) -> &'static str {
        match self {
            PolicyCommand::All => "ALL",
            PolicyCommand::Select => "SELECT",
            PolicyCommand::Insert => "INSERT",
            PolicyCommand::Update => "UPDATE",
            PolicyCommand::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyCreateRequest {
    pub schema_name: String,
    pub table_name: String,
    pub policy_name: String,
    pub command: PolicyCommand,
    pub using_expr: Option<String>,
    pub check_expr: Option<String>,
}

pub struct Rls<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Rls<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn list_policies(&mut self, table: Option<&str>) -> Result<Vec<PolicyRow>> {
        let policies = sqlx::query_as::<_, PolicyRow>(
            r#"
            SELECT schemaname AS schema_name,
                   tablename AS table_name,
                   policyname AS policy_name,
                   cmd AS command,
                   (permissive = 'PERMISSIVE') AS permissive,
                   COALESCE(roles::text[], ARRAY[]::text[]) AS roles,
                   qual AS using_expr,
                   with_check AS check_expr
            FROM pg_policies
            WHERE ($1::text IS NULL OR tablename = $1)
            ORDER BY schemaname, tablename, policyname
            "#,
        )
        .bind(table)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(policies)
    }

    #[instrument(skip(self), err)]
    pub async fn table_status(&mut self, schema: &str, table: &str) -> Result<Option<TableRlsStatus>> {
        let status = sqlx::query_as::<_, TableRlsStatus>(
            r#"
            SELECT n.nspname AS schema_name,
                   c.relname AS table_name,
                   c.relrowsecurity AS rls_enabled,
                   c.relforcerowsecurity AS rls_forced
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p')
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(status)
    }

    #[instrument(skip(self), err)]
    pub async fn set_enabled(&mut self, schema: &str, table: &str, enabled: bool) -> Result<()> {
        require_identifier(schema)?;
        require_identifier(table)?;
        let verb = if enabled { "ENABLE" } else { "DISABLE" };
        let sql = format!(
            "ALTER TABLE {}.{} {verb} ROW LEVEL SECURITY",
            quote_ident(schema),
            quote_ident(table)
        );
        sqlx::query(&sql).execute(&mut *self.db).await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(policy = %request.policy_name), err)]
    pub async fn create_policy(&mut self, request: &PolicyCreateRequest) -> Result<()> {
        require_identifier(&request.schema_name)?;
        require_identifier(&request.table_name)?;
        require_identifier(&request.policy_name)?;
        if request.using_expr.is_none() && request.check_expr.is_none() {
            return Err(DbError::Other(anyhow::anyhow!(
                "policy needs a USING or WITH CHECK expression"
            )));
        }

        let mut sql = format!(
            "CREATE POLICY {} ON {}.{} FOR {}",
            quote_ident(&request.policy_name),
            quote_ident(&request.schema_name),
            quote_ident(&request.table_name),
            request.command.sql()
        );
        if let Some(using) = &request.using_expr {
            sql.push_str(&format!(" USING ({using})"));
        }
        if let Some(check) = &request.check_expr {
            sql.push_str(&format!(" WITH CHECK ({check})"));
        }
        sqlx::query(&sql).execute(&mut *self.db).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn drop_policy(&mut self, schema: &str, table: &str, policy: &str) -> Result<()> {
        require_identifier(schema)?;
        require_identifier(table)?;
        require_identifier(policy)?;
        let sql = format!(
            "DROP POLICY {} ON {}.{}",
            quote_ident(policy),
            quote_ident(schema),
            quote_ident(table)
        );
        sqlx::query(&sql).execute(&mut *self.db).await?;
        Ok(())
    }
}
