//! API models for row-level security administration.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::handlers::rls::{PolicyCommand, PolicyRow, TableRlsStatus};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PolicyCreate {
    #[serde(default = "default_schema")]
    pub schema_name: String,
    pub policy_name: String,
    #[serde(default = "default_command")]
    pub command: PolicyCommand,
    /// SQL boolean expression for `USING`
    #[serde(default)]
    pub using_expr: Option<String>,
    /// SQL boolean expression for `WITH CHECK`
    #[serde(default)]
    pub check_expr: Option<String>,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_command() -> PolicyCommand {
    PolicyCommand::All
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PolicyResponse {
    pub schema_name: String,
    pub table_name: String,
    pub policy_name: String,
    pub command: String,
    pub permissive: bool,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub using_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_expr: Option<String>,
}

impl From<PolicyRow> for PolicyResponse {
    fn from(row: PolicyRow) -> Self {
        Self {
            schema_name: row.schema_name,
            table_name: row.table_name,
            policy_name: row.policy_name,
            command: row.command,
            permissive: row.permissive,
            roles: row.roles,
            using_expr: row.using_expr,
            check_expr: row.check_expr,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RlsStatusResponse {
    pub schema_name: String,
    pub table_name: String,
    pub rls_enabled: bool,
    pub rls_forced: bool,
}

impl From<TableRlsStatus> for RlsStatusResponse {
    fn from(status: TableRlsStatus) -> Self {
        Self {
            schema_name: status.schema_name,
            table_name: status.table_name,
            rls_enabled: status.rls_enabled,
            rls_forced: status.rls_forced,
        }
    }
}
