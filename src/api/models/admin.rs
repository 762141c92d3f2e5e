//! API models for the admin control plane itself.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Whether authentication is enforced
    pub auth: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AuthRequest {
    pub password: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthResponse {
    /// Bearer token for subsequent admin calls
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SqlExecRequest {
    /// A single SQL statement
    pub statement: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SqlExecResponse {
    /// Result rows, when the statement returned any
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<serde_json::Value>,
    pub rows_affected: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchemaRefreshResponse {
    /// False when another refresh was already running
    pub refreshed: bool,
    pub tables: usize,
    pub functions: usize,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReplicationRequest {
    #[serde(default = "default_schema")]
    pub schema_name: String,
    pub table_name: String,
}

fn default_schema() -> String {
    "public".to_string()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReplicatedTableResponse {
    pub schema_name: String,
    pub table_name: String,
}
