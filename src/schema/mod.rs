//! Schema cache: introspects PostgreSQL once at startup and on demand, and
//! hands out an immutable snapshot to the data plane.
//!
//! Readers grab the current [`SchemaSnapshot`] pointer and never block;
//! refresh builds a new snapshot and swaps the pointer atomically. A single
//! in-flight refresh is enforced with a try-lock — a second caller gets the
//! existing snapshot back with a `Skipped` outcome. Introspection failure
//! leaves the previous snapshot in place.

pub mod introspect;
pub mod model;

use std::sync::Arc;

use arc_swap::ArcSwap;
use sqlx::PgPool;
use tracing::instrument;

pub use model::{
    ColumnInfo, ForeignKeyInfo, FunctionInfo, IndexInfo, JsonType, RelationshipInfo, RelationshipKind, SchemaSnapshot, TableInfo,
    TableKind, SYSTEM_TABLE_PREFIX,
};

use crate::db::errors::Result;

/// Outcome of a refresh request.
pub enum RefreshOutcome {
    /// A new snapshot was built and installed.
    Refreshed(Arc<SchemaSnapshot>),
    /// Another refresh was already running; the current snapshot is returned.
    Skipped(Arc<SchemaSnapshot>),
}

impl RefreshOutcome {
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        match self {
            RefreshOutcome::Refreshed(s) | RefreshOutcome::Skipped(s) => s.clone(),
        }
    }

    pub fn was_skipped(&self) -> bool {
        matches!(self, RefreshOutcome::Skipped(_))
    }
}

pub struct SchemaCache {
    pool: PgPool,
    schemas: Vec<String>,
    snapshot: ArcSwap<SchemaSnapshot>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SchemaCache {
    /// Introspect the database and build the initial cache. Fails hard — a
    /// server without a schema snapshot cannot serve the data plane.
    pub async fn build(pool: PgPool, schemas: Vec<String>) -> Result<Self> {
        let snapshot = introspect::introspect(&pool, &schemas).await?;
        tracing::info!(
            tables = snapshot.tables.len(),
            functions = snapshot.functions.len(),
            "Schema cache built"
        );
        Ok(Self {
            pool,
            schemas,
            snapshot: ArcSwap::from_pointee(snapshot),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Current snapshot; cheap, lock-free.
    pub fn current(&self) -> Arc<SchemaSnapshot> {
        self.snapshot.load_full()
    }

    /// Re-introspect and swap the snapshot. Concurrent calls collapse into a
    /// `Skipped` outcome for all but the first.
    #[instrument(skip(self), err)]
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let Ok(_token) = self.refresh_lock.try_lock() else {
            tracing::debug!("Schema refresh already in flight, returning current snapshot");
            return Ok(RefreshOutcome::Skipped(self.current()));
        };

        let snapshot = introspect::introspect(&self.pool, &self.schemas).await?;
        let snapshot = Arc::new(snapshot);
        self.snapshot.store(snapshot.clone());
        tracing::info!(tables = snapshot.tables.len(), "Schema cache refreshed");
        Ok(RefreshOutcome::Refreshed(snapshot))
    }

    /// Resolve a user-facing collection name to a table.
    ///
    /// Accepts `schema.table` or a bare table name searched through the
    /// configured schemas in order. System tables are never resolvable here.
    pub fn resolve_collection<'a>(&self, snapshot: &'a SchemaSnapshot, name: &str) -> Option<&'a TableInfo> {
        let table = if let Some((schema, table)) = name.split_once('.') {
            snapshot.get_table(schema, table)
        } else {
            self.schemas.iter().find_map(|schema| snapshot.get_table(schema, name))
        }?;
        if table.is_system() {
            return None;
        }
        Some(table)
    }

    /// Resolve an RPC function name (`fn` or `schema.fn`).
    pub fn resolve_function<'a>(&self, snapshot: &'a SchemaSnapshot, name: &str) -> Option<&'a FunctionInfo> {
        if let Some((schema, func)) = name.split_once('.') {
            snapshot.functions.get(&format!("{schema}.{func}"))
        } else {
            self.schemas
                .iter()
                .find_map(|schema| snapshot.functions.get(&format!("{schema}.{name}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot_with(table_names: &[(&str, &str)]) -> SchemaSnapshot {
        let mut tables = BTreeMap::new();
        for (schema, name) in table_names {
            let info = TableInfo {
                schema: schema.to_string(),
                name: name.to_string(),
                kind: TableKind::Table,
                columns: Vec::new(),
                primary_key: Vec::new(),
                foreign_keys: Vec::new(),
                indexes: Vec::new(),
                relationships: Vec::new(),
            };
            tables.insert(info.key(), info);
        }
        SchemaSnapshot {
            built_at: Utc::now(),
            tables,
            functions: BTreeMap::new(),
        }
    }

    fn cache_for_test(schemas: &[&str]) -> SchemaCache {
        SchemaCache {
            pool: sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/unused").unwrap(),
            schemas: schemas.iter().map(|s| s.to_string()).collect(),
            snapshot: ArcSwap::from_pointee(snapshot_with(&[])),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[tokio::test]
    async fn bare_names_resolve_through_schema_search_order() {
        let cache = cache_for_test(&["app", "public"]);
        let snapshot = snapshot_with(&[("public", "votes"), ("app", "votes"), ("public", "polls")]);

        let hit = cache.resolve_collection(&snapshot, "votes").unwrap();
        assert_eq!(hit.schema, "app");

        let qualified = cache.resolve_collection(&snapshot, "public.votes").unwrap();
        assert_eq!(qualified.schema, "public");

        assert!(cache.resolve_collection(&snapshot, "missing").is_none());
    }

    #[tokio::test]
    async fn system_tables_are_hidden_from_collections() {
        let cache = cache_for_test(&["public"]);
        let snapshot = snapshot_with(&[("public", "_ayb_jobs"), ("public", "votes")]);
        assert!(cache.resolve_collection(&snapshot, "_ayb_jobs").is_none());
        assert!(cache.resolve_collection(&snapshot, "public._ayb_jobs").is_none());
        assert!(cache.resolve_collection(&snapshot, "votes").is_some());
    }
}
