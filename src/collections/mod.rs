//! Collections data plane: CRUD, list/search/filter/sort/expand and batch over
//! any user table, executed on the request's identity-stamped transaction so
//! row-level security applies to every statement.

pub mod filter;
pub mod sql;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, Row};
use tracing::instrument;

use crate::db::errors::DbError;
use crate::errors::{Error, Result};
use crate::schema::model::{RelationshipKind, TableInfo};
use crate::schema::SchemaCache;
use crate::session::RequestSession;
use filter::FilterExpr;
use sql::{build_expand, BuiltQuery, SortTerm, SqlBuilder};

/// Default page size when `perPage` is absent.
pub const DEFAULT_PER_PAGE: i64 = 30;
/// Upper bound on `perPage`.
pub const MAX_PER_PAGE: i64 = 500;

/// Parsed list request.
#[derive(Debug, Default)]
pub struct ListOptions {
    pub page: i64,
    pub per_page: i64,
    pub sort: Vec<SortTerm>,
    pub filter: Option<FilterExpr>,
    pub search: Option<String>,
    pub expand: Vec<String>,
}

/// Standard list envelope.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListEnvelope {
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<Value>,
    pub page: i64,
    pub per_page: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

/// One operation inside a batch request.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct BatchOperation {
    pub method: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub body: Option<Value>,
}

/// Per-operation result, in request order.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchOperationResult {
    pub index: usize,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub body: Option<Value>,
}

/// Status marking an operation that never ran because an earlier one failed.
pub const BATCH_NOT_RUN: u16 = 424;

pub struct BatchOutcome {
    pub results: Vec<BatchOperationResult>,
    /// Status of the whole batch: 200, or the failing operation's status.
    pub status: u16,
    pub all_ok: bool,
}

pub struct CollectionService {
    schema: Arc<SchemaCache>,
}

impl CollectionService {
    pub fn new(schema: Arc<SchemaCache>) -> Self {
        Self { schema }
    }

    fn resolve<'a>(&self, snapshot: &'a crate::schema::SchemaSnapshot, name: &str) -> Result<&'a TableInfo> {
        self.schema
            .resolve_collection(snapshot, name)
            .ok_or_else(|| Error::not_found("collection", name))
    }

    #[instrument(skip(self, session), err)]
    pub async fn list(&self, session: &mut RequestSession, collection: &str, opts: &ListOptions) -> Result<ListEnvelope> {
        if opts.per_page < 1 {
            return Err(Error::bad_request("perPage must be at least 1"));
        }
        if opts.page < 1 {
            return Err(Error::bad_request("page must be at least 1"));
        }
        let per_page = opts.per_page.min(MAX_PER_PAGE);

        let snapshot = self.schema.current();
        let table = self.resolve(&snapshot, collection)?;
        let built = SqlBuilder::new(table).build_list(opts.filter.as_ref(), opts.search.as_deref(), &opts.sort, opts.page, per_page)?;

        let rows = run_query(session.conn(), &built).await?;
        let mut total_items = 0i64;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            total_items = row.try_get::<i64, _>("total").map_err(db_decode)?;
            items.push(row.try_get::<Value, _>("row").map_err(db_decode)?);
        }
        // Past-the-end pages return no rows, so the window total is lost;
        // recover it with a dedicated count.
        if items.is_empty() && opts.page > 1 {
            let count_built = SqlBuilder::new(table).build_list(opts.filter.as_ref(), opts.search.as_deref(), &[], 1, 1)?;
            let rows = run_query(session.conn(), &count_built).await?;
            if let Some(row) = rows.first() {
                total_items = row.try_get::<i64, _>("total").map_err(db_decode)?;
            }
        }

        if !opts.expand.is_empty() {
            self.attach_expansions(session.conn(), table, &snapshot, &mut items, &opts.expand).await?;
        }

        let total_pages = if total_items == 0 { 0 } else { (total_items + per_page - 1) / per_page };
        Ok(ListEnvelope {
            items,
            page: opts.page,
            per_page,
            total_items,
            total_pages,
        })
    }

    #[instrument(skip(self, session), err)]
    pub async fn get(&self, session: &mut RequestSession, collection: &str, id: &str, expand: &[String]) -> Result<Value> {
        let snapshot = self.schema.current();
        let table = self.resolve(&snapshot, collection)?;
        let built = SqlBuilder::new(table).build_get(id)?;
        let row = run_query_optional(session.conn(), &built)
            .await?
            .ok_or_else(|| Error::not_found("record", id))?;
        let mut item = row.try_get::<Value, _>("row").map_err(db_decode)?;
        if !expand.is_empty() {
            let mut items = vec![item];
            self.attach_expansions(session.conn(), table, &snapshot, &mut items, expand).await?;
            item = items.pop().expect("one item");
        }
        Ok(item)
    }

    #[instrument(skip(self, session, body), err)]
    pub async fn create(&self, session: &mut RequestSession, collection: &str, body: &Value) -> Result<Value> {
        let snapshot = self.schema.current();
        let table = self.resolve(&snapshot, collection)?;
        let object = body
            .as_object()
            .ok_or_else(|| Error::bad_request("request body must be a JSON object"))?;
        let built = SqlBuilder::new(table).build_insert(object)?;
        let row = run_query_one(session.conn(), &built).await?;
        row.try_get::<Value, _>("row").map_err(db_decode)
    }

    #[instrument(skip(self, session, body), err)]
    pub async fn update(&self, session: &mut RequestSession, collection: &str, id: &str, body: &Value) -> Result<Value> {
        let snapshot = self.schema.current();
        let table = self.resolve(&snapshot, collection)?;
        let object = body
            .as_object()
            .ok_or_else(|| Error::bad_request("request body must be a JSON object"))?;
        let built = SqlBuilder::new(table).build_update(id, object)?;
        let row = run_query_optional(session.conn(), &built)
            .await?
            .ok_or_else(|| Error::not_found("record", id))?;
        row.try_get::<Value, _>("row").map_err(db_decode)
    }

    #[instrument(skip(self, session), err)]
    pub async fn delete(&self, session: &mut RequestSession, collection: &str, id: &str) -> Result<()> {
        let snapshot = self.schema.current();
        let table = self.resolve(&snapshot, collection)?;
        let built = SqlBuilder::new(table).build_delete(id)?;
        let mut query = sqlx::query(&built.sql);
        for param in &built.params {
            query = query.bind(param.clone());
        }
        let done = query.execute(session.conn()).await.map_err(DbError::from)?;
        if done.rows_affected() == 0 {
            return Err(Error::not_found("record", id));
        }
        Ok(())
    }

    /// Execute a batch of operations in request order on the session's single
    /// transaction. The caller commits on success and rolls back otherwise —
    /// one failure undoes the whole batch.
    #[instrument(skip(self, session, operations), fields(ops = operations.len()), err)]
    pub async fn batch(&self, session: &mut RequestSession, collection: &str, operations: &[BatchOperation]) -> Result<BatchOutcome> {
        let mut results = Vec::with_capacity(operations.len());
        let mut failure: Option<u16> = None;

        for (index, op) in operations.iter().enumerate() {
            if failure.is_some() {
                results.push(BatchOperationResult {
                    index,
                    status: BATCH_NOT_RUN,
                    body: None,
                });
                continue;
            }

            let outcome = self.run_batch_op(session, collection, op).await;
            match outcome {
                Ok((status, body)) => results.push(BatchOperationResult { index, status, body }),
                Err(err) => {
                    let status = err.status_code().as_u16();
                    let body = serde_json::json!({ "message": err.user_message() });
                    results.push(BatchOperationResult {
                        index,
                        status,
                        body: Some(body),
                    });
                    failure = Some(status);
                }
            }
        }

        Ok(BatchOutcome {
            results,
            status: failure.unwrap_or(200),
            all_ok: failure.is_none(),
        })
    }

    async fn run_batch_op(&self, session: &mut RequestSession, collection: &str, op: &BatchOperation) -> Result<(u16, Option<Value>)> {
        let need_id = || {
            op.id
                .as_deref()
                .ok_or_else(|| Error::bad_request(format!("{} requires an id", op.method)))
        };
        let need_body = || {
            op.body
                .as_ref()
                .ok_or_else(|| Error::bad_request(format!("{} requires a body", op.method)))
        };
        match op.method.to_ascii_uppercase().as_str() {
            "POST" => {
                let row = self.create(session, collection, need_body()?).await?;
                Ok((201, Some(row)))
            }
            "PATCH" => {
                let row = self.update(session, collection, need_id()?, need_body()?).await?;
                Ok((200, Some(row)))
            }
            "DELETE" => {
                self.delete(session, collection, need_id()?).await?;
                Ok((204, None))
            }
            "GET" => {
                let row = self.get(session, collection, need_id()?, &[]).await?;
                Ok((200, Some(row)))
            }
            other => Err(Error::bad_request(format!("unsupported batch method {other}"))),
        }
    }

    /// Attach related rows for each requested relationship field. One
    /// secondary query per relationship, keyed by the collected parent
    /// values — never one per parent row.
    async fn attach_expansions(
        &self,
        conn: &mut PgConnection,
        table: &TableInfo,
        snapshot: &crate::schema::SchemaSnapshot,
        items: &mut [Value],
        expand: &[String],
    ) -> Result<()> {
        for field in expand {
            let rel = table
                .relationship(field)
                .ok_or_else(|| Error::bad_field(format!("unknown expand field {field}"), field.clone()))?;
            let target = snapshot
                .table_by_key(&rel.target)
                .ok_or_else(|| Error::not_found("collection", &rel.target))?;

            let mut parent_keys: Vec<String> = Vec::new();
            for item in items.iter() {
                if let Some(key) = json_key_text(item.get(rel.local_column.as_str())) {
                    if !parent_keys.contains(&key) {
                        parent_keys.push(key);
                    }
                }
            }
            if parent_keys.is_empty() {
                continue;
            }

            let built = build_expand(rel, target, &parent_keys)?;
            let rows = sqlx::query(&built.sql)
                .bind(&parent_keys)
                .fetch_all(&mut *conn)
                .await
                .map_err(DbError::from)?;

            let mut children: std::collections::HashMap<String, Vec<Value>> = std::collections::HashMap::new();
            for row in rows {
                let key: String = row.try_get("parent_key").map_err(db_decode)?;
                let child: Value = row.try_get("row").map_err(db_decode)?;
                children.entry(key).or_default().push(child);
            }

            for item in items.iter_mut() {
                let Some(object) = item.as_object_mut() else { continue };
                let key = json_key_text(object.get(rel.local_column.as_str()));
                let related = key.and_then(|k| children.get(&k));
                let value = match rel.kind {
                    RelationshipKind::ManyToOne => related.and_then(|v| v.first().cloned()).unwrap_or(Value::Null),
                    RelationshipKind::OneToMany | RelationshipKind::ManyToMany => {
                        Value::Array(related.cloned().unwrap_or_default())
                    }
                };
                object.insert(field.clone(), value);
            }
        }
        Ok(())
    }
}

/// Text form of a JSON scalar used as a join key.
fn json_key_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn db_decode(err: sqlx::Error) -> Error {
    Error::Database(DbError::from(err))
}

async fn run_query(conn: &mut PgConnection, built: &BuiltQuery) -> Result<Vec<sqlx::postgres::PgRow>> {
    let mut query = sqlx::query(&built.sql);
    for param in &built.params {
        query = query.bind(param.clone());
    }
    query.fetch_all(conn).await.map_err(|e| Error::Database(DbError::from(e)))
}

async fn run_query_optional(conn: &mut PgConnection, built: &BuiltQuery) -> Result<Option<sqlx::postgres::PgRow>> {
    let mut query = sqlx::query(&built.sql);
    for param in &built.params {
        query = query.bind(param.clone());
    }
    query.fetch_optional(conn).await.map_err(|e| Error::Database(DbError::from(e)))
}

async fn run_query_one(conn: &mut PgConnection, built: &BuiltQuery) -> Result<sqlx::postgres::PgRow> {
    let mut query = sqlx::query(&built.sql);
    for param in &built.params {
        query = query.bind(param.clone());
    }
    query.fetch_one(conn).await.map_err(|e| Error::Database(DbError::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_key_text_covers_scalars() {
        assert_eq!(json_key_text(Some(&serde_json::json!("abc"))), Some("abc".to_string()));
        assert_eq!(json_key_text(Some(&serde_json::json!(42))), Some("42".to_string()));
        assert_eq!(json_key_text(Some(&serde_json::json!(true))), Some("true".to_string()));
        assert_eq!(json_key_text(Some(&serde_json::json!({"a": 1}))), None);
        assert_eq!(json_key_text(None), None);
    }

    #[test]
    fn page_math_rounds_up() {
        // total 31, perPage 30 -> 2 pages; total 0 -> 0 pages
        assert_eq!((31i64 + 30 - 1) / 30, 2);
        assert_eq!((30i64 + 30 - 1) / 30, 1);
    }
}
