//! RPC: invoke whitelisted stored procedures with typed, named arguments.
//!
//! Only functions present in the schema cache's function map are callable.
//! Arguments bind strictly by parameter name; unknown names are rejected
//! before any SQL is built. Results serialize as JSON: scalar returns become
//! a bare value, set returns an array of row objects, `void` returns nothing.

use std::sync::Arc;

use serde_json::Value;
use sqlx::Row;
use tracing::instrument;

use crate::collections::sql::quote_ident;
use crate::db::errors::DbError;
use crate::errors::{Error, Result};
use crate::schema::model::FunctionInfo;
use crate::schema::SchemaCache;
use crate::session::RequestSession;

/// Result of a function invocation.
#[derive(Debug)]
pub enum RpcResult {
    /// `RETURNS void` — replies 204
    Void,
    /// Scalar or composite single value
    Scalar(Value),
    /// `SETOF` / `RETURNS TABLE` — array of row objects
    Rows(Vec<Value>),
}

#[derive(Debug)]
struct BuiltCall {
    sql: String,
    params: Vec<Option<String>>,
}

pub struct RpcService {
    schema: Arc<SchemaCache>,
}

impl RpcService {
    pub fn new(schema: Arc<SchemaCache>) -> Self {
        Self { schema }
    }

    #[instrument(skip(self, session, args), err)]
    pub async fn invoke(&self, session: &mut RequestSession, function: &str, args: &Value) -> Result<RpcResult> {
        let snapshot = self.schema.current();
        let func = self
            .schema
            .resolve_function(&snapshot, function)
            .ok_or_else(|| Error::not_found("function", function))?;

        let call = build_call(func, args)?;
        let mut query = sqlx::query(&call.sql);
        for param in &call.params {
            query = query.bind(param.clone());
        }

        if func.returns_void {
            query.execute(session.conn()).await.map_err(DbError::from)?;
            return Ok(RpcResult::Void);
        }

        if func.returns_set {
            let rows = query.fetch_all(session.conn()).await.map_err(DbError::from)?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                out.push(row.try_get::<Value, _>("row").map_err(|e| Error::Database(e.into()))?);
            }
            return Ok(RpcResult::Rows(out));
        }

        let row = query.fetch_one(session.conn()).await.map_err(DbError::from)?;
        let value = row
            .try_get::<Option<Value>, _>("result")
            .map_err(|e| Error::Database(e.into()))?
            .unwrap_or(Value::Null);
        Ok(RpcResult::Scalar(value))
    }
}

/// Build the invocation statement with named-notation arguments.
fn build_call(func: &FunctionInfo, args: &Value) -> std::result::Result<BuiltCall, Error> {
    let arg_map = match args {
        Value::Null => serde_json::Map::new(),
        Value::Object(map) => map.clone(),
        _ => return Err(Error::bad_request("RPC body must be a JSON object of named arguments")),
    };

    // Input argument names, aligned with the input type list. proargnames can
    // be longer than proargtypes when the function declares OUT parameters.
    let input_names: Vec<&String> = func.arg_names.iter().take(func.arg_types.len()).collect();

    let mut params: Vec<Option<String>> = Vec::new();
    let mut call_args: Vec<String> = Vec::new();
    for (key, value) in &arg_map {
        let position = input_names
            .iter()
            .position(|name| *name == key)
            .ok_or_else(|| Error::bad_field(format!("function {} has no parameter {key}", func.name), key.clone()))?;
        params.push(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(serde_json::to_string(other).map_err(|_| Error::bad_request("unserializable argument"))?),
        });
        call_args.push(format!(
            "{} => ${}::{}",
            quote_ident(key),
            params.len(),
            func.arg_types[position]
        ));
    }

    let qualified = format!("{}.{}", quote_ident(&func.schema), quote_ident(&func.name));
    let invocation = format!("{qualified}({})", call_args.join(", "));

    let sql = if func.returns_void {
        format!("SELECT {invocation}")
    } else if func.returns_set {
        format!("SELECT row_to_json(t) AS \"row\" FROM {invocation} AS t")
    } else {
        format!("SELECT to_jsonb({invocation}) AS \"result\"")
    };

    Ok(BuiltCall { sql, params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn func(name: &str, arg_names: &[&str], arg_types: &[&str], returns_set: bool, returns_void: bool) -> FunctionInfo {
        FunctionInfo {
            schema: "public".to_string(),
            name: name.to_string(),
            arg_names: arg_names.iter().map(|s| s.to_string()).collect(),
            arg_types: arg_types.iter().map(|s| s.to_string()).collect(),
            returns_set,
            returns_void,
        }
    }

    #[test]
    fn scalar_calls_wrap_in_to_jsonb() {
        let f = func("add_points", &["user_id", "points"], &["uuid", "integer"], false, false);
        let call = build_call(&f, &json!({"user_id": "u1", "points": 5})).unwrap();
        assert!(call.sql.starts_with("SELECT to_jsonb(\"public\".\"add_points\"("));
        assert!(call.sql.contains("\"user_id\" => $1::uuid"));
        assert!(call.sql.contains("\"points\" => $2::integer"));
        assert_eq!(call.params, vec![Some("u1".to_string()), Some("5".to_string())]);
    }

    #[test]
    fn set_returning_calls_project_rows() {
        let f = func("leaderboard", &["limit_to"], &["integer"], true, false);
        let call = build_call(&f, &json!({"limit_to": 10})).unwrap();
        assert!(call.sql.contains("row_to_json(t) AS \"row\" FROM \"public\".\"leaderboard\""));
    }

    #[test]
    fn void_calls_are_bare_selects() {
        let f = func("ping", &[], &[], false, true);
        let call = build_call(&f, &json!({})).unwrap();
        assert_eq!(call.sql, "SELECT \"public\".\"ping\"()");
        assert!(call.params.is_empty());
    }

    #[test]
    fn unknown_argument_names_are_rejected() {
        let f = func("add_points", &["user_id"], &["uuid"], false, false);
        let err = build_call(&f, &json!({"nope": 1})).unwrap_err();
        match err {
            Error::BadRequest { field, .. } => assert_eq!(field.as_deref(), Some("nope")),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn out_parameters_are_not_bindable() {
        // arg_names longer than arg_types: trailing names are OUT params.
        let f = func("stats", &["since", "total", "rate"], &["timestamptz"], false, false);
        assert!(build_call(&f, &json!({"since": "2024-01-01"})).is_ok());
        assert!(build_call(&f, &json!({"total": 1})).is_err());
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        let f = func("ping", &[], &[], false, true);
        assert!(build_call(&f, &json!([1, 2])).is_err());
        assert!(build_call(&f, &json!(null)).is_ok());
    }
}
