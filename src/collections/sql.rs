//! SQL generation for the collections data plane.
//!
//! Identifiers are always validated against the schema snapshot and
//! double-quoted; values always travel as text parameters with an explicit
//! cast to the introspected column type. Nothing from the request is ever
//! interpolated into SQL text.
//!
//! Rows come back as `row_to_json(t)` so the wire shape is PostgreSQL's own
//! JSON projection of the row, with column order preserved.

use serde_json::Value;

use crate::collections::filter::{CmpOp, FilterExpr};
use crate::errors::{Error, Result};
use crate::schema::model::{ColumnInfo, JsonType, RelationshipInfo, RelationshipKind, TableInfo};

/// A complete statement plus its positional text parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortTerm {
    pub column: String,
    pub descending: bool,
}

/// Parse a `sort` query parameter: comma-separated columns, `-` prefix for
/// descending. Column existence is checked at build time.
pub fn parse_sort(input: &str) -> Vec<SortTerm> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|term| match term.strip_prefix('-') {
            Some(column) => SortTerm {
                column: column.to_string(),
                descending: true,
            },
            None => SortTerm {
                column: term.to_string(),
                descending: false,
            },
        })
        .collect()
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fully-qualified quoted table name.
pub fn quote_table(table: &TableInfo) -> String {
    format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.name))
}

/// Cast target for a column: the fully-qualified quoted type name.
fn cast_target(col: &ColumnInfo) -> String {
    format!("{}.{}", quote_ident(&col.type_schema), quote_ident(&col.udt))
}

/// Cast target for the element type of an array column.
fn element_cast_target(col: &ColumnInfo) -> String {
    let elem = col.udt.trim_start_matches('_');
    format!("{}.{}", quote_ident(&col.type_schema), quote_ident(elem))
}

/// Convert a JSON value into its text parameter representation, checking it
/// against the column's projected JSON type.
fn value_to_text(col: &ColumnInfo, value: &Value) -> Result<Option<String>> {
    let mismatch = || Error::bad_field(format!("value has wrong type for column {}", col.name), col.name.clone());
    match (col.json_type, value) {
        (_, Value::Null) => Ok(None),
        (JsonType::String, Value::String(s)) => Ok(Some(s.clone())),
        (JsonType::String, Value::Number(n)) => Ok(Some(n.to_string())),
        (JsonType::Integer | JsonType::Number, Value::Number(n)) => Ok(Some(n.to_string())),
        (JsonType::Integer | JsonType::Number, Value::String(s)) => Ok(Some(s.clone())),
        (JsonType::Boolean, Value::Bool(b)) => Ok(Some(b.to_string())),
        (JsonType::Boolean, Value::String(s)) => Ok(Some(s.clone())),
        (JsonType::Object, v) => Ok(Some(serde_json::to_string(v).map_err(|_| mismatch())?)),
        (JsonType::Array, v @ Value::Array(_)) => Ok(Some(serde_json::to_string(v).map_err(|_| mismatch())?)),
        _ => Err(mismatch()),
    }
}

/// Query builder bound to one table from the schema snapshot.
pub struct SqlBuilder<'a> {
    table: &'a TableInfo,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(table: &'a TableInfo) -> Self {
        Self { table }
    }

    fn column(&self, name: &str) -> Result<&'a ColumnInfo> {
        self.table
            .column(name)
            .ok_or_else(|| Error::bad_field(format!("unknown column {name}"), name.to_string()))
    }

    fn pk_column(&self) -> Result<&'a ColumnInfo> {
        let pk = self
            .table
            .single_pk()
            .ok_or_else(|| Error::bad_request(format!("collection {} has no single primary key", self.table.name)))?;
        self.column(pk)
    }

    /// Push a value parameter and return the SQL expression that consumes it.
    fn bind_value(&self, col: &ColumnInfo, value: &Value, params: &mut Vec<Option<String>>) -> Result<String> {
        params.push(value_to_text(col, value)?);
        let n = params.len();
        let expr = match col.json_type {
            JsonType::Array => format!(
                "(SELECT array_agg(el.v::{}) FROM jsonb_array_elements_text(${n}::jsonb) AS el(v))",
                element_cast_target(col)
            ),
            _ => format!("${n}::{}", cast_target(col)),
        };
        Ok(expr)
    }

    fn filter_sql(&self, expr: &FilterExpr, params: &mut Vec<Option<String>>) -> Result<String> {
        match expr {
            FilterExpr::And(a, b) => Ok(format!("({} AND {})", self.filter_sql(a, params)?, self.filter_sql(b, params)?)),
            FilterExpr::Or(a, b) => Ok(format!("({} OR {})", self.filter_sql(a, params)?, self.filter_sql(b, params)?)),
            FilterExpr::Cmp { column, op, value } => {
                let col = self.column(column)?;
                let ident = quote_ident(&col.name);
                match (op, value) {
                    (CmpOp::Eq, Value::Null) => Ok(format!("t.{ident} IS NULL")),
                    (CmpOp::Ne, Value::Null) => Ok(format!("t.{ident} IS NOT NULL")),
                    (_, Value::Null) => Err(Error::bad_field(
                        format!("null is only comparable with = or != on column {column}"),
                        column.clone(),
                    )),
                    (CmpOp::Like | CmpOp::ILike, Value::String(pattern)) => {
                        params.push(Some(pattern.clone()));
                        Ok(format!("t.{ident}::text {} ${}", op.sql(), params.len()))
                    }
                    (CmpOp::Like | CmpOp::ILike, _) => Err(Error::bad_field(
                        format!("{} requires a string pattern on column {column}", op.sql()),
                        column.clone(),
                    )),
                    (_, value) => {
                        let value_expr = self.bind_value(col, value, params)?;
                        Ok(format!("t.{ident} {} {value_expr}", op.sql()))
                    }
                }
            }
            FilterExpr::In { column, values } => {
                let col = self.column(column)?;
                if values.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let mut exprs = Vec::with_capacity(values.len());
                for value in values {
                    if value.is_null() {
                        return Err(Error::bad_field(
                            format!("null is not allowed in IN list for column {column}"),
                            column.clone(),
                        ));
                    }
                    exprs.push(self.bind_value(col, value, params)?);
                }
                Ok(format!("t.{} IN ({})", quote_ident(&col.name), exprs.join(", ")))
            }
        }
    }

    /// Case-insensitive substring search across string-projected columns.
    fn search_sql(&self, needle: &str, params: &mut Vec<Option<String>>) -> Option<String> {
        let string_columns: Vec<&ColumnInfo> = self
            .table
            .columns
            .iter()
            .filter(|c| c.json_type == JsonType::String && c.udt != "bytea")
            .collect();
        if string_columns.is_empty() {
            return Some("FALSE".to_string());
        }
        let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        params.push(Some(format!("%{escaped}%")));
        let n = params.len();
        let parts: Vec<String> = string_columns
            .iter()
            .map(|c| format!("t.{}::text ILIKE ${n}", quote_ident(&c.name)))
            .collect();
        Some(format!("({})", parts.join(" OR ")))
    }

    fn order_by_sql(&self, sort: &[SortTerm]) -> Result<String> {
        let mut terms = Vec::new();
        let mut covered: Vec<&str> = Vec::new();
        for term in sort {
            let col = self.column(&term.column)?;
            covered.push(&col.name);
            terms.push(format!(
                "t.{} {}",
                quote_ident(&col.name),
                if term.descending { "DESC" } else { "ASC" }
            ));
        }
        // Deterministic tiebreak on the primary key.
        for pk in &self.table.primary_key {
            if !covered.contains(&pk.as_str()) {
                terms.push(format!("t.{} ASC", quote_ident(pk)));
            }
        }
        if terms.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" ORDER BY {}", terms.join(", ")))
    }

    /// Paginated list with optional filter and search.
    pub fn build_list(
        &self,
        filter: Option<&FilterExpr>,
        search: Option<&str>,
        sort: &[SortTerm],
        page: i64,
        per_page: i64,
    ) -> Result<BuiltQuery> {
        let mut params = Vec::new();
        let mut predicates = Vec::new();
        if let Some(expr) = filter {
            predicates.push(self.filter_sql(expr, &mut params)?);
        }
        if let Some(needle) = search {
            if let Some(clause) = self.search_sql(needle, &mut params) {
                predicates.push(clause);
            }
        }

        let mut sql = format!(
            "SELECT row_to_json(t) AS \"row\", count(*) OVER () AS \"total\" FROM {} AS t",
            quote_table(self.table)
        );
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql.push_str(&self.order_by_sql(sort)?);
        let offset = (page - 1).max(0) * per_page;
        sql.push_str(&format!(" LIMIT {per_page} OFFSET {offset}"));

        Ok(BuiltQuery { sql, params })
    }

    /// Single row by primary key.
    pub fn build_get(&self, id: &str) -> Result<BuiltQuery> {
        let pk = self.pk_column()?;
        let sql = format!(
            "SELECT row_to_json(t) AS \"row\" FROM {} AS t WHERE t.{} = $1::{} LIMIT 1",
            quote_table(self.table),
            quote_ident(&pk.name),
            cast_target(pk)
        );
        Ok(BuiltQuery {
            sql,
            params: vec![Some(id.to_string())],
        })
    }

    /// Probe whether a primary key is visible to the current session. Used by
    /// the realtime bus to re-check row-level security per event.
    pub fn build_visibility_probe(&self, id: &str) -> Result<BuiltQuery> {
        let pk = self.pk_column()?;
        let sql = format!(
            "SELECT 1 AS \"one\" FROM {} AS t WHERE t.{} = $1::{} LIMIT 1",
            quote_table(self.table),
            quote_ident(&pk.name),
            cast_target(pk)
        );
        Ok(BuiltQuery {
            sql,
            params: vec![Some(id.to_string())],
        })
    }

    /// Insert one row from a JSON object body.
    pub fn build_insert(&self, body: &serde_json::Map<String, Value>) -> Result<BuiltQuery> {
        let mut params = Vec::new();
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (key, value) in body {
            let col = self.column(key)?;
            columns.push(quote_ident(&col.name));
            values.push(self.bind_value(col, value, &mut params)?);
        }
        let table = quote_table(self.table);
        let sql = if columns.is_empty() {
            format!("INSERT INTO {table} AS t DEFAULT VALUES RETURNING row_to_json(t) AS \"row\"")
        } else {
            format!(
                "INSERT INTO {table} AS t ({}) VALUES ({}) RETURNING row_to_json(t) AS \"row\"",
                columns.join(", "),
                values.join(", ")
            )
        };
        Ok(BuiltQuery { sql, params })
    }

    /// Partial update by primary key.
    pub fn build_update(&self, id: &str, body: &serde_json::Map<String, Value>) -> Result<BuiltQuery> {
        if body.is_empty() {
            return Err(Error::bad_request("update body must set at least one column"));
        }
        let pk = self.pk_column()?;
        let mut params = Vec::new();
        let mut assignments = Vec::new();
        for (key, value) in body {
            let col = self.column(key)?;
            if col.name == pk.name {
                return Err(Error::bad_field("primary key cannot be updated", pk.name.clone()));
            }
            let expr = self.bind_value(col, value, &mut params)?;
            assignments.push(format!("{} = {expr}", quote_ident(&col.name)));
        }
        params.push(Some(id.to_string()));
        let sql = format!(
            "UPDATE {} AS t SET {} WHERE t.{} = ${}::{} RETURNING row_to_json(t) AS \"row\"",
            quote_table(self.table),
            assignments.join(", "),
            quote_ident(&pk.name),
            params.len(),
            cast_target(pk)
        );
        Ok(BuiltQuery { sql, params })
    }

    /// Delete by primary key.
    pub fn build_delete(&self, id: &str) -> Result<BuiltQuery> {
        let pk = self.pk_column()?;
        let sql = format!(
            "DELETE FROM {} AS t WHERE t.{} = $1::{}",
            quote_table(self.table),
            quote_ident(&pk.name),
            cast_target(pk)
        );
        Ok(BuiltQuery {
            sql,
            params: vec![Some(id.to_string())],
        })
    }
}

/// Secondary query for one `expand` relationship: fetch related rows for a
/// set of parent keys in a single statement (no N+1), tagged with the parent
/// key each row belongs to.
pub fn build_expand(rel: &RelationshipInfo, target: &TableInfo, parent_keys: &[String]) -> Result<BuiltQuery> {
    let target_col = target
        .column(&rel.target_column)
        .ok_or_else(|| Error::bad_field(format!("unknown column {}", rel.target_column), rel.target_column.clone()))?;
    let sql = match (&rel.kind, &rel.via) {
        (RelationshipKind::ManyToMany, Some(via)) => {
            let (via_schema, via_table) = via
                .table
                .split_once('.')
                .ok_or_else(|| Error::bad_request(format!("malformed join table key {}", via.table)))?;
            format!(
                "SELECT row_to_json(t) AS \"row\", j.{src}::text AS \"parent_key\" \
                 FROM {join} AS j JOIN {target} AS t ON t.{tcol} = j.{far} \
                 WHERE j.{src}::text = ANY($1)",
                src = quote_ident(&via.source_column),
                join = format!("{}.{}", quote_ident(via_schema), quote_ident(via_table)),
                target = quote_table(target),
                tcol = quote_ident(&target_col.name),
                far = quote_ident(&via.target_fk_column),
            )
        }
        _ => format!(
            "SELECT row_to_json(t) AS \"row\", t.{col}::text AS \"parent_key\" FROM {target} AS t WHERE t.{col}::text = ANY($1)",
            col = quote_ident(&target_col.name),
            target = quote_table(target),
        ),
    };
    Ok(BuiltQuery {
        sql,
        // The single parameter is the text[] of parent keys; the service binds
        // it as a string array, so params here only documents arity.
        params: parent_keys.iter().map(|k| Some(k.clone())).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::filter::parse_filter;
    use crate::schema::model::TableKind;

    fn col(name: &str, udt: &str, json_type: JsonType, pk: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            position: 0,
            data_type: udt.to_string(),
            udt: udt.to_string(),
            type_schema: "pg_catalog".to_string(),
            nullable: !pk,
            default_expr: None,
            comment: None,
            primary_key: pk,
            json_type,
            enum_values: None,
        }
    }

    fn votes_table() -> TableInfo {
        TableInfo {
            schema: "public".to_string(),
            name: "votes".to_string(),
            kind: TableKind::Table,
            columns: vec![
                col("id", "uuid", JsonType::String, true),
                col("poll_id", "uuid", JsonType::String, false),
                col("count", "int8", JsonType::Integer, false),
                col("meta", "jsonb", JsonType::Object, false),
                col("tags", "_text", JsonType::Array, false),
                col("note", "text", JsonType::String, false),
            ],
            primary_key: vec!["id".to_string()],
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    #[test]
    fn list_query_has_envelope_columns_and_pagination() {
        let table = votes_table();
        let built = SqlBuilder::new(&table).build_list(None, None, &[], 2, 25).unwrap();
        assert!(built.sql.starts_with("SELECT row_to_json(t) AS \"row\", count(*) OVER () AS \"total\""));
        assert!(built.sql.contains("FROM \"public\".\"votes\" AS t"));
        assert!(built.sql.ends_with("LIMIT 25 OFFSET 25"));
        assert!(built.params.is_empty());
        // Default order falls back to the primary key.
        assert!(built.sql.contains("ORDER BY t.\"id\" ASC"));
    }

    #[test]
    fn filters_bind_values_with_casts() {
        let table = votes_table();
        let expr = parse_filter(r#"count > 5 AND note = "x""#).unwrap();
        let built = SqlBuilder::new(&table).build_list(Some(&expr), None, &[], 1, 10).unwrap();
        assert!(built.sql.contains("t.\"count\" > $1::\"pg_catalog\".\"int8\""));
        assert!(built.sql.contains("t.\"note\" = $2::\"pg_catalog\".\"text\""));
        assert_eq!(built.params, vec![Some("5".to_string()), Some("x".to_string())]);
    }

    #[test]
    fn null_comparisons_become_is_null() {
        let table = votes_table();
        let builder = SqlBuilder::new(&table);
        let expr = parse_filter("note = null").unwrap();
        let built = builder.build_list(Some(&expr), None, &[], 1, 10).unwrap();
        assert!(built.sql.contains("t.\"note\" IS NULL"));
        assert!(built.params.is_empty());

        let expr = parse_filter("note != null").unwrap();
        let built = builder.build_list(Some(&expr), None, &[], 1, 10).unwrap();
        assert!(built.sql.contains("t.\"note\" IS NOT NULL"));

        let expr = parse_filter("note > null").unwrap();
        assert!(builder.build_list(Some(&expr), None, &[], 1, 10).is_err());
    }

    #[test]
    fn unknown_filter_column_is_rejected_with_the_identifier() {
        let table = votes_table();
        let expr = parse_filter("missing = 1").unwrap();
        let err = SqlBuilder::new(&table).build_list(Some(&expr), None, &[], 1, 10).unwrap_err();
        match err {
            Error::BadRequest { field, .. } => assert_eq!(field.as_deref(), Some("missing")),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn search_builds_an_ilike_disjunction_over_string_columns() {
        let table = votes_table();
        let built = SqlBuilder::new(&table).build_list(None, Some("ab%c"), &[], 1, 10).unwrap();
        // id, poll_id and note project to string; count/meta/tags do not.
        assert!(built.sql.contains("t.\"id\"::text ILIKE $1"));
        assert!(built.sql.contains("t.\"poll_id\"::text ILIKE $1"));
        assert!(built.sql.contains("t.\"note\"::text ILIKE $1"));
        assert!(!built.sql.contains("\"count\"::text ILIKE"));
        assert_eq!(built.params, vec![Some("%ab\\%c%".to_string())]);
    }

    #[test]
    fn sort_terms_respect_direction_and_reject_unknown_columns() {
        let table = votes_table();
        let sort = parse_sort("-count, note");
        assert_eq!(
            sort,
            vec![
                SortTerm {
                    column: "count".to_string(),
                    descending: true
                },
                SortTerm {
                    column: "note".to_string(),
                    descending: false
                },
            ]
        );
        let built = SqlBuilder::new(&table).build_list(None, None, &sort, 1, 10).unwrap();
        assert!(built.sql.contains("ORDER BY t.\"count\" DESC, t.\"note\" ASC, t.\"id\" ASC"));

        let bad = parse_sort("-nope");
        assert!(SqlBuilder::new(&table).build_list(None, None, &bad, 1, 10).is_err());
    }

    #[test]
    fn insert_binds_every_column_and_returns_the_row() {
        let table = votes_table();
        let body = serde_json::from_str::<serde_json::Map<String, Value>>(
            r#"{"poll_id": "p1", "count": 3, "meta": {"a": 1}, "tags": ["x", "y"]}"#,
        )
        .unwrap();
        let built = SqlBuilder::new(&table).build_insert(&body).unwrap();
        assert!(built.sql.starts_with("INSERT INTO \"public\".\"votes\" AS t"));
        assert!(built.sql.contains("(\"poll_id\", \"count\", \"meta\", \"tags\")"));
        assert!(built.sql.contains("$1::\"pg_catalog\".\"uuid\""));
        assert!(built.sql.contains("$2::\"pg_catalog\".\"int8\""));
        assert!(built.sql.contains("$3::\"pg_catalog\".\"jsonb\""));
        assert!(built.sql.contains("jsonb_array_elements_text($4::jsonb)"));
        assert!(built.sql.ends_with("RETURNING row_to_json(t) AS \"row\""));
        assert_eq!(built.params[1], Some("3".to_string()));
        assert_eq!(built.params[2], Some(r#"{"a":1}"#.to_string()));
        assert_eq!(built.params[3], Some(r#"["x","y"]"#.to_string()));
    }

    #[test]
    fn empty_insert_uses_default_values() {
        let table = votes_table();
        let body = serde_json::Map::new();
        let built = SqlBuilder::new(&table).build_insert(&body).unwrap();
        assert!(built.sql.contains("DEFAULT VALUES"));
        assert!(built.params.is_empty());
    }

    #[test]
    fn update_rejects_primary_key_changes() {
        let table = votes_table();
        let body = serde_json::from_str::<serde_json::Map<String, Value>>(r#"{"id": "nope"}"#).unwrap();
        assert!(SqlBuilder::new(&table).build_update("abc", &body).is_err());

        let body = serde_json::from_str::<serde_json::Map<String, Value>>(r#"{"count": 9}"#).unwrap();
        let built = SqlBuilder::new(&table).build_update("abc", &body).unwrap();
        assert!(built.sql.contains("SET \"count\" = $1::\"pg_catalog\".\"int8\""));
        assert!(built.sql.contains("WHERE t.\"id\" = $2::\"pg_catalog\".\"uuid\""));
        assert_eq!(built.params.last().unwrap(), &Some("abc".to_string()));
    }

    #[test]
    fn type_mismatches_are_rejected_before_sql_runs() {
        let table = votes_table();
        let body = serde_json::from_str::<serde_json::Map<String, Value>>(r#"{"tags": "not-an-array"}"#).unwrap();
        assert!(SqlBuilder::new(&table).build_insert(&body).is_err());

        let body = serde_json::from_str::<serde_json::Map<String, Value>>(r#"{"count": true}"#).unwrap();
        assert!(SqlBuilder::new(&table).build_insert(&body).is_err());
    }

    #[test]
    fn delete_and_get_target_the_primary_key() {
        let table = votes_table();
        let get = SqlBuilder::new(&table).build_get("x").unwrap();
        assert!(get.sql.contains("WHERE t.\"id\" = $1::\"pg_catalog\".\"uuid\" LIMIT 1"));
        let del = SqlBuilder::new(&table).build_delete("x").unwrap();
        assert!(del.sql.starts_with("DELETE FROM \"public\".\"votes\""));
    }

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
        assert_eq!(quote_ident("plain"), "\"plain\"");
    }

    #[test]
    fn in_list_binds_each_value() {
        let table = votes_table();
        let expr = parse_filter(r#"count IN (1, 2, 3)"#).unwrap();
        let built = SqlBuilder::new(&table).build_list(Some(&expr), None, &[], 1, 10).unwrap();
        assert!(built.sql.contains(
            "t.\"count\" IN ($1::\"pg_catalog\".\"int8\", $2::\"pg_catalog\".\"int8\", $3::\"pg_catalog\".\"int8\")"
        ));
        assert_eq!(built.params.len(), 3);
    }

    #[test]
    fn expand_queries_tag_rows_with_the_parent_key() {
        let target = votes_table();
        let rel = RelationshipInfo {
            field: "votes".to_string(),
            kind: RelationshipKind::OneToMany,
            local_column: "id".to_string(),
            target: "public.votes".to_string(),
            target_column: "poll_id".to_string(),
            via: None,
        };
        let built = build_expand(&rel, &target, &["p1".to_string()]).unwrap();
        assert!(built.sql.contains("t.\"poll_id\"::text AS \"parent_key\""));
        assert!(built.sql.contains("WHERE t.\"poll_id\"::text = ANY($1)"));
    }
}
