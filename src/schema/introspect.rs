//! Catalog introspection: builds a [`SchemaSnapshot`] from `pg_class`,
//! `pg_attribute`, `pg_type`, `pg_constraint`, `pg_index`, `pg_enum` and
//! `pg_proc`, restricted to the configured schemas.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::db::errors::Result;
use crate::schema::model::{
    derive_relationships, ColumnInfo, ForeignKeyInfo, FunctionInfo, IndexInfo, JsonType, SchemaSnapshot, TableInfo, TableKind,
};

#[derive(Debug, FromRow)]
struct ColumnRow {
    schema: String,
    table: String,
    kind: String,
    column: String,
    position: i32,
    data_type: String,
    udt: String,
    typtype: String,
    type_schema: String,
    nullable: bool,
    default_expr: Option<String>,
    comment: Option<String>,
}

#[derive(Debug, FromRow)]
struct IndexRow {
    schema: String,
    table: String,
    index_name: String,
    is_primary: bool,
    is_unique: bool,
    is_partial: bool,
    has_expressions: bool,
    columns: Vec<String>,
}

#[derive(Debug, FromRow)]
struct ForeignKeyRow {
    schema: String,
    table: String,
    name: String,
    ref_schema: String,
    ref_table: String,
    on_update: String,
    on_delete: String,
    columns: Vec<String>,
    ref_columns: Vec<String>,
}

#[derive(Debug, FromRow)]
struct EnumRow {
    type_schema: String,
    type_name: String,
    label: String,
}

#[derive(Debug, FromRow)]
struct FunctionRow {
    schema: String,
    name: String,
    arg_names: Option<Vec<String>>,
    arg_types: Vec<String>,
    returns_set: bool,
    returns_void: bool,
}

/// Run the full introspection and assemble a snapshot.
#[instrument(skip(pool), err)]
pub async fn introspect(pool: &PgPool, schemas: &[String]) -> Result<SchemaSnapshot> {
    let columns = fetch_columns(pool, schemas).await?;
    let indexes = fetch_indexes(pool, schemas).await?;
    let foreign_keys = fetch_foreign_keys(pool, schemas).await?;
    let enums = fetch_enums(pool).await?;
    let functions = fetch_functions(pool, schemas).await?;

    let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();

    for row in columns {
        let key = format!("{}.{}", row.schema, row.table);
        let table = tables.entry(key).or_insert_with(|| TableInfo {
            schema: row.schema.clone(),
            name: row.table.clone(),
            kind: match row.kind.as_str() {
                "v" => TableKind::View,
                "m" => TableKind::Matview,
                _ => TableKind::Table,
            },
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            relationships: Vec::new(),
        });

        let enum_values = enums.get(&(row.type_schema.clone(), row.udt.clone())).cloned();
        table.columns.push(ColumnInfo {
            json_type: JsonType::from_udt(&row.udt, &row.typtype),
            name: row.column,
            position: row.position,
            data_type: row.data_type,
            udt: row.udt,
            type_schema: row.type_schema,
            nullable: row.nullable,
            default_expr: row.default_expr,
            comment: row.comment,
            primary_key: false,
            enum_values,
        });
    }

    for row in indexes {
        let key = format!("{}.{}", row.schema, row.table);
        let Some(table) = tables.get_mut(&key) else { continue };
        if row.is_primary {
            table.primary_key = row.columns.clone();
            for name in &row.columns {
                if let Some(col) = table.columns.iter_mut().find(|c| &c.name == name) {
                    col.primary_key = true;
                }
            }
        } else {
            table.indexes.push(IndexInfo {
                name: row.index_name,
                columns: row.columns,
                unique: row.is_unique,
                partial: row.is_partial,
                has_expressions: row.has_expressions,
            });
        }
    }

    for row in foreign_keys {
        let key = format!("{}.{}", row.schema, row.table);
        let Some(table) = tables.get_mut(&key) else { continue };
        table.foreign_keys.push(ForeignKeyInfo {
            name: row.name,
            columns: row.columns,
            ref_schema: row.ref_schema,
            ref_table: row.ref_table,
            ref_columns: row.ref_columns,
            on_update: referential_action(&row.on_update),
            on_delete: referential_action(&row.on_delete),
        });
    }

    derive_relationships(&mut tables);

    let functions = functions
        .into_iter()
        .map(|row| {
            let info = FunctionInfo {
                schema: row.schema,
                name: row.name,
                arg_names: row.arg_names.unwrap_or_default(),
                arg_types: row.arg_types,
                returns_set: row.returns_set,
                returns_void: row.returns_void,
            };
            (info.key(), info)
        })
        .collect();

    Ok(SchemaSnapshot {
        built_at: Utc::now(),
        tables,
        functions,
    })
}

fn referential_action(code: &str) -> String {
    match code {
        "a" => "NO ACTION",
        "r" => "RESTRICT",
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        other => other,
    }
    .to_string()
}

async fn fetch_columns(pool: &PgPool, schemas: &[String]) -> Result<Vec<ColumnRow>> {
    let rows = sqlx::query_as::<_, ColumnRow>(
        r#"
        SELECT n.nspname AS schema,
               c.relname AS "table",
               c.relkind::text AS kind,
               a.attname AS "column",
               a.attnum::int4 AS position,
               format_type(a.atttypid, a.atttypmod) AS data_type,
               t.typname AS udt,
               t.typtype::text AS typtype,
               tn.nspname AS type_schema,
               NOT a.attnotnull AS nullable,
               pg_get_expr(ad.adbin, ad.adrelid) AS default_expr,
               col_description(c.oid, a.attnum) AS comment
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
        JOIN pg_type t ON t.oid = a.atttypid
        JOIN pg_namespace tn ON tn.oid = t.typnamespace
        LEFT JOIN pg_attrdef ad ON ad.adrelid = c.oid AND ad.adnum = a.attnum
        WHERE n.nspname = ANY($1) AND c.relkind IN ('r', 'p', 'v', 'm')
        ORDER BY n.nspname, c.relname, a.attnum
        "#,
    )
    .bind(schemas)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn fetch_indexes(pool: &PgPool, schemas: &[String]) -> Result<Vec<IndexRow>> {
    let rows = sqlx::query_as::<_, IndexRow>(
        r#"
        SELECT n.nspname AS schema,
               c.relname AS "table",
               ic.relname AS index_name,
               i.indisprimary AS is_primary,
               i.indisunique AS is_unique,
               (i.indpred IS NOT NULL) AS is_partial,
               (i.indexprs IS NOT NULL) AS has_expressions,
               ARRAY(
                   SELECT a.attname
                   FROM unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord)
                   JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
                   WHERE k.attnum > 0
                   ORDER BY k.ord
               )::text[] AS columns
        FROM pg_index i
        JOIN pg_class c ON c.oid = i.indrelid
        JOIN pg_class ic ON ic.oid = i.indexrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = ANY($1)
        ORDER BY n.nspname, c.relname, ic.relname
        "#,
    )
    .bind(schemas)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn fetch_foreign_keys(pool: &PgPool, schemas: &[String]) -> Result<Vec<ForeignKeyRow>> {
    let rows = sqlx::query_as::<_, ForeignKeyRow>(
        r#"
        SELECT n.nspname AS schema,
               c.relname AS "table",
               con.conname AS name,
               fn.nspname AS ref_schema,
               fc.relname AS ref_table,
               con.confupdtype::text AS on_update,
               con.confdeltype::text AS on_delete,
               ARRAY(
                   SELECT a.attname
                   FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                   JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                   ORDER BY k.ord
               )::text[] AS columns,
               ARRAY(
                   SELECT a.attname
                   FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                   JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                   ORDER BY k.ord
               )::text[] AS ref_columns
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_class fc ON fc.oid = con.confrelid
        JOIN pg_namespace fn ON fn.oid = fc.relnamespace
        WHERE con.contype = 'f' AND n.nspname = ANY($1)
        ORDER BY n.nspname, c.relname, con.conname
        "#,
    )
    .bind(schemas)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn fetch_enums(pool: &PgPool) -> Result<BTreeMap<(String, String), Vec<String>>> {
    let rows = sqlx::query_as::<_, EnumRow>(
        r#"
        SELECT tn.nspname AS type_schema,
               t.typname AS type_name,
               e.enumlabel AS label
        FROM pg_enum e
        JOIN pg_type t ON t.oid = e.enumtypid
        JOIN pg_namespace tn ON tn.oid = t.typnamespace
        ORDER BY tn.nspname, t.typname, e.enumsortorder
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut enums: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for row in rows {
        enums.entry((row.type_schema, row.type_name)).or_default().push(row.label);
    }
    Ok(enums)
}

async fn fetch_functions(pool: &PgPool, schemas: &[String]) -> Result<Vec<FunctionRow>> {
    let rows = sqlx::query_as::<_, FunctionRow>(
        r#"
        SELECT n.nspname AS schema,
               p.proname AS name,
               p.proargnames::text[] AS arg_names,
               ARRAY(
                   SELECT format_type(u.oid, NULL)
                   FROM unnest(p.proargtypes) WITH ORDINALITY AS u(oid, ord)
                   ORDER BY u.ord
               )::text[] AS arg_types,
               p.proretset AS returns_set,
               (p.prorettype = 'void'::regtype::oid) AS returns_void
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE n.nspname = ANY($1)
          AND p.prokind = 'f'
          AND p.proname NOT LIKE '\_ayb\_%'
        ORDER BY n.nspname, p.proname
        "#,
    )
    .bind(schemas)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
