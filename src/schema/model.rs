//! In-memory schema snapshot types.
//!
//! The snapshot is built once from the PostgreSQL catalogs and then treated as
//! immutable; refresh swaps in a whole new snapshot. Everything here is plain
//! data with deterministic ordering so two builds over the same database agree
//! byte-for-byte when serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix that hides a table from the data plane.
pub const SYSTEM_TABLE_PREFIX: &str = "_ayb_";

/// Projection of a PostgreSQL type onto the JSON type set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl JsonType {
    /// Map a pg_type `typname` (plus typtype) onto the JSON type set.
    ///
    /// Array types have a `_` prefixed typname; enums project to `string`
    /// (their labels travel separately in `enum_values`).
    pub fn from_udt(udt: &str, typtype: &str) -> JsonType {
        if udt.starts_with('_') {
            return JsonType::Array;
        }
        if typtype == "e" {
            return JsonType::String;
        }
        match udt {
            "int2" | "int4" | "int8" => JsonType::Integer,
            "float4" | "float8" | "numeric" => JsonType::Number,
            "bool" => JsonType::Boolean,
            "json" | "jsonb" | "record" => JsonType::Object,
            _ => JsonType::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Table,
    View,
    Matview,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub position: i32,
    /// Display type, e.g. `character varying(64)`
    pub data_type: String,
    /// pg_type typname used as the cast target when binding values
    pub udt: String,
    /// Namespace of the type; needed to cast enums living outside pg_catalog
    pub type_schema: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub primary_key: bool,
    pub json_type: JsonType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_schema: String,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub partial: bool,
    pub has_expressions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// Join-table leg of a many-to-many relationship.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViaInfo {
    /// `schema.table` key of the join table
    pub table: String,
    /// Column in the join table referencing this side
    pub source_column: String,
    /// Column in the join table referencing the far side
    pub target_fk_column: String,
}

/// A named relationship usable with the `expand` query parameter.
///
/// `local_column` always lives on the owning table, `target_column` on the
/// related table. Composite-key relationships are not derived.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipInfo {
    pub field: String,
    pub kind: RelationshipKind,
    pub local_column: String,
    /// `schema.table` key of the related table
    pub target: String,
    pub target_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<ViaInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    /// Non-primary-key indexes
    pub indexes: Vec<IndexInfo>,
    pub relationships: Vec<RelationshipInfo>,
}

impl TableInfo {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn is_system(&self) -> bool {
        self.name.starts_with(SYSTEM_TABLE_PREFIX)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relationship(&self, field: &str) -> Option<&RelationshipInfo> {
        self.relationships.iter().find(|r| r.field == field)
    }

    /// Single primary key column, when the table has exactly one.
    pub fn single_pk(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub schema: String,
    pub name: String,
    pub arg_names: Vec<String>,
    /// Display types used as cast targets when binding arguments
    pub arg_types: Vec<String>,
    pub returns_set: bool,
    pub returns_void: bool,
}

impl FunctionInfo {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Immutable snapshot of everything the data plane knows about the database.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub built_at: DateTime<Utc>,
    /// Keyed by `schema.table`, sorted by key
    pub tables: BTreeMap<String, TableInfo>,
    /// Keyed by `schema.function`, sorted by key
    pub functions: BTreeMap<String, FunctionInfo>,
}

impl SchemaSnapshot {
    pub fn get_table(&self, schema: &str, name: &str) -> Option<&TableInfo> {
        self.tables.get(&format!("{schema}.{name}"))
    }

    pub fn table_by_key(&self, key: &str) -> Option<&TableInfo> {
        self.tables.get(key)
    }

    pub fn list_tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn list_functions(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.values()
    }
}

/// Derive relationships for every table from the foreign keys in the snapshot.
///
/// - Every single-column FK yields a forward many-to-one field and a
///   one-to-many back-reference on the target.
/// - A table with exactly two single-column FKs to different tables and no
///   other data columns acts as a join table, adding a many-to-many field to
///   both sides.
///
/// Field names: forward fields use the FK column with a trailing `_id`
/// stripped; back-references and many-to-many fields use the related table
/// name. The first relationship to claim a name wins.
pub fn derive_relationships(tables: &mut BTreeMap<String, TableInfo>) {
    let mut derived: BTreeMap<String, Vec<RelationshipInfo>> = BTreeMap::new();

    // Forward + back references.
    for table in tables.values() {
        for fk in &table.foreign_keys {
            let ([local], [remote]) = (fk.columns.as_slice(), fk.ref_columns.as_slice()) else {
                tracing::debug!(table = %table.key(), fk = %fk.name, "skipping composite foreign key for relationships");
                continue;
            };
            let target_key = format!("{}.{}", fk.ref_schema, fk.ref_table);

            derived.entry(table.key()).or_default().push(RelationshipInfo {
                field: forward_field_name(local),
                kind: RelationshipKind::ManyToOne,
                local_column: local.clone(),
                target: target_key.clone(),
                target_column: remote.clone(),
                via: None,
            });

            derived.entry(target_key).or_default().push(RelationshipInfo {
                field: table.name.clone(),
                kind: RelationshipKind::OneToMany,
                local_column: remote.clone(),
                target: table.key(),
                target_column: local.clone(),
                via: None,
            });
        }
    }

    // Many-to-many via join tables.
    for join in tables.values() {
        if !is_join_table(join) {
            continue;
        }
        let a = &join.foreign_keys[0];
        let b = &join.foreign_keys[1];
        for (near, far) in [(a, b), (b, a)] {
            let near_key = format!("{}.{}", near.ref_schema, near.ref_table);
            let Some(far_table) = tables.get(&format!("{}.{}", far.ref_schema, far.ref_table)) else {
                continue;
            };
            derived.entry(near_key).or_default().push(RelationshipInfo {
                field: far_table.name.clone(),
                kind: RelationshipKind::ManyToMany,
                local_column: near.ref_columns[0].clone(),
                target: far_table.key(),
                target_column: far.ref_columns[0].clone(),
                via: Some(ViaInfo {
                    table: join.key(),
                    source_column: near.columns[0].clone(),
                    target_fk_column: far.columns[0].clone(),
                }),
            });
        }
    }

    for (key, mut rels) in derived {
        let Some(table) = tables.get_mut(&key) else { continue };
        rels.sort_by(|a, b| a.field.cmp(&b.field));
        let mut seen = std::collections::BTreeSet::new();
        // A relationship never shadows a real column.
        rels.retain(|r| table.column(&r.field).is_none() && seen.insert(r.field.clone()));
        table.relationships = rels;
    }
}

fn forward_field_name(fk_column: &str) -> String {
    match fk_column.strip_suffix("_id") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{fk_column}_ref"),
    }
}

/// A join table has exactly two single-column FKs to different tables and no
/// data columns beyond the keys and row metadata.
fn is_join_table(table: &TableInfo) -> bool {
    if table.foreign_keys.len() != 2 {
        return false;
    }
    let a = &table.foreign_keys[0];
    let b = &table.foreign_keys[1];
    if a.columns.len() != 1 || b.columns.len() != 1 {
        return false;
    }
    if (a.ref_schema == b.ref_schema) && (a.ref_table == b.ref_table) {
        return false;
    }
    let key_columns: Vec<&str> = vec![a.columns[0].as_str(), b.columns[0].as_str()];
    table.columns.iter().all(|c| {
        key_columns.contains(&c.name.as_str()) || c.primary_key || matches!(c.name.as_str(), "id" | "created_at" | "updated_at")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, json_type: JsonType, pk: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            position: 0,
            data_type: "text".to_string(),
            udt: "text".to_string(),
            type_schema: "pg_catalog".to_string(),
            nullable: false,
            default_expr: None,
            comment: None,
            primary_key: pk,
            json_type,
            enum_values: None,
        }
    }

    fn table(schema: &str, name: &str, columns: Vec<ColumnInfo>, fks: Vec<ForeignKeyInfo>) -> TableInfo {
        let primary_key = columns.iter().filter(|c| c.primary_key).map(|c| c.name.clone()).collect();
        TableInfo {
            schema: schema.to_string(),
            name: name.to_string(),
            kind: TableKind::Table,
            columns,
            primary_key,
            foreign_keys: fks,
            indexes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    fn fk(name: &str, column: &str, ref_table: &str, ref_column: &str) -> ForeignKeyInfo {
        ForeignKeyInfo {
            name: name.to_string(),
            columns: vec![column.to_string()],
            ref_schema: "public".to_string(),
            ref_table: ref_table.to_string(),
            ref_columns: vec![ref_column.to_string()],
            on_update: "NO ACTION".to_string(),
            on_delete: "CASCADE".to_string(),
        }
    }

    fn sample_tables() -> BTreeMap<String, TableInfo> {
        let users = table(
            "public",
            "users",
            vec![column("id", JsonType::String, true), column("email", JsonType::String, false)],
            vec![],
        );
        let posts = table(
            "public",
            "posts",
            vec![
                column("id", JsonType::String, true),
                column("author_id", JsonType::String, false),
                column("title", JsonType::String, false),
            ],
            vec![fk("posts_author_fk", "author_id", "users", "id")],
        );
        let tags = table(
            "public",
            "tags",
            vec![column("id", JsonType::String, true), column("label", JsonType::String, false)],
            vec![],
        );
        let post_tags = table(
            "public",
            "post_tags",
            vec![
                column("post_id", JsonType::String, false),
                column("tag_id", JsonType::String, false),
            ],
            vec![
                fk("pt_post_fk", "post_id", "posts", "id"),
                fk("pt_tag_fk", "tag_id", "tags", "id"),
            ],
        );
        let mut map = BTreeMap::new();
        for t in [users, posts, tags, post_tags] {
            map.insert(t.key(), t);
        }
        map
    }

    #[test]
    fn json_type_projection_covers_type_families() {
        assert_eq!(JsonType::from_udt("text", "b"), JsonType::String);
        assert_eq!(JsonType::from_udt("uuid", "b"), JsonType::String);
        assert_eq!(JsonType::from_udt("timestamptz", "b"), JsonType::String);
        assert_eq!(JsonType::from_udt("bytea", "b"), JsonType::String);
        assert_eq!(JsonType::from_udt("int8", "b"), JsonType::Integer);
        assert_eq!(JsonType::from_udt("numeric", "b"), JsonType::Number);
        assert_eq!(JsonType::from_udt("bool", "b"), JsonType::Boolean);
        assert_eq!(JsonType::from_udt("jsonb", "b"), JsonType::Object);
        assert_eq!(JsonType::from_udt("_int4", "b"), JsonType::Array);
        assert_eq!(JsonType::from_udt("mood", "e"), JsonType::String);
    }

    #[test]
    fn forward_and_back_references_are_derived() {
        let mut tables = sample_tables();
        derive_relationships(&mut tables);

        let posts = &tables["public.posts"];
        let author = posts.relationship("author").expect("forward relation");
        assert_eq!(author.kind, RelationshipKind::ManyToOne);
        assert_eq!(author.local_column, "author_id");
        assert_eq!(author.target, "public.users");
        assert_eq!(author.target_column, "id");

        let users = &tables["public.users"];
        let posts_rel = users.relationship("posts").expect("back reference");
        assert_eq!(posts_rel.kind, RelationshipKind::OneToMany);
        assert_eq!(posts_rel.local_column, "id");
        assert_eq!(posts_rel.target_column, "author_id");
    }

    #[test]
    fn join_tables_yield_many_to_many_on_both_sides() {
        let mut tables = sample_tables();
        derive_relationships(&mut tables);

        let posts = &tables["public.posts"];
        let tags_rel = posts.relationship("tags").expect("m2m relation");
        assert_eq!(tags_rel.kind, RelationshipKind::ManyToMany);
        let via = tags_rel.via.as_ref().unwrap();
        assert_eq!(via.table, "public.post_tags");
        assert_eq!(via.source_column, "post_id");
        assert_eq!(via.target_fk_column, "tag_id");

        let tags = &tables["public.tags"];
        assert!(tags.relationship("posts").is_some());
    }

    #[test]
    fn a_table_with_extra_data_columns_is_not_a_join_table() {
        let mut tables = sample_tables();
        let join_key = "public.post_tags".to_string();
        let join = tables.get_mut(&join_key).unwrap();
        join.columns.push(column("note", JsonType::String, false));
        derive_relationships(&mut tables);

        let posts = &tables["public.posts"];
        assert!(posts.relationship("tags").is_none());
        // The plain back reference from the former join table still exists.
        assert!(posts.relationship("post_tags").is_some());
    }

    #[test]
    fn relationship_fields_never_shadow_columns() {
        let mut tables = sample_tables();
        let users_key = "public.users".to_string();
        tables
            .get_mut(&users_key)
            .unwrap()
            .columns
            .push(column("posts", JsonType::Integer, false));
        derive_relationships(&mut tables);
        assert!(tables["public.users"].relationship("posts").is_none());
    }

    #[test]
    fn forward_field_name_strips_id_suffix() {
        assert_eq!(forward_field_name("author_id"), "author");
        assert_eq!(forward_field_name("owner"), "owner_ref");
        assert_eq!(forward_field_name("_id"), "_id_ref");
    }
}
