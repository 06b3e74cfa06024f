//! Emit PostgreSQL DDL from registered models: extensions, enum types,
//! tables, indexes, and foreign keys, ordered by dependency.

use crate::auth::password;
use crate::case::to_snake_case;
use crate::error::{DataError, SchemaError};
use crate::schema::field::{FieldDef, FieldDefault, FieldType};
use crate::schema::model::{ModelDef, ModelRegistry, PrimaryKey};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{BTreeSet, HashSet};

pub fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// SQL literal for a column default.
fn literal(value: &Value) -> String {
    match value {
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Column type for a field.
pub fn column_type(ty: &FieldType) -> String {
    match ty {
        FieldType::Text => "TEXT".into(),
        FieldType::VarChar(n) => format!("VARCHAR({})", n),
        FieldType::SmallInt => "SMALLINT".into(),
        FieldType::Integer => "INTEGER".into(),
        FieldType::BigInt => "BIGINT".into(),
        FieldType::Float => "DOUBLE PRECISION".into(),
        FieldType::Numeric { precision, scale } => format!("NUMERIC({}, {})", precision, scale),
        FieldType::Boolean => "BOOLEAN".into(),
        FieldType::Timestamp => "TIMESTAMP".into(),
        FieldType::Date => "DATE".into(),
        FieldType::Time => "TIME".into(),
        FieldType::Interval => "INTERVAL".into(),
        FieldType::Uuid => "UUID".into(),
        FieldType::Email => "VARCHAR(127)".into(),
        FieldType::Url { max_length } => format!("VARCHAR({})", max_length),
        FieldType::Json => "JSON".into(),
        FieldType::Jsonb => "JSONB".into(),
        FieldType::HStore => "HSTORE".into(),
        FieldType::Array(inner) => format!("{}[]", column_type(inner)),
        FieldType::Enum { name, .. } => to_snake_case(name),
        FieldType::IpAddress => "INET".into(),
        FieldType::IpNetwork => "CIDR".into(),
        FieldType::Password(_) => format!("VARCHAR({})", password::HASH_LEN),
        FieldType::Encrypted => "TEXT".into(),
    }
}

/// Whether an index on this column should use GIN instead of btree.
fn wants_gin(ty: &FieldType) -> bool {
    matches!(
        ty,
        FieldType::Array(_) | FieldType::HStore | FieldType::Jsonb
    )
}

/// The full DDL plan, grouped and ordered by dependency.
#[derive(Debug, Default)]
pub struct SchemaPlan {
    pub extensions: Vec<String>,
    pub enums: Vec<String>,
    pub tables: Vec<String>,
    pub indexes: Vec<String>,
    pub constraints: Vec<String>,
}

impl SchemaPlan {
    /// All statements in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &String> {
        self.extensions
            .iter()
            .chain(&self.enums)
            .chain(&self.tables)
            .chain(&self.indexes)
            .chain(&self.constraints)
    }
}

fn column_def(field: &FieldDef) -> String {
    let mut def = format!("{} {}", quote(&field.name), column_type(&field.ty));
    if !field.nullable() {
        def.push_str(" NOT NULL");
    }
    if field.auto_now_add {
        def.push_str(" DEFAULT NOW()");
    } else if let Some(default) = &field.default {
        match default {
            FieldDefault::Literal(v) if !v.is_null() => {
                def.push_str(" DEFAULT ");
                def.push_str(&literal(v));
            }
            FieldDefault::Literal(_) => {}
            FieldDefault::Expression(expr) => {
                def.push_str(" DEFAULT ");
                def.push_str(expr);
            }
        }
    }
    def
}

fn id_column(model: &ModelDef) -> String {
    match model.primary_key {
        PrimaryKey::BigSerial => format!("{} BIGSERIAL PRIMARY KEY", quote("id")),
        PrimaryKey::Uuid => format!(
            "{} UUID PRIMARY KEY DEFAULT uuid_generate_v4()",
            quote("id")
        ),
    }
}

/// Composite unique constraint name: sorted columns so either declaring
/// field produces the same constraint.
fn unique_together_name(table: &str, columns: &BTreeSet<String>) -> String {
    let joined: Vec<&str> = columns.iter().map(String::as_str).collect();
    format!("uix_{}_{}", table, joined.join("_"))
}

/// Build the DDL plan for all registered models. Validates the registry
/// first.
pub fn schema_plan(registry: &ModelRegistry) -> Result<SchemaPlan, SchemaError> {
    registry.validate()?;
    let mut plan = SchemaPlan::default();

    let mut need_uuid = false;
    let mut need_hstore = false;
    let mut emitted_enums: HashSet<String> = HashSet::new();

    for model in registry.models() {
        if model.primary_key == PrimaryKey::Uuid {
            need_uuid = true;
        }
        for field in model.stored_fields() {
            let mut ty = &field.ty;
            if let FieldType::Array(inner) = ty {
                ty = &**inner;
            }
            if matches!(field.ty, FieldType::HStore) {
                need_hstore = true;
            }
            if let FieldType::Enum { name, values } = ty {
                let type_name = to_snake_case(name);
                if emitted_enums.insert(type_name.clone()) {
                    let rendered: Vec<String> = values
                        .iter()
                        .map(|v| format!("'{}'", v.replace('\'', "''")))
                        .collect();
                    plan.enums.push(format!(
                        "CREATE TYPE {} AS ENUM ({})",
                        type_name,
                        rendered.join(", ")
                    ));
                }
            }
        }
    }
    if need_hstore {
        plan.extensions
            .push("CREATE EXTENSION IF NOT EXISTS \"hstore\"".into());
    }
    if need_uuid {
        plan.extensions
            .push("CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\"".into());
    }

    for model in registry.models() {
        let table = quote(&model.table);
        let mut col_defs = vec![id_column(model)];
        let mut unique_together: Vec<BTreeSet<String>> = Vec::new();

        for field in model.stored_fields() {
            col_defs.push(column_def(field));
            if !field.unique_together.is_empty() {
                let mut columns: BTreeSet<String> =
                    field.unique_together.iter().cloned().collect();
                columns.insert(field.name.clone());
                if !unique_together.contains(&columns) {
                    unique_together.push(columns);
                }
            }
        }
        for columns in &unique_together {
            let cols: Vec<String> = columns.iter().map(|c| quote(c)).collect();
            col_defs.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote(&unique_together_name(&model.table, columns)),
                cols.join(", ")
            ));
        }
        plan.tables.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            table,
            col_defs.join(",\n  ")
        ));

        for field in model.stored_fields() {
            if field.unique {
                plan.indexes.push(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote(&format!("ux_{}_{}", model.table, field.name)),
                    table,
                    quote(&field.name)
                ));
            } else if field.index {
                let method = if wants_gin(&field.ty) { "gin" } else { "btree" };
                plan.indexes.push(format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} USING {} ({})",
                    quote(&format!("ix_{}_{}", model.table, field.name)),
                    table,
                    method,
                    quote(&field.name)
                ));
            }
        }

        for field in model.stored_fields() {
            if field.generic {
                continue;
            }
            if let Some(target) = model.foreign_key_table(field) {
                plan.constraints.push(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
                    table,
                    quote(&format!("fk_{}_{}", model.table, field.name)),
                    quote(&field.name),
                    quote(&target),
                    quote("id"),
                    field.on_update.as_sql(),
                    field.on_delete.as_sql(),
                ));
            }
        }
    }

    Ok(plan)
}

/// Apply the plan to the database. Extensions, tables, and indexes are
/// idempotent (`IF NOT EXISTS`); enum types and foreign keys have no such
/// form, so failures there are ignored on re-runs.
pub async fn apply_schema(pool: &PgPool, registry: &ModelRegistry) -> Result<(), DataError> {
    let plan = schema_plan(registry)?;
    for sql in &plan.extensions {
        tracing::debug!(sql = %sql, "ddl");
        sqlx::query(sql).execute(pool).await?;
    }
    for sql in &plan.enums {
        tracing::debug!(sql = %sql, "ddl");
        let _ = sqlx::query(sql).execute(pool).await;
    }
    for sql in &plan.tables {
        tracing::debug!(sql = %sql, "ddl");
        sqlx::query(sql).execute(pool).await?;
    }
    for sql in &plan.indexes {
        tracing::debug!(sql = %sql, "ddl");
        sqlx::query(sql).execute(pool).await?;
    }
    for sql in &plan.constraints {
        tracing::debug!(sql = %sql, "ddl");
        let _ = sqlx::query(sql).execute(pool).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::field::{FieldDef, PasswordSpec};
    use crate::schema::model::fixtures;
    use serde_json::json;

    fn table_sql<'a>(plan: &'a SchemaPlan, table: &str) -> &'a String {
        plan.tables
            .iter()
            .find(|t| t.contains(&format!("\"{}\"", table)))
            .unwrap()
    }

    #[test]
    fn scalar_column_types() {
        assert_eq!(column_type(&FieldType::Text), "TEXT");
        assert_eq!(column_type(&FieldType::VarChar(63)), "VARCHAR(63)");
        assert_eq!(
            column_type(&FieldType::Numeric { precision: 10, scale: 2 }),
            "NUMERIC(10, 2)"
        );
        assert_eq!(column_type(&FieldType::Email), "VARCHAR(127)");
        assert_eq!(column_type(&FieldType::string_array()), "VARCHAR(255)[]");
        assert_eq!(
            column_type(&FieldType::Password(PasswordSpec::default())),
            "VARCHAR(187)"
        );
        assert_eq!(
            column_type(&FieldType::enumeration("MediaFormat", &["png"])),
            "media_format"
        );
    }

    #[test]
    fn user_table_ddl() {
        let plan = schema_plan(&fixtures::registry()).unwrap();
        let user = table_sql(&plan, "user");
        assert!(user.contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(user.contains("\"email\" VARCHAR(127) NOT NULL"));
        assert!(user.contains("\"password\" VARCHAR(187) NOT NULL"));
        assert!(user.contains("\"is_confirmed\" BOOLEAN NOT NULL DEFAULT FALSE"));
        // auto_now_add: nullable column with a server default
        assert!(user.contains("\"joined\" TIMESTAMP DEFAULT NOW()"));
        assert!(!user.contains("\"joined\" TIMESTAMP NOT NULL"));
    }

    #[test]
    fn computed_fields_are_not_columns() {
        let plan = schema_plan(&fixtures::registry()).unwrap();
        assert!(!table_sql(&plan, "media").contains("thumbnail_url"));
    }

    #[test]
    fn index_derivation() {
        let plan = schema_plan(&fixtures::registry()).unwrap();
        assert!(plan
            .indexes
            .iter()
            .any(|i| i.contains("\"ux_user_email\"")));
        assert!(plan
            .indexes
            .iter()
            .any(|i| i.contains("\"ix_media_name\"") && i.contains("USING btree")));
        assert!(plan
            .indexes
            .iter()
            .any(|i| i.contains("\"ix_media_tags\"") && i.contains("USING gin")));
    }

    #[test]
    fn enum_types_emitted_once() {
        let plan = schema_plan(&fixtures::registry()).unwrap();
        assert_eq!(
            plan.enums,
            vec!["CREATE TYPE media_format AS ENUM ('unknown', 'png', 'jpeg')".to_string()]
        );
    }

    #[test]
    fn foreign_key_constraints() {
        let plan = schema_plan(&fixtures::registry()).unwrap();
        let fk = plan
            .constraints
            .iter()
            .find(|c| c.contains("\"fk_media_user_id\""))
            .unwrap();
        assert!(fk.contains("REFERENCES \"user\" (\"id\")"));
        assert!(fk.contains("ON UPDATE CASCADE ON DELETE CASCADE"));
    }

    #[test]
    fn unique_together_constraint_is_sorted_and_deduplicated() {
        use crate::schema::model::{ModelDef, ModelRegistry, PrimaryKey};
        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelDef::new("Membership", PrimaryKey::BigSerial)
                    .field(
                        FieldDef::new("user_id", FieldType::BigInt)
                            .required()
                            .generic()
                            .unique_together(&["group_id"]),
                    )
                    .field(
                        FieldDef::new("group_id", FieldType::BigInt)
                            .required()
                            .generic()
                            .unique_together(&["user_id"]),
                    ),
            )
            .unwrap();
        let plan = schema_plan(&registry).unwrap();
        let table = table_sql(&plan, "membership");
        let occurrences = table.matches("uix_membership_group_id_user_id").count();
        assert_eq!(occurrences, 1);
        assert!(table.contains("UNIQUE (\"group_id\", \"user_id\")"));
    }

    #[test]
    fn extensions_follow_usage() {
        use crate::schema::model::{ModelDef, ModelRegistry, PrimaryKey};
        let plan = schema_plan(&fixtures::registry()).unwrap();
        assert!(plan.extensions.is_empty());

        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelDef::new("Session", PrimaryKey::Uuid)
                    .field(FieldDef::new("attributes", FieldType::HStore)),
            )
            .unwrap();
        let plan = schema_plan(&registry).unwrap();
        assert!(plan
            .extensions
            .iter()
            .any(|e| e.contains("\"hstore\"")));
        assert!(plan
            .extensions
            .iter()
            .any(|e| e.contains("\"uuid-ossp\"")));
    }

    #[test]
    fn uuid_primary_key_ddl() {
        use crate::schema::model::{ModelDef, ModelRegistry, PrimaryKey};
        let mut registry = ModelRegistry::new();
        registry
            .register(ModelDef::new("Session", PrimaryKey::Uuid))
            .unwrap();
        let plan = schema_plan(&registry).unwrap();
        assert!(plan.tables[0].contains("\"id\" UUID PRIMARY KEY DEFAULT uuid_generate_v4()"));
    }
}
