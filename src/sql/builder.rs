//! Builds parameterized INSERT, SELECT, UPDATE, and DELETE statements from
//! model definitions. Identifiers are quoted; parameters are `$n` with a
//! SQL cast wherever the column type needs one to accept a text bind.

use crate::case::to_snake_case;
use crate::schema::ddl::{column_type, quote};
use crate::schema::field::{FieldDef, FieldType};
use crate::schema::model::{ModelDef, PrimaryKey};
use serde_json::{Map, Value};

/// Ordering direction for list and union reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn as_sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// Cast suffix for binding into this column, when TEXT/JSONB binds are not
/// directly assignable.
fn param_cast(ty: &FieldType) -> Option<String> {
    match ty {
        FieldType::Timestamp => Some("timestamp".into()),
        FieldType::Date => Some("date".into()),
        FieldType::Time => Some("time".into()),
        FieldType::Interval => Some("interval".into()),
        FieldType::Uuid => Some("uuid".into()),
        FieldType::Numeric { .. } => Some("numeric".into()),
        FieldType::Json => Some("json".into()),
        FieldType::HStore => Some("hstore".into()),
        FieldType::Enum { name, .. } => Some(to_snake_case(name)),
        FieldType::Array(inner) => Some(format!("{}[]", column_type(inner).to_lowercase())),
        FieldType::IpAddress => Some("inet".into()),
        FieldType::IpNetwork => Some("cidr".into()),
        _ => None,
    }
}

fn pk_cast(model: &ModelDef) -> Option<&'static str> {
    match model.primary_key {
        PrimaryKey::Uuid => Some("uuid"),
        PrimaryKey::BigSerial => None,
    }
}

fn placeholder(n: usize, cast: Option<&str>) -> String {
    match cast {
        Some(c) => format!("${}::{}", n, c),
        None => format!("${}", n),
    }
}

fn escape_element(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// PostgreSQL array literal from a JSON array, for `$n::type[]` binds.
fn array_literal(values: &[Value]) -> String {
    let rendered: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::Null => "NULL".into(),
            Value::String(s) => format!("\"{}\"", escape_element(s)),
            other => other.to_string(),
        })
        .collect();
    format!("{{{}}}", rendered.join(","))
}

/// hstore literal from a JSON object, for `$n::hstore` binds.
fn hstore_literal(map: &Map<String, Value>) -> String {
    let rendered: Vec<String> = map
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::Null => "NULL".into(),
                Value::String(s) => format!("\"{}\"", escape_element(s)),
                other => format!("\"{}\"", escape_element(&other.to_string())),
            };
            format!("\"{}\"=>{}", escape_element(k), value)
        })
        .collect();
    rendered.join(", ")
}

/// Rewrite a JSON value into its bindable form for the field: arrays and
/// hstore maps become their PostgreSQL literal text.
fn bindable(field: &FieldDef, value: Value) -> Value {
    match (&field.ty, value) {
        (FieldType::Array(_), Value::Array(items)) => Value::String(array_literal(&items)),
        (FieldType::HStore, Value::Object(map)) => Value::String(hstore_literal(&map)),
        (_, v) => v,
    }
}

/// SELECT/RETURNING expression for one column, shaped so sqlx can decode
/// the result: enums, numerics, intervals, and inet types come back as
/// text; arrays and hstore come back as jsonb.
fn select_expr(field: &FieldDef) -> String {
    let q = quote(&field.name);
    match &field.ty {
        FieldType::Numeric { .. }
        | FieldType::Interval
        | FieldType::Enum { .. }
        | FieldType::IpAddress
        | FieldType::IpNetwork => format!("{}::text", q),
        FieldType::Array(_) | FieldType::HStore => format!("to_jsonb({}) AS {}", q, q),
        _ => q,
    }
}

/// Column list for SELECT and RETURNING: the primary key plus every stored
/// field.
pub fn select_column_list(model: &ModelDef) -> String {
    let mut cols = vec![quote("id")];
    cols.extend(model.stored_fields().map(select_expr));
    cols.join(", ")
}

fn where_filters(q: &mut QueryBuf, model: &ModelDef, filters: &[(String, Value)]) -> Vec<String> {
    let mut parts = Vec::new();
    for (col, val) in filters {
        if col == "id" {
            let n = q.push_param(val.clone());
            parts.push(format!(
                "{} = {}",
                quote("id"),
                placeholder(n, pk_cast(model))
            ));
            continue;
        }
        let Some(field) = model.field_def(col).filter(|f| !f.computed) else {
            continue;
        };
        let n = q.push_param(bindable(field, val.clone()));
        parts.push(format!(
            "{} = {}",
            quote(col),
            placeholder(n, param_cast(&field.ty).as_deref())
        ));
    }
    parts
}

fn order_clause(order: &[(String, Order)]) -> String {
    if order.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = order
        .iter()
        .map(|(col, dir)| format!("{} {}", quote(col), dir.as_sql()))
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

/// INSERT from the prepared value map. Columns not present in `values` are
/// left to their database defaults. `include_id` forces an explicit id
/// (forced inserts); otherwise the id comes from the sequence or UUID
/// default and is captured by RETURNING.
pub fn insert(model: &ModelDef, values: &Map<String, Value>, include_id: bool) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();

    if include_id {
        if let Some(id) = values.get("id") {
            let n = q.push_param(id.clone());
            cols.push(quote("id"));
            placeholders.push(placeholder(n, pk_cast(model)));
        }
    }
    for field in model.stored_fields() {
        let Some(value) = values.get(&field.name) else {
            continue;
        };
        let n = q.push_param(bindable(field, value.clone()));
        cols.push(quote(&field.name));
        placeholders.push(placeholder(n, param_cast(&field.ty).as_deref()));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        quote(&model.table),
        cols.join(", "),
        placeholders.join(", "),
        select_column_list(model)
    );
    q
}

/// UPDATE by id: SET the prepared values, plus `NOW()` for every
/// `touch_now` column not already present in the value map.
pub fn update(
    model: &ModelDef,
    id: &Value,
    values: &Map<String, Value>,
    touch_now: &[String],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for field in model.stored_fields() {
        let Some(value) = values.get(&field.name) else {
            continue;
        };
        let n = q.push_param(bindable(field, value.clone()));
        sets.push(format!(
            "{} = {}",
            quote(&field.name),
            placeholder(n, param_cast(&field.ty).as_deref())
        ));
    }
    for col in touch_now {
        if !values.contains_key(col) {
            sets.push(format!("{} = NOW()", quote(col)));
        }
    }
    if sets.is_empty() {
        // Nothing to write; degrade to a refresh read.
        let n = q.push_param(id.clone());
        q.sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            select_column_list(model),
            quote(&model.table),
            quote("id"),
            placeholder(n, pk_cast(model))
        );
        return q;
    }
    let n = q.push_param(id.clone());
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        quote(&model.table),
        sets.join(", "),
        quote("id"),
        placeholder(n, pk_cast(model)),
        select_column_list(model)
    );
    q
}

/// SELECT one row by primary key.
pub fn select_by_id(model: &ModelDef, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(id.clone());
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_column_list(model),
        quote(&model.table),
        quote("id"),
        placeholder(n, pk_cast(model))
    );
    q
}

/// SELECT with exact-match filters, ordering, and paging.
pub fn select_where(
    model: &ModelDef,
    filters: &[(String, Value)],
    order: &[(String, Order)],
    limit: Option<u32>,
    offset: Option<u32>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_parts = where_filters(&mut q, model, filters);
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    let order_by = if order.is_empty() {
        format!(" ORDER BY {}", quote("id"))
    } else {
        order_clause(order)
    };
    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        select_column_list(model),
        quote(&model.table),
        where_clause,
        order_by,
        limit_clause,
        offset_clause
    );
    q
}

/// SELECT rows where `column IN ($1, ...)`, for batch-loading related rows.
pub fn select_in(model: &ModelDef, column: &str, values: &[Value]) -> QueryBuf {
    let mut q = QueryBuf::new();
    if values.is_empty() {
        q.sql = format!(
            "SELECT {} FROM {} WHERE 1 = 0",
            select_column_list(model),
            quote(&model.table)
        );
        return q;
    }
    let cast = if column == "id" {
        pk_cast(model).map(String::from)
    } else {
        model.field_def(column).and_then(|f| param_cast(&f.ty))
    };
    let placeholders: Vec<String> = values
        .iter()
        .map(|v| {
            let n = q.push_param(v.clone());
            placeholder(n, cast.as_deref())
        })
        .collect();
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        select_column_list(model),
        quote(&model.table),
        quote(column),
        placeholders.join(", "),
        quote("id")
    );
    q
}

/// SELECT COUNT(*) with optional exact-match filters.
pub fn count(model: &ModelDef, filters: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_parts = where_filters(&mut q, model, filters);
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    q.sql = format!(
        "SELECT COUNT(*) FROM {}{}",
        quote(&model.table),
        where_clause
    );
    q
}

/// DELETE by primary key.
pub fn delete(model: &ModelDef, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(id.clone());
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        quote(&model.table),
        quote("id"),
        placeholder(n, pk_cast(model))
    );
    q
}

/// UNION ALL over a common column subset of several models, each branch
/// tagged with a `_type` literal naming its model. Ordering and paging
/// apply to the combined rows.
pub fn union_all(
    models: &[&ModelDef],
    columns: &[String],
    filters: &[Vec<(String, Value)>],
    order: &[(String, Order)],
    limit: Option<u32>,
    offset: Option<u32>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut branches = Vec::new();
    for (i, model) in models.iter().enumerate() {
        let mut cols = Vec::new();
        for col in columns {
            if col == "id" {
                cols.push(quote("id"));
            } else if let Some(field) = model.field_def(col) {
                cols.push(select_expr(field));
            }
        }
        cols.push(format!(
            "'{}'::text AS {}",
            model.name.replace('\'', "''"),
            quote("_type")
        ));
        let branch_filters = filters.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let where_parts = where_filters(&mut q, model, branch_filters);
        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_parts.join(" AND "))
        };
        branches.push(format!(
            "SELECT {} FROM {}{}",
            cols.join(", "),
            quote(&model.table),
            where_clause
        ));
    }
    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT * FROM ({}) AS {}{}{}{}",
        branches.join(" UNION ALL "),
        quote("u"),
        order_clause(order),
        limit_clause,
        offset_clause
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::fixtures;
    use serde_json::json;

    fn media(registry: &crate::schema::model::ModelRegistry) -> &ModelDef {
        registry.get("Media").unwrap()
    }

    #[test]
    fn insert_skips_missing_columns_and_returns_row() {
        let registry = fixtures::registry();
        let model = registry.get("User").unwrap();
        let mut values = Map::new();
        values.insert("email".into(), json!("a@example.com"));
        values.insert("password".into(), json!("$scrypt-0$..."));
        values.insert("is_confirmed".into(), json!(false));
        let q = insert(model, &values, false);
        assert!(q.sql.starts_with("INSERT INTO \"user\" (\"email\", \"password\", \"is_confirmed\") VALUES ($1, $2, $3) RETURNING \"id\""));
        assert!(q.sql.contains("\"joined\""), "returning includes auto_now_add");
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn insert_casts_typed_columns() {
        let registry = fixtures::registry();
        let model = media(&registry);
        let mut values = Map::new();
        values.insert("user_id".into(), json!(1));
        values.insert("format".into(), json!("png"));
        values.insert("tags".into(), json!(["a", "b"]));
        values.insert("created".into(), json!("2024-05-01T10:00:00"));
        let q = insert(model, &values, false);
        assert!(q.sql.contains("$2::media_format"));
        assert!(q.sql.contains("$3::varchar(255)[]"));
        assert!(q.sql.contains("$4::timestamp"));
        assert_eq!(q.params[2], json!("{\"a\",\"b\"}"));
    }

    #[test]
    fn forced_insert_includes_id() {
        let registry = fixtures::registry();
        let model = registry.get("User").unwrap();
        let mut values = Map::new();
        values.insert("id".into(), json!(42));
        values.insert("email".into(), json!("a@example.com"));
        let q = insert(model, &values, true);
        assert!(q.sql.contains("(\"id\", \"email\")"));
        assert_eq!(q.params[0], json!(42));
    }

    #[test]
    fn update_touches_auto_now_unless_supplied() {
        let registry = fixtures::registry();
        let model = media(&registry);
        let mut values = Map::new();
        values.insert("caption".into(), json!("hi"));
        let q = update(model, &json!(7), &values, &["updated".to_string()]);
        assert!(q.sql.contains("\"caption\" = $1"));
        assert!(q.sql.contains("\"updated\" = NOW()"));
        assert!(q.sql.ends_with(&format!("RETURNING {}", select_column_list(model))));
        assert_eq!(*q.params.last().unwrap(), json!(7));

        let mut supplied = Map::new();
        supplied.insert("updated".into(), json!("2024-05-01T10:00:00"));
        let q = update(model, &json!(7), &supplied, &["updated".to_string()]);
        assert!(q.sql.contains("\"updated\" = $1::timestamp"));
        assert!(!q.sql.contains("NOW()"));
    }

    #[test]
    fn empty_update_degrades_to_select() {
        let registry = fixtures::registry();
        let model = registry.get("User").unwrap();
        let q = update(model, &json!(3), &Map::new(), &[]);
        assert!(q.sql.starts_with("SELECT"));
        assert!(q.sql.contains("WHERE \"id\" = $1"));
    }

    #[test]
    fn select_where_defaults_to_id_ordering() {
        let registry = fixtures::registry();
        let model = media(&registry);
        let q = select_where(
            model,
            &[("user_id".into(), json!(5))],
            &[],
            Some(50),
            Some(10),
        );
        assert!(q.sql.contains("WHERE \"user_id\" = $1"));
        assert!(q.sql.contains("ORDER BY \"id\""));
        assert!(q.sql.ends_with("LIMIT 50 OFFSET 10"));
    }

    #[test]
    fn explicit_ordering() {
        let registry = fixtures::registry();
        let model = media(&registry);
        let q = select_where(
            model,
            &[],
            &[("name".into(), Order::Asc), ("created".into(), Order::Desc)],
            None,
            None,
        );
        assert!(q.sql.contains("ORDER BY \"name\" ASC, \"created\" DESC"));
    }

    #[test]
    fn unknown_filter_columns_are_ignored() {
        let registry = fixtures::registry();
        let model = media(&registry);
        let q = select_where(model, &[("nope".into(), json!(1))], &[], None, None);
        assert!(!q.sql.contains("WHERE"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn select_in_empty_matches_nothing() {
        let registry = fixtures::registry();
        let model = media(&registry);
        let q = select_in(model, "user_id", &[]);
        assert!(q.sql.contains("WHERE 1 = 0"));
    }

    #[test]
    fn enum_and_array_columns_decode_as_text_and_jsonb() {
        let registry = fixtures::registry();
        let cols = select_column_list(media(&registry));
        assert!(cols.contains("\"format\"::text"));
        assert!(cols.contains("to_jsonb(\"tags\") AS \"tags\""));
    }

    #[test]
    fn union_tags_branches_with_type() {
        let registry = fixtures::registry();
        let user = registry.get("User").unwrap();
        let m = media(&registry);
        let q = union_all(
            &[user, m],
            &["id".to_string()],
            &[],
            &[("id".into(), Order::Desc)],
            Some(10),
            None,
        );
        assert!(q.sql.contains("'User'::text AS \"_type\""));
        assert!(q.sql.contains("'Media'::text AS \"_type\""));
        assert!(q.sql.contains("UNION ALL"));
        assert!(q.sql.contains("ORDER BY \"id\" DESC LIMIT 10"));
    }

    #[test]
    fn hstore_literals_escape_quotes() {
        let mut map = Map::new();
        map.insert("a\"b".into(), json!("c\\d"));
        let lit = hstore_literal(&map);
        assert_eq!(lit, "\"a\\\"b\"=>\"c\\\\d\"");
    }
}
