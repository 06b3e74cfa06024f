//! Generic persistence over sqlx: fetch, list, insert-or-update with the
//! model's field partitions, delete, and count.

use crate::auth::{encryption, password};
use crate::error::DataError;
use crate::model::record::Record;
use crate::schema::field::FieldType;
use crate::schema::model::{ModelDef, ModelRegistry};
use crate::settings::Settings;
use crate::sql::{self, BindValue, Order, QueryBuf};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use std::collections::HashSet;

/// Exact-match filters, ordering, and paging for list reads. Limits are
/// capped by the settings' page sizes.
#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub filters: Vec<(String, Value)>,
    pub order: Vec<(String, Order)>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListQuery {
    pub fn filter(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.push((column.into(), value));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order.push((column.into(), order));
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// Write behavior for [`Store::save`].
#[derive(Clone, Debug, Default)]
pub struct SaveOptions {
    /// Privileged writes may set read-only columns (server-side code
    /// writing sizes, flags, and the like). Client-driven writes leave
    /// this false.
    pub privileged: bool,
    /// Insert even when the record already carries an id (copying rows
    /// between environments, fixtures).
    pub force_insert: bool,
    /// Partial patch merged into the record through the same read-only
    /// filter before writing.
    pub patch: Option<Map<String, Value>>,
}

impl SaveOptions {
    pub fn privileged() -> Self {
        SaveOptions {
            privileged: true,
            ..Default::default()
        }
    }

    pub fn with_patch(patch: Map<String, Value>) -> Self {
        SaveOptions {
            patch: Some(patch),
            ..Default::default()
        }
    }
}

/// The persistence entry point: a pool plus the registry and settings.
#[derive(Clone)]
pub struct Store<'a> {
    pub pool: &'a PgPool,
    pub registry: &'a ModelRegistry,
    pub settings: &'a Settings,
}

impl<'a> Store<'a> {
    pub fn new(pool: &'a PgPool, registry: &'a ModelRegistry, settings: &'a Settings) -> Self {
        Store {
            pool,
            registry,
            settings,
        }
    }

    /// Fetch one record by primary key.
    pub async fn get(&self, model: &str, id: &Value) -> Result<Option<Record>, DataError> {
        let model = self.registry.expect(model)?;
        let q = sql::select_by_id(model, id);
        self.fetch_optional(model, &q).await
    }

    /// Fetch the first record matching an exact column value.
    pub async fn get_by(
        &self,
        model: &str,
        column: &str,
        value: Value,
    ) -> Result<Option<Record>, DataError> {
        let model_def = self.registry.expect(model)?;
        let q = sql::select_where(
            model_def,
            &[(column.to_string(), value)],
            &[],
            Some(1),
            None,
        );
        Ok(self.fetch_all(model_def, &q).await?.into_iter().next())
    }

    /// Fetch by column value, or build an unsaved record from defaults.
    pub async fn get_or_create(
        &self,
        model: &str,
        column: &str,
        value: Value,
        defaults: Map<String, Value>,
    ) -> Result<Record, DataError> {
        if let Some(found) = self.get_by(model, column, value.clone()).await? {
            return Ok(found);
        }
        let model_def = self.registry.expect(model)?;
        let mut record = Record::new();
        record.assign(model_def, &defaults, true);
        record.set(column, value);
        Ok(record)
    }

    /// List records. The limit falls back to the default page size and is
    /// capped at the max page size.
    pub async fn list(&self, model: &str, query: &ListQuery) -> Result<Vec<Record>, DataError> {
        let model_def = self.registry.expect(model)?;
        let limit = query
            .limit
            .unwrap_or(self.settings.default_page_size)
            .min(self.settings.max_page_size);
        let q = sql::select_where(
            model_def,
            &query.filters,
            &query.order,
            Some(limit),
            query.offset,
        );
        self.fetch_all(model_def, &q).await
    }

    /// Batch-fetch records where `column IN (values)`. Used for embedding.
    pub async fn fetch_where_in(
        &self,
        model: &str,
        column: &str,
        values: &[Value],
    ) -> Result<Vec<Record>, DataError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let model_def = self.registry.expect(model)?;
        let q = sql::select_in(model_def, column, values);
        self.fetch_all(model_def, &q).await
    }

    pub async fn count(
        &self,
        model: &str,
        filters: &[(String, Value)],
    ) -> Result<i64, DataError> {
        let model_def = self.registry.expect(model)?;
        let q = sql::count(model_def, filters);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_one(self.pool)
            .await?;
        use sqlx::Row;
        Ok(row.try_get::<i64, _>(0)?)
    }

    /// Insert or update the record.
    ///
    /// New records (or `force_insert`) INSERT: client-writable values plus,
    /// for unprivileged writes, the model's read-only defaults; the
    /// generated id and server defaults come back via RETURNING. Existing
    /// records UPDATE by id, setting `auto_now` columns to `NOW()` unless a
    /// privileged patch supplied them.
    pub async fn save(
        &self,
        model: &str,
        record: &mut Record,
        opts: SaveOptions,
    ) -> Result<(), DataError> {
        let model_def = self.registry.expect(model)?;
        let patch_keys: HashSet<String> = opts
            .patch
            .as_ref()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        if let Some(patch) = &opts.patch {
            record.assign(model_def, patch, opts.privileged);
        }

        if record.is_new() || opts.force_insert {
            let values = prepare_insert(
                model_def,
                record.values(),
                opts.privileged,
                opts.force_insert,
                &self.settings.secret_key,
            )?;
            if !opts.privileged {
                for (name, default) in &model_def.read_only_defaults {
                    record.set(name.clone(), default.clone());
                }
            }
            let include_id = opts.force_insert && record.id().is_some();
            let q = sql::insert(model_def, &values, include_id);
            let row = self
                .fetch_optional(model_def, &q)
                .await?
                .ok_or(DataError::Db(sqlx::Error::RowNotFound))?;
            refresh(record, row);
        } else {
            let id = record
                .id()
                .cloned()
                .ok_or_else(|| DataError::Validation("record has no id".into()))?;
            let values = prepare_update(
                model_def,
                record.values(),
                opts.privileged,
                &patch_keys,
                &self.settings.secret_key,
            )?;
            let touch_now: Vec<String> = model_def.auto_now.iter().cloned().collect();
            let q = sql::update(model_def, &id, &values, &touch_now);
            let row = self
                .fetch_optional(model_def, &q)
                .await?
                .ok_or_else(|| DataError::NotFound(format!("{} {}", model_def.name, id)))?;
            refresh(record, row);
        }
        Ok(())
    }

    /// Delete the record by id and clear its id.
    pub async fn delete(&self, model: &str, record: &mut Record) -> Result<(), DataError> {
        let model_def = self.registry.expect(model)?;
        let id = record
            .id()
            .cloned()
            .ok_or_else(|| DataError::Validation("record has no id".into()))?;
        let q = sql::delete(model_def, &id);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        bind_params(sqlx::query(&q.sql), &q.params)
            .execute(self.pool)
            .await?;
        record.clear_id();
        Ok(())
    }

    async fn fetch_optional(
        &self,
        model: &ModelDef,
        q: &QueryBuf,
    ) -> Result<Option<Record>, DataError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_optional(self.pool)
            .await?;
        row.map(|r| self.decode_row(model, &r)).transpose()
    }

    async fn fetch_all(&self, model: &ModelDef, q: &QueryBuf) -> Result<Vec<Record>, DataError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_all(self.pool)
            .await?;
        rows.iter().map(|r| self.decode_row(model, r)).collect()
    }

    fn decode_row(&self, model: &ModelDef, row: &PgRow) -> Result<Record, DataError> {
        let mut map = row_to_map(row);
        decrypt_columns(model, &mut map, &self.settings.secret_key)?;
        Ok(Record::from_values(map))
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: &'q [Value],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for p in params {
        query = query.bind(BindValue::from_json(p));
    }
    query
}

/// Merge a fetched row back into the record, keeping non-column values
/// (computed fields the application set) intact.
fn refresh(record: &mut Record, row: Record) {
    for (key, value) in row.into_values() {
        record.set(key, value);
    }
}

/// Hash raw password values and encrypt encrypted columns, in place.
fn seal_values(
    model: &ModelDef,
    values: &mut Map<String, Value>,
    secret_key: &str,
) -> Result<(), DataError> {
    for field in model.stored_fields() {
        match &field.ty {
            FieldType::Password(spec) => {
                if let Some(Value::String(raw)) = values.get(&field.name) {
                    if !password::is_hashed(raw) {
                        password::validate_raw(spec, raw)?;
                        let hashed = password::hash_password(raw)?;
                        values.insert(field.name.clone(), Value::String(hashed));
                    }
                }
            }
            FieldType::Encrypted => {
                if let Some(Value::String(plain)) = values.get(&field.name) {
                    if !encryption::is_encrypted(plain) {
                        let sealed = encryption::encrypt(plain, secret_key)?;
                        values.insert(field.name.clone(), Value::String(sealed));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn decrypt_columns(
    model: &ModelDef,
    values: &mut Map<String, Value>,
    secret_key: &str,
) -> Result<(), DataError> {
    for field in model.stored_fields() {
        if !matches!(field.ty, FieldType::Encrypted) {
            continue;
        }
        if let Some(Value::String(stored)) = values.get(&field.name) {
            if encryption::is_encrypted(stored) {
                let plain = encryption::decrypt(stored, secret_key)?;
                values.insert(field.name.clone(), Value::String(plain));
            }
        }
    }
    Ok(())
}

/// Values for an INSERT: stored, writable columns from the record, plus the
/// read-only defaults on unprivileged writes. Required columns must be
/// present and non-null.
fn prepare_insert(
    model: &ModelDef,
    record_values: &Map<String, Value>,
    privileged: bool,
    force_insert: bool,
    secret_key: &str,
) -> Result<Map<String, Value>, DataError> {
    let mut values = Map::new();
    if force_insert {
        if let Some(id) = record_values.get("id") {
            values.insert("id".into(), id.clone());
        }
    }
    for field in model.stored_fields() {
        if !privileged && model.read_only.contains(&field.name) {
            continue;
        }
        if let Some(v) = record_values.get(&field.name) {
            values.insert(field.name.clone(), v.clone());
        }
    }
    if !privileged {
        for (name, default) in &model.read_only_defaults {
            values.insert(name.clone(), default.clone());
        }
    }
    for field in model.stored_fields() {
        if field.required {
            let missing = values.get(&field.name).map(Value::is_null).unwrap_or(true);
            if missing {
                return Err(DataError::Validation(format!(
                    "{} is required",
                    field.name
                )));
            }
        }
    }
    seal_values(model, &mut values, secret_key)?;
    Ok(values)
}

/// Values for an UPDATE: the record's stored, writable columns. Privileged
/// writes keep supplied `auto_now` values only when the explicit patch
/// carried them; otherwise the column is left to `NOW()`.
fn prepare_update(
    model: &ModelDef,
    record_values: &Map<String, Value>,
    privileged: bool,
    patch_keys: &HashSet<String>,
    secret_key: &str,
) -> Result<Map<String, Value>, DataError> {
    let mut values = Map::new();
    for field in model.stored_fields() {
        if !privileged && model.read_only.contains(&field.name) {
            continue;
        }
        if model.auto_now.contains(&field.name) && !patch_keys.contains(&field.name) {
            continue;
        }
        if let Some(v) = record_values.get(&field.name) {
            values.insert(field.name.clone(), v.clone());
        }
    }
    seal_values(model, &mut values, secret_key)?;
    Ok(values)
}

/// Decode a row into a JSON map, trying concrete types in order (the
/// SELECT list already casts enums, numerics, and intervals to text and
/// arrays/hstore to jsonb).
pub fn row_to_map(row: &PgRow) -> Map<String, Value> {
    use sqlx::{Column, Row};
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(f64::from(n)) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(t)) = row.try_get::<Option<chrono::NaiveTime>, _>(name) {
        return Value::String(t.format("%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::fixtures;
    use serde_json::json;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn values(v: Value) -> Map<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn unprivileged_insert_applies_read_only_defaults_and_hashes() {
        let registry = fixtures::registry();
        let model = registry.get("User").unwrap();
        let record = values(json!({
            "email": "a@example.com",
            "password": "hunter22",
            "is_staff": true
        }));
        let prepared = prepare_insert(model, &record, false, false, SECRET).unwrap();
        assert_eq!(prepared.get("is_confirmed"), Some(&json!(false)));
        assert_eq!(
            prepared.get("is_staff"),
            Some(&json!(false)),
            "client-supplied read-only value is replaced by the default"
        );
        let hashed = prepared.get("password").unwrap().as_str().unwrap();
        assert!(password::is_hashed(hashed));
        assert!(!prepared.contains_key("joined"), "server default column is omitted");
    }

    #[test]
    fn privileged_insert_keeps_read_only_values() {
        let registry = fixtures::registry();
        let model = registry.get("User").unwrap();
        let record = values(json!({
            "email": "a@example.com",
            "password": "hunter22",
            "is_staff": true
        }));
        let prepared = prepare_insert(model, &record, true, false, SECRET).unwrap();
        assert_eq!(prepared.get("is_staff"), Some(&json!(true)));
        assert!(!prepared.contains_key("is_confirmed"), "no default injection");
    }

    #[test]
    fn missing_required_fields_fail_validation() {
        let registry = fixtures::registry();
        let model = registry.get("User").unwrap();
        let record = values(json!({"email": "a@example.com"}));
        let err = prepare_insert(model, &record, false, false, SECRET);
        assert!(matches!(err, Err(DataError::Validation(_))));
    }

    #[test]
    fn already_hashed_passwords_are_not_rehashed() {
        let registry = fixtures::registry();
        let model = registry.get("User").unwrap();
        let hashed = password::hash_password("hunter22").unwrap();
        let record = values(json!({"email": "a@example.com", "password": hashed.clone()}));
        let prepared = prepare_insert(model, &record, false, false, SECRET).unwrap();
        assert_eq!(prepared.get("password"), Some(&Value::String(hashed)));
    }

    #[test]
    fn update_leaves_auto_now_to_the_builder() {
        let registry = fixtures::registry();
        let model = registry.get("Media").unwrap();
        let record = values(json!({
            "id": 3,
            "user_id": 1,
            "caption": "hello",
            "updated": "2020-01-01T00:00:00"
        }));
        let prepared = prepare_update(model, &record, false, &HashSet::new(), SECRET).unwrap();
        assert!(!prepared.contains_key("updated"));
        assert!(!prepared.contains_key("id"));
        assert_eq!(prepared.get("caption"), Some(&json!("hello")));
    }

    #[test]
    fn privileged_patch_may_pin_auto_now() {
        let registry = fixtures::registry();
        let model = registry.get("Media").unwrap();
        let record = values(json!({
            "id": 3,
            "user_id": 1,
            "updated": "2020-01-01T00:00:00"
        }));
        let patched: HashSet<String> = ["updated".to_string()].into_iter().collect();
        let prepared = prepare_update(model, &record, true, &patched, SECRET).unwrap();
        assert_eq!(prepared.get("updated"), Some(&json!("2020-01-01T00:00:00")));
    }

    #[test]
    fn force_insert_carries_the_id() {
        let registry = fixtures::registry();
        let model = registry.get("User").unwrap();
        let record = values(json!({
            "id": 42,
            "email": "a@example.com",
            "password": "hunter22"
        }));
        let prepared = prepare_insert(model, &record, false, true, SECRET).unwrap();
        assert_eq!(prepared.get("id"), Some(&json!(42)));
    }
}
