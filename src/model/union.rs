//! Union reads: one result set over a shared column subset of several
//! models, each row tagged with a `_type` column naming its source model.

use crate::error::{DataError, SchemaError};
use crate::model::record::Record;
use crate::model::store::Store;
use crate::schema::model::{ModelDef, ModelRegistry};
use crate::sql::{self, Order};
use serde_json::Value;

/// A union read over `models`, selecting `columns` (plus `id`) from each.
/// `filters` line up with `models` by index; missing entries mean no
/// filter for that branch.
#[derive(Clone, Debug, Default)]
pub struct UnionQuery {
    pub models: Vec<String>,
    pub columns: Vec<String>,
    pub filters: Vec<Vec<(String, Value)>>,
    pub order: Vec<(String, Order)>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl UnionQuery {
    pub fn new(models: &[&str], columns: &[&str]) -> Self {
        UnionQuery {
            models: models.iter().map(|m| (*m).to_string()).collect(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Resolve the member models and check every selected column exists on all
/// of them.
pub(crate) fn resolve_members<'r>(
    registry: &'r ModelRegistry,
    query: &UnionQuery,
) -> Result<Vec<&'r ModelDef>, SchemaError> {
    let mut members = Vec::with_capacity(query.models.len());
    for name in &query.models {
        members.push(registry.expect(name)?);
    }
    for column in &query.columns {
        if column == "id" {
            continue;
        }
        for model in &members {
            match model.field_def(column) {
                Some(field) if !field.computed => {}
                _ => {
                    return Err(SchemaError::UnionColumn {
                        model: model.name.clone(),
                        column: column.clone(),
                    })
                }
            }
        }
    }
    Ok(members)
}

impl Store<'_> {
    /// Run a union read. Rows come back as records carrying the shared
    /// columns plus `_type`.
    pub async fn union(&self, query: &UnionQuery) -> Result<Vec<Record>, DataError> {
        let members = resolve_members(self.registry, query)?;
        let mut columns = query.columns.clone();
        if !columns.iter().any(|c| c == "id") {
            columns.insert(0, "id".into());
        }
        let q = sql::union_all(
            &members,
            &columns,
            &query.filters,
            &query.order,
            query.limit,
            query.offset,
        );
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = {
            let mut sq = sqlx::query(&q.sql);
            for p in &q.params {
                sq = sq.bind(crate::sql::BindValue::from_json(p));
            }
            sq.fetch_all(self.pool).await?
        };
        Ok(rows
            .iter()
            .map(|r| Record::from_values(crate::model::store::row_to_map(r)))
            .collect())
    }
}
