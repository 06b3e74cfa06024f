//! Embedding related records: single objects through a `<name>_id` foreign
//! key, or lists through the reverse key on the related model. One
//! batched read per embed, not per record.

use crate::error::DataError;
use crate::model::record::Record;
use crate::model::store::Store;
use serde_json::Value;
use std::collections::HashMap;

/// One embed request: set `field` on each record from the related `model`.
/// When the host model has a `<field>_id` column the embed is a single
/// object; otherwise it is the list of related records pointing back at
/// the host.
#[derive(Clone, Debug)]
pub struct Embed {
    pub field: String,
    pub model: String,
}

impl Embed {
    pub fn new(field: impl Into<String>, model: impl Into<String>) -> Self {
        Embed {
            field: field.into(),
            model: model.into(),
        }
    }
}

fn value_key(v: &Value) -> String {
    v.to_string()
}

impl Store<'_> {
    /// Expand embedded fields on a batch of homogeneous records.
    pub async fn expand(
        &self,
        model: &str,
        records: &mut [Record],
        embeds: &[Embed],
    ) -> Result<(), DataError> {
        if records.is_empty() {
            return Ok(());
        }
        let model_def = self.registry.expect(model)?;
        for embed in embeds {
            let fk_column = format!("{}_id", embed.field);
            if model_def.field_def(&fk_column).is_some() {
                let mut ids: Vec<Value> = Vec::new();
                for record in records.iter() {
                    if let Some(id) = record.get(&fk_column).filter(|v| !v.is_null()) {
                        if !ids.contains(id) {
                            ids.push(id.clone());
                        }
                    }
                }
                let related = self.fetch_where_in(&embed.model, "id", &ids).await?;
                let by_id: HashMap<String, Value> = related
                    .into_iter()
                    .filter_map(|r| {
                        r.id().map(value_key)
                            .map(|k| (k, Value::Object(r.clone().into_values())))
                    })
                    .collect();
                for record in records.iter_mut() {
                    let embedded = record
                        .get(&fk_column)
                        .filter(|v| !v.is_null())
                        .and_then(|id| by_id.get(&value_key(id)).cloned())
                        .unwrap_or(Value::Null);
                    record.set(embed.field.clone(), embedded);
                }
            } else {
                let reverse_column = model_def.reverse_key_column();
                let ids: Vec<Value> = records
                    .iter()
                    .filter_map(|r| r.id().cloned())
                    .collect();
                let related = self
                    .fetch_where_in(&embed.model, &reverse_column, &ids)
                    .await?;
                let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
                for r in related {
                    if let Some(parent) = r.get(&reverse_column).filter(|v| !v.is_null()) {
                        grouped
                            .entry(value_key(parent))
                            .or_default()
                            .push(Value::Object(r.clone().into_values()));
                    }
                }
                for record in records.iter_mut() {
                    let list = record
                        .id()
                        .and_then(|id| grouped.remove(&value_key(id)))
                        .unwrap_or_default();
                    record.set(embed.field.clone(), Value::Array(list));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_keys_distinguish_types() {
        assert_ne!(value_key(&json!(1)), value_key(&json!("1")));
        assert_eq!(value_key(&json!(7)), value_key(&json!(7)));
    }
}
