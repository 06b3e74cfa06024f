//! Model definitions and the registry that validates them and derives
//! their runtime field partitions.

use crate::case::to_snake_case;
use crate::error::SchemaError;
use crate::schema::field::{FieldDef, FieldType};
use crate::settings::Settings;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Primary key representation for the implicit `id` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimaryKey {
    BigSerial,
    Uuid,
}

impl PrimaryKey {
    /// Process-wide default, from `PRIMARY_KEY_AS_UUID`.
    pub fn from_settings(settings: &Settings) -> Self {
        if settings.primary_key_as_uuid {
            PrimaryKey::Uuid
        } else {
            PrimaryKey::BigSerial
        }
    }
}

/// A declared model: name, implicit `id` primary key, and fields. The
/// registry fills in the derived partitions on registration.
#[derive(Clone, Debug)]
pub struct ModelDef {
    pub name: String,
    pub table: String,
    pub primary_key: PrimaryKey,
    pub fields: Vec<FieldDef>,
    /// Fields excluded from unprivileged writes. Includes `auto_now` and
    /// `auto_now_add` fields.
    pub read_only: HashSet<String>,
    /// Fields stripped from public output.
    pub write_only: HashSet<String>,
    /// Fields never stored.
    pub computed: HashSet<String>,
    pub auto_now: HashSet<String>,
    pub auto_now_add: HashSet<String>,
    /// Literal defaults of read-only fields, applied on unprivileged
    /// inserts. Ordered for deterministic SQL.
    pub read_only_defaults: BTreeMap<String, serde_json::Value>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        let name = name.into();
        let table = to_snake_case(&name);
        ModelDef {
            name,
            table,
            primary_key,
            fields: Vec::new(),
            read_only: HashSet::new(),
            write_only: HashSet::new(),
            computed: HashSet::new(),
            auto_now: HashSet::new(),
            auto_now_add: HashSet::new(),
            read_only_defaults: BTreeMap::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that exist as columns (everything but computed).
    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.computed)
    }

    /// Table the foreign key field points at, honoring the `references`
    /// override. None for non-FK fields.
    pub fn foreign_key_table(&self, field: &FieldDef) -> Option<String> {
        if !field.is_foreign_key() {
            return None;
        }
        let target = match &field.references {
            Some(model) => to_snake_case(model),
            None => field.name[..field.name.len() - 3].to_string(),
        };
        Some(target)
    }

    /// Column name other models use to point back at this one.
    pub fn reverse_key_column(&self) -> String {
        format!("{}_id", self.table)
    }

    fn derive_partitions(&mut self) -> Result<(), SchemaError> {
        for field in &mut self.fields {
            if field.auto_now || field.auto_now_add {
                field.read_only = true;
            }
        }
        for field in &self.fields {
            if field.name == "id" {
                return Err(SchemaError::ReservedField {
                    model: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if field.auto_now {
                self.auto_now.insert(field.name.clone());
            }
            if field.auto_now_add {
                self.auto_now_add.insert(field.name.clone());
            }
            if field.write_only {
                self.write_only.insert(field.name.clone());
            }
            if field.computed {
                self.computed.insert(field.name.clone());
            }
            if field.read_only {
                // A required read-only field would leave inserts without a
                // value to write.
                if field.required {
                    return Err(SchemaError::ReadOnlyRequired {
                        model: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
                self.read_only.insert(field.name.clone());
                if let Some(default) = field.literal_default() {
                    self.read_only_defaults
                        .insert(field.name.clone(), default.clone());
                }
            }
        }
        Ok(())
    }
}

/// All registered models, keyed by name. Foreign keys, embeds, and union
/// reads resolve through this.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDef>,
    by_name: HashMap<String, usize>,
    by_table: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mut model: ModelDef) -> Result<(), SchemaError> {
        if self.by_name.contains_key(&model.name) {
            return Err(SchemaError::DuplicateModel(model.name));
        }
        model.derive_partitions()?;
        let index = self.models.len();
        self.by_name.insert(model.name.clone(), index);
        self.by_table.insert(model.table.clone(), index);
        self.models.push(model);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModelDef> {
        self.by_name.get(name).map(|i| &self.models[*i])
    }

    pub fn expect(&self, name: &str) -> Result<&ModelDef, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownModel(name.to_string()))
    }

    pub fn by_table(&self, table: &str) -> Option<&ModelDef> {
        self.by_table.get(table).map(|i| &self.models[*i])
    }

    pub fn models(&self) -> &[ModelDef] {
        &self.models
    }

    /// Cross-model checks: FK targets resolve, unique_together names exist,
    /// enum types are declared consistently.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut enums: HashMap<String, &[String]> = HashMap::new();
        for model in &self.models {
            let field_names: HashSet<&str> =
                model.fields.iter().map(|f| f.name.as_str()).collect();
            for field in &model.fields {
                if let Some(target) = model.foreign_key_table(field) {
                    if !field.generic && !self.by_table.contains_key(&target) {
                        return Err(SchemaError::UnknownReference {
                            model: model.name.clone(),
                            field: field.name.clone(),
                            target,
                        });
                    }
                }
                for other in &field.unique_together {
                    if !field_names.contains(other.as_str()) {
                        return Err(SchemaError::UnknownUniqueTogether {
                            model: model.name.clone(),
                            field: field.name.clone(),
                            other: other.clone(),
                        });
                    }
                }
                if let FieldType::Enum { name, values } = &field.ty {
                    let type_name = to_snake_case(name);
                    match enums.get(type_name.as_str()) {
                        Some(existing) if *existing != values.as_slice() => {
                            return Err(SchemaError::EnumMismatch(type_name));
                        }
                        Some(_) => {}
                        None => {
                            enums.insert(type_name, values.as_slice());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::schema::field::{FieldType, PasswordSpec};
    use serde_json::json;

    /// A registry mirroring a small account/media domain, used across the
    /// crate's tests.
    pub fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelDef::new("User", PrimaryKey::BigSerial)
                    .field(FieldDef::new("email", FieldType::Email).required().unique())
                    .field(
                        FieldDef::new("password", FieldType::Password(PasswordSpec::default()))
                            .required()
                            .write_only(),
                    )
                    .field(
                        FieldDef::new("is_confirmed", FieldType::Boolean)
                            .default_value(json!(false))
                            .read_only(),
                    )
                    .field(
                        FieldDef::new("is_staff", FieldType::Boolean)
                            .default_value(json!(false))
                            .read_only(),
                    )
                    .field(FieldDef::new("joined", FieldType::Timestamp).auto_now_add()),
            )
            .unwrap();
        registry
            .register(
                ModelDef::new("Media", PrimaryKey::BigSerial)
                    .field(FieldDef::new("user_id", FieldType::BigInt).required())
                    .field(
                        FieldDef::new("name", FieldType::VarChar(63))
                            .default_value(json!(""))
                            .indexed(),
                    )
                    .field(FieldDef::new("caption", FieldType::Text).default_value(json!("")))
                    .field(
                        FieldDef::new("size", FieldType::Integer)
                            .default_value(json!(0))
                            .read_only(),
                    )
                    .field(
                        FieldDef::new(
                            "format",
                            FieldType::enumeration("MediaFormat", &["unknown", "png", "jpeg"]),
                        )
                        .default_value(json!("unknown"))
                        .read_only(),
                    )
                    .field(FieldDef::new("tags", FieldType::string_array()).indexed())
                    .field(FieldDef::new("created", FieldType::Timestamp).auto_now_add())
                    .field(FieldDef::new("updated", FieldType::Timestamp).auto_now())
                    .field(FieldDef::new("thumbnail_url", FieldType::Url { max_length: 255 }).computed()),
            )
            .unwrap();
        registry.validate().unwrap();
        registry
    }
}
