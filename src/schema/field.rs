//! Declarative field definitions, mapped to relational columns by the
//! registry and DDL planner.
//!
//! Conventions honored throughout the crate:
//!
//! * any field named `<something>_id` is a foreign key to `<something>.id`;
//!   override the target table with [`FieldDef::references`] or skip the
//!   constraint entirely with [`FieldDef::generic`]
//! * a field that is neither required nor defaulted is nullable
//! * `read_only` fields are excluded from unprivileged writes, so they must
//!   not be required; literal defaults of read-only fields are applied on
//!   insert
//! * `auto_now_add` becomes a server-side `DEFAULT NOW()`; `auto_now` is
//!   applied in the update path because PostgreSQL has no ON UPDATE default
//! * `index`/`unique` derive secondary indexes; Array, HStore, and Jsonb
//!   columns index with GIN
//! * `unique_together` combines this field with the named ones into a
//!   single composite unique constraint

use serde_json::Value;

/// Referential action for foreign keys, applied on update and delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForeignKeyAction {
    Restrict,
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            ForeignKeyAction::Restrict => "RESTRICT",
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Constraints for password fields, checked before hashing.
#[derive(Clone, Debug, PartialEq)]
pub struct PasswordSpec {
    pub min_length: u32,
    pub max_length: u32,
    /// Anchored regex the raw password must match.
    pub pattern: String,
}

impl Default for PasswordSpec {
    fn default() -> Self {
        PasswordSpec {
            min_length: 6,
            max_length: 64,
            pattern: r"^\S*$".into(),
        }
    }
}

/// The column types a field may carry.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Text,
    VarChar(u32),
    SmallInt,
    Integer,
    BigInt,
    Float,
    Numeric { precision: u32, scale: u32 },
    Boolean,
    /// Naive UTC timestamp (the crate normalizes to UTC before storing).
    Timestamp,
    Date,
    Time,
    Interval,
    Uuid,
    /// VARCHAR(127); an address can be longer per the RFCs but never is.
    Email,
    Url { max_length: u32 },
    Json,
    Jsonb,
    HStore,
    Array(Box<FieldType>),
    /// Named PostgreSQL enum type, created once per schema.
    Enum { name: String, values: Vec<String> },
    IpAddress,
    IpNetwork,
    /// Stored as a fixed-width scrypt hash; raw values hash on write.
    Password(PasswordSpec),
    /// Stored AES-GCM encrypted; decrypted transparently on read.
    Encrypted,
}

impl FieldType {
    /// Array of strings, the common case.
    pub fn string_array() -> Self {
        FieldType::Array(Box::new(FieldType::VarChar(255)))
    }

    pub fn enumeration(name: impl Into<String>, values: &[&str]) -> Self {
        FieldType::Enum {
            name: name.into(),
            values: values.iter().map(|v| (*v).to_string()).collect(),
        }
    }
}

/// Column default: a literal value (also used as the in-memory read-only
/// default) or a raw SQL expression (DDL only).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldDefault {
    Literal(Value),
    Expression(String),
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<FieldDefault>,
    pub read_only: bool,
    pub write_only: bool,
    pub computed: bool,
    pub auto_now: bool,
    pub auto_now_add: bool,
    pub index: bool,
    pub unique: bool,
    pub unique_together: Vec<String>,
    /// Model name the foreign key points at, when the `_id` convention is
    /// not enough.
    pub references: Option<String>,
    /// Skip the foreign key constraint (generic relation).
    pub generic: bool,
    pub on_update: ForeignKeyAction,
    pub on_delete: ForeignKeyAction,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        FieldDef {
            name: name.into(),
            ty,
            required: false,
            default: None,
            read_only: false,
            write_only: false,
            computed: false,
            auto_now: false,
            auto_now_add: false,
            index: false,
            unique: false,
            unique_together: Vec::new(),
            references: None,
            generic: false,
            on_update: ForeignKeyAction::Cascade,
            on_delete: ForeignKeyAction::Cascade,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(FieldDefault::Literal(value));
        self
    }

    pub fn default_expression(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(FieldDefault::Expression(expression.into()));
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    pub fn auto_now_add(mut self) -> Self {
        self.auto_now_add = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn unique_together(mut self, others: &[&str]) -> Self {
        self.unique_together = others.iter().map(|o| (*o).to_string()).collect();
        self
    }

    pub fn references(mut self, model: impl Into<String>) -> Self {
        self.references = Some(model.into());
        self
    }

    pub fn generic(mut self) -> Self {
        self.generic = true;
        self
    }

    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    /// A field with no default and no required marker is nullable; `id` is
    /// always the non-null primary key.
    pub fn nullable(&self) -> bool {
        !self.required && self.default.is_none()
    }

    /// Foreign key by convention: `<name>_id`, except the primary key.
    pub fn is_foreign_key(&self) -> bool {
        self.name.ends_with("_id") && self.name != "id"
    }

    /// The literal default, when one exists and is not null.
    pub fn literal_default(&self) -> Option<&Value> {
        match &self.default {
            Some(FieldDefault::Literal(v)) if !v.is_null() => Some(v),
            _ => None,
        }
    }
}
