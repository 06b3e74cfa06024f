//! Modelbase SDK: model-driven data layer for PostgreSQL web backends.
//!
//! Models are declared as data ([`ModelDef`] + [`FieldDef`]), a registry
//! derives the relational schema from them (column types, constraints,
//! indexes), and [`Store`] runs generic persistence on top of sqlx with
//! read-only/write-only field partitioning, related-record embedding, and
//! the bearer-token half of authentication.

pub mod auth;
pub mod bootstrap;
pub mod case;
pub mod error;
pub mod model;
pub mod schema;
pub mod settings;
pub mod sql;

pub use auth::{authenticate, Credentials, TokenLifetime};
pub use bootstrap::{connect_pool, ensure_database_exists};
pub use error::{DataError, SchemaError};
pub use model::{Embed, ListQuery, Order, Record, SaveOptions, Store, UnionQuery};
pub use schema::{
    apply_schema, schema_plan, FieldDef, FieldType, ForeignKeyAction, ModelDef, ModelRegistry,
    PrimaryKey, SchemaPlan,
};
pub use settings::Settings;
