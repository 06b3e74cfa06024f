pub mod ddl;
pub mod field;
pub mod model;

pub use ddl::{apply_schema, column_type, quote, schema_plan, SchemaPlan};
pub use field::{FieldDef, FieldDefault, FieldType, ForeignKeyAction, PasswordSpec};
pub use model::{ModelDef, ModelRegistry, PrimaryKey};
