//! Example consumer: a separate Rust project that uses modelbase-sdk as a
//! dependency. Declares two models, applies their schema, and runs a
//! save / login / embed round trip.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`

use modelbase_sdk::{
    apply_schema, authenticate, connect_pool, ensure_database_exists, Embed, FieldDef, FieldType,
    ListQuery, ModelDef, ModelRegistry, PrimaryKey, Record, SaveOptions, SchemaError, Settings,
    Store, TokenLifetime,
};
use serde_json::json;

fn models(settings: &Settings) -> Result<ModelRegistry, SchemaError> {
    let pk = PrimaryKey::from_settings(settings);
    // Foreign key columns must match the referenced primary key type.
    let fk_ty = match pk {
        PrimaryKey::BigSerial => FieldType::BigInt,
        PrimaryKey::Uuid => FieldType::Uuid,
    };
    let mut registry = ModelRegistry::new();
    registry.register(
        ModelDef::new("User", pk)
            .field(FieldDef::new("email", FieldType::Email).required().unique())
            .field(
                FieldDef::new("password", FieldType::Password(Default::default()))
                    .required()
                    .write_only(),
            )
            .field(
                FieldDef::new("is_confirmed", FieldType::Boolean)
                    .default_value(json!(false))
                    .read_only(),
            )
            .field(FieldDef::new("joined", FieldType::Timestamp).auto_now_add()),
    )?;
    registry.register(
        ModelDef::new("Note", pk)
            .field(FieldDef::new("user_id", fk_ty).required().indexed())
            .field(FieldDef::new("body", FieldType::Text).required())
            .field(FieldDef::new("created", FieldType::Timestamp).auto_now_add())
            .field(FieldDef::new("updated", FieldType::Timestamp).auto_now()),
    )?;
    registry.validate()?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modelbase_sdk=debug")),
        )
        .init();

    let settings = Settings::from_env()?;
    ensure_database_exists(&settings.database_url).await?;
    let pool = connect_pool(&settings).await?;

    let registry = models(&settings)?;
    apply_schema(&pool, &registry).await?;

    let store = Store::new(&pool, &registry, &settings);

    let mut user = store
        .get_or_create("User", "email", json!("ada@example.com"), Default::default())
        .await?;
    if user.is_new() {
        user.set("password", json!("correct-horse"));
        store.save("User", &mut user, SaveOptions::default()).await?;
        tracing::info!(id = ?user.id(), "created user");
    }

    let mut note = Record::new();
    note.set("user_id", user.id().cloned().unwrap_or_default());
    note.set("body", json!("hello from the example consumer"));
    store.save("Note", &mut note, SaveOptions::default()).await?;

    let (_, credentials) = authenticate(
        &store,
        "User",
        "ada@example.com",
        "correct-horse",
        TokenLifetime::Default,
    )
    .await?;
    tracing::info!(expires_in = ?credentials.expires_in, "issued bearer token");

    let mut users = store
        .list(
            "User",
            &ListQuery::default().filter("email", json!("ada@example.com")),
        )
        .await?;
    store
        .expand("User", &mut users, &[Embed::new("notes", "Note")])
        .await?;
    let user_model = registry.expect("User")?;
    let public: Vec<_> = users.iter().map(|u| u.to_public(user_model)).collect();
    println!("{}", serde_json::to_string_pretty(&public)?);
    Ok(())
}
