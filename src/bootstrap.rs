//! Database bootstrap: create the database when missing and build the
//! connection pool from settings.

use crate::error::DataError;
use crate::settings::Settings;
use sqlx::postgres::PgPoolOptions;
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;

/// Ensure the database in `database_url` exists; create it if not.
/// Connects to the default `postgres` database to run CREATE DATABASE.
/// Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), DataError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| DataError::Settings(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await.map_err(DataError::Db)?;
    let exists: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(&db_name)
            .fetch_one(&mut conn)
            .await
            .map_err(DataError::Db)?;
    if !exists.0 {
        let quoted = quote_ident(&db_name);
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted))
            .execute(&mut conn)
            .await
            .map_err(DataError::Db)?;
    }
    Ok(())
}

/// Connection pool sized from settings.
pub async fn connect_pool(settings: &Settings) -> Result<PgPool, DataError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.db_pool_size)
        .connect(&settings.database_url)
        .await?;
    Ok(pool)
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), DataError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| DataError::Settings("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    let admin_url = format!("{}postgres", base);
    Ok((admin_url, db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}
