//! Runtime settings read from the environment, honoring a `.env` file
//! when one is present.

use crate::error::DataError;

const TWO_WEEKS_SECS: u64 = 2 * 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// HMAC key for tokens and the key source for encrypted columns.
    /// Should be at least 32 bytes.
    pub secret_key: String,
    /// When set, models default to UUID primary keys instead of BIGSERIAL.
    pub primary_key_as_uuid: bool,
    pub token_issuer: String,
    /// Audience claim stamped on non-expiring tokens.
    pub token_audience: String,
    pub token_expiration_secs: u64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub db_pool_size: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self, DataError> {
        dotenvy::dotenv().ok();
        let secret_key = std::env::var("SECRET_KEY")
            .map_err(|_| DataError::Settings("SECRET_KEY is required".into()))?;
        Ok(Settings {
            database_url: env_or("DATABASE_URL", "postgres://localhost/modelbase"),
            secret_key,
            primary_key_as_uuid: env_flag("PRIMARY_KEY_AS_UUID"),
            token_issuer: env_or("TOKEN_ISSUER", "modelbase"),
            token_audience: env_or("TOKEN_AUDIENCE", "persistent"),
            token_expiration_secs: env_parsed("TOKEN_EXPIRATION", TWO_WEEKS_SECS)?,
            default_page_size: env_parsed("DEFAULT_PAGE_SIZE", 50)?,
            max_page_size: env_parsed("MAX_PAGE_SIZE", 250)?,
            db_pool_size: env_parsed("DB_POOL_SIZE", 10)?,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(false)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, DataError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DataError::Settings(format!("{} must be a number, got '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Settings {
    /// Fixed settings for unit tests; no environment access.
    pub fn for_tests() -> Self {
        Settings {
            database_url: "postgres://localhost/modelbase_test".into(),
            secret_key: "0123456789abcdef0123456789abcdef".into(),
            primary_key_as_uuid: false,
            token_issuer: "modelbase-test".into(),
            token_audience: "persistent".into(),
            token_expiration_secs: TWO_WEEKS_SECS,
            default_page_size: 50,
            max_page_size: 250,
            db_pool_size: 2,
        }
    }
}
