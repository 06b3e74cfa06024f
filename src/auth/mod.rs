//! Bearer-token authentication: password hashing, column encryption, JWT
//! issuance, and the credential check the login route calls into.

pub mod encryption;
pub mod password;
pub mod token;

pub use password::{hash_password, is_hashed, verify_password};
pub use token::{bearer_token, create_token, decode_token, Claims, TokenLifetime};

use crate::error::DataError;
use crate::model::{Record, Store};
use crate::schema::model::PrimaryKey;
use serde::Serialize;
use serde_json::Value;

/// The token grant handed back after a successful credential check
/// (RFC 6749 section 4.3; the HTTP route shapes the final response).
#[derive(Clone, Debug, Serialize)]
pub struct Credentials {
    pub access_token: String,
    pub token_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

fn id_as_subject(record: &Record) -> Result<String, DataError> {
    match record.id() {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(DataError::Unauthorized),
    }
}

/// Verify an email/password pair against the user model (columns `email`
/// and `password` by convention) and mint a token for the user id.
pub async fn authenticate(
    store: &Store<'_>,
    user_model: &str,
    email: &str,
    raw_password: &str,
    lifetime: TokenLifetime,
) -> Result<(Record, Credentials), DataError> {
    let user = store
        .get_by(user_model, "email", Value::String(email.to_string()))
        .await?
        .ok_or(DataError::Unauthorized)?;
    let hashed = user
        .get("password")
        .and_then(Value::as_str)
        .ok_or(DataError::Unauthorized)?;
    if !password::verify_password(raw_password, hashed) {
        return Err(DataError::Unauthorized);
    }
    let subject = id_as_subject(&user)?;
    let access_token = token::create_token(store.settings, &subject, lifetime)?;
    let credentials = Credentials {
        access_token,
        token_type: "bearer",
        expires_in: lifetime.expires_in(store.settings),
    };
    Ok((user, credentials))
}

/// Resolve the user record a bearer token stands for. Route dependencies
/// call this with the output of [`bearer_token`].
pub async fn user_for_token(
    store: &Store<'_>,
    user_model: &str,
    token: &str,
) -> Result<Record, DataError> {
    let claims = token::decode_token(store.settings, token)?;
    let model = store.registry.expect(user_model)?;
    let id = match model.primary_key {
        PrimaryKey::BigSerial => {
            let n: i64 = claims.sub.parse().map_err(|_| DataError::Unauthorized)?;
            Value::Number(n.into())
        }
        PrimaryKey::Uuid => {
            uuid::Uuid::parse_str(&claims.sub).map_err(|_| DataError::Unauthorized)?;
            Value::String(claims.sub.clone())
        }
    };
    store
        .get(user_model, &id)
        .await?
        .ok_or(DataError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subject_from_numeric_and_uuid_ids() {
        let mut r = Record::new();
        r.set("id", json!(42));
        assert_eq!(id_as_subject(&r).unwrap(), "42");
        r.set("id", json!("8e5b0c1e-8f6a-4f7e-9b1a-2e3c4d5e6f70"));
        assert_eq!(
            id_as_subject(&r).unwrap(),
            "8e5b0c1e-8f6a-4f7e-9b1a-2e3c4d5e6f70"
        );
        r.clear_id();
        assert!(id_as_subject(&r).is_err());
    }
}
