//! Bearer token issuance and validation: HS256 JWTs carrying the issuer,
//! subject, and either an expiry or, for non-expiring first-party tokens,
//! an audience claim in its place.

use crate::error::DataError;
use crate::settings::Settings;
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Requested token lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenLifetime {
    /// `TOKEN_EXPIRATION` from settings.
    Default,
    Seconds(u64),
    /// No expiry; the audience claim marks the token instead.
    Never,
}

impl TokenLifetime {
    pub fn expires_in(self, settings: &Settings) -> Option<u64> {
        match self {
            TokenLifetime::Default => Some(settings.token_expiration_secs),
            TokenLifetime::Seconds(s) => Some(s),
            TokenLifetime::Never => None,
        }
    }
}

pub fn create_token(
    settings: &Settings,
    sub: &str,
    lifetime: TokenLifetime,
) -> Result<String, DataError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: sub.to_string(),
        iss: settings.token_issuer.clone(),
        iat: now,
        exp: lifetime
            .expires_in(settings)
            .map(|secs| now + secs as i64),
        aud: match lifetime {
            TokenLifetime::Never => Some(settings.token_audience.clone()),
            _ => None,
        },
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(settings.secret_key.as_bytes()),
    )?;
    Ok(token)
}

/// Validate signature, issuer, and expiry, returning the claims. Tokens
/// without an expiry are accepted only when they carry the configured
/// audience.
pub fn decode_token(settings: &Settings, token: &str) -> Result<Claims, DataError> {
    let key = DecodingKey::from_secret(settings.secret_key.as_bytes());

    let mut expiring = Validation::new(Algorithm::HS256);
    expiring.set_issuer(&[&settings.token_issuer]);
    // Audience only marks non-expiring tokens; checked in the second pass.
    expiring.validate_aud = false;
    let first_err = match decode::<Claims>(token, &key, &expiring) {
        Ok(data) => return Ok(data.claims),
        Err(e) => e,
    };

    let mut persistent = Validation::new(Algorithm::HS256);
    persistent.set_issuer(&[&settings.token_issuer]);
    persistent.set_audience(&[&settings.token_audience]);
    persistent.validate_exp = false;
    persistent.set_required_spec_claims(&["iss", "aud"]);
    match decode::<Claims>(token, &key, &persistent) {
        Ok(data) if data.claims.exp.is_none() => Ok(data.claims),
        _ => Err(first_err.into()),
    }
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_default_lifetime() {
        let settings = Settings::for_tests();
        let token = create_token(&settings, "42", TokenLifetime::Default).unwrap();
        let claims = decode_token(&settings, &token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.iss, settings.token_issuer);
        assert!(claims.exp.is_some());
        assert!(claims.aud.is_none());
    }

    #[test]
    fn persistent_tokens_carry_audience_instead_of_expiry() {
        let settings = Settings::for_tests();
        let token = create_token(&settings, "42", TokenLifetime::Never).unwrap();
        let claims = decode_token(&settings, &token).unwrap();
        assert!(claims.exp.is_none());
        assert_eq!(claims.aud.as_deref(), Some("persistent"));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let settings = Settings::for_tests();
        let claims = Claims {
            sub: "42".into(),
            iss: settings.token_issuer.clone(),
            iat: Utc::now().timestamp() - 600,
            exp: Some(Utc::now().timestamp() - 300),
            aud: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(settings.secret_key.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            decode_token(&settings, &token),
            Err(DataError::Token(_))
        ));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let settings = Settings::for_tests();
        let mut other = settings.clone();
        other.token_issuer = "someone-else".into();
        let token = create_token(&other, "42", TokenLifetime::Default).unwrap();
        assert!(decode_token(&settings, &token).is_err());
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let settings = Settings::for_tests();
        let token = create_token(&settings, "42", TokenLifetime::Default).unwrap();
        let mut other = settings.clone();
        other.secret_key = "another-secret-another-secret-32".into();
        assert!(decode_token(&other, &token).is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Bearer  padded "), Some("padded"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
