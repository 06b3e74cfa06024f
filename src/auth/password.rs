//! Password hashing with scrypt, stored in a modular-crypt-style format:
//! `$scrypt-0$<salt b64>$<hash b64>`. The `-0` names the parameter set
//! (N=2^15, r=8, p=1); bump it when the parameters change so old hashes
//! can still be checked.

use crate::error::DataError;
use crate::schema::field::PasswordSpec;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use regex::Regex;
use subtle::ConstantTimeEq;

/// Fixed encoded width of a stored hash; also the password column width.
pub const HASH_LEN: usize = 187;

const PREFIX: &str = "$scrypt-0$";
const SALT_LEN: usize = 64;
const KEY_LEN: usize = 64;
const LOG_N: u8 = 15;
const R: u32 = 8;
const P: u32 = 1;

/// Whether the value is already a stored hash (so it is never re-hashed
/// or length-validated as a raw password).
pub fn is_hashed(value: &str) -> bool {
    value.len() == HASH_LEN && value.starts_with("$scrypt-")
}

/// Check a raw password against the field's constraints before hashing.
pub fn validate_raw(spec: &PasswordSpec, raw: &str) -> Result<(), DataError> {
    let len = raw.chars().count() as u32;
    if len < spec.min_length {
        return Err(DataError::Validation(format!(
            "password must be at least {} characters",
            spec.min_length
        )));
    }
    if len > spec.max_length {
        return Err(DataError::Validation(format!(
            "password must be at most {} characters",
            spec.max_length
        )));
    }
    let re = Regex::new(&spec.pattern)
        .map_err(|_| DataError::Validation("invalid password pattern".into()))?;
    if !re.is_match(raw) {
        return Err(DataError::Validation(
            "password contains invalid characters".into(),
        ));
    }
    Ok(())
}

fn derive(password: &str, salt: &[u8]) -> Result<String, DataError> {
    let params = scrypt::Params::new(LOG_N, R, P, KEY_LEN)
        .map_err(|e| DataError::Crypto(format!("scrypt params: {}", e)))?;
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut key)
        .map_err(|e| DataError::Crypto(format!("scrypt: {}", e)))?;
    Ok(format!(
        "{}{}${}",
        PREFIX,
        STANDARD.encode(salt),
        STANDARD.encode(key)
    ))
}

/// Hash a raw password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, DataError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    derive(password, &salt)
}

/// Re-derive with the embedded salt and compare in constant time.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    if !is_hashed(hashed) {
        return false;
    }
    let Some(salt_b64) = hashed.split('$').nth(2) else {
        return false;
    };
    let Ok(salt) = STANDARD.decode(salt_b64) else {
        return false;
    };
    let Ok(candidate) = derive(password, &salt) else {
        return false;
    };
    candidate.as_bytes().ct_eq(hashed.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_have_the_stored_width() {
        let hashed = hash_password("hunter22").unwrap();
        assert_eq!(hashed.len(), HASH_LEN);
        assert!(hashed.starts_with(PREFIX));
        assert!(is_hashed(&hashed));
        assert!(!is_hashed("hunter22"));
    }

    #[test]
    fn verify_accepts_the_right_password_only() {
        let hashed = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hashed));
        assert!(!verify_password("hunter23", &hashed));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = hash_password("hunter22").unwrap();
        let b = hash_password("hunter22").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn raw_password_constraints() {
        let spec = PasswordSpec::default();
        assert!(validate_raw(&spec, "hunter22").is_ok());
        assert!(validate_raw(&spec, "short").is_err());
        assert!(validate_raw(&spec, "has space").is_err());
        let long = "x".repeat(65);
        assert!(validate_raw(&spec, &long).is_err());
    }
}
