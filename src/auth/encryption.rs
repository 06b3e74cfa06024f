//! AES-256-GCM encryption for `Encrypted` columns, stored as
//! `$aesgcm$<nonce b64>$<ciphertext b64>`. The key is the first 32 bytes
//! of the secret key (zero-padded when shorter, though the secret should
//! always be at least 32 bytes).

use crate::error::DataError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

const PREFIX: &str = "$aesgcm$";
const NONCE_LEN: usize = 12;

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(PREFIX)
}

fn cipher(secret_key: &str) -> Result<Aes256Gcm, DataError> {
    let mut key = [0u8; 32];
    let bytes = secret_key.as_bytes();
    let n = bytes.len().min(32);
    key[..n].copy_from_slice(&bytes[..n]);
    Aes256Gcm::new_from_slice(&key).map_err(|e| DataError::Crypto(format!("aes key: {}", e)))
}

pub fn encrypt(plaintext: &str, secret_key: &str) -> Result<String, DataError> {
    let cipher = cipher(secret_key)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| DataError::Crypto("encryption failed".into()))?;
    Ok(format!(
        "{}{}${}",
        PREFIX,
        STANDARD.encode(nonce_bytes),
        STANDARD.encode(ciphertext)
    ))
}

pub fn decrypt(stored: &str, secret_key: &str) -> Result<String, DataError> {
    let rest = stored
        .strip_prefix(PREFIX)
        .ok_or_else(|| DataError::Crypto("not an encrypted value".into()))?;
    let (nonce_b64, ct_b64) = rest
        .split_once('$')
        .ok_or_else(|| DataError::Crypto("malformed encrypted value".into()))?;
    let nonce_bytes = STANDARD
        .decode(nonce_b64)
        .map_err(|e| DataError::Crypto(format!("nonce: {}", e)))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(DataError::Crypto("malformed encrypted value".into()));
    }
    let ciphertext = STANDARD
        .decode(ct_b64)
        .map_err(|e| DataError::Crypto(format!("ciphertext: {}", e)))?;
    let cipher = cipher(secret_key)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| DataError::Crypto("decryption failed".into()))?;
    String::from_utf8(plaintext).map_err(|_| DataError::Crypto("invalid utf8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn round_trip() {
        let sealed = encrypt("a private note", SECRET).unwrap();
        assert!(is_encrypted(&sealed));
        assert_ne!(sealed, "a private note");
        assert_eq!(decrypt(&sealed, SECRET).unwrap(), "a private note");
    }

    #[test]
    fn nonces_make_ciphertexts_unique() {
        let a = encrypt("same", SECRET).unwrap();
        let b = encrypt("same", SECRET).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = encrypt("secret", SECRET).unwrap();
        let err = decrypt(&sealed, "another-key-another-key-another!");
        assert!(matches!(err, Err(DataError::Crypto(_))));
    }

    #[test]
    fn tampered_values_fail() {
        let sealed = encrypt("secret", SECRET).unwrap();
        let mut broken = sealed.clone();
        broken.truncate(sealed.len() - 2);
        assert!(decrypt(&broken, SECRET).is_err());
        assert!(decrypt("plain text", SECRET).is_err());
    }
}
