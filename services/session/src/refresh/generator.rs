//! Refresh token generation and hashing.

use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use ring::hmac;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Encoded length of a 128-bit family id.
pub const FAMILY_ID_LEN: usize = 22;
/// Encoded length of a 256-bit refresh secret.
pub const SECRET_LEN: usize = 43;

/// Creates refresh tokens of the form `<family_id>.<secret>`.
pub struct RefreshTokenGenerator;

impl RefreshTokenGenerator {
    /// New random family id.
    pub fn generate_family_id() -> String {
        let random_bytes: [u8; 16] = rand::thread_rng().gen();
        URL_SAFE_NO_PAD.encode(random_bytes)
    }

    /// First refresh token of a family, with a random secret.
    pub fn initial(family_id: &str) -> String {
        let random_bytes: [u8; 32] = rand::thread_rng().gen();
        format!("{family_id}.{}", URL_SAFE_NO_PAD.encode(random_bytes))
    }

    /// Refresh token replacing `presented` when the family moves to `next_version`.
    ///
    /// Deterministic for a given key and inputs, so every request that rotates
    /// the same token from the same version derives the same successor.
    pub fn derive(key: &[u8], family_id: &str, next_version: u64, presented: &str) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(family_id.as_bytes());
        ctx.update(&next_version.to_be_bytes());
        ctx.update(presented.as_bytes());
        let tag = ctx.sign();
        format!("{family_id}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    /// Persisted reference of a token: SHA-256, base64url.
    pub fn hash(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let result = hasher.finalize();
        URL_SAFE_NO_PAD.encode(result)
    }

    /// Family id embedded in a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidSignature`] for anything not shaped like a
    /// token this generator produced.
    pub fn family_id_of(token: &str) -> Result<&str, AuthError> {
        let (family_id, secret) = token.split_once('.').ok_or(AuthError::InvalidSignature)?;
        if family_id.len() != FAMILY_ID_LEN
            || secret.len() != SECRET_LEN
            || !is_base64url(family_id)
            || !is_base64url(secret)
        {
            return Err(AuthError::InvalidSignature);
        }
        Ok(family_id)
    }

    /// Constant-time comparison of two refs.
    pub fn refs_equal(a: &str, b: &str) -> bool {
        bool::from(a.as_bytes().ct_eq(b.as_bytes()))
    }
}

fn is_base64url(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
