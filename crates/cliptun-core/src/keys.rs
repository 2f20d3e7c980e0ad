//! Key derivation for the packet codec.
//!
//! Both peers share only a password; the symmetric key is derived with
//! PBKDF2-HMAC-SHA256 over a static salt so both sides arrive at the same
//! 256-bit key.

use hmac::Hmac;
use sha2::Sha256;

use crate::constants::{KDF_ITERATIONS, KDF_SALT, KEY_LEN};
use crate::error::{Error, Result};

/// Derive the 256-bit channel key from the shared password.
pub fn derive_key(password: &str) -> Result<[u8; KEY_LEN]> {
    if password.is_empty() {
        return Err(Error::config("no password for encryption given"));
    }

    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key)
        .map_err(|_| Error::config("could not derive key from password"))?;
    Ok(key)
}
