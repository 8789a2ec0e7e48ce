//! Key material generation. WireGuard keys are Curve25519 keys carried
//! around base64-encoded; pre-shared keys are 32 random bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to decode base64 key: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A freshly generated private/public key pair, both base64-encoded.
#[derive(Debug, Clone)]
pub struct Keypair {
    pub private_key: String,
    pub public_key: String,
}

pub fn generate_keypair() -> Keypair {
    let secret = StaticSecret::random_from_rng(&mut OsRng);
    let public = PublicKey::from(&secret);
    Keypair {
        private_key: BASE64.encode(secret.to_bytes()),
        public_key: BASE64.encode(public.as_bytes()),
    }
}

pub fn generate_preshared_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Recompute the public key for a pasted private key, so the UI can show it
/// while the user types.
pub fn derive_public_key(private_b64: &str) -> Result<String, KeyError> {
    let secret = StaticSecret::from(decode_key(private_b64)?);
    let public = PublicKey::from(&secret);
    Ok(BASE64.encode(public.as_bytes()))
}

fn decode_key(b64: &str) -> Result<[u8; 32], KeyError> {
    let bytes = BASE64.decode(b64.trim())?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_public_matches_generated() {
        let keypair = generate_keypair();
        let derived = derive_public_key(&keypair.private_key).unwrap();
        assert_eq!(derived, keypair.public_key);
    }

    #[test]
    fn keypairs_are_unique() {
        let a = generate_keypair();
        let b = generate_keypair();
        assert_ne!(a.private_key, b.private_key);
    }

    #[test]
    fn preshared_key_is_32_bytes() {
        let psk = generate_preshared_key();
        let bytes = BASE64.decode(psk).unwrap();
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn short_key_rejected() {
        assert!(matches!(
            derive_public_key("YWJj"),
            Err(KeyError::InvalidLength(3))
        ));
    }

    #[test]
    fn garbage_key_rejected() {
        assert!(matches!(
            derive_public_key("!!not base64!!"),
            Err(KeyError::Decode(_))
        ));
    }
}
