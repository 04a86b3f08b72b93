//! Single-use session keys.
//!
//! Each session request gets a fresh Ed25519 keypair distinct from the
//! wallet's root key. The public half becomes `sessionPubkey`; the secret
//! half only ever lives in the secure store and in transfer requests.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::errors::{AuthzError, AuthzResult};
use crate::limits::SpendingLimit;

/// Prefix for the secure-store entry holding a session secret.
pub const SESSION_KEY_PREFIX: &str = "odyssey_session_key:";

const REQUEST_DOMAIN: &[u8] = b"odyssey/session-request/v1";

pub struct SessionKeypair {
    signing: SigningKey,
}

impl SessionKeypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild from the 32-byte secret seed.
    pub fn from_secret_bytes(secret: &[u8]) -> AuthzResult<Self> {
        let seed: [u8; 32] = secret.try_into().map_err(|_| {
            AuthzError::InvalidRequest(format!(
                "session secret must be 32 bytes, got {}",
                secret.len()
            ))
        })?;
        let seed = Zeroizing::new(seed);
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// Base58 public key, the session's on-chain address.
    pub fn public_key(&self) -> String {
        bs58::encode(self.signing.verifying_key().to_bytes()).into_string()
    }

    /// Raw secret seed for the secure store.
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing.to_bytes().to_vec())
    }

    /// Base58 of the 64-byte `secret || public` keypair, as the transfer
    /// endpoints expect it.
    pub fn keypair_base58(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.signing.to_keypair_bytes());
        Zeroizing::new(bs58::encode(bytes.as_slice()).into_string())
    }

    /// Base58 Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> String {
        bs58::encode(self.signing.sign(message).to_bytes()).into_string()
    }
}

impl std::fmt::Debug for SessionKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeypair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

pub fn storage_key(session_pubkey: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_pubkey}")
}

/// Canonical bytes signed by the session key when requesting a session.
///
/// Binds every field the owner will be asked to approve, so the backend can
/// check the request was made by the holder of `session_pubkey`.
pub fn session_request_message(
    agent_id: &str,
    wallet_pubkey: &str,
    session_pubkey: &str,
    limits: &[SpendingLimit],
    duration_seconds: u64,
    timestamp: u64,
) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(REQUEST_DOMAIN);
    for field in [agent_id, wallet_pubkey, session_pubkey] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update(duration_seconds.to_be_bytes());
    hasher.update(timestamp.to_be_bytes());
    hasher.update((limits.len() as u64).to_be_bytes());
    for limit in limits {
        hasher.update((limit.mint.len() as u64).to_be_bytes());
        hasher.update(limit.mint.as_bytes());
        hasher.update(limit.base_units().unwrap_or(0).to_be_bytes());
        hasher.update([limit.decimals]);
    }
    hasher.finalize().to_vec()
}

/// Check a base58 signature against a base58 public key.
pub fn verify(public_key: &str, message: &[u8], signature: &str) -> bool {
    let Ok(pk) = bs58::decode(public_key).into_vec() else {
        return false;
    };
    let Ok(pk) = <[u8; 32]>::try_from(pk.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&pk) else {
        return false;
    };
    let Ok(sig) = bs58::decode(signature).into_vec() else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_unique() {
        let a = SessionKeypair::generate();
        let b = SessionKeypair::generate();
        assert_ne!(a.public_key(), b.public_key());
        assert!(crate::ledger::is_well_formed_address(&a.public_key()));
    }

    #[test]
    fn test_secret_roundtrip_preserves_identity() {
        let key = SessionKeypair::generate();
        let restored = SessionKeypair::from_secret_bytes(&key.secret_bytes()).unwrap();
        assert_eq!(key.public_key(), restored.public_key());
        assert!(SessionKeypair::from_secret_bytes(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_request_signature_verifies() {
        let key = SessionKeypair::generate();
        let limits = vec![SpendingLimit::native(0.5)];
        let msg = session_request_message("a1", "W", &key.public_key(), &limits, 3600, 42);
        let sig = key.sign(&msg);
        assert!(verify(&key.public_key(), &msg, &sig));

        let tampered = session_request_message("a1", "W", &key.public_key(), &limits, 7200, 42);
        assert!(!verify(&key.public_key(), &tampered, &sig));
    }

    #[test]
    fn test_keypair_layout() {
        let key = SessionKeypair::generate();
        let kp = bs58::decode(key.keypair_base58().as_str()).into_vec().unwrap();
        assert_eq!(kp.len(), 64);
        assert_eq!(bs58::encode(&kp[32..]).into_string(), key.public_key());
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = SessionKeypair::generate();
        let secret = bs58::encode(key.secret_bytes().as_slice()).into_string();
        assert!(!format!("{:?}", key).contains(&secret));
    }
}
