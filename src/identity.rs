//! Key material, signatures and address derivation.
//!
//! The ledger only talks to [`Identity`]; [`Ed25519Identity`] is the
//! implementation the node ships with. Public keys and signatures travel as
//! lowercase hex, addresses as base58 with a four byte double-SHA-256
//! checksum.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// Version byte prefixed to every address payload.
const ADDRESS_VERSION: u8 = 0x17;

/// Sign/verify/derive capability used by admission control and the
/// delegate quorum.
pub trait Identity: Send + Sync {
    /// Checksummed address for a public key. Deterministic.
    fn derive_address(&self, public_key: &str) -> String;

    /// Signature over `message` with the hex-encoded private key, or `None`
    /// when the key is malformed.
    fn sign(&self, message: &[u8], private_key: &str) -> Option<String>;

    fn verify(&self, message: &[u8], signature: &str, public_key: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Identity;

impl Identity for Ed25519Identity {
    fn derive_address(&self, public_key: &str) -> String {
        let digest = Sha256::digest(public_key.as_bytes());
        let mut payload = Vec::with_capacity(25);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(&digest[..20]);
        let check = Sha256::digest(Sha256::digest(&payload));
        payload.extend_from_slice(&check[..4]);
        bs58::encode(payload).into_string()
    }

    fn sign(&self, message: &[u8], private_key: &str) -> Option<String> {
        let seed: [u8; 32] = hex::decode(private_key).ok()?.try_into().ok()?;
        let key = SigningKey::from_bytes(&seed);
        Some(hex::encode(key.sign(message).to_bytes()))
    }

    fn verify(&self, message: &[u8], signature: &str, public_key: &str) -> bool {
        let Some(key) = decode_array::<32>(public_key)
            .and_then(|bytes| VerifyingKey::from_bytes(&bytes).ok())
        else {
            return false;
        };
        let Some(sig) = decode_array::<64>(signature) else {
            return false;
        };
        key.verify(message, &Signature::from_bytes(&sig)).is_ok()
    }
}

fn decode_array<const N: usize>(text: &str) -> Option<[u8; N]> {
    hex::decode(text).ok()?.try_into().ok()
}

/// An ed25519 signing key with its derived address.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    address: String,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Deterministic key derived from a label, for fixtures and demo nodes.
    pub fn from_label(label: &str) -> Self {
        Self::from_seed(Sha256::digest(label.as_bytes()).into())
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());
        let address = Ed25519Identity.derive_address(&public_key);
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn private_key(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_derivation_is_deterministic() {
        let key = Keypair::from_label("alice");
        let id = Ed25519Identity;
        assert_eq!(id.derive_address(&key.public_key()), key.address());
        assert_eq!(
            id.derive_address(&key.public_key()),
            id.derive_address(&key.public_key())
        );
        assert_ne!(key.address(), Keypair::from_label("bob").address());
    }

    #[test]
    fn address_carries_valid_checksum() {
        let key = Keypair::generate();
        let raw = bs58::decode(key.address()).into_vec().unwrap();
        assert_eq!(raw.len(), 25);
        assert_eq!(raw[0], ADDRESS_VERSION);
        let check = Sha256::digest(Sha256::digest(&raw[..21]));
        assert_eq!(&raw[21..], &check[..4]);
    }

    #[test]
    fn sign_and_verify() {
        let key = Keypair::from_label("alice");
        let id = Ed25519Identity;
        let sig = id.sign(b"hello", &key.private_key()).unwrap();
        assert_eq!(sig, key.sign(b"hello"));
        assert!(id.verify(b"hello", &sig, &key.public_key()));
        assert!(!id.verify(b"hullo", &sig, &key.public_key()));
        assert!(!id.verify(b"hello", "zz", &key.public_key()));
        assert!(!id.verify(b"hello", &sig, "not-a-key"));
    }
}
