//! Ed25519 keys and transaction signatures
//!
//! Transaction authorization uses ed25519. A signature travels as a
//! 96-byte envelope of `public key (32) ‖ signature (64)` so that a
//! verifier can check both the signature and that the key hashes to the
//! sender address. Addresses are the first 20 bytes of SHA-256 over the
//! public key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use super::{hash_bytes, Address};

/// Length of the on-wire signature envelope: pubkey (32) + signature (64)
pub const SIGNATURE_ENVELOPE_LEN: usize = 96;

/// Key handling errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid seed length: expected 32 bytes, got {0}")]
    InvalidSeedLength(usize),
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// An ed25519 signing keypair
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair(public: {})", hex::encode(self.public_bytes()))
    }
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Keypair {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Derive a keypair from a 32-byte seed
    pub fn from_seed(seed: &[u8]) -> Result<Self, KeyError> {
        if seed.len() != 32 {
            return Err(KeyError::InvalidSeedLength(seed.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(seed);
        Ok(Keypair {
            signing: SigningKey::from_bytes(&arr),
        })
    }

    /// The 32-byte public key
    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// The seed of the private key
    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Address owned by this keypair: first 20 bytes of SHA-256(pubkey)
    pub fn address(&self) -> Address {
        address_for_public_key(&self.public_bytes())
    }

    /// Sign a message, returning the 96-byte envelope
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing.sign(message);
        let mut envelope = Vec::with_capacity(SIGNATURE_ENVELOPE_LEN);
        envelope.extend_from_slice(&self.public_bytes());
        envelope.extend_from_slice(&signature.to_bytes());
        envelope
    }
}

/// Derive the address of a raw ed25519 public key
pub fn address_for_public_key(public_key: &[u8; 32]) -> Address {
    let digest = hash_bytes(public_key);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest.0[..20]);
    Address(addr)
}

/// Verify a signature envelope over `message` for the claimed sender.
///
/// Returns false on any malformed envelope, an embedded key that does
/// not hash to `from`, or a signature that does not verify.
pub fn verify_envelope(from: &Address, message: &[u8], envelope: &[u8]) -> bool {
    if envelope.len() != SIGNATURE_ENVELOPE_LEN {
        return false;
    }

    let mut pubkey = [0u8; 32];
    pubkey.copy_from_slice(&envelope[..32]);

    if address_for_public_key(&pubkey) != *from {
        return false;
    }

    let verifying = match VerifyingKey::from_bytes(&pubkey) {
        Ok(vk) => vk,
        Err(_) => return false,
    };

    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(&envelope[32..]);
    let signature = Signature::from_bytes(&sig_bytes);

    verifying.verify(message, &signature).is_ok()
}
