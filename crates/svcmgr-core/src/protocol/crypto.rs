//! Cryptographic primitives for the Service Manager protocol
//!
//! The engine consumes cryptography through the narrow [`CryptoProvider`] contract:
//! ephemeral key pair generation, encryption of a bounded-size block to a public key,
//! hashing with a named algorithm, and random byte generation. [`SealedBoxCrypto`] is
//! the default provider: each block is sealed with a fresh X25519 agreement against the
//! recipient key, a SHA-256 derived key, and ChaCha20-Poly1305.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::errors::{CryptographicError, Result};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Largest plaintext accepted by one sealed block
pub const MAX_BLOCK_PLAINTEXT: usize = 190;

/// Size of an X25519 public key
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Domain separation for block key derivation
const BLOCK_KEY_CONTEXT: &[u8] = b"svcmgr-tunnel-block-v1";

// ----------------------------------------------------------------------------
// Keys
// ----------------------------------------------------------------------------

/// Public half of an ephemeral key pair, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, validating its length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptographicError::InvalidKeyFormat)?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Ephemeral X25519 key pair
#[derive(Clone)]
pub struct KeyPair {
    private_key: [u8; 32],
    public_key: PublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut private_key = [0u8; 32];
        OsRng.fill_bytes(&mut private_key);
        Self::from_private_bytes(private_key)
    }

    /// Create from raw private key bytes
    pub fn from_private_bytes(private_key: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_key);
        let public_key = PublicKey(X25519Public::from(&secret).to_bytes());
        Self {
            private_key,
            public_key,
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn secret(&self) -> StaticSecret {
        StaticSecret::from(self.private_key)
    }
}

// ----------------------------------------------------------------------------
// Hashing
// ----------------------------------------------------------------------------

/// Whole-file hash algorithms a manager may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Hash a byte sequence in one shot
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher
    pub fn hasher(&self) -> StreamingHasher {
        match self {
            HashAlgorithm::Sha256 => StreamingHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => StreamingHasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Incremental hasher over one of the supported algorithms
pub enum StreamingHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl StreamingHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamingHasher::Sha256(h) => h.update(data),
            StreamingHasher::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            StreamingHasher::Sha256(h) => h.finalize().to_vec(),
            StreamingHasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

// ----------------------------------------------------------------------------
// Crypto Provider Contract
// ----------------------------------------------------------------------------

/// Cryptographic collaborator consumed by the protocol engine
pub trait CryptoProvider: Send + Sync + fmt::Debug {
    /// Generate an ephemeral asymmetric key pair
    fn generate_key_pair(&self) -> KeyPair;

    /// Encrypt one bounded-size block for the holder of `recipient`'s private key
    fn encrypt_block(&self, recipient: &PublicKey, block: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt one block sealed to `key_pair`'s public key
    fn decrypt_block(&self, key_pair: &KeyPair, block: &[u8]) -> Result<Vec<u8>>;

    /// Largest plaintext accepted by [`CryptoProvider::encrypt_block`]
    fn max_block_size(&self) -> usize;

    /// Hash a byte sequence
    fn hash(&self, algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
        algorithm.digest(data)
    }

    /// Hash a file's content without loading it into memory
    fn hash_file(&self, algorithm: HashAlgorithm, path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let mut hasher = algorithm.hasher();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize())
    }

    /// Generate cryptographically random bytes
    fn random_bytes(&self, len: usize) -> Vec<u8>;
}

// ----------------------------------------------------------------------------
// Sealed Box Provider
// ----------------------------------------------------------------------------

/// Default provider: X25519 + SHA-256 + ChaCha20-Poly1305 sealed blocks
///
/// Block layout: `ephemeral_public (32) || ciphertext || tag (16)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealedBoxCrypto;

impl SealedBoxCrypto {
    pub fn new() -> Self {
        Self
    }
}

/// Derive the per-block symmetric key from the agreement and both public keys
fn derive_block_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(BLOCK_KEY_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

impl CryptoProvider for SealedBoxCrypto {
    fn generate_key_pair(&self) -> KeyPair {
        KeyPair::generate()
    }

    fn encrypt_block(&self, recipient: &PublicKey, block: &[u8]) -> Result<Vec<u8>> {
        if block.len() > MAX_BLOCK_PLAINTEXT {
            return Err(CryptographicError::BlockTooLarge {
                size: block.len(),
                max: MAX_BLOCK_PLAINTEXT,
            }
            .into());
        }

        let ephemeral = KeyPair::generate();
        let shared = ephemeral
            .secret()
            .diffie_hellman(&X25519Public::from(*recipient.as_bytes()));
        if !shared.was_contributory() {
            return Err(CryptographicError::InvalidKeyFormat.into());
        }

        let key = derive_block_key(
            shared.as_bytes(),
            ephemeral.public_key().as_bytes(),
            recipient.as_bytes(),
        );
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        // Every block uses a fresh key, so a fixed nonce is never reused under one key.
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&[0u8; 12]), block)
            .map_err(|_| CryptographicError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
        out.extend_from_slice(ephemeral.public_key().as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_block(&self, key_pair: &KeyPair, block: &[u8]) -> Result<Vec<u8>> {
        if block.len() < PUBLIC_KEY_SIZE + TAG_SIZE {
            return Err(CryptographicError::MalformedBlock {
                length: block.len(),
            }
            .into());
        }

        let (ephemeral, ciphertext) = block.split_at(PUBLIC_KEY_SIZE);
        let ephemeral = PublicKey::from_slice(ephemeral)?;
        let shared = key_pair
            .secret()
            .diffie_hellman(&X25519Public::from(*ephemeral.as_bytes()));
        if !shared.was_contributory() {
            return Err(CryptographicError::InvalidKeyFormat.into());
        }

        let key = derive_block_key(
            shared.as_bytes(),
            ephemeral.as_bytes(),
            key_pair.public_key().as_bytes(),
        );
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&[0u8; 12]), ciphertext)
            .map_err(|_| CryptographicError::DecryptionFailed)?;
        Ok(plaintext)
    }

    fn max_block_size(&self) -> usize {
        MAX_BLOCK_PLAINTEXT
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
