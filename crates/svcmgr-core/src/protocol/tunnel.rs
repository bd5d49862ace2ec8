//! Tunnel encryption of oversized payloads
//!
//! Asymmetric primitives bound the plaintext size of one operation, so a payload is split
//! into blocks of at most [`CryptoProvider::max_block_size`] bytes and each block is sealed
//! independently to the recipient's public key. The recipient opens every block with its
//! private key and concatenates the results in their original order.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ManagerError, Result};
use crate::protocol::crypto::{CryptoProvider, KeyPair, PublicKey};

/// Ordered list of independently sealed blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelPayload {
    blocks: Vec<Vec<u8>>,
}

impl TunnelPayload {
    /// Wrap already-sealed blocks
    pub fn from_blocks(blocks: Vec<Vec<u8>>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Vec<u8>] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Seal raw bytes to `recipient`
    pub fn seal(crypto: &dyn CryptoProvider, recipient: &PublicKey, plaintext: &[u8]) -> Result<Self> {
        let block_size = crypto.max_block_size().max(1);
        let blocks = plaintext
            .chunks(block_size)
            .map(|chunk| crypto.encrypt_block(recipient, chunk))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    /// Open every block with `key_pair` and reassemble the plaintext
    pub fn open(&self, crypto: &dyn CryptoProvider, key_pair: &KeyPair) -> Result<Vec<u8>> {
        let mut plaintext = Vec::with_capacity(self.blocks.len() * crypto.max_block_size());
        for (index, block) in self.blocks.iter().enumerate() {
            match crypto.decrypt_block(key_pair, block) {
                Ok(opened) => plaintext.extend_from_slice(&opened),
                Err(err) => {
                    debug!(block = index, blocks = self.blocks.len(), error = %err, "Tunnel block failed to open");
                    return Err(err);
                }
            }
        }
        Ok(plaintext)
    }

    /// Serialize a value and seal it to `recipient`
    pub fn seal_value<T: Serialize>(
        crypto: &dyn CryptoProvider,
        recipient: &PublicKey,
        value: &T,
    ) -> Result<Self> {
        let bytes = bincode::serialize(value)?;
        Self::seal(crypto, recipient, &bytes)
    }

    /// Open the tunnel and deserialize the value it carries
    pub fn open_value<T: DeserializeOwned>(
        &self,
        crypto: &dyn CryptoProvider,
        key_pair: &KeyPair,
    ) -> Result<T> {
        let bytes = self.open(crypto, key_pair)?;
        bincode::deserialize(&bytes).map_err(|err| {
            debug!(length = bytes.len(), error = %err, "Tunnel payload did not decode");
            ManagerError::from(err)
        })
    }
}
