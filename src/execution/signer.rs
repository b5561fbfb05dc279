use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::VersionedTransaction;

/// A signed transaction ready for the wire
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    signature: Signature,
    wire_bytes: Vec<u8>,
    last_valid_block_height: Option<u64>,
}

impl SignedTransaction {
    /// First signature: the fee payer's, and the transaction id once confirmed
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Last block height at which the embedded blockhash is accepted, when the builder reported it
    pub fn last_valid_block_height(&self) -> Option<u64> {
        self.last_valid_block_height
    }

    pub fn expires_at(mut self, last_valid_block_height: Option<u64>) -> Self {
        self.last_valid_block_height = last_valid_block_height;
        self
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.wire_bytes)
    }
}

/// Decode an unsigned swap transaction, sign it with `keypair`, re-serialize it.
///
/// No I/O. Any failure is non-retryable.
pub fn sign_transaction(unsigned_base64: &str, keypair: &Keypair) -> Result<SignedTransaction> {
    let bytes = BASE64
        .decode(unsigned_base64.trim())
        .map_err(|e| Error::MalformedTransaction(format!("not base64: {}", e)))?;

    let unsigned: VersionedTransaction = bincode::deserialize(&bytes)
        .map_err(|e| Error::MalformedTransaction(format!("cannot deserialize: {}", e)))?;

    let signed = VersionedTransaction::try_new(unsigned.message, &[keypair])
        .map_err(|e| Error::MalformedTransaction(format!("cannot sign: {}", e)))?;

    let signature = *signed
        .signatures
        .first()
        .ok_or_else(|| Error::MalformedTransaction("transaction has no signatures".into()))?;

    let wire_bytes = bincode::serialize(&signed)
        .map_err(|e| Error::MalformedTransaction(format!("cannot serialize: {}", e)))?;

    Ok(SignedTransaction {
        signature,
        wire_bytes,
        last_valid_block_height: None,
    })
}
