use super::SignedTransaction;
use crate::settings::RpcConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::RpcRequest;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use std::time::Duration;
use tokio::time::Instant;

/// A recent blockhash and the last block height at which it is valid.
///
/// Not `Clone`. `TransactionRelay::send` consumes it: one lease, one attempt.
#[derive(Debug, PartialEq, Eq)]
pub struct BlockhashLease {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTransaction {
    pub signature: Signature,
    pub slot: u64,
}

/// Why one submission attempt did not end in a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFailure {
    /// Lease expired or the confirmation deadline passed
    Timeout(String),
    /// The transaction's own blockhash is past its last valid height; the bytes can never land
    Expired(String),
    /// The RPC rejected the submission or a status poll failed
    Relay(String),
    /// The transaction landed but failed to execute
    Reverted(String),
}

impl RelayFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayFailure::Timeout(_) | RelayFailure::Relay(_))
    }
}

impl std::fmt::Display for RelayFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayFailure::Timeout(reason) => write!(f, "timeout: {}", reason),
            RelayFailure::Expired(reason) => write!(f, "expired: {}", reason),
            RelayFailure::Relay(reason) => write!(f, "relay error: {}", reason),
            RelayFailure::Reverted(reason) => write!(f, "reverted: {}", reason),
        }
    }
}

/// Submission and confirmation tracking against the network
#[async_trait]
pub trait TransactionRelay: Send + Sync {
    /// Draw a fresh blockhash lease for the next attempt
    async fn fresh_lease(&self) -> std::result::Result<BlockhashLease, RelayFailure>;

    /// Submit and wait until finalized, the lease expires, or the deadline passes
    async fn send(
        &self,
        tx: &SignedTransaction,
        lease: BlockhashLease,
    ) -> std::result::Result<ConfirmedTransaction, RelayFailure>;
}

pub fn parse_commitment(level: &str) -> Result<CommitmentConfig> {
    let commitment = match level.trim().to_ascii_lowercase().as_str() {
        "processed" => CommitmentLevel::Processed,
        "confirmed" => CommitmentLevel::Confirmed,
        "finalized" => CommitmentLevel::Finalized,
        other => {
            return Err(Error::Config(format!(
                "unknown commitment level '{}' (expected processed, confirmed or finalized)",
                other
            )))
        }
    };
    Ok(CommitmentConfig { commitment })
}

/// Compare the chain height with both expiry limits: the transaction's own first, then the lease.
pub fn check_expiry(
    block_height: u64,
    lease: &BlockhashLease,
    tx: &SignedTransaction,
) -> std::result::Result<(), RelayFailure> {
    if let Some(limit) = tx.last_valid_block_height() {
        if block_height > limit {
            return Err(RelayFailure::Expired(format!(
                "transaction blockhash valid until height {} (now {})",
                limit, block_height
            )));
        }
    }
    if block_height > lease.last_valid_block_height {
        return Err(RelayFailure::Timeout(format!(
            "blockhash expired at height {} (now {})",
            lease.last_valid_block_height, block_height
        )));
    }
    Ok(())
}

/// Solana JSON-RPC relay
pub struct RpcRelay {
    client: RpcClient,
    commitment: CommitmentConfig,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl RpcRelay {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let commitment = parse_commitment(&config.commitment)?;
        Ok(Self {
            client: RpcClient::new_with_commitment(config.url.clone(), commitment),
            commitment,
            confirm_timeout: Duration::from_secs(config.confirm_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    async fn submit(&self, tx: &SignedTransaction) -> std::result::Result<Signature, RelayFailure> {
        let params = json!([
            tx.to_base64(),
            {
                "encoding": "base64",
                "skipPreflight": true,
                "maxRetries": 0,
            }
        ]);
        let returned: String = self
            .client
            .send(RpcRequest::SendTransaction, params)
            .await
            .map_err(|e| RelayFailure::Relay(format!("sendTransaction failed: {}", e)))?;

        let signature: Signature = returned.parse().map_err(|_| {
            RelayFailure::Relay(format!("sendTransaction returned bad signature '{}'", returned))
        })?;
        if signature != *tx.signature() {
            tracing::warn!(
                "RPC returned signature {} for transaction {}",
                signature,
                tx.signature()
            );
        }
        Ok(*tx.signature())
    }

    async fn block_height(&self) -> std::result::Result<u64, RelayFailure> {
        self.client
            .get_block_height_with_commitment(self.commitment)
            .await
            .map_err(|e| RelayFailure::Relay(format!("getBlockHeight failed: {}", e)))
    }
}

#[async_trait]
impl TransactionRelay for RpcRelay {
    async fn fresh_lease(&self) -> std::result::Result<BlockhashLease, RelayFailure> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| RelayFailure::Relay(format!("getLatestBlockhash failed: {}", e)))?;

        Ok(BlockhashLease {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn send(
        &self,
        tx: &SignedTransaction,
        lease: BlockhashLease,
    ) -> std::result::Result<ConfirmedTransaction, RelayFailure> {
        // Never send bytes past their own expiry
        if tx.last_valid_block_height().is_some() {
            check_expiry(self.block_height().await?, &lease, tx)?;
        }

        let signature = self.submit(tx).await?;
        tracing::debug!(
            %signature,
            blockhash = %lease.blockhash,
            last_valid_block_height = lease.last_valid_block_height,
            "Submitted, awaiting confirmation"
        );

        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            let statuses = self
                .client
                .get_signature_statuses(&[signature])
                .await
                .map_err(|e| RelayFailure::Relay(format!("getSignatureStatuses failed: {}", e)))?;

            if let Some(Some(status)) = statuses.value.first() {
                if let Some(err) = &status.err {
                    return Err(RelayFailure::Reverted(err.to_string()));
                }
                if status.satisfies_commitment(self.commitment) {
                    return Ok(ConfirmedTransaction {
                        signature,
                        slot: status.slot,
                    });
                }
            }

            check_expiry(self.block_height().await?, &lease, tx)?;

            if Instant::now() + self.poll_interval > deadline {
                return Err(RelayFailure::Timeout(format!(
                    "not confirmed within {}s",
                    self.confirm_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
