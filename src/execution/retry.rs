use super::confirmation::{ConfirmedTransaction, RelayFailure, TransactionRelay};
use super::SignedTransaction;
use crate::journal::TradeLog;
use crate::settings::RetryConfig;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Attempt budget and capped exponential backoff (no jitter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(30000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `min(base * 2^attempt, max)`
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Drives one signed transaction through submit/confirm attempts.
///
/// Every attempt draws a fresh lease and re-sends the same signed bytes.
/// Timeouts and relay errors are retried. A revert, or bytes past their own
/// expiry height, end the trade at once.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// # Arguments
    /// * `relay` - Network relay
    /// * `tx` - Transaction signed once by the trade's wallet
    /// * `label` - Wallet label for log lines
    /// * `log` - Audit log receiving every attempt, failure and wait
    /// * `shutdown` - Checked before every retry
    pub async fn run<R: TransactionRelay + ?Sized>(
        &self,
        relay: &R,
        tx: &SignedTransaction,
        label: &str,
        log: &TradeLog,
        shutdown: &AtomicBool,
    ) -> Result<ConfirmedTransaction> {
        let max_attempts = self.policy.max_attempts;
        let mut last_failure = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if attempt > 1 && shutdown.load(Ordering::SeqCst) {
                log.record(&format!(
                    "Shutdown requested, abandoning {} after {} attempts",
                    label,
                    attempt - 1
                ));
                return Err(Error::Cancelled {
                    attempts: attempt - 1,
                });
            }

            log.record(&format!(
                "Attempt {}/{} for {}: sending {}",
                attempt,
                max_attempts,
                label,
                tx.signature()
            ));

            let outcome = match relay.fresh_lease().await {
                Ok(lease) => {
                    tracing::debug!(
                        wallet = %label,
                        attempt,
                        last_valid_block_height = lease.last_valid_block_height,
                        "Drew blockhash lease"
                    );
                    relay.send(tx, lease).await
                }
                Err(failure) => Err(failure),
            };

            match outcome {
                Ok(confirmed) => {
                    log.record(&format!(
                        "Attempt {}/{} for {} confirmed: {} (slot {})",
                        attempt, max_attempts, label, confirmed.signature, confirmed.slot
                    ));
                    tracing::info!(
                        wallet = %label,
                        attempt,
                        signature = %confirmed.signature,
                        "✅ Transaction confirmed"
                    );
                    return Ok(confirmed);
                }
                Err(failure) => {
                    log.record(&format!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt, max_attempts, label, failure
                    ));

                    if !failure.is_retryable() {
                        tracing::error!(wallet = %label, attempt, "❌ Attempt failed, not retrying: {}", failure);
                        return Err(match failure {
                            RelayFailure::Reverted(reason) => Error::Reverted(reason),
                            other => Error::RetriesExhausted {
                                attempts: attempt,
                                last_error: other.to_string(),
                            },
                        });
                    }

                    tracing::warn!(wallet = %label, attempt, "⚠️  Attempt failed: {}", failure);
                    last_failure = failure.to_string();

                    if attempt < max_attempts {
                        let wait = self.policy.backoff_after(attempt);
                        log.record(&format!(
                            "Waiting {}ms before attempt {} for {}",
                            wait.as_millis(),
                            attempt + 1,
                            label
                        ));
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        log.record(&format!(
            "All {} attempts failed for {}",
            max_attempts, label
        ));
        Err(Error::RetriesExhausted {
            attempts: max_attempts,
            last_error: last_failure,
        })
    }
}
