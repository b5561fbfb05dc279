use super::confirmation::TransactionRelay;
use super::retry::RetryController;
use super::signer::sign_transaction;
use crate::api::JupiterClient;
use crate::credentials::WalletKeyMap;
use crate::journal::{ResultJournal, TradeLog};
use crate::loader::{slippage_to_bps, TokenRegistry};
use crate::models::{TradeBatch, TradeRecord, TradeStatus};
use crate::Result;
use solana_sdk::signature::Keypair;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome counts for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Already settled by an earlier run
    pub skipped: usize,
    /// Never attempted (shutdown)
    pub pending: usize,
    /// Audit log lines that could not be written
    pub audit_write_failures: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.pending
    }
}

/// Everything a trade needs before touching the network
#[derive(Debug)]
pub struct PreparedTrade<'a> {
    pub keypair: &'a Keypair,
    pub amount: u64,
    pub slippage_bps: u16,
}

/// Check a record's local preconditions: signing key, known tokens, amount and slippage.
pub fn prepare<'a>(
    record: &TradeRecord,
    wallets: &'a WalletKeyMap,
    tokens: &TokenRegistry,
) -> Result<PreparedTrade<'a>> {
    let keypair = wallets.get(&record.wallet_address)?;
    tokens.decimals(&record.to_token_address)?;
    let amount = tokens.to_base_units(&record.from_token_address, &record.coin_amount)?;
    let slippage_bps = slippage_to_bps(&record.slippage_in_pct)?;

    Ok(PreparedTrade {
        keypair,
        amount,
        slippage_bps,
    })
}

/// Runs a trade batch strictly in order, one trade at a time.
///
/// A failing trade is marked `failed` and the batch moves on. The results file
/// is rewritten after every trade.
pub struct BatchOrchestrator<R: TransactionRelay> {
    quotes: JupiterClient,
    relay: R,
    wallets: WalletKeyMap,
    tokens: TokenRegistry,
    retry: RetryController,
    journal: ResultJournal,
    default_delay: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<R: TransactionRelay> BatchOrchestrator<R> {
    pub fn new(
        quotes: JupiterClient,
        relay: R,
        wallets: WalletKeyMap,
        tokens: TokenRegistry,
        retry: RetryController,
        journal: ResultJournal,
    ) -> Self {
        Self {
            quotes,
            relay,
            wallets,
            tokens,
            retry,
            journal,
            default_delay: Duration::from_secs(5),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pause before each trade after the first, unless the row sets `delay_seconds`
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn journal(&self) -> &ResultJournal {
        &self.journal
    }

    #[cfg(test)]
    fn relay(&self) -> &R {
        &self.relay
    }

    fn log(&self) -> &TradeLog {
        self.journal.log()
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Execute every unsettled record, updating `batch` in place.
    ///
    /// Only journal failures are returned as errors; trade failures end up in the records.
    pub async fn run(&self, batch: &mut TradeBatch) -> Result<BatchSummary> {
        let total = batch.len();
        let mut summary = BatchSummary::default();
        let mut attempted = 0usize;

        self.log().record(&format!(
            "Starting batch of {} trades from {}",
            total,
            batch.source.display()
        ));
        tracing::info!("🚀 Processing {} trades from {}", total, batch.source.display());
        if !batch.skipped_lines.is_empty() {
            let lines: Vec<String> = batch.skipped_lines.iter().map(|l| l.to_string()).collect();
            self.log().record(&format!(
                "Skipped empty rows at line(s) {}",
                lines.join(", ")
            ));
        }

        for index in 0..total {
            let number = index + 1;

            if batch.records[index].is_settled() {
                let record = &batch.records[index];
                self.log().record(&format!(
                    "Trade {}/{} for {} already settled ({}), skipping",
                    number,
                    total,
                    record.label(),
                    record.transaction_id
                ));
                tracing::info!(wallet = %record.label(), "⏭️  Trade {}/{} already settled", number, total);
                summary.skipped += 1;
                continue;
            }

            if self.shutdown_requested() {
                break;
            }

            self.announce(&batch.records[index], number, total);

            if attempted > 0 {
                let delay = batch.records[index].delay(self.default_delay);
                if !delay.is_zero() {
                    self.log().record(&format!(
                        "Waiting {}s before trade {}/{}",
                        delay.as_secs_f64(),
                        number,
                        total
                    ));
                    tokio::time::sleep(delay).await;
                }
                if self.shutdown_requested() {
                    self.log().record(&format!(
                        "Trade {}/{} not started: shutdown requested",
                        number, total
                    ));
                    break;
                }
            }
            attempted += 1;

            let outcome = self.execute(&batch.records[index]).await;

            let record = &mut batch.records[index];
            match outcome {
                Ok(signature) => {
                    record.mark_success(signature);
                    summary.succeeded += 1;
                }
                Err(e) => {
                    self.log().record(&format!(
                        "Trade {}/{} for {} failed: {}",
                        number,
                        total,
                        record.label(),
                        e
                    ));
                    tracing::error!(wallet = %record.label(), class = ?e.class(), "❌ Trade {}/{} failed: {}", number, total, e);
                    record.mark_failed();
                    summary.failed += 1;
                }
            }

            self.log().record(&format!(
                "Trade {}/{} for {} completed: status={} transaction_id={}",
                number,
                total,
                record.label(),
                record.status,
                record.transaction_id
            ));

            self.checkpoint(batch)?;
        }

        summary.pending = batch.count(TradeStatus::Pending);
        if self.shutdown_requested() {
            self.log().record(&format!(
                "Shutdown requested, {} trades left pending",
                summary.pending
            ));
            tracing::warn!("🛑 Shutdown requested, {} trades left pending", summary.pending);
        }
        if attempted == 0 {
            self.checkpoint(batch)?;
        }

        self.log().record(&format!(
            "Batch finished: {} succeeded, {} failed, {} skipped, {} pending",
            summary.succeeded, summary.failed, summary.skipped, summary.pending
        ));
        summary.audit_write_failures = self.log().failed_writes();
        if summary.audit_write_failures > 0 {
            tracing::warn!(
                "⚠️  {} audit log lines could not be written to {}",
                summary.audit_write_failures,
                self.log().path().display()
            );
        }
        Ok(summary)
    }

    /// The one writer of the results file
    fn checkpoint(&self, batch: &TradeBatch) -> Result<()> {
        self.journal.persist(batch).map_err(|e| {
            tracing::error!(
                "❌ Failed to write results to {}: {}",
                self.journal.results_path().display(),
                e
            );
            e
        })
    }

    fn announce(&self, record: &TradeRecord, number: usize, total: usize) {
        let label = record.label();
        let from = self.tokens.display_name(&record.from_token_address);
        let to = self.tokens.display_name(&record.to_token_address);

        self.log().record(&format!(
            "Starting trade {}/{} for {}: {} {} -> {} (slippage {}%)",
            number, total, label, record.coin_amount, from, to, record.slippage_in_pct
        ));
        tracing::info!(wallet = %label, "🔄 Trade {}/{}: {} {} -> {}", number, total, record.coin_amount, from, to);
    }

    /// Key, units, quote, swap build, sign, then submit with retries
    async fn execute(&self, record: &TradeRecord) -> Result<String> {
        let label = record.label();
        let prepared = prepare(record, &self.wallets, &self.tokens)?;

        let quote = self
            .quotes
            .get_quote(
                &record.from_token_address,
                &record.to_token_address,
                prepared.amount,
                prepared.slippage_bps,
            )
            .await?;
        self.log().record(&format!(
            "Quote for {}: {} -> {} base units, price impact {}%, route [{}]",
            label,
            quote.in_amount,
            quote.out_amount,
            quote.price_impact_pct,
            quote.route.join(", ")
        ));

        let unsigned = self
            .quotes
            .get_swap_transaction(&quote, &record.wallet_address)
            .await?;
        let signed = sign_transaction(&unsigned.transaction, prepared.keypair)?
            .expires_at(unsigned.last_valid_block_height);
        self.log().record(&format!(
            "Signed swap for {}: {} (valid until height {})",
            label,
            signed.signature(),
            signed
                .last_valid_block_height()
                .map_or_else(|| "unknown".to_string(), |h| h.to_string())
        ));

        let confirmed = self
            .retry
            .run(&self.relay, &signed, label, self.log(), &self.shutdown)
            .await?;
        Ok(confirmed.signature.to_string())
    }
}
