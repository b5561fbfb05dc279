use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// Column names of the trade sheet
pub const COL_WALLET: &str = "wallet_address";
pub const COL_AMOUNT: &str = "coin_amount";
pub const COL_SLIPPAGE: &str = "slippage_in_pct";
pub const COL_FROM_TOKEN: &str = "from_token_address";
pub const COL_TO_TOKEN: &str = "to_token_address";
pub const COL_DELAY: &str = "delay_seconds";
pub const COL_TRANSACTION_ID: &str = "transaction_id";
pub const COL_STATUS: &str = "status";

/// Columns every trade sheet must carry, all non-empty per row
pub const REQUIRED_COLUMNS: [&str; 5] = [
    COL_WALLET,
    COL_AMOUNT,
    COL_SLIPPAGE,
    COL_FROM_TOKEN,
    COL_TO_TOKEN,
];

/// Terminal (or not yet) state of a trade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Success => "success",
            TradeStatus::Failed => "failed",
        }
    }

    /// Lenient parse used when re-loading a results file; anything unknown is pending
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => TradeStatus::Success,
            "failed" => TradeStatus::Failed,
            _ => TradeStatus::Pending,
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the trade sheet
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub wallet_address: String,
    pub from_token_address: String,
    pub to_token_address: String,
    /// Human decimal amount, kept verbatim for round-trip output
    pub coin_amount: String,
    /// Percent, e.g. "0.5" or "0.5%"
    pub slippage_in_pct: String,
    pub delay_seconds: Option<u64>,
    /// Every non-core column in header order, values verbatim
    pub passthrough: Vec<(String, String)>,
    pub transaction_id: String,
    pub status: TradeStatus,
}

impl TradeRecord {
    /// Value for a header column, whether core, outcome or passthrough
    pub fn field(&self, column: &str) -> Option<&str> {
        match column {
            COL_WALLET => Some(&self.wallet_address),
            COL_AMOUNT => Some(&self.coin_amount),
            COL_SLIPPAGE => Some(&self.slippage_in_pct),
            COL_FROM_TOKEN => Some(&self.from_token_address),
            COL_TO_TOKEN => Some(&self.to_token_address),
            COL_TRANSACTION_ID => Some(&self.transaction_id),
            COL_STATUS => Some(self.status.as_str()),
            _ => self
                .passthrough
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value.as_str()),
        }
    }

    /// Short label for logs: alias if the sheet has one, else the wallet address
    pub fn label(&self) -> &str {
        self.field("wallet_alias")
            .filter(|alias| !alias.is_empty())
            .unwrap_or(self.wallet_address.as_str())
    }

    pub fn delay(&self, default: Duration) -> Duration {
        self.delay_seconds
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Settled trades are skipped when a results file is re-run
    pub fn is_settled(&self) -> bool {
        self.status == TradeStatus::Success && !self.transaction_id.is_empty()
    }

    pub fn mark_success(&mut self, transaction_id: String) {
        self.transaction_id = transaction_id;
        self.status = TradeStatus::Success;
    }

    pub fn mark_failed(&mut self) {
        self.transaction_id.clear();
        self.status = TradeStatus::Failed;
    }
}

/// The ordered set of trades for one run
#[derive(Debug, Clone, PartialEq)]
pub struct TradeBatch {
    pub source: PathBuf,
    /// Header row of the source file, in order
    pub headers: Vec<String>,
    pub records: Vec<TradeRecord>,
    /// Source lines dropped at load because every cell was empty
    pub skipped_lines: Vec<usize>,
}

impl TradeBatch {
    /// Output header row: source headers plus outcome columns if they were absent
    pub fn output_headers(&self) -> Vec<String> {
        let mut headers = self.headers.clone();
        for column in [COL_TRANSACTION_ID, COL_STATUS] {
            if !headers.iter().any(|h| h == column) {
                headers.push(column.to_string());
            }
        }
        headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, status: TradeStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}
