// Trade sheet discovery and parsing
pub mod tokens;

pub use tokens::{slippage_to_bps, TokenRegistry};

use crate::models::{
    TradeBatch, TradeRecord, TradeStatus, COL_AMOUNT, COL_DELAY, COL_FROM_TOKEN, COL_SLIPPAGE,
    COL_STATUS, COL_TO_TOKEN, COL_TRANSACTION_ID, COL_WALLET, REQUIRED_COLUMNS,
};
use crate::{Error, Result};
use csv::ReaderBuilder;
use std::fs;
use std::path::{Path, PathBuf};

/// Strip surrounding whitespace and any stray line breaks from a cell
pub(crate) fn clean_cell(value: &str) -> String {
    value.replace(['\r', '\n'], "").trim().to_string()
}

/// Pick the most recent trade sheet in `dir`.
///
/// Sheet names embed a sortable `YYYYmmdd_HHMMSS` stamp, so the lexicographically
/// largest `<prefix>*.csv` is the newest.
pub fn select_latest_trade_file(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::NoTradeData(format!("cannot read trades directory {}: {}", dir.display(), e))
    })?;

    let mut latest: Option<String> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) || !name.ends_with(".csv") {
            continue;
        }
        if latest.as_deref().map_or(true, |current| name.as_str() > current) {
            latest = Some(name);
        }
    }

    let name = latest.ok_or_else(|| {
        Error::NoTradeData(format!(
            "no file matching {}*.csv in {}",
            prefix,
            dir.display()
        ))
    })?;

    tracing::info!("Selected trade sheet {}", name);
    Ok(dir.join(name))
}

/// Load and validate a trade sheet.
///
/// Validation is all-or-nothing: one row with an empty core field rejects the batch.
pub fn load_trade_batch(path: &Path) -> Result<TradeBatch> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| Error::NoTradeData(format!("cannot open {}: {}", path.display(), e)))?;

    let headers: Vec<String> = reader.headers()?.iter().map(clean_cell).collect();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !headers.iter().any(|h| h == required))
        .collect();
    if !missing.is_empty() {
        return Err(Error::InvalidSchema(format!(
            "{} is missing required column(s): {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let mut records = Vec::new();
    let mut skipped_lines = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row?;
        // Header is line 1
        let line = index + 2;
        let cells: Vec<String> = row.iter().map(clean_cell).collect();

        if cells.iter().all(|c| c.is_empty()) {
            tracing::warn!("⚠️  Skipping empty row at line {} of {}", line, path.display());
            skipped_lines.push(line);
            continue;
        }

        records.push(parse_record(&headers, &cells, line)?);
    }

    if records.is_empty() {
        return Err(Error::NoTradeData(format!(
            "{} has no data rows",
            path.display()
        )));
    }

    tracing::info!("Loaded {} trades from {}", records.len(), path.display());

    Ok(TradeBatch {
        source: path.to_path_buf(),
        headers,
        records,
        skipped_lines,
    })
}

fn parse_record(headers: &[String], cells: &[String], line: usize) -> Result<TradeRecord> {
    let mut record = TradeRecord {
        wallet_address: String::new(),
        from_token_address: String::new(),
        to_token_address: String::new(),
        coin_amount: String::new(),
        slippage_in_pct: String::new(),
        delay_seconds: None,
        passthrough: Vec::new(),
        transaction_id: String::new(),
        status: TradeStatus::Pending,
    };

    for (header, value) in headers.iter().zip(cells.iter()) {
        let value = value.clone();
        match header.as_str() {
            COL_WALLET => record.wallet_address = value,
            COL_AMOUNT => record.coin_amount = value,
            COL_SLIPPAGE => record.slippage_in_pct = value,
            COL_FROM_TOKEN => record.from_token_address = value,
            COL_TO_TOKEN => record.to_token_address = value,
            COL_TRANSACTION_ID => record.transaction_id = value,
            COL_STATUS => record.status = TradeStatus::parse(&value),
            _ => {
                if header == COL_DELAY {
                    record.delay_seconds = parse_delay(&value, line);
                }
                record.passthrough.push((header.clone(), value));
            }
        }
    }

    for column in REQUIRED_COLUMNS {
        if record.field(column).map_or(true, str::is_empty) {
            return Err(Error::InvalidSchema(format!(
                "line {}: required field '{}' is empty",
                line, column
            )));
        }
    }

    Ok(record)
}

fn parse_delay(value: &str, line: usize) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    // Spreadsheets like to write "5.0"
    match value.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Some(secs.round() as u64),
        _ => {
            tracing::warn!(
                "line {}: ignoring invalid delay_seconds '{}', using default",
                line,
                value
            );
            None
        }
    }
}
