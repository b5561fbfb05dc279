use super::clean_cell;
use crate::{Error, Result};
use csv::ReaderBuilder;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Largest exponent for which 10^decimals still fits in a u64
const MAX_DECIMALS: u8 = 19;

/// Token address -> on-chain decimal exponent, from the static metadata CSV
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    decimals: HashMap<String, u8>,
    symbols: HashMap<String, String>,
}

impl TokenRegistry {
    /// Load `token_address,decimals[,symbol]` rows.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| {
                Error::InvalidSchema(format!(
                    "cannot open token metadata {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let headers: Vec<String> = reader.headers()?.iter().map(clean_cell).collect();
        let address_idx = headers
            .iter()
            .position(|h| h == "token_address")
            .ok_or_else(|| Error::InvalidSchema("token metadata missing 'token_address'".into()))?;
        let decimals_idx = headers
            .iter()
            .position(|h| h == "decimals")
            .ok_or_else(|| Error::InvalidSchema("token metadata missing 'decimals'".into()))?;
        let symbol_idx = headers.iter().position(|h| h == "symbol");

        let mut registry = TokenRegistry::default();
        for (index, row) in reader.records().enumerate() {
            let row = row?;
            let line = index + 2;
            let address = row.get(address_idx).map(clean_cell).unwrap_or_default();
            if address.is_empty() {
                continue;
            }
            let raw_decimals = row.get(decimals_idx).map(clean_cell).unwrap_or_default();
            let decimals: u8 = raw_decimals
                .parse()
                .ok()
                .filter(|d| *d <= MAX_DECIMALS)
                .ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "token metadata line {}: invalid decimals '{}' for {}",
                        line, raw_decimals, address
                    ))
                })?;

            if let Some(symbol) = symbol_idx.and_then(|i| row.get(i)).map(clean_cell) {
                if !symbol.is_empty() {
                    registry.symbols.insert(address.clone(), symbol);
                }
            }
            if registry.decimals.insert(address.clone(), decimals).is_some() {
                return Err(Error::InvalidSchema(format!(
                    "token metadata line {}: duplicate entry for {}",
                    line, address
                )));
            }
        }

        tracing::info!(
            "Loaded metadata for {} tokens from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        Self {
            decimals: entries
                .into_iter()
                .map(|(address, decimals)| (address.into(), decimals))
                .collect(),
            symbols: HashMap::new(),
        }
    }

    pub fn decimals(&self, token: &str) -> Result<u8> {
        self.decimals
            .get(token)
            .copied()
            .ok_or_else(|| Error::UnknownToken(token.to_string()))
    }

    /// Symbol if known, else the address itself
    pub fn display_name<'a>(&'a self, token: &'a str) -> &'a str {
        self.symbols.get(token).map(String::as_str).unwrap_or(token)
    }

    pub(crate) fn len(&self) -> usize {
        self.decimals.len()
    }

    /// Convert a human decimal amount into base units: trunc(amount * 10^decimals).
    pub fn to_base_units(&self, token: &str, amount: &str) -> Result<u64> {
        let decimals = self.decimals(token)?;
        let value = Decimal::from_str(amount.trim())
            .map_err(|e| Error::InvalidAmount(format!("'{}': {}", amount, e)))?;
        if value <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!("'{}' must be positive", amount)));
        }

        let scale = Decimal::from(10u64.pow(u32::from(decimals)));
        let base_units = value
            .checked_mul(scale)
            .and_then(|scaled| scaled.trunc().to_u64())
            .ok_or_else(|| {
                Error::InvalidAmount(format!(
                    "'{}' with {} decimals overflows base units",
                    amount, decimals
                ))
            })?;

        if base_units == 0 {
            return Err(Error::InvalidAmount(format!(
                "'{}' is below the smallest unit of {}",
                amount, token
            )));
        }
        Ok(base_units)
    }
}

/// Slippage percent ("0.5" or "0.5%") to basis points, rounded to the nearest bp.
pub fn slippage_to_bps(slippage_pct: &str) -> Result<u16> {
    let cleaned = slippage_pct.trim().trim_end_matches('%').trim();
    let pct = Decimal::from_str(cleaned)
        .map_err(|e| Error::InvalidAmount(format!("slippage '{}': {}", slippage_pct, e)))?;

    let bps = pct
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|bps| bps.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .unwrap_or(Decimal::MAX);
    if bps < Decimal::ZERO || bps > Decimal::from(10_000) {
        return Err(Error::InvalidAmount(format!(
            "slippage '{}' out of range 0-100%",
            slippage_pct
        )));
    }
    bps.to_u16()
        .ok_or_else(|| Error::InvalidAmount(format!("slippage '{}'", slippage_pct)))
}
