use crate::{Error, Result};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

// Jupiter Swap API v1
// Docs: https://dev.jup.ag/docs/swap-api/get-quote
pub const JUPITER_SWAP_API: &str = "https://lite-api.jup.ag/swap/v1";

// Type alias for the rate limiter to simplify signatures
type JupiterRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the Jupiter quote and swap-build endpoints.
///
/// No retries here: a failed call fails the trade. Calls are paced by a shared
/// rate limiter so a long batch stays under the public API quota.
#[derive(Clone)]
pub struct JupiterClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<JupiterRateLimiter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    in_amount: String,
    out_amount: String,
    #[serde(default)]
    price_impact_pct: Option<String>,
    #[serde(default)]
    route_plan: Vec<RoutePlanStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutePlanStep {
    swap_info: SwapInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapInfo {
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    #[serde(default)]
    swap_transaction: Option<String>,
    #[serde(default)]
    last_valid_block_height: Option<u64>,
}

/// Quote for one swap. `raw` is posted back verbatim to build the transaction.
#[derive(Debug, Clone)]
pub struct Quote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    /// AMM labels along the route, e.g. ["Raydium", "Orca"]
    pub route: Vec<String>,
    raw: Value,
}

impl Quote {
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// Unsigned transaction returned by the swap endpoint
#[derive(Debug, Clone)]
pub struct UnsignedSwap {
    /// base64 bincode-serialized VersionedTransaction
    pub transaction: String,
    pub last_valid_block_height: Option<u64>,
}

impl JupiterClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, requests_per_minute: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let rpm = NonZeroU32::new(requests_per_minute)
            .ok_or_else(|| Error::Config("requests_per_minute must be positive".into()))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    /// Get a quote for swapping tokens
    ///
    /// # Arguments
    /// * `input_mint` - Input token mint address
    /// * `output_mint` - Output token mint address
    /// * `amount` - Amount in base units (e.g., lamports for SOL)
    /// * `slippage_bps` - Slippage tolerance in basis points (50 = 0.5%)
    pub async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/quote", self.base_url);
        let amount = amount.to_string();
        let slippage = slippage_bps.to_string();
        tracing::debug!(
            "Requesting quote {} -> {} amount={} slippageBps={}",
            input_mint,
            output_mint,
            amount,
            slippage
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("inputMint", input_mint),
                ("outputMint", output_mint),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::QuoteService(format!("quote request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::QuoteService(format!(
                "quote request failed with status {}: {}",
                status, error_text
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| Error::QuoteService(format!("invalid quote response: {}", e)))?;
        let parsed: QuoteResponse = serde_json::from_value(raw.clone())
            .map_err(|e| Error::QuoteService(format!("unexpected quote shape: {}", e)))?;

        let in_amount: u64 = parsed
            .in_amount
            .parse()
            .map_err(|_| Error::QuoteService(format!("bad inAmount '{}'", parsed.in_amount)))?;
        let out_amount: u64 = parsed
            .out_amount
            .parse()
            .map_err(|_| Error::QuoteService(format!("bad outAmount '{}'", parsed.out_amount)))?;
        let price_impact_pct = parsed
            .price_impact_pct
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0.0);
        let route = parsed
            .route_plan
            .into_iter()
            .filter_map(|step| step.swap_info.label)
            .collect();

        Ok(Quote {
            in_amount,
            out_amount,
            price_impact_pct,
            route,
            raw,
        })
    }

    /// Build the unsigned swap transaction for a quote and signer
    pub async fn get_swap_transaction(
        &self,
        quote: &Quote,
        user_public_key: &str,
    ) -> Result<UnsignedSwap> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/swap", self.base_url);
        let body = json!({
            "quoteResponse": quote.raw(),
            "userPublicKey": user_public_key,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::QuoteService(format!("swap request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::QuoteService(format!(
                "swap request failed with status {}: {}",
                status, error_text
            )));
        }

        let swap: SwapResponse = response
            .json()
            .await
            .map_err(|e| Error::QuoteService(format!("invalid swap response: {}", e)))?;

        let transaction = swap
            .swap_transaction
            .filter(|tx| !tx.trim().is_empty())
            .ok_or_else(|| {
                Error::QuoteService("swap response has no transaction payload".into())
            })?;

        Ok(UnsignedSwap {
            transaction,
            last_valid_block_height: swap.last_valid_block_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const SOL: &str = "So11111111111111111111111111111111111111112";
    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn quote_body() -> String {
        json!({
            "inputMint": SOL,
            "inAmount": "1500000000",
            "outputMint": USDC,
            "outAmount": "231450000",
            "otherAmountThreshold": "230292750",
            "swapMode": "ExactIn",
            "slippageBps": 50,
            "priceImpactPct": "0.0012",
            "routePlan": [
                { "swapInfo": { "ammKey": "abc", "label": "Whirlpool" }, "percent": 100 }
            ],
            "contextSlot": 299_000_000u64
        })
        .to_string()
    }

    fn client(url: &str) -> JupiterClient {
        JupiterClient::new(url, Duration::from_secs(5), 600).unwrap()
    }

    #[tokio::test]
    async fn test_get_quote_sends_base_units_and_bps() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("inputMint".into(), SOL.into()),
                Matcher::UrlEncoded("outputMint".into(), USDC.into()),
                Matcher::UrlEncoded("amount".into(), "1500000000".into()),
                Matcher::UrlEncoded("slippageBps".into(), "50".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(quote_body())
            .create_async()
            .await;

        let quote = client(&server.url())
            .get_quote(SOL, USDC, 1_500_000_000, 50)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(quote.in_amount, 1_500_000_000);
        assert_eq!(quote.out_amount, 231_450_000);
        assert_eq!(quote.route, vec!["Whirlpool".to_string()]);
        assert_eq!(quote.raw()["swapMode"], "ExactIn");
    }

    #[tokio::test]
    async fn test_get_quote_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"Could not find any route"}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .get_quote(SOL, USDC, 1, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuoteService(ref msg) if msg.contains("400")));
    }

    #[tokio::test]
    async fn test_swap_posts_quote_and_user() {
        let mut server = mockito::Server::new_async().await;
        let _quote = server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(quote_body())
            .create_async()
            .await;
        let swap = server
            .mock("POST", "/swap")
            .match_body(Matcher::PartialJson(json!({
                "userPublicKey": "UserPubkey111",
                "quoteResponse": { "inAmount": "1500000000" }
            })))
            .with_status(200)
            .with_body(r#"{"swapTransaction":"AQID","lastValidBlockHeight":123}"#)
            .create_async()
            .await;

        let client = client(&server.url());
        let quote = client.get_quote(SOL, USDC, 1_500_000_000, 50).await.unwrap();
        let unsigned = client
            .get_swap_transaction(&quote, "UserPubkey111")
            .await
            .unwrap();

        swap.assert_async().await;
        assert_eq!(unsigned.transaction, "AQID");
        assert_eq!(unsigned.last_valid_block_height, Some(123));
    }

    #[tokio::test]
    async fn test_swap_without_transaction_payload() {
        let mut server = mockito::Server::new_async().await;
        let _quote = server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(quote_body())
            .create_async()
            .await;
        let _swap = server
            .mock("POST", "/swap")
            .with_status(200)
            .with_body(r#"{"lastValidBlockHeight":123}"#)
            .create_async()
            .await;

        let client = client(&server.url());
        let quote = client.get_quote(SOL, USDC, 1, 50).await.unwrap();
        let err = client
            .get_swap_transaction(&quote, "UserPubkey111")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuoteService(ref msg) if msg.contains("no transaction")));
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        assert!(JupiterClient::new(JUPITER_SWAP_API, Duration::from_secs(1), 0).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires live API
    async fn test_get_quote_live() {
        let quote = client(JUPITER_SWAP_API)
            .get_quote(SOL, USDC, 1_000_000_000, 50)
            .await
            .unwrap();
        assert!(quote.out_amount > 0);
    }
}
