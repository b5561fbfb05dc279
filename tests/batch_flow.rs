// End-to-end batch runs against a mock quote service and a scripted relay
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use dextrader::api::JupiterClient;
use dextrader::credentials::{CredentialResolver, FileSecretStore, WalletKeyMap};
use dextrader::execution::{
    BatchOrchestrator, BlockhashLease, ConfirmedTransaction, RelayFailure, RetryController,
    RetryPolicy, SignedTransaction, TransactionRelay,
};
use dextrader::journal::ResultJournal;
use dextrader::loader::{load_trade_batch, select_latest_trade_file, TokenRegistry};
use dextrader::{TradeBatch, TradeStatus};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;
use solana_sdk::hash::Hash;
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const SOL: &str = "So11111111111111111111111111111111111111112";
const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

// ============================================================================
// Helpers
// ============================================================================

struct ScriptedRelay {
    script: Mutex<VecDeque<Result<(), RelayFailure>>>,
    next_height: AtomicU64,
}

impl ScriptedRelay {
    fn new(outcomes: Vec<Result<(), RelayFailure>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            next_height: AtomicU64::new(500),
        }
    }
}

#[async_trait]
impl TransactionRelay for ScriptedRelay {
    async fn fresh_lease(&self) -> Result<BlockhashLease, RelayFailure> {
        Ok(BlockhashLease {
            blockhash: Hash::new_unique(),
            last_valid_block_height: self.next_height.fetch_add(150, Ordering::SeqCst),
        })
    }

    async fn send(
        &self,
        tx: &SignedTransaction,
        _lease: BlockhashLease,
    ) -> Result<ConfirmedTransaction, RelayFailure> {
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        next.map(|_| ConfirmedTransaction {
            signature: *tx.signature(),
            slot: 7,
        })
    }
}

/// Unsigned transaction paying from `payer`, base64 like the swap endpoint returns
fn unsigned_swap(payer: &Keypair) -> String {
    let instruction =
        system_instruction::transfer(&payer.pubkey(), &Keypair::new().pubkey(), 10_000);
    let message =
        Message::new_with_blockhash(&[instruction], Some(&payer.pubkey()), &Hash::new_unique());
    let tx = VersionedTransaction {
        signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
        message: VersionedMessage::Legacy(message),
    };
    BASE64.encode(bincode::serialize(&tx).unwrap())
}

fn quote_body(in_amount: &str) -> String {
    json!({
        "inputMint": SOL,
        "inAmount": in_amount,
        "outputMint": USDC,
        "outAmount": "150000000",
        "priceImpactPct": "0.0004",
        "routePlan": [{ "swapInfo": { "label": "Whirlpool" }, "percent": 100 }]
    })
    .to_string()
}

async fn mock_quote(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/quote")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(quote_body("1000000000"))
        .create_async()
        .await
}

async fn mock_swap_for(server: &mut ServerGuard, wallet: &Keypair, body: String) -> Mock {
    server
        .mock("POST", "/swap")
        .match_body(Matcher::PartialJson(
            json!({ "userPublicKey": wallet.pubkey().to_string() }),
        ))
        .with_status(200)
        .with_body(body)
        .create_async()
        .await
}

fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn write_sheet(dir: &Path, rows: &[String]) -> TradeBatch {
    let mut contents = String::from(
        "wallet_address,wallet_alias,coin_amount,slippage_in_pct,from_token_address,to_token_address\n",
    );
    for row in rows {
        contents.push_str(row);
        contents.push('\n');
    }
    let path = write_file(dir, "trade_confirmation_sheet_20240601.csv", &contents);
    load_trade_batch(&path).unwrap()
}

fn token_registry(dir: &Path) -> TokenRegistry {
    let path = write_file(
        dir,
        "token_metadata.csv",
        &format!("token_address,decimals,symbol\n{SOL},9,SOL\n{USDC},6,USDC\n"),
    );
    TokenRegistry::load(&path).unwrap()
}

async fn wallet_map(dir: &Path, wallets: &[&Keypair]) -> WalletKeyMap {
    let mut secrets = serde_json::Map::new();
    for (i, wallet) in wallets.iter().enumerate() {
        secrets.insert(
            format!("WALLET_{}", i + 1),
            json!(format!("{}:{}", wallet.pubkey(), wallet.to_base58_string())),
        );
    }
    secrets.insert("RPC_TOKEN".to_string(), json!("unrelated"));
    let path = write_file(
        dir,
        "secrets.json",
        &serde_json::Value::Object(secrets).to_string(),
    );

    CredentialResolver::new(Box::new(FileSecretStore::new(path)), "WALLET_")
        .resolve()
        .await
        .unwrap()
}

fn fast_retries() -> RetryController {
    RetryController::new(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(30),
    })
}

fn orchestrator(
    server: &ServerGuard,
    relay: ScriptedRelay,
    wallets: WalletKeyMap,
    tokens: TokenRegistry,
    results_dir: &Path,
) -> BatchOrchestrator<ScriptedRelay> {
    BatchOrchestrator::new(
        JupiterClient::new(server.url(), Duration::from_secs(5), 6000).unwrap(),
        relay,
        wallets,
        tokens,
        fast_retries(),
        ResultJournal::create(results_dir, Local::now()).unwrap(),
    )
    .with_default_delay(Duration::ZERO)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_missing_swap_payload_fails_only_that_trade() {
    let dir = tempfile::tempdir().unwrap();
    let alpha = Keypair::new();
    let beta = Keypair::new();

    let mut server = mockito::Server::new_async().await;
    let _quote = mock_quote(&mut server).await;
    let _alpha_swap = mock_swap_for(
        &mut server,
        &alpha,
        json!({ "swapTransaction": unsigned_swap(&alpha), "lastValidBlockHeight": 900 })
            .to_string(),
    )
    .await;
    let _beta_swap =
        mock_swap_for(&mut server, &beta, json!({ "lastValidBlockHeight": 900 }).to_string())
            .await;

    let mut batch = write_sheet(
        dir.path(),
        &[
            format!("{},alpha,1,0.5,{SOL},{USDC}", alpha.pubkey()),
            format!("{},beta,1,0.5,{SOL},{USDC}", beta.pubkey()),
            format!("{},alpha,1,0.5,{SOL},{USDC}", alpha.pubkey()),
        ],
    );
    let wallets = wallet_map(dir.path(), &[&alpha, &beta]).await;
    let orchestrator = orchestrator(
        &server,
        ScriptedRelay::new(vec![]),
        wallets,
        token_registry(dir.path()),
        &dir.path().join("trade_results"),
    );

    let summary = orchestrator.run(&mut batch).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);

    let results = load_trade_batch(orchestrator.journal().results_path()).unwrap();
    assert_eq!(results.len(), 3);
    let statuses: Vec<TradeStatus> = results.records.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![TradeStatus::Success, TradeStatus::Failed, TradeStatus::Success]
    );
    assert!(results.records[1].transaction_id.is_empty());
    assert!(!results.records[2].transaction_id.is_empty());
    assert_eq!(results.records[1].field("wallet_alias"), Some("beta"));

    let audit = std::fs::read_to_string(orchestrator.journal().log().path()).unwrap();
    assert!(audit.contains("Trade 2/3 for beta failed"));
    assert!(audit.contains("no transaction payload"));
    assert!(audit.contains("Trade 3/3 for alpha completed: status=success"));
}

#[tokio::test]
async fn test_quote_uses_token_decimals_and_bps() {
    let dir = tempfile::tempdir().unwrap();
    let alpha = Keypair::new();

    let mut server = mockito::Server::new_async().await;
    let quote = server
        .mock("GET", "/quote")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("inputMint".into(), SOL.into()),
            Matcher::UrlEncoded("outputMint".into(), USDC.into()),
            Matcher::UrlEncoded("amount".into(), "1500000000".into()),
            Matcher::UrlEncoded("slippageBps".into(), "50".into()),
        ]))
        .with_status(200)
        .with_body(quote_body("1500000000"))
        .expect(1)
        .create_async()
        .await;
    let _swap = mock_swap_for(
        &mut server,
        &alpha,
        json!({ "swapTransaction": unsigned_swap(&alpha) }).to_string(),
    )
    .await;

    let mut batch = write_sheet(
        dir.path(),
        &[format!("{},alpha,1.5,0.5,{SOL},{USDC}", alpha.pubkey())],
    );
    let wallets = wallet_map(dir.path(), &[&alpha]).await;
    let relay = ScriptedRelay::new(vec![]);
    let orchestrator = orchestrator(
        &server,
        relay,
        wallets,
        token_registry(dir.path()),
        dir.path(),
    );

    let summary = orchestrator.run(&mut batch).await.unwrap();

    quote.assert_async().await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(batch.records[0].status, TradeStatus::Success);
}

#[tokio::test]
async fn test_relay_timeouts_are_retried_with_growing_waits() {
    let dir = tempfile::tempdir().unwrap();
    let alpha = Keypair::new();

    let mut server = mockito::Server::new_async().await;
    let _quote = mock_quote(&mut server).await;
    let _swap = mock_swap_for(
        &mut server,
        &alpha,
        json!({ "swapTransaction": unsigned_swap(&alpha) }).to_string(),
    )
    .await;

    let mut batch = write_sheet(
        dir.path(),
        &[format!("{},alpha,1,1,{SOL},{USDC}", alpha.pubkey())],
    );
    let wallets = wallet_map(dir.path(), &[&alpha]).await;
    let timeout = || Err(RelayFailure::Timeout("blockhash expired".into()));
    let orchestrator = orchestrator(
        &server,
        ScriptedRelay::new(vec![timeout(), timeout(), Ok(())]),
        wallets,
        token_registry(dir.path()),
        dir.path(),
    );

    orchestrator.run(&mut batch).await.unwrap();

    assert_eq!(batch.records[0].status, TradeStatus::Success);
    let audit = std::fs::read_to_string(orchestrator.journal().log().path()).unwrap();
    assert!(audit.contains("Waiting 2ms before attempt 2 for alpha"));
    assert!(audit.contains("Waiting 4ms before attempt 3 for alpha"));
    assert!(audit.contains("Attempt 3/3 for alpha confirmed"));
}

#[tokio::test]
async fn test_rerun_of_results_skips_settled_trades() {
    let dir = tempfile::tempdir().unwrap();
    let alpha = Keypair::new();

    let mut server = mockito::Server::new_async().await;
    let quote = server
        .mock("GET", "/quote")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(quote_body("1000000000"))
        .expect(1)
        .create_async()
        .await;
    let _swap = mock_swap_for(
        &mut server,
        &alpha,
        json!({ "swapTransaction": unsigned_swap(&alpha) }).to_string(),
    )
    .await;

    let results_file = write_file(
        dir.path(),
        "trade_results_20240601_120000.csv",
        &format!(
            "wallet_address,coin_amount,slippage_in_pct,from_token_address,to_token_address,transaction_id,status\n\
             {alpha_key},1,0.5,{SOL},{USDC},5kSettledSig,success\n\
             {alpha_key},1,0.5,{SOL},{USDC},,failed\n",
            alpha_key = alpha.pubkey()
        ),
    );
    let mut batch = load_trade_batch(&results_file).unwrap();
    let wallets = wallet_map(dir.path(), &[&alpha]).await;
    let relay = ScriptedRelay::new(vec![]);
    let orchestrator = orchestrator(
        &server,
        relay,
        wallets,
        token_registry(dir.path()),
        &dir.path().join("rerun"),
    );

    let summary = orchestrator.run(&mut batch).await.unwrap();

    quote.assert_async().await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(batch.records[0].transaction_id, "5kSettledSig");
    assert_eq!(batch.records[1].status, TradeStatus::Success);
    assert_ne!(batch.records[1].transaction_id, "5kSettledSig");
}

#[tokio::test]
async fn test_unknown_token_is_per_trade() {
    let dir = tempfile::tempdir().unwrap();
    let alpha = Keypair::new();

    let mut server = mockito::Server::new_async().await;
    let _quote = mock_quote(&mut server).await;
    let _swap = mock_swap_for(
        &mut server,
        &alpha,
        json!({ "swapTransaction": unsigned_swap(&alpha) }).to_string(),
    )
    .await;

    let mut batch = write_sheet(
        dir.path(),
        &[
            format!("{},alpha,1,0.5,UnlistedMint111,{USDC}", alpha.pubkey()),
            format!("{},alpha,1,0.5,{SOL},{USDC}", alpha.pubkey()),
        ],
    );
    let wallets = wallet_map(dir.path(), &[&alpha]).await;
    let orchestrator = orchestrator(
        &server,
        ScriptedRelay::new(vec![]),
        wallets,
        token_registry(dir.path()),
        dir.path(),
    );

    orchestrator.run(&mut batch).await.unwrap();

    assert_eq!(batch.records[0].status, TradeStatus::Failed);
    assert_eq!(batch.records[1].status, TradeStatus::Success);
}

#[test]
fn test_latest_sheet_is_selected() {
    let dir = tempfile::tempdir().unwrap();
    let header = "wallet_address,coin_amount,slippage_in_pct,from_token_address,to_token_address\n";
    write_file(dir.path(), "trade_confirmation_sheet_20240101.csv", header);
    write_file(dir.path(), "trade_confirmation_sheet_20240315.csv", header);
    write_file(dir.path(), "notes.csv", header);

    let selected = select_latest_trade_file(dir.path(), "trade_confirmation_sheet_").unwrap();
    assert!(selected.ends_with("trade_confirmation_sheet_20240315.csv"));
}
