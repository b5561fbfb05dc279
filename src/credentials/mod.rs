// Wallet credential resolution from an external secret store
use crate::settings::{SecretSource, SecretStoreConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Somewhere a JSON object of secrets can be fetched from
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self) -> Result<Map<String, Value>>;

    /// Where the secrets came from, for logs (never the secrets themselves)
    fn describe(&self) -> String;
}

/// Secrets in a JSON file on disk
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn fetch(&self) -> Result<Map<String, Value>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::SecretStore(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        parse_secret_object(&raw)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Secrets served over HTTP as a JSON object, optionally behind a bearer token
pub struct HttpSecretStore {
    client: Client,
    url: String,
    api_token: Option<String>,
}

impl HttpSecretStore {
    pub fn new(url: String, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::SecretStore(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            api_token,
        })
    }
}

#[async_trait]
impl SecretStore for HttpSecretStore {
    async fn fetch(&self) -> Result<Map<String, Value>> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::SecretStore(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SecretStore(format!(
                "{} responded with status {}",
                self.url, status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::SecretStore(format!("failed to read response: {}", e)))?;
        parse_secret_object(&body)
    }

    fn describe(&self) -> String {
        format!("http {}", self.url)
    }
}

fn parse_secret_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::SecretStore("payload is not a JSON object".into())),
        // Do not echo the payload, it holds private keys
        Err(e) => Err(Error::SecretStore(format!(
            "payload is not valid JSON (line {}, column {})",
            e.line(),
            e.column()
        ))),
    }
}

/// Build the configured secret store backend
pub fn secret_store_from_config(config: &SecretStoreConfig) -> Result<Box<dyn SecretStore>> {
    match config.source {
        SecretSource::File => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| Error::Config("secrets.path is not set".into()))?;
            Ok(Box::new(FileSecretStore::new(path)))
        }
        SecretSource::Http => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| Error::Config("secrets.url is not set".into()))?;
            Ok(Box::new(HttpSecretStore::new(
                url,
                config.api_token.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}

/// Decode a private key given as base58 (wallet export) or a JSON byte array (CLI keyfile)
pub fn parse_keypair(private_key: &str) -> Option<Keypair> {
    let private_key = private_key.trim();

    if let Ok(bytes) = bs58::decode(private_key).into_vec() {
        if bytes.len() == 64 {
            if let Ok(keypair) = Keypair::from_bytes(&bytes) {
                return Some(keypair);
            }
        }
    }

    if let Ok(bytes) = serde_json::from_str::<Vec<u8>>(private_key) {
        if bytes.len() == 64 {
            return Keypair::from_bytes(&bytes).ok();
        }
    }

    None
}

/// Wallet address -> signing keypair. Built once per run, read-only afterwards.
pub struct WalletKeyMap {
    keys: HashMap<String, Keypair>,
}

impl WalletKeyMap {
    /// Build the map from secret-store entries.
    ///
    /// Entries whose key starts with `key_prefix` must hold `"<publicKey>:<privateKey>"`.
    /// Any malformed entry, or none at all, is a misconfiguration.
    pub fn from_secrets(secrets: &Map<String, Value>, key_prefix: &str) -> Result<Self> {
        let mut keys = HashMap::new();

        for (name, value) in secrets.iter().filter(|(k, _)| k.starts_with(key_prefix)) {
            let entry = value
                .as_str()
                .ok_or_else(|| Error::SecretStore(format!("{} is not a string", name)))?;
            let (public_key, private_key) = entry.split_once(':').ok_or_else(|| {
                Error::SecretStore(format!("{} is not in publicKey:privateKey form", name))
            })?;
            let public_key = public_key.trim();

            let keypair = parse_keypair(private_key).ok_or_else(|| {
                Error::SecretStore(format!("{} holds an undecodable private key", name))
            })?;
            if keypair.pubkey().to_string() != public_key {
                return Err(Error::SecretStore(format!(
                    "{}: private key does not belong to {}",
                    name, public_key
                )));
            }

            if keys.insert(public_key.to_string(), keypair).is_some() {
                tracing::warn!("Wallet {} appears more than once in the secret store", public_key);
            }
        }

        if keys.is_empty() {
            return Err(Error::SecretStore(format!(
                "no entries with prefix '{}'",
                key_prefix
            )));
        }

        Ok(Self { keys })
    }

    pub fn get(&self, wallet_address: &str) -> Result<&Keypair> {
        self.keys
            .get(wallet_address)
            .ok_or_else(|| Error::MissingCredential(wallet_address.to_string()))
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}

impl FromIterator<Keypair> for WalletKeyMap {
    fn from_iter<I: IntoIterator<Item = Keypair>>(iter: I) -> Self {
        Self {
            keys: iter
                .into_iter()
                .map(|keypair| (keypair.pubkey().to_string(), keypair))
                .collect(),
        }
    }
}

// Addresses only
impl std::fmt::Debug for WalletKeyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut addresses: Vec<&String> = self.keys.keys().collect();
        addresses.sort();
        f.debug_struct("WalletKeyMap")
            .field("wallets", &addresses)
            .finish()
    }
}

/// Fetches wallet credentials once per run
pub struct CredentialResolver {
    store: Box<dyn SecretStore>,
    key_prefix: String,
}

impl CredentialResolver {
    pub fn new(store: Box<dyn SecretStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn from_config(config: &SecretStoreConfig) -> Result<Self> {
        Ok(Self::new(
            secret_store_from_config(config)?,
            config.key_prefix.clone(),
        ))
    }

    /// Reach the secret store and build the key map. Failure here must abort the run.
    pub async fn resolve(&self) -> Result<WalletKeyMap> {
        tracing::info!("🔐 Fetching wallet credentials from {}", self.store.describe());
        let secrets = self.store.fetch().await?;
        let map = WalletKeyMap::from_secrets(&secrets, &self.key_prefix)?;
        tracing::info!("✓ Resolved signing keys for {} wallets", map.len());
        Ok(map)
    }
}
