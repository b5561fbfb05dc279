use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration, layered: defaults < TOML file < `DEXTRADER__*` env vars
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub paths: PathsConfig,
    pub quote: QuoteConfig,
    pub rpc: RpcConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub secrets: SecretStoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `trade_confirmation_sheet_*.csv` files
    pub trades_dir: PathBuf,
    pub trade_file_prefix: String,
    /// CSV of `token_address,decimals[,symbol]`
    pub token_metadata: PathBuf,
    /// Where results CSVs and audit logs are written
    pub results_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    /// processed | confirmed | finalized
    pub commitment: String,
    pub confirm_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub default_delay_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    File,
    Http,
}

#[derive(Clone, Deserialize)]
pub struct SecretStoreConfig {
    pub source: SecretSource,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub api_token: Option<String>,
    /// Only keys starting with this marker are wallet entries
    pub key_prefix: String,
    pub timeout_secs: u64,
}

// api_token must never reach the logs
impl std::fmt::Debug for SecretStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStoreConfig")
            .field("source", &self.source)
            .field("path", &self.path)
            .field("url", &self.url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("key_prefix", &self.key_prefix)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and the environment.
    ///
    /// A missing file is fine when `required` is false (the default config path).
    pub fn load(config_path: &Path, required: bool) -> Result<Self> {
        let builder = ::config::Config::builder()
            .set_default("paths.trades_dir", "database/trade_confirmation")?
            .set_default("paths.trade_file_prefix", "trade_confirmation_sheet_")?
            .set_default("paths.token_metadata", "database/token_metadata.csv")?
            .set_default("paths.results_dir", "database/trade_results")?
            .set_default("quote.base_url", "https://lite-api.jup.ag/swap/v1")?
            .set_default("quote.timeout_secs", 30)?
            .set_default("quote.requests_per_minute", 60)?
            .set_default("rpc.url", "https://api.mainnet-beta.solana.com")?
            .set_default("rpc.commitment", "finalized")?
            .set_default("rpc.confirm_timeout_secs", 90)?
            .set_default("rpc.poll_interval_ms", 2000)?
            .set_default("retry.max_retries", 3)?
            .set_default("retry.base_delay_ms", 2000)?
            .set_default("retry.max_delay_ms", 30000)?
            .set_default("batch.default_delay_seconds", 5)?
            .set_default("secrets.source", "file")?
            .set_default("secrets.key_prefix", "WALLET_")?
            .set_default("secrets.timeout_secs", 15)?
            .add_source(::config::File::from(config_path).required(required))
            .add_source(
                ::config::Environment::with_prefix("DEXTRADER")
                    .prefix_separator("__")
                    .separator("__"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 {
            return Err(Error::Config("retry.max_retries must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.rpc.poll_interval_ms == 0 {
            return Err(Error::Config("rpc.poll_interval_ms must be positive".into()));
        }
        if self.quote.requests_per_minute == 0 {
            return Err(Error::Config(
                "quote.requests_per_minute must be positive".into(),
            ));
        }
        if self.secrets.key_prefix.trim().is_empty() {
            return Err(Error::Config("secrets.key_prefix must not be empty".into()));
        }
        match self.secrets.source {
            SecretSource::File if self.secrets.path.is_none() => Err(Error::Config(
                "secrets.path is required when secrets.source = \"file\"".into(),
            )),
            SecretSource::Http if self.secrets.url.is_none() => Err(Error::Config(
                "secrets.url is required when secrets.source = \"http\"".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_secs(self.batch.default_delay_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_with_file_secrets() {
        let file = write_config(
            r#"
            [secrets]
            source = "file"
            path = "secrets.json"
            "#,
        );

        let settings = Settings::load(file.path(), true).unwrap();

        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.retry.base_delay_ms, 2000);
        assert_eq!(settings.retry.max_delay_ms, 30000);
        assert_eq!(settings.batch.default_delay_seconds, 5);
        assert_eq!(settings.paths.trade_file_prefix, "trade_confirmation_sheet_");
        assert_eq!(settings.secrets.key_prefix, "WALLET_");
        assert_eq!(settings.default_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_secret_path_is_rejected() {
        let file = write_config("[rpc]\nurl = \"http://localhost:8899\"\n");

        let result = Settings::load(file.path(), true);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_http_source_requires_url() {
        let file = write_config("[secrets]\nsource = \"http\"\n");

        let result = Settings::load(file.path(), true);
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("secrets.url")));
    }

    #[test]
    fn test_inverted_backoff_bounds_rejected() {
        let file = write_config(
            r#"
            [retry]
            base_delay_ms = 60000
            max_delay_ms = 30000

            [secrets]
            path = "secrets.json"
            "#,
        );

        assert!(Settings::load(file.path(), true).is_err());
    }

    #[test]
    fn test_api_token_redacted_in_debug() {
        let file = write_config(
            r#"
            [secrets]
            source = "http"
            url = "https://vault.example/secrets"
            api_token = "super-secret-token"
            "#,
        );

        let settings = Settings::load(file.path(), true).unwrap();
        let rendered = format!("{:?}", settings.secrets);
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
