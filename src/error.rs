use thiserror::Error;

/// How far an error reaches: the whole run, one trade, or one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Aborts the run before (or instead of) processing trades
    FatalPrecondition,
    /// Aborts only the current trade; the batch continues
    PerTradeFatal,
    /// Network trouble owned by the retry controller
    Transient,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no trade data: {0}")]
    NoTradeData(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("secret store unavailable or misconfigured: {0}")]
    SecretStore(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown token {0} (not in token metadata)")]
    UnknownToken(String),

    #[error("no signing key for wallet {0}")]
    MissingCredential(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("quote service error: {0}")]
    QuoteService(String),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("transaction reverted on-chain: {0}")]
    Reverted(String),

    #[error("confirmation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("shutdown requested after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NoTradeData(_)
            | Error::InvalidSchema(_)
            | Error::SecretStore(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Csv(_) => ErrorClass::FatalPrecondition,
            Error::UnknownToken(_)
            | Error::MissingCredential(_)
            | Error::InvalidAmount(_)
            | Error::QuoteService(_)
            | Error::MalformedTransaction(_)
            | Error::Reverted(_) => ErrorClass::PerTradeFatal,
            Error::RetriesExhausted { .. } | Error::Cancelled { .. } => ErrorClass::Transient,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            Error::NoTradeData("empty".into()).class(),
            ErrorClass::FatalPrecondition
        );
        assert_eq!(
            Error::UnknownToken("X".into()).class(),
            ErrorClass::PerTradeFatal
        );
        assert_eq!(
            Error::RetriesExhausted {
                attempts: 3,
                last_error: "timeout".into()
            }
            .class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = Error::MissingCredential("W1".into());
        assert!(err.to_string().contains("W1"));
    }
}
