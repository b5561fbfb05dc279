// Signing, submission, confirmation and the batch loop
pub mod confirmation;
pub mod orchestrator;
pub mod retry;
pub mod signer;

pub use confirmation::{
    BlockhashLease, ConfirmedTransaction, RelayFailure, RpcRelay, TransactionRelay,
};
pub use orchestrator::{prepare, BatchOrchestrator, BatchSummary, PreparedTrade};
pub use retry::{RetryController, RetryPolicy};
pub use signer::{sign_transaction, SignedTransaction};
