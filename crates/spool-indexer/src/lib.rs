//! SQLite-backed chain state and block scanning for spool.
//!
//! This crate carries the heart of the system:
//! - [`ChainStore`]: the persistent, atomically updated chain state
//!   (accepted records, scan cursor, funded-role wallet outputs),
//! - [`TipTracker`]: the acceptance state machine deciding whether a scanned
//!   transaction extends the chain, starts it, or is noise,
//! - [`BlockScanner`]: the sequential cursor loop feeding base-chain blocks
//!   through the tracker, one atomic commit per block,
//! - [`ChainQuery`]: the read-only view consumed by the RPC layer.

mod db;
mod queries;
mod scanner;
mod tip;
mod types;
mod wallet;

pub use db::{ChainStore, Error, Result};
pub use queries::ChainQuery;
pub use scanner::{BlockScanner, ScanOutcome, ScannerConfig};
pub use tip::{Acceptance, TipTracker};
pub use types::WalletUtxo;
pub use wallet::WalletTracker;
