use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::types::error::ErrorObject;
use serde::Serialize;

/// Spool RPC Result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Spool RPC errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No genesis transaction has been observed yet.
    #[error("genesis transaction not found")]
    ChainNotStarted {
        /// The canonical amount a genesis output must carry, in satoshis.
        amount: u64,
        /// The chain address to fund.
        address: String,
    },
    #[error(transparent)]
    Store(#[from] spool_indexer::Error),
    #[error(transparent)]
    Presign(#[from] spool_presigner::Error),
}

/// Base error code for RPC modules.
pub mod base {
    pub const CHAIN: i32 = 10000;
}

/// Base error code for all spool errors.
const BASE_ERROR: i32 = base::CHAIN;

/// Error code telling a caller the chain awaits its genesis transaction.
pub const CHAIN_NOT_STARTED_CODE: i32 = BASE_ERROR + 404;

/// Bootstrap instructions attached to the chain-not-started error.
#[derive(Debug, Serialize)]
struct BootstrapInstructions {
    message: &'static str,
    amount: u64,
    address: String,
}

impl From<Error> for ErrorObjectOwned {
    fn from(e: Error) -> ErrorObjectOwned {
        match e {
            Error::ChainNotStarted { amount, address } => ErrorObject::owned(
                CHAIN_NOT_STARTED_CODE,
                e.to_string(),
                Some(BootstrapInstructions {
                    message: "Genesis transaction not found. To bootstrap this chain \
                              send the canonical amount of satoshis to the canonical address.",
                    amount,
                    address,
                }),
            ),
            e => ErrorObject::owned(BASE_ERROR + 1, e.to_string(), None::<()>),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_not_started_carries_bootstrap_instructions() {
        let error_object: ErrorObjectOwned = Error::ChainNotStarted {
            amount: 738,
            address: "bcrt1qexample".to_string(),
        }
        .into();

        assert_eq!(error_object.code(), CHAIN_NOT_STARTED_CODE);

        let data: serde_json::Value =
            serde_json::from_str(error_object.data().unwrap().get()).unwrap();
        assert_eq!(data["amount"], 738);
        assert_eq!(data["address"], "bcrt1qexample");
        assert!(data["message"].as_str().unwrap().contains("canonical amount"));
    }
}
