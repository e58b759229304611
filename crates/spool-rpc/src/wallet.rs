use crate::error::Error;
use jsonrpsee::proc_macros::rpc;
use spool_indexer::{ChainQuery, WalletUtxo};

/// Funding wallet API, served in the funded role only.
#[rpc(server)]
pub trait WalletApi {
    /// List the wallet's unspent outputs.
    #[method(name = "wallet_utxos")]
    async fn wallet_utxos(&self) -> Result<Vec<WalletUtxo>, Error>;
}

/// This struct provides the funding wallet API.
pub struct Wallet {
    query: ChainQuery,
}

impl Wallet {
    /// Constructs a new instance of [`Wallet`].
    pub fn new(query: ChainQuery) -> Self {
        Self { query }
    }
}

#[async_trait::async_trait]
impl WalletApiServer for Wallet {
    async fn wallet_utxos(&self) -> Result<Vec<WalletUtxo>, Error> {
        Ok(self.query.wallet_utxos().await?)
    }
}
