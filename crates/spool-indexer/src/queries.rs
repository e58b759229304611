//! Read-only queries for the RPC layer.

use crate::db::{ChainStore, Result};
use crate::types::WalletUtxo;
use spool_primitives::ChainRecord;

/// Query interface over the chain store.
///
/// Read-only by construction; may be cloned into concurrent request handlers
/// while the scanner keeps writing. SQLite's transaction isolation guarantees
/// every query observes a block boundary.
#[derive(Clone)]
pub struct ChainQuery {
    store: ChainStore,
}

impl ChainQuery {
    /// Creates a new query interface.
    pub fn new(store: ChainStore) -> Self {
        Self { store }
    }

    /// The genesis record, if the chain has started.
    pub async fn genesis(&self) -> Result<Option<ChainRecord>> {
        self.store.genesis().await
    }

    /// The current chain tip.
    pub async fn tip(&self) -> Result<Option<ChainRecord>> {
        self.store.tip().await
    }

    /// Unspent wallet outputs (funded role).
    pub async fn wallet_utxos(&self) -> Result<Vec<WalletUtxo>> {
        self.store.unspent_wallet_outputs().await
    }
}
