//! Spool RPC.
//!
//! The read-only query surface: `chain_info` returns the accepted tip and the
//! next presigned handoff (or bootstrap instructions while the chain has not
//! started), and `wallet_utxos` lists the funding wallet's spendable outputs
//! in the funded role.

mod chain;
mod error;
mod wallet;

pub use chain::{Chain, ChainApiServer, ChainInfo, CurrentTip, NextHandoff};
pub use error::{CHAIN_NOT_STARTED_CODE, Error};
pub use wallet::{Wallet, WalletApiServer};

use spool_indexer::ChainQuery;
use spool_presigner::Presigner;
use spool_primitives::{ChainParams, Role};

/// Spool RPC.
pub struct SpoolRpc {
    /// Chain state RPC.
    pub chain: Chain,
    /// Funding wallet RPC, present in the funded role.
    pub wallet: Option<Wallet>,
}

impl SpoolRpc {
    /// Creates a new instance of [`SpoolRpc`].
    pub fn new(query: ChainQuery, presigner: Presigner, params: ChainParams, role: Role) -> Self {
        Self {
            chain: Chain::new(query.clone(), presigner, params),
            wallet: role.is_funded().then(|| Wallet::new(query)),
        }
    }

    /// Merges the spool RPC components into a given RPC method registry.
    pub fn merge_into(
        self,
        module: &mut jsonrpsee::RpcModule<()>,
    ) -> Result<(), jsonrpsee::server::RegisterMethodError> {
        let Self { chain, wallet } = self;

        module.merge(chain.into_rpc())?;
        if let Some(wallet) = wallet {
            module.merge(wallet.into_rpc())?;
        }

        Ok(())
    }
}
