use crate::error::Error;
use bitcoin::Txid;
use jsonrpsee::proc_macros::rpc;
use serde::{Deserialize, Serialize};
use spool_indexer::ChainQuery;
use spool_presigner::Presigner;
use spool_primitives::ChainParams;

/// Current chain state plus the next presigned handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Txid of the genesis transaction.
    pub genesis: Txid,
    /// The accepted tip.
    pub current: CurrentTip,
    /// The presigned next spend of the tip.
    pub next: NextHandoff,
}

/// The most recently accepted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTip {
    /// Highest sequence index.
    pub tx_count: u64,
    /// Txid of the tip transaction.
    pub tip_tx: Txid,
}

/// Both representations of the next handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextHandoff {
    /// Hex-encoded finalized transaction, broadcastable standalone.
    pub raw: String,
    /// Base64-encoded BIP-174 container for third-party composition.
    pub psbt: String,
}

/// Chain state API.
#[rpc(server)]
pub trait ChainApi {
    /// Get the current chain state and the next presigned handoff.
    ///
    /// Fails with bootstrap instructions while the chain has not started.
    #[method(name = "chain_info")]
    async fn chain_info(&self) -> Result<ChainInfo, Error>;
}

/// This struct provides the chain state API.
pub struct Chain {
    query: ChainQuery,
    presigner: Presigner,
    params: ChainParams,
}

impl Chain {
    /// Constructs a new instance of [`Chain`].
    pub fn new(query: ChainQuery, presigner: Presigner, params: ChainParams) -> Self {
        Self {
            query,
            presigner,
            params,
        }
    }
}

#[async_trait::async_trait]
impl ChainApiServer for Chain {
    async fn chain_info(&self) -> Result<ChainInfo, Error> {
        let (Some(genesis), Some(tip)) =
            (self.query.genesis().await?, self.query.tip().await?)
        else {
            return Err(Error::ChainNotStarted {
                amount: self.params.canonical_amount.to_sat(),
                address: self.params.chain_address.to_string(),
            });
        };

        let handoff = self.presigner.presign(&tip).await?;

        Ok(ChainInfo {
            genesis: genesis.txid,
            current: CurrentTip {
                tx_count: tip.index,
                tip_tx: tip.txid,
            },
            next: NextHandoff {
                raw: handoff.raw_hex(),
                psbt: handoff.psbt_base64(),
            },
        })
    }
}
