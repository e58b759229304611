//! Spool Primitives.
//!
//! Shared vocabulary for the spool services: the chain record type, the
//! per-chain parameters derived from the chain key, and the [`BlockSource`]
//! collaborator contract giving read-only access to the base chain.

use bitcoin::key::CompressedPublicKey;
use bitcoin::{Address, Amount, BlockHash, Network, ScriptBuf, Txid};

/// The fixed value every chain-extending output must carry, in satoshis.
///
/// Overridable per deployment, but all participants of one chain must agree
/// on it: the genesis transaction is recognized by this exact amount and
/// every presigned handoff recreates it.
pub const DEFAULT_CANONICAL_AMOUNT: Amount = Amount::from_sat(738);

/// One accepted link of the chain.
///
/// `index` values are contiguous from 0 with no gaps; `txid` is unique.
/// Records are created by the tip tracker, never mutated or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainRecord {
    /// Position of this record in the chain, starting at 0 for genesis.
    pub index: u64,
    /// Id of the base-chain transaction carrying this record.
    pub txid: Txid,
}

/// Which flavor of service is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Track the chain and serve presigned handoffs only.
    Anchor,
    /// Additionally track a funding wallet's UTXO set.
    Funded,
}

impl Role {
    /// Whether this role carries a funding wallet key.
    pub fn is_funded(&self) -> bool {
        matches!(self, Role::Funded)
    }
}

/// Parameters identifying one chain, derived from the chain public key.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// The base-chain network the chain lives on.
    pub network: Network,
    /// The fixed chain-output value.
    pub canonical_amount: Amount,
    /// The 22-byte P2WPKH locking script every chain output pays to.
    pub chain_script: ScriptBuf,
    /// The bech32 form of [`Self::chain_script`].
    pub chain_address: Address,
}

impl ChainParams {
    /// Derives the chain parameters for the given key and network.
    pub fn new(network: Network, canonical_amount: Amount, chain_pubkey: &CompressedPublicKey) -> Self {
        let chain_script = ScriptBuf::new_p2wpkh(&chain_pubkey.wpubkey_hash());
        let chain_address = Address::p2wpkh(chain_pubkey, network);
        Self {
            network,
            canonical_amount,
            chain_script,
            chain_address,
        }
    }
}

/// The directory name used to keep per-network state apart on disk.
pub fn network_directory(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "mainnet",
        Network::Testnet => "testnet",
        Network::Signet => "signet",
        Network::Regtest => "regtest",
        _ => "unknown",
    }
}

/// Errors reported by a [`BlockSource`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("source rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("bad response from source: {0}")]
    BadResponse(String),
}

/// Read-only access to the base chain.
///
/// Everything the scanner and the presigner need from the outside world.
/// `block_hash_at` returns `Ok(None)` when the requested height has not been
/// mined yet; this is the only condition the caller retries. Any other error
/// is treated as fatal by the scanner, since skipping a height would break
/// the contiguous-index invariant.
#[async_trait::async_trait]
pub trait BlockSource: Send + Sync {
    /// Number of blocks in the longest chain.
    async fn block_count(&self) -> Result<u64, SourceError>;

    /// Hash of the block at the given height, or `None` if not mined yet.
    async fn block_hash_at(&self, height: u64) -> Result<Option<BlockHash>, SourceError>;

    /// Raw serialized block bytes.
    async fn raw_block(&self, hash: BlockHash) -> Result<Vec<u8>, SourceError>;

    /// Raw serialized transaction bytes.
    ///
    /// Only consulted for the genesis tip, whose chain output may sit at any
    /// output index.
    async fn raw_transaction(&self, txid: Txid) -> Result<Vec<u8>, SourceError>;
}
