//! Bitcoind-backed [`BlockSource`].
//!
//! A minimal JSON-RPC client for the handful of calls the spool services
//! need: `getblockcount`, `getblockhash`, `getblock` (verbosity 0) and
//! `getrawtransaction` (verbosity 0).

use bitcoin::{BlockHash, Network, Txid};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use spool_primitives::{BlockSource, SourceError};

/// bitcoind's RPC_INVALID_PARAMETER, returned by `getblockhash` when the
/// requested height is beyond the current tip.
const RPC_BLOCK_HEIGHT_OUT_OF_RANGE: i64 = -8;

/// Bitcoind client error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bitcoind rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected bitcoind response: {0}")]
    BadResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for SourceError {
    fn from(err: Error) -> Self {
        match err {
            Error::Http(e) => SourceError::Transport(e.to_string()),
            Error::Rpc { code, message } => SourceError::Rpc { code, message },
            Error::BadResponse(msg) => SourceError::BadResponse(msg),
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Client for the bitcoind JSON-RPC interface.
pub struct BitcoindClient {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl BitcoindClient {
    /// Creates a new instance of [`BitcoindClient`].
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("http://{host}:{port}"),
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "spool",
            "method": method,
            "params": params,
        });

        // bitcoind reports rpc errors with a non-2xx status and a JSON body,
        // so the body is parsed before the status is considered.
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let envelope: RpcResponse<T> = serde_json::from_slice(&bytes)
            .map_err(|_| Error::BadResponse(format!("{method} returned non-json body ({status})")))?;

        if let Some(RpcError { code, message }) = envelope.error {
            return Err(Error::Rpc { code, message });
        }

        envelope
            .result
            .ok_or_else(|| Error::BadResponse(format!("{method} returned neither result nor error")))
    }

    /// `getblockcount`
    pub async fn get_block_count(&self) -> Result<u64> {
        self.call("getblockcount", serde_json::json!([])).await
    }

    /// `getblockhash`
    pub async fn get_block_hash(&self, height: u64) -> Result<BlockHash> {
        let hash: String = self.call("getblockhash", serde_json::json!([height])).await?;
        hash.parse()
            .map_err(|_| Error::BadResponse(format!("getblockhash returned bad hash: {hash}")))
    }

    /// `getblock` at verbosity 0, returning the raw serialized block.
    pub async fn get_raw_block(&self, hash: BlockHash) -> Result<Vec<u8>> {
        let block_hex: String = self
            .call("getblock", serde_json::json!([hash.to_string(), 0]))
            .await?;
        hex::decode(&block_hex).map_err(|_| Error::BadResponse("getblock returned bad hex".into()))
    }

    /// `getrawtransaction` at verbosity 0, returning the raw serialized tx.
    pub async fn get_raw_transaction(&self, txid: Txid) -> Result<Vec<u8>> {
        let tx_hex: String = self
            .call("getrawtransaction", serde_json::json!([txid.to_string(), 0]))
            .await?;
        hex::decode(&tx_hex)
            .map_err(|_| Error::BadResponse("getrawtransaction returned bad hex".into()))
    }
}

#[async_trait::async_trait]
impl BlockSource for BitcoindClient {
    async fn block_count(&self) -> std::result::Result<u64, SourceError> {
        Ok(self.get_block_count().await?)
    }

    async fn block_hash_at(&self, height: u64) -> std::result::Result<Option<BlockHash>, SourceError> {
        match self.get_block_hash(height).await {
            Ok(hash) => Ok(Some(hash)),
            Err(Error::Rpc { code, .. }) if code == RPC_BLOCK_HEIGHT_OUT_OF_RANGE => {
                tracing::trace!(height, "block not mined yet");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn raw_block(&self, hash: BlockHash) -> std::result::Result<Vec<u8>, SourceError> {
        Ok(self.get_raw_block(hash).await?)
    }

    async fn raw_transaction(&self, txid: Txid) -> std::result::Result<Vec<u8>, SourceError> {
        Ok(self.get_raw_transaction(txid).await?)
    }
}

/// The default bitcoind RPC port for each network.
pub fn default_rpc_port(network: Network) -> u16 {
    match network {
        Network::Bitcoin => 8332,
        Network::Testnet => 18332,
        Network::Signet => 38332,
        Network::Regtest => 18443,
        _ => 8332,
    }
}
