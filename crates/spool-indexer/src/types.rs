//! Types for the chain store.

use bitcoin::Txid;
use serde::Serialize;

/// An unspent output controlled by the funding wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletUtxo {
    /// Transaction containing this output.
    pub txid: Txid,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
}
