//! Funded-role wallet output tracking.

use crate::db::{ChainStore, Result};
use bitcoin::{ScriptBuf, Transaction};
use sqlx::SqliteConnection;

/// Tracks the funding wallet's UTXO set while blocks are scanned.
///
/// Outputs paying the wallet script are recorded when first seen and marked
/// spent when any scanned input references them. Runs inside the same
/// per-block database transaction as the chain acceptance pass.
pub struct WalletTracker {
    wallet_script: ScriptBuf,
}

impl WalletTracker {
    /// Creates a new instance of [`WalletTracker`].
    pub fn new(wallet_script: ScriptBuf) -> Self {
        Self { wallet_script }
    }

    /// Applies one transaction to the wallet's output set.
    ///
    /// Transactions are fed in block order, so an output created earlier in
    /// the block is already recorded by the time a later transaction spends
    /// it.
    pub async fn apply(&self, conn: &mut SqliteConnection, tx: &Transaction) -> Result<()> {
        let txid = tx.compute_txid();

        for (vout, output) in tx.output.iter().enumerate() {
            if output.script_pubkey == self.wallet_script {
                let inserted = ChainStore::insert_wallet_output(
                    conn,
                    &txid,
                    vout as u32,
                    output.value.to_sat(),
                )
                .await?;
                if inserted {
                    tracing::info!(%txid, vout, value = output.value.to_sat(), "found new wallet output");
                }
            }
        }

        for input in &tx.input {
            if ChainStore::mark_wallet_output_spent(conn, input.previous_output).await? {
                tracing::info!(outpoint = %input.previous_output, "wallet output was spent");
            }
        }

        Ok(())
    }
}
