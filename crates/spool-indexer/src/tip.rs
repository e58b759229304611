//! The acceptance state machine.

use crate::db::{ChainStore, Result};
use bitcoin::{Amount, Transaction, Txid};
use spool_primitives::{ChainParams, ChainRecord};
use sqlx::SqliteConnection;

/// What the tracker decided about one scanned transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// The transaction started the chain at index 0.
    Genesis(ChainRecord),
    /// The transaction spent the recognized tip and extended the chain.
    Extended(ChainRecord),
    /// The txid is already recorded (block replay); nothing changed.
    Duplicate(Txid),
    /// Pays the chain script but does not spend the recognized tip.
    Decoy(Txid),
    /// Would-be genesis whose output 0 does not carry the canonical amount.
    WrongGenesisAmount { txid: Txid, amount: Amount },
    /// Not chain-related at all.
    Unrelated,
}

/// Decides, per transaction, whether the chain is extended, started, or left
/// untouched.
///
/// By protocol convention the chain-relevant input and output of a
/// transaction are always at index 0; anything else a transaction carries is
/// ignored. All decisions and their record insertions happen inside the
/// caller's database transaction, so a block's acceptances commit atomically
/// with its cursor advance.
pub struct TipTracker {
    params: ChainParams,
}

impl TipTracker {
    /// Creates a new instance of [`TipTracker`].
    pub fn new(params: ChainParams) -> Self {
        Self { params }
    }

    /// Applies one transaction to the chain state.
    pub async fn apply(&self, conn: &mut SqliteConnection, tx: &Transaction) -> Result<Acceptance> {
        let (Some(input), Some(output)) = (tx.input.first(), tx.output.first()) else {
            return Ok(Acceptance::Unrelated);
        };

        if output.script_pubkey != self.params.chain_script {
            return Ok(Acceptance::Unrelated);
        }

        let txid = tx.compute_txid();

        // Replays of already-processed blocks must be silent no-ops, for both
        // genesis and extension transactions.
        if ChainStore::record_exists(conn, &txid).await? {
            return Ok(Acceptance::Duplicate(txid));
        }

        match ChainStore::record_index(conn, &input.previous_output.txid).await? {
            Some(tip_index) => {
                let record = ChainRecord {
                    index: tip_index + 1,
                    txid,
                };
                if ChainStore::insert_record(conn, record).await? {
                    Ok(Acceptance::Extended(record))
                } else {
                    Ok(Acceptance::Duplicate(txid))
                }
            }
            None if ChainStore::chain_started(conn).await? => Ok(Acceptance::Decoy(txid)),
            None => {
                // The chain has not started. The first output paying exactly
                // the canonical amount to the chain script becomes genesis;
                // any other amount is a malformed bootstrap attempt.
                if output.value != self.params.canonical_amount {
                    return Ok(Acceptance::WrongGenesisAmount {
                        txid,
                        amount: output.value,
                    });
                }

                let record = ChainRecord { index: 0, txid };
                ChainStore::insert_record(conn, record).await?;
                Ok(Acceptance::Genesis(record))
            }
        }
    }
}
