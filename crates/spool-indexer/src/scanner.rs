//! The sequential block scanning loop.

use crate::db::{ChainStore, Error, Result};
use crate::tip::{Acceptance, TipTracker};
use crate::wallet::WalletTracker;
use bitcoin::Block;
use spool_primitives::BlockSource;
use std::sync::Arc;
use std::time::Duration;

/// Scanner tuning knobs, consumed once at startup.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// How long to wait before retrying a height that is not mined yet.
    pub poll_interval: Duration,
    /// Number of confirmations a block needs before it is processed.
    ///
    /// With 0 a block is processed as soon as it appears, matching the
    /// protocol's assumption of immediate finality. Operators who want a
    /// safety margin against shallow reorgs trade latency for depth here;
    /// committed records are never rolled back either way.
    pub confirmations: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            confirmations: 0,
        }
    }
}

/// What a single scanner step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The block at `height` was processed and committed.
    Processed {
        /// Height of the processed block.
        height: u64,
        /// Number of chain records accepted from it.
        accepted: usize,
    },
    /// The block at `height` is not available (or not buried deep enough) yet.
    NotReady {
        /// The height that was requested.
        height: u64,
    },
}

/// Polls the base chain from the persisted cursor, feeding each block's
/// transactions through the tip tracker.
///
/// A block's record insertions, wallet updates and cursor advance commit in
/// one database transaction, so a crash anywhere leaves the store at a block
/// boundary and the interrupted block is reprocessed from scratch on restart.
/// Heights are never skipped: the only retried condition is a height the base
/// chain has not mined yet, and every other failure propagates out of
/// [`Self::run`] to terminate the process.
pub struct BlockScanner {
    store: ChainStore,
    source: Arc<dyn BlockSource>,
    tracker: TipTracker,
    wallet: Option<WalletTracker>,
    config: ScannerConfig,
}

impl BlockScanner {
    /// Creates a new instance of [`BlockScanner`].
    pub fn new(
        store: ChainStore,
        source: Arc<dyn BlockSource>,
        tracker: TipTracker,
        wallet: Option<WalletTracker>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            store,
            source,
            tracker,
            wallet,
            config,
        }
    }

    /// Attempts to process the block after the current cursor.
    pub async fn process_next(&self) -> Result<ScanOutcome> {
        let cursor = self.store.cursor().await?.ok_or(Error::MissingCursor)?;
        let height = cursor + 1;

        if self.config.confirmations > 0 {
            let block_count = self.source.block_count().await?;
            if height + self.config.confirmations > block_count {
                return Ok(ScanOutcome::NotReady { height });
            }
        }

        let Some(hash) = self.source.block_hash_at(height).await? else {
            return Ok(ScanOutcome::NotReady { height });
        };

        let raw = self.source.raw_block(hash).await?;
        let block: Block =
            bitcoin::consensus::deserialize(&raw).map_err(|_| Error::MalformedBlock { height })?;

        tracing::debug!(height, %hash, txs = block.txdata.len(), "inspecting block");

        let mut db_tx = self.store.begin().await?;
        let mut accepted = 0;

        for tx in &block.txdata {
            if let Some(wallet) = &self.wallet {
                wallet.apply(&mut db_tx, tx).await?;
            }

            match self.tracker.apply(&mut db_tx, tx).await? {
                Acceptance::Genesis(record) => {
                    tracing::info!(txid = %record.txid, "chain started");
                    accepted += 1;
                }
                Acceptance::Extended(record) => {
                    tracing::info!(index = record.index, txid = %record.txid, "new chain tip found");
                    accepted += 1;
                }
                Acceptance::Duplicate(txid) => {
                    tracing::debug!(%txid, "transaction already recorded");
                }
                Acceptance::Decoy(txid) => {
                    tracing::warn!(%txid, "tx pays the chain address but is not part of the chain");
                }
                Acceptance::WrongGenesisAmount { txid, amount } => {
                    tracing::warn!(%txid, %amount, "bootstrap attempt with non-canonical amount");
                }
                Acceptance::Unrelated => {}
            }
        }

        ChainStore::set_cursor(&mut db_tx, height).await?;
        db_tx.commit().await?;

        Ok(ScanOutcome::Processed { height, accepted })
    }

    /// Runs the scanner until an error occurs.
    ///
    /// Loops forever; the caller treats a returned error as fatal.
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.process_next().await? {
                ScanOutcome::Processed { .. } => {}
                ScanOutcome::NotReady { height } => {
                    tracing::trace!(height, "block not available yet");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}
