//! SQLite persistence for the chain state.

use crate::types::WalletUtxo;
use bitcoin::hashes::Hash;
use bitcoin::{Network, OutPoint, Txid};
use spool_primitives::{ChainRecord, SourceError, network_directory};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{SqliteConnection, Transaction};
use std::path::Path;

/// Chain store error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid txid in database: {0}")]
    InvalidTxid(String),

    #[error("corrupt scan cursor: {0}")]
    CorruptCursor(String),

    #[error("scan cursor missing, the store was never initialized")]
    MissingCursor,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("undecodable block at height {height}")]
    MalformedBlock { height: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

/// SQLite store holding the accepted chain records, the scan cursor and, in
/// the funded role, the wallet's output set.
///
/// All per-block mutations go through a single [`Transaction`] obtained from
/// [`Self::begin`], so readers only ever observe block boundaries.
#[derive(Clone)]
pub struct ChainStore {
    pool: SqlitePool,
}

impl ChainStore {
    /// Opens or creates the store under `base_path`.
    ///
    /// The database file lives in a network-specific subdirectory to prevent
    /// mixing chains from different networks.
    pub async fn open(base_path: &Path, network: Network) -> Result<Self> {
        let db_path = base_path
            .join(network_directory(network))
            .join("spool.sqlite");

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("synchronous", "NORMAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        Ok(store)
    }

    /// Opens an ephemeral in-memory store. Test use only.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            -- Single-row scalars, keyed by name. Currently only 'blockheight',
            -- the height of the most recently fully-processed block.
            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- The accepted chain. idx values are contiguous from 0.
            CREATE TABLE IF NOT EXISTS chain_records (
                idx INTEGER NOT NULL UNIQUE,
                txid BLOB PRIMARY KEY
            );

            -- Funded role only: outputs paying the wallet script.
            CREATE TABLE IF NOT EXISTS wallet_outputs (
                txid BLOB NOT NULL,
                vout INTEGER NOT NULL,
                value INTEGER NOT NULL,
                spent INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (txid, vout)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a database transaction spanning one block's effects.
    pub async fn begin(&self) -> Result<Transaction<'_, sqlx::Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ========== Scan cursor ==========

    /// The height of the most recently fully-processed block, if any.
    pub async fn cursor(&self) -> Result<Option<u64>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM state WHERE key = 'blockheight'")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(value,)| value.parse().map_err(|_| Error::CorruptCursor(value)))
            .transpose()
    }

    /// Initializes the cursor if it does not exist yet.
    ///
    /// Used on first run to skip scanning the entire historical chain; a
    /// no-op when a cursor is already present.
    pub async fn init_cursor(&self, height: u64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO state (key, value) VALUES ('blockheight', ?)")
            .bind(height.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Advances the cursor within a block's transaction.
    pub(crate) async fn set_cursor(conn: &mut SqliteConnection, height: u64) -> Result<()> {
        sqlx::query("UPDATE state SET value = ? WHERE key = 'blockheight'")
            .bind(height.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    // ========== Chain records ==========

    /// Number of accepted records.
    pub async fn record_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chain_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// The highest-index record, i.e. the current chain tip.
    pub async fn tip(&self) -> Result<Option<ChainRecord>> {
        let row: Option<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT idx, txid FROM chain_records ORDER BY idx DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        row.map(parse_record).transpose()
    }

    /// The genesis record, if the chain has started.
    pub async fn genesis(&self) -> Result<Option<ChainRecord>> {
        let row: Option<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT idx, txid FROM chain_records WHERE idx = 0")
                .fetch_optional(&self.pool)
                .await?;
        row.map(parse_record).transpose()
    }

    /// All records in index order.
    pub async fn records(&self) -> Result<Vec<ChainRecord>> {
        let rows: Vec<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT idx, txid FROM chain_records ORDER BY idx ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(parse_record).collect()
    }

    pub(crate) async fn record_exists(conn: &mut SqliteConnection, txid: &Txid) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM chain_records WHERE txid = ?")
            .bind(txid.as_byte_array().as_slice())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    pub(crate) async fn record_index(conn: &mut SqliteConnection, txid: &Txid) -> Result<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT idx FROM chain_records WHERE txid = ?")
            .bind(txid.as_byte_array().as_slice())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.map(|(idx,)| idx as u64))
    }

    pub(crate) async fn chain_started(conn: &mut SqliteConnection) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM chain_records LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    /// Inserts a record, returning `false` if its txid was already recorded.
    pub(crate) async fn insert_record(
        conn: &mut SqliteConnection,
        record: ChainRecord,
    ) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO chain_records (idx, txid) VALUES (?, ?)")
            .bind(record.index as i64)
            .bind(record.txid.as_byte_array().as_slice())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========== Wallet outputs (funded role) ==========

    /// Records a newly seen wallet output, returning `false` on replay.
    pub(crate) async fn insert_wallet_output(
        conn: &mut SqliteConnection,
        txid: &Txid,
        vout: u32,
        value: u64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO wallet_outputs (txid, vout, value, spent) VALUES (?, ?, ?, 0)",
        )
        .bind(txid.as_byte_array().as_slice())
        .bind(vout as i64)
        .bind(value as i64)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Marks the referenced wallet output spent, returning whether one matched.
    pub(crate) async fn mark_wallet_output_spent(
        conn: &mut SqliteConnection,
        outpoint: OutPoint,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE wallet_outputs SET spent = 1 WHERE txid = ? AND vout = ? AND spent = 0")
                .bind(outpoint.txid.as_byte_array().as_slice())
                .bind(outpoint.vout as i64)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All currently unspent wallet outputs.
    pub async fn unspent_wallet_outputs(&self) -> Result<Vec<WalletUtxo>> {
        let rows: Vec<(Vec<u8>, i64, i64)> = sqlx::query_as(
            "SELECT txid, vout, value FROM wallet_outputs WHERE spent = 0 ORDER BY txid, vout",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(txid_bytes, vout, value)| {
                Ok(WalletUtxo {
                    txid: parse_txid(&txid_bytes)?,
                    vout: vout as u32,
                    value: value as u64,
                })
            })
            .collect()
    }
}

fn parse_record((idx, txid_bytes): (i64, Vec<u8>)) -> Result<ChainRecord> {
    Ok(ChainRecord {
        index: idx as u64,
        txid: parse_txid(&txid_bytes)?,
    })
}

fn parse_txid(bytes: &[u8]) -> Result<Txid> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::InvalidTxid(format!("invalid length {}", bytes.len())))?;
    Ok(Txid::from_byte_array(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(tag: u8) -> Txid {
        Txid::from_byte_array([tag; 32])
    }

    #[tokio::test]
    async fn cursor_initializes_once() {
        let store = ChainStore::open_in_memory().await.unwrap();
        assert_eq!(store.cursor().await.unwrap(), None);

        store.init_cursor(800_000).await.unwrap();
        assert_eq!(store.cursor().await.unwrap(), Some(800_000));

        // A second initialization must not rewind.
        store.init_cursor(1).await.unwrap();
        assert_eq!(store.cursor().await.unwrap(), Some(800_000));
    }

    #[tokio::test]
    async fn cursor_advances_within_transaction() {
        let store = ChainStore::open_in_memory().await.unwrap();
        store.init_cursor(10).await.unwrap();

        let mut db_tx = store.begin().await.unwrap();
        ChainStore::set_cursor(&mut db_tx, 11).await.unwrap();
        db_tx.commit().await.unwrap();

        assert_eq!(store.cursor().await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn duplicate_record_insert_is_ignored() {
        let store = ChainStore::open_in_memory().await.unwrap();

        let mut db_tx = store.begin().await.unwrap();
        let record = ChainRecord {
            index: 0,
            txid: txid(1),
        };
        assert!(ChainStore::insert_record(&mut db_tx, record).await.unwrap());
        assert!(!ChainStore::insert_record(&mut db_tx, record).await.unwrap());
        db_tx.commit().await.unwrap();

        assert_eq!(store.record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn tip_is_highest_index() {
        let store = ChainStore::open_in_memory().await.unwrap();

        let mut db_tx = store.begin().await.unwrap();
        for index in 0..3u64 {
            let record = ChainRecord {
                index,
                txid: txid(index as u8),
            };
            ChainStore::insert_record(&mut db_tx, record).await.unwrap();
        }
        db_tx.commit().await.unwrap();

        let tip = store.tip().await.unwrap().unwrap();
        assert_eq!(tip.index, 2);
        assert_eq!(tip.txid, txid(2));
        assert_eq!(store.genesis().await.unwrap().unwrap().txid, txid(0));
    }

    #[tokio::test]
    async fn wallet_outputs_track_spending() {
        let store = ChainStore::open_in_memory().await.unwrap();

        let mut db_tx = store.begin().await.unwrap();
        ChainStore::insert_wallet_output(&mut db_tx, &txid(7), 0, 5_000)
            .await
            .unwrap();
        ChainStore::insert_wallet_output(&mut db_tx, &txid(7), 1, 2_500)
            .await
            .unwrap();
        db_tx.commit().await.unwrap();

        assert_eq!(store.unspent_wallet_outputs().await.unwrap().len(), 2);

        let mut db_tx = store.begin().await.unwrap();
        let spent = ChainStore::mark_wallet_output_spent(
            &mut db_tx,
            OutPoint {
                txid: txid(7),
                vout: 1,
            },
        )
        .await
        .unwrap();
        assert!(spent);
        db_tx.commit().await.unwrap();

        let utxos = store.unspent_wallet_outputs().await.unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].vout, 0);
        assert_eq!(utxos[0].value, 5_000);
    }
}
