use crate::blockchain::block_index::BlockIndex;
use crate::p2p::messages::{deserialize_exact, serialize, BlockHeaderData};
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension};
use std::sync::{Mutex, MutexGuard};

pub trait BlockStorage: Send + Sync + std::fmt::Debug {
    fn save_header(&self, block_index: &BlockIndex) -> Result<(), RusqliteError>;
    fn get_header(&self, hash: &[u8; 32]) -> Result<Option<BlockIndex>, RusqliteError>;
    fn get_chain_tip_hash(&self) -> Result<Option<[u8; 32]>, RusqliteError>;
    fn set_chain_tip_hash(&self, hash: Option<&[u8; 32]>) -> Result<(), RusqliteError>;
    fn save_transaction_location(&self, txid: &[u8; 32], block_hash: &[u8; 32], height: u32) -> Result<(), RusqliteError>;
    fn get_transaction_block_hash(&self, txid: &[u8; 32]) -> Result<Option<[u8; 32]>, RusqliteError>;
}

pub struct SqliteBlockStorage {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBlockStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBlockStorage")
         .field("conn", &"Mutex<Connection>")
         .finish()
    }
}

fn blob_to_hash(column: usize, v: Vec<u8>) -> Result<[u8; 32], RusqliteError> {
    if v.len() != 32 {
        return Err(RusqliteError::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid hash length")),
        ));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&v);
    Ok(arr)
}

impl SqliteBlockStorage {
    pub fn new(db_path: &str) -> Result<Self, RusqliteError> {
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, RusqliteError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RusqliteError> {
        conn.execute("CREATE TABLE IF NOT EXISTS block_headers (hash BLOB PRIMARY KEY, height INTEGER NOT NULL, prev_hash BLOB, header_data BLOB NOT NULL)", [])?;
        conn.execute("CREATE TABLE IF NOT EXISTS chain_metadata (key TEXT PRIMARY KEY, value_blob BLOB, value_text TEXT)", [])?;
        conn.execute("CREATE TABLE IF NOT EXISTS transactions (txid BLOB PRIMARY KEY, block_hash BLOB NOT NULL, block_height INTEGER NOT NULL)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_transactions_block_hash ON transactions (block_hash);", [])?;
        Ok(SqliteBlockStorage { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the connection cannot leave SQLite itself inconsistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlockStorage for SqliteBlockStorage {
    fn save_header(&self, block_index: &BlockIndex) -> Result<(), RusqliteError> {
        let header_data_bytes = serialize(&block_index.header)
            .map_err(|e| RusqliteError::ToSqlConversionFailure(Box::new(e)))?;
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO block_headers (hash, height, prev_hash, header_data) VALUES (?1, ?2, ?3, ?4)",
            params![
                block_index.hash.to_vec(),
                block_index.height,
                block_index.prev_hash.map(|h| h.to_vec()),
                header_data_bytes
            ],
        )?;
        Ok(())
    }

    fn get_header(&self, hash: &[u8; 32]) -> Result<Option<BlockIndex>, RusqliteError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT height, prev_hash, header_data FROM block_headers WHERE hash = ?1")?;
        let mut rows = stmt.query(params![hash.to_vec()])?;
        if let Some(row) = rows.next()? {
            let height: u32 = row.get(0)?;
            let prev_hash_opt_vec: Option<Vec<u8>> = row.get(1)?;
            let header_data_bytes: Vec<u8> = row.get(2)?;
            let prev_hash = prev_hash_opt_vec.map(|v| blob_to_hash(1, v)).transpose()?;
            let header = deserialize_exact::<BlockHeaderData>(&header_data_bytes)
                .map_err(|e| RusqliteError::FromSqlConversionFailure(2, rusqlite::types::Type::Blob, Box::new(e)))?;
            Ok(Some(BlockIndex { hash: *hash, prev_hash, height, header }))
        } else {
            Ok(None)
        }
    }

    fn get_chain_tip_hash(&self) -> Result<Option<[u8; 32]>, RusqliteError> {
        let conn = self.conn();
        let tip: Option<Option<Vec<u8>>> = conn
            .query_row("SELECT value_blob FROM chain_metadata WHERE key = 'chain_tip_hash'", [], |row| row.get(0))
            .optional()?;
        tip.flatten().map(|v| blob_to_hash(0, v)).transpose()
    }

    fn set_chain_tip_hash(&self, hash: Option<&[u8; 32]>) -> Result<(), RusqliteError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO chain_metadata (key, value_blob) VALUES ('chain_tip_hash', ?1)",
            params![hash.map(|h| h.to_vec())],
        )?;
        Ok(())
    }

    fn save_transaction_location(&self, txid: &[u8; 32], block_hash: &[u8; 32], height: u32) -> Result<(), RusqliteError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO transactions (txid, block_hash, block_height) VALUES (?1, ?2, ?3)",
            params![txid.to_vec(), block_hash.to_vec(), height],
        )?;
        Ok(())
    }

    fn get_transaction_block_hash(&self, txid: &[u8; 32]) -> Result<Option<[u8; 32]>, RusqliteError> {
        let conn = self.conn();
        let block_hash: Option<Vec<u8>> = conn
            .query_row("SELECT block_hash FROM transactions WHERE txid = ?1", params![txid.to_vec()], |row| row.get(0))
            .optional()?;
        block_hash.map(|v| blob_to_hash(0, v)).transpose()
    }
}
