use crate::blockchain::block_index::BlockIndex;
use crate::blockchain::view::ChainStateView;
use crate::error::NodeError;
use crate::p2p::messages::BlockHeaderData;
use crate::storage::BlockStorage;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard}; // Concurrent reads from validators, one writer

#[derive(Default)]
struct ChainIndex {
    // All known block indexes, including blocks that left the active chain
    block_index_map: HashMap<[u8; 32], Arc<BlockIndex>>,
    // Active chain, position == height
    active: Vec<Arc<BlockIndex>>,
    // txid -> containing block, for transactions in connected blocks
    tx_index: HashMap<[u8; 32], [u8; 32]>,
}

pub struct ChainState {
    index: RwLock<ChainIndex>,
    storage: Arc<dyn BlockStorage>,
}

// Manual Debug implementation for ChainState
impl std::fmt::Debug for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.read_index();
        f.debug_struct("ChainState")
         .field("block_index_map_len", &index.block_index_map.len())
         .field("tip_height", &index.active.last().map(|t| t.height))
         .field("storage", &"Arc<dyn BlockStorage>")
         .finish()
    }
}

impl ChainState {
    /// Rebuilds the active chain from storage by walking back from the stored tip.
    pub fn new(storage: Arc<dyn BlockStorage>) -> Result<Self, NodeError> {
        let mut index = ChainIndex::default();

        match storage.get_chain_tip_hash()? {
            Some(tip_hash) => {
                log::info!("Found existing chain tip hash in DB: {}", hex::encode(tip_hash));
                let mut cursor = Some(tip_hash);
                let mut reversed = Vec::new();
                while let Some(hash) = cursor {
                    match storage.get_header(&hash)? {
                        Some(block_index) => {
                            cursor = block_index.prev_hash;
                            reversed.push(Arc::new(block_index));
                        }
                        None => {
                            log::warn!("Header {} missing from DB while loading active chain; stopping walk.", hex::encode(hash));
                            break;
                        }
                    }
                }
                reversed.reverse();
                for block in reversed {
                    index.block_index_map.insert(block.hash, Arc::clone(&block));
                    index.active.push(block);
                }
                log::info!("Loaded {} blocks of the active chain from DB.", index.active.len());
            }
            None => {
                log::info!("No chain tip hash found in DB. Starting with an empty chain.");
            }
        }

        Ok(ChainState {
            index: RwLock::new(index),
            storage,
        })
    }

    fn read_index(&self) -> RwLockReadGuard<'_, ChainIndex> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, ChainIndex> {
        self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tip(&self) -> Option<Arc<BlockIndex>> {
        self.read_index().active.last().cloned()
    }

    pub fn tip_height(&self) -> Option<u32> {
        self.tip().map(|t| t.height)
    }

    /// Connects a block on top of the active tip and records where its
    /// transactions live. The first block may have any parent.
    pub fn connect_block(&self, header: BlockHeaderData, txids: &[[u8; 32]]) -> Result<Arc<BlockIndex>, NodeError> {
        let mut index = self.write_index();

        let (height, prev_hash) = match index.active.last() {
            Some(tip) if tip.hash == header.prev_block_hash => (tip.height + 1, Some(tip.hash)),
            Some(_) => {
                return Err(NodeError::OrphanBlock { block: hex::encode(header.get_hash()) });
            }
            None => (0, None),
        };

        let block = Arc::new(BlockIndex::new(header, height, prev_hash));
        self.storage.save_header(&block)?;
        for txid in txids {
            self.storage.save_transaction_location(txid, &block.hash, height)?;
        }
        self.storage.set_chain_tip_hash(Some(&block.hash))?;

        for txid in txids {
            index.tx_index.insert(*txid, block.hash);
        }
        index.block_index_map.insert(block.hash, Arc::clone(&block));
        index.active.push(Arc::clone(&block));
        log::debug!("Connected block {} at height {}", hex::encode(block.hash), height);
        Ok(block)
    }

    /// Removes the tip from the active chain. It stays in the block index and its
    /// transactions keep pointing at it.
    pub fn disconnect_tip(&self) -> Result<Arc<BlockIndex>, NodeError> {
        let mut index = self.write_index();
        let tip = index.active.pop().ok_or(NodeError::EmptyChain)?;
        let new_tip = index.active.last().map(|b| b.hash);
        if let Err(e) = self.storage.set_chain_tip_hash(new_tip.as_ref()) {
            index.active.push(Arc::clone(&tip));
            return Err(e.into());
        }
        log::info!("Disconnected block {} at height {}", hex::encode(tip.hash), tip.height);
        Ok(tip)
    }
}

impl ChainStateView for ChainState {
    fn transaction_block_hash(&self, txid: &[u8; 32]) -> Option<[u8; 32]> {
        if let Some(block_hash) = self.read_index().tx_index.get(txid) {
            return Some(*block_hash);
        }
        // Slow path: transactions indexed before this process started.
        match self.storage.get_transaction_block_hash(txid) {
            Ok(found) => found,
            Err(e) => {
                log::error!("DB error looking up transaction {}: {}", hex::encode(txid), e);
                None
            }
        }
    }

    fn block_for_hash(&self, hash: &[u8; 32]) -> Option<Arc<BlockIndex>> {
        self.read_index().block_index_map.get(hash).cloned()
    }

    fn active_chain_block_at(&self, height: u32) -> Option<Arc<BlockIndex>> {
        self.read_index().active.get(height as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteBlockStorage;

    fn header(prev: [u8; 32], timestamp: u32) -> BlockHeaderData {
        BlockHeaderData {
            version: 3,
            prev_block_hash: prev,
            merkle_root: [timestamp as u8; 32],
            timestamp,
            bits: 0x1e0ffff0,
            nonce: 0,
            accumulator_checkpoint: None,
        }
    }

    fn storage() -> Arc<dyn BlockStorage> {
        Arc::new(SqliteBlockStorage::open_in_memory().unwrap())
    }

    #[test]
    fn connect_and_query() {
        let chain = ChainState::new(storage()).unwrap();
        assert_eq!(chain.tip_height(), None);

        let b0 = chain.connect_block(header([0; 32], 100), &[[1; 32]]).unwrap();
        let b1 = chain.connect_block(header(b0.hash, 200), &[[2; 32]]).unwrap();
        assert_eq!(b0.prev_hash, None);
        assert_eq!(b1.prev_hash, Some(b0.hash));
        assert_eq!(chain.tip_height(), Some(1));
        assert_eq!(chain.transaction_block_hash(&[2; 32]), Some(b1.hash));
        assert_eq!(chain.containing_block_height(&crate::p2p::messages::OutPoint::new([2; 32], 0)), Some(1));
        assert_eq!(chain.active_chain_block_at(0).map(|b| b.hash), Some(b0.hash));
        assert_eq!(chain.block_time(&b1), 200);
        assert!(chain.active_chain_block_at(2).is_none());
    }

    #[test]
    fn rejects_block_not_extending_tip() {
        let chain = ChainState::new(storage()).unwrap();
        chain.connect_block(header([0; 32], 100), &[]).unwrap();
        let err = chain.connect_block(header([0x55; 32], 200), &[]).unwrap_err();
        assert!(matches!(err, NodeError::OrphanBlock { .. }));
    }

    #[test]
    fn disconnected_block_stays_indexed() {
        let chain = ChainState::new(storage()).unwrap();
        let b0 = chain.connect_block(header([0; 32], 100), &[]).unwrap();
        let b1 = chain.connect_block(header(b0.hash, 200), &[[7; 32]]).unwrap();
        chain.disconnect_tip().unwrap();
        assert_eq!(chain.tip_height(), Some(0));
        assert!(chain.active_chain_block_at(1).is_none());
        assert_eq!(chain.block_for_hash(&b1.hash).map(|b| b.height), Some(1));
        assert_eq!(chain.transaction_block_hash(&[7; 32]), Some(b1.hash));
    }

    #[test]
    fn reloads_active_chain_from_storage() {
        let storage = storage();
        let tip_hash = {
            let chain = ChainState::new(Arc::clone(&storage)).unwrap();
            let b0 = chain.connect_block(header([0; 32], 100), &[[1; 32]]).unwrap();
            chain.connect_block(header(b0.hash, 200), &[]).unwrap().hash
        };
        let reloaded = ChainState::new(storage).unwrap();
        assert_eq!(reloaded.tip().map(|t| t.hash), Some(tip_hash));
        assert_eq!(reloaded.tip_height(), Some(1));
        // transaction found through the storage slow path
        assert!(reloaded.transaction_block_hash(&[1; 32]).is_some());
    }
}
