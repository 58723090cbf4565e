use std::sync::Arc;

use crate::blockchain::block_index::BlockIndex;
use crate::p2p::messages::OutPoint;

/// Read-only chain queries used by witness validation.
///
/// Implementations are shared between message handlers, so every query must
/// be safe to call concurrently with block connection.
pub trait ChainStateView: Send + Sync {
    /// Hash of the block containing transaction `txid`, if the node can find it.
    fn transaction_block_hash(&self, txid: &[u8; 32]) -> Option<[u8; 32]>;

    /// Looks a block up in the local block index (active chain or not).
    fn block_for_hash(&self, hash: &[u8; 32]) -> Option<Arc<BlockIndex>>;

    /// Block at `height` on the active chain.
    fn active_chain_block_at(&self, height: u32) -> Option<Arc<BlockIndex>>;

    /// Height of the indexed block containing the transaction that created `outpoint`.
    fn containing_block_height(&self, outpoint: &OutPoint) -> Option<u32> {
        let block_hash = self.transaction_block_hash(&outpoint.hash)?;
        self.block_for_hash(&block_hash).map(|index| index.height)
    }

    fn block_time(&self, index: &BlockIndex) -> i64 {
        index.get_block_time()
    }
}
