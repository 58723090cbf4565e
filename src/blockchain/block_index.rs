// twins_witness/src/blockchain/block_index.rs

use crate::p2p::messages::BlockHeaderData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndex {
    pub hash: [u8; 32],              // Hash of this block header
    pub prev_hash: Option<[u8; 32]>, // None for the first block we know of
    pub height: u32,
    pub header: BlockHeaderData,
}

impl BlockIndex {
    pub fn new(header_data: BlockHeaderData, height: u32, prev_hash_opt: Option<[u8; 32]>) -> Self {
        BlockIndex {
            hash: header_data.get_hash(),
            prev_hash: prev_hash_opt,
            height,
            header: header_data,
        }
    }

    pub fn get_block_time(&self) -> i64 {
        self.header.timestamp as i64
    }
}
