pub mod blockchain;
pub mod chainparams;
pub mod config;
pub mod crypto;
pub mod error;
pub mod masternode;
pub mod mempool;
pub mod p2p;
pub mod storage;
pub mod util;
pub mod witness;
pub mod witness_manager;

pub use error::{NodeError, SignError};
pub use witness::{WitnessParams, WitnessSummary};
pub use witness_manager::{RejectReason, WitnessManager, WitnessVerdict};
