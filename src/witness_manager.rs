use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::blockchain::view::ChainStateView;
use crate::chainparams::{MASTERNODE_REMOVAL_SECONDS, WITNESS_VERSION};
use crate::crypto::PrivateKey;
use crate::error::NodeError;
use crate::mempool::MempoolView;
use crate::p2p::messages::{deserialize_exact, MasterNodeWitness, WitnessProof};
use crate::witness::{WitnessParams, WitnessSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Malformed,
    BadSignature,
    InvalidProofs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WitnessVerdict {
    Accepted([u8; 32]),
    AlreadyKnown([u8; 32]),
    Rejected(RejectReason),
}

impl WitnessVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, WitnessVerdict::Accepted(_))
    }
}

pub const DEFAULT_MAX_STORED_WITNESSES: usize = 1_000;

/// Receive and issue path for witnesses. Accepted witnesses are kept in memory
/// by hash; they are never persisted. The store drops witnesses whose target
/// time has left the masternode removal window and never holds more than
/// `max_witnesses` entries (oldest target time evicted first).
pub struct WitnessManager {
    witnesses: RwLock<HashMap<[u8; 32], Arc<MasterNodeWitness>>>,
    chain: Arc<dyn ChainStateView>,
    mempool: Arc<dyn MempoolView>,
    params: WitnessParams,
    max_witnesses: usize,
}

impl std::fmt::Debug for WitnessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WitnessManager")
         .field("witness_count", &self.witness_count())
         .field("params", &self.params)
         .field("max_witnesses", &self.max_witnesses)
         .finish()
    }
}

impl WitnessManager {
    pub fn new(chain: Arc<dyn ChainStateView>, mempool: Arc<dyn MempoolView>, params: WitnessParams) -> Self {
        Self::with_max_witnesses(chain, mempool, params, DEFAULT_MAX_STORED_WITNESSES)
    }

    pub fn with_max_witnesses(
        chain: Arc<dyn ChainStateView>,
        mempool: Arc<dyn MempoolView>,
        params: WitnessParams,
        max_witnesses: usize,
    ) -> Self {
        WitnessManager {
            witnesses: RwLock::new(HashMap::new()),
            chain,
            mempool,
            params,
            max_witnesses: max_witnesses.max(1),
        }
    }

    fn read_witnesses(&self) -> RwLockReadGuard<'_, HashMap<[u8; 32], Arc<MasterNodeWitness>>> {
        self.witnesses.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_witnesses(&self) -> RwLockWriteGuard<'_, HashMap<[u8; 32], Arc<MasterNodeWitness>>> {
        self.witnesses.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Handles a raw `mnwit` payload from a peer.
    pub fn process_witness_message(&self, payload: &[u8], source_peer_addr: Option<SocketAddr>, at_time: i64) -> WitnessVerdict {
        match deserialize_exact::<MasterNodeWitness>(payload) {
            Ok(witness) => self.process_witness(witness, source_peer_addr, at_time),
            Err(e) => {
                log::warn!(
                    "Malformed witness from {}: {}",
                    source_peer_addr.map_or_else(|| "local".to_string(), |a| a.to_string()),
                    e
                );
                WitnessVerdict::Rejected(RejectReason::Malformed)
            }
        }
    }

    pub fn process_witness(&self, witness: MasterNodeWitness, source_peer_addr: Option<SocketAddr>, at_time: i64) -> WitnessVerdict {
        let hash = witness.hash();
        let source = source_peer_addr.map_or_else(|| "local".to_string(), |a| a.to_string());

        if self.read_witnesses().contains_key(&hash) {
            log::debug!("Witness {} from {} already known", hex::encode(hash), source);
            return WitnessVerdict::AlreadyKnown(hash);
        }

        if !witness.signature_valid() {
            log::warn!(
                "Witness {} from {} has a bad signature (key id {})",
                hex::encode(hash),
                source,
                witness.witness_key_id()
            );
            return WitnessVerdict::Rejected(RejectReason::BadSignature);
        }

        if !witness.is_valid(at_time, self.chain.as_ref(), self.mempool.as_ref(), &self.params) {
            log::warn!("Witness {} from {} failed proof validation", hex::encode(hash), source);
            return WitnessVerdict::Rejected(RejectReason::InvalidProofs);
        }

        log::info!(
            "Accepted witness {} from {} ({} proofs, target block {})",
            hex::encode(hash),
            source,
            witness.proofs.len(),
            hex::encode(witness.target_block_hash)
        );
        let mut witnesses = self.write_witnesses();
        // Another thread may have recorded the same witness meanwhile; either way it is known now.
        witnesses.entry(hash).or_insert_with(|| Arc::new(witness));
        self.prune(&mut witnesses, at_time);
        WitnessVerdict::Accepted(hash)
    }

    fn prune(&self, witnesses: &mut HashMap<[u8; 32], Arc<MasterNodeWitness>>, at_time: i64) {
        let cutoff = at_time.saturating_sub(MASTERNODE_REMOVAL_SECONDS);
        let before = witnesses.len();
        witnesses.retain(|_, w| w.target_time >= cutoff);

        if witnesses.len() > self.max_witnesses {
            let mut by_age: Vec<(i64, [u8; 32])> = witnesses.iter().map(|(h, w)| (w.target_time, *h)).collect();
            by_age.sort_unstable();
            let excess = witnesses.len() - self.max_witnesses;
            for (_, hash) in by_age.into_iter().take(excess) {
                witnesses.remove(&hash);
            }
        }

        let dropped = before - witnesses.len();
        if dropped > 0 {
            log::debug!("Dropped {} stored witnesses, {} remain", dropped, witnesses.len());
        }
    }

    /// Issuer path: assembles and signs a witness with `key`. The result is
    /// not recorded; feed it back through `process_witness` to do so.
    pub fn create_witness(
        &self,
        key: &PrivateKey,
        target_block_hash: [u8; 32],
        target_time: i64,
        proofs: Vec<WitnessProof>,
    ) -> Result<MasterNodeWitness, NodeError> {
        let witness_pubkey = key
            .public_key_bytes()
            .ok_or_else(|| NodeError::InvalidKey("witness key is not a valid secp256k1 secret".to_string()))?;
        let mut witness = MasterNodeWitness::new(WITNESS_VERSION, target_time, target_block_hash, proofs);
        witness.witness_pubkey = witness_pubkey;
        witness.sign(key)?;
        log::info!("Created witness {} with {} proofs", hex::encode(witness.hash()), witness.proofs.len());
        Ok(witness)
    }

    pub fn get_witness(&self, hash: &[u8; 32]) -> Option<Arc<MasterNodeWitness>> {
        self.read_witnesses().get(hash).cloned()
    }

    pub fn witness_count(&self) -> usize {
        self.read_witnesses().len()
    }

    /// Summaries of all accepted witnesses, newest target time first.
    pub fn get_witness_summary_list(&self) -> Vec<WitnessSummary> {
        let mut summaries: Vec<WitnessSummary> = self.read_witnesses().values().map(|w| w.summary()).collect();
        summaries.sort_by(|a, b| b.target_time.cmp(&a.target_time).then_with(|| a.hash.cmp(&b.hash)));
        summaries
    }
}
