//! Masternode witness: signing, signature checks and proof validation.
//!
//! A witness is validated in two independent halves. `signature_valid` ties the
//! batch to the witness key; `is_valid` re-checks every proof against this
//! node's own chain and mempool at a reference time. Receivers need both.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::blockchain::view::ChainStateView;
use crate::chainparams::{
    DEFAULT_WITNESS_COLLATERAL_AMOUNT, MASTERNODE_MIN_CONFIRMATIONS, MASTERNODE_PING_SECONDS,
    MASTERNODE_REMOVAL_SECONDS,
};
use crate::crypto::{self, hash256, KeyId, PrivateKey};
use crate::error::SignError;
use crate::mempool::MempoolView;
use crate::p2p::messages::{serialize, MasterNodeWitness, OutPoint, TransactionData, TxInRaw, TxOutRaw, WitnessProof};
use crate::util::epoch_time_to_human_readable;

/// Node-local inputs to proof validation that are not part of the witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessParams {
    /// Value of the synthetic spend used to probe that a collateral is unspent.
    pub collateral_amount: i64,
    /// Script the synthetic spend pays to.
    pub collateral_pool_script: Vec<u8>,
}

impl Default for WitnessParams {
    fn default() -> Self {
        WitnessParams {
            collateral_amount: DEFAULT_WITNESS_COLLATERAL_AMOUNT,
            collateral_pool_script: p2pkh_script(&KeyId([0u8; 20])),
        }
    }
}

/// `OP_DUP OP_HASH160 <key id> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script(key_id: &KeyId) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&key_id.0);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// Transaction spending `collateral` that the mempool is asked to accept. It is
/// never signed or relayed; acceptance only means the input is still unspent.
pub fn build_collateral_probe_tx(collateral: &OutPoint, params: &WitnessParams) -> TransactionData {
    TransactionData {
        version: 1,
        vin: vec![TxInRaw::spending(collateral)],
        vout: vec![TxOutRaw {
            value: params.collateral_amount,
            script_pubkey: params.collateral_pool_script.clone(),
        }],
        lock_time: 0,
    }
}

impl WitnessProof {
    pub fn collateral(&self) -> &OutPoint {
        &self.ping.serviced_outpoint
    }

    pub fn hash(&self) -> [u8; 32] {
        // Encoding into a Vec cannot fail.
        hash256(&serialize(self).unwrap_or_default())
    }

    /// Validates one proof in isolation. Replays across proofs are the
    /// witness's concern, see [`MasterNodeWitness::is_valid`].
    pub fn check_single(
        &self,
        at_time: i64,
        chain: &dyn ChainStateView,
        mempool: &dyn MempoolView,
        params: &WitnessParams,
    ) -> bool {
        let ping = &self.ping;
        let broadcast = &self.broadcast;
        let collateral = &ping.serviced_outpoint;

        if ping.sig_time < at_time.saturating_sub(MASTERNODE_REMOVAL_SECONDS)
            || ping.sig_time > at_time.saturating_add(MASTERNODE_PING_SECONDS)
        {
            log::debug!(
                target: "witness",
                "check_single - ping for {} signed at {} is outside the window around {}",
                collateral,
                epoch_time_to_human_readable(ping.sig_time),
                epoch_time_to_human_readable(at_time)
            );
            return false;
        }

        if ping.serviced_outpoint != broadcast.serviced_outpoint {
            log::debug!(
                target: "witness",
                "check_single - ping {} and broadcast {} disagree on collateral",
                ping.serviced_outpoint,
                broadcast.serviced_outpoint
            );
            return false;
        }

        if !broadcast.verify_signature() {
            return false;
        }

        let ping_check = ping.verify_signature(&broadcast.masternode_pubkey);
        if !ping_check.is_clean() {
            log::debug!(
                target: "witness",
                "check_single - ping for {} rejected (verified={}, dos={})",
                collateral,
                ping_check.verified,
                ping_check.dos_score
            );
            return false;
        }

        if let Some(height) = chain.containing_block_height(collateral) {
            let confirmation_height = height.checked_add(MASTERNODE_MIN_CONFIRMATIONS - 1);
            if let Some(conf_block) = confirmation_height.and_then(|h| chain.active_chain_block_at(h)) {
                if chain.block_time(&conf_block) > at_time {
                    log::debug!(
                        target: "witness",
                        "check_single - collateral {} from height {} not mature at {}",
                        collateral,
                        height,
                        epoch_time_to_human_readable(at_time)
                    );
                    return false;
                }
            }
        }

        let probe = build_collateral_probe_tx(collateral, params);
        match mempool.try_lock() {
            Some(guard) => {
                if !guard.would_accept(&probe) {
                    log::debug!(target: "witness", "check_single - collateral {} is not spendable", collateral);
                    return false;
                }
            }
            None => {
                log::debug!(
                    target: "witness",
                    "check_single - mempool busy, skipping spendability of {}",
                    collateral
                );
            }
        }

        true
    }
}

impl fmt::Display for WitnessProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WitnessProof\n\tPing {} sigTime {}\n\tBroadcast {} {} sigTime {}",
            self.ping.serviced_outpoint,
            epoch_time_to_human_readable(self.ping.sig_time),
            self.broadcast.network_address,
            self.broadcast.serviced_outpoint,
            epoch_time_to_human_readable(self.broadcast.sig_time)
        )
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProofSummary {
    pub collateral_hash: String,
    pub collateral_index: u32,
    pub address: String,
    pub ping_time: i64,
    pub broadcast_time: i64,
}

/// JSON-friendly view of a witness for diagnostics.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WitnessSummary {
    pub hash: String,
    pub version: u32,
    pub target_time: i64,
    pub target_time_human: String,
    pub target_block_hash: String,
    pub proof_count: usize,
    pub witness_key_id: String,
    pub signature_valid: bool,
    pub proofs: Vec<ProofSummary>,
}

impl MasterNodeWitness {
    pub fn new(version: u32, target_time: i64, target_block_hash: [u8; 32], proofs: Vec<WitnessProof>) -> Self {
        MasterNodeWitness {
            version,
            target_time,
            target_block_hash,
            proofs,
            signature: Vec::new(),
            witness_pubkey: Vec::new(),
        }
    }

    /// Canonical hash: the header fields, the proof count and each proof's hash,
    /// in order. Signature and witness key are not covered.
    pub fn hash(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(53 + 32 * self.proofs.len());
        // Writes into a Vec cannot fail.
        let _ = self.encode_header(&mut buf);
        for proof in &self.proofs {
            buf.extend_from_slice(&proof.hash());
        }
        hash256(&buf)
    }

    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), SignError> {
        match crypto::sign_compact(&self.hash(), key) {
            Ok(signature) => {
                self.signature = signature;
                Ok(())
            }
            Err(e) => {
                log::debug!(target: "witness", "MasterNodeWitness::sign - can't sign: {}", e);
                Err(e)
            }
        }
    }

    pub fn signature_valid(&self) -> bool {
        if !crypto::is_valid_pubkey(&self.witness_pubkey) {
            return false;
        }
        match crypto::recover_identity(&self.hash(), &self.signature) {
            Some(recovered) => recovered == KeyId::from_pubkey_bytes(&self.witness_pubkey),
            None => false,
        }
    }

    /// Checks every proof at `at_time`. Does not look at the witness signature.
    pub fn is_valid(
        &self,
        at_time: i64,
        chain: &dyn ChainStateView,
        mempool: &dyn MempoolView,
        params: &WitnessParams,
    ) -> bool {
        let mut checked_out: HashSet<OutPoint> = HashSet::with_capacity(self.proofs.len());
        for proof in &self.proofs {
            if !checked_out.insert(*proof.collateral()) {
                log::debug!(
                    target: "witness",
                    "MasterNodeWitness::is_valid - collateral {} appears twice",
                    proof.collateral()
                );
                return false;
            }
            if !proof.check_single(at_time, chain, mempool, params) {
                return false;
            }
        }
        true
    }

    pub fn witness_key_id(&self) -> KeyId {
        KeyId::from_pubkey_bytes(&self.witness_pubkey)
    }

    pub fn summary(&self) -> WitnessSummary {
        WitnessSummary {
            hash: hex::encode(self.hash()),
            version: self.version,
            target_time: self.target_time,
            target_time_human: epoch_time_to_human_readable(self.target_time),
            target_block_hash: hex::encode(self.target_block_hash),
            proof_count: self.proofs.len(),
            witness_key_id: self.witness_key_id().to_string(),
            signature_valid: self.signature_valid(),
            proofs: self
                .proofs
                .iter()
                .map(|proof| ProofSummary {
                    collateral_hash: hex::encode(proof.collateral().hash),
                    collateral_index: proof.collateral().n,
                    address: proof.broadcast.network_address.to_string(),
                    ping_time: proof.ping.sig_time,
                    broadcast_time: proof.broadcast.sig_time,
                })
                .collect(),
        }
    }
}

impl fmt::Display for MasterNodeWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "MasterNodeWitness(target time={} block hash={}, ver={}, count proofs={})",
            epoch_time_to_human_readable(self.target_time),
            hex::encode(self.target_block_hash),
            self.version,
            self.proofs.len()
        )?;
        for proof in &self.proofs {
            writeln!(f, "  {}", proof)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block_index::BlockIndex;
    use crate::chainparams::COIN;
    use crate::mempool::{Mempool, MempoolGuard};
    use crate::p2p::messages::{BlockHeaderData, MasternodeBroadcast, MasternodePing};
    use std::collections::HashMap;
    use std::sync::Arc;

    const AT: i64 = 1_600_000_000;

    #[derive(Default)]
    struct StubChain {
        tx_blocks: HashMap<[u8; 32], [u8; 32]>,
        index: HashMap<[u8; 32], Arc<BlockIndex>>,
        active: Vec<Arc<BlockIndex>>,
    }

    impl StubChain {
        // One block per time, heights from 0; the collateral tx sits in block `tx_height`.
        fn with_blocks(times: &[i64], collateral_tx: [u8; 32], tx_height: usize) -> Self {
            let mut chain = StubChain::default();
            let mut prev = None;
            for (height, time) in times.iter().enumerate() {
                let header = BlockHeaderData {
                    version: 3,
                    prev_block_hash: prev.unwrap_or([0; 32]),
                    merkle_root: [height as u8; 32],
                    timestamp: *time as u32,
                    bits: 0x1e0ffff0,
                    nonce: 0,
                    accumulator_checkpoint: None,
                };
                let block = Arc::new(BlockIndex::new(header, height as u32, prev));
                prev = Some(block.hash);
                chain.index.insert(block.hash, Arc::clone(&block));
                chain.active.push(block);
            }
            chain.tx_blocks.insert(collateral_tx, chain.active[tx_height].hash);
            chain
        }
    }

    impl ChainStateView for StubChain {
        fn transaction_block_hash(&self, txid: &[u8; 32]) -> Option<[u8; 32]> {
            self.tx_blocks.get(txid).copied()
        }
        fn block_for_hash(&self, hash: &[u8; 32]) -> Option<Arc<BlockIndex>> {
            self.index.get(hash).cloned()
        }
        fn active_chain_block_at(&self, height: u32) -> Option<Arc<BlockIndex>> {
            self.active.get(height as usize).cloned()
        }
    }

    struct BusyMempool;

    impl MempoolView for BusyMempool {
        fn try_lock(&self) -> Option<Box<dyn MempoolGuard + '_>> {
            None
        }
    }

    fn key(seed: u8) -> PrivateKey {
        PrivateKey::new([seed; 32], true)
    }

    fn collateral(tag: u8) -> OutPoint {
        OutPoint::new([tag; 32], 1)
    }

    fn proof_at(tag: u8, ping_time: i64) -> WitnessProof {
        let mn_key = key(tag);
        let outpoint = collateral(tag);
        let mut broadcast = MasternodeBroadcast {
            serviced_outpoint: outpoint,
            network_address: format!("192.0.2.{}:37817", tag).parse().unwrap(),
            masternode_pubkey: mn_key.public_key_bytes().unwrap(),
            sig_time: AT - 3_600,
            signature: Vec::new(),
        };
        broadcast.sign(&mn_key).unwrap();
        let mut ping = MasternodePing { serviced_outpoint: outpoint, sig_time: ping_time, signature: Vec::new() };
        ping.sign(&mn_key).unwrap();
        WitnessProof { ping, broadcast }
    }

    fn proof(tag: u8) -> WitnessProof {
        proof_at(tag, AT - 60)
    }

    fn funded_mempool(tags: &[u8]) -> Mempool {
        let pool = Mempool::new();
        for tag in tags {
            pool.add_coin(collateral(*tag), TxOutRaw { value: 3_000 * COIN, script_pubkey: vec![0x51] });
        }
        pool
    }

    fn signed_witness(proofs: Vec<WitnessProof>) -> MasterNodeWitness {
        let witness_key = key(200);
        let mut witness = MasterNodeWitness::new(1, AT, [0x42; 32], proofs);
        witness.witness_pubkey = witness_key.public_key_bytes().unwrap();
        witness.sign(&witness_key).unwrap();
        witness
    }

    fn check(proof: &WitnessProof, chain: &dyn ChainStateView, mempool: &dyn MempoolView) -> bool {
        proof.check_single(AT, chain, mempool, &WitnessParams::default())
    }

    #[test]
    fn extreme_check_times_do_not_overflow() {
        let params = WitnessParams::default();
        let pool = funded_mempool(&[1]);
        let latest = proof_at(1, i64::MAX);
        assert!(latest.check_single(i64::MAX, &StubChain::default(), &pool, &params));
        assert!(!proof(1).check_single(i64::MAX, &StubChain::default(), &pool, &params));
        assert!(!proof(1).check_single(i64::MIN, &StubChain::default(), &pool, &params));
        let earliest = proof_at(1, i64::MIN);
        assert!(earliest.check_single(i64::MIN, &StubChain::default(), &pool, &params));
    }

    #[test]
    fn signed_witness_verifies() {
        let witness = signed_witness(vec![proof(1), proof(2)]);
        assert_eq!(witness.signature.len(), crypto::COMPACT_SIGNATURE_SIZE);
        assert!(witness.signature_valid());
    }

    #[test]
    fn tampering_breaks_signature() {
        let mut witness = signed_witness(vec![proof(1), proof(2)]);
        witness.target_time += 1;
        assert!(!witness.signature_valid());

        let mut reordered = signed_witness(vec![proof(1), proof(2)]);
        reordered.proofs.swap(0, 1);
        assert!(!reordered.signature_valid());

        let mut block = signed_witness(vec![proof(1)]);
        block.target_block_hash[0] ^= 1;
        assert!(!block.signature_valid());
    }

    #[test]
    fn signature_and_key_are_not_hashed() {
        let witness = signed_witness(vec![proof(1)]);
        let mut other = witness.clone();
        other.signature.clear();
        other.witness_pubkey.clear();
        assert_eq!(witness.hash(), other.hash());
    }

    #[test]
    fn swapped_witness_key_fails() {
        let mut witness = signed_witness(vec![proof(1)]);
        witness.witness_pubkey = key(201).public_key_bytes().unwrap();
        assert!(!witness.signature_valid());
        witness.witness_pubkey = vec![1, 2, 3];
        assert!(!witness.signature_valid());
    }

    #[test]
    fn malformed_signature_fails() {
        let mut witness = signed_witness(vec![proof(1)]);
        witness.signature.truncate(64);
        assert!(!witness.signature_valid());
    }

    #[test]
    fn zero_key_leaves_signature_untouched() {
        let mut witness = signed_witness(vec![proof(1)]);
        let before = witness.signature.clone();
        let err = witness.sign(&PrivateKey::new([0; 32], true)).unwrap_err();
        assert!(matches!(err, SignError::SigningFailed(_)));
        assert_eq!(witness.signature, before);
    }

    #[test]
    fn valid_batch_passes() {
        let witness = signed_witness(vec![proof(1), proof(2), proof(3)]);
        let pool = funded_mempool(&[1, 2, 3]);
        assert!(witness.is_valid(AT, &StubChain::default(), &pool, &WitnessParams::default()));
    }

    #[test]
    fn empty_witness_is_valid() {
        let witness = signed_witness(Vec::new());
        assert!(witness.is_valid(AT, &StubChain::default(), &Mempool::new(), &WitnessParams::default()));
    }

    #[test]
    fn replayed_collateral_in_batch_fails() {
        let p = proof(1);
        let pool = funded_mempool(&[1]);
        assert!(check(&p, &StubChain::default(), &pool));
        let witness = signed_witness(vec![p.clone(), p]);
        assert!(witness.signature_valid());
        assert!(!witness.is_valid(AT, &StubChain::default(), &pool, &WitnessParams::default()));
    }

    #[test]
    fn ping_and_broadcast_must_share_collateral() {
        let mut p = proof(1);
        p.broadcast = proof(2).broadcast;
        assert!(!check(&p, &StubChain::default(), &funded_mempool(&[1, 2])));
    }

    #[test]
    fn temporal_window_is_inclusive() {
        let chain = StubChain::default();
        let pool = funded_mempool(&[1]);
        assert!(check(&proof_at(1, AT - MASTERNODE_REMOVAL_SECONDS), &chain, &pool));
        assert!(!check(&proof_at(1, AT - MASTERNODE_REMOVAL_SECONDS - 1), &chain, &pool));
        assert!(check(&proof_at(1, AT + MASTERNODE_PING_SECONDS), &chain, &pool));
        assert!(!check(&proof_at(1, AT + MASTERNODE_PING_SECONDS + 1), &chain, &pool));
    }

    #[test]
    fn forged_broadcast_fails() {
        let mut p = proof(1);
        // re-signed by someone other than the advertised masternode key
        p.broadcast.sign(&key(99)).unwrap();
        assert!(!check(&p, &StubChain::default(), &funded_mempool(&[1])));
    }

    #[test]
    fn ping_from_other_key_fails() {
        let mut p = proof(1);
        p.ping.sign(&key(99)).unwrap();
        assert!(!check(&p, &StubChain::default(), &funded_mempool(&[1])));
    }

    #[test]
    fn immature_collateral_fails() {
        let p = proof(1);
        let pool = funded_mempool(&[1]);
        let tx = collateral(1).hash;

        // confirmation block (height 2 + 14) is later than the reference time
        let mut times: Vec<i64> = (0..20).map(|i| AT - 500 + i * 60).collect();
        assert!(times[16] > AT);
        assert!(!check(&p, &StubChain::with_blocks(&times, tx, 2), &pool));

        // exactly at the reference time is fine
        times[16] = AT;
        assert!(check(&p, &StubChain::with_blocks(&times, tx, 2), &pool));

        // confirmation block not on the active chain yet: skipped
        assert!(check(&p, &StubChain::with_blocks(&times[..16], tx, 2), &pool));
    }

    #[test]
    fn unknown_collateral_tx_skips_maturity() {
        let times: Vec<i64> = (0..20).map(|i| AT + i).collect();
        let chain = StubChain::with_blocks(&times, [0xee; 32], 0);
        assert!(check(&proof(1), &chain, &funded_mempool(&[1])));
    }

    #[test]
    fn spent_collateral_fails() {
        let p = proof(1);
        assert!(!check(&p, &StubChain::default(), &Mempool::new()));

        let pool = funded_mempool(&[1]);
        pool.spend_coin(&collateral(1));
        assert!(!check(&p, &StubChain::default(), &pool));
    }

    #[test]
    fn busy_mempool_skips_spendability() {
        assert!(check(&proof(1), &StubChain::default(), &BusyMempool));
    }

    #[test]
    fn probe_pays_configured_amount() {
        let params = WitnessParams { collateral_amount: 5 * COIN, collateral_pool_script: vec![0x51] };
        let tx = build_collateral_probe_tx(&collateral(4), &params);
        assert_eq!(tx.vin.len(), 1);
        assert_eq!(tx.vin[0].prev_outpoint(), collateral(4));
        assert_eq!(tx.vin[0].sequence, u32::MAX);
        assert!(tx.vin[0].script_sig.is_empty());
        assert_eq!(tx.vout, vec![TxOutRaw { value: 5 * COIN, script_pubkey: vec![0x51] }]);

        // a coin worth less than the probe amount makes the collateral look unusable
        let pool = Mempool::new();
        pool.add_coin(collateral(1), TxOutRaw { value: COIN, script_pubkey: vec![0x51] });
        assert!(!check(&proof(1), &StubChain::default(), &pool));
    }

    #[test]
    fn display_and_summary() {
        let witness = signed_witness(vec![proof(1)]);
        let text = witness.to_string();
        assert!(text.starts_with("MasterNodeWitness(target time=2020-09-13 12:26:40"));
        assert!(text.contains("count proofs=1"));
        assert!(text.contains("192.0.2.1:37817"));

        let json = serde_json::to_value(witness.summary()).unwrap();
        assert_eq!(json["proofCount"], 1);
        assert_eq!(json["signatureValid"], true);
        assert_eq!(json["targetBlockHash"], hex::encode([0x42u8; 32]));
        assert_eq!(json["proofs"][0]["collateralIndex"], 1);
    }

    #[test]
    fn p2pkh_layout() {
        let script = p2pkh_script(&KeyId([7; 20]));
        assert_eq!(script.len(), 25);
        assert_eq!(&script[..3], &[0x76, 0xa9, 0x14]);
        assert_eq!(&script[23..], &[0x88, 0xac]);
    }
}
