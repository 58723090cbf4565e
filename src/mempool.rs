// Minimal coin view and transaction pool. Witness validation only needs to ask
// "would this spend be accepted right now?", and must never wait for the answer.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use crate::error::NodeError;
use crate::p2p::messages::{OutPoint, TransactionData, TxOutRaw};

/// A read snapshot of the pool, held while a guard is alive.
pub trait MempoolGuard {
    fn would_accept(&self, tx: &TransactionData) -> bool;
}

pub trait MempoolView: Send + Sync {
    /// Non-blocking. `None` when the pool is busy (or unusable); callers skip
    /// whatever they wanted to check instead of waiting.
    fn try_lock(&self) -> Option<Box<dyn MempoolGuard + '_>>;
}

#[derive(Debug, Default)]
struct PoolState {
    // Unspent outputs known to the node (chain coins plus pool outputs).
    coins: HashMap<OutPoint, TxOutRaw>,
    // Outpoint -> txid of the pool transaction spending it.
    spent_by_pool: HashMap<OutPoint, [u8; 32]>,
    transactions: HashMap<[u8; 32], TransactionData>,
}

impl PoolState {
    fn check_acceptable(&self, tx: &TransactionData) -> Result<(), String> {
        if tx.vin.is_empty() {
            return Err("no inputs".to_string());
        }
        if tx.vout.is_empty() {
            return Err("no outputs".to_string());
        }
        let mut value_out: i64 = 0;
        for txout in &tx.vout {
            if txout.value < 0 {
                return Err("negative output value".to_string());
            }
            value_out = value_out
                .checked_add(txout.value)
                .ok_or_else(|| "output value overflow".to_string())?;
        }

        let mut value_in: i64 = 0;
        for txin in &tx.vin {
            let prevout = txin.prev_outpoint();
            if let Some(spender) = self.spent_by_pool.get(&prevout) {
                return Err(format!("{} already spent by {}", prevout, hex::encode(spender)));
            }
            let coin = self
                .coins
                .get(&prevout)
                .ok_or_else(|| format!("missing input {}", prevout))?;
            value_in = value_in
                .checked_add(coin.value)
                .ok_or_else(|| "input value overflow".to_string())?;
        }

        if value_in < value_out {
            return Err(format!("value in {} below value out {}", value_in, value_out));
        }
        Ok(())
    }
}

struct PoolReadGuard<'a> {
    state: RwLockReadGuard<'a, PoolState>,
}

impl MempoolGuard for PoolReadGuard<'_> {
    fn would_accept(&self, tx: &TransactionData) -> bool {
        match self.state.check_acceptable(tx) {
            Ok(()) => true,
            Err(reason) => {
                log::debug!("Mempool would reject {}: {}", hex::encode(tx.get_txid()), reason);
                false
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Mempool {
    state: RwLock<PoolState>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an unspent output (typically from a connected block).
    pub fn add_coin(&self, outpoint: OutPoint, txout: TxOutRaw) {
        self.write_state().coins.insert(outpoint, txout);
    }

    /// Removes a coin spent on chain. Returns the coin if it was known.
    pub fn spend_coin(&self, outpoint: &OutPoint) -> Option<TxOutRaw> {
        let mut state = self.write_state();
        state.spent_by_pool.remove(outpoint);
        state.coins.remove(outpoint)
    }

    pub fn add_transaction(&self, tx: TransactionData) -> Result<[u8; 32], NodeError> {
        let txid = tx.get_txid();
        let mut state = self.write_state();
        if state.transactions.contains_key(&txid) {
            return Err(NodeError::MempoolRejected { txid: hex::encode(txid), reason: "already in pool".to_string() });
        }
        state
            .check_acceptable(&tx)
            .map_err(|reason| NodeError::MempoolRejected { txid: hex::encode(txid), reason })?;

        for txin in &tx.vin {
            state.spent_by_pool.insert(txin.prev_outpoint(), txid);
        }
        for (n, txout) in tx.vout.iter().enumerate() {
            state.coins.insert(OutPoint::new(txid, n as u32), txout.clone());
        }
        state.transactions.insert(txid, tx);
        log::debug!("Accepted {} into mempool", hex::encode(txid));
        Ok(txid)
    }
}

impl MempoolView for Mempool {
    fn try_lock(&self) -> Option<Box<dyn MempoolGuard + '_>> {
        match self.state.try_read() {
            Ok(state) => Some(Box::new(PoolReadGuard { state })),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => {
                log::warn!("Mempool lock poisoned; skipping pool checks");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::messages::TxInRaw;

    fn coin(value: i64) -> TxOutRaw {
        TxOutRaw { value, script_pubkey: vec![0x51] }
    }

    fn spend(outpoint: OutPoint, value: i64) -> TransactionData {
        TransactionData {
            version: 1,
            vin: vec![TxInRaw::spending(&outpoint)],
            vout: vec![coin(value)],
            lock_time: 0,
        }
    }

    fn accepts(pool: &Mempool, tx: &TransactionData) -> bool {
        pool.try_lock().expect("uncontended").would_accept(tx)
    }

    #[test]
    fn accepts_spend_of_known_coin() {
        let pool = Mempool::new();
        let op = OutPoint::new([1; 32], 0);
        pool.add_coin(op, coin(1_000));
        assert!(accepts(&pool, &spend(op, 900)));
        assert!(accepts(&pool, &spend(op, 1_000)));
        assert!(!accepts(&pool, &spend(op, 1_001)));
        assert!(!accepts(&pool, &spend(OutPoint::new([2; 32], 0), 1)));
    }

    #[test]
    fn rejects_structurally_bad_transactions() {
        let pool = Mempool::new();
        let op = OutPoint::new([1; 32], 0);
        pool.add_coin(op, coin(1_000));
        let mut no_outputs = spend(op, 1);
        no_outputs.vout.clear();
        assert!(!accepts(&pool, &no_outputs));
        let no_inputs = TransactionData { vin: Vec::new(), ..spend(op, 1) };
        assert!(!accepts(&pool, &no_inputs));
        assert!(!accepts(&pool, &spend(op, -1)));
    }

    #[test]
    fn pool_spend_conflicts() {
        let pool = Mempool::new();
        let op = OutPoint::new([1; 32], 0);
        pool.add_coin(op, coin(1_000));
        let first = spend(op, 500);
        let txid = pool.add_transaction(first.clone()).unwrap();
        assert_eq!(txid, first.get_txid());

        assert!(!accepts(&pool, &spend(op, 400)));
        assert!(matches!(pool.add_transaction(spend(op, 400)), Err(NodeError::MempoolRejected { .. })));
        assert!(matches!(pool.add_transaction(first), Err(NodeError::MempoolRejected { .. })));

        // the pool output itself is spendable
        assert!(accepts(&pool, &spend(OutPoint::new(txid, 0), 500)));
    }

    #[test]
    fn chain_spent_coin_is_gone() {
        let pool = Mempool::new();
        let op = OutPoint::new([3; 32], 1);
        pool.add_coin(op, coin(10));
        assert!(pool.spend_coin(&op).is_some());
        assert!(!accepts(&pool, &spend(op, 1)));
    }

    #[test]
    fn try_lock_does_not_wait_for_writer() {
        let pool = Mempool::new();
        let _writer = pool.state.write().unwrap();
        assert!(pool.try_lock().is_none());
    }

    #[test]
    fn readers_share_the_pool() {
        let pool = Mempool::new();
        let first = pool.try_lock();
        assert!(first.is_some());
        assert!(pool.try_lock().is_some());
    }
}
