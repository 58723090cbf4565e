// Protocol constants shared by the witness and masternode code.

#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network_id_string: &'static str,
    // Collateral locked by a masternode, in satoshis.
    pub masternode_collateral: i64,
}

pub const COIN: i64 = 100_000_000;

pub const MAINNET_PARAMS: ChainParams = ChainParams {
    network_id_string: "mainnet",
    masternode_collateral: 3_000 * COIN,
};

pub const TESTNET_PARAMS: ChainParams = ChainParams {
    network_id_string: "testnet",
    masternode_collateral: 3_000 * COIN,
};

pub fn params_for_network(network: &str) -> Option<&'static ChainParams> {
    match network {
        "mainnet" | "main" => Some(&MAINNET_PARAMS),
        "testnet" | "test" => Some(&TESTNET_PARAMS),
        _ => None,
    }
}

// Masternode timing (seconds)
pub const MASTERNODE_MIN_CONFIRMATIONS: u32 = 15;
pub const MASTERNODE_PING_SECONDS: i64 = 5 * 60;
pub const MASTERNODE_REMOVAL_SECONDS: i64 = 130 * 60;

// Amount paid by the synthetic spend used to probe an unspent collateral:
// the collateral minus a 0.01 coin fee.
pub const WITNESS_PROBE_FEE: i64 = COIN / 100;
pub const DEFAULT_WITNESS_COLLATERAL_AMOUNT: i64 = MAINNET_PARAMS.masternode_collateral - WITNESS_PROBE_FEE;

pub const WITNESS_VERSION: u32 = 1;
pub const MAX_WITNESS_PROOFS: u64 = 5_000;

// Prefix of every signed masternode message (ping, broadcast).
pub const MESSAGE_MAGIC: &str = "DarkNet Signed Message:\n";
