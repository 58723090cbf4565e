use thiserror::Error;

/// Failure to produce a signature. The object being signed is left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Errors of the node plumbing around the witness core: storage, config,
/// chain bookkeeping. Validation outcomes are never reported through this type.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("block {block} does not extend the active chain tip")]
    OrphanBlock { block: String },

    #[error("chain is empty")]
    EmptyChain,

    #[error("mempool rejected transaction {txid}: {reason}")]
    MempoolRejected { txid: String, reason: String },

    #[error(transparent)]
    Sign(#[from] SignError),
}
