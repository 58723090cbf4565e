use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use twins_witness::blockchain::ChainState;
use twins_witness::config::{WitnessSettings, DEFAULT_CONFIG_FILE};
use twins_witness::crypto::PrivateKey;
use twins_witness::error::NodeError;
use twins_witness::p2p::messages::{deserialize_exact, serialize, MasterNodeWitness};
use twins_witness::storage::{BlockStorage, SqliteBlockStorage};

#[derive(Parser, Debug)]
#[command(name = "twins_witness", author, version)]
#[command(about = "Inspect and sign TWINS masternode witnesses", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (TOML, optional)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Show the configured network and the stored chain tip
    Status,

    /// Decode a witness and print it with its JSON summary
    Inspect {
        /// Wire-encoded witness (hex)
        witness_hex: String,
    },

    /// Re-sign a witness with a witness key and print the new encoding
    Sign {
        /// Private key (32 bytes hex)
        key_hex: String,

        /// Wire-encoded witness (hex)
        witness_hex: String,

        /// Use the uncompressed public key encoding
        #[arg(long)]
        uncompressed: bool,
    },
}

fn decode_witness(witness_hex: &str) -> Result<MasterNodeWitness, NodeError> {
    let bytes = hex::decode(witness_hex.trim())?;
    Ok(deserialize_exact::<MasterNodeWitness>(&bytes)?)
}

fn status(settings: &WitnessSettings) -> Result<(), NodeError> {
    let storage: Arc<dyn BlockStorage> = Arc::new(SqliteBlockStorage::new(&settings.db_path)?);
    let chain = ChainState::new(storage)?;
    let params = settings.witness_params()?;
    println!("network: {}", settings.network);
    println!("database: {}", settings.db_path);
    match chain.tip() {
        Some(tip) => println!("chain tip: {} at height {}", hex::encode(tip.hash), tip.height),
        None => println!("chain tip: none"),
    }
    println!("probe amount: {}", params.collateral_amount);
    println!("probe script: {}", hex::encode(&params.collateral_pool_script));
    Ok(())
}

fn inspect(witness_hex: &str) -> Result<(), NodeError> {
    let witness = decode_witness(witness_hex)?;
    print!("{}", witness);
    let summary = serde_json::to_string_pretty(&witness.summary())
        .map_err(|e| NodeError::Encoding(e.into()))?;
    println!("{}", summary);
    Ok(())
}

fn sign(key_hex: &str, witness_hex: &str, compressed: bool) -> Result<(), NodeError> {
    let key = PrivateKey::from_hex(key_hex, compressed)?;
    let mut witness = decode_witness(witness_hex)?;
    witness.witness_pubkey = key
        .public_key_bytes()
        .ok_or_else(|| NodeError::InvalidKey("not a valid secp256k1 secret".to_string()))?;
    witness.sign(&key)?;
    log::info!("Signed witness {} as {}", hex::encode(witness.hash()), witness.witness_key_id());
    println!("{}", hex::encode(serialize(&witness)?));
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let settings = match WitnessSettings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load settings from {}: {}", cli.config, e);
            return ExitCode::FAILURE;
        }
    };
    log::debug!("Settings: {:?}", settings);

    let result = match &cli.command {
        Command::Status => status(&settings),
        Command::Inspect { witness_hex } => inspect(witness_hex),
        Command::Sign { key_hex, witness_hex, uncompressed } => sign(key_hex, witness_hex, !uncompressed),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
