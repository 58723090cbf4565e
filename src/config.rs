//! Runtime settings for the witness node.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `TWINS_WITNESS_*` environment variables (e.g.
//! `TWINS_WITNESS_NETWORK=testnet`).
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::chainparams::{params_for_network, WITNESS_PROBE_FEE};
use crate::error::NodeError;
use crate::witness::WitnessParams;

pub const DEFAULT_CONFIG_FILE: &str = "twins_witness.toml";
pub const ENV_PREFIX: &str = "TWINS_WITNESS";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WitnessSettings {
    /// "mainnet" or "testnet" (default: mainnet)
    pub network: String,

    /// SQLite block index (default: twins_witness_data.sqlite)
    pub db_path: String,

    /// Probe amount in satoshis. Unset: network collateral less the probe fee.
    pub collateral_amount: Option<i64>,

    /// Hex script the probe pays to. Unset: P2PKH to the all-zero key id.
    pub collateral_pool_script: Option<String>,
}

impl Default for WitnessSettings {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            db_path: "twins_witness_data.sqlite".to_string(),
            collateral_amount: None,
            collateral_pool_script: None,
        }
    }
}

impl WitnessSettings {
    /// Loads `config_file` (may be absent) and the environment on top of defaults.
    pub fn load(config_file: &str) -> Result<Self, NodeError> {
        let settings = Config::builder()
            .add_source(File::with_name(config_file).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, NodeError> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn witness_params(&self) -> Result<WitnessParams, NodeError> {
        let chain = params_for_network(&self.network)
            .ok_or_else(|| NodeError::UnknownNetwork(self.network.clone()))?;
        let defaults = WitnessParams::default();
        let collateral_amount = self
            .collateral_amount
            .unwrap_or(chain.masternode_collateral - WITNESS_PROBE_FEE);
        let collateral_pool_script = match &self.collateral_pool_script {
            Some(script_hex) => hex::decode(script_hex.trim())?,
            None => defaults.collateral_pool_script,
        };
        Ok(WitnessParams { collateral_amount, collateral_pool_script })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::{COIN, DEFAULT_WITNESS_COLLATERAL_AMOUNT};

    #[test]
    fn defaults_give_default_params() {
        let settings = WitnessSettings::default();
        assert_eq!(settings.witness_params().unwrap(), WitnessParams::default());
    }

    #[test]
    fn toml_overrides() {
        let settings = WitnessSettings::from_toml_str(
            r#"
            network = "testnet"
            collateral_amount = 1000000000
            collateral_pool_script = "51"
            "#,
        )
        .unwrap();
        assert_eq!(settings.db_path, WitnessSettings::default().db_path);
        let params = settings.witness_params().unwrap();
        assert_eq!(params.collateral_amount, 10 * COIN);
        assert_eq!(params.collateral_pool_script, vec![0x51]);
    }

    #[test]
    fn partial_toml_keeps_network_default_amount() {
        let settings = WitnessSettings::from_toml_str("db_path = \"/tmp/w.sqlite\"").unwrap();
        assert_eq!(settings.db_path, "/tmp/w.sqlite");
        assert_eq!(settings.witness_params().unwrap().collateral_amount, DEFAULT_WITNESS_COLLATERAL_AMOUNT);
    }

    #[test]
    fn unknown_network_and_bad_script_are_errors() {
        let settings = WitnessSettings { network: "regtest".to_string(), ..Default::default() };
        assert!(matches!(settings.witness_params(), Err(NodeError::UnknownNetwork(_))));

        let settings = WitnessSettings { collateral_pool_script: Some("zz".to_string()), ..Default::default() };
        assert!(matches!(settings.witness_params(), Err(NodeError::Hex(_))));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let settings = WitnessSettings::load("/nonexistent/twins_witness_settings").unwrap();
        assert!(!settings.network.is_empty());
    }
}
