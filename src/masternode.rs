// Signature rules for masternode pings and broadcasts.
//
// Both are signed with the node's signed-message scheme (see crypto::sign_message):
// a compact recoverable signature over MESSAGE_MAGIC + message text, checked by
// comparing the recovered key id with the expected key.

use crate::crypto::{self, PrivateKey};
use crate::error::SignError;
use crate::p2p::messages::{MasternodeBroadcast, MasternodePing};

// Anti-abuse scores handed back to the peer layer.
pub const DOS_SCORE_BAD_SIGNATURE: u32 = 33;
pub const DOS_SCORE_BAD_PUBKEY: u32 = 100;

/// Outcome of checking a ping signature. A ping is only acceptable when it
/// verified *and* carries no anti-abuse score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingVerification {
    pub verified: bool,
    pub dos_score: u32,
}

impl PingVerification {
    pub fn is_clean(&self) -> bool {
        self.verified && self.dos_score == 0
    }
}

impl MasternodePing {
    pub fn signature_message(&self) -> String {
        format!("{}{}", self.serviced_outpoint, self.sig_time)
    }

    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), SignError> {
        let signature = crypto::sign_message(&self.signature_message(), key)?;
        self.signature = signature;
        Ok(())
    }

    pub fn verify_signature(&self, pubkey_masternode: &[u8]) -> PingVerification {
        if !crypto::is_valid_pubkey(pubkey_masternode) {
            log::debug!(
                target: "witness",
                "MasternodePing::verify_signature - unparsable masternode key for {}",
                self.serviced_outpoint
            );
            return PingVerification { verified: false, dos_score: DOS_SCORE_BAD_PUBKEY };
        }
        if crypto::verify_message(pubkey_masternode, &self.signature, &self.signature_message()) {
            PingVerification { verified: true, dos_score: 0 }
        } else {
            log::debug!(
                target: "witness",
                "MasternodePing::verify_signature - got bad ping signature for {}",
                self.serviced_outpoint
            );
            PingVerification { verified: false, dos_score: DOS_SCORE_BAD_SIGNATURE }
        }
    }
}

impl MasternodeBroadcast {
    pub fn signature_message(&self) -> String {
        format!(
            "{}{}{}{}",
            self.network_address,
            self.sig_time,
            hex::encode(&self.masternode_pubkey),
            self.serviced_outpoint
        )
    }

    /// Signs the announcement; `key` must be the masternode key advertised
    /// in `masternode_pubkey` for the result to verify.
    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), SignError> {
        let signature = crypto::sign_message(&self.signature_message(), key)?;
        self.signature = signature;
        Ok(())
    }

    pub fn verify_signature(&self) -> bool {
        let ok = crypto::verify_message(&self.masternode_pubkey, &self.signature, &self.signature_message());
        if !ok {
            log::debug!(
                target: "witness",
                "MasternodeBroadcast::verify_signature - bad signature for {} at {}",
                self.serviced_outpoint,
                self.network_address
            );
        }
        ok
    }
}
