//! Hashing and compact recoverable ECDSA signatures.
//!
//! Signatures use the 65-byte "compact" layout: a header byte
//! `27 + recovery_id (+ 4 when the key is compressed)` followed by `r || s`.
//! Callers only see byte slices and [`KeyId`]s, never secp256k1 types.

use std::fmt;
use std::io::Write;

use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message as SecpMessage, PublicKey, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};

use crate::chainparams::MESSAGE_MAGIC;
use crate::error::SignError;
use crate::p2p::messages::write_var_int;

pub const COMPACT_SIGNATURE_SIZE: usize = 65;

pub fn hash256(data: &[u8]) -> [u8; 32] {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);
    second_hash.into()
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Identity of a public key: Hash160 of its serialization. A compressed and an
/// uncompressed encoding of the same point have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub [u8; 20]);

impl KeyId {
    pub fn from_pubkey_bytes(pubkey: &[u8]) -> Self {
        KeyId(hash160(pubkey))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Raw private key material. Validity is only checked when the key is used,
/// so an invalid key surfaces as a signing failure.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    bytes: [u8; 32],
    compressed: bool,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bytes", &"<redacted>")
            .field("compressed", &self.compressed)
            .finish()
    }
}

impl PrivateKey {
    pub fn new(bytes: [u8; 32], compressed: bool) -> Self {
        PrivateKey { bytes, compressed }
    }

    pub fn from_hex(hex_str: &str, compressed: bool) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str.trim(), &mut bytes)?;
        Ok(PrivateKey::new(bytes, compressed))
    }

    pub fn is_valid(&self) -> bool {
        SecretKey::from_slice(&self.bytes).is_ok()
    }

    fn secret_key(&self) -> Result<SecretKey, SignError> {
        SecretKey::from_slice(&self.bytes)
            .map_err(|e| SignError::SigningFailed(format!("invalid private key: {}", e)))
    }

    /// Serialized public key (33 bytes compressed, 65 uncompressed), or None
    /// for invalid key material.
    pub fn public_key_bytes(&self) -> Option<Vec<u8>> {
        let secret = SecretKey::from_slice(&self.bytes).ok()?;
        let public = PublicKey::from_secret_key_global(&secret);
        Some(serialize_pubkey(&public, self.compressed))
    }

    pub fn key_id(&self) -> Option<KeyId> {
        self.public_key_bytes().map(|pk| KeyId::from_pubkey_bytes(&pk))
    }
}

fn serialize_pubkey(public: &PublicKey, compressed: bool) -> Vec<u8> {
    if compressed {
        public.serialize().to_vec()
    } else {
        public.serialize_uncompressed().to_vec()
    }
}

pub fn sign_compact(hash: &[u8; 32], key: &PrivateKey) -> Result<Vec<u8>, SignError> {
    let secret = key.secret_key()?;
    let message = SecpMessage::from_digest_slice(hash)
        .map_err(|e| SignError::SigningFailed(format!("bad message digest: {}", e)))?;
    let signature = SECP256K1.sign_ecdsa_recoverable(&message, &secret);
    let (recovery_id, rs) = signature.serialize_compact();

    let mut header = 27 + recovery_id.to_i32() as u8;
    if key.compressed {
        header += 4;
    }
    let mut out = Vec::with_capacity(COMPACT_SIGNATURE_SIZE);
    out.push(header);
    out.extend_from_slice(&rs);
    Ok(out)
}

/// Recovers the serialized public key (in the encoding selected by the header
/// byte) that produced `signature` over `hash`.
pub fn recover_compact(hash: &[u8; 32], signature: &[u8]) -> Option<Vec<u8>> {
    if signature.len() != COMPACT_SIGNATURE_SIZE {
        return None;
    }
    let header = signature[0];
    if !(27..=34).contains(&header) {
        return None;
    }
    let compressed = (header - 27) & 4 != 0;
    let recovery_id = RecoveryId::from_i32(((header - 27) & 3) as i32).ok()?;
    let recoverable = RecoverableSignature::from_compact(&signature[1..], recovery_id).ok()?;
    let message = SecpMessage::from_digest_slice(hash).ok()?;
    let public = SECP256K1.recover_ecdsa(&message, &recoverable).ok()?;
    Some(serialize_pubkey(&public, compressed))
}

pub fn recover_identity(hash: &[u8; 32], signature: &[u8]) -> Option<KeyId> {
    recover_compact(hash, signature).map(|pk| KeyId::from_pubkey_bytes(&pk))
}

/// Checks that `pubkey` parses as a secp256k1 point.
pub fn is_valid_pubkey(pubkey: &[u8]) -> bool {
    PublicKey::from_slice(pubkey).is_ok()
}

fn write_message_string(writer: &mut Vec<u8>, s: &str) -> std::io::Result<()> {
    write_var_int(writer, s.len() as u64)?;
    writer.write_all(s.as_bytes())
}

/// Digest of a human-readable signed message, prefixed with [`MESSAGE_MAGIC`].
pub fn message_hash(message: &str) -> [u8; 32] {
    let mut buf = Vec::with_capacity(MESSAGE_MAGIC.len() + message.len() + 10);
    // Writes into a Vec cannot fail.
    let _ = write_message_string(&mut buf, MESSAGE_MAGIC);
    let _ = write_message_string(&mut buf, message);
    hash256(&buf)
}

pub fn sign_message(message: &str, key: &PrivateKey) -> Result<Vec<u8>, SignError> {
    sign_compact(&message_hash(message), key)
}

/// True when `signature` over `message` recovers to the same key id as `pubkey`.
pub fn verify_message(pubkey: &[u8], signature: &[u8], message: &str) -> bool {
    match recover_identity(&message_hash(message), signature) {
        Some(recovered) => recovered == KeyId::from_pubkey_bytes(pubkey),
        None => false,
    }
}
