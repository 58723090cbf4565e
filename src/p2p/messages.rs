// twins_witness/src/p2p/messages.rs
// Wire structures and their consensus encoding (little-endian, CompactSize lengths).
use std::fmt;
use std::io::{Cursor, Error as IoError, ErrorKind as IoErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::chainparams::MAX_WITNESS_PROOFS;
use crate::crypto::hash256;

pub const MAX_VAR_BYTES: u64 = 2 * 1024 * 1024;

pub trait Encodable {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, w: &mut W) -> Result<usize, IoError>;
}
pub trait Decodable: Sized {
    fn consensus_decode<R: Read + ReadBytesExt>(r: &mut R) -> Result<Self, IoError>;
}

pub fn serialize<T: Encodable>(item: &T) -> Result<Vec<u8>, IoError> {
    let mut bytes = Vec::new();
    item.consensus_encode(&mut Cursor::new(&mut bytes))?;
    Ok(bytes)
}

/// Decodes `T` and requires the whole buffer to be consumed.
pub fn deserialize_exact<T: Decodable>(bytes: &[u8]) -> Result<T, IoError> {
    let mut cursor = Cursor::new(bytes);
    let item = T::consensus_decode(&mut cursor)?;
    if cursor.position() != bytes.len() as u64 {
        return Err(IoError::new(
            IoErrorKind::InvalidData,
            format!("{} trailing bytes after payload", bytes.len() as u64 - cursor.position()),
        ));
    }
    Ok(item)
}

pub fn write_var_int<W: Write + WriteBytesExt>(w: &mut W, n: u64) -> Result<usize, IoError> {
    if n < 0xfd {
        w.write_u8(n as u8)?;
        Ok(1)
    } else if n <= 0xffff {
        w.write_u8(0xfd)?;
        w.write_u16::<LittleEndian>(n as u16)?;
        Ok(3)
    } else if n <= 0xffff_ffff {
        w.write_u8(0xfe)?;
        w.write_u32::<LittleEndian>(n as u32)?;
        Ok(5)
    } else {
        w.write_u8(0xff)?;
        w.write_u64::<LittleEndian>(n)?;
        Ok(9)
    }
}

pub fn read_var_int<R: Read + ReadBytesExt>(r: &mut R) -> Result<u64, IoError> {
    match r.read_u8()? {
        0xff => r.read_u64::<LittleEndian>(),
        0xfe => r.read_u32::<LittleEndian>().map(|x| x as u64),
        0xfd => r.read_u16::<LittleEndian>().map(|x| x as u64),
        n => Ok(n as u64),
    }
}

pub fn write_var_bytes<W: Write + WriteBytesExt>(w: &mut W, b: &[u8]) -> Result<usize, IoError> {
    let written = write_var_int(w, b.len() as u64)?;
    w.write_all(b)?;
    Ok(written + b.len())
}

pub fn read_var_bytes<R: Read + ReadBytesExt>(r: &mut R) -> Result<Vec<u8>, IoError> {
    let len = read_var_int(r)?;
    if len > MAX_VAR_BYTES {
        return Err(IoError::new(IoErrorKind::InvalidData, "VarBytes too long"));
    }
    let mut buf = vec![0; len as usize];
    if len > 0 {
        r.read_exact(&mut buf)?;
    }
    Ok(buf)
}

fn read_hash<R: Read>(r: &mut R) -> Result<[u8; 32], IoError> {
    let mut hash = [0u8; 32];
    r.read_exact(&mut hash)?;
    Ok(hash)
}

// CService layout: 16-byte IPv6 (IPv4 is v4-mapped) followed by a big-endian port.
pub fn write_service<W: Write + WriteBytesExt>(w: &mut W, addr: &SocketAddr) -> Result<usize, IoError> {
    let ip_bytes = match addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    };
    w.write_all(&ip_bytes)?;
    w.write_u16::<BigEndian>(addr.port())?;
    Ok(18)
}

pub fn read_service<R: Read + ReadBytesExt>(r: &mut R) -> Result<SocketAddr, IoError> {
    let mut ip = [0u8; 16];
    r.read_exact(&mut ip)?;
    let port = r.read_u16::<BigEndian>()?;
    let ip_addr = if ip[0..12] == [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff] {
        IpAddr::V4(Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]))
    } else {
        IpAddr::V6(Ipv6Addr::from(ip))
    };
    Ok(SocketAddr::new(ip_addr, port))
}

/// Reference to a transaction output; for masternodes, the collateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub hash: [u8; 32],
    pub n: u32,
}

impl OutPoint {
    pub fn new(hash: [u8; 32], n: u32) -> Self {
        OutPoint { hash, n }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COutPoint({}, {})", hex::encode(self.hash), self.n)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, writer: &mut W) -> Result<usize, IoError> {
        writer.write_all(&self.hash)?;
        writer.write_u32::<LittleEndian>(self.n)?;
        Ok(36)
    }
}
impl Decodable for OutPoint {
    fn consensus_decode<R: Read + ReadBytesExt>(reader: &mut R) -> Result<Self, IoError> {
        let hash = read_hash(reader)?;
        let n = reader.read_u32::<LittleEndian>()?;
        Ok(OutPoint { hash, n })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInRaw {
    pub prev_out_hash: [u8; 32],
    pub prev_out_n: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}
impl TxInRaw {
    /// Unsigned input spending `outpoint`, final sequence.
    pub fn spending(outpoint: &OutPoint) -> Self {
        TxInRaw {
            prev_out_hash: outpoint.hash,
            prev_out_n: outpoint.n,
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }
    }
    pub fn prev_outpoint(&self) -> OutPoint {
        OutPoint::new(self.prev_out_hash, self.prev_out_n)
    }
}
impl Encodable for TxInRaw {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut written = 0;
        writer.write_all(&self.prev_out_hash)?;
        written += 32;
        writer.write_u32::<LittleEndian>(self.prev_out_n)?;
        written += 4;
        written += write_var_bytes(writer, &self.script_sig)?;
        writer.write_u32::<LittleEndian>(self.sequence)?;
        written += 4;
        Ok(written)
    }
}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutRaw {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}
impl Encodable for TxOutRaw {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, writer: &mut W) -> Result<usize, IoError> {
        writer.write_i64::<LittleEndian>(self.value)?;
        Ok(8 + write_var_bytes(writer, &self.script_pubkey)?)
    }
}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionData {
    pub version: i32,
    pub vin: Vec<TxInRaw>,
    pub vout: Vec<TxOutRaw>,
    pub lock_time: u32,
}
impl TransactionData {
    pub fn get_txid(&self) -> [u8; 32] {
        let mut bytes = Vec::new();
        // Encoding a transaction into a Vec cannot fail.
        let _ = self.consensus_encode(&mut Cursor::new(&mut bytes));
        hash256(&bytes)
    }
}
impl Encodable for TransactionData {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, w: &mut W) -> Result<usize, IoError> {
        let mut written = 0;
        w.write_i32::<LittleEndian>(self.version)?;
        written += 4;
        written += write_var_int(w, self.vin.len() as u64)?;
        for txin in &self.vin {
            written += txin.consensus_encode(w)?;
        }
        written += write_var_int(w, self.vout.len() as u64)?;
        for txout in &self.vout {
            written += txout.consensus_encode(w)?;
        }
        w.write_u32::<LittleEndian>(self.lock_time)?;
        written += 4;
        Ok(written)
    }
}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeaderData {
    pub version: i32,
    pub prev_block_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    // Present from header version 4 on.
    pub accumulator_checkpoint: Option<[u8; 32]>,
}
impl BlockHeaderData {
    pub fn get_hash(&self) -> [u8; 32] {
        let mut bytes = Vec::with_capacity(112);
        // Only the v4 accumulator consistency check can fail; hash what we have.
        let _ = self.write_fields(&mut bytes);
        hash256(&bytes)
    }

    fn write_fields<W: Write + WriteBytesExt>(&self, w: &mut W) -> Result<usize, IoError> {
        let mut written = 0;
        w.write_i32::<LittleEndian>(self.version)?;
        written += 4;
        w.write_all(&self.prev_block_hash)?;
        written += 32;
        w.write_all(&self.merkle_root)?;
        written += 32;
        w.write_u32::<LittleEndian>(self.timestamp)?;
        w.write_u32::<LittleEndian>(self.bits)?;
        w.write_u32::<LittleEndian>(self.nonce)?;
        written += 12;
        if self.version > 3 {
            if let Some(checkpoint) = &self.accumulator_checkpoint {
                w.write_all(checkpoint)?;
                written += 32;
            }
        }
        Ok(written)
    }
}
impl Encodable for BlockHeaderData {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, w: &mut W) -> Result<usize, IoError> {
        match (self.version > 3, self.accumulator_checkpoint.is_some()) {
            (true, false) => Err(IoError::new(IoErrorKind::InvalidInput, "AccOpt missing for v>3 header")),
            (false, true) => Err(IoError::new(IoErrorKind::InvalidInput, "AccOpt present for v<=3 header")),
            _ => self.write_fields(w),
        }
    }
}
impl Decodable for BlockHeaderData {
    fn consensus_decode<R: Read + ReadBytesExt>(r: &mut R) -> Result<Self, IoError> {
        let version = r.read_i32::<LittleEndian>()?;
        let prev_block_hash = read_hash(r)?;
        let merkle_root = read_hash(r)?;
        let timestamp = r.read_u32::<LittleEndian>()?;
        let bits = r.read_u32::<LittleEndian>()?;
        let nonce = r.read_u32::<LittleEndian>()?;
        let accumulator_checkpoint = if version > 3 { Some(read_hash(r)?) } else { None };
        Ok(BlockHeaderData {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
            accumulator_checkpoint,
        })
    }
}

/// Masternode liveness heartbeat for one collateral outpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasternodePing {
    pub serviced_outpoint: OutPoint,
    pub sig_time: i64,
    pub signature: Vec<u8>,
}
impl Encodable for MasternodePing {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut written = self.serviced_outpoint.consensus_encode(writer)?;
        writer.write_i64::<LittleEndian>(self.sig_time)?;
        written += 8;
        written += write_var_bytes(writer, &self.signature)?;
        Ok(written)
    }
}
impl Decodable for MasternodePing {
    fn consensus_decode<R: Read + ReadBytesExt>(reader: &mut R) -> Result<Self, IoError> {
        let serviced_outpoint = OutPoint::consensus_decode(reader)?;
        let sig_time = reader.read_i64::<LittleEndian>()?;
        let signature = read_var_bytes(reader)?;
        Ok(MasternodePing { serviced_outpoint, sig_time, signature })
    }
}

/// Announcement binding a collateral outpoint to a network address and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasternodeBroadcast {
    pub serviced_outpoint: OutPoint,
    pub network_address: SocketAddr,
    pub masternode_pubkey: Vec<u8>,
    pub sig_time: i64,
    pub signature: Vec<u8>,
}
impl Encodable for MasternodeBroadcast {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut written = 0;
        written += self.serviced_outpoint.consensus_encode(writer)?;
        written += write_service(writer, &self.network_address)?;
        written += write_var_bytes(writer, &self.masternode_pubkey)?;
        writer.write_i64::<LittleEndian>(self.sig_time)?;
        written += 8;
        written += write_var_bytes(writer, &self.signature)?;
        Ok(written)
    }
}
impl Decodable for MasternodeBroadcast {
    fn consensus_decode<R: Read + ReadBytesExt>(reader: &mut R) -> Result<Self, IoError> {
        let serviced_outpoint = OutPoint::consensus_decode(reader)?;
        let network_address = read_service(reader)?;
        let masternode_pubkey = read_var_bytes(reader)?;
        let sig_time = reader.read_i64::<LittleEndian>()?;
        let signature = read_var_bytes(reader)?;
        Ok(MasternodeBroadcast {
            serviced_outpoint,
            network_address,
            masternode_pubkey,
            sig_time,
            signature,
        })
    }
}

/// One masternode's proof of service inside a witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessProof {
    pub ping: MasternodePing,
    pub broadcast: MasternodeBroadcast,
}
impl Encodable for WitnessProof {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, writer: &mut W) -> Result<usize, IoError> {
        Ok(self.ping.consensus_encode(writer)? + self.broadcast.consensus_encode(writer)?)
    }
}
impl Decodable for WitnessProof {
    fn consensus_decode<R: Read + ReadBytesExt>(reader: &mut R) -> Result<Self, IoError> {
        let ping = MasternodePing::consensus_decode(reader)?;
        let broadcast = MasternodeBroadcast::consensus_decode(reader)?;
        Ok(WitnessProof { ping, broadcast })
    }
}

/// Signed batch attestation that a set of masternodes were serving around
/// `target_block_hash` / `target_time`. Logic lives in `crate::witness`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterNodeWitness {
    pub version: u32,
    pub target_time: i64,
    pub target_block_hash: [u8; 32],
    pub proofs: Vec<WitnessProof>,
    pub signature: Vec<u8>,
    pub witness_pubkey: Vec<u8>,
}
impl MasterNodeWitness {
    // Fields covered by the signature; see `MasterNodeWitness::hash`.
    pub(crate) fn encode_header<W: Write + WriteBytesExt>(&self, writer: &mut W) -> Result<usize, IoError> {
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_i64::<LittleEndian>(self.target_time)?;
        writer.write_all(&self.target_block_hash)?;
        Ok(44 + write_var_int(writer, self.proofs.len() as u64)?)
    }
}
impl Encodable for MasterNodeWitness {
    fn consensus_encode<W: Write + WriteBytesExt>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut written = self.encode_header(writer)?;
        for proof in &self.proofs {
            written += proof.consensus_encode(writer)?;
        }
        written += write_var_bytes(writer, &self.signature)?;
        written += write_var_bytes(writer, &self.witness_pubkey)?;
        Ok(written)
    }
}
impl Decodable for MasterNodeWitness {
    fn consensus_decode<R: Read + ReadBytesExt>(reader: &mut R) -> Result<Self, IoError> {
        let version = reader.read_u32::<LittleEndian>()?;
        let target_time = reader.read_i64::<LittleEndian>()?;
        let target_block_hash = read_hash(reader)?;
        let proof_count = read_var_int(reader)?;
        if proof_count > MAX_WITNESS_PROOFS {
            return Err(IoError::new(
                IoErrorKind::InvalidData,
                format!("witness proof count {} > max {}", proof_count, MAX_WITNESS_PROOFS),
            ));
        }
        let mut proofs = Vec::with_capacity(proof_count as usize);
        for _ in 0..proof_count {
            proofs.push(WitnessProof::consensus_decode(reader)?);
        }
        let signature = read_var_bytes(reader)?;
        let witness_pubkey = read_var_bytes(reader)?;
        Ok(MasterNodeWitness {
            version,
            target_time,
            target_block_hash,
            proofs,
            signature,
            witness_pubkey,
        })
    }
}
