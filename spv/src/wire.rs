//! Bitcoin wire codecs: varints, the 80-byte block header, and the
//! transaction-output walk used by the proof pipeline.
//!
//! Only the pieces the SPV flow needs are implemented. Inputs are stepped
//! over, witness data is ignored, and scripts other than P2PKH / P2WPKH
//! are rejected by [`extract_pubkey_hash`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Hash256;

pub const HEADER_LEN: usize = 80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("block header must be {HEADER_LEN} bytes, got {0}")]
    MalformedHeader(usize),
    #[error("malformed transaction: {0}")]
    MalformedTransaction(&'static str),
}

// ===================== VarInt =====================

/// Decode a Bitcoin varint at `offset`. Returns `(value, bytes_consumed)`.
pub fn read_varint(data: &[u8], offset: usize) -> Result<(u64, usize), CodecError> {
    let first = *data
        .get(offset)
        .ok_or(CodecError::MalformedTransaction("varint past end of buffer"))?;
    let (width, value) = match first {
        0x00..=0xFC => return Ok((first as u64, 1)),
        0xFD => (2, read_le(data, offset + 1, 2)?),
        0xFE => (4, read_le(data, offset + 1, 4)?),
        0xFF => (8, read_le(data, offset + 1, 8)?),
    };
    Ok((value, 1 + width))
}

/// Encode `n` as a Bitcoin varint.
pub fn write_varint(n: u64) -> Vec<u8> {
    match n {
        0x00..=0xFC => vec![n as u8],
        0xFD..=0xFFFF => {
            let mut out = vec![0xFD];
            out.extend_from_slice(&(n as u16).to_le_bytes());
            out
        }
        0x1_0000..=0xFFFF_FFFF => {
            let mut out = vec![0xFE];
            out.extend_from_slice(&(n as u32).to_le_bytes());
            out
        }
        _ => {
            let mut out = vec![0xFF];
            out.extend_from_slice(&n.to_le_bytes());
            out
        }
    }
}

fn read_le(data: &[u8], offset: usize, width: usize) -> Result<u64, CodecError> {
    let end = offset
        .checked_add(width)
        .ok_or(CodecError::MalformedTransaction("varint offset overflow"))?;
    let slice = data
        .get(offset..end)
        .ok_or(CodecError::MalformedTransaction("varint past end of buffer"))?;
    let mut value = 0u64;
    for (i, b) in slice.iter().enumerate() {
        value |= (*b as u64) << (8 * i);
    }
    Ok(value)
}

// ===================== Block header =====================

/// An 80-byte Bitcoin block header. Hashes are in internal byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != HEADER_LEN {
            return Err(CodecError::MalformedHeader(data.len()));
        }
        let mut prev_hash = [0u8; 32];
        prev_hash.copy_from_slice(&data[4..36]);
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&data[36..68]);
        Ok(Self {
            version: u32::from_le_bytes(data[0..4].try_into().expect("4-byte slice")),
            prev_hash: Hash256::from_internal(prev_hash),
            merkle_root: Hash256::from_internal(merkle_root),
            time: u32::from_le_bytes(data[68..72].try_into().expect("4-byte slice")),
            bits: u32::from_le_bytes(data[72..76].try_into().expect("4-byte slice")),
            nonce: u32::from_le_bytes(data[76..80].try_into().expect("4-byte slice")),
        })
    }

    pub fn serialize(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Block hash in internal byte order.
    pub fn block_hash(&self) -> Hash256 {
        Hash256::digest(&self.serialize())
    }
}

// ===================== Transaction outputs =====================

/// A parsed transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value_sats: u64,
    pub script_pubkey: Vec<u8>,
}

/// Walk a raw transaction and return its outputs in order.
///
/// Handles both the legacy and the segwit wire format (marker `0x00 0x01`
/// after the version). Witness data trails the outputs and is never read.
pub fn parse_tx_outputs(raw_tx: &[u8]) -> Result<Vec<TxOut>, CodecError> {
    let mut offset = 4usize; // version

    // Segwit marker and flag.
    if raw_tx.get(offset) == Some(&0x00) && raw_tx.get(offset + 1) == Some(&0x01) {
        offset += 2;
    }

    // Step over inputs: 36-byte outpoint, varint script, 4-byte sequence.
    let (input_count, n) = read_varint(raw_tx, offset)?;
    offset += n;
    for _ in 0..input_count {
        offset = advance(raw_tx, offset, 36)?;
        let (script_len, n) = read_varint(raw_tx, offset)?;
        offset += n;
        offset = advance(raw_tx, offset, script_len as usize)?;
        offset = advance(raw_tx, offset, 4)?;
    }

    let (output_count, n) = read_varint(raw_tx, offset)?;
    offset += n;
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        let value_bytes = raw_tx
            .get(offset..offset + 8)
            .ok_or(CodecError::MalformedTransaction("output value truncated"))?;
        let value_sats = u64::from_le_bytes(value_bytes.try_into().expect("8-byte slice"));
        offset += 8;
        let (script_len, n) = read_varint(raw_tx, offset)?;
        offset += n;
        let script = raw_tx
            .get(offset..offset + script_len as usize)
            .ok_or(CodecError::MalformedTransaction("output script truncated"))?;
        offset += script_len as usize;
        outputs.push(TxOut {
            value_sats,
            script_pubkey: script.to_vec(),
        });
    }

    Ok(outputs)
}

fn advance(data: &[u8], offset: usize, by: usize) -> Result<usize, CodecError> {
    let end = offset
        .checked_add(by)
        .ok_or(CodecError::MalformedTransaction("offset overflow"))?;
    if end > data.len() {
        return Err(CodecError::MalformedTransaction("input section truncated"));
    }
    Ok(end)
}

// ===================== Script templates =====================

/// The two script templates the payout pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    P2pkh,
    P2wpkh,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::P2pkh => "p2pkh",
            ScriptType::P2wpkh => "p2wpkh",
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the 20-byte pubkey hash from a recognized scriptPubKey.
///
/// P2PKH: `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
/// P2WPKH: `OP_0 <20>`
pub fn extract_pubkey_hash(script_pubkey: &[u8]) -> Option<([u8; 20], ScriptType)> {
    if script_pubkey.len() == 22 && script_pubkey[0] == 0x00 && script_pubkey[1] == 0x14 {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script_pubkey[2..22]);
        return Some((hash, ScriptType::P2wpkh));
    }

    if script_pubkey.len() == 25
        && script_pubkey[0] == 0x76
        && script_pubkey[1] == 0xA9
        && script_pubkey[2] == 0x14
        && script_pubkey[23] == 0x88
        && script_pubkey[24] == 0xAC
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script_pubkey[3..23]);
        return Some((hash, ScriptType::P2pkh));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_forms() {
        assert_eq!(read_varint(&[0x05], 0).unwrap(), (5, 1));
        assert_eq!(read_varint(&[0xFD, 0x00, 0x01], 0).unwrap(), (256, 3));
        assert_eq!(
            read_varint(&[0xFE, 0x01, 0x00, 0x01, 0x00], 0).unwrap(),
            (65537, 5)
        );
        assert_eq!(
            read_varint(&[0xFF, 1, 0, 0, 0, 0, 0, 0, 0x80], 0).unwrap(),
            (1 | (0x80 << 56), 9)
        );
    }

    #[test]
    fn varint_truncation_fails() {
        assert!(read_varint(&[], 0).is_err());
        assert!(read_varint(&[0xFD, 0x01], 0).is_err());
        assert!(read_varint(&[0xFF, 1, 2, 3], 0).is_err());
    }

    #[test]
    fn varint_round_trip() {
        for n in [0u64, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, u64::MAX] {
            let encoded = write_varint(n);
            let (decoded, consumed) = read_varint(&encoded, 0).unwrap();
            assert_eq!(decoded, n);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn header_round_trip() {
        let mut raw = [0u8; HEADER_LEN];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        let header = BlockHeader::parse(&raw).unwrap();
        assert_eq!(header.serialize(), raw);
    }

    #[test]
    fn header_rejects_wrong_length() {
        assert_eq!(
            BlockHeader::parse(&[0u8; 79]),
            Err(CodecError::MalformedHeader(79))
        );
        assert_eq!(
            BlockHeader::parse(&[0u8; 81]),
            Err(CodecError::MalformedHeader(81))
        );
    }

    /// Build a minimal single-input transaction for the output walk.
    fn build_tx(segwit: bool, outputs: &[(u64, Vec<u8>)]) -> Vec<u8> {
        let mut tx = vec![0x02, 0x00, 0x00, 0x00];
        if segwit {
            tx.extend_from_slice(&[0x00, 0x01]);
        }
        tx.push(0x01); // one input
        tx.extend_from_slice(&[0u8; 36]); // outpoint
        tx.push(0x00); // empty scriptSig
        tx.extend_from_slice(&[0xFF; 4]); // sequence
        tx.push(outputs.len() as u8);
        for (value, script) in outputs {
            tx.extend_from_slice(&value.to_le_bytes());
            tx.extend_from_slice(&write_varint(script.len() as u64));
            tx.extend_from_slice(script);
        }
        if segwit {
            // one empty witness stack
            tx.push(0x00);
        }
        tx.extend_from_slice(&[0u8; 4]); // locktime
        tx
    }

    #[test]
    fn parses_legacy_and_segwit_outputs() {
        let p2wpkh: Vec<u8> = [vec![0x00, 0x14], vec![0xAB; 20]].concat();
        for segwit in [false, true] {
            let raw = build_tx(segwit, &[(100_000, p2wpkh.clone())]);
            let outputs = parse_tx_outputs(&raw).unwrap();
            assert_eq!(outputs.len(), 1);
            assert_eq!(outputs[0].value_sats, 100_000);
            assert_eq!(outputs[0].script_pubkey, p2wpkh);
        }
    }

    #[test]
    fn truncated_tx_fails() {
        let p2wpkh: Vec<u8> = [vec![0x00, 0x14], vec![0xAB; 20]].concat();
        let raw = build_tx(false, &[(1, p2wpkh)]);
        // chop inside the output script
        assert_eq!(
            parse_tx_outputs(&raw[..raw.len() - 12]),
            Err(CodecError::MalformedTransaction("output script truncated"))
        );
    }

    #[test]
    fn script_templates() {
        let hash = [0x42u8; 20];
        let p2wpkh: Vec<u8> = [vec![0x00, 0x14], hash.to_vec()].concat();
        assert_eq!(
            extract_pubkey_hash(&p2wpkh),
            Some((hash, ScriptType::P2wpkh))
        );

        let p2pkh: Vec<u8> = [vec![0x76, 0xA9, 0x14], hash.to_vec(), vec![0x88, 0xAC]].concat();
        assert_eq!(extract_pubkey_hash(&p2pkh), Some((hash, ScriptType::P2pkh)));

        // P2SH and OP_RETURN are unsupported
        let p2sh: Vec<u8> = [vec![0xA9, 0x14], hash.to_vec(), vec![0x87]].concat();
        assert_eq!(extract_pubkey_hash(&p2sh), None);
        assert_eq!(extract_pubkey_hash(&[0x6A, 0x01, 0x00]), None);
    }
}
