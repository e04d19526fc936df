//! Bitcoin address decoding: Bech32 (BIP-173, witness v0) and Base58Check.
//!
//! Both paths reduce a textual address to the 20-byte pubkey hash the
//! SPV verifier matches on. Anything outside P2PKH / P2WPKH (P2SH,
//! bech32m, higher witness versions) decodes to `None`.

use crate::hash::sha256d;
use crate::wire::ScriptType;

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const BASE58_CHARSET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Decode a Bitcoin address into `(pubkey_hash, script_type)`.
///
/// Dispatch: the HRP prefixes `bc1`, `tb1` and `bcrt1` take the Bech32
/// path, everything else Base58Check.
pub fn decode_btc_address(addr: &str) -> Option<([u8; 20], ScriptType)> {
    let lower = addr.to_lowercase();
    if lower.starts_with("bc1") || lower.starts_with("tb1") || lower.starts_with("bcrt1") {
        decode_bech32_address(addr)
    } else {
        decode_p2pkh_address(addr)
    }
}

// ===================== Bech32 (BIP-173) =====================

fn bech32_polymod(values: &[u8]) -> u32 {
    const GEN: [u32; 5] = [0x3B6A_57B2, 0x2650_8E6D, 0x1EA1_19FA, 0x3D42_33DD, 0x2A14_62B3];
    let mut chk: u32 = 1;
    for v in values {
        let b = chk >> 25;
        chk = ((chk & 0x1FF_FFFF) << 5) ^ (*v as u32);
        for (i, g) in GEN.iter().enumerate() {
            if (b >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

fn bech32_hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out: Vec<u8> = hrp.bytes().map(|c| c >> 5).collect();
    out.push(0);
    out.extend(hrp.bytes().map(|c| c & 31));
    out
}

fn bech32_verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values = bech32_hrp_expand(hrp);
    values.extend_from_slice(data);
    bech32_polymod(&values) == 1
}

/// Split and checksum-verify a bech32 string. Returns `(hrp, data)` with
/// the six checksum symbols stripped.
fn decode_bech32(addr: &str) -> Option<(String, Vec<u8>)> {
    if addr.bytes().any(|c| !(33..=126).contains(&c)) {
        return None;
    }
    // BIP-173 forbids mixed case.
    let has_lower = addr.bytes().any(|c| c.is_ascii_lowercase());
    let has_upper = addr.bytes().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return None;
    }

    let addr = addr.to_lowercase();
    let pos = addr.rfind('1')?;
    if pos < 1 || pos + 7 > addr.len() {
        return None;
    }
    let hrp = &addr[..pos];
    let data_part = &addr[pos + 1..];

    let mut data = Vec::with_capacity(data_part.len());
    for c in data_part.chars() {
        data.push(BECH32_CHARSET.find(c)? as u8);
    }

    if !bech32_verify_checksum(hrp, &data) {
        return None;
    }

    data.truncate(data.len() - 6);
    Some((hrp.to_string(), data))
}

/// Regroup `data` from `frombits`-wide to `tobits`-wide values without
/// padding; trailing garbage bits reject the input.
fn convert_bits(data: &[u8], frombits: u32, tobits: u32) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::new();
    let maxv: u32 = (1 << tobits) - 1;
    let max_acc: u32 = (1 << (frombits + tobits - 1)) - 1;

    for value in data {
        let value = *value as u32;
        if value >> frombits != 0 {
            return None;
        }
        acc = ((acc << frombits) | value) & max_acc;
        bits += frombits;
        while bits >= tobits {
            bits -= tobits;
            out.push(((acc >> bits) & maxv) as u8);
        }
    }

    if bits >= frombits || ((acc << (tobits - bits)) & maxv) != 0 {
        return None;
    }
    Some(out)
}

fn decode_bech32_address(addr: &str) -> Option<([u8; 20], ScriptType)> {
    let (hrp, data) = decode_bech32(addr)?;
    if !matches!(hrp.as_str(), "bc" | "tb" | "bcrt") {
        return None;
    }
    let (witness_version, program_5bit) = data.split_first()?;
    // Only witness v0 / P2WPKH.
    if *witness_version != 0 {
        return None;
    }
    let program = convert_bits(program_5bit, 5, 8)?;
    if program.len() != 20 {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&program);
    Some((hash, ScriptType::P2wpkh))
}

// ===================== Base58Check =====================

fn base58_decode(addr: &str) -> Option<Vec<u8>> {
    // Big-number decode into a little-endian byte accumulator.
    let mut bytes: Vec<u8> = Vec::new();
    for c in addr.chars() {
        let mut carry = BASE58_CHARSET.find(c)? as u32;
        for b in bytes.iter_mut() {
            let x = (*b as u32) * 58 + carry;
            *b = (x & 0xFF) as u8;
            carry = x >> 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xFF) as u8);
            carry >>= 8;
        }
    }
    // Each leading '1' encodes a leading zero byte.
    for c in addr.chars() {
        if c != '1' {
            break;
        }
        bytes.push(0);
    }
    bytes.reverse();
    Some(bytes)
}

fn decode_p2pkh_address(addr: &str) -> Option<([u8; 20], ScriptType)> {
    let decoded = base58_decode(addr)?;
    // version (1) + payload (20) + checksum (4)
    if decoded.len() != 25 {
        return None;
    }
    let (data, checksum) = decoded.split_at(21);
    if &sha256d(data)[..4] != checksum {
        return None;
    }
    // 0x00 mainnet, 0x6F testnet; anything else (e.g. P2SH 0x05) is unsupported.
    if data[0] != 0x00 && data[0] != 0x6F {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&data[1..21]);
    Some((hash, ScriptType::P2pkh))
}
