/// Hashing and encoding helpers shared by the whole pipeline.
///
/// Script hashes are RIPEMD160(SHA256(x)); addresses are base58 of
/// {0x17} || script-hash || checksum; asset ids are the hex of the
/// byte-reversed script hash. Chain values arrive either as decimal strings
/// or as little-endian unsigned byte arrays.
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, BigUint, Sign};
use ripemd160::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::{IndexerError, Result};

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Double SHA256, used for address checksums.
pub fn hash256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// RIPEMD160(SHA256(data)), the script hash function.
pub fn hash160(data: &[u8]) -> Vec<u8> {
    Ripemd160::digest(&Sha256::digest(data)).to_vec()
}

pub fn script_hash(data: &[u8]) -> Vec<u8> {
    hash160(data)
}

pub fn reverse_bytes(raw: &[u8]) -> Vec<u8> {
    raw.iter().rev().copied().collect()
}

/// Base58 address from a 20-byte script hash. Empty input yields "".
pub fn address_from_script_hash(script_hash: &[u8]) -> String {
    if script_hash.is_empty() {
        return String::new();
    }
    let mut data = vec![0x17];
    data.extend_from_slice(script_hash);
    let checksum = hash256(&data);
    data.extend_from_slice(&checksum[..4]);
    bs58::encode(data).into_string()
}

/// Recovers the 20-byte script hash from a base58 address.
pub fn script_hash_from_address(addr: &str) -> Result<Vec<u8>> {
    if addr.is_empty() {
        return Ok(Vec::new());
    }
    let decoded = bs58::decode(addr).into_vec()?;
    if decoded.len() != 25 {
        return Err(IndexerError::invariant(format!(
            "address {} decodes to {} bytes, want 25",
            addr,
            decoded.len()
        )));
    }
    Ok(decoded[1..21].to_vec())
}

/// Checks the 4-byte double-SHA256 checksum of a base58 address.
pub fn address_valid(addr: &str) -> bool {
    if addr.is_empty() {
        return false;
    }
    let buffer = match bs58::decode(addr).into_vec() {
        Ok(b) => b,
        Err(_) => return false,
    };
    if buffer.len() < 4 {
        return false;
    }
    let (payload, checksum) = buffer.split_at(buffer.len() - 4);
    hash256(payload)[..4] == *checksum
}

pub fn asset_id_from_script_hash(script_hash: &[u8]) -> String {
    hex::encode(reverse_bytes(script_hash))
}

pub fn script_hash_from_asset_id(asset_id: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(asset_id)?;
    Ok(reverse_bytes(&bytes))
}

/// Unsigned decode of a little-endian byte array of any length.
pub fn bytes_le_to_decimal(data: &[u8]) -> BigDecimal {
    let uint = BigUint::from_bytes_le(data);
    BigDecimal::from(BigInt::from_biguint(Sign::Plus, uint))
}

/// Unsigned decode of a little-endian hex string. Odd-length input gets a
/// leading zero nibble.
pub fn hex_le_to_decimal(hex_str: &str) -> Result<BigDecimal> {
    if hex_str.is_empty() {
        return Ok(BigDecimal::default());
    }
    let padded = if hex_str.len() % 2 == 0 {
        hex_str.to_string()
    } else {
        format!("0{}", hex_str)
    };
    let bytes = hex::decode(padded)?;
    Ok(bytes_le_to_decimal(&bytes))
}

pub fn hex_le_to_bigint(hex_str: &str) -> Result<BigInt> {
    if hex_str.is_empty() {
        return Ok(BigInt::from(0));
    }
    let padded = if hex_str.len() % 2 == 0 {
        hex_str.to_string()
    } else {
        format!("0{}", hex_str)
    };
    let bytes = hex::decode(padded)?;
    Ok(BigInt::from_biguint(
        Sign::Plus,
        BigUint::from_bytes_le(&bytes),
    ))
}

/// Integer value of a fixed-width little-endian field (1, 2, 4 or 8 bytes).
pub fn value_from_bytes(data: &[u8]) -> Result<i64> {
    match data.len() {
        1 => Ok(data[0] as i64),
        2 => Ok(i16::from_le_bytes([data[0], data[1]]) as i64),
        4 => Ok(i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i64),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(data);
            Ok(u64::from_le_bytes(buf) as i64)
        }
        _ => Err(IndexerError::invariant(format!(
            "can not get value from data: {}",
            hex::encode(data)
        ))),
    }
}

/// Shifts the decimal point of `v` left by `decimals` digits (divide by
/// 10^decimals, exactly).
pub fn shift_decimals(v: &BigDecimal, decimals: u8) -> BigDecimal {
    if decimals == 0 {
        return v.clone();
    }
    let (int, exp) = v.as_bigint_and_exponent();
    BigDecimal::new(int, exp + decimals as i64)
}

pub fn parse_decimal(s: &str) -> Result<BigDecimal> {
    if s.is_empty() {
        return Ok(BigDecimal::default());
    }
    s.parse::<BigDecimal>()
        .map_err(|e| IndexerError::Other(format!("failed to parse decimal {:?}: {}", s, e)))
}

/// "01h 02m 03s" style rendering of a duration in seconds.
pub fn seconds_to_human(duration: u64) -> String {
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;

    if hours > 0 {
        format!("{:02}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{:02}m {:02}s", minutes, seconds)
    } else {
        format!("{:02}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_address_valid() {
        assert!(address_valid("APyEx5f4Zm4oCHwFWiSTaph1fPBxZacYVR"));
        assert!(!address_valid("APyEx5f4Zm4oCHwFWiSTaph1fPBxZacYVA"));
        assert!(!address_valid(""));
        assert!(!address_valid("not-base58-0OIl"));
    }

    #[test]
    fn test_address_round_trip() {
        let addr = "AKQjaQ7Hor11BfRnXUBvYYiY1CwUkLywyc";
        let sc = script_hash_from_address(addr).unwrap();
        assert_eq!(sc.len(), 20);
        assert_eq!(address_from_script_hash(&sc), addr);
    }

    #[test]
    fn test_empty_address_conversions() {
        assert_eq!(address_from_script_hash(&[]), "");
        assert_eq!(script_hash_from_address("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_asset_id_round_trip() {
        let sh: Vec<u8> = (0u8..20).collect();
        let id = asset_id_from_script_hash(&sh);
        assert_eq!(id.len(), 40);
        assert_eq!(script_hash_from_asset_id(&id).unwrap(), sh);
    }

    #[test]
    fn test_bytes_le_to_decimal() {
        assert_eq!(bytes_le_to_decimal(&[]), BigDecimal::from(0));
        assert_eq!(bytes_le_to_decimal(&[0x0a]), BigDecimal::from(10));
        assert_eq!(bytes_le_to_decimal(&[0x00, 0x01]), BigDecimal::from(256));
        // High bit set must still decode unsigned.
        assert_eq!(
            bytes_le_to_decimal(&[0xff, 0xff]),
            BigDecimal::from(65535)
        );
    }

    #[test]
    fn test_hex_le_to_decimal() {
        assert_eq!(hex_le_to_decimal("").unwrap(), BigDecimal::from(0));
        assert_eq!(hex_le_to_decimal("0a").unwrap(), BigDecimal::from(10));
        assert_eq!(hex_le_to_decimal("0001").unwrap(), BigDecimal::from(256));
    }

    #[test]
    fn test_value_from_bytes() {
        assert_eq!(value_from_bytes(&[0x08]).unwrap(), 8);
        assert_eq!(value_from_bytes(&[0x01, 0x00]).unwrap(), 1);
        assert_eq!(value_from_bytes(&[0x00, 0x00, 0x01, 0x00]).unwrap(), 65536);
        assert!(value_from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_shift_decimals() {
        let v = BigDecimal::from(100);
        assert_eq!(shift_decimals(&v, 2), BigDecimal::from_str("1.00").unwrap());
        assert_eq!(shift_decimals(&v, 0), v);
        let supply = BigDecimal::from(123456789);
        assert_eq!(
            shift_decimals(&supply, 8),
            BigDecimal::from_str("1.23456789").unwrap()
        );
    }

    #[test]
    fn test_reverse_bytes() {
        assert_eq!(reverse_bytes(&[1, 2, 3]), vec![3, 2, 1]);
        assert_eq!(reverse_bytes(&[]), Vec::<u8>::new());
    }

    #[test]
    fn test_seconds_to_human() {
        assert_eq!(seconds_to_human(5), "05s");
        assert_eq!(seconds_to_human(65), "01m 05s");
        assert_eq!(seconds_to_human(3661), "01h 01m 01s");
    }
}
