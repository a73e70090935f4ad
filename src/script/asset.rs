/// Parser for native-asset registration scripts.
///
/// An invocation transaction registers an asset when its script ends with
/// the `Neo.Asset.Create` syscall; the preceding pushes carry issuer, admin,
/// owner, precision, amount, name and type, top-down once decoded.
use bigdecimal::BigDecimal;
use serde::Deserialize;
use tracing::warn;

use crate::models::asset::Asset;
use crate::script::reader::{read_script, DataStack};
use crate::util;

/// Trailing bytes identifying an asset registration script:
/// SYSCALL "Neo.Asset.Create".
pub const ASSET_FINGERPRINT: &str = "68104e656f2e41737365742e437265617465";

/// Parses script content into an asset record. Block coordinates, asset id
/// and expiration are filled in by the caller.
pub fn parse_asset_script(script: &str) -> Option<Asset> {
    if !script.ends_with(ASSET_FINGERPRINT) {
        warn!(
            script = %crate::telemetry::truncate_hex(script, 64),
            "can not get asset info from script, format not match"
        );
        return None;
    }

    let mut stack = read_script(script);
    if stack.is_empty() {
        return None;
    }

    // Top of the stack is the syscall name itself.
    stack.pop_data()?;

    let asset_type = asset_type_name(&stack.pop_data()?)?;
    let name = asset_name(&stack.pop_data()?);
    let amount = util::bytes_le_to_decimal(&stack.pop_data()?);
    let precision = asset_precision(&stack.pop_data()?)?;
    let owner = hex::encode(stack.pop_data()?);
    let admin = util::address_from_script_hash(&stack.pop_data()?);
    let issuer = util::address_from_script_hash(&stack.pop_data()?);

    let amount = util::shift_decimals(&amount, precision);

    Some(Asset {
        id: 0,
        block_index: 0,
        block_time: 0,
        version: 0,
        asset_id: String::new(),
        asset_type,
        name,
        amount,
        available: BigDecimal::default(),
        precision,
        owner,
        admin,
        issuer,
        expiration: 0,
        frozen: false,
        addresses: 0,
        transactions: 0,
    })
}

fn asset_type_name(data: &[u8]) -> Option<String> {
    let val = read_uvarint(data)?;
    let name = match val {
        0x40 => "CreditFlag",
        0x80 => "DutyFlag",
        0x00 => "GoverningToken",
        0x01 => "UtilityToken",
        0x08 => "Currency",
        0x50 => "Share",
        0x58 => "Invoice",
        0x60 => "Token",
        _ => "Unknown",
    };
    Some(name.to_string())
}

#[derive(Deserialize)]
struct LocalizedName {
    #[serde(default)]
    #[allow(dead_code)]
    lang: String,
    #[serde(default)]
    name: String,
}

/// Asset names are usually a JSON list of localized names; raw bytes that do
/// not parse are kept hex-encoded.
fn asset_name(data: &[u8]) -> String {
    match serde_json::from_slice::<Vec<LocalizedName>>(data) {
        Ok(names) if !names.is_empty() => names[0].name.clone(),
        _ => hex::encode(data),
    }
}

fn asset_precision(data: &[u8]) -> Option<u8> {
    let val = util::value_from_bytes(data).ok()?;
    u8::try_from(val).ok()
}

/// Unsigned LEB128 decode of the leading varint.
fn read_uvarint(data: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for &byte in data {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn push(buf: &mut Vec<u8>, data: &[u8]) {
        assert!(data.len() <= 0x4B);
        buf.push(data.len() as u8);
        buf.extend_from_slice(data);
    }

    fn sample_script() -> String {
        let issuer_sh: Vec<u8> = (0u8..20).collect();
        let admin_sh: Vec<u8> = (20u8..40).collect();
        let owner = [0x02u8; 33];
        let name = br#"[{"lang":"zh-CN","name":"Example"}]"#;

        let mut buf = Vec::new();
        push(&mut buf, &issuer_sh);
        push(&mut buf, &admin_sh);
        push(&mut buf, &owner);
        buf.push(0x58); // precision 8
        push(&mut buf, &10_000_000_000u64.to_le_bytes());
        push(&mut buf, name);
        push(&mut buf, &[0x60]); // Token
        format!("{}{}", hex::encode(buf), ASSET_FINGERPRINT)
    }

    #[test]
    fn test_parse_asset_script() {
        let asset = parse_asset_script(&sample_script()).unwrap();
        assert_eq!(asset.asset_type, "Token");
        assert_eq!(asset.name, "Example");
        assert_eq!(asset.precision, 8);
        assert_eq!(asset.amount, BigDecimal::from_str("100.00000000").unwrap());
        assert_eq!(asset.owner, hex::encode([0x02u8; 33]));
        let issuer_sh: Vec<u8> = (0u8..20).collect();
        assert_eq!(asset.issuer, util::address_from_script_hash(&issuer_sh));
    }

    #[test]
    fn test_rejects_foreign_script() {
        assert!(parse_asset_script("5152").is_none());
    }

    #[test]
    fn test_non_json_name_kept_as_hex() {
        assert_eq!(asset_name(&[0xde, 0xad]), "dead");
    }

    #[test]
    fn test_read_uvarint() {
        assert_eq!(read_uvarint(&[0x40]), Some(0x40));
        assert_eq!(read_uvarint(&[0x80, 0x01]), Some(128));
        assert_eq!(read_uvarint(&[]), None);
    }
}
