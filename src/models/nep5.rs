use bigdecimal::BigDecimal;
use sqlx::FromRow;

use crate::script::reader::DataStack;

/// NEP5 asset row (`nep5` table).
#[derive(Debug, Clone)]
pub struct Nep5 {
    pub id: u64,
    pub asset_id: String,
    pub admin_address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: BigDecimal,
    pub txid: String,
    pub block_index: u32,
    pub block_time: u64,
    pub addresses: u64,
    pub holding_addresses: u64,
    pub transfers: u64,
}

/// Contract registration parameters (`nep5_reg_info` table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegInfo {
    pub name: String,
    pub version: String,
    pub author: String,
    pub email: String,
    pub description: String,
    pub need_storage: bool,
    pub parameter_list: String,
    pub return_type: String,
}

/// NEP5 transfer row (`nep5_tx` table).
#[derive(Debug, Clone, FromRow)]
pub struct Nep5Transaction {
    pub id: u64,
    pub txid: String,
    pub asset_id: String,
    pub from: String,
    pub to: String,
    pub value: BigDecimal,
    pub block_index: u32,
    pub block_time: u64,
}

/// Extracts the contract script and registration info from a decoded
/// deployment script. The stack must hold at least nine items; extras above
/// nine are discarded from the top.
pub fn get_nep5_reg_info(stack: &mut DataStack) -> Option<(Vec<u8>, RegInfo)> {
    if stack.len() < 9 {
        return None;
    }

    while stack.len() > 9 {
        stack.pop_data();
    }

    let script_bytes = stack.pop_data()?;

    let reg_info = RegInfo {
        parameter_list: hex::encode(stack.pop_data()?),
        return_type: hex::encode(stack.pop_data()?),
        need_storage: stack.pop_data()?.first() == Some(&0x01),
        name: String::from_utf8_lossy(&stack.pop_data()?).into_owned(),
        version: String::from_utf8_lossy(&stack.pop_data()?).into_owned(),
        author: String::from_utf8_lossy(&stack.pop_data()?).into_owned(),
        email: String::from_utf8_lossy(&stack.pop_data()?).into_owned(),
        description: String::from_utf8_lossy(&stack.pop_data()?).into_owned(),
    };

    Some((script_bytes, reg_info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::reader::read_script;

    fn push(buf: &mut Vec<u8>, data: &[u8]) {
        assert!(data.len() <= 0x4B && !data.is_empty());
        buf.push(data.len() as u8);
        buf.extend_from_slice(data);
    }

    /// Deployment pushes bottom-up: description first, contract script last.
    fn deploy_script(extra_top_items: usize) -> String {
        let mut buf = Vec::new();
        push(&mut buf, b"A test token");
        push(&mut buf, b"dev@example.com");
        push(&mut buf, b"dev");
        push(&mut buf, b"1.0");
        push(&mut buf, b"MyToken");
        push(&mut buf, &[0x01]); // need storage
        push(&mut buf, &[0x05]); // return type
        push(&mut buf, &[0x07, 0x10]); // parameter list
        push(&mut buf, &[0xde, 0xad, 0xbe, 0xef]); // contract script
        for _ in 0..extra_top_items {
            push(&mut buf, &[0xff]);
        }
        hex::encode(buf)
    }

    #[test]
    fn test_reg_info_extraction() {
        let mut stack = read_script(&deploy_script(0));
        let (script, info) = get_nep5_reg_info(&mut stack).unwrap();
        assert_eq!(script, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(info.parameter_list, "0710");
        assert_eq!(info.return_type, "05");
        assert!(info.need_storage);
        assert_eq!(info.name, "MyToken");
        assert_eq!(info.version, "1.0");
        assert_eq!(info.author, "dev");
        assert_eq!(info.email, "dev@example.com");
        assert_eq!(info.description, "A test token");
    }

    #[test]
    fn test_stack_of_ten_trimmed_to_nine() {
        let mut stack = read_script(&deploy_script(1));
        assert_eq!(stack.len(), 10);
        let (script, info) = get_nep5_reg_info(&mut stack).unwrap();
        assert_eq!(script, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(info.name, "MyToken");
    }

    #[test]
    fn test_short_stack_rejected() {
        let mut stack = read_script("515253");
        assert!(get_nep5_reg_info(&mut stack).is_none());
    }
}
