/// Composer for `invokescript` probe scripts (name/symbol/decimals/
/// totalSupply/balanceOf calls against NEP5 contracts).
pub struct ScriptBuilder {
    buf: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        ScriptBuilder { buf: Vec::new() }
    }

    fn emit(&mut self, op_code: u8) {
        self.buf.push(op_code);
    }

    fn emit_push(&mut self, number: i64) {
        if number == -1 {
            self.emit(0x4F);
        } else if number == 0 {
            self.emit(0x00);
        } else if (1..=16).contains(&number) {
            self.emit(0x51 - 1 + number as u8);
        } else {
            self.emit_push_bytes(&(number as u64).to_le_bytes());
        }
    }

    fn emit_push_bytes(&mut self, data: &[u8]) {
        // Callers only push method names, script hashes and address hashes.
        assert!(!data.is_empty(), "can not emit push of empty byte slice");

        let length = data.len();
        if length <= 0x4B {
            self.buf.push(length as u8);
        } else if length <= 0xFF {
            self.emit(0x4C);
            self.buf.push(length as u8);
        } else if length <= 0xFFFF {
            self.emit(0x4D);
            self.buf.extend_from_slice(&(length as u16).to_le_bytes());
        } else {
            self.emit(0x4E);
            self.buf.extend_from_slice(&(length as u32).to_le_bytes());
        }
        self.buf.extend_from_slice(data);
    }

    fn emit_app_call(&mut self, script_hash: &[u8]) {
        assert!(script_hash.len() == 20, "invalid script hash");
        self.emit(0x67);
        self.buf.extend_from_slice(script_hash);
    }

    fn into_hex(self) -> String {
        hex::encode(self.buf)
    }
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the hex script calling `method` on the contract at `script_hash`
/// with the given byte-array parameters.
pub fn build_contract_call(script_hash: &[u8], method: &str, params: &[Vec<u8>]) -> String {
    let mut sb = ScriptBuilder::new();

    for param in params.iter().rev() {
        sb.emit_push_bytes(param);
    }
    sb.emit_push(params.len() as i64);
    sb.emit(0xC1);
    sb.emit_push_bytes(method.as_bytes());
    sb.emit_app_call(script_hash);

    sb.into_hex()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::reader::read_script;

    #[test]
    fn test_no_param_call_round_trip() {
        let hash: Vec<u8> = (0u8..20).collect();
        let script = build_contract_call(&hash, "totalSupply", &[]);
        // 0x00 (zero args), 0xC1 skipped, method bytes, APPCALL hash.
        let mut stack = read_script(&script);
        assert_eq!(stack.len(), 3);
        let (op, data) = stack.pop_item().unwrap();
        assert_eq!(op, 0x67);
        assert_eq!(data, hash);
        assert_eq!(stack.pop_data(), Some(b"totalSupply".to_vec()));
        assert_eq!(stack.pop_data(), Some(vec![0x00]));
    }

    #[test]
    fn test_balance_of_call_round_trip() {
        let hash: Vec<u8> = (0u8..20).collect();
        let addr: Vec<u8> = (100u8..120).collect();
        let script = build_contract_call(&hash, "balanceOf", &[addr.clone()]);
        let mut stack = read_script(&script);
        assert_eq!(stack.len(), 4);
        assert_eq!(stack.pop_item().unwrap().1, hash);
        assert_eq!(stack.pop_data(), Some(b"balanceOf".to_vec()));
        // One argument.
        assert_eq!(stack.pop_data(), Some(vec![0x01]));
        assert_eq!(stack.pop_data(), Some(addr));
    }

    #[test]
    fn test_emit_push_numbers() {
        let mut sb = ScriptBuilder::new();
        sb.emit_push(-1);
        sb.emit_push(0);
        sb.emit_push(16);
        assert_eq!(sb.buf, vec![0x4F, 0x00, 0x60]);

        let mut sb = ScriptBuilder::new();
        sb.emit_push(17);
        // Falls back to an 8-byte little-endian push.
        assert_eq!(sb.buf[0], 0x08);
        assert_eq!(&sb.buf[1..9], &17u64.to_le_bytes());
    }

    #[test]
    fn test_long_push_prefixes() {
        let mut sb = ScriptBuilder::new();
        sb.emit_push_bytes(&vec![0xAB; 0x4B]);
        assert_eq!(sb.buf[0], 0x4B);

        let mut sb = ScriptBuilder::new();
        sb.emit_push_bytes(&vec![0xAB; 0x80]);
        assert_eq!(sb.buf[0], 0x4C);
        assert_eq!(sb.buf[1], 0x80);

        let mut sb = ScriptBuilder::new();
        sb.emit_push_bytes(&vec![0xAB; 0x100]);
        assert_eq!(sb.buf[0], 0x4D);
    }
}
