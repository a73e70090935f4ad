/// NEO VM opcode decoder.
///
/// Walks a script byte stream and collects the data every data-producing
/// opcode would push, in order. Control-flow and arithmetic opcodes are
/// skipped; 0x66 (RET) terminates decoding; a truncated read or an opcode
/// outside the supported ranges halts decoding and the stack collected so
/// far is returned.

/// One decoded opcode together with the bytes it pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpCodeData {
    pub op_code: u8,
    pub data: Vec<u8>,
}

/// Stack of opcodes with data. Direction: bottom(0) → top(N).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataStack(Vec<OpCodeData>);

impl DataStack {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, op_code: u8, data: Vec<u8>) {
        self.0.push(OpCodeData { op_code, data });
    }

    /// Pops the top item; `None` on an empty stack.
    pub fn pop_item(&mut self) -> Option<(u8, Vec<u8>)> {
        self.0.pop().map(|item| (item.op_code, item.data))
    }

    /// Pops the top item's data; `None` on an empty stack.
    pub fn pop_data(&mut self) -> Option<Vec<u8>> {
        self.0.pop().map(|item| item.data)
    }

    pub fn items(&self) -> &[OpCodeData] {
        &self.0
    }
}

struct ScriptCursor<'a> {
    position: usize,
    bytes: &'a [u8],
}

impl<'a> ScriptCursor<'a> {
    fn read_byte(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.position)?;
        self.position += 1;
        Some(b)
    }

    fn read_bytes(&mut self, len: usize) -> Option<Vec<u8>> {
        let end = self.position.checked_add(len)?;
        if end > self.bytes.len() {
            return None;
        }
        let data = self.bytes[self.position..end].to_vec();
        self.position = end;
        Some(data)
    }

    fn read_u16(&mut self) -> Option<u16> {
        let b = self.read_bytes(2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Option<u32> {
        let b = self.read_bytes(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Option<u64> {
        let b = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&b);
        Some(u64::from_le_bytes(buf))
    }

    fn read_var_bytes(&mut self) -> Option<Vec<u8>> {
        let len = match self.read_byte()? {
            0xFD => self.read_u16()? as u64,
            0xFE => self.read_u32()? as u64,
            0xFF => self.read_u64()?,
            n => n as u64,
        };
        self.read_bytes(usize::try_from(len).ok()?)
    }
}

enum Step {
    Data(Vec<u8>),
    Skip,
    Halt,
}

/// Reads a hex script and extracts the stack of data-producing opcodes.
pub fn read_script(script: &str) -> DataStack {
    let bytes = match hex::decode(script) {
        Ok(b) => b,
        Err(_) => return DataStack::default(),
    };

    let mut cursor = ScriptCursor {
        position: 0,
        bytes: &bytes,
    };
    let mut stack = DataStack::default();

    while let Some(op_code) = cursor.read_byte() {
        if op_code == 0x66 {
            return stack;
        }
        match decode_op(op_code, &mut cursor) {
            Step::Data(data) => stack.push(op_code, data),
            Step::Skip => {}
            Step::Halt => return stack,
        }
    }

    stack
}

fn decode_op(op_code: u8, cursor: &mut ScriptCursor) -> Step {
    let data = |d: Option<Vec<u8>>| match d {
        Some(d) => Step::Data(d),
        None => Step::Halt,
    };

    match op_code {
        0x00 => Step::Data(vec![0]),
        0x01..=0x4B => data(cursor.read_bytes(op_code as usize)),
        0x4C => {
            let len = match cursor.read_byte() {
                Some(l) => l as usize,
                None => return Step::Halt,
            };
            data(cursor.read_bytes(len))
        }
        0x4D => {
            let len = match cursor.read_u16() {
                Some(l) => l as usize,
                None => return Step::Halt,
            };
            data(cursor.read_bytes(len))
        }
        0x4E => {
            let len = match cursor.read_u32() {
                Some(l) => l as usize,
                None => return Step::Halt,
            };
            data(cursor.read_bytes(len))
        }
        // PUSHM1, pushed as the two-byte little-endian representation of -1.
        0x4F => Step::Data(vec![0xFF, 0xFF]),
        0x51..=0x60 => Step::Data(vec![op_code - 0x50]),
        0x61 => Step::Skip,
        0x62..=0x64 => match cursor.read_u16() {
            Some(v) => Step::Data(v.to_le_bytes().to_vec()),
            None => Step::Halt,
        },
        0x65 => data(cursor.read_bytes(2)),
        // APPCALL, followed by the 20-byte contract script hash.
        0x67 => data(cursor.read_bytes(20)),
        0x68 => data(cursor.read_var_bytes()),
        0x69 => data(cursor.read_bytes(20)),
        0x6A..=0x6D
        | 0x72..=0x7F
        | 0x80..=0x87
        | 0x8B..=0x8D
        | 0x8F
        | 0x90..=0x9C
        | 0x9E..=0x9F
        | 0xA0..=0xAA
        | 0xAC
        | 0xAE
        | 0xC0..=0xCD
        | 0xF0..=0xF1 => Step::Skip,
        _ => Step::Halt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_script() {
        assert!(read_script("").is_empty());
    }

    #[test]
    fn test_numeric_pushes_and_ret() {
        // 0x51, 0x52 push numbers 1 and 2; 0x66 discards the trailing bytes.
        let stack = read_script("51526600ff");
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.items()[0], OpCodeData { op_code: 0x51, data: vec![0x01] });
        assert_eq!(stack.items()[1], OpCodeData { op_code: 0x52, data: vec![0x02] });
    }

    #[test]
    fn test_ret_truncates_equivalently() {
        let prefix = "025152045556575800";
        let full = read_script(prefix);
        let with_junk = read_script(&format!("{}66deadbeef", prefix));
        assert_eq!(full, with_junk);
    }

    #[test]
    fn test_direct_push() {
        // 0x03 pushes the next three bytes.
        let stack = read_script("03aabbcc");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.items()[0].data, vec![0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn test_pushdata_prefixes() {
        // PUSHDATA1 with u8 length.
        let stack = read_script("4c02abcd");
        assert_eq!(stack.items()[0].data, vec![0xab, 0xcd]);
        // PUSHDATA2 with u16 LE length.
        let stack = read_script("4d0200abcd");
        assert_eq!(stack.items()[0].data, vec![0xab, 0xcd]);
        // PUSHDATA4 with u32 LE length.
        let stack = read_script("4e02000000abcd");
        assert_eq!(stack.items()[0].data, vec![0xab, 0xcd]);
    }

    #[test]
    fn test_push_zero_and_minus_one() {
        let stack = read_script("004f");
        assert_eq!(stack.items()[0].data, vec![0x00]);
        assert_eq!(stack.items()[1].data, vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_appcall_and_syscall() {
        let hash = "00112233445566778899aabbccddeeff00112233";
        let stack = read_script(&format!("67{}", hash));
        assert_eq!(stack.items()[0].op_code, 0x67);
        assert_eq!(stack.items()[0].data, hex::decode(hash).unwrap());

        // 0x68 with one-byte varint length.
        let stack = read_script("6803abcdef");
        assert_eq!(stack.items()[0].data, vec![0xab, 0xcd, 0xef]);
    }

    #[test]
    fn test_unknown_opcode_halts_with_partial_stack() {
        // 0x51 decodes, 0xEE is unsupported; partial stack is returned.
        let stack = read_script("51ee52");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.items()[0].op_code, 0x51);
    }

    #[test]
    fn test_truncated_push_halts_with_partial_stack() {
        // 0x04 asks for four bytes but only two remain.
        let stack = read_script("5104aabb");
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_data_producing_count() {
        // 0x61 (NOP) and arithmetic range opcodes produce nothing.
        let stack = read_script("6151937652");
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_pop_order() {
        let mut stack = read_script("515253");
        assert_eq!(stack.pop_data(), Some(vec![0x03]));
        let (op, data) = stack.pop_item().unwrap();
        assert_eq!(op, 0x52);
        assert_eq!(data, vec![0x02]);
        assert_eq!(stack.pop_data(), Some(vec![0x01]));
        assert_eq!(stack.pop_data(), None);
    }

    #[test]
    fn test_deep_copy() {
        let stack = read_script("5152");
        let mut copy = stack.clone();
        copy.pop_data();
        assert_eq!(stack.len(), 2);
        assert_eq!(copy.len(), 1);
    }
}
