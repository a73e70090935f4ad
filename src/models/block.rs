use crate::rpc::types::RawBlock;

/// Block row (`block` table).
#[derive(Debug, Clone)]
pub struct Block {
    pub id: u64,
    pub hash: String,
    pub size: u32,
    pub version: u32,
    pub previous_block_hash: String,
    pub merkle_root: String,
    pub time: u64,
    pub index: u32,
    pub nonce: String,
    pub next_consensus: String,
    pub script_invocation: String,
    pub script_verification: String,
    pub next_block_hash: String,
}

/// Converts raw RPC blocks into block rows.
pub fn parse_blocks(raw_blocks: &[RawBlock]) -> Vec<Block> {
    raw_blocks
        .iter()
        .map(|raw| Block {
            id: 0,
            hash: raw.hash.clone(),
            size: raw.size,
            version: raw.version,
            previous_block_hash: raw.previous_block_hash.clone(),
            merkle_root: raw.merkle_root.clone(),
            time: raw.time,
            index: raw.index,
            nonce: raw.nonce.clone(),
            next_consensus: raw.next_consensus.clone(),
            script_invocation: raw.script.invocation.clone(),
            script_verification: raw.script.verification.clone(),
            next_block_hash: raw.next_block_hash.clone(),
        })
        .collect()
}
