use bigdecimal::BigDecimal;

/// Asset-type discriminators stored in `addr_tx.asset_type`.
pub const ASSET: &str = "asset";
pub const NEP5: &str = "nep5";

/// Which balance universe a transaction touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Asset,
    Nep5,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Asset => ASSET,
            AssetKind::Nep5 => NEP5,
        }
    }
}

pub const NEO: &str = "NEO";
pub const NEO_ASSET_ID: &str =
    "0xc56f33fc6ecfcd0c225c4ab356fee59390af8560be0e930faebe74a6daff7c9b";

pub const GAS: &str = "GAS";
pub const GAS_ASSET_ID: &str =
    "0x602c79718b16e442de58778e148d0b1084e3b2dffd5de6b7b16cee7969282de7";

/// Native asset row (`asset` table).
#[derive(Debug, Clone)]
pub struct Asset {
    pub id: u64,
    pub block_index: u32,
    pub block_time: u64,
    pub version: u32,
    pub asset_id: String,
    pub asset_type: String,
    pub name: String,
    pub amount: BigDecimal,
    pub available: BigDecimal,
    pub precision: u8,
    pub owner: String,
    pub admin: String,
    pub issuer: String,
    pub expiration: u64,
    pub frozen: bool,
    pub addresses: u64,
    pub transactions: u64,
}
