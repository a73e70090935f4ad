use bigdecimal::BigDecimal;
use sqlx::FromRow;

/// Per-address per-asset balance row (`addr_asset` table).
#[derive(Debug, Clone)]
pub struct AddrAsset {
    pub address: String,
    pub asset_id: String,
    pub balance: BigDecimal,
    pub transactions: u64,
    pub last_transaction_time: u64,
}

/// Joined address/balance row used to warm the address cache at startup.
#[derive(Debug, Clone, FromRow)]
pub struct AddrAssetInfo {
    pub address: String,
    pub created_at: u64,
    pub last_transaction_time: u64,
    pub asset_id: String,
    pub balance: BigDecimal,
}
