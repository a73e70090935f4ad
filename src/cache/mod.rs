/// Process-wide caches kept consistent with the persisted dataset.
///
/// Both caches guard their maps with a single mutex and reject balance
/// writes carrying a block index lower than the one already recorded, which
/// makes re-applied history a no-op.
pub mod addr;
pub mod supply;

pub use addr::{AddrCache, BalanceQuery, ADDR_CACHE};
pub use supply::{TotalSupplyCache, TOTAL_SUPPLY_CACHE};
