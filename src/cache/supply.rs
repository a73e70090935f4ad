use std::collections::HashMap;
use std::sync::Mutex;

use bigdecimal::BigDecimal;
use once_cell::sync::Lazy;

/// The process-wide NEP5 total-supply cache.
pub static TOTAL_SUPPLY_CACHE: Lazy<TotalSupplyCache> = Lazy::new(TotalSupplyCache::new);

struct SupplyEntry {
    total_supply: BigDecimal,
    block_index: u32,
}

/// asset-id → {total supply, block index it was observed at}.
pub struct TotalSupplyCache {
    inner: Mutex<HashMap<String, SupplyEntry>>,
}

impl TotalSupplyCache {
    pub fn new() -> Self {
        TotalSupplyCache {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, asset_id: &str) -> Option<(BigDecimal, u32)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .get(asset_id)
            .map(|e| (e.total_supply.clone(), e.block_index))
    }

    /// Records the supply observed at `block_index`; stale observations are
    /// rejected.
    pub fn update(&self, asset_id: &str, total_supply: &BigDecimal, block_index: u32) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = inner.get(asset_id) {
            if existing.block_index > block_index {
                return false;
            }
        }

        inner.insert(
            asset_id.to_string(),
            SupplyEntry {
                total_supply: total_supply.clone(),
                block_index,
            },
        );
        true
    }
}

impl Default for TotalSupplyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_get() {
        let cache = TotalSupplyCache::new();
        assert!(cache.get("x").is_none());

        assert!(cache.update("x", &BigDecimal::from(100), 10));
        assert_eq!(cache.get("x"), Some((BigDecimal::from(100), 10)));

        // Stale height is rejected.
        assert!(!cache.update("x", &BigDecimal::from(50), 9));
        assert_eq!(cache.get("x"), Some((BigDecimal::from(100), 10)));

        // Same height overwrites.
        assert!(cache.update("x", &BigDecimal::from(70), 10));
        assert_eq!(cache.get("x"), Some((BigDecimal::from(70), 10)));
    }
}
