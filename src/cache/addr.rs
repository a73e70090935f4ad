use std::collections::HashMap;
use std::sync::Mutex;

use bigdecimal::BigDecimal;
use num_bigint::Sign;
use once_cell::sync::Lazy;

use crate::models::addr::AddrAssetInfo;

/// The process-wide address cache.
pub static ADDR_CACHE: Lazy<AddrCache> = Lazy::new(AddrCache::new);

/// Typed result of a balance lookup; absence is explicit, never a sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceQuery {
    Present { balance: BigDecimal, block_index: u32 },
    Absent,
}

/// Outcome of a get-or-create on an (address, asset) slot. For a pre-existing
/// slot `balance` is the cached value before any update.
#[derive(Debug, Clone)]
pub struct AddrAssetSlot {
    pub created: bool,
    pub balance: BigDecimal,
}

struct AddrEntry {
    created_at: u64,
    last_transaction_time: u64,
    assets: HashMap<u32, AssetBalance>,
}

struct AssetBalance {
    balance: BigDecimal,
    /// The balance is up to date as of this block index.
    block_index: u32,
}

struct AliasTable {
    map: HashMap<String, u32>,
    next: u32,
}

/// address → {created-at, last-transaction-time, asset-alias → balance}.
///
/// Asset ids are interned to integer aliases to keep the per-address maps
/// small.
pub struct AddrCache {
    inner: Mutex<HashMap<String, AddrEntry>>,
    aliases: Mutex<AliasTable>,
}

impl AddrCache {
    pub fn new() -> Self {
        AddrCache {
            inner: Mutex::new(HashMap::new()),
            aliases: Mutex::new(AliasTable {
                map: HashMap::new(),
                next: 0,
            }),
        }
    }

    fn alias(&self, asset_id: &str) -> u32 {
        let mut aliases = self.aliases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(alias) = aliases.map.get(asset_id) {
            return *alias;
        }
        aliases.next += 1;
        let alias = aliases.next;
        aliases.map.insert(asset_id.to_string(), alias);
        alias
    }

    /// Replaces the cache contents with the persisted address/balance rows.
    pub fn load(&self, rows: Vec<AddrAssetInfo>) {
        let aliased: Vec<(AddrAssetInfo, u32)> = rows
            .into_iter()
            .map(|row| {
                let alias = self.alias(&row.asset_id);
                (row, alias)
            })
            .collect();

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clear();

        for (row, alias) in aliased {
            let entry = inner.entry(row.address.clone()).or_insert_with(|| AddrEntry {
                created_at: row.created_at,
                last_transaction_time: row.last_transaction_time,
                assets: HashMap::new(),
            });
            entry.assets.insert(
                alias,
                AssetBalance {
                    balance: row.balance,
                    block_index: 0,
                },
            );
        }
    }

    pub fn get_addr_times(&self, address: &str) -> Option<(u64, u64)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .get(address)
            .map(|e| (e.created_at, e.last_transaction_time))
    }

    /// Ensures an address entry exists; returns true when it was created.
    pub fn get_or_create_addr(&self, address: &str, tx_time: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.contains_key(address) {
            return false;
        }
        inner.insert(
            address.to_string(),
            AddrEntry {
                created_at: tx_time,
                last_transaction_time: tx_time,
                assets: HashMap::new(),
            },
        );
        true
    }

    /// Lowers `created_at`; returns whether the stored value changed.
    pub fn update_created_time(&self, address: &str, block_time: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get_mut(address) {
            Some(entry) if entry.created_at > block_time => {
                entry.created_at = block_time;
                true
            }
            _ => false,
        }
    }

    /// Raises `last_transaction_time`; returns whether the stored value
    /// changed.
    pub fn update_last_tx_time(&self, address: &str, last_tx_time: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get_mut(address) {
            Some(entry) if entry.last_transaction_time < last_tx_time => {
                entry.last_transaction_time = last_tx_time;
                true
            }
            _ => false,
        }
    }

    pub fn get_addr_asset(&self, address: &str, asset_id: &str) -> BalanceQuery {
        let alias = self.alias(asset_id);
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(address).and_then(|e| e.assets.get(&alias)) {
            Some(slot) => BalanceQuery::Present {
                balance: slot.balance.clone(),
                block_index: slot.block_index,
            },
            None => BalanceQuery::Absent,
        }
    }

    /// Gets or creates the (address, asset) slot. The address entry must
    /// already exist; `None` flags the violated precondition to the caller.
    pub fn get_or_create_addr_asset(
        &self,
        address: &str,
        asset_id: &str,
        balance: &BigDecimal,
    ) -> Option<AddrAssetSlot> {
        let alias = self.alias(asset_id);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = inner.get_mut(address)?;

        if let Some(slot) = entry.assets.get(&alias) {
            return Some(AddrAssetSlot {
                created: false,
                balance: slot.balance.clone(),
            });
        }

        entry.assets.insert(
            alias,
            AssetBalance {
                balance: balance.clone(),
                block_index: 0,
            },
        );
        Some(AddrAssetSlot {
            created: true,
            balance: balance.clone(),
        })
    }

    /// Creates the slot at a concrete block index. The address entry must
    /// already exist.
    pub fn create_addr_asset(
        &self,
        address: &str,
        asset_id: &str,
        balance: &BigDecimal,
        block_index: u32,
    ) -> bool {
        let alias = self.alias(asset_id);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = inner.get_mut(address) else {
            return false;
        };
        entry.assets.insert(
            alias,
            AssetBalance {
                balance: balance.clone(),
                block_index,
            },
        );
        true
    }

    /// Replaces the balance at `block_index`. Rejected when the stored index
    /// is newer; returns whether the balance actually changed.
    pub fn update_balance(
        &self,
        address: &str,
        asset_id: &str,
        balance: &BigDecimal,
        block_index: u32,
    ) -> bool {
        let alias = self.alias(asset_id);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = inner.get_mut(address).and_then(|e| e.assets.get_mut(&alias)) else {
            return false;
        };

        if block_index < slot.block_index {
            return false;
        }
        slot.block_index = block_index;

        if slot.balance != *balance {
            slot.balance = balance.clone();
            return true;
        }
        false
    }

    pub fn add_balance(
        &self,
        address: &str,
        asset_id: &str,
        delta: &BigDecimal,
        block_index: u32,
    ) -> bool {
        self.apply_delta(address, asset_id, delta, block_index, false)
    }

    pub fn subtract_balance(
        &self,
        address: &str,
        asset_id: &str,
        delta: &BigDecimal,
        block_index: u32,
    ) -> bool {
        self.apply_delta(address, asset_id, delta, block_index, true)
    }

    fn apply_delta(
        &self,
        address: &str,
        asset_id: &str,
        delta: &BigDecimal,
        block_index: u32,
        negate: bool,
    ) -> bool {
        if delta.sign() == Sign::NoSign {
            return false;
        }

        let alias = self.alias(asset_id);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = inner.get_mut(address).and_then(|e| e.assets.get_mut(&alias)) else {
            return false;
        };

        if block_index < slot.block_index {
            return false;
        }
        slot.block_index = block_index;

        if negate {
            slot.balance = &slot.balance - delta;
        } else {
            slot.balance = &slot.balance + delta;
        }
        true
    }

    /// Moves every old-asset slot to the new asset id after a contract
    /// migration, and recounts (addresses, holding addresses) for the new
    /// asset. The admin keeps an already-existing new-asset slot.
    pub fn migrate(&self, new_admin: &str, old_asset_id: &str, new_asset_id: &str) -> (u64, u64) {
        let old_alias = self.alias(old_asset_id);
        let new_alias = self.alias(new_asset_id);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut addrs = 0u64;
        let mut holding = 0u64;

        for (address, entry) in inner.iter_mut() {
            if address.as_str() == new_admin && entry.assets.contains_key(&new_alias) {
                continue;
            }

            if let Some(old) = entry.assets.remove(&old_alias) {
                addrs += 1;
                if old.balance.sign() == Sign::Plus {
                    holding += 1;
                }
                entry.assets.insert(new_alias, old);
            }
        }

        (addrs, holding)
    }
}

impl Default for AddrCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(address: &str, asset_id: &str, balance: i64) -> AddrAssetInfo {
        AddrAssetInfo {
            address: address.to_string(),
            created_at: 100,
            last_transaction_time: 200,
            asset_id: asset_id.to_string(),
            balance: BigDecimal::from(balance),
        }
    }

    #[test]
    fn test_load_and_lookup() {
        let cache = AddrCache::new();
        cache.load(vec![info("a1", "x", 7), info("a1", "y", 0), info("a2", "x", 1)]);

        assert_eq!(cache.get_addr_times("a1"), Some((100, 200)));
        match cache.get_addr_asset("a1", "x") {
            BalanceQuery::Present { balance, block_index } => {
                assert_eq!(balance, BigDecimal::from(7));
                assert_eq!(block_index, 0);
            }
            BalanceQuery::Absent => panic!("expected present"),
        }
        assert_eq!(cache.get_addr_asset("a1", "z"), BalanceQuery::Absent);
        assert_eq!(cache.get_addr_asset("nobody", "x"), BalanceQuery::Absent);
    }

    #[test]
    fn test_addr_times_monotonic() {
        let cache = AddrCache::new();
        assert!(cache.get_or_create_addr("a1", 500));
        assert!(!cache.get_or_create_addr("a1", 900));

        assert!(cache.update_created_time("a1", 400));
        assert!(!cache.update_created_time("a1", 450));
        assert!(cache.update_last_tx_time("a1", 600));
        assert!(!cache.update_last_tx_time("a1", 550));
        assert_eq!(cache.get_addr_times("a1"), Some((400, 600)));
    }

    #[test]
    fn test_block_index_guard() {
        let cache = AddrCache::new();
        cache.get_or_create_addr("a1", 1);
        cache.create_addr_asset("a1", "x", &BigDecimal::from(10), 50);

        // Older height is rejected outright.
        assert!(!cache.update_balance("a1", "x", &BigDecimal::from(99), 49));
        assert!(!cache.add_balance("a1", "x", &BigDecimal::from(1), 49));
        match cache.get_addr_asset("a1", "x") {
            BalanceQuery::Present { balance, block_index } => {
                assert_eq!(balance, BigDecimal::from(10));
                assert_eq!(block_index, 50);
            }
            BalanceQuery::Absent => panic!("expected present"),
        }

        // Same height applies.
        assert!(cache.add_balance("a1", "x", &BigDecimal::from(5), 50));
        assert!(cache.subtract_balance("a1", "x", &BigDecimal::from(3), 51));
        match cache.get_addr_asset("a1", "x") {
            BalanceQuery::Present { balance, block_index } => {
                assert_eq!(balance, BigDecimal::from(12));
                assert_eq!(block_index, 51);
            }
            BalanceQuery::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_update_balance_reports_change() {
        let cache = AddrCache::new();
        cache.get_or_create_addr("a1", 1);
        cache.create_addr_asset("a1", "x", &BigDecimal::from(10), 5);

        assert!(!cache.update_balance("a1", "x", &BigDecimal::from(10), 6));
        assert!(cache.update_balance("a1", "x", &BigDecimal::from(11), 7));
    }

    #[test]
    fn test_zero_delta_is_noop() {
        let cache = AddrCache::new();
        cache.get_or_create_addr("a1", 1);
        cache.create_addr_asset("a1", "x", &BigDecimal::from(10), 5);
        assert!(!cache.add_balance("a1", "x", &BigDecimal::from(0), 9));
        match cache.get_addr_asset("a1", "x") {
            BalanceQuery::Present { block_index, .. } => assert_eq!(block_index, 5),
            BalanceQuery::Absent => panic!("expected present"),
        }
    }

    #[test]
    fn test_get_or_create_slot() {
        let cache = AddrCache::new();
        cache.get_or_create_addr("a1", 1);

        let slot = cache
            .get_or_create_addr_asset("a1", "x", &BigDecimal::from(3))
            .unwrap();
        assert!(slot.created);
        assert_eq!(slot.balance, BigDecimal::from(3));

        let slot = cache
            .get_or_create_addr_asset("a1", "x", &BigDecimal::from(9))
            .unwrap();
        assert!(!slot.created);
        assert_eq!(slot.balance, BigDecimal::from(3));

        assert!(cache
            .get_or_create_addr_asset("missing", "x", &BigDecimal::from(1))
            .is_none());
    }

    #[test]
    fn test_migrate_moves_and_counts() {
        let cache = AddrCache::new();
        cache.load(vec![
            info("admin", "old", 5),
            info("admin", "new", 1),
            info("holder", "old", 2),
            info("empty", "old", 0),
            info("other", "misc", 3),
        ]);

        let (addrs, holding) = cache.migrate("admin", "old", "new");
        // Admin already holds the new asset and keeps it untouched.
        assert_eq!(addrs, 2);
        assert_eq!(holding, 1);

        assert_eq!(cache.get_addr_asset("holder", "old"), BalanceQuery::Absent);
        match cache.get_addr_asset("holder", "new") {
            BalanceQuery::Present { balance, .. } => assert_eq!(balance, BigDecimal::from(2)),
            BalanceQuery::Absent => panic!("expected present"),
        }
        match cache.get_addr_asset("admin", "new") {
            BalanceQuery::Present { balance, .. } => assert_eq!(balance, BigDecimal::from(1)),
            BalanceQuery::Absent => panic!("expected present"),
        }
    }
}
