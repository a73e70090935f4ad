/// Address-table maintenance shared by the asset and NEP5 pipelines.
///
/// The cache is consulted before touching `created_at` and
/// `last_transaction_time` so concurrent tasks observing blocks out of time
/// order never move them the wrong way.
use sqlx::{MySql, Transaction};
use tracing::error;

use crate::cache::ADDR_CACHE;
use crate::db::{retry_on_conn_err, Store};
use crate::error::Result;
use crate::models::addr::AddrAssetInfo;
use crate::models::asset::AssetKind;

impl Store {
    /// Loads every address together with its balances to warm the cache.
    pub async fn get_addr_asset_info(&self) -> Result<Vec<AddrAssetInfo>> {
        retry_on_conn_err(|| self.try_get_addr_asset_info()).await
    }

    async fn try_get_addr_asset_info(&self) -> Result<Vec<AddrAssetInfo>> {
        let rows = sqlx::query_as::<_, AddrAssetInfo>(
            "SELECT `address`.`address`, `address`.`created_at`, \
             `address`.`last_transaction_time`, `addr_asset`.`asset_id`, \
             `addr_asset`.`balance` FROM `addr_asset` LEFT JOIN `address` \
             ON `address`.`address` = `addr_asset`.`address`",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Creates the address row on first sighting, otherwise bumps the per-kind
/// transaction counter and moves the timestamps only in their allowed
/// direction.
pub(crate) async fn update_addr_info(
    dbtx: &mut Transaction<'_, MySql>,
    block_time: u64,
    txid: &str,
    addr: &str,
    kind: AssetKind,
) -> Result<()> {
    let (incr_asset, incr_nep5): (i64, i64) = match kind {
        AssetKind::Asset => (1, 0),
        AssetKind::Nep5 => (0, 1),
    };

    let created = ADDR_CACHE.get_or_create_addr(addr, block_time);

    if created {
        let result = sqlx::query(
            "INSERT INTO `address` (`address`, `created_at`, `last_transaction_time`, \
             `trans_asset`, `trans_nep5`) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(addr)
        .bind(block_time)
        .bind(block_time)
        .bind(incr_asset)
        .bind(incr_nep5)
        .execute(&mut **dbtx)
        .await;
        if let Err(e) = result {
            error!(txid, addr, kind = kind.as_str(), "failed to insert address row");
            return Err(e.into());
        }
        return Ok(());
    }

    // The asset and NEP5 tasks run in parallel, so either may see a block
    // time the other already passed; the cache arbitrates which column moves.
    let update_created = ADDR_CACHE.update_created_time(addr, block_time);
    let update_last = ADDR_CACHE.update_last_tx_time(addr, block_time);

    let mut query = String::from(
        "UPDATE `address` SET `trans_asset` = `trans_asset` + ?, \
         `trans_nep5` = `trans_nep5` + ?",
    );
    if update_created {
        query.push_str(", `created_at` = ?");
    }
    if update_last {
        query.push_str(", `last_transaction_time` = ?");
    }
    query.push_str(" WHERE `address` = ? LIMIT 1");

    let mut q = sqlx::query(&query).bind(incr_asset).bind(incr_nep5);
    if update_created {
        q = q.bind(block_time);
    }
    if update_last {
        q = q.bind(block_time);
    }
    q.bind(addr).execute(&mut **dbtx).await?;
    Ok(())
}

/// Inserts the address row with zeroed counters if this address was never
/// seen before.
pub(crate) async fn create_addr_info_if_not_exist(
    dbtx: &mut Transaction<'_, MySql>,
    block_time: u64,
    addr: &str,
) -> Result<()> {
    if !ADDR_CACHE.get_or_create_addr(addr, block_time) {
        return Ok(());
    }

    let result = sqlx::query(
        "INSERT INTO `address` (`address`, `created_at`, `last_transaction_time`, \
         `trans_asset`, `trans_nep5`) VALUES (?, ?, ?, 0, 0)",
    )
    .bind(addr)
    .bind(block_time)
    .bind(block_time)
    .execute(&mut **dbtx)
    .await;
    if let Err(e) = result {
        error!(addr, "failed to insert address row");
        return Err(e.into());
    }
    Ok(())
}
