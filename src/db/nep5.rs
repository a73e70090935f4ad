/// Persistence for the NEP5 pipeline: asset registration, transfers,
/// balance/supply refreshes, contract migration and the addr_tx fan-out.
/// Every write advances the NEP5 cursor pair in the same transaction.
use bigdecimal::BigDecimal;
use num_bigint::Sign;
use sqlx::{MySql, QueryBuilder, Row};
use std::collections::HashMap;
use tracing::error;

use crate::cache::{BalanceQuery, ADDR_CACHE};
use crate::db::addr::{create_addr_info_if_not_exist, update_addr_info};
use crate::db::counter::{bump_nep5_cursor, bump_nep5_tx_pk_for_addr_tx};
use crate::db::{retry_on_conn_err, Store};
use crate::error::{IndexerError, Result};
use crate::models::addr::AddrAsset;
use crate::models::asset::AssetKind;
use crate::models::nep5::{Nep5, Nep5Transaction, RegInfo};
use crate::models::tx::Transaction;

impl Store {
    /// All registered NEP5 asset ids with their decimals.
    pub async fn get_nep5_asset_decimals(&self) -> Result<HashMap<String, u8>> {
        retry_on_conn_err(|| self.try_get_nep5_asset_decimals()).await
    }

    async fn try_get_nep5_asset_decimals(&self) -> Result<HashMap<String, u8>> {
        let rows = sqlx::query("SELECT `asset_id`, `decimals` FROM `nep5`")
            .fetch_all(&self.pool)
            .await?;

        let mut decimals = HashMap::with_capacity(rows.len());
        for row in rows {
            let asset_id: String = row.try_get("asset_id")?;
            let value: u8 = row.try_get("decimals")?;
            decimals.insert(asset_id, value);
        }
        Ok(decimals)
    }

    /// Inserts a newly registered NEP5 asset together with its registration
    /// info and, when the admin already holds a balance, the admin's
    /// addr_asset row.
    pub async fn insert_nep5_asset(
        &self,
        t: &Transaction,
        nep5: &Nep5,
        reg_info: &RegInfo,
        addr_asset: Option<&AddrAsset>,
        at_height: u32,
    ) -> Result<()> {
        retry_on_conn_err(|| self.try_insert_nep5_asset(t, nep5, reg_info, addr_asset, at_height))
            .await
    }

    async fn try_insert_nep5_asset(
        &self,
        t: &Transaction,
        nep5: &Nep5,
        reg_info: &RegInfo,
        addr_asset: Option<&AddrAsset>,
        at_height: u32,
    ) -> Result<()> {
        let mut dbtx = self.pool().begin().await?;

        let result = sqlx::query(
            "INSERT INTO `nep5` (`asset_id`, `admin_address`, `name`, `symbol`, \
             `decimals`, `total_supply`, `txid`, `block_index`, `block_time`, \
             `addresses`, `holding_addresses`, `transfers`) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&nep5.asset_id)
        .bind(&nep5.admin_address)
        .bind(&nep5.name)
        .bind(&nep5.symbol)
        .bind(nep5.decimals)
        .bind(&nep5.total_supply)
        .bind(&nep5.txid)
        .bind(nep5.block_index)
        .bind(nep5.block_time)
        .bind(nep5.addresses)
        .bind(nep5.holding_addresses)
        .bind(nep5.transfers)
        .execute(&mut *dbtx)
        .await?;
        let nep5_pk = result.last_insert_id();

        sqlx::query(
            "INSERT INTO `nep5_reg_info` (`nep5_id`, `name`, `version`, `author`, \
             `email`, `description`, `need_storage`, `parameter_list`, `return_type`) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(nep5_pk)
        .bind(&reg_info.name)
        .bind(&reg_info.version)
        .bind(&reg_info.author)
        .bind(&reg_info.email)
        .bind(&reg_info.description)
        .bind(reg_info.need_storage)
        .bind(&reg_info.parameter_list)
        .bind(&reg_info.return_type)
        .execute(&mut *dbtx)
        .await?;

        if let Some(addr_asset) = addr_asset {
            if let Err(e) =
                create_addr_info_if_not_exist(&mut dbtx, t.block_time, &addr_asset.address).await
            {
                error!(
                    txid = %t.txid,
                    asset_id = %nep5.asset_id,
                    addr = %addr_asset.address,
                    at_height,
                    "failed to create admin address for nep5 asset"
                );
                return Err(e);
            }

            if ADDR_CACHE.get_addr_asset(&addr_asset.address, &addr_asset.asset_id)
                == BalanceQuery::Absent
            {
                ADDR_CACHE.create_addr_asset(
                    &addr_asset.address,
                    &addr_asset.asset_id,
                    &addr_asset.balance,
                    at_height,
                );
                sqlx::query(
                    "INSERT INTO `addr_asset` (`address`, `asset_id`, `balance`, \
                     `transactions`, `last_transaction_time`) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&addr_asset.address)
                .bind(&addr_asset.asset_id)
                .bind(&addr_asset.balance)
                .bind(addr_asset.transactions)
                .bind(addr_asset.last_transaction_time)
                .execute(&mut *dbtx)
                .await?;
            }
        }

        bump_nep5_cursor(&mut dbtx, t.id, -1).await?;
        dbtx.commit().await?;
        Ok(())
    }

    /// Applies one replayed transfer notification: address rows, the two
    /// balances, the per-asset counters, the nep5_tx row and the cursor pair
    /// carrying the concrete notification index.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_nep5_transaction(
        &self,
        t: &Transaction,
        app_log_idx: i32,
        asset_id: &str,
        from_addr: &str,
        from_balance: &BigDecimal,
        to_addr: &str,
        to_balance: &BigDecimal,
        transfer_value: &BigDecimal,
        total_supply: Option<&BigDecimal>,
    ) -> Result<()> {
        retry_on_conn_err(|| {
            self.try_insert_nep5_transaction(
                t,
                app_log_idx,
                asset_id,
                from_addr,
                from_balance,
                to_addr,
                to_balance,
                transfer_value,
                total_supply,
            )
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_insert_nep5_transaction(
        &self,
        t: &Transaction,
        app_log_idx: i32,
        asset_id: &str,
        from_addr: &str,
        from_balance: &BigDecimal,
        to_addr: &str,
        to_balance: &BigDecimal,
        transfer_value: &BigDecimal,
        total_supply: Option<&BigDecimal>,
    ) -> Result<()> {
        let mut dbtx = self.pool().begin().await?;

        let mut addrs_offset: i64 = 0;
        let mut holding_offset: i64 = 0;

        let mut pair: Vec<(&str, &BigDecimal)> =
            vec![(from_addr, from_balance), (to_addr, to_balance)];
        if from_addr == to_addr {
            pair.truncate(1);
        } else {
            // Sorted order to avoid deadlocks on the address rows.
            pair.sort_by(|a, b| a.0.cmp(b.0));
        }

        for (addr, balance) in pair {
            if addr.is_empty() {
                continue;
            }

            update_addr_info(&mut dbtx, t.block_time, &t.txid, addr, AssetKind::Nep5).await?;

            let slot = ADDR_CACHE
                .get_or_create_addr_asset(addr, asset_id, balance)
                .ok_or_else(|| {
                    IndexerError::invariant(format!("address {} missing from cache", addr))
                })?;

            if balance.sign() == Sign::Plus {
                if slot.created || slot.balance.sign() == Sign::NoSign {
                    holding_offset += 1;
                }
            } else if !slot.created && slot.balance.sign() == Sign::Plus {
                holding_offset -= 1;
            }

            if slot.created {
                addrs_offset += 1;
                sqlx::query(
                    "INSERT INTO `addr_asset` (`address`, `asset_id`, `balance`, \
                     `transactions`, `last_transaction_time`) VALUES (?, ?, ?, 1, ?)",
                )
                .bind(addr)
                .bind(asset_id)
                .bind(balance)
                .bind(t.block_time)
                .execute(&mut *dbtx)
                .await?;
            } else {
                ADDR_CACHE.update_balance(addr, asset_id, balance, t.block_index);
                sqlx::query(
                    "UPDATE `addr_asset` SET `balance` = ?, `transactions` = `transactions` + 1, \
                     `last_transaction_time` = ? WHERE `address` = ? AND `asset_id` = ? LIMIT 1",
                )
                .bind(balance)
                .bind(t.block_time)
                .bind(addr)
                .bind(asset_id)
                .execute(&mut *dbtx)
                .await?;
            }
        }

        sqlx::query(
            "UPDATE `nep5` SET `addresses` = `addresses` + ?, \
             `holding_addresses` = `holding_addresses` + ?, `transfers` = `transfers` + 1 \
             WHERE `asset_id` = ? LIMIT 1",
        )
        .bind(addrs_offset)
        .bind(holding_offset)
        .bind(asset_id)
        .execute(&mut *dbtx)
        .await?;

        sqlx::query(
            "INSERT INTO `nep5_tx` (`txid`, `asset_id`, `from`, `to`, `value`, \
             `block_index`, `block_time`) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&t.txid)
        .bind(asset_id)
        .bind(from_addr)
        .bind(to_addr)
        .bind(transfer_value)
        .bind(t.block_index)
        .bind(t.block_time)
        .execute(&mut *dbtx)
        .await?;

        // Storage-injection detection refreshed the supply.
        if let Some(total_supply) = total_supply {
            sqlx::query("UPDATE `nep5` SET `total_supply` = ? WHERE `asset_id` = ? LIMIT 1")
                .bind(total_supply)
                .bind(asset_id)
                .execute(&mut *dbtx)
                .await?;
        }

        bump_nep5_cursor(&mut dbtx, t.id, app_log_idx).await?;
        dbtx.commit().await?;
        Ok(())
    }

    /// Refreshes a caller's balance and the asset's total supply after a
    /// non-transfer contract call.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_nep5_total_supply_and_addr_asset(
        &self,
        block_time: u64,
        block_index: u32,
        addr: &str,
        balance: &BigDecimal,
        asset_id: &str,
        total_supply: &BigDecimal,
    ) -> Result<()> {
        retry_on_conn_err(|| {
            self.try_update_nep5_total_supply_and_addr_asset(
                block_time,
                block_index,
                addr,
                balance,
                asset_id,
                total_supply,
            )
        })
        .await
    }

    async fn try_update_nep5_total_supply_and_addr_asset(
        &self,
        block_time: u64,
        block_index: u32,
        addr: &str,
        balance: &BigDecimal,
        asset_id: &str,
        total_supply: &BigDecimal,
    ) -> Result<()> {
        let mut dbtx = self.pool().begin().await?;

        if balance.sign() == Sign::Plus {
            if let Err(e) = create_addr_info_if_not_exist(&mut dbtx, block_time, addr).await {
                error!(
                    block_time,
                    block_index,
                    addr,
                    asset_id,
                    "failed to create address for balance refresh"
                );
                return Err(e);
            }

            let slot = ADDR_CACHE
                .get_or_create_addr_asset(addr, asset_id, balance)
                .ok_or_else(|| {
                    IndexerError::invariant(format!("address {} missing from cache", addr))
                })?;

            if slot.created {
                sqlx::query(
                    "INSERT INTO `addr_asset` (`address`, `asset_id`, `balance`, \
                     `transactions`, `last_transaction_time`) VALUES (?, ?, ?, 0, ?)",
                )
                .bind(addr)
                .bind(asset_id)
                .bind(balance)
                .bind(block_time)
                .execute(&mut *dbtx)
                .await?;

                sqlx::query(
                    "UPDATE `nep5` SET `addresses` = `addresses` + 1, \
                     `holding_addresses` = `holding_addresses` + 1 \
                     WHERE `asset_id` = ? LIMIT 1",
                )
                .bind(asset_id)
                .execute(&mut *dbtx)
                .await?;
            } else if ADDR_CACHE.update_balance(addr, asset_id, balance, block_index) {
                sqlx::query(
                    "UPDATE `addr_asset` SET `balance` = ? \
                     WHERE `address` = ? AND `asset_id` = ? LIMIT 1",
                )
                .bind(balance)
                .bind(addr)
                .bind(asset_id)
                .execute(&mut *dbtx)
                .await?;
            }
        } else {
            // Balance dropped to zero; the holder count shrinks once.
            if let BalanceQuery::Present { .. } = ADDR_CACHE.get_addr_asset(addr, asset_id) {
                if ADDR_CACHE.update_balance(addr, asset_id, balance, block_index) {
                    sqlx::query(
                        "UPDATE `nep5` SET `holding_addresses` = `holding_addresses` - 1 \
                         WHERE `asset_id` = ? LIMIT 1",
                    )
                    .bind(asset_id)
                    .execute(&mut *dbtx)
                    .await?;
                }
            }
        }

        sqlx::query("UPDATE `nep5` SET `total_supply` = ? WHERE `asset_id` = ? LIMIT 1")
            .bind(total_supply)
            .bind(asset_id)
            .execute(&mut *dbtx)
            .await?;

        dbtx.commit().await?;
        Ok(())
    }

    /// Contract migration: hides the old asset, remaps addr_asset rows and
    /// the cache to the new asset id (dropping would-be duplicates first),
    /// recounts holders and records the migration.
    pub async fn handle_nep5_migrate(
        &self,
        new_asset_admin: &str,
        old_asset_id: &str,
        new_asset_id: &str,
        tx_pk: u64,
        txid: &str,
    ) -> Result<()> {
        retry_on_conn_err(|| {
            self.try_handle_nep5_migrate(new_asset_admin, old_asset_id, new_asset_id, tx_pk, txid)
        })
        .await
    }

    async fn try_handle_nep5_migrate(
        &self,
        new_asset_admin: &str,
        old_asset_id: &str,
        new_asset_id: &str,
        tx_pk: u64,
        txid: &str,
    ) -> Result<()> {
        let mut dbtx = self.pool().begin().await?;

        sqlx::query("UPDATE `nep5` SET `visible` = FALSE WHERE `asset_id` = ? LIMIT 1")
            .bind(old_asset_id)
            .execute(&mut *dbtx)
            .await?;

        // Addresses holding both assets would collide after the rewrite;
        // their new-asset rows go away first.
        sqlx::query(
            "DELETE FROM `addr_asset` WHERE `asset_id` = ? AND `address` IN ( \
             SELECT `address` FROM (SELECT `address` FROM `addr_asset` \
             WHERE `asset_id` = ? AND `address` IN ( \
             SELECT `address` FROM `addr_asset` WHERE `asset_id` IN (?, ?) \
             GROUP BY `address` HAVING COUNT(`asset_id`) = 2)) a)",
        )
        .bind(new_asset_id)
        .bind(new_asset_id)
        .bind(old_asset_id)
        .bind(new_asset_id)
        .execute(&mut *dbtx)
        .await?;

        sqlx::query("UPDATE `addr_asset` SET `asset_id` = ? WHERE `asset_id` = ?")
            .bind(new_asset_id)
            .bind(old_asset_id)
            .execute(&mut *dbtx)
            .await?;

        let (addrs, holding_addrs) = ADDR_CACHE.migrate(new_asset_admin, old_asset_id, new_asset_id);
        sqlx::query(
            "UPDATE `nep5` SET `addresses` = ?, `holding_addresses` = ? \
             WHERE `asset_id` = ? LIMIT 1",
        )
        .bind(addrs)
        .bind(holding_addrs)
        .bind(new_asset_id)
        .execute(&mut *dbtx)
        .await?;

        sqlx::query(
            "INSERT INTO `nep5_migrate` (`old_asset_id`, `new_asset_id`, `migrate_txid`) \
             VALUES (?, ?, ?)",
        )
        .bind(old_asset_id)
        .bind(new_asset_id)
        .bind(txid)
        .execute(&mut *dbtx)
        .await?;

        bump_nep5_cursor(&mut dbtx, tx_pk, -1).await?;
        dbtx.commit().await?;
        Ok(())
    }

    /// Advances the NEP5 cursor pair on its own (txs with nothing to store).
    pub async fn update_last_tx_pk_for_nep5(&self, tx_pk: u64, app_log_idx: i32) -> Result<()> {
        retry_on_conn_err(|| self.try_update_last_tx_pk_for_nep5(tx_pk, app_log_idx)).await
    }

    async fn try_update_last_tx_pk_for_nep5(&self, tx_pk: u64, app_log_idx: i32) -> Result<()> {
        sqlx::query(
            "UPDATE `counter` SET `last_tx_pk_for_nep5` = ?, `app_log_idx` = ? \
             WHERE `id` = 1 LIMIT 1",
        )
        .bind(tx_pk)
        .bind(app_log_idx)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Paged nep5_tx rows for the addr_tx fan-out.
    pub async fn get_nep5_tx_records(&self, pk: u64, limit: i64) -> Result<Vec<Nep5Transaction>> {
        retry_on_conn_err(|| self.try_get_nep5_tx_records(pk, limit)).await
    }

    async fn try_get_nep5_tx_records(&self, pk: u64, limit: i64) -> Result<Vec<Nep5Transaction>> {
        let records = sqlx::query_as::<_, Nep5Transaction>(
            "SELECT `id`, `txid`, `asset_id`, `from`, `to`, `value`, `block_index`, \
             `block_time` FROM `nep5_tx` WHERE `id` > ? ORDER BY `id` ASC LIMIT ?",
        )
        .bind(pk)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Fans NEP5 transfers out into per-address `addr_tx` rows; duplicates
    /// are left untouched.
    pub async fn insert_nep5_addr_tx(
        &self,
        records: &[Nep5Transaction],
        last_pk: u64,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        retry_on_conn_err(|| self.try_insert_nep5_addr_tx(records, last_pk)).await
    }

    async fn try_insert_nep5_addr_tx(
        &self,
        records: &[Nep5Transaction],
        last_pk: u64,
    ) -> Result<()> {
        let mut rows: Vec<(&str, &str, u64)> = Vec::new();
        for rec in records {
            if !rec.from.is_empty() {
                rows.push((&rec.txid, &rec.from, rec.block_time));
            }
            if !rec.to.is_empty() {
                rows.push((&rec.txid, &rec.to, rec.block_time));
            }
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut dbtx = self.pool().begin().await?;

        let mut qb = QueryBuilder::<MySql>::new(
            "INSERT INTO `addr_tx` (`txid`, `address`, `block_time`, `asset_type`) ",
        );
        qb.push_values(&rows, |mut row, (txid, address, block_time)| {
            row.push_bind(*txid)
                .push_bind(*address)
                .push_bind(*block_time)
                .push_bind(AssetKind::Nep5.as_str());
        });
        qb.push(" ON DUPLICATE KEY UPDATE `address` = `address`");
        qb.build().execute(&mut *dbtx).await?;

        bump_nep5_tx_pk_for_addr_tx(&mut dbtx, last_pk).await?;
        dbtx.commit().await?;
        Ok(())
    }
}
