/// Transaction reads and the asset-pipeline write path: UTXO consumption and
/// creation, address/asset balances, claim/issue availability and the
/// `asset_tx` index.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use bigdecimal::BigDecimal;
use sqlx::{MySql, QueryBuilder, Transaction as DbTransaction};

use crate::cache::ADDR_CACHE;
use crate::db::addr::update_addr_info;
use crate::db::counter::{bump_cursor, Cursor};
use crate::db::{retry_on_conn_err, Store};
use crate::error::{IndexerError, Result};
use crate::models::asset::{AssetKind, GAS_ASSET_ID};
use crate::models::tx::{
    AddrAssetIdTx, Transaction, TransactionScripts, TransactionVin, TransactionVout, TxType,
};

const TX_COLUMNS: &str = "`id`, `block_index`, `block_time`, `txid`, `size`, `type`, \
                          `version`, `sys_fee`, `net_fee`, `nonce`, `script`, `gas`";

impl Store {
    /// Transactions with `pk >= start_pk` that move native assets (have at
    /// least one vin or vout), in pk order.
    pub async fn get_txs(&self, start_pk: u64, limit: i64) -> Result<Vec<Transaction>> {
        retry_on_conn_err(|| self.try_get_txs(start_pk, limit)).await
    }

    async fn try_get_txs(&self, start_pk: u64, limit: i64) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM `tx` WHERE `id` >= ? AND \
             (EXISTS(SELECT `id` FROM `tx_vin` WHERE `from` = `tx`.`txid` LIMIT 1) OR \
              EXISTS(SELECT `id` FROM `tx_vout` WHERE `txid` = `tx`.`txid` LIMIT 1)) \
             ORDER BY `id` ASC LIMIT ?",
            TX_COLUMNS
        );
        let txs = sqlx::query_as::<_, Transaction>(&query)
            .bind(start_pk)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(txs)
    }

    /// Invocation transactions with `pk >= start_pk`, in pk order.
    pub async fn get_invocation_txs(&self, start_pk: u64, limit: i64) -> Result<Vec<Transaction>> {
        retry_on_conn_err(|| self.try_get_invocation_txs(start_pk, limit)).await
    }

    async fn try_get_invocation_txs(&self, start_pk: u64, limit: i64) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM `tx` WHERE `id` >= ? AND `type` = ? ORDER BY `id` ASC LIMIT ?",
            TX_COLUMNS
        );
        let txs = sqlx::query_as::<_, Transaction>(&query)
            .bind(start_pk)
            .bind(TxType::Invocation.name())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(txs)
    }

    /// Vins and vouts of the given transactions, keyed by txid.
    pub async fn get_vin_vout(
        &self,
        txids: &[String],
    ) -> Result<(
        HashMap<String, Vec<TransactionVin>>,
        HashMap<String, Vec<TransactionVout>>,
    )> {
        let vins = self.get_vins(txids).await?;
        let vouts = self.get_vouts(txids).await?;
        Ok((vins, vouts))
    }

    pub async fn get_vins(&self, txids: &[String]) -> Result<HashMap<String, Vec<TransactionVin>>> {
        retry_on_conn_err(|| self.try_get_vins(txids)).await
    }

    async fn try_get_vins(&self, txids: &[String]) -> Result<HashMap<String, Vec<TransactionVin>>> {
        let mut map: HashMap<String, Vec<TransactionVin>> = HashMap::new();
        if txids.is_empty() {
            return Ok(map);
        }

        let mut qb = QueryBuilder::<MySql>::new(
            "SELECT `from`, `txid`, `vout` FROM `tx_vin` WHERE `from` IN (",
        );
        let mut separated = qb.separated(", ");
        for txid in txids {
            separated.push_bind(txid);
        }
        qb.push(")");

        let rows = qb
            .build_query_as::<TransactionVin>()
            .fetch_all(&self.pool)
            .await?;
        for vin in rows {
            map.entry(vin.from.clone()).or_default().push(vin);
        }
        Ok(map)
    }

    pub async fn get_vouts(
        &self,
        txids: &[String],
    ) -> Result<HashMap<String, Vec<TransactionVout>>> {
        retry_on_conn_err(|| self.try_get_vouts(txids)).await
    }

    async fn try_get_vouts(
        &self,
        txids: &[String],
    ) -> Result<HashMap<String, Vec<TransactionVout>>> {
        let mut map: HashMap<String, Vec<TransactionVout>> = HashMap::new();
        if txids.is_empty() {
            return Ok(map);
        }

        let mut qb = QueryBuilder::<MySql>::new(
            "SELECT `txid`, `n`, `asset_id`, `value`, `address` FROM `tx_vout` WHERE `txid` IN (",
        );
        let mut separated = qb.separated(", ");
        for txid in txids {
            separated.push_bind(txid);
        }
        qb.push(")");

        let rows = qb
            .build_query_as::<TransactionVout>()
            .fetch_all(&self.pool)
            .await?;
        for vout in rows {
            map.entry(vout.txid.clone()).or_default().push(vout);
        }
        Ok(map)
    }

    /// Single vout lookup by (txid, n).
    pub async fn get_vout(&self, txid: &str, n: u16) -> Result<Option<TransactionVout>> {
        retry_on_conn_err(|| self.try_get_vout(txid, n)).await
    }

    async fn try_get_vout(&self, txid: &str, n: u16) -> Result<Option<TransactionVout>> {
        let vout = sqlx::query_as::<_, TransactionVout>(
            "SELECT `txid`, `n`, `asset_id`, `value`, `address` FROM `tx_vout` \
             WHERE `txid` = ? AND `n` = ?",
        )
        .bind(txid)
        .bind(n)
        .fetch_optional(&self.pool)
        .await?;
        Ok(vout)
    }

    pub async fn get_tx_scripts(&self, txid: &str) -> Result<Vec<TransactionScripts>> {
        retry_on_conn_err(|| self.try_get_tx_scripts(txid)).await
    }

    async fn try_get_tx_scripts(&self, txid: &str) -> Result<Vec<TransactionScripts>> {
        let scripts = sqlx::query_as::<_, TransactionScripts>(
            "SELECT `txid`, `invocation`, `verification` FROM `tx_scripts` WHERE `txid` = ?",
        )
        .bind(txid)
        .fetch_all(&self.pool)
        .await?;
        Ok(scripts)
    }

    /// Highest pk among transactions that move native assets.
    pub async fn highest_tx_pk(&self) -> Result<u64> {
        retry_on_conn_err(|| self.try_highest_tx_pk()).await
    }

    async fn try_highest_tx_pk(&self) -> Result<u64> {
        let pk: Option<(u64,)> = sqlx::query_as(
            "SELECT `id` FROM `tx` WHERE \
             EXISTS(SELECT `id` FROM `tx_vin` WHERE `from` = `tx`.`txid` LIMIT 1) OR \
             EXISTS(SELECT `id` FROM `tx_vout` WHERE `txid` = `tx`.`txid` LIMIT 1) \
             ORDER BY `id` DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(pk.map(|p| p.0).unwrap_or(0))
    }

    /// Highest pk among invocation transactions.
    pub async fn max_invocation_tx_pk(&self) -> Result<u64> {
        retry_on_conn_err(|| self.try_max_invocation_tx_pk()).await
    }

    async fn try_max_invocation_tx_pk(&self) -> Result<u64> {
        let pk: Option<(u64,)> =
            sqlx::query_as("SELECT `id` FROM `tx` WHERE `type` = ? ORDER BY `id` DESC LIMIT 1")
                .bind(TxType::Invocation.name())
                .fetch_optional(&self.pool)
                .await?;
        Ok(pk.map(|p| p.0).unwrap_or(0))
    }

    /// Applies one transaction's vins and vouts: flips consumed UTXOs,
    /// rewrites balances, maintains the address/asset counters and advances
    /// `last_tx_pk`, atomically.
    pub async fn apply_vins_vouts(
        &self,
        t: &Transaction,
        vins: &[TransactionVin],
        vouts: &[TransactionVout],
    ) -> Result<()> {
        retry_on_conn_err(|| self.try_apply_vins_vouts(t, vins, vouts)).await
    }

    async fn try_apply_vins_vouts(
        &self,
        t: &Transaction,
        vins: &[TransactionVin],
        vouts: &[TransactionVout],
    ) -> Result<()> {
        let mut dbtx = self.pool().begin().await?;

        let vin_vouts = handle_vins(&mut dbtx, t.block_index, vins).await?;

        let (asset_ids, addr_asset_pair) = count_tx_info(&vin_vouts, vouts);

        // Addresses in sorted order to avoid deadlocks between writers.
        for addr in addr_asset_pair.keys() {
            update_addr_info(&mut dbtx, t.block_time, &t.txid, addr, AssetKind::Asset).await?;
        }

        handle_vouts(&mut dbtx, t.block_index, t.block_time, vouts).await?;

        if t.tx_type == TxType::Claim.name() {
            handle_claim_tx(&mut dbtx, vouts).await?;
        }
        if t.tx_type == TxType::Issue.name() {
            handle_issue_tx(&mut dbtx, vouts).await?;
        }

        update_tx_info(&mut dbtx, t.block_time, &t.txid, &asset_ids, &addr_asset_pair).await?;

        bump_cursor(&mut dbtx, Cursor::LastTxPk, t.id as i64).await?;
        dbtx.commit().await?;
        Ok(())
    }

    /// Persists deduplicated (address, asset, txid) triples in chunks of 100
    /// and advances `last_asset_tx_pk`.
    pub async fn record_addr_asset_id_tx(
        &self,
        records: &[AddrAssetIdTx],
        max_pk: i64,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        retry_on_conn_err(|| self.try_record_addr_asset_id_tx(records, max_pk)).await
    }

    async fn try_record_addr_asset_id_tx(
        &self,
        records: &[AddrAssetIdTx],
        max_pk: i64,
    ) -> Result<()> {
        let mut dbtx = self.pool().begin().await?;

        for chunk in records.chunks(100) {
            let mut qb = QueryBuilder::<MySql>::new(
                "INSERT INTO `asset_tx` (`address`, `asset_id`, `txid`) ",
            );
            qb.push_values(chunk, |mut row, rec| {
                row.push_bind(&rec.address)
                    .push_bind(&rec.asset_id)
                    .push_bind(&rec.txid);
            });
            qb.build().execute(&mut *dbtx).await?;
        }

        bump_cursor(&mut dbtx, Cursor::LastAssetTxPk, max_pk).await?;
        dbtx.commit().await?;
        Ok(())
    }
}

/// Marks every consumed UTXO and subtracts the spent value from the owner's
/// balance; returns the resolved source vouts.
async fn handle_vins(
    dbtx: &mut DbTransaction<'_, MySql>,
    block_index: u32,
    vins: &[TransactionVin],
) -> Result<Vec<TransactionVout>> {
    let mut vin_vouts = Vec::with_capacity(vins.len());

    for vin in vins {
        sqlx::query("UPDATE `utxo` SET `used_in_tx` = ? WHERE `txid` = ? AND `n` = ? LIMIT 1")
            .bind(&vin.from)
            .bind(&vin.txid)
            .bind(vin.vout)
            .execute(&mut **dbtx)
            .await?;

        let vin_vout = sqlx::query_as::<_, TransactionVout>(
            "SELECT `txid`, `n`, `asset_id`, `value`, `address` FROM `tx_vout` \
             WHERE `txid` = ? AND `n` = ?",
        )
        .bind(&vin.txid)
        .bind(vin.vout)
        .fetch_optional(&mut **dbtx)
        .await?
        .ok_or_else(|| {
            IndexerError::invariant(format!(
                "vin references missing vout ({}, {})",
                vin.txid, vin.vout
            ))
        })?;

        // The subtraction below always hits the table; the cache only mirrors
        // it when its height allows.
        ADDR_CACHE.subtract_balance(
            &vin_vout.address,
            &vin_vout.asset_id,
            &vin_vout.value,
            block_index,
        );
        sqlx::query(
            "UPDATE `addr_asset` SET `balance` = `balance` - ? \
             WHERE `address` = ? AND `asset_id` = ? LIMIT 1",
        )
        .bind(&vin_vout.value)
        .bind(&vin_vout.address)
        .bind(&vin_vout.asset_id)
        .execute(&mut **dbtx)
        .await?;

        vin_vouts.push(vin_vout);
    }

    Ok(vin_vouts)
}

/// Inserts produced UTXOs and adds their values to the owners' balances.
async fn handle_vouts(
    dbtx: &mut DbTransaction<'_, MySql>,
    block_index: u32,
    block_time: u64,
    vouts: &[TransactionVout],
) -> Result<()> {
    for vout in vouts {
        sqlx::query(
            "INSERT INTO `utxo` (`address`, `txid`, `n`, `asset_id`, `value`, `used_in_tx`) \
             VALUES (?, ?, ?, ?, ?, NULL)",
        )
        .bind(&vout.address)
        .bind(&vout.txid)
        .bind(vout.n)
        .bind(&vout.asset_id)
        .bind(&vout.value)
        .execute(&mut **dbtx)
        .await?;

        ADDR_CACHE.get_or_create_addr(&vout.address, block_time);
        let slot = ADDR_CACHE
            .get_or_create_addr_asset(&vout.address, &vout.asset_id, &vout.value)
            .ok_or_else(|| {
                IndexerError::invariant(format!("address {} missing from cache", vout.address))
            })?;

        if slot.created {
            // Transactions counter and last transaction time are set later.
            sqlx::query(
                "INSERT INTO `addr_asset` (`address`, `asset_id`, `balance`, \
                 `transactions`, `last_transaction_time`) VALUES (?, ?, ?, 0, 0)",
            )
            .bind(&vout.address)
            .bind(&vout.asset_id)
            .bind(&vout.value)
            .execute(&mut **dbtx)
            .await?;

            sqlx::query(
                "UPDATE `asset` SET `addresses` = `addresses` + 1 WHERE `asset_id` = ? LIMIT 1",
            )
            .bind(&vout.asset_id)
            .execute(&mut **dbtx)
            .await?;
        } else {
            ADDR_CACHE.add_balance(&vout.address, &vout.asset_id, &vout.value, block_index);
            sqlx::query(
                "UPDATE `addr_asset` SET `balance` = `balance` + ? \
                 WHERE `address` = ? AND `asset_id` = ? LIMIT 1",
            )
            .bind(&vout.value)
            .bind(&vout.address)
            .bind(&vout.asset_id)
            .execute(&mut **dbtx)
            .await?;
        }
    }

    Ok(())
}

/// Claimed GAS enters circulation.
async fn handle_claim_tx(
    dbtx: &mut DbTransaction<'_, MySql>,
    vouts: &[TransactionVout],
) -> Result<()> {
    let mut gas = BigDecimal::default();
    for vout in vouts {
        if vout.asset_id == GAS_ASSET_ID {
            gas = &gas + &vout.value;
        }
    }

    sqlx::query("UPDATE `asset` SET `available` = `available` + ? WHERE `asset_id` = ? LIMIT 1")
        .bind(&gas)
        .bind(GAS_ASSET_ID)
        .execute(&mut **dbtx)
        .await?;
    Ok(())
}

/// Issued vout values raise the issued asset's availability.
async fn handle_issue_tx(
    dbtx: &mut DbTransaction<'_, MySql>,
    vouts: &[TransactionVout],
) -> Result<()> {
    let mut issued: BTreeMap<&str, BigDecimal> = BTreeMap::new();
    for vout in vouts {
        if vout.asset_id != GAS_ASSET_ID {
            let entry = issued.entry(&vout.asset_id).or_default();
            *entry = &*entry + &vout.value;
        }
    }

    for (asset_id, increment) in issued {
        sqlx::query(
            "UPDATE `asset` SET `available` = `available` + ? WHERE `asset_id` = ? LIMIT 1",
        )
        .bind(&increment)
        .bind(asset_id)
        .execute(&mut **dbtx)
        .await?;
    }
    Ok(())
}

/// Assets and (address → asset set) touched by the transaction, covering
/// both consumed and produced vouts. Sorted containers keep the later row
/// updates in deterministic order.
fn count_tx_info(
    vin_vouts: &[TransactionVout],
    vouts: &[TransactionVout],
) -> (BTreeSet<String>, BTreeMap<String, BTreeSet<String>>) {
    let mut asset_ids = BTreeSet::new();
    let mut addr_asset_pair: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for vout in vin_vouts.iter().chain(vouts.iter()) {
        asset_ids.insert(vout.asset_id.clone());
        addr_asset_pair
            .entry(vout.address.clone())
            .or_default()
            .insert(vout.asset_id.clone());
    }

    (asset_ids, addr_asset_pair)
}

/// Per-address `addr_tx` rows and transaction counters for everything the
/// transaction touched.
async fn update_tx_info(
    dbtx: &mut DbTransaction<'_, MySql>,
    block_time: u64,
    txid: &str,
    asset_ids: &BTreeSet<String>,
    addr_asset_pair: &BTreeMap<String, BTreeSet<String>>,
) -> Result<()> {
    for (addr, assets) in addr_asset_pair {
        sqlx::query(
            "INSERT INTO `addr_tx` (`txid`, `address`, `block_time`, `asset_type`) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(txid)
        .bind(addr)
        .bind(block_time)
        .bind(AssetKind::Asset.as_str())
        .execute(&mut **dbtx)
        .await?;

        for asset_id in assets {
            sqlx::query(
                "UPDATE `addr_asset` SET `transactions` = `transactions` + 1, \
                 `last_transaction_time` = ? WHERE `address` = ? AND `asset_id` = ? LIMIT 1",
            )
            .bind(block_time)
            .bind(addr)
            .bind(asset_id)
            .execute(&mut **dbtx)
            .await?;
        }
    }

    for asset_id in asset_ids {
        sqlx::query(
            "UPDATE `asset` SET `transactions` = `transactions` + 1 WHERE `asset_id` = ? LIMIT 1",
        )
        .bind(asset_id)
        .execute(&mut **dbtx)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn vout(txid: &str, n: u16, asset: &str, value: &str, address: &str) -> TransactionVout {
        TransactionVout {
            txid: txid.to_string(),
            n,
            asset_id: asset.to_string(),
            value: BigDecimal::from_str(value).unwrap(),
            address: address.to_string(),
        }
    }

    #[test]
    fn test_count_tx_info_merges_sides() {
        let consumed = vec![vout("x", 0, "asset-1", "10", "A")];
        let produced = vec![
            vout("t1", 0, "asset-1", "10", "B"),
            vout("t1", 1, "asset-2", "3", "A"),
        ];

        let (assets, pairs) = count_tx_info(&consumed, &produced);
        assert_eq!(
            assets.iter().collect::<Vec<_>>(),
            vec!["asset-1", "asset-2"]
        );
        // Sorted address order.
        let addrs: Vec<_> = pairs.keys().collect();
        assert_eq!(addrs, vec!["A", "B"]);
        assert_eq!(pairs["A"].len(), 2);
        assert_eq!(pairs["B"].len(), 1);
    }
}
