/// Atomic persistence of one ordered block batch: block rows, transaction
/// rows and their children, native assets, per-type counters and the
/// `last_block_index` cursor, all in a single transaction.
use sqlx::{MySql, QueryBuilder, Transaction};

use crate::db::counter::{bump_cursor, bump_tx_type_counter, Cursor};
use crate::db::{retry_on_conn_err, Store};
use crate::error::Result;
use crate::models::block::Block;
use crate::models::tx::{count_tx_types, Bulk};

impl Store {
    /// Inserts a parsed block batch and moves `last_block_index` to
    /// `max_index`.
    pub async fn insert_block(&self, max_index: i64, blocks: &[Block], bulk: &Bulk) -> Result<()> {
        retry_on_conn_err(|| self.try_insert_block(max_index, blocks, bulk)).await
    }

    async fn try_insert_block(&self, max_index: i64, blocks: &[Block], bulk: &Bulk) -> Result<()> {
        let mut dbtx = self.pool().begin().await?;

        insert_blocks(&mut dbtx, blocks).await?;
        insert_txs(&mut dbtx, bulk).await?;
        insert_tx_attrs(&mut dbtx, bulk).await?;
        insert_tx_vins(&mut dbtx, bulk).await?;
        insert_tx_vouts(&mut dbtx, bulk).await?;
        insert_tx_scripts(&mut dbtx, bulk).await?;
        insert_assets(&mut dbtx, bulk).await?;
        insert_claims(&mut dbtx, bulk).await?;

        for (tx_type, count) in count_tx_types(&bulk.txs)? {
            bump_tx_type_counter(&mut dbtx, tx_type, count).await?;
        }

        bump_cursor(&mut dbtx, Cursor::LastBlockIndex, max_index).await?;
        dbtx.commit().await?;
        Ok(())
    }
}

async fn insert_blocks(dbtx: &mut Transaction<'_, MySql>, blocks: &[Block]) -> Result<()> {
    if blocks.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<MySql>::new(
        "INSERT INTO `block` (`hash`, `size`, `version`, `previousblockhash`, \
         `merkleroot`, `time`, `index`, `nonce`, `nextconsensus`, \
         `script_invocation`, `script_verification`, `nextblockhash`) ",
    );
    qb.push_values(blocks, |mut row, b| {
        row.push_bind(&b.hash)
            .push_bind(b.size)
            .push_bind(b.version)
            .push_bind(&b.previous_block_hash)
            .push_bind(&b.merkle_root)
            .push_bind(b.time)
            .push_bind(b.index)
            .push_bind(&b.nonce)
            .push_bind(&b.next_consensus)
            .push_bind(&b.script_invocation)
            .push_bind(&b.script_verification)
            .push_bind(&b.next_block_hash);
    });
    qb.build().execute(&mut **dbtx).await?;
    Ok(())
}

async fn insert_txs(dbtx: &mut Transaction<'_, MySql>, bulk: &Bulk) -> Result<()> {
    if bulk.txs.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<MySql>::new(
        "INSERT INTO `tx` (`block_index`, `block_time`, `txid`, `size`, `type`, \
         `version`, `sys_fee`, `net_fee`, `nonce`, `script`, `gas`) ",
    );
    qb.push_values(&bulk.txs, |mut row, t| {
        row.push_bind(t.block_index)
            .push_bind(t.block_time)
            .push_bind(&t.txid)
            .push_bind(t.size)
            .push_bind(&t.tx_type)
            .push_bind(t.version)
            .push_bind(&t.sys_fee)
            .push_bind(&t.net_fee)
            .push_bind(t.nonce)
            .push_bind(&t.script)
            .push_bind(&t.gas);
    });
    qb.build().execute(&mut **dbtx).await?;
    Ok(())
}

async fn insert_tx_attrs(dbtx: &mut Transaction<'_, MySql>, bulk: &Bulk) -> Result<()> {
    if bulk.attrs.is_empty() {
        return Ok(());
    }
    let mut qb =
        QueryBuilder::<MySql>::new("INSERT INTO `tx_attr` (`txid`, `usage`, `data`) ");
    qb.push_values(&bulk.attrs, |mut row, a| {
        row.push_bind(&a.txid).push_bind(&a.usage).push_bind(&a.data);
    });
    qb.build().execute(&mut **dbtx).await?;
    Ok(())
}

async fn insert_tx_vins(dbtx: &mut Transaction<'_, MySql>, bulk: &Bulk) -> Result<()> {
    if bulk.vins.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<MySql>::new("INSERT INTO `tx_vin` (`from`, `txid`, `vout`) ");
    qb.push_values(&bulk.vins, |mut row, v| {
        row.push_bind(&v.from).push_bind(&v.txid).push_bind(v.vout);
    });
    qb.build().execute(&mut **dbtx).await?;
    Ok(())
}

async fn insert_tx_vouts(dbtx: &mut Transaction<'_, MySql>, bulk: &Bulk) -> Result<()> {
    if bulk.vouts.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<MySql>::new(
        "INSERT INTO `tx_vout` (`txid`, `n`, `asset_id`, `value`, `address`) ",
    );
    qb.push_values(&bulk.vouts, |mut row, v| {
        row.push_bind(&v.txid)
            .push_bind(v.n)
            .push_bind(&v.asset_id)
            .push_bind(&v.value)
            .push_bind(&v.address);
    });
    qb.build().execute(&mut **dbtx).await?;
    Ok(())
}

async fn insert_tx_scripts(dbtx: &mut Transaction<'_, MySql>, bulk: &Bulk) -> Result<()> {
    if bulk.scripts.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<MySql>::new(
        "INSERT INTO `tx_scripts` (`txid`, `invocation`, `verification`) ",
    );
    qb.push_values(&bulk.scripts, |mut row, s| {
        row.push_bind(&s.txid)
            .push_bind(&s.invocation)
            .push_bind(&s.verification);
    });
    qb.build().execute(&mut **dbtx).await?;
    Ok(())
}

async fn insert_assets(dbtx: &mut Transaction<'_, MySql>, bulk: &Bulk) -> Result<()> {
    if bulk.assets.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<MySql>::new(
        "INSERT INTO `asset` (`block_index`, `block_time`, `version`, `asset_id`, \
         `type`, `name`, `amount`, `available`, `precision`, `owner`, `admin`, \
         `issuer`, `expiration`, `frozen`, `addresses`, `transactions`) ",
    );
    qb.push_values(&bulk.assets, |mut row, a| {
        row.push_bind(a.block_index)
            .push_bind(a.block_time)
            .push_bind(a.version)
            .push_bind(&a.asset_id)
            .push_bind(&a.asset_type)
            .push_bind(&a.name)
            .push_bind(&a.amount)
            .push_bind(&a.available)
            .push_bind(a.precision)
            .push_bind(&a.owner)
            .push_bind(&a.admin)
            .push_bind(&a.issuer)
            .push_bind(a.expiration)
            .push_bind(a.frozen)
            .push_bind(a.addresses)
            .push_bind(a.transactions);
    });
    qb.build().execute(&mut **dbtx).await?;
    Ok(())
}

async fn insert_claims(dbtx: &mut Transaction<'_, MySql>, bulk: &Bulk) -> Result<()> {
    if bulk.claims.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<MySql>::new("INSERT INTO `tx_claims` (`txid`, `vout`) ");
    qb.push_values(&bulk.claims, |mut row, c| {
        row.push_bind(&c.txid).push_bind(c.vout);
    });
    qb.build().execute(&mut **dbtx).await?;
    Ok(())
}
