/// The `counter` singleton row: one cursor per derivation task plus the
/// per-type transaction counters. Each task is the only writer of its own
/// cursor.
use sqlx::{MySql, Row, Transaction};

use crate::db::{retry_on_conn_err, Store};
use crate::error::Result;
use crate::models::tx::TxType;

#[derive(Debug, Clone)]
pub struct Counter {
    pub last_block_index: i64,
    pub last_tx_pk: u64,
    pub last_asset_tx_pk: u64,
    pub last_tx_pk_for_nep5: u64,
    pub app_log_idx: i32,
    pub nep5_tx_pk_for_addr_tx: u64,
    pub last_tx_pk_gas_balance: u64,
}

/// Cursors advanced through [`bump_cursor`].
#[derive(Debug, Clone, Copy)]
pub enum Cursor {
    LastBlockIndex,
    LastTxPk,
    LastAssetTxPk,
    LastTxPkGasBalance,
}

impl Cursor {
    fn column(self) -> &'static str {
        match self {
            Cursor::LastBlockIndex => "last_block_index",
            Cursor::LastTxPk => "last_tx_pk",
            Cursor::LastAssetTxPk => "last_asset_tx_pk",
            Cursor::LastTxPkGasBalance => "last_tx_pk_gas_balance",
        }
    }
}

/// Advances a cursor inside the caller's transaction.
pub(crate) async fn bump_cursor(
    dbtx: &mut Transaction<'_, MySql>,
    cursor: Cursor,
    value: i64,
) -> Result<()> {
    let query = format!(
        "UPDATE `counter` SET `{}` = ? WHERE `id` = 1 LIMIT 1",
        cursor.column()
    );
    sqlx::query(&query).bind(value).execute(&mut **dbtx).await?;
    Ok(())
}

/// Advances the NEP5 cursor pair {last_tx_pk_for_nep5, app_log_idx}
/// atomically with the caller's writes.
pub(crate) async fn bump_nep5_cursor(
    dbtx: &mut Transaction<'_, MySql>,
    last_tx_pk_for_nep5: u64,
    app_log_idx: i32,
) -> Result<()> {
    sqlx::query(
        "UPDATE `counter` SET `last_tx_pk_for_nep5` = ?, `app_log_idx` = ? WHERE `id` = 1 LIMIT 1",
    )
    .bind(last_tx_pk_for_nep5)
    .bind(app_log_idx)
    .execute(&mut **dbtx)
    .await?;
    Ok(())
}

pub(crate) async fn bump_nep5_tx_pk_for_addr_tx(
    dbtx: &mut Transaction<'_, MySql>,
    pk: u64,
) -> Result<()> {
    sqlx::query("UPDATE `counter` SET `nep5_tx_pk_for_addr_tx` = ? WHERE `id` = 1 LIMIT 1")
        .bind(pk)
        .execute(&mut **dbtx)
        .await?;
    Ok(())
}

pub(crate) async fn bump_tx_type_counter(
    dbtx: &mut Transaction<'_, MySql>,
    tx_type: TxType,
    count: i64,
) -> Result<()> {
    let column = tx_type.counter_column();
    let query = format!(
        "UPDATE `counter` SET `{}` = `{}` + ? WHERE `id` = 1 LIMIT 1",
        column, column
    );
    sqlx::query(&query).bind(count).execute(&mut **dbtx).await?;
    Ok(())
}

impl Store {
    /// Reads the counter row, inserting the bootstrap row on first run.
    pub async fn get_counter(&self) -> Result<Counter> {
        retry_on_conn_err(|| self.try_get_counter()).await
    }

    async fn try_get_counter(&self) -> Result<Counter> {
        let row = sqlx::query(
            "SELECT `last_block_index`, `last_tx_pk`, `last_asset_tx_pk`, \
             `last_tx_pk_for_nep5`, `app_log_idx`, `nep5_tx_pk_for_addr_tx`, \
             `last_tx_pk_gas_balance` FROM `counter` WHERE `id` = 1 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Counter {
                last_block_index: row.try_get("last_block_index")?,
                last_tx_pk: row.try_get("last_tx_pk")?,
                last_asset_tx_pk: row.try_get("last_asset_tx_pk")?,
                last_tx_pk_for_nep5: row.try_get("last_tx_pk_for_nep5")?,
                app_log_idx: row.try_get("app_log_idx")?,
                nep5_tx_pk_for_addr_tx: row.try_get("nep5_tx_pk_for_addr_tx")?,
                last_tx_pk_gas_balance: row.try_get("last_tx_pk_gas_balance")?,
            }),
            None => self.init_counter().await,
        }
    }

    async fn init_counter(&self) -> Result<Counter> {
        let counter = Counter {
            last_block_index: -1,
            last_tx_pk: 0,
            last_asset_tx_pk: 0,
            last_tx_pk_for_nep5: 0,
            app_log_idx: -1,
            nep5_tx_pk_for_addr_tx: 0,
            last_tx_pk_gas_balance: 0,
        };

        sqlx::query(
            "INSERT INTO `counter` (`id`, `last_block_index`, `last_tx_pk`, \
             `last_asset_tx_pk`, `last_tx_pk_for_nep5`, `app_log_idx`, \
             `nep5_tx_pk_for_addr_tx`, `last_tx_pk_gas_balance`, `cnt_tx_reg`, \
             `cnt_tx_miner`, `cnt_tx_issue`, `cnt_tx_invocation`, `cnt_tx_contract`, \
             `cnt_tx_claim`, `cnt_tx_publish`, `cnt_tx_enrollment`) \
             VALUES (1, ?, ?, ?, ?, ?, ?, ?, 0, 0, 0, 0, 0, 0, 0, 0)",
        )
        .bind(counter.last_block_index)
        .bind(counter.last_tx_pk)
        .bind(counter.last_asset_tx_pk)
        .bind(counter.last_tx_pk_for_nep5)
        .bind(counter.app_log_idx)
        .bind(counter.nep5_tx_pk_for_addr_tx)
        .bind(counter.last_tx_pk_gas_balance)
        .execute(&self.pool)
        .await?;

        Ok(counter)
    }

    /// Highest block index stored so far, -1 before the first block.
    pub async fn last_height(&self) -> Result<i64> {
        Ok(self.get_counter().await?.last_block_index)
    }

    pub async fn last_tx_pk(&self) -> Result<u64> {
        Ok(self.get_counter().await?.last_tx_pk)
    }

    pub async fn last_asset_tx_pk(&self) -> Result<u64> {
        Ok(self.get_counter().await?.last_asset_tx_pk)
    }

    /// Cursor pair of the NEP5 task; a non-negative `app_log_idx` marks an
    /// interrupted transaction to resume inside.
    pub async fn last_tx_pk_for_nep5(&self) -> Result<(u64, i32)> {
        let counter = self.get_counter().await?;
        Ok((counter.last_tx_pk_for_nep5, counter.app_log_idx))
    }

    pub async fn last_tx_pk_gas_balance(&self) -> Result<u64> {
        Ok(self.get_counter().await?.last_tx_pk_gas_balance)
    }

    pub async fn nep5_tx_pk_for_addr_tx(&self) -> Result<u64> {
        Ok(self.get_counter().await?.nep5_tx_pk_for_addr_tx)
    }
}
