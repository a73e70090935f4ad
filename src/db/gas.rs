/// Daily GAS balances, sharded over per-suffix tables by the last character
/// of the address. Each address's write advances the gas cursor in the same
/// transaction; statement errors are never swallowed.
use std::collections::{BTreeMap, HashMap};

use bigdecimal::BigDecimal;
use sqlx::Row;

use crate::db::counter::{bump_cursor, Cursor};
use crate::db::{retry_on_conn_err, Store};
use crate::error::{IndexerError, Result};
use crate::models::tx::Transaction;

/// Most recent daily row per address, mirrored in memory by the gas task.
#[derive(Debug, Clone)]
pub struct GasDateBalance {
    pub date: String,
    pub balance: BigDecimal,
}

enum GasRowWrite {
    Insert,
    Update,
}

fn gas_table_name(addr: &str) -> Result<String> {
    let suffix = addr
        .chars()
        .last()
        .ok_or_else(|| IndexerError::invariant("empty address in gas task"))?
        .to_ascii_lowercase();
    if !suffix.is_ascii_alphanumeric() {
        return Err(IndexerError::invariant(format!(
            "address {} has non-alphanumeric suffix",
            addr
        )));
    }
    Ok(format!("addr_gas_balance_{}", suffix))
}

impl Store {
    /// Applies the per-address GAS deltas of one transaction to the daily
    /// balance shards, keeping `cache` in sync and advancing
    /// `last_tx_pk_gas_balance` with every row.
    pub async fn apply_gas_change(
        &self,
        t: &Transaction,
        date: &str,
        changes: &BTreeMap<String, BigDecimal>,
        cache: &mut HashMap<String, GasDateBalance>,
    ) -> Result<()> {
        for (addr, change) in changes {
            let (write, entry) = match cache.get(addr) {
                Some(cached) => {
                    let balance = &cached.balance + change;
                    let write = if cached.date == date {
                        GasRowWrite::Update
                    } else {
                        GasRowWrite::Insert
                    };
                    (
                        write,
                        GasDateBalance {
                            date: date.to_string(),
                            balance,
                        },
                    )
                }
                None => match self.query_addr_gas_date_record(addr).await? {
                    Some((last_date, balance)) if last_date == date => (
                        GasRowWrite::Update,
                        GasDateBalance {
                            date: date.to_string(),
                            balance: &balance + change,
                        },
                    ),
                    Some((_, balance)) => (
                        GasRowWrite::Insert,
                        GasDateBalance {
                            date: date.to_string(),
                            balance: &balance + change,
                        },
                    ),
                    None => (
                        GasRowWrite::Insert,
                        GasDateBalance {
                            date: date.to_string(),
                            balance: change.clone(),
                        },
                    ),
                },
            };

            retry_on_conn_err(|| self.try_apply_gas_row(t.id, addr, date, &write, &entry.balance))
                .await?;

            cache.insert(addr.clone(), entry);
        }

        Ok(())
    }

    async fn try_apply_gas_row(
        &self,
        tx_pk: u64,
        addr: &str,
        date: &str,
        write: &GasRowWrite,
        balance: &BigDecimal,
    ) -> Result<()> {
        let table = gas_table_name(addr)?;
        let mut dbtx = self.pool().begin().await?;

        match write {
            GasRowWrite::Insert => {
                let query = format!(
                    "INSERT INTO `{}` (`address`, `date`, `balance`) VALUES (?, ?, ?)",
                    table
                );
                sqlx::query(&query)
                    .bind(addr)
                    .bind(date)
                    .bind(balance)
                    .execute(&mut *dbtx)
                    .await?;
            }
            GasRowWrite::Update => {
                let query = format!(
                    "UPDATE `{}` SET `balance` = ? WHERE `address` = ? AND `date` = ? LIMIT 1",
                    table
                );
                sqlx::query(&query)
                    .bind(balance)
                    .bind(addr)
                    .bind(date)
                    .execute(&mut *dbtx)
                    .await?;
            }
        }

        bump_cursor(&mut dbtx, Cursor::LastTxPkGasBalance, tx_pk as i64).await?;
        dbtx.commit().await?;
        Ok(())
    }

    /// Latest (date, balance) row of an address, from its shard.
    async fn query_addr_gas_date_record(
        &self,
        addr: &str,
    ) -> Result<Option<(String, BigDecimal)>> {
        retry_on_conn_err(|| self.try_query_addr_gas_date_record(addr)).await
    }

    async fn try_query_addr_gas_date_record(
        &self,
        addr: &str,
    ) -> Result<Option<(String, BigDecimal)>> {
        let table = gas_table_name(addr)?;
        let query = format!(
            "SELECT `date`, `balance` FROM `{}` WHERE `address` = ? ORDER BY `id` DESC LIMIT 1",
            table
        );
        let row = sqlx::query(&query)
            .bind(addr)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let date: String = row.try_get("date")?;
                let balance: BigDecimal = row.try_get("balance")?;
                Ok(Some((date, balance)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_table_name() {
        assert_eq!(
            gas_table_name("AKQjaQ7Hor11BfRnXUBvYYiY1CwUkLywyc").unwrap(),
            "addr_gas_balance_c"
        );
        assert_eq!(
            gas_table_name("AbcDEF9").unwrap(),
            "addr_gas_balance_9"
        );
        // Uppercase suffix folds to lowercase.
        assert_eq!(gas_table_name("xyzB").unwrap(), "addr_gas_balance_b");
        assert!(gas_table_name("").is_err());
    }
}
