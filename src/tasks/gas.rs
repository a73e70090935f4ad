/// Gas-date-balance task: accumulates each address's GAS delta per
/// transaction into daily running balances, sharded by address suffix.
use std::collections::{BTreeMap, HashMap};

use bigdecimal::BigDecimal;
use num_bigint::Sign;
use tokio::sync::{mpsc, watch};

use crate::db::gas::GasDateBalance;
use crate::db::Store;
use crate::error::{IndexerError, Result};
use crate::models::asset::GAS_ASSET_ID;
use crate::models::tx::TransactionVout;
use crate::tasks::asset::{fetch_txs, TxInfo};
use crate::tasks::progress::TaskProgress;
use crate::tasks::spawn_guarded;

const GAS_CHAN_SIZE: usize = 5000;
const FETCH_BATCH: i64 = 500;

pub fn start(store: Store, height_rx: watch::Receiver<i64>) {
    let (tx_chan, rx_chan) = mpsc::channel(GAS_CHAN_SIZE);

    let fetch_store = store.clone();
    spawn_guarded("gas-balance-fetch", async move {
        let next_pk = fetch_store.last_tx_pk_gas_balance().await? + 1;
        fetch_txs(fetch_store, tx_chan, next_pk, FETCH_BATCH).await
    });
    spawn_guarded("gas-balance-handle", handle_gas_balance(store, rx_chan, height_rx));
}

async fn handle_gas_balance(
    store: Store,
    mut chan: mpsc::Receiver<TxInfo>,
    height_rx: watch::Receiver<i64>,
) -> Result<()> {
    let mut progress = TaskProgress::new("Addr-Date-Gas", "Addr-Date-Gas Fully Synced", height_rx);
    let mut gas_cache: HashMap<String, GasDateBalance> = HashMap::new();

    while let Some(info) = chan.recv().await {
        let changes = gas_changes(&store, &info).await?;
        if changes.is_empty() {
            continue;
        }

        let date = utc_date(info.tx.block_time)?;
        store
            .apply_gas_change(&info.tx, &date, &changes, &mut gas_cache)
            .await?;

        progress.refresh_denominator(|| store.highest_tx_pk()).await?;
        progress.report(info.tx.id as i64).await;
    }

    Ok(())
}

/// Resolves the transaction's consumed vouts and nets the GAS movement per
/// address.
async fn gas_changes(store: &Store, info: &TxInfo) -> Result<BTreeMap<String, BigDecimal>> {
    if info.vins.is_empty() && info.vouts.is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut vin_vouts = Vec::with_capacity(info.vins.len());
    for vin in &info.vins {
        let vin_vout = store.get_vout(&vin.txid, vin.vout).await?.ok_or_else(|| {
            IndexerError::invariant(format!(
                "vin references missing vout ({}, {})",
                vin.txid, vin.vout
            ))
        })?;
        vin_vouts.push(vin_vout);
    }

    Ok(accumulate_gas_change(&vin_vouts, &info.vouts))
}

/// Sums GAS deltas per address: negative for spent vouts, positive for
/// produced ones. Addresses whose movements cancel out are dropped.
pub(crate) fn accumulate_gas_change(
    vin_vouts: &[TransactionVout],
    vouts: &[TransactionVout],
) -> BTreeMap<String, BigDecimal> {
    let mut gas_map: BTreeMap<String, BigDecimal> = BTreeMap::new();

    for vin_vout in vin_vouts {
        if vin_vout.asset_id == GAS_ASSET_ID {
            let entry = gas_map.entry(vin_vout.address.clone()).or_default();
            *entry = &*entry - &vin_vout.value;
        }
    }
    for vout in vouts {
        if vout.asset_id == GAS_ASSET_ID {
            let entry = gas_map.entry(vout.address.clone()).or_default();
            *entry = &*entry + &vout.value;
        }
    }

    gas_map.retain(|_, delta| delta.sign() != Sign::NoSign);
    gas_map
}

/// UTC calendar date of a unix timestamp, "YYYY-MM-DD".
pub(crate) fn utc_date(timestamp: u64) -> Result<String> {
    let datetime = chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .ok_or_else(|| IndexerError::invariant(format!("invalid block time {}", timestamp)))?;
    Ok(datetime.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn vout(asset: &str, value: &str, address: &str) -> TransactionVout {
        TransactionVout {
            txid: "t".to_string(),
            n: 0,
            asset_id: asset.to_string(),
            value: BigDecimal::from_str(value).unwrap(),
            address: address.to_string(),
        }
    }

    #[test]
    fn test_gas_deltas() {
        let consumed = vec![vout(GAS_ASSET_ID, "5", "A"), vout("other", "9", "A")];
        let produced = vec![
            vout(GAS_ASSET_ID, "3", "A"),
            vout(GAS_ASSET_ID, "2", "B"),
            vout("other", "7", "C"),
        ];

        let changes = accumulate_gas_change(&consumed, &produced);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["A"], BigDecimal::from(-2));
        assert_eq!(changes["B"], BigDecimal::from(2));
    }

    #[test]
    fn test_cancelling_delta_dropped() {
        let consumed = vec![vout(GAS_ASSET_ID, "5", "A")];
        let produced = vec![vout(GAS_ASSET_ID, "5", "A")];
        assert!(accumulate_gas_change(&consumed, &produced).is_empty());
    }

    #[test]
    fn test_utc_date() {
        // 2016-10-16T19:49:42Z.
        assert_eq!(utc_date(1476647382).unwrap(), "2016-10-16");
        assert_eq!(utc_date(0).unwrap(), "1970-01-01");
    }
}
