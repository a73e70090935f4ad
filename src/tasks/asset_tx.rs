/// Asset-tx index task: derives deduplicated (address, asset, txid) triples
/// from consumed and produced vouts, flushed in batches.
use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::db::Store;
use crate::error::{IndexerError, Result};
use crate::models::tx::AddrAssetIdTx;
use crate::tasks::asset::{fetch_txs, TxInfo};
use crate::tasks::progress::TaskProgress;
use crate::tasks::spawn_guarded;

const ASSET_TX_CHAN_SIZE: usize = 5000;
const FETCH_BATCH: i64 = 50;
const FLUSH_SIZE: usize = 100;
const FLUSH_IDLE: Duration = Duration::from_secs(2);

pub fn start(store: Store, height_rx: watch::Receiver<i64>) {
    let (tx_chan, rx_chan) = mpsc::channel(ASSET_TX_CHAN_SIZE);

    let fetch_store = store.clone();
    spawn_guarded("asset-tx-fetch", async move {
        let next_pk = fetch_store.last_asset_tx_pk().await? + 1;
        fetch_txs(fetch_store, tx_chan, next_pk, FETCH_BATCH).await
    });
    spawn_guarded("asset-tx-handle", handle_asset_txs(store, rx_chan, height_rx));
}

async fn handle_asset_txs(
    store: Store,
    mut chan: mpsc::Receiver<TxInfo>,
    height_rx: watch::Receiver<i64>,
) -> Result<()> {
    let mut progress = TaskProgress::new("asset tx", "Asset Tx Fully Synced", height_rx);
    let mut records: Vec<AddrAssetIdTx> = Vec::new();
    let mut max_pk: u64 = 0;

    loop {
        tokio::select! {
            maybe = chan.recv() => {
                let Some(info) = maybe else {
                    return Ok(());
                };
                max_pk = info.tx.id;
                collect_records(&store, &mut records, &info).await?;

                if records.len() >= FLUSH_SIZE {
                    flush(&store, &mut records, max_pk, &mut progress).await?;
                }
            }
            _ = tokio::time::sleep(FLUSH_IDLE) => {
                if !records.is_empty() {
                    flush(&store, &mut records, max_pk, &mut progress).await?;
                }
            }
        }
    }
}

/// Accumulates the (address, asset, txid) triples of one transaction,
/// deduplicated across its consumed and produced vouts.
async fn collect_records(
    store: &Store,
    records: &mut Vec<AddrAssetIdTx>,
    info: &TxInfo,
) -> Result<()> {
    let mut unique: HashSet<(String, String)> = HashSet::new();

    for vin in &info.vins {
        let vin_vout = store.get_vout(&vin.txid, vin.vout).await?.ok_or_else(|| {
            IndexerError::invariant(format!(
                "vin references missing vout ({}, {})",
                vin.txid, vin.vout
            ))
        })?;

        if unique.insert((vin_vout.address.clone(), vin_vout.asset_id.clone())) {
            records.push(AddrAssetIdTx {
                address: vin_vout.address,
                asset_id: vin_vout.asset_id,
                txid: info.tx.txid.clone(),
            });
        }
    }

    for vout in &info.vouts {
        if unique.insert((vout.address.clone(), vout.asset_id.clone())) {
            records.push(AddrAssetIdTx {
                address: vout.address.clone(),
                asset_id: vout.asset_id.clone(),
                txid: info.tx.txid.clone(),
            });
        }
    }

    Ok(())
}

async fn flush(
    store: &Store,
    records: &mut Vec<AddrAssetIdTx>,
    max_pk: u64,
    progress: &mut TaskProgress,
) -> Result<()> {
    store.record_addr_asset_id_tx(records, max_pk as i64).await?;
    records.clear();

    progress.refresh_denominator(|| store.highest_tx_pk()).await?;
    progress.report(max_pk as i64).await;
    Ok(())
}
