/// Asset task: follows `last_tx_pk` over native-asset transactions and
/// applies their vins and vouts to the UTXO set and balances.
use tokio::sync::{mpsc, watch};

use crate::db::Store;
use crate::error::{IndexerError, Result};
use crate::models::tx::{Transaction, TransactionVin, TransactionVout};
use crate::tasks::progress::TaskProgress;
use crate::tasks::spawn_guarded;

const TX_CHAN_SIZE: usize = 5000;
const TX_BATCH: i64 = 500;

/// One transaction with its prefetched vins and vouts.
pub(crate) struct TxInfo {
    pub tx: Transaction,
    pub vins: Vec<TransactionVin>,
    pub vouts: Vec<TransactionVout>,
}

pub fn start(store: Store, height_rx: watch::Receiver<i64>) {
    let (tx_chan, rx_chan) = mpsc::channel(TX_CHAN_SIZE);

    let fetch_store = store.clone();
    spawn_guarded("asset-fetch", async move {
        let next_pk = fetch_store.last_tx_pk().await? + 1;
        fetch_txs(fetch_store, tx_chan, next_pk, TX_BATCH).await
    });
    spawn_guarded("asset-handle", handle_txs(store, rx_chan, height_rx));
}

/// Scans `tx` rows forward from `next_pk`, prefetches their vins/vouts in
/// bulk and feeds the channel in pk order. Shared with the gas task.
pub(crate) async fn fetch_txs(
    store: Store,
    chan: mpsc::Sender<TxInfo>,
    mut next_pk: u64,
    batch: i64,
) -> Result<()> {
    loop {
        let txs = store.get_txs(next_pk, batch).await?;
        let Some(last) = txs.last() else {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            continue;
        };
        next_pk = last.id + 1;

        let txids: Vec<String> = txs.iter().map(|t| t.txid.clone()).collect();
        let (mut vin_map, mut vout_map) = store.get_vin_vout(&txids).await?;

        for tx in txs {
            let info = TxInfo {
                vins: vin_map.remove(&tx.txid).unwrap_or_default(),
                vouts: vout_map.remove(&tx.txid).unwrap_or_default(),
                tx,
            };
            chan.send(info)
                .await
                .map_err(|_| IndexerError::Other("tx channel closed".to_string()))?;
        }
    }
}

async fn handle_txs(
    store: Store,
    mut chan: mpsc::Receiver<TxInfo>,
    height_rx: watch::Receiver<i64>,
) -> Result<()> {
    let mut progress = TaskProgress::new("transactions", "Transactions Fully Synced", height_rx);

    while let Some(info) = chan.recv().await {
        store
            .apply_vins_vouts(&info.tx, &info.vins, &info.vouts)
            .await?;

        progress.refresh_denominator(|| store.highest_tx_pk()).await?;
        progress.report(info.tx.id as i64).await;
    }

    Ok(())
}
