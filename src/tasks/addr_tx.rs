/// Fans freshly persisted NEP5 transfers out into per-address `addr_tx`
/// rows, following its own cursor.
use std::time::Duration;

use crate::db::Store;
use crate::error::Result;
use crate::tasks::spawn_guarded;

const FETCH_BATCH: i64 = 100;

pub fn start(store: Store) {
    spawn_guarded("nep5-addr-tx", insert_nep5_addr_tx_records(store));
}

async fn insert_nep5_addr_tx_records(store: Store) -> Result<()> {
    let mut last_pk = store.nep5_tx_pk_for_addr_tx().await?;

    loop {
        let records = store.get_nep5_tx_records(last_pk, FETCH_BATCH).await?;
        if let Some(last) = records.last() {
            last_pk = last.id;
            store.insert_nep5_addr_tx(&records, last_pk).await?;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
