/// The pipeline: block fetcher pool → reorder buffer → arranger → batch
/// storer, plus the cursor-driven derivation tasks that follow the persisted
/// transaction stream.
pub mod addr_tx;
pub mod asset;
pub mod asset_tx;
pub mod block;
pub mod gas;
pub mod nep5;
pub mod progress;
pub mod worker;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::buffer::BlockBuffer;
use crate::cache::ADDR_CACHE;
use crate::config;
use crate::db::Store;
use crate::error::Result;
use crate::mail;
use crate::rpc;
use worker::Worker;

/// Capacity of pending blocks waiting to be persisted.
pub const BUFFER_SIZE: usize = 5000;

/// Spawns a long-running task; an error or panic is logged, mailed when
/// alerts are enabled, and terminates the task without restart.
pub fn spawn_guarded<F>(name: &'static str, fut: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let handle = tokio::spawn(fut);
        match handle.await {
            Ok(Ok(())) => info!(task = name, "task finished"),
            Ok(Err(e)) => {
                error!(task = name, error = %e, "task terminated with error");
                mail::send_notify("Error Detected", &format!("task {}: {}", name, e)).await;
            }
            Err(join_err) => {
                error!(task = name, error = %join_err, "task panicked");
                mail::send_notify("Error Detected", &format!("task {} panicked: {}", name, join_err))
                    .await;
            }
        }
    });
}

/// Warms the cache and launches every stage of the pipeline.
pub async fn run(store: Store) -> Result<()> {
    info!("init addr asset cache");
    let rows = store.get_addr_asset_info().await?;
    ADDR_CACHE.load(rows);

    let db_height = store.last_height().await?;
    let best_height = rpc::refresh_servers().await;
    info!(db_height, best_height, "current params for block persistence");

    let buffer = Arc::new(BlockBuffer::new(db_height));
    // Committed-height broadcast: derivation tasks refresh their progress
    // denominators whenever a block batch lands.
    let (height_tx, height_rx) = watch::channel(db_height);
    let (block_tx, block_rx) = mpsc::channel(BUFFER_SIZE);

    let worker = Worker::new();
    for _ in 0..config::workers() {
        spawn_guarded(
            "block-fetcher",
            block::fetch_block(Arc::clone(&buffer), worker.clone()),
        );
    }
    spawn_guarded(
        "block-arranger",
        block::arrange_blocks(db_height, Arc::clone(&buffer), block_tx),
    );
    spawn_guarded(
        "block-storer",
        block::store_blocks(store.clone(), Arc::clone(&buffer), block_rx, height_tx),
    );

    nep5::start(store.clone(), height_rx.clone());
    asset::start(store.clone(), height_rx.clone());
    asset_tx::start(store.clone(), height_rx.clone());
    gas::start(store.clone(), height_rx.clone());
    addr_tx::start(store);

    spawn_guarded("rpc-height-tracer", rpc::trace_best_height());

    Ok(())
}
