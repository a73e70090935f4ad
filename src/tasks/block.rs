/// Block ingestion: a pool of fetcher workers filling the reorder buffer, a
/// single arranger draining it in height order, and a storer that batches
/// ordered blocks into atomic database flushes.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::buffer::BlockBuffer;
use crate::db::Store;
use crate::error::{IndexerError, Result};
use crate::models::block::parse_blocks;
use crate::models::tx::parse_txs;
use crate::rpc;
use crate::rpc::types::RawBlock;
use crate::tasks::progress::TaskProgress;
use crate::tasks::worker::Worker;
use crate::tasks::BUFFER_SIZE;
use crate::util::seconds_to_human;

/// Flush after this many consecutive blocks.
const STORE_BATCH: u32 = 15;

/// One fetcher worker: asks the buffer for the next pending height and
/// downloads it. Past the chain tip a surplus worker retires; the last one
/// keeps polling.
pub async fn fetch_block(buffer: Arc<BlockBuffer>, worker: Worker) -> Result<()> {
    let workers = worker.add();
    info!(workers, "create new worker to fetch blocks");

    let mut next_height = buffer.next_pending();
    let mut waited: u64 = 0;

    loop {
        // Back-pressure against the arranger.
        if buffer.size() > BUFFER_SIZE {
            tokio::time::sleep(Duration::from_millis(20)).await;
            continue;
        }

        // Fully synchronized; poll politely.
        if worker.num() == 1 && next_height == buffer.highest() + 1 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            waited += 1;
            info!(
                height = next_height,
                waited = %seconds_to_human(waited),
                "waiting for block"
            );
        }

        match rpc::download_block(next_height).await {
            // Beyond the latest block.
            None => {
                if worker.should_quit() {
                    info!(
                        remaining = worker.num(),
                        "worker for block data persistence terminated"
                    );
                    return Ok(());
                }
                next_height = buffer.highest() + 1;
            }
            Some(block) => {
                waited = 0;
                buffer.put(block);
                next_height = if worker.num() == 1 {
                    buffer.highest() + 1
                } else {
                    buffer.next_pending()
                };
            }
        }
    }
}

/// Pops blocks from the buffer strictly in height order and feeds the store
/// queue. A height missing for a minute is re-requested directly.
pub async fn arrange_blocks(
    db_height: i64,
    buffer: Arc<BlockBuffer>,
    queue: mpsc::Sender<RawBlock>,
) -> Result<()> {
    const SLEEP_MS: u64 = 20;
    let mut height = db_height + 1;
    let mut delay: u64 = 0;

    loop {
        if let Some(block) = buffer.pop(height) {
            queue
                .send(block)
                .await
                .map_err(|_| IndexerError::Other("block store queue closed".to_string()))?;
            height += 1;
            delay = 0;
            continue;
        }

        tokio::time::sleep(Duration::from_millis(SLEEP_MS)).await;
        if buffer.size() == 0 {
            continue;
        }
        delay += SLEEP_MS;

        if delay >= 5_000 && delay % 1_000 == 0 {
            warn!(
                seconds = delay / 1000,
                height, "waiting for missing block in arranger"
            );
        }

        if delay % 60_000 == 0 {
            warn!(height, "block is missing while downloading blocks, re-requesting");
            get_missing_block(&buffer, height).await;
        }
    }
}

async fn get_missing_block(buffer: &BlockBuffer, height: i64) {
    info!(height, "try fetching given block");
    if let Some(block) = rpc::download_block(height).await {
        buffer.put(block);
    }
}

/// Collects ordered blocks and flushes them in batches: every
/// [`STORE_BATCH`] blocks, or as soon as the buffered tip is reached.
pub async fn store_blocks(
    store: Store,
    buffer: Arc<BlockBuffer>,
    mut queue: mpsc::Receiver<RawBlock>,
    height_tx: watch::Sender<i64>,
) -> Result<()> {
    let mut raw_blocks: Vec<RawBlock> = Vec::new();
    let mut progress = TaskProgress::standalone("block storage", "Block data Fully Synced");

    while let Some(block) = queue.recv().await {
        let flush = block.index % STORE_BATCH == 0 || block.index as i64 == buffer.highest();
        raw_blocks.push(block);

        if flush {
            store_batch(&store, &raw_blocks, &height_tx, &mut progress).await?;
            raw_blocks.clear();
        }
    }

    Ok(())
}

async fn store_batch(
    store: &Store,
    raw_blocks: &[RawBlock],
    height_tx: &watch::Sender<i64>,
    progress: &mut TaskProgress,
) -> Result<()> {
    let Some(last) = raw_blocks.last() else {
        return Ok(());
    };
    let max_index = last.index as i64;

    let blocks = parse_blocks(raw_blocks);
    let bulk = parse_txs(raw_blocks);
    store.insert_block(max_index, &blocks, &bulk).await?;

    // Wake the derivation tasks' progress trackers.
    let _ = height_tx.send(max_index);

    let mut best_height = rpc::best_height();
    if best_height < max_index {
        best_height = max_index;
        rpc::set_best_height(max_index);
    }

    progress.set_denominator(best_height);
    progress.report(max_index).await;
    Ok(())
}
