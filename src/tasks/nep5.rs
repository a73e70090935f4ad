/// NEP5 task: four stages over bounded channels.
///
/// 1. fetch invocation transactions in pk order,
/// 2. a worker pool pulling their application logs,
/// 3. strictly in-order classification (registration, migration,
///    non-transfer calls, replayed transfer notifications),
/// 4. a single writer persisting typed store events.
///
/// The cursor pair {last_tx_pk_for_nep5, app_log_idx} lets a restart resume
/// inside a partially processed transaction at the next notification.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use dashmap::DashMap;
use num_bigint::Sign;
use num_traits::ToPrimitive;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

use crate::cache::{BalanceQuery, ADDR_CACHE, TOTAL_SUPPLY_CACHE};
use crate::config;
use crate::db::Store;
use crate::error::{IndexerError, Result};
use crate::models::addr::AddrAsset;
use crate::models::nep5::{get_nep5_reg_info, Nep5, RegInfo};
use crate::models::tx::Transaction;
use crate::rpc;
use crate::rpc::types::{RawAppLogResult, RawNotification};
use crate::script::builder::build_contract_call;
use crate::script::reader::{read_script, DataStack};
use crate::tasks::progress::TaskProgress;
use crate::tasks::spawn_guarded;
use crate::util;

const NEP5_CHAN_SIZE: usize = 5000;
const FETCH_BATCH: i64 = 100;
const APP_LOG_WORKERS: usize = 4;

/// Scripts shorter than this cannot contain an APPCALL.
const MIN_APP_CALL_SCRIPT_LEN: usize = 42;

/// ASCII "transfer".
const TRANSFER_METHOD_HEX: &str = "7472616e73666572";
/// ASCII "totalSupply"; a transfer "to" this value is the storage-injection
/// marker prompting a supply re-probe.
const TOTAL_SUPPLY_HEX: &str = "746f74616c537570706c79";

struct Nep5TxInfo {
    tx: Transaction,
    stack: DataStack,
    app_log: RawAppLogResult,
}

/// Typed store events consumed by the single writer stage.
enum Nep5Store {
    Asset {
        tx: Transaction,
        nep5: Nep5,
        reg_info: RegInfo,
        addr_asset: Option<AddrAsset>,
        at_height: u32,
    },
    Transfer {
        tx: Transaction,
        app_log_idx: i32,
        asset_id: String,
        from_addr: String,
        from_balance: BigDecimal,
        to_addr: String,
        to_balance: BigDecimal,
        transfer_value: BigDecimal,
        total_supply: Option<BigDecimal>,
    },
    BalanceSupply {
        tx_pk: u64,
        block_time: u64,
        block_index: u32,
        addr: String,
        balance: BigDecimal,
        asset_id: String,
        total_supply: BigDecimal,
    },
    Counter {
        tx_pk: u64,
        app_log_idx: i32,
    },
    Migrate {
        new_asset_admin: String,
        old_asset_id: String,
        new_asset_id: String,
        tx_pk: u64,
        txid: String,
    },
}

pub fn start(store: Store, height_rx: watch::Receiver<i64>) {
    spawn_guarded("nep5", async move {
        let decimals = store.get_nep5_asset_decimals().await?;
        let (last_pk, app_log_idx) = store.last_tx_pk_for_nep5().await?;

        let (applog_tx, applog_rx) = async_channel::bounded::<(u32, String)>(NEP5_CHAN_SIZE);
        let (info_tx, info_rx) = mpsc::channel(NEP5_CHAN_SIZE);
        let (store_tx, store_rx) = mpsc::channel(NEP5_CHAN_SIZE);
        let app_logs: Arc<DashMap<String, RawAppLogResult>> = Arc::new(DashMap::new());

        for _ in 0..APP_LOG_WORKERS {
            spawn_guarded(
                "nep5-applog",
                fetch_app_log(applog_rx.clone(), Arc::clone(&app_logs)),
            );
        }
        spawn_guarded(
            "nep5-fetch",
            fetch_nep5_txs(store.clone(), applog_tx, info_tx, app_logs, last_pk, app_log_idx),
        );
        spawn_guarded(
            "nep5-handle",
            handle_nep5_txs(store.clone(), info_rx, store_tx, decimals, app_log_idx),
        );
        spawn_guarded("nep5-store", handle_nep5_store(store, store_rx, height_rx));

        Ok(())
    });
}

/// Stage 1: scan invocation transactions forward, dispatch their txids to
/// the app-log pool, then forward each transaction in pk order once its log
/// arrived.
async fn fetch_nep5_txs(
    store: Store,
    applog_tx: async_channel::Sender<(u32, String)>,
    info_tx: mpsc::Sender<Nep5TxInfo>,
    app_logs: Arc<DashMap<String, RawAppLogResult>>,
    last_pk: u64,
    app_log_idx: i32,
) -> Result<()> {
    // A non-negative app_log_idx means the cursor transaction itself still
    // has unpersisted notifications; start from it, not after it.
    let mut next_pk = last_pk;
    if app_log_idx == -1 {
        next_pk += 1;
    }

    loop {
        let fetched = store.get_invocation_txs(next_pk, FETCH_BATCH).await?;
        let Some(last) = fetched.last() else {
            tokio::time::sleep(Duration::from_secs(2)).await;
            continue;
        };
        next_pk = last.id + 1;

        let txs: Vec<Transaction> = fetched
            .into_iter()
            .filter(|t| {
                t.script.len() > MIN_APP_CALL_SCRIPT_LEN
                    && !config::skip_txids().contains(&t.txid)
            })
            .collect();

        for tx in &txs {
            applog_tx
                .send((tx.block_index, tx.txid.clone()))
                .await
                .map_err(|_| IndexerError::Other("applog channel closed".to_string()))?;
        }

        for tx in txs {
            loop {
                let Some((_, app_log)) = app_logs.remove(&tx.txid) else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                };

                let stack = read_script(&tx.script);
                info_tx
                    .send(Nep5TxInfo { tx, stack, app_log })
                    .await
                    .map_err(|_| IndexerError::Other("nep5 tx channel closed".to_string()))?;
                break;
            }
        }
    }
}

/// Stage 2: one of the app-log pool workers.
async fn fetch_app_log(
    applog_rx: async_channel::Receiver<(u32, String)>,
    app_logs: Arc<DashMap<String, RawAppLogResult>>,
) -> Result<()> {
    while let Ok((block_index, txid)) = applog_rx.recv().await {
        let result = rpc::get_application_log(block_index as i64, &txid).await;
        app_logs.insert(txid, result);
    }
    Ok(())
}

/// Stage 3: strict in-order classification.
async fn handle_nep5_txs(
    store: Store,
    mut info_rx: mpsc::Receiver<Nep5TxInfo>,
    store_tx: mpsc::Sender<Nep5Store>,
    mut decimals: HashMap<String, u8>,
    mut app_log_idx: i32,
) -> Result<()> {
    while let Some(info) = info_rx.recv().await {
        let Nep5TxInfo { tx, stack, app_log } = info;

        if stack.is_empty() {
            send_counter(&store_tx, tx.id, -1).await?;
            continue;
        }

        if app_log_idx == -1 && is_registration_script(&tx.script) {
            let mut reg_stack = stack.clone();
            handle_reg_tx(&store, &store_tx, &mut decimals, &tx, &mut reg_stack).await?;
            if is_migrate_script(&tx.script) {
                let mut stack = stack;
                handle_migrate(&store, &store_tx, &mut decimals, &tx, &mut stack).await?;
            }
        } else if app_log_idx == -1 && is_migrate_script(&tx.script) {
            let mut stack = stack;
            handle_migrate(&store, &store_tx, &mut decimals, &tx, &mut stack).await?;
        } else {
            let mut stack = stack;
            handle_non_tx_call(&store, &store_tx, &decimals, &tx, &mut stack).await?;

            if !app_log.executions.is_empty() {
                let mut notifs: Vec<RawNotification> = Vec::new();
                for exec in &app_log.executions {
                    if exec.vm_state.contains("FAULT") || exec.notifications.is_empty() {
                        continue;
                    }
                    notifs.extend(exec.notifications.iter().cloned());
                }

                handle_tx_call(&store_tx, &decimals, &tx, &notifs, app_log_idx).await?;
            }

            // This transaction is fully handled.
            app_log_idx = -1;
            send_counter(&store_tx, tx.id, -1).await?;
        }
    }

    Ok(())
}

async fn send_counter(store_tx: &mpsc::Sender<Nep5Store>, tx_pk: u64, app_log_idx: i32) -> Result<()> {
    store_tx
        .send(Nep5Store::Counter { tx_pk, app_log_idx })
        .await
        .map_err(|_| IndexerError::Other("nep5 store channel closed".to_string()))
}

/// Registration scripts call totalSupply, name, symbol and decimals.
fn is_registration_script(script: &str) -> bool {
    script.contains(TOTAL_SUPPLY_HEX)
        && script.contains("6e616d65")
        && script.contains("73796d626f6c")
        && script.contains("646563696d616c73")
}

/// SYSCALL "Neo.Contract.Migrate".
fn is_migrate_script(script: &str) -> bool {
    script.contains("68144e656f2e436f6e74726163742e4d696772617465")
}

/// Registers the contract behind a deployment script. Returns the admin
/// address and asset id on success; `None` leaves the transaction without a
/// dedicated checkpoint (a later transaction moves the cursor past it).
async fn handle_reg_tx(
    store: &Store,
    store_tx: &mpsc::Sender<Nep5Store>,
    decimals: &mut HashMap<String, u8>,
    tx: &Transaction,
    stack: &mut DataStack,
) -> Result<Option<(String, String)>> {
    let Some(admin_bytes) = get_caller_addr(store, tx).await? else {
        return Ok(None);
    };

    let Some((script, reg_info)) = get_nep5_reg_info(stack) else {
        return Ok(None);
    };

    let script_hash = util::script_hash(&script);
    let asset_id = util::asset_id_from_script_hash(&script_hash);
    let admin_addr = util::address_from_script_hash(&admin_bytes);

    if decimals.contains_key(&asset_id) {
        return Ok(Some((admin_addr, asset_id)));
    }

    // Probe the contract to make sure it really is a NEP5 token.
    let Some((nep5, addr_asset, at_height)) =
        query_nep5_asset_info(tx, &script_hash, &admin_bytes).await
    else {
        return Ok(None);
    };

    TOTAL_SUPPLY_CACHE.update(&nep5.asset_id, &nep5.total_supply, at_height);
    decimals.insert(nep5.asset_id.clone(), nep5.decimals);

    store_tx
        .send(Nep5Store::Asset {
            tx: tx.clone(),
            nep5,
            reg_info,
            addr_asset,
            at_height,
        })
        .await
        .map_err(|_| IndexerError::Other("nep5 store channel closed".to_string()))?;

    Ok(Some((admin_addr, asset_id)))
}

/// Migration scripts carry the old contract script hash on top, then a full
/// registration of the new contract.
async fn handle_migrate(
    store: &Store,
    store_tx: &mpsc::Sender<Nep5Store>,
    decimals: &mut HashMap<String, u8>,
    tx: &Transaction,
    stack: &mut DataStack,
) -> Result<()> {
    let Some(script_hash) = stack.pop_data() else {
        return send_counter(store_tx, tx.id, -1).await;
    };

    let old_asset_id = util::asset_id_from_script_hash(&script_hash);
    if old_asset_id.len() != 40 {
        return send_counter(store_tx, tx.id, -1).await;
    }

    match handle_reg_tx(store, store_tx, decimals, tx, stack).await? {
        Some((new_asset_admin, new_asset_id)) => store_tx
            .send(Nep5Store::Migrate {
                new_asset_admin,
                old_asset_id,
                new_asset_id,
                tx_pk: tx.id,
                txid: tx.txid.clone(),
            })
            .await
            .map_err(|_| IndexerError::Other("nep5 store channel closed".to_string())),
        None => send_counter(store_tx, tx.id, -1).await,
    }
}

/// Walks the remaining APPCALLs of a mixed invocation script. Transfers are
/// skipped here (the app log replays them); every other recognized call
/// refreshes the caller's balance and the asset's supply.
async fn handle_non_tx_call(
    store: &Store,
    store_tx: &mpsc::Sender<Nep5Store>,
    decimals: &HashMap<String, u8>,
    tx: &Transaction,
    stack: &mut DataStack,
) -> Result<()> {
    // An APPCALL needs its script hash and a method name.
    while stack.len() >= 2 {
        let Some((op_code, data)) = stack.pop_item() else {
            break;
        };

        if op_code != 0x67 {
            continue;
        }
        if data.len() != 20 {
            continue;
        }
        let script_hash = data;

        let Some(method) = stack.pop_data() else {
            break;
        };
        if method.is_empty() || method.as_slice() == b"transfer" {
            continue;
        }

        let Some(caller_bytes) = get_caller_addr(store, tx).await? else {
            continue;
        };

        let Some(total_supply) =
            query_nep5_total_supply(tx.block_index, &script_hash, decimals).await
        else {
            continue;
        };

        let Some(caller_balance) =
            query_caller_balance(tx.block_index, &script_hash, &caller_bytes, decimals).await
        else {
            continue;
        };
        if caller_balance.sign() != Sign::Plus {
            continue;
        }

        store_tx
            .send(Nep5Store::BalanceSupply {
                tx_pk: tx.id,
                block_time: tx.block_time,
                block_index: tx.block_index,
                addr: util::address_from_script_hash(&caller_bytes),
                balance: caller_balance,
                asset_id: util::asset_id_from_script_hash(&script_hash),
                total_supply,
            })
            .await
            .map_err(|_| IndexerError::Other("nep5 store channel closed".to_string()))?;
    }

    Ok(())
}

/// Replays the transfer notifications of one transaction, starting after the
/// last persisted index.
async fn handle_tx_call(
    store_tx: &mpsc::Sender<Nep5Store>,
    decimals: &HashMap<String, u8>,
    tx: &Transaction,
    notifs: &[RawNotification],
    app_log_idx: i32,
) -> Result<()> {
    let start = (app_log_idx + 1).max(0) as usize;

    for idx in start..notifs.len() {
        let notification = &notifs[idx];
        let Some(state) = &notification.state else {
            continue;
        };
        let Some(values) = state.as_array() else {
            continue;
        };
        if values.len() != 4 {
            continue;
        }

        if values[0].kind != "ByteArray" || values[0].value.as_str() != Some(TRANSFER_METHOD_HEX) {
            continue;
        }
        if values[1].kind == "Boolean" || values[2].kind == "Boolean" {
            continue;
        }
        let (Some(from_sc), Some(to_sc)) = (values[1].value.as_str(), values[2].value.as_str())
        else {
            continue;
        };
        if from_sc.is_empty() && to_sc.is_empty() {
            continue;
        }

        if notification.contract.len() < 2 {
            continue;
        }
        let asset_id = notification.contract[2..].to_string();
        if !decimals.contains_key(&asset_id) {
            continue;
        }

        record_nep5_transfer(
            store_tx,
            decimals,
            tx,
            &asset_id,
            from_sc,
            to_sc,
            &values[3].value,
            &values[3].kind,
            idx as i32,
        )
        .await?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn record_nep5_transfer(
    store_tx: &mpsc::Sender<Nep5Store>,
    decimals: &HashMap<String, u8>,
    tx: &Transaction,
    asset_id: &str,
    from_sc: &str,
    to_sc: &str,
    value: &Value,
    value_type: &str,
    app_log_idx: i32,
) -> Result<()> {
    let Ok(script_hash) = util::script_hash_from_asset_id(asset_id) else {
        warn!(txid = %tx.txid, asset_id, "transfer notification with malformed contract hash");
        return Ok(());
    };

    // The from side is empty when an asset is minted, the to side on burn.
    let from = hex::decode(from_sc).unwrap_or_default();
    let to = hex::decode(to_sc).unwrap_or_default();
    let from_addr = util::address_from_script_hash(&from);
    let to_addr = util::address_from_script_hash(&to);

    if from_addr.len() > 128 || to_addr.len() > 128 {
        error!(txid = %tx.txid, from = %from_addr, to = %to_addr, "oversized transfer address");
        return Ok(());
    }

    let Some(raw_value) = extract_value(value, value_type) else {
        return Ok(());
    };
    let Some(transfer_value) = readable_value(asset_id, raw_value, decimals) else {
        return Ok(());
    };

    let Some(balances) = query_balances(
        tx.block_index,
        &script_hash,
        asset_id,
        &[from.clone(), to.clone()],
        decimals,
    )
    .await
    else {
        return Ok(());
    };

    // Storage-injection detection.
    let total_supply = if to_sc == TOTAL_SUPPLY_HEX {
        query_nep5_total_supply(tx.block_index, &script_hash, decimals).await
    } else {
        None
    };

    store_tx
        .send(Nep5Store::Transfer {
            tx: tx.clone(),
            app_log_idx,
            asset_id: asset_id.to_string(),
            from_addr,
            from_balance: balances[0].clone(),
            to_addr,
            to_balance: balances[1].clone(),
            transfer_value,
            total_supply,
        })
        .await
        .map_err(|_| IndexerError::Other("nep5 store channel closed".to_string()))
}

/// Decodes a VM value into a decimal: Integer strings, little-endian
/// ByteArrays, or a nested [value, type] pair.
fn extract_value(value: &Value, value_type: &str) -> Option<BigDecimal> {
    match value_type {
        "Integer" => value.as_str()?.parse::<BigDecimal>().ok(),
        "ByteArray" => {
            let bytes = hex::decode(value.as_str()?).ok()?;
            Some(util::bytes_le_to_decimal(&bytes))
        }
        "Array" => {
            let arr = value.as_array()?;
            match arr.len() {
                0 => Some(BigDecimal::default()),
                2 => extract_value(&arr[0], arr[1].as_str()?),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Scales a raw token amount by the asset's decimals.
fn readable_value(
    asset_id: &str,
    balance: BigDecimal,
    decimals: &HashMap<String, u8>,
) -> Option<BigDecimal> {
    if balance.sign() == Sign::NoSign {
        return Some(BigDecimal::default());
    }
    let d = decimals.get(asset_id)?;
    Some(util::shift_decimals(&balance, *d))
}

/// Script hash of the transaction's verification script, identifying the
/// caller.
async fn get_caller_addr(store: &Store, tx: &Transaction) -> Result<Option<Vec<u8>>> {
    let scripts = store.get_tx_scripts(&tx.txid).await?;
    let Some(first) = scripts.first() else {
        return Ok(None);
    };
    if first.verification.is_empty() {
        return Ok(None);
    }

    let verification = hex::decode(&first.verification).unwrap_or_default();
    Ok(Some(util::script_hash(&verification)))
}

fn get_min_height(block_index: u32) -> i64 {
    let best = rpc::best_height();
    if best > block_index as i64 {
        best
    } else {
        block_index as i64
    }
}

/// One combined probe of name/symbol/decimals/totalSupply/balanceOf(admin)
/// against a candidate NEP5 contract.
async fn query_nep5_asset_info(
    tx: &Transaction,
    script_hash: &[u8],
    admin_bytes: &[u8],
) -> Option<(Nep5, Option<AddrAsset>, u32)> {
    let asset_id = util::asset_id_from_script_hash(script_hash);
    let admin_addr = util::address_from_script_hash(admin_bytes);

    let mut scripts = String::new();
    scripts += &build_contract_call(script_hash, "name", &[]);
    scripts += &build_contract_call(script_hash, "symbol", &[]);
    scripts += &build_contract_call(script_hash, "decimals", &[]);
    scripts += &build_contract_call(script_hash, "totalSupply", &[]);
    scripts += &build_contract_call(script_hash, "balanceOf", &[admin_bytes.to_vec()]);

    let min_height = get_min_height(tx.block_index);
    let result = rpc::invoke_script(min_height, &scripts).await?;
    if result.state.contains("FAULT") || result.stack.len() < 5 {
        return None;
    }

    let name_bytes = hex::decode(result.stack[0].value.as_str()?).ok()?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();
    if name.is_empty() {
        return None;
    }

    let symbol_bytes = hex::decode(result.stack[1].value.as_str()?).unwrap_or_default();
    let symbol = String::from_utf8_lossy(&symbol_bytes).into_owned();
    if symbol.is_empty() {
        return None;
    }

    let decimals = util::hex_le_to_bigint(result.stack[2].value.as_str()?)
        .ok()?
        .to_i64()?;
    if !(0..=8).contains(&decimals) {
        return None;
    }
    let decimals = decimals as u8;

    let total_supply = extract_value(&result.stack[3].value, &result.stack[3].kind)?;
    let total_supply = util::shift_decimals(&total_supply, decimals);

    let mut admin_balance = util::hex_le_to_decimal(result.stack[4].value.as_str()?).ok()?;
    if admin_balance.sign() == Sign::Plus {
        admin_balance = util::shift_decimals(&admin_balance, decimals);
    }

    let admin_holds = admin_balance.sign() == Sign::Plus;

    let nep5 = Nep5 {
        id: 0,
        asset_id: asset_id.clone(),
        admin_address: admin_addr.clone(),
        name,
        symbol,
        decimals,
        total_supply,
        txid: tx.txid.clone(),
        block_index: tx.block_index,
        block_time: tx.block_time,
        addresses: admin_holds as u64,
        holding_addresses: admin_holds as u64,
        transfers: 0,
    };

    // The admin may only operate the contract while the supply is issued
    // straight to others; then there is no balance row to seed.
    let addr_asset = admin_holds.then(|| AddrAsset {
        address: admin_addr,
        asset_id,
        balance: admin_balance,
        transactions: 0,
        last_transaction_time: 0,
    });

    Some((nep5, addr_asset, min_height as u32))
}

/// Caller balance for a non-transfer call, served from the cache when it is
/// newer than the transaction.
async fn query_caller_balance(
    tx_block_index: u32,
    script_hash: &[u8],
    caller_bytes: &[u8],
    decimals: &HashMap<String, u8>,
) -> Option<BigDecimal> {
    let asset_id = util::asset_id_from_script_hash(script_hash);
    let caller_addr = util::address_from_script_hash(caller_bytes);

    if let BalanceQuery::Present { balance, block_index } =
        ADDR_CACHE.get_addr_asset(&caller_addr, &asset_id)
    {
        if block_index > tx_block_index {
            return Some(balance);
        }
    }

    let d = *decimals.get(&asset_id)?;

    let script = build_contract_call(script_hash, "balanceOf", &[caller_bytes.to_vec()]);
    let result = rpc::invoke_script(rpc::best_height(), &script).await?;
    if result.state.contains("FAULT") || result.stack.is_empty() {
        return None;
    }

    let balance = util::hex_le_to_decimal(result.stack[0].value.as_str()?).ok()?;
    Some(util::shift_decimals(&balance, d))
}

/// Balances of the transfer participants, each from the cache when fresh
/// enough, the rest through one combined `balanceOf` probe.
async fn query_balances(
    tx_block_index: u32,
    script_hash: &[u8],
    asset_id: &str,
    addr_bytes_list: &[Vec<u8>],
    decimals: &HashMap<String, u8>,
) -> Option<Vec<BigDecimal>> {
    if !decimals.contains_key(asset_id) {
        return None;
    }

    let mut balances: Vec<Option<BigDecimal>> = vec![None; addr_bytes_list.len()];
    let mut script = String::new();

    for (idx, addr_bytes) in addr_bytes_list.iter().enumerate() {
        if addr_bytes.is_empty() {
            balances[idx] = Some(BigDecimal::default());
            continue;
        }

        let addr = util::address_from_script_hash(addr_bytes);
        if let BalanceQuery::Present { balance, block_index } =
            ADDR_CACHE.get_addr_asset(&addr, asset_id)
        {
            if block_index > tx_block_index {
                balances[idx] = Some(balance);
                continue;
            }
        }

        script += &build_contract_call(script_hash, "balanceOf", &[addr_bytes.clone()]);
    }

    if !script.is_empty() {
        let result = rpc::invoke_script(rpc::best_height(), &script).await?;
        // A broken contract (e.g. deployed without storage) faults here.
        if result.state.contains("FAULT") {
            return None;
        }

        let mut stack_idx = 0;
        for (idx, addr_bytes) in addr_bytes_list.iter().enumerate() {
            if addr_bytes.is_empty() || balances[idx].is_some() {
                continue;
            }
            let raw = util::hex_le_to_decimal(result.stack.get(stack_idx)?.value.as_str()?).ok()?;
            balances[idx] = readable_value(asset_id, raw, decimals);
            stack_idx += 1;
        }
    }

    balances.into_iter().collect()
}

/// Total supply, cached per asset at the height it was probed.
async fn query_nep5_total_supply(
    tx_block_index: u32,
    script_hash: &[u8],
    decimals: &HashMap<String, u8>,
) -> Option<BigDecimal> {
    let asset_id = util::asset_id_from_script_hash(script_hash);
    let d = *decimals.get(&asset_id)?;

    if let Some((supply, at_index)) = TOTAL_SUPPLY_CACHE.get(&asset_id) {
        if at_index > tx_block_index {
            return Some(supply);
        }
    }

    let script = build_contract_call(script_hash, "totalSupply", &[]);
    let min_height = rpc::best_height();
    let result = rpc::invoke_script(min_height, &script).await?;
    if result.state.contains("FAULT") || result.stack.is_empty() {
        return None;
    }

    // Some contracts return garbage before the actual value; take the first
    // entry that decodes.
    for stack in &result.stack {
        if let Some(raw) = extract_value(&stack.value, &stack.kind) {
            let supply = util::shift_decimals(&raw, d);
            TOTAL_SUPPLY_CACHE.update(&asset_id, &supply, min_height as u32);
            return Some(supply);
        }
    }

    None
}

/// Stage 4: the single writer applying store events in arrival order.
async fn handle_nep5_store(
    store: Store,
    mut store_rx: mpsc::Receiver<Nep5Store>,
    height_rx: watch::Receiver<i64>,
) -> Result<()> {
    let mut progress = TaskProgress::new("nep5", "NEP5 TX Fully Synced", height_rx);

    while let Some(event) = store_rx.recv().await {
        let tx_pk = match event {
            Nep5Store::Asset {
                tx,
                nep5,
                reg_info,
                addr_asset,
                at_height,
            } => {
                store
                    .insert_nep5_asset(&tx, &nep5, &reg_info, addr_asset.as_ref(), at_height)
                    .await?;
                tx.id
            }
            Nep5Store::Transfer {
                tx,
                app_log_idx,
                asset_id,
                from_addr,
                from_balance,
                to_addr,
                to_balance,
                transfer_value,
                total_supply,
            } => {
                store
                    .insert_nep5_transaction(
                        &tx,
                        app_log_idx,
                        &asset_id,
                        &from_addr,
                        &from_balance,
                        &to_addr,
                        &to_balance,
                        &transfer_value,
                        total_supply.as_ref(),
                    )
                    .await?;
                tx.id
            }
            Nep5Store::BalanceSupply {
                tx_pk,
                block_time,
                block_index,
                addr,
                balance,
                asset_id,
                total_supply,
            } => {
                store
                    .update_nep5_total_supply_and_addr_asset(
                        block_time,
                        block_index,
                        &addr,
                        &balance,
                        &asset_id,
                        &total_supply,
                    )
                    .await?;
                tx_pk
            }
            Nep5Store::Counter { tx_pk, app_log_idx } => {
                store.update_last_tx_pk_for_nep5(tx_pk, app_log_idx).await?;
                tx_pk
            }
            Nep5Store::Migrate {
                new_asset_admin,
                old_asset_id,
                new_asset_id,
                tx_pk,
                txid,
            } => {
                store
                    .handle_nep5_migrate(&new_asset_admin, &old_asset_id, &new_asset_id, tx_pk, &txid)
                    .await?;
                tx_pk
            }
        };

        progress
            .refresh_denominator(|| store.max_invocation_tx_pk())
            .await?;
        progress.report(tx_pk as i64).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_registration_script_detection() {
        // totalSupply, name, symbol, decimals as hex substrings.
        let script = format!(
            "00{}11{}22{}33{}",
            TOTAL_SUPPLY_HEX, "6e616d65", "73796d626f6c", "646563696d616c73"
        );
        assert!(is_registration_script(&script));
        assert!(!is_registration_script("6e616d6573796d626f6c"));
    }

    #[test]
    fn test_migrate_script_detection() {
        let script = "0011|68144e656f2e436f6e74726163742e4d696772617465|22".replace('|', "");
        assert!(is_migrate_script(&script));
        assert!(!is_migrate_script("00112233"));
    }

    #[test]
    fn test_extract_value_integer() {
        let v = Value::String("100".to_string());
        assert_eq!(extract_value(&v, "Integer"), Some(BigDecimal::from(100)));
        let bad = Value::String("not-a-number".to_string());
        assert_eq!(extract_value(&bad, "Integer"), None);
    }

    #[test]
    fn test_extract_value_byte_array() {
        // 0x0100 little-endian = 1.
        let v = Value::String("0100".to_string());
        assert_eq!(extract_value(&v, "ByteArray"), Some(BigDecimal::from(1)));
        // High-bit bytes decode unsigned.
        let v = Value::String("ff".to_string());
        assert_eq!(extract_value(&v, "ByteArray"), Some(BigDecimal::from(255)));
    }

    #[test]
    fn test_extract_value_array() {
        let v: Value = serde_json::json!([]);
        assert_eq!(extract_value(&v, "Array"), Some(BigDecimal::default()));

        let v: Value = serde_json::json!(["64", "Integer"]);
        assert_eq!(extract_value(&v, "Array"), Some(BigDecimal::from(100)));

        let v: Value = serde_json::json!(["1", "2", "3"]);
        assert_eq!(extract_value(&v, "Array"), None);
    }

    #[test]
    fn test_readable_value_scales_by_decimals() {
        let mut decimals = HashMap::new();
        decimals.insert("aa".to_string(), 2u8);

        // Integer "100" with decimals=2 reads as 1.00.
        let raw = extract_value(&Value::String("100".to_string()), "Integer").unwrap();
        assert_eq!(
            readable_value("aa", raw, &decimals),
            Some(BigDecimal::from_str("1.00").unwrap())
        );

        // Zero short-circuits without needing decimals.
        assert_eq!(
            readable_value("missing", BigDecimal::default(), &decimals),
            Some(BigDecimal::default())
        );
        // Unknown asset with non-zero value has no readable form.
        assert_eq!(readable_value("missing", BigDecimal::from(5), &decimals), None);
    }
}
