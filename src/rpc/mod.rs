/// JSON-RPC client over a fleet of chain nodes.
///
/// The fleet tracker keeps a height per configured URL; requests pick a
/// random server whose height covers the request. Unreachable servers are
/// marked with height -1 and recover on the next refresh.
pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use lazy_static::lazy_static;
use once_cell::sync::Lazy;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config;
use crate::telemetry::truncate_hex;
use types::{BlockCountResponse, RawAppLogResult, RawBlock, RawInvokeResult, RpcResponse};

lazy_static! {
    static ref SERVERS: Mutex<HashMap<String, i64>> = Mutex::new(HashMap::new());
}

static BEST_HEIGHT: AtomicI64 = AtomicI64::new(0);

static HTTP: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
        .expect("failed to build http client")
});

/// Current highest height seen across the fleet.
pub fn best_height() -> i64 {
    BEST_HEIGHT.load(Ordering::Relaxed)
}

pub fn set_best_height(height: i64) {
    BEST_HEIGHT.store(height, Ordering::Relaxed);
}

/// Parameters are integers or strings; nothing else is representable.
#[derive(Debug, Clone)]
pub enum RpcParam {
    Int(i64),
    Str(String),
}

impl From<&RpcParam> for Value {
    fn from(p: &RpcParam) -> Value {
        match p {
            RpcParam::Int(i) => json!(i),
            RpcParam::Str(s) => json!(s),
        }
    }
}

fn request_body(method: &str, params: &[RpcParam]) -> Value {
    let params: Vec<Value> = params.iter().map(Value::from).collect();
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    })
}

/// Randomly picks a server whose known height is at least `min_height`.
/// Local servers are listed twice and therefore picked twice as often.
pub fn pick_server(min_height: i64) -> Option<String> {
    let servers = SERVERS.lock().unwrap_or_else(|e| e.into_inner());

    let mut candidates = Vec::new();
    for (url, height) in servers.iter() {
        if *height >= min_height {
            if url.contains("127.0.0.1") || url.contains("localhost") {
                candidates.push(url.clone());
            }
            candidates.push(url.clone());
        }
    }

    if candidates.is_empty() {
        return None;
    }
    let idx = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates.swap_remove(idx))
}

/// Marks a server unreachable until the next refresh.
pub fn mark_unavailable(url: &str) {
    let mut servers = SERVERS.lock().unwrap_or_else(|e| e.into_inner());
    // The url may be gone if config was reloaded meanwhile.
    if let Some(height) = servers.get_mut(url) {
        *height = -1;
    }
}

fn log_server_status() {
    let servers = SERVERS.lock().unwrap_or_else(|e| e.into_inner());
    for (url, height) in servers.iter() {
        info!(%url, height, "rpc server status");
    }
}

/// Queries every configured server for its height and publishes the maximum.
pub async fn refresh_servers() -> i64 {
    let urls = config::rpc_urls();
    let mut set = tokio::task::JoinSet::new();
    for url in urls {
        set.spawn(async move {
            let height = get_height_from(&url).await;
            (url, height)
        });
    }

    let mut heights = HashMap::new();
    while let Some(joined) = set.join_next().await {
        if let Ok((url, height)) = joined {
            heights.insert(url, height);
        }
    }

    let best = heights.values().copied().max().unwrap_or(0).max(0);

    let mut servers = SERVERS.lock().unwrap_or_else(|e| e.into_inner());
    *servers = heights;
    drop(servers);

    BEST_HEIGHT.store(best, Ordering::Relaxed);
    best
}

/// Refreshes fleet heights every three seconds, forever.
pub async fn trace_best_height() -> crate::error::Result<()> {
    loop {
        refresh_servers().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
}

async fn get_height_from(url: &str) -> i64 {
    let body = request_body("getblockcount", &[]);
    let resp = match HTTP.post(url).json(&body).send().await {
        Ok(r) => r,
        Err(_) => return -1,
    };
    match resp.json::<BlockCountResponse>().await {
        Ok(data) => data.result - 1,
        Err(_) => -1,
    }
}

/// Performs one JSON-RPC call against any server at `min_height` or above.
///
/// Transport errors rotate to another server forever. For `getblock`, a
/// missing candidate server means the request is beyond the chain tip and
/// `None` is returned. A malformed response body is logged together with the
/// request and skipped.
async fn call<T: DeserializeOwned>(
    min_height: i64,
    method: &str,
    params: &[RpcParam],
) -> Option<T> {
    let body = request_body(method, params);

    loop {
        let url = match pick_server(min_height) {
            Some(url) => url,
            None => {
                if method == "getblock" {
                    return None;
                }
                warn!(
                    min_height,
                    "no server's height is higher than or equal to requirement, \
                     waiting 3 seconds before retry"
                );
                log_server_status();
                tokio::time::sleep(Duration::from_secs(3)).await;
                continue;
            }
        };

        let resp = match HTTP.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(%url, error = %e, "rpc request failed");
                mark_unavailable(&url);
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => {
                error!(%url, error = %e, "failed to read rpc response");
                mark_unavailable(&url);
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        match serde_json::from_str::<RpcResponse<T>>(&text) {
            Ok(parsed) => return parsed.result,
            Err(e) => {
                error!(
                    error = %e,
                    request = %body,
                    response = %truncate_hex(&text, 2048),
                    "malformed rpc response"
                );
                return None;
            }
        }
    }
}

/// Downloads the block at `index`; `None` once past the chain tip.
pub async fn download_block(index: i64) -> Option<RawBlock> {
    call(index, "getblock", &[RpcParam::Int(index), RpcParam::Int(1)]).await
}

/// Fetches the application log of a transaction, retrying forever with
/// randomized exponential backoff capped at ten seconds.
pub async fn get_application_log(block_index: i64, txid: &str) -> RawAppLogResult {
    let params = [RpcParam::Str(txid.to_string())];

    if let Some(result) = call(block_index, "getapplicationlog", &params).await {
        return result;
    }

    let mut retry_time: u32 = 0;
    let mut delay: u64 = 0;

    loop {
        retry_time += 1;
        if delay < 10_000 {
            let span = 1u64 << retry_time.min(13);
            delay = rand::thread_rng().gen_range(0..span) + 1000;
        }

        warn!(txid, retry_time, delay_ms = delay, "can not get application log, retrying");
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if let Some(result) = call(block_index, "getapplicationlog", &params).await {
            return result;
        }
    }
}

/// Executes a read-only script on a node at `min_height` or above.
pub async fn invoke_script(min_height: i64, script: &str) -> Option<RawInvokeResult> {
    call(min_height, "invokescript", &[RpcParam::Str(script.to_string())]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_param_encoding() {
        let body = request_body(
            "getblock",
            &[RpcParam::Int(12), RpcParam::Str("0xabc".to_string())],
        );
        assert_eq!(body["method"], "getblock");
        assert_eq!(body["params"][0], json!(12));
        assert_eq!(body["params"][1], json!("0xabc"));
        assert_eq!(body["id"], json!(1));
    }

    #[test]
    fn test_pick_server_respects_height() {
        {
            let mut servers = SERVERS.lock().unwrap();
            servers.clear();
            servers.insert("http://a:10332".to_string(), 100);
            servers.insert("http://b:10332".to_string(), -1);
        }
        assert!(pick_server(200).is_none());
        assert_eq!(pick_server(50), Some("http://a:10332".to_string()));

        mark_unavailable("http://a:10332");
        assert!(pick_server(0).is_none());
        SERVERS.lock().unwrap().clear();
    }
}
