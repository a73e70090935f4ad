use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;

/// JSON-RPC response envelope; a missing or null `result` means the request
/// was beyond the node's data or failed server-side.
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    #[serde(default = "default_result")]
    pub result: Option<T>,
}

fn default_result<T>() -> Option<T> {
    None
}

#[derive(Debug, Deserialize)]
pub struct BlockCountResponse {
    #[serde(default)]
    pub result: i64,
}

/// Raw block as returned by `getblock(index, 1)`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBlock {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub version: u32,
    #[serde(default, rename = "previousblockhash")]
    pub previous_block_hash: String,
    #[serde(default, rename = "merkleroot")]
    pub merkle_root: String,
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub nonce: String,
    #[serde(default, rename = "nextconsensus")]
    pub next_consensus: String,
    #[serde(default)]
    pub script: RawBlockScript,
    #[serde(default)]
    pub tx: Vec<RawTx>,
    #[serde(default, rename = "nextblockhash")]
    pub next_block_hash: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBlockScript {
    #[serde(default)]
    pub invocation: String,
    #[serde(default)]
    pub verification: String,
}

/// Raw transaction embedded in a raw block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTx {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub size: u32,
    #[serde(default, rename = "type")]
    pub tx_type: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub attributes: Vec<RawTxAttr>,
    #[serde(default)]
    pub vin: Vec<RawVin>,
    #[serde(default)]
    pub vout: Vec<RawVout>,
    #[serde(default)]
    pub sys_fee: Option<BigDecimal>,
    #[serde(default)]
    pub net_fee: Option<BigDecimal>,
    #[serde(default)]
    pub scripts: Vec<RawTxScript>,
    #[serde(default)]
    pub asset: Option<RawAssetDef>,
    #[serde(default)]
    pub claims: Vec<RawClaim>,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub nonce: i64,
    #[serde(default)]
    pub gas: Option<BigDecimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTxAttr {
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVin {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub vout: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVout {
    #[serde(default)]
    pub n: u16,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub value: BigDecimal,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTxScript {
    #[serde(default)]
    pub invocation: String,
    #[serde(default)]
    pub verification: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAssetDef {
    #[serde(default, rename = "type")]
    pub asset_type: String,
    #[serde(default)]
    pub name: Vec<RawAssetName>,
    #[serde(default)]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub precision: u8,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub admin: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAssetName {
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawClaim {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub vout: u16,
}

/// `getapplicationlog` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAppLogResult {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub executions: Vec<RawExecution>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExecution {
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub contract: String,
    #[serde(default, rename = "vmstate")]
    pub vm_state: String,
    #[serde(default)]
    pub notifications: Vec<RawNotification>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNotification {
    #[serde(default)]
    pub contract: String,
    #[serde(default)]
    pub state: Option<RawState>,
}

/// A typed VM value; `value` stays raw JSON because its shape depends on
/// `type`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawState {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

impl RawState {
    /// Unpacks an Array-typed state into its stack values.
    pub fn as_array(&self) -> Option<Vec<RawStack>> {
        if self.kind != "Array" {
            return None;
        }
        let arr = self.value.as_array()?;
        let mut stacks = Vec::with_capacity(arr.len());
        for item in arr {
            let obj = item.as_object()?;
            stacks.push(RawStack {
                kind: obj.get("type")?.as_str()?.to_string(),
                value: obj.get("value").cloned().unwrap_or(Value::Null),
            });
        }
        Some(stacks)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStack {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

/// `invokescript` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInvokeResult {
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub gas_consumed: Option<BigDecimal>,
    #[serde(default)]
    pub stack: Vec<RawStack>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_block_decode() {
        let body = r#"{
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "hash": "0xabc",
                "size": 686,
                "version": 0,
                "previousblockhash": "0xdef",
                "merkleroot": "0x123",
                "time": 1476647382,
                "index": 127,
                "nonce": "5c564ab9b8f2dfb4",
                "nextconsensus": "AdDr",
                "script": {"invocation": "40", "verification": "55"},
                "tx": [{
                    "txid": "0xt1",
                    "size": 10,
                    "type": "MinerTransaction",
                    "version": 0,
                    "attributes": [],
                    "vin": [],
                    "vout": [{"n": 0, "asset": "0xa", "value": "7.5", "address": "AdDr"}],
                    "sys_fee": "0",
                    "net_fee": "0",
                    "scripts": [],
                    "nonce": 3098130356
                }],
                "nextblockhash": "0x456"
            }
        }"#;
        let resp: RpcResponse<RawBlock> = serde_json::from_str(body).unwrap();
        let block = resp.result.unwrap();
        assert_eq!(block.index, 127);
        assert_eq!(block.tx.len(), 1);
        assert_eq!(block.tx[0].vout[0].value, "7.5".parse().unwrap());
        assert_eq!(block.script.invocation, "40");
    }

    #[test]
    fn test_empty_result_decodes_to_none() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let resp: RpcResponse<RawBlock> = serde_json::from_str(body).unwrap();
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_state_as_array() {
        let state: RawState = serde_json::from_str(
            r#"{"type":"Array","value":[
                {"type":"ByteArray","value":"7472616e73666572"},
                {"type":"Integer","value":"100"}
            ]}"#,
        )
        .unwrap();
        let values = state.as_array().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].kind, "ByteArray");
        assert_eq!(values[1].value.as_str(), Some("100"));

        let scalar: RawState =
            serde_json::from_str(r#"{"type":"Integer","value":"1"}"#).unwrap();
        assert!(scalar.as_array().is_none());
    }
}
