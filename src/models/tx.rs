use std::collections::HashMap;

use bigdecimal::BigDecimal;
use sqlx::FromRow;

use crate::error::{IndexerError, Result};
use crate::models::asset::{self, Asset};
use crate::rpc::types::{RawBlock, RawTx};
use crate::script::asset::{parse_asset_script, ASSET_FINGERPRINT};

/// The eight transaction types of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    Register,
    Miner,
    Issue,
    Invocation,
    Contract,
    Claim,
    Publish,
    Enrollment,
}

impl TxType {
    pub fn name(self) -> &'static str {
        match self {
            TxType::Register => "RegisterTransaction",
            TxType::Miner => "MinerTransaction",
            TxType::Issue => "IssueTransaction",
            TxType::Invocation => "InvocationTransaction",
            TxType::Contract => "ContractTransaction",
            TxType::Claim => "ClaimTransaction",
            TxType::Publish => "PublishTransaction",
            TxType::Enrollment => "EnrollmentTransaction",
        }
    }

    pub fn from_name(name: &str) -> Result<TxType> {
        match name {
            "RegisterTransaction" => Ok(TxType::Register),
            "MinerTransaction" => Ok(TxType::Miner),
            "IssueTransaction" => Ok(TxType::Issue),
            "InvocationTransaction" => Ok(TxType::Invocation),
            "ContractTransaction" => Ok(TxType::Contract),
            "ClaimTransaction" => Ok(TxType::Claim),
            "PublishTransaction" => Ok(TxType::Publish),
            "EnrollmentTransaction" => Ok(TxType::Enrollment),
            other => Err(IndexerError::invariant(format!(
                "unknown transaction type: {}",
                other
            ))),
        }
    }

    /// `counter` column holding this type's count.
    pub fn counter_column(self) -> &'static str {
        match self {
            TxType::Register => "cnt_tx_reg",
            TxType::Miner => "cnt_tx_miner",
            TxType::Issue => "cnt_tx_issue",
            TxType::Invocation => "cnt_tx_invocation",
            TxType::Contract => "cnt_tx_contract",
            TxType::Claim => "cnt_tx_claim",
            TxType::Publish => "cnt_tx_publish",
            TxType::Enrollment => "cnt_tx_enrollment",
        }
    }
}

/// Transaction row (`tx` table).
#[derive(Debug, Clone, FromRow)]
pub struct Transaction {
    #[sqlx(default)]
    pub id: u64,
    pub block_index: u32,
    pub block_time: u64,
    pub txid: String,
    pub size: u32,
    #[sqlx(rename = "type")]
    pub tx_type: String,
    pub version: u32,
    pub sys_fee: BigDecimal,
    pub net_fee: BigDecimal,
    pub nonce: i64,
    pub script: String,
    pub gas: BigDecimal,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionAttribute {
    pub txid: String,
    pub usage: String,
    pub data: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionVin {
    /// Txid of the transaction this vin belongs to.
    pub from: String,
    /// Txid of the transaction whose vout is being consumed.
    pub txid: String,
    pub vout: u16,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionVout {
    pub txid: String,
    pub n: u16,
    pub asset_id: String,
    pub value: BigDecimal,
    pub address: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionScripts {
    pub txid: String,
    pub invocation: String,
    pub verification: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionClaims {
    pub txid: String,
    pub vout: u16,
}

/// (address, asset_id, txid) triple for the `asset_tx` index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddrAssetIdTx {
    pub address: String,
    pub asset_id: String,
    pub txid: String,
}

/// Everything extracted from one batch of raw blocks, ready for bulk insert.
#[derive(Debug, Default)]
pub struct Bulk {
    pub txs: Vec<Transaction>,
    pub attrs: Vec<TransactionAttribute>,
    pub vins: Vec<TransactionVin>,
    pub vouts: Vec<TransactionVout>,
    pub scripts: Vec<TransactionScripts>,
    pub assets: Vec<Asset>,
    pub claims: Vec<TransactionClaims>,
}

/// Parses all raw transactions of the given blocks.
pub fn parse_txs(raw_blocks: &[RawBlock]) -> Bulk {
    let mut bulk = Bulk::default();

    for raw_block in raw_blocks {
        for raw_tx in &raw_block.tx {
            append_tx(&mut bulk.txs, raw_block.index, raw_block.time, raw_tx);
            append_attrs(&mut bulk.attrs, raw_tx);
            append_vins(&mut bulk.vins, raw_tx);
            append_vouts(&mut bulk.vouts, raw_tx);
            append_scripts(&mut bulk.scripts, raw_tx);
            append_asset(&mut bulk.assets, raw_block, raw_tx);
            append_claims(&mut bulk.claims, raw_tx);
        }
    }

    bulk
}

fn append_tx(txs: &mut Vec<Transaction>, block_index: u32, block_time: u64, raw_tx: &RawTx) {
    txs.push(Transaction {
        id: 0,
        block_index,
        block_time,
        txid: raw_tx.txid.clone(),
        size: raw_tx.size,
        tx_type: raw_tx.tx_type.clone(),
        version: raw_tx.version,
        sys_fee: raw_tx.sys_fee.clone().unwrap_or_default(),
        net_fee: raw_tx.net_fee.clone().unwrap_or_default(),
        nonce: raw_tx.nonce,
        script: raw_tx.script.clone(),
        gas: raw_tx.gas.clone().unwrap_or_default(),
    });
}

fn append_attrs(attrs: &mut Vec<TransactionAttribute>, raw_tx: &RawTx) {
    for raw_attr in &raw_tx.attributes {
        attrs.push(TransactionAttribute {
            txid: raw_tx.txid.clone(),
            usage: raw_attr.usage.clone(),
            data: raw_attr.data.clone(),
        });
    }
}

fn append_vins(vins: &mut Vec<TransactionVin>, raw_tx: &RawTx) {
    for raw_vin in &raw_tx.vin {
        vins.push(TransactionVin {
            from: raw_tx.txid.clone(),
            txid: raw_vin.txid.clone(),
            vout: raw_vin.vout,
        });
    }
}

fn append_vouts(vouts: &mut Vec<TransactionVout>, raw_tx: &RawTx) {
    for raw_vout in &raw_tx.vout {
        vouts.push(TransactionVout {
            txid: raw_tx.txid.clone(),
            n: raw_vout.n,
            asset_id: raw_vout.asset.clone(),
            value: raw_vout.value.clone(),
            address: raw_vout.address.clone(),
        });
    }
}

fn append_scripts(scripts: &mut Vec<TransactionScripts>, raw_tx: &RawTx) {
    for raw_script in &raw_tx.scripts {
        scripts.push(TransactionScripts {
            txid: raw_tx.txid.clone(),
            invocation: raw_script.invocation.clone(),
            verification: raw_script.verification.clone(),
        });
    }
}

fn append_claims(claims: &mut Vec<TransactionClaims>, raw_tx: &RawTx) {
    for raw_claim in &raw_tx.claims {
        claims.push(TransactionClaims {
            txid: raw_tx.txid.clone(),
            vout: raw_claim.vout,
        });
    }
}

fn append_asset(assets: &mut Vec<Asset>, raw_block: &RawBlock, raw_tx: &RawTx) {
    let mut asset = if raw_tx.tx_type == TxType::Register.name() {
        parse_asset_from_register_transaction(raw_block.index, raw_tx)
    } else if raw_tx.tx_type == TxType::Invocation.name()
        && raw_tx.script.ends_with(ASSET_FINGERPRINT)
    {
        match parse_asset_script(&raw_tx.script) {
            Some(mut a) => {
                a.version = 0;
                a.asset_id = raw_tx.txid.clone();
                a.expiration = raw_block.index as u64 + 2_000_000;
                Some(a)
            }
            None => return,
        }
    } else {
        return;
    };

    if let Some(a) = asset.as_mut() {
        a.block_index = raw_block.index;
        a.block_time = raw_block.time;
        a.addresses = 0;
        a.transactions = 0;
        assets.push(a.clone());
    }
}

fn parse_asset_from_register_transaction(block_index: u32, raw_tx: &RawTx) -> Option<Asset> {
    let def = raw_tx.asset.as_ref()?;

    let mut new_asset = Asset {
        id: 0,
        block_index: 0,
        block_time: 0,
        version: raw_tx.version,
        asset_id: raw_tx.txid.clone(),
        asset_type: def.asset_type.clone(),
        name: def.name.first().map(|n| n.name.clone()).unwrap_or_default(),
        amount: def.amount.clone().unwrap_or_default(),
        available: BigDecimal::default(),
        precision: def.precision,
        owner: def.owner.clone(),
        admin: def.admin.clone(),
        issuer: def.owner.clone(),
        expiration: block_index as u64 + 2 * 2_000_000,
        frozen: false,
        addresses: 0,
        transactions: 0,
    };

    if new_asset.asset_id == asset::NEO_ASSET_ID {
        new_asset.name = asset::NEO.to_string();
    } else if new_asset.asset_id == asset::GAS_ASSET_ID {
        new_asset.name = asset::GAS.to_string();
    }

    Some(new_asset)
}

/// Counts transactions per type; unknown types are a fatal invariant
/// violation.
pub fn count_tx_types(txs: &[Transaction]) -> Result<HashMap<TxType, i64>> {
    let mut counter = HashMap::new();
    for t in txs {
        let tx_type = TxType::from_name(&t.tx_type)?;
        *counter.entry(tx_type).or_insert(0) += 1;
    }
    Ok(counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::{RawAssetDef, RawAssetName, RawClaim, RawVin, RawVout};
    use std::str::FromStr;

    fn raw_block_with(tx: RawTx) -> RawBlock {
        RawBlock {
            index: 0,
            time: 1468595301,
            tx: vec![tx],
            ..Default::default()
        }
    }

    fn register_tx(asset_id: &str) -> RawTx {
        RawTx {
            txid: asset_id.to_string(),
            tx_type: "RegisterTransaction".to_string(),
            asset: Some(RawAssetDef {
                asset_type: "GoverningToken".to_string(),
                name: vec![RawAssetName {
                    lang: "en".to_string(),
                    name: "AntShare".to_string(),
                }],
                amount: Some(BigDecimal::from(100000000)),
                precision: 0,
                owner: "00".to_string(),
                admin: "Abf2qMs1pzQb8kYk9RuxtUb9jtRKJVuBJt".to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_neo_registration() {
        let block = raw_block_with(register_tx(asset::NEO_ASSET_ID));
        let bulk = parse_txs(&[block]);

        assert_eq!(bulk.assets.len(), 1);
        let a = &bulk.assets[0];
        assert_eq!(a.name, "NEO");
        assert_eq!(a.expiration, 2 * 2_000_000);
        assert_eq!(a.precision, 0);
        assert_eq!(a.amount, BigDecimal::from(100000000));
        assert_eq!(a.issuer, a.owner);
    }

    #[test]
    fn test_parse_children() {
        let tx = RawTx {
            txid: "t1".to_string(),
            tx_type: "ContractTransaction".to_string(),
            vin: vec![RawVin {
                txid: "t0".to_string(),
                vout: 1,
            }],
            vout: vec![RawVout {
                n: 0,
                asset: asset::NEO_ASSET_ID.to_string(),
                value: BigDecimal::from_str("10").unwrap(),
                address: "AdDr".to_string(),
            }],
            claims: vec![RawClaim {
                txid: "t0".to_string(),
                vout: 2,
            }],
            ..Default::default()
        };
        let bulk = parse_txs(&[raw_block_with(tx)]);

        assert_eq!(bulk.txs.len(), 1);
        assert_eq!(bulk.vins.len(), 1);
        assert_eq!(bulk.vins[0].from, "t1");
        assert_eq!(bulk.vins[0].txid, "t0");
        assert_eq!(bulk.vouts.len(), 1);
        assert_eq!(bulk.vouts[0].address, "AdDr");
        assert_eq!(bulk.claims.len(), 1);
        assert!(bulk.assets.is_empty());
    }

    #[test]
    fn test_count_tx_types() {
        let mk = |t: &str| Transaction {
            id: 0,
            block_index: 0,
            block_time: 0,
            txid: String::new(),
            size: 0,
            tx_type: t.to_string(),
            version: 0,
            sys_fee: BigDecimal::default(),
            net_fee: BigDecimal::default(),
            nonce: 0,
            script: String::new(),
            gas: BigDecimal::default(),
        };
        let txs = vec![
            mk("MinerTransaction"),
            mk("MinerTransaction"),
            mk("InvocationTransaction"),
        ];
        let counts = count_tx_types(&txs).unwrap();
        assert_eq!(counts[&TxType::Miner], 2);
        assert_eq!(counts[&TxType::Invocation], 1);

        assert!(count_tx_types(&[mk("BogusTransaction")]).is_err());
    }
}
