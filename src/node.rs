//! JSON-RPC client for the chain node. The wallet only depends on the
//! [`NodeClient`] trait, so scanning and building run against any backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::address::{self, ExternalAddress};
use crate::crypto::{self, Key};
use crate::error::{Result, WalletError};
use crate::rct::CtKey;
use crate::transaction::{TokenId, Transaction};

/// A block as the scanner sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub hash: Key,
    pub parent_hash: Key,
    pub timestamp: u64,
    pub txs: Vec<BlockTx>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTx {
    pub hash: Key,
    /// Signer of account inputs, when the tx has any.
    pub from: Option<ExternalAddress>,
    pub tx: Transaction,
}

/// Arguments of `eth_estimateGas`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallRequest {
    pub from: ExternalAddress,
    pub to: ExternalAddress,
    pub value: u128,
    pub data: Vec<u8>,
    pub nonce: u64,
    pub token: TokenId,
}

pub trait NodeClient: Send + Sync {
    fn block_number(&self) -> BoxFuture<'_, Result<u64>>;
    fn get_block(&self, height: u64) -> BoxFuture<'_, Result<Block>>;
    /// Ring members (one-time address and commitment) by global index.
    fn get_outputs(&self, token: TokenId, indices: Vec<u64>) -> BoxFuture<'_, Result<Vec<CtKey>>>;
    fn get_token_balance(&self, addr: ExternalAddress, token: TokenId) -> BoxFuture<'_, Result<u128>>;
    fn get_transaction_count(&self, addr: ExternalAddress) -> BoxFuture<'_, Result<u64>>;
    fn get_code(&self, addr: ExternalAddress) -> BoxFuture<'_, Result<Vec<u8>>>;
    /// Gas units for a plain account call.
    fn estimate_gas(&self, call: CallRequest) -> BoxFuture<'_, Result<u64>>;
    fn get_utxo_gas(&self) -> BoxFuture<'_, Result<u64>>;
    fn send_raw_utxo_transaction(&self, raw: Vec<u8>) -> BoxFuture<'_, Result<Key>>;
    fn chain_version(&self) -> BoxFuture<'_, Result<String>>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    hash: String,
    parent_hash: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<RpcTx>,
}

#[derive(Debug, Deserialize)]
struct RpcTx {
    hash: String,
    #[serde(default)]
    from: Option<String>,
    raw: String,
}

#[derive(Debug, Deserialize)]
struct RpcOutput {
    out: String,
    commit: String,
}

fn data_err(what: impl std::fmt::Display) -> WalletError {
    WalletError::DaemonDataErr(what.to_string())
}

/// `0x`-prefixed hex quantity.
pub fn parse_quantity(s: &str) -> Result<u128> {
    let digits = s.strip_prefix("0x").ok_or_else(|| data_err(format!("quantity {s} lacks 0x")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| data_err(format!("quantity {s}: {e}")))
}

fn parse_u64(s: &str) -> Result<u64> {
    u64::try_from(parse_quantity(s)?).map_err(|_| data_err(format!("{s} exceeds u64")))
}

pub fn quantity(v: u128) -> String {
    format!("0x{v:x}")
}

fn parse_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim_start_matches("0x")).map_err(data_err)
}

fn parse_key(s: &str) -> Result<Key> {
    crypto::key_from_hex(s).map_err(|_| data_err(format!("bad 32-byte hex {s}")))
}

impl RpcBlock {
    fn into_block(self) -> Result<Block> {
        let mut txs = Vec::with_capacity(self.transactions.len());
        for t in self.transactions {
            let raw = parse_bytes(&t.raw)?;
            let tx = Transaction::from_bytes(&raw).map_err(|e| data_err(format!("tx {}: {e}", t.hash)))?;
            let from = match t.from.as_deref() {
                Some(f) if !f.is_empty() => Some(address::parse_external(f).map_err(data_err)?),
                _ => None,
            };
            txs.push(BlockTx { hash: parse_key(&t.hash)?, from, tx });
        }
        Ok(Block {
            height: parse_u64(&self.number)?,
            hash: parse_key(&self.hash)?,
            parent_hash: parse_key(&self.parent_hash)?,
            timestamp: parse_u64(&self.timestamp)?,
            txs,
        })
    }
}

/// Node client over HTTP with a pooled connection and a per-call deadline.
pub struct HttpNodeClient {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpNodeClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::NoConnectionToDaemon(e.to_string()))?;
        Ok(HttpNodeClient { url: url.to_string(), client, next_id: AtomicU64::new(1) })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(method, id, "node call");
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::NoConnectionToDaemon(format!("{method}: {e}")))?;
        let text = resp
            .text()
            .await
            .map_err(|e| WalletError::NoConnectionToDaemon(format!("{method}: {e}")))?;
        if text.is_empty() {
            return Err(WalletError::NoConnectionToDaemon(format!("{method}: empty body")));
        }
        let parsed: RpcResponse =
            serde_json::from_str(&text).map_err(|e| WalletError::DaemonBodyErr(format!("{method}: {e}")))?;
        if let Some(err) = parsed.error {
            if err.code != 0 {
                warn!(method, code = err.code, message = %err.message, "node returned an error");
                return Err(WalletError::DaemonCodeErr { code: err.code, message: err.message });
            }
        }
        let result = parsed.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| data_err(format!("{method}: {e}")))
    }
}

impl NodeClient for HttpNodeClient {
    fn block_number(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let h: String = self.call("eth_blockNumber", json!([])).await?;
            parse_u64(&h)
        })
    }

    fn get_block(&self, height: u64) -> BoxFuture<'_, Result<Block>> {
        Box::pin(async move {
            let block: Option<RpcBlock> = self
                .call("eth_getBlockUTXOsByNumber", json!([quantity(u128::from(height)), true]))
                .await?;
            block.ok_or(WalletError::BlockNotFound(height))?.into_block()
        })
    }

    fn get_outputs(&self, token: TokenId, indices: Vec<u64>) -> BoxFuture<'_, Result<Vec<CtKey>>> {
        Box::pin(async move {
            if indices.is_empty() {
                return Ok(Vec::new());
            }
            let args: Vec<Value> = indices
                .iter()
                .map(|i| json!({ "token": address::external_to_string(&token), "index": quantity(u128::from(*i)) }))
                .collect();
            let outputs: Vec<RpcOutput> = self.call("eth_getOutputs", json!([args])).await?;
            if outputs.len() != indices.len() {
                return Err(data_err(format!("asked {} outputs, got {}", indices.len(), outputs.len())));
            }
            outputs
                .iter()
                .map(|o| Ok(CtKey { dest: parse_key(&o.out)?, mask: parse_key(&o.commit)? }))
                .collect()
        })
    }

    fn get_token_balance(&self, addr: ExternalAddress, token: TokenId) -> BoxFuture<'_, Result<u128>> {
        Box::pin(async move {
            let params = json!([address::external_to_string(&addr), "latest", address::external_to_string(&token)]);
            let b: String = self.call("eth_getTokenBalance", params).await?;
            parse_quantity(&b)
        })
    }

    fn get_transaction_count(&self, addr: ExternalAddress) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let n: String = self
                .call("eth_getTransactionCount", json!([address::external_to_string(&addr), "latest"]))
                .await?;
            parse_u64(&n)
        })
    }

    fn get_code(&self, addr: ExternalAddress) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            let code: String = self.call("eth_getCode", json!([address::external_to_string(&addr), "latest"])).await?;
            parse_bytes(&code)
        })
    }

    fn estimate_gas(&self, call: CallRequest) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let req = json!({
                "from": address::external_to_string(&call.from),
                "to": address::external_to_string(&call.to),
                "data": format!("0x{}", hex::encode(&call.data)),
                "value": quantity(call.value),
                "nonce": quantity(u128::from(call.nonce)),
                "tokenAddress": address::external_to_string(&call.token),
            });
            let gas: String = self.call("eth_estimateGas", json!([req])).await?;
            parse_u64(&gas)
        })
    }

    fn get_utxo_gas(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let gas: String = self.call("eth_getUTXOGas", json!([])).await?;
            parse_u64(&gas)
        })
    }

    fn send_raw_utxo_transaction(&self, raw: Vec<u8>) -> BoxFuture<'_, Result<Key>> {
        Box::pin(async move {
            let params = json!([format!("0x{}", hex::encode(&raw))]);
            let hash: String = self.call("eth_sendRawUTXOTransaction", params).await.map_err(|e| match e {
                WalletError::DaemonCodeErr { code, message } => WalletError::SubmitFail(format!("{code}: {message}")),
                other => other,
            })?;
            parse_key(&hash)
        })
    }

    fn chain_version(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { self.call("eth_getChainVersion", json!([])).await })
    }
}
