//! Chain-log provider - raw JSON-RPC access to an EVM node (read-only)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::WatchError;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Raw log entry as returned by eth_getLogs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
}

/// Upstream seam for the chain node
#[async_trait]
pub trait ChainLogProvider: Send + Sync {
    /// Fetch logs for `contract` filtered by `topic0` over a block range
    async fn get_logs(
        &self,
        contract: &str,
        from_block: u64,
        to_block: u64,
        topic0: &str,
    ) -> Result<Vec<RawLog>>;

    /// Current chain head
    async fn get_block_number(&self) -> Result<u64>;

    /// Resolve the native value (in whole native units) carried by each
    /// transaction hash. Hashes the node cannot resolve are absent from the
    /// returned map.
    async fn batch_get_transactions(&self, hashes: &[String]) -> Result<HashMap<String, f64>>;
}

/// Parse a 0x-prefixed hex quantity into u64
pub fn parse_hex_u64(hex: &str) -> Result<u64> {
    let trimmed = hex.strip_prefix("0x").unwrap_or(hex);
    // Token IDs and quantities can exceed 64 bits; keep the low 64.
    let tail = if trimmed.len() > 16 {
        &trimmed[trimmed.len() - 16..]
    } else {
        trimmed
    };
    u64::from_str_radix(tail, 16)
        .map_err(|e| WatchError::Parse(format!("bad hex quantity {}: {}", hex, e)).into())
}

/// Convert a hex wei quantity into whole native units
pub fn wei_hex_to_native(hex: &str) -> Result<f64> {
    let trimmed = hex.strip_prefix("0x").unwrap_or(hex);
    let wei = u128::from_str_radix(trimmed, 16)
        .map_err(|e| WatchError::Parse(format!("bad wei value {}: {}", hex, e)))?;
    Ok(wei as f64 / 1e18)
}

/// Extract a 20-byte address from a 32-byte indexed topic
pub fn topic_to_address(topic: &str) -> Result<String> {
    let trimmed = topic.strip_prefix("0x").unwrap_or(topic);
    if trimmed.len() < 40 {
        return Err(WatchError::Parse(format!("topic too short for address: {}", topic)).into());
    }
    Ok(format!("0x{}", &trimmed[trimmed.len() - 40..].to_lowercase()))
}

/// Shorten an address for display
pub fn shorten_address(address: &str, chars: usize) -> String {
    if address.len() <= chars * 2 {
        return address.to_string();
    }
    format!(
        "{}...{}",
        &address[..chars],
        &address[address.len() - chars..]
    )
}

/// JSON-RPC implementation of [`ChainLogProvider`]
pub struct JsonRpcChainProvider {
    client: reqwest::Client,
    rpc_url: String,
}

impl JsonRpcChainProvider {
    pub fn new(rpc_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url,
        }
    }

    /// Low-level JSON-RPC call with retry on rate limiting
    async fn rpc_call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let mut attempts = 0;
        let max_attempts = 3;
        let mut delay_ms = 500;

        loop {
            let result = self
                .client
                .post(&self.rpc_url)
                .json(&body)
                .timeout(Duration::from_secs(30))
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().as_u16() == 429 && attempts < max_attempts => {
                    attempts += 1;
                    warn!(
                        target: "CHAIN",
                        "Rate limited, retrying in {}ms (attempt {}/{})",
                        delay_ms, attempts, max_attempts
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms *= 2;
                    continue;
                }
                Ok(resp) => {
                    let json: serde_json::Value = resp
                        .json()
                        .await
                        .map_err(|e| WatchError::Upstream(format!("{} decode: {}", method, e)))?;

                    if let Some(error) = json.get("error") {
                        return Err(
                            WatchError::Upstream(format!("{} error: {}", method, error)).into()
                        );
                    }

                    return json
                        .get("result")
                        .cloned()
                        .ok_or_else(|| {
                            WatchError::Upstream(format!("{} response missing result", method))
                                .into()
                        });
                }
                Err(e) => {
                    return Err(WatchError::Upstream(format!("{} failed: {}", method, e)).into())
                }
            }
        }
    }
}

#[async_trait]
impl ChainLogProvider for JsonRpcChainProvider {
    async fn get_logs(
        &self,
        contract: &str,
        from_block: u64,
        to_block: u64,
        topic0: &str,
    ) -> Result<Vec<RawLog>> {
        let filter = serde_json::json!({
            "address": contract,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "topics": [topic0],
        });

        let result = self.rpc_call("eth_getLogs", serde_json::json!([filter])).await?;
        let logs: Vec<RawLog> = serde_json::from_value(result)
            .map_err(|e| WatchError::Upstream(format!("eth_getLogs shape: {}", e)))?;

        debug!(
            target: "CHAIN",
            "Fetched {} logs for blocks {}..{}",
            logs.len(), from_block, to_block
        );
        Ok(logs)
    }

    async fn get_block_number(&self) -> Result<u64> {
        let result = self.rpc_call("eth_blockNumber", serde_json::json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| WatchError::Upstream("invalid block number result".to_string()))?;
        parse_hex_u64(hex)
    }

    async fn batch_get_transactions(&self, hashes: &[String]) -> Result<HashMap<String, f64>> {
        let batch: Vec<serde_json::Value> = hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| {
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "eth_getTransactionByHash",
                    "params": [hash],
                    "id": i,
                })
            })
            .collect();

        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&batch)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| WatchError::Upstream(format!("tx batch failed: {}", e)))?;

        let results: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| WatchError::Upstream(format!("tx batch decode: {}", e)))?;

        let mut values = HashMap::new();
        for entry in results {
            let Some(tx) = entry.get("result").filter(|r| !r.is_null()) else {
                continue;
            };
            let (Some(hash), Some(value_hex)) = (
                tx.get("hash").and_then(|h| h.as_str()),
                tx.get("value").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            match wei_hex_to_native(value_hex) {
                Ok(value) => {
                    values.insert(hash.to_lowercase(), value);
                }
                Err(e) => debug!(target: "CHAIN", "Skipping tx {}: {}", hash, e),
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        // Oversized quantities keep the low 64 bits rather than erroring
        assert!(parse_hex_u64("0xffffffffffffffffff").is_ok());
    }

    #[test]
    fn converts_wei_to_native() {
        let one_ether = wei_hex_to_native("0xde0b6b3a7640000").unwrap();
        assert!((one_ether - 1.0).abs() < 1e-9);
        assert_eq!(wei_hex_to_native("0x0").unwrap(), 0.0);
    }

    #[test]
    fn extracts_address_from_topic() {
        let topic = "0x000000000000000000000000a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2";
        assert_eq!(
            topic_to_address(topic).unwrap(),
            "0xa1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2"
        );
        assert!(topic_to_address("0x1234").is_err());
    }

    #[test]
    fn shortens_addresses_for_display() {
        assert_eq!(shorten_address("0xabcdef1234", 4), "0xab...1234");
        assert_eq!(shorten_address("0xab", 4), "0xab");
    }
}
