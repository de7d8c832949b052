//! JSON-RPC client for forking from a live node.

use std::{
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tevm_common::{
    Address, H256, U256,
    utils::{decode_hex, u256_to_h256},
};
use tracing::{debug, trace, warn};

use crate::{
    error::ForkError,
    fork::{AccountProof, BlockTag, ForkTransport},
};

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Serialize, Debug)]
struct RpcRequest<'a> {
    id: u64,
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct RpcErrorMetadata {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RpcResponse {
    Success { result: Value },
    Error { error: RpcErrorMetadata },
}

/// [`ForkTransport`] over HTTP JSON-RPC.
#[derive(Debug, Clone)]
pub struct HttpForkTransport {
    client: Client,
    url: Url,
}

impl HttpForkTransport {
    pub fn new(url: &str) -> Result<Self, ForkError> {
        let url = Url::parse(url)
            .map_err(|err| ForkError::Transport(format!("Invalid fork url {url}: {err}")))?;
        Ok(Self {
            client: Client::new(),
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send_request(&self, method: &str, params: Vec<Value>) -> Result<Value, ForkError> {
        let request = RpcRequest {
            id: REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            jsonrpc: "2.0",
            method,
            params,
        };
        trace!(endpoint = %self.url, ?request, "Sending RPC request");

        let response = self
            .client
            .post(self.url.as_str())
            .json(&request)
            .send()
            .await
            .inspect_err(|error| warn!(endpoint = %self.url, %error, "Could not reach fork RPC"))
            .map_err(|error| ForkError::Transport(error.to_string()))?
            .json::<RpcResponse>()
            .await
            .map_err(|error| ForkError::Decode(error.to_string()))?;

        match response {
            RpcResponse::Success { result } => Ok(result),
            RpcResponse::Error { error } => {
                debug!(
                    endpoint = %self.url,
                    method,
                    code = error.code,
                    message = %error.message,
                    "Fork RPC returned an error"
                );
                Err(ForkError::Rpc {
                    code: error.code,
                    message: error.message,
                })
            }
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ForkError> {
        let result = self.send_request(method, params).await?;
        serde_json::from_value(result)
            .map_err(|error| ForkError::Decode(format!("{method}: {error}")))
    }

    /// Pins `latest` to the current head so every later read sees the same state.
    pub async fn resolve_block_tag(&self, block: BlockTag) -> Result<BlockTag, ForkError> {
        if block != BlockTag::Latest {
            return Ok(block);
        }
        let number: String = self.request("eth_blockNumber", vec![]).await?;
        let number = parse_hex_u64(&number)?;
        debug!(endpoint = %self.url, number, "Pinned fork to block");
        Ok(BlockTag::Number(number))
    }
}

fn parse_hex_u64(value: &str) -> Result<u64, ForkError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|error| ForkError::Decode(format!("Invalid quantity {value}: {error}")))
}

fn parse_hex_u256(value: &str) -> Result<U256, ForkError> {
    U256::from_str(value.trim_start_matches("0x"))
        .map_err(|error| ForkError::Decode(format!("Invalid quantity {value}: {error}")))
}

#[async_trait]
impl ForkTransport for HttpForkTransport {
    async fn get_balance(&self, address: Address, block: BlockTag) -> Result<U256, ForkError> {
        let balance: String = self
            .request(
                "eth_getBalance",
                vec![json!(format!("{address:#x}")), json!(block.to_string())],
            )
            .await?;
        parse_hex_u256(&balance)
    }

    async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockTag,
    ) -> Result<u64, ForkError> {
        let nonce: String = self
            .request(
                "eth_getTransactionCount",
                vec![json!(format!("{address:#x}")), json!(block.to_string())],
            )
            .await?;
        parse_hex_u64(&nonce)
    }

    async fn get_code(&self, address: Address, block: BlockTag) -> Result<Bytes, ForkError> {
        let code: String = self
            .request(
                "eth_getCode",
                vec![json!(format!("{address:#x}")), json!(block.to_string())],
            )
            .await?;
        decode_hex(&code)
            .map(Bytes::from)
            .map_err(|error| ForkError::Decode(format!("Invalid code: {error}")))
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: H256,
        block: BlockTag,
    ) -> Result<H256, ForkError> {
        let value: String = self
            .request(
                "eth_getStorageAt",
                vec![
                    json!(format!("{address:#x}")),
                    json!(format!("{slot:#x}")),
                    json!(block.to_string()),
                ],
            )
            .await?;
        // Some nodes strip leading zeros.
        let value = parse_hex_u256(&value)?;
        Ok(u256_to_h256(value))
    }

    async fn get_proof(
        &self,
        address: Address,
        slots: &[H256],
        block: BlockTag,
    ) -> Result<AccountProof, ForkError> {
        let slots: Vec<String> = slots.iter().map(|slot| format!("{slot:#x}")).collect();
        self.request(
            "eth_getProof",
            vec![
                json!(format!("{address:#x}")),
                json!(slots),
                json!(block.to_string()),
            ],
        )
        .await
    }
}
