//! Optional indexer client (§6 "Optional SQL projection"): a convenience
//! cache the core may consult to resolve an order's destination-side terms
//! when they weren't carried by the discovery event. The chain remains
//! authoritative: a mismatch between what the indexer reports and what gets
//! validated on-chain is never silently trusted (§9 "chain wins").
//!
//! Grounded on `catalogfi-garden-1-inch`'s `oneinch::orders::OrdersClient`:
//! a thin `reqwest::Client` wrapper, one method per REST endpoint, errors
//! surfaced through `anyhow`.

use anyhow::{anyhow, Result};
use ethers::types::{Address, U256};
use reqwest::Client;
use serde::Deserialize;

use crate::types::OrderParams;

pub struct IndexerClient {
    client: Client,
    base_url: String,
}

impl IndexerClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Look up the destination-side terms for an order by hash. Returns
    /// `Ok(None)` on a 404 (order simply not indexed yet); any other
    /// non-success status or transport failure is an error so the caller
    /// can distinguish "not known" from "indexer unreachable".
    pub async fn get_order_params(&self, order_hash: ethers::types::H256) -> Result<Option<OrderParams>> {
        let url = format!("{}/orders/v1.0/order/status/{:?}", self.base_url, order_hash);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!("indexer returned {}", response.status()));
        }
        let dto: OrderStatusDto = response.json().await?;
        dto.try_into().map(Some)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderStatusDto {
    src_chain_id: u64,
    dst_chain_id: u64,
    maker_asset: String,
    taker_asset: String,
    making_amount: String,
    taking_amount: String,
    safety_deposit: String,
    is_eth_deposit: bool,
}

impl TryFrom<OrderStatusDto> for OrderParams {
    type Error = anyhow::Error;

    fn try_from(d: OrderStatusDto) -> Result<Self> {
        Ok(OrderParams {
            src_chain_id: d.src_chain_id,
            dst_chain_id: d.dst_chain_id,
            src_token: d.maker_asset.parse::<Address>()?,
            dst_token: d.taker_asset.parse::<Address>()?,
            src_amount: U256::from_dec_str(&d.making_amount)?,
            dst_amount: U256::from_dec_str(&d.taking_amount)?,
            safety_deposit: U256::from_dec_str(&d.safety_deposit)?,
            is_eth_deposit: d.is_eth_deposit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_order_returns_none() {
        let mut server = mockito::Server::new_async().await;
        let hash = ethers::types::H256::repeat_byte(1);
        let _m = server
            .mock("GET", format!("/orders/v1.0/order/status/{hash:?}").as_str())
            .with_status(404)
            .create_async()
            .await;
        let client = IndexerClient::new(server.url());
        let result = client.get_order_params(hash).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn parses_a_successful_response() {
        let mut server = mockito::Server::new_async().await;
        let hash = ethers::types::H256::repeat_byte(2);
        let body = serde_json::json!({
            "srcChainId": 1,
            "dstChainId": 2,
            "makerAsset": format!("{:?}", Address::repeat_byte(5)),
            "takerAsset": format!("{:?}", Address::repeat_byte(6)),
            "makingAmount": "1000",
            "takingAmount": "990",
            "safetyDeposit": "1",
            "isEthDeposit": true,
        });
        let _m = server
            .mock("GET", format!("/orders/v1.0/order/status/{hash:?}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;
        let client = IndexerClient::new(server.url());
        let params = client.get_order_params(hash).await.unwrap().unwrap();
        assert_eq!(params.src_chain_id, 1);
        assert_eq!(params.dst_amount, U256::from(990u64));
    }
}
