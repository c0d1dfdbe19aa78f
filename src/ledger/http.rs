//! HTTP client for the ledger gateway
//!
//! Reads offer state and submits cancellations through the gateway's REST
//! surface; event subscriptions go through the websocket endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    BlockNumber, EventFilter, EventKind, EventStream, LedgerClient, RawOffer, TxHash,
    WsEventSource,
};
use crate::error::{Result, SyncError};
use crate::offers::OfferId;
use crate::parser::{
    ActiveResponse, BlockResponse, CountResponse, IdResponse, OfferTuple, TxResponse,
};

/// Ledger client backed by the gateway's HTTP and websocket endpoints
#[derive(Clone)]
pub struct HttpLedgerClient {
    http: Client,
    rpc_endpoint: String,
    events: WsEventSource,
}

impl HttpLedgerClient {
    /// Create a new ledger client
    pub fn new(rpc_endpoint: &str, ws_endpoint: &str) -> Self {
        Self {
            http: Client::new(),
            rpc_endpoint: rpc_endpoint.trim_end_matches('/').to_string(),
            events: WsEventSource::new(ws_endpoint),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.rpc_endpoint, path);
        debug!(url = %url, "Ledger read");

        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::LedgerCallFailed(format!(
                "GET {} returned {}",
                path, status
            )));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn offer(&self, id: OfferId) -> Result<RawOffer> {
        let tuple: OfferTuple = self.get(&format!("/offers/{}", id), &[]).await?;
        Ok(tuple.into())
    }

    async fn best_offer(&self, sell_token: &str, buy_token: &str) -> Result<OfferId> {
        let response: IdResponse = self
            .get("/offers/best", &[("sell", sell_token), ("buy", buy_token)])
            .await?;
        Ok(response.id)
    }

    async fn worse_offer(&self, id: OfferId) -> Result<OfferId> {
        let response: IdResponse = self.get(&format!("/offers/{}/worse", id), &[]).await?;
        Ok(response.id)
    }

    async fn offer_count(&self, sell_token: &str, buy_token: &str) -> Result<u64> {
        let response: CountResponse = self
            .get("/offers/count", &[("sell", sell_token), ("buy", buy_token)])
            .await?;
        Ok(response.count)
    }

    async fn is_active(&self, id: OfferId) -> Result<bool> {
        let response: ActiveResponse = self.get(&format!("/offers/{}/active", id), &[]).await?;
        Ok(response.active)
    }

    async fn cancel(&self, id: OfferId, gas: u64) -> Result<TxHash> {
        let url = format!("{}/offers/{}/cancel", self.rpc_endpoint, id);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "gas": gas }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<TxResponse>().await?.tx_hash),
            // Declined by the signer or reverted on submission
            StatusCode::FORBIDDEN | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                let reason = response.text().await.unwrap_or_default();
                warn!(offer_id = id, reason = %reason, "Cancellation rejected");
                Err(SyncError::CancellationRejected {
                    offer_id: id,
                    reason,
                })
            }
            status => Err(SyncError::LedgerCallFailed(format!(
                "POST /offers/{}/cancel returned {}",
                id, status
            ))),
        }
    }

    async fn latest_block(&self) -> Result<BlockNumber> {
        let response: BlockResponse = self.get("/blocks/latest", &[]).await?;
        Ok(response.number)
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        filter: EventFilter,
    ) -> Result<EventStream> {
        self.events.open(kind, from_block, &filter).await
    }
}
