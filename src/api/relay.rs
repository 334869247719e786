use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::http::{encoded_path, JsonTransport};
use super::NetworkClient;
use crate::models::{
    amount, Confirmation, OpenInstructionParams, OrderRef, TxRef, UnsubmittedTx,
};
use crate::Result;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Client for the transaction relay that assembles, signs and broadcasts
/// instructions for one wallet.
#[derive(Clone)]
pub struct RelayClient {
    transport: JsonTransport,
    wallet: String,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenRequest<'a> {
    wallet: &'a str,
    #[serde(flatten)]
    params: &'a OpenInstructionParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseRequest<'a> {
    wallet: &'a str,
    order_ref: &'a str,
    #[serde(with = "amount")]
    size: u128,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum StatusResponse {
    Pending,
    Confirmed {
        #[serde(default)]
        slot: Option<u64>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(with = "amount")]
    balance: u128,
}

impl RelayClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        wallet: &str,
        rate_limit_rpm: u32,
        confirm_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let transport =
            JsonTransport::new("relay", base_url, rate_limit_rpm)?.with_api_key(api_key);
        Ok(Self::with_transport(transport, wallet, confirm_timeout))
    }

    pub fn with_transport(transport: JsonTransport, wallet: &str, confirm_timeout: Duration) -> Self {
        Self {
            transport,
            wallet: wallet.to_string(),
            confirm_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl NetworkClient for RelayClient {
    async fn build_open_instruction(
        &self,
        params: &OpenInstructionParams,
    ) -> Result<UnsubmittedTx> {
        let request = OpenRequest {
            wallet: &self.wallet,
            params,
        };
        Ok(self.transport.post_json_once("/tx/open", &request).await?)
    }

    async fn build_close_instruction(
        &self,
        order_ref: &OrderRef,
        size: u128,
    ) -> Result<UnsubmittedTx> {
        let request = CloseRequest {
            wallet: &self.wallet,
            order_ref,
            size,
        };
        Ok(self.transport.post_json_once("/tx/close", &request).await?)
    }

    async fn submit(&self, tx: &UnsubmittedTx) -> Result<TxRef> {
        let response: SubmitResponse = self.transport.post_json_once("/tx/submit", tx).await?;
        tracing::debug!(signature = %response.signature, "Transaction submitted");
        Ok(response.signature)
    }

    async fn await_confirmation(&self, tx_ref: &TxRef) -> Result<Confirmation> {
        let deadline = Instant::now() + self.confirm_timeout;
        let path = encoded_path(&["tx", tx_ref.as_str(), "status"])?;

        loop {
            let status: StatusResponse = self.transport.get_json(&path).await?;

            match status {
                StatusResponse::Confirmed { slot } => {
                    return Ok(Confirmation::Confirmed { slot });
                }
                StatusResponse::Failed { error } => return Ok(Confirmation::Failed(error)),
                StatusResponse::Pending => {}
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(format!(
                    "confirmation of {} timed out after {}s",
                    tx_ref,
                    self.confirm_timeout.as_secs()
                )
                .into());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_execution_log(&self, tx_ref: &TxRef) -> Result<Vec<String>> {
        let response: LogsResponse = self
            .transport
            .get_json(&encoded_path(&["tx", tx_ref.as_str(), "logs"])?)
            .await?;
        Ok(response.logs)
    }

    async fn available_balance(&self) -> Result<u128> {
        let response: BalanceResponse = self
            .transport
            .get_json(&encoded_path(&["balance", self.wallet.as_str()])?)
            .await?;
        Ok(response.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use mockito::Matcher;

    fn client(url: &str, confirm_timeout: Duration) -> RelayClient {
        RelayClient::with_transport(
            JsonTransport::new("relay", url, 6_000)
                .unwrap()
                .with_retry_backoff(Duration::from_millis(1)),
            "wallet-1",
            confirm_timeout,
        )
        .with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_build_open_instruction_flattens_params() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tx/open")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "wallet": "wallet-1",
                "instrumentId": "pepe-mint",
                "side": "short",
                "stopPrice": "1148000",
                "prevAnchor": "prev"
            })))
            .with_status(200)
            .with_body(r#"{"orderRef": "order-9", "payload": "base64tx"}"#)
            .create_async()
            .await;

        let params = OpenInstructionParams {
            instrument_id: "pepe-mint".to_string(),
            side: Side::Short,
            size: 1_000,
            max_spend_cap: 2_000,
            margin: 5_000,
            stop_price: 1_148_000,
            prev_anchor: Some("prev".to_string()),
            next_anchor: None,
        };

        let tx = client(&server.url(), Duration::from_secs(1))
            .build_open_instruction(&params)
            .await
            .unwrap();

        assert_eq!(tx.order_ref, "order-9");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tx/submit")
            .with_status(503)
            .with_body("relay overloaded")
            .expect(1)
            .create_async()
            .await;

        let tx = UnsubmittedTx {
            order_ref: "order-9".to_string(),
            payload: "base64tx".to_string(),
        };
        let err = client(&server.url(), Duration::from_secs(1))
            .submit(&tx)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("relay overloaded"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_await_confirmation_polls_until_confirmed() {
        let mut server = mockito::Server::new_async().await;
        let pending = server
            .mock("GET", "/tx/sig-1/status")
            .with_status(200)
            .with_body(r#"{"status": "pending"}"#)
            .expect(1)
            .create_async()
            .await;
        let confirmed = server
            .mock("GET", "/tx/sig-1/status")
            .with_status(200)
            .with_body(r#"{"status": "confirmed", "slot": 311}"#)
            .create_async()
            .await;

        let confirmation = client(&server.url(), Duration::from_secs(5))
            .await_confirmation(&"sig-1".to_string())
            .await
            .unwrap();

        assert_eq!(confirmation, Confirmation::Confirmed { slot: Some(311) });
        pending.assert_async().await;
        confirmed.assert_async().await;
    }

    #[tokio::test]
    async fn test_await_confirmation_reports_program_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tx/sig-2/status")
            .with_status(200)
            .with_body(r#"{"status": "failed", "error": "custom program error: 0x1771"}"#)
            .create_async()
            .await;

        let confirmation = client(&server.url(), Duration::from_secs(5))
            .await_confirmation(&"sig-2".to_string())
            .await
            .unwrap();

        assert_eq!(
            confirmation,
            Confirmation::Failed("custom program error: 0x1771".to_string())
        );
    }

    #[tokio::test]
    async fn test_await_confirmation_times_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tx/sig-3/status")
            .with_status(200)
            .with_body(r#"{"status": "pending"}"#)
            .create_async()
            .await;

        let err = client(&server.url(), Duration::from_millis(20))
            .await_confirmation(&"sig-3".to_string())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_available_balance() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/balance/wallet-1")
            .with_status(200)
            .with_body(r#"{"balance": "7000000000"}"#)
            .create_async()
            .await;

        let balance = client(&server.url(), Duration::from_secs(1))
            .available_balance()
            .await
            .unwrap();

        assert_eq!(balance, 7_000_000_000);
    }
}
