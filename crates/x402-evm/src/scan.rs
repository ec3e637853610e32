//! Fire-and-forget scan log sink.
//!
//! Successful sponsored settlements are reported to an external scan service.
//! The report is strictly observability: a bounded channel feeds a background
//! task that POSTs each record, so a stalled sink can never block or fail a
//! settlement. When the channel is full the record is dropped with a log
//! line.

use serde::Serialize;
use tokio::sync::mpsc;
use url::Url;

use x402_proto::ChainId;
use x402_proto::types::{
    EvmAddress, HexEncodedNonce, TokenAmount, TransactionHash,
};
use x402_proto::UnixTimestamp;

/// Default scan ingestion endpoint. Overridable via configuration.
pub const DEFAULT_SCAN_URL: &str =
    "https://x402-scan-api.aeon.xyz/api/scan/manager/createTransaction";

/// Channel capacity; a slow sink drops records rather than backing up
/// settlement.
const QUEUE_CAPACITY: usize = 256;

/// One settled-payment record as the scan service expects it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
    pub asset: EvmAddress,
    pub network: ChainId,
    pub pay_to: EvmAddress,
    pub amount: TokenAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub transaction: TransactionHash,
    /// RFC3339 settlement timestamp.
    pub timestamp: String,
}

impl ScanRecord {
    /// Stamps the record with the current time.
    pub fn stamped_now(mut self) -> Self {
        self.timestamp = chrono::Utc::now().to_rfc3339();
        self
    }
}

/// Handle to the background scan forwarder.
#[derive(Clone, Debug)]
pub struct ScanSink {
    tx: mpsc::Sender<ScanRecord>,
}

impl ScanSink {
    /// Spawns the background forwarder task and returns the sending handle.
    pub fn spawn(url: Url) -> Self {
        let (tx, mut rx) = mpsc::channel::<ScanRecord>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            while let Some(record) = rx.recv().await {
                let result = client.post(url.clone()).json(&record).send().await;
                match result {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!(tx = %record.transaction, "scan record delivered");
                    }
                    Ok(response) => {
                        tracing::warn!(
                            tx = %record.transaction,
                            status = %response.status(),
                            "scan sink rejected record"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(tx = %record.transaction, error = %e, "scan sink unreachable");
                    }
                }
            }
        });
        Self { tx }
    }

    /// Enqueues a record without waiting. Failures are logged and swallowed.
    pub fn record(&self, record: ScanRecord) {
        let record = record.stamped_now();
        if let Err(e) = self.tx.try_send(record) {
            tracing::warn!(error = %e, "scan queue full, dropping record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record() -> ScanRecord {
        ScanRecord {
            from: "0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510".parse().unwrap(),
            to: "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628".parse().unwrap(),
            value: TokenAmount::from(1000u64),
            valid_after: UnixTimestamp::from_secs(1700000000),
            valid_before: UnixTimestamp::from_secs(1700000600),
            nonce: HexEncodedNonce([1u8; 32]),
            asset: "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d".parse().unwrap(),
            network: ChainId::eip155(56),
            pay_to: "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628".parse().unwrap(),
            amount: TokenAmount::from(1000u64),
            resource: Some("https://api.example/premium".into()),
            transaction: TransactionHash([9u8; 32]),
            timestamp: String::new(),
        }
    }

    #[test]
    fn record_serializes_with_camel_case_and_rfc3339() {
        let record = record().stamped_now();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("validAfter").is_some());
        assert!(json.get("payTo").is_some());
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn sink_delivers_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createTransaction"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url: Url = format!("{}/createTransaction", server.uri()).parse().unwrap();
        let sink = ScanSink::spawn(url);
        sink.record(record());

        // Give the background task a moment to drain the queue.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn sink_swallows_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url: Url = format!("{}/createTransaction", server.uri()).parse().unwrap();
        let sink = ScanSink::spawn(url);
        // Does not panic or error; the failure is logged.
        sink.record(record());
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
