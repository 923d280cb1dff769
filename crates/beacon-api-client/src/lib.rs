//! Beacon node REST client for finalized headers, sync aggregates and committees, with retry logic.

pub mod types;

use std::time::Duration;

use beacon_ssz::bits::bitvector_from_bytes;
use beacon_ssz::{to_hex, SyncCommittee, SYNC_COMMITTEE_SIZE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{BlockData, Envelope, HeaderData, LightClientUpdateItem};

pub use crate::types::HeaderInfo;

/// Error types for beacon API client operations
#[derive(Error, Debug)]
pub enum BeaconClientError {
    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success status other than 404
    #[error("Beacon node returned {status} for {url}")]
    Status { status: u16, url: String },
    /// Response could not be decoded or is inconsistent
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Header root claimed by the node differs from the locally computed one
    #[error("Header root mismatch at slot {slot}: node claims {claimed}, computed {computed}")]
    RootMismatch {
        slot: u64,
        claimed: String,
        computed: String,
    },
}

impl BeaconClientError {
    /// Network and server-side failures that may succeed on retry
    pub fn is_transient(&self) -> bool {
        match self {
            BeaconClientError::Http(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            BeaconClientError::Status { status, .. } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            _ => false,
        }
    }
}

/// Default HTTP request timeout
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Beacon node REST client
pub struct BeaconClient {
    client: reqwest::Client,
    base_url: String,
    backoff: backoff::ExponentialBackoff,
}

impl BeaconClient {
    /// Create a new client with default retry settings (exponential backoff)
    pub fn new(base_url: String) -> Result<Self, BeaconClientError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            backoff: backoff::ExponentialBackoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: backoff::ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// GET a JSON document, `None` on 404
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, BeaconClientError> {
        request_with_retry(self.backoff.clone(), || async {
            let url = format!("{}{}", self.base_url, path);
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(BeaconClientError::Status {
                    status: status.as_u16(),
                    url,
                });
            }
            let body = response.bytes().await?;
            serde_json::from_slice(&body)
                .map(Some)
                .map_err(|err| BeaconClientError::Malformed(format!("{path}: {err}")))
        })
        .await
    }

    async fn get_header(&self, block_id: &str) -> Result<Option<HeaderInfo>, BeaconClientError> {
        let Some(envelope) = self
            .get::<Envelope<HeaderData>>(&format!("/eth/v1/beacon/headers/{block_id}"))
            .await?
        else {
            return Ok(None);
        };
        let header = envelope.data.header.message;
        let computed = header.hash_tree_root();
        if computed != envelope.data.root {
            return Err(BeaconClientError::RootMismatch {
                slot: header.slot,
                claimed: to_hex(&envelope.data.root),
                computed: to_hex(&computed),
            });
        }
        Ok(Some(HeaderInfo {
            header,
            root: computed,
        }))
    }

    /// Latest finalized header
    pub async fn finalized_header(&self) -> Result<HeaderInfo, BeaconClientError> {
        let info = self.get_header("finalized").await?.ok_or_else(|| {
            BeaconClientError::Malformed("finalized header not available".to_string())
        })?;
        debug!("Finalized head at slot {}", info.header.slot);
        Ok(info)
    }

    /// Header of the block proposed at `slot`, `None` if the slot is empty
    pub async fn header_at_slot(&self, slot: u64) -> Result<Option<HeaderInfo>, BeaconClientError> {
        let info = self.get_header(&slot.to_string()).await?;
        match info {
            Some(info) if info.header.slot != slot => Err(BeaconClientError::Malformed(format!(
                "requested header at slot {slot}, got slot {}",
                info.header.slot
            ))),
            info => Ok(info),
        }
    }

    /// Sync committee participation bits carried by the block at `slot`
    pub async fn sync_aggregate_bits(&self, slot: u64) -> Result<Option<Vec<bool>>, BeaconClientError> {
        let Some(envelope) = self
            .get::<Envelope<BlockData>>(&format!("/eth/v2/beacon/blocks/{slot}"))
            .await?
        else {
            return Ok(None);
        };
        let message = envelope.data.message;
        if message.slot != slot {
            return Err(BeaconClientError::Malformed(format!(
                "requested block at slot {slot}, got slot {}",
                message.slot
            )));
        }
        let aggregate = message.body.sync_aggregate.ok_or_else(|| {
            BeaconClientError::Malformed(format!("block at slot {slot} has no sync aggregate"))
        })?;
        bitvector_from_bytes(&aggregate.sync_committee_bits, SYNC_COMMITTEE_SIZE)
            .map(Some)
            .map_err(|err| BeaconClientError::Malformed(format!("sync committee bits: {err}")))
    }

    /// Sync committee of `period`, taken from the light-client update of the previous period
    pub async fn sync_committee(&self, period: u64) -> Result<Option<SyncCommittee>, BeaconClientError> {
        let Some(start_period) = period.checked_sub(1) else {
            return Ok(None);
        };
        let Some(updates) = self
            .get::<Vec<LightClientUpdateItem>>(&format!(
                "/eth/v1/beacon/light_client/updates?start_period={start_period}&count=1"
            ))
            .await?
        else {
            return Ok(None);
        };
        let Some(update) = updates.into_iter().next() else {
            return Ok(None);
        };
        let committee = update.data.next_sync_committee;
        if committee.len() != SYNC_COMMITTEE_SIZE {
            return Err(BeaconClientError::Malformed(format!(
                "sync committee of period {period} has {} members",
                committee.len()
            )));
        }
        Ok(Some(committee))
    }
}

/// Execute a request with retry logic using exponential backoff.
/// Only transient failures are retried.
async fn request_with_retry<F, Fut, T>(
    backoff: backoff::ExponentialBackoff,
    operation: F,
) -> Result<T, BeaconClientError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, BeaconClientError>>,
{
    use backoff::{future::retry_notify, Error};

    retry_notify(
        backoff,
        || async {
            match operation().await {
                Ok(result) => Ok(result),
                Err(err) if err.is_transient() => Err(Error::transient(err)),
                Err(err) => Err(Error::permanent(err)),
            }
        },
        |err, duration| {
            info!("Beacon request failed, retrying in {:?}: {}", duration, err);
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_ssz::{BeaconBlockHeader, BlsPubkey, Root};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_backoff() -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            max_elapsed_time: Some(Duration::from_millis(500)),
            ..Default::default()
        }
    }

    async fn client(server: &MockServer) -> BeaconClient {
        BeaconClient::new(server.uri()).unwrap().with_backoff(fast_backoff())
    }

    fn header(slot: u64) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot,
            proposer_index: 7,
            parent_root: [1u8; 32],
            state_root: [2u8; 32],
            body_root: [3u8; 32],
        }
    }

    fn header_response(header: &BeaconBlockHeader, root: Root) -> serde_json::Value {
        json!({
            "data": {
                "root": to_hex(&root),
                "canonical": true,
                "header": { "message": header, "signature": "0x00" }
            }
        })
    }

    #[tokio::test]
    async fn test_finalized_header_root_is_checked() {
        let server = MockServer::start().await;
        let head = header(5609069);
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/finalized"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(header_response(&head, head.hash_tree_root())),
            )
            .mount(&server)
            .await;

        let info = client(&server).await.finalized_header().await.unwrap();
        assert_eq!(info.header, head);
        assert_eq!(info.root, head.hash_tree_root());
    }

    #[tokio::test]
    async fn test_header_root_mismatch_is_malformed() {
        let server = MockServer::start().await;
        let head = header(100);
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(header_response(&head, [9u8; 32])))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).await.header_at_slot(100).await.unwrap_err();
        assert!(matches!(err, BeaconClientError::RootMismatch { slot: 100, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_slot_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/101"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(client(&server).await.header_at_slot(101).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        let head = header(200);
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/200"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(header_response(&head, head.hash_tree_root())))
            .mount(&server)
            .await;

        let info = client(&server).await.header_at_slot(200).await.unwrap();
        assert_eq!(info.map(|info| info.header.slot), Some(200));
    }

    #[tokio::test]
    async fn test_persistent_server_error_surfaces_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/finalized"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).await.finalized_header().await.unwrap_err();
        assert!(matches!(err, BeaconClientError::Status { status: 500, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v2/beacon/blocks/300"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).await.sync_aggregate_bits(300).await.unwrap_err();
        assert!(matches!(err, BeaconClientError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_sync_aggregate_bits() {
        let server = MockServer::start().await;
        let mut bits = vec![0xffu8; 64];
        bits[0] = 0b0000_0001;
        Mock::given(method("GET"))
            .and(path("/eth/v2/beacon/blocks/5609070"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "version": "capella",
                "data": {
                    "message": {
                        "slot": "5609070",
                        "proposer_index": "1",
                        "body": {
                            "sync_aggregate": {
                                "sync_committee_bits": to_hex(&bits),
                                "sync_committee_signature": "0x00"
                            }
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let participation = client(&server)
            .await
            .sync_aggregate_bits(5609070)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(participation.len(), 512);
        assert!(participation[0]);
        assert!(!participation[1]);
        assert_eq!(beacon_ssz::popcount(&participation), 505);
    }

    #[tokio::test]
    async fn test_sync_committee_from_previous_period_update() {
        let server = MockServer::start().await;
        let pubkeys: Vec<BlsPubkey> = (0..512u32).map(|i| BlsPubkey([(i % 251) as u8; 48])).collect();
        let committee = SyncCommittee {
            pubkeys,
            aggregate_pubkey: BlsPubkey([0xaa; 48]),
        };
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/light_client/updates"))
            .and(query_param("start_period", "683"))
            .and(query_param("count", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "version": "capella", "data": { "next_sync_committee": committee } }
            ])))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let fetched = client.sync_committee(684).await.unwrap().unwrap();
        assert_eq!(fetched, committee);
        assert_eq!(client.sync_committee(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_undersized_committee_is_malformed() {
        let server = MockServer::start().await;
        let committee = SyncCommittee {
            pubkeys: vec![BlsPubkey([1; 48]); 4],
            aggregate_pubkey: BlsPubkey([2; 48]),
        };
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/light_client/updates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "data": { "next_sync_committee": committee } }
            ])))
            .mount(&server)
            .await;

        let err = client(&server).await.sync_committee(10).await.unwrap_err();
        assert!(matches!(err, BeaconClientError::Malformed(_)));
    }
}
