//! Update source: finalized header transitions observed on the beacon chain.

use std::collections::HashMap;

use async_trait::async_trait;
use beacon_api_client::{BeaconClient, BeaconClientError};
use beacon_ssz::{Root, SLOTS_PER_EPOCH};
use beacon_zk_verify::{HeaderTransition, SlotRange};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::network::NetworkConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Network or node failure, worth retrying
    #[error("Transient source failure: {0}")]
    Transient(String),
    /// The node answered with data that does not hold together
    #[error("Malformed source data: {0}")]
    Malformed(String),
}

impl From<BeaconClientError> for SourceError {
    fn from(err: BeaconClientError) -> Self {
        if err.is_transient() {
            SourceError::Transient(err.to_string())
        } else {
            SourceError::Malformed(err.to_string())
        }
    }
}

/// Sync committee of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitteeInfo {
    pub root: Root,
    pub size: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Slot of the latest finalized header
    async fn finalized_head(&self) -> Result<u64, SourceError>;

    /// Root of the header at `slot`, `None` for an empty slot
    async fn header_root(&self, slot: u64) -> Result<Option<Root>, SourceError>;

    /// Transition from the header at `range.from` to the header at `range.to`
    async fn finalized_update(&self, range: SlotRange) -> Result<Option<HeaderTransition>, SourceError>;

    async fn committee(&self, period: u64) -> Result<Option<CommitteeInfo>, SourceError>;
}

/// Slots scanned past a finalized header for the block that attests to it
const ATTESTATION_SEARCH_SLOTS: u64 = 2 * SLOTS_PER_EPOCH;

/// Update source backed by a beacon node REST API
pub struct BeaconUpdateSource {
    client: BeaconClient,
    network: NetworkConfig,
    committees: Mutex<HashMap<u64, CommitteeInfo>>,
}

impl BeaconUpdateSource {
    pub fn new(client: BeaconClient, network: NetworkConfig) -> Self {
        Self {
            client,
            network,
            committees: Mutex::new(HashMap::new()),
        }
    }

    /// First block after `slot` carrying a sync aggregate
    async fn attestation_after(&self, slot: u64) -> Result<Option<(u64, Vec<bool>)>, SourceError> {
        for attested_slot in slot + 1..=slot + ATTESTATION_SEARCH_SLOTS {
            if let Some(bits) = self.client.sync_aggregate_bits(attested_slot).await? {
                return Ok(Some((attested_slot, bits)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl UpdateSource for BeaconUpdateSource {
    async fn finalized_head(&self) -> Result<u64, SourceError> {
        Ok(self.client.finalized_header().await?.header.slot)
    }

    async fn header_root(&self, slot: u64) -> Result<Option<Root>, SourceError> {
        Ok(self.client.header_at_slot(slot).await?.map(|info| info.root))
    }

    async fn finalized_update(&self, range: SlotRange) -> Result<Option<HeaderTransition>, SourceError> {
        let Some(prev_header_root) = self.header_root(range.from).await? else {
            return Ok(None);
        };
        let Some(next_header_root) = self.header_root(range.to).await? else {
            return Ok(None);
        };
        let Some((attested_slot, participation)) = self.attestation_after(range.to).await? else {
            debug!("No attestation yet for slot {}", range.to);
            return Ok(None);
        };
        let period = self.network.period_of(attested_slot);
        let Some(committee) = self.committee(period).await? else {
            return Ok(None);
        };
        if participation.len() != committee.size {
            return Err(SourceError::Malformed(format!(
                "participation covers {} members, committee of period {} has {}",
                participation.len(),
                period,
                committee.size
            )));
        }
        Ok(Some(HeaderTransition {
            range,
            attested_slot,
            finalized_slot: range.to,
            prev_header_root,
            next_header_root,
            sync_committee_root: committee.root,
            participation,
        }))
    }

    async fn committee(&self, period: u64) -> Result<Option<CommitteeInfo>, SourceError> {
        if let Some(info) = self.committees.lock().await.get(&period) {
            return Ok(Some(*info));
        }
        let Some(committee) = self.client.sync_committee(period).await? else {
            return Ok(None);
        };
        let root = committee
            .hash_tree_root()
            .map_err(|err| SourceError::Malformed(err.to_string()))?;
        let info = CommitteeInfo {
            root,
            size: committee.len(),
        };
        self.committees.lock().await.insert(period, info);
        Ok(Some(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use beacon_ssz::{to_hex, BeaconBlockHeader, BlsPubkey, SyncCommittee};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn header(slot: u64) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot,
            proposer_index: slot % 1000,
            parent_root: [1u8; 32],
            state_root: [2u8; 32],
            body_root: [3u8; 32],
        }
    }

    async fn mount_header(server: &MockServer, slot: u64) {
        let header = header(slot);
        Mock::given(method("GET"))
            .and(path(format!("/eth/v1/beacon/headers/{slot}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "root": to_hex(&header.hash_tree_root()),
                    "canonical": true,
                    "header": { "message": header, "signature": "0x00" }
                }
            })))
            .mount(server)
            .await;
    }

    fn committee() -> SyncCommittee {
        SyncCommittee {
            pubkeys: (0..512u32).map(|i| BlsPubkey([(i % 200) as u8; 48])).collect(),
            aggregate_pubkey: BlsPubkey([0xaa; 48]),
        }
    }

    fn source(server: &MockServer) -> BeaconUpdateSource {
        let client = BeaconClient::new(server.uri()).unwrap().with_backoff(backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(5),
            max_elapsed_time: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        BeaconUpdateSource::new(client, Network::Prater.config())
    }

    #[tokio::test]
    async fn test_finalized_update_assembles_transition() {
        let server = MockServer::start().await;
        mount_header(&server, 5609044).await;
        mount_header(&server, 5609069).await;

        // Slot 5609070 is empty, 5609071 attests
        Mock::given(method("GET"))
            .and(path("/eth/v2/beacon/blocks/5609070"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let bits = vec![0xffu8; 64];
        Mock::given(method("GET"))
            .and(path("/eth/v2/beacon/blocks/5609071"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "message": { "slot": "5609071", "body": {
                    "sync_aggregate": { "sync_committee_bits": to_hex(&bits) }
                } } }
            })))
            .mount(&server)
            .await;
        let committee = committee();
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/light_client/updates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "data": { "next_sync_committee": committee } }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let source = source(&server);
        let range = SlotRange::new(5609044, 5609069).unwrap();
        let transition = source.finalized_update(range).await.unwrap().unwrap();
        assert_eq!(transition.attested_slot, 5609071);
        assert_eq!(transition.finalized_slot, 5609069);
        assert_eq!(transition.prev_header_root, header(5609044).hash_tree_root());
        assert_eq!(transition.next_header_root, header(5609069).hash_tree_root());
        assert_eq!(transition.sync_committee_root, committee.hash_tree_root().unwrap());
        assert_eq!(transition.participants(), 512);

        // The committee is cached per period
        source.finalized_update(range).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_header_is_absent() {
        let server = MockServer::start().await;
        mount_header(&server, 100).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/eth/v1/beacon/headers/\d+$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = source(&server);
        let range = SlotRange::new(100, 164).unwrap();
        assert_eq!(source.finalized_update(range).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/finalized"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/7"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let source = source(&server);
        assert!(matches!(source.finalized_head().await, Err(SourceError::Transient(_))));
        assert!(matches!(source.header_root(7).await, Err(SourceError::Malformed(_))));
    }
}
