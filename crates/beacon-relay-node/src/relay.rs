//! Relay loop: advances the publish cursor one verified, published update at a time.
//!
//! The loop is an explicit transition function over [`RelayState`]:
//!
//! ```text
//! Idle -> FetchNext -> AwaitProof -> Verify -> Publish -> Advance -> Idle
//! ```
//!
//! Only `Advance` persists the cursor, and only after the contract confirmed the update
//! (or already held it). A range with no acceptable artifact blocks the relay: it keeps
//! polling with capped backoff and never skips ahead.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use beacon_zk_verify::{LightClientUpdate, ProofVerifier, PublishCursor, SlotRange, UpdateExpectations};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactError, ArtifactId, ArtifactStore};
use crate::network::NetworkConfig;
use crate::publisher::{PublishError, Publisher, Receipt};
use crate::source::{SourceError, UpdateSource};
use crate::store::{CursorStore, StoreError};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base wait between polls
    pub poll_interval: Duration,
    /// Backoff cap; reaching it recomputes the range from a fresh head
    pub max_poll_interval: Duration,
    /// Deadline for every backend call
    pub call_timeout: Duration,
    /// Warn when blocked this many slots behind the head
    pub stall_warn_slots: u64,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    /// `attempt` carries the backoff of a blocked range across head refreshes
    FetchNext { attempt: u32 },
    AwaitProof { range: SlotRange, attempt: u32 },
    Verify {
        range: SlotRange,
        update: Box<LightClientUpdate>,
        artifact: ArtifactId,
    },
    Publish {
        range: SlotRange,
        update: Box<LightClientUpdate>,
        artifact: ArtifactId,
        attempt: u32,
    },
    Advance { update: Box<LightClientUpdate> },
}

/// Next state and how long to wait before entering it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: RelayState,
    pub wait: Option<Duration>,
}

impl Transition {
    fn now(next: RelayState) -> Self {
        Self { next, wait: None }
    }

    fn after(next: RelayState, wait: Duration) -> Self {
        Self {
            next,
            wait: Some(wait),
        }
    }
}

/// Failure classes carried by the `failure` log field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Unavailable,
    Malformed,
    CryptoRejection,
    OnchainRejection,
    Duplicate,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureClass::Transient => "transient",
            FailureClass::Unavailable => "unavailable",
            FailureClass::Malformed => "malformed",
            FailureClass::CryptoRejection => "crypto_rejection",
            FailureClass::OnchainRejection => "onchain_rejection",
            FailureClass::Duplicate => "duplicate",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    class: FailureClass,
    reason: String,
}

impl Failure {
    fn transient(reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            reason: reason.into(),
        }
    }
}

impl From<SourceError> for Failure {
    fn from(err: SourceError) -> Self {
        let class = match err {
            SourceError::Transient(_) => FailureClass::Transient,
            SourceError::Malformed(_) => FailureClass::Malformed,
        };
        Self {
            class,
            reason: err.to_string(),
        }
    }
}

impl From<ArtifactError> for Failure {
    fn from(err: ArtifactError) -> Self {
        let class = match err {
            ArtifactError::Malformed { .. } => FailureClass::Malformed,
            ArtifactError::Io(_) | ArtifactError::Backend(_) => FailureClass::Transient,
        };
        Self {
            class,
            reason: err.to_string(),
        }
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        Self::transient(err.to_string())
    }
}

impl From<PublishError> for Failure {
    fn from(err: PublishError) -> Self {
        let class = match err {
            PublishError::Transient(_) => FailureClass::Transient,
            PublishError::Rejected(_) => FailureClass::OnchainRejection,
        };
        Self {
            class,
            reason: err.to_string(),
        }
    }
}

/// Read the persisted cursor, or start from the checkpoint header
pub async fn restore_cursor(
    store: &dyn CursorStore,
    source: &dyn UpdateSource,
    checkpoint_slot: u64,
) -> Result<PublishCursor, anyhow::Error> {
    if let Some(cursor) = store.load_cursor().await? {
        info!("Resuming from {}", cursor);
        return Ok(cursor);
    }
    let root = source
        .header_root(checkpoint_slot)
        .await?
        .ok_or_else(|| anyhow!("No header at checkpoint slot {}", checkpoint_slot))?;
    let cursor = PublishCursor::new(checkpoint_slot, root);
    info!("Starting from checkpoint {}", cursor);
    Ok(cursor)
}

pub struct Relay {
    config: RelayConfig,
    source: Arc<dyn UpdateSource>,
    artifacts: Arc<dyn ArtifactStore>,
    publisher: Arc<dyn Publisher>,
    cursor_store: Arc<dyn CursorStore>,
    verifier: ProofVerifier,
    /// Last published header, owned exclusively by the relay
    cursor: PublishCursor,
    /// Artifacts that failed verification or were refused on-chain
    rejected: HashSet<ArtifactId>,
    /// Latest finalized head seen
    head: u64,
    rx_shutdown: broadcast::Receiver<()>,
}

impl Relay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RelayConfig,
        source: Arc<dyn UpdateSource>,
        artifacts: Arc<dyn ArtifactStore>,
        publisher: Arc<dyn Publisher>,
        cursor_store: Arc<dyn CursorStore>,
        verifier: ProofVerifier,
        cursor: PublishCursor,
        rx_shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            source,
            artifacts,
            publisher,
            cursor_store,
            verifier,
            head: cursor.last_published_slot,
            cursor,
            rejected: HashSet::new(),
            rx_shutdown,
        }
    }

    pub fn cursor(&self) -> PublishCursor {
        self.cursor
    }

    async fn timed<T, E: Into<Failure>>(&self, call: impl Future<Output = Result<T, E>>) -> Result<T, Failure> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(Failure::transient(format!(
                "call timed out after {:?}",
                self.config.call_timeout
            ))),
        }
    }

    fn poll_wait(&self, attempt: u32) -> Duration {
        self.config
            .poll_interval
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.max_poll_interval)
    }

    /// Keep waiting for an artifact; at the backoff cap, refresh the head first
    fn back_off(&self, range: SlotRange, attempt: u32) -> Transition {
        let wait = self.poll_wait(attempt);
        if wait < self.config.max_poll_interval {
            return Transition::after(
                RelayState::AwaitProof {
                    range,
                    attempt: attempt + 1,
                },
                wait,
            );
        }
        let lag = self.head.saturating_sub(self.cursor.last_published_slot);
        if lag > self.config.stall_warn_slots {
            warn!(
                from = range.from,
                to = range.to,
                lag,
                "Relay blocked {} slots behind the finalized head",
                lag
            );
        }
        Transition::after(RelayState::FetchNext { attempt }, wait)
    }

    pub async fn step(&mut self, state: RelayState) -> Result<Transition, anyhow::Error> {
        let transition = match state {
            RelayState::Idle => Transition::now(RelayState::FetchNext { attempt: 0 }),
            RelayState::FetchNext { attempt } => self.fetch_next(attempt).await,
            RelayState::AwaitProof { range, attempt } => self.await_proof(range, attempt).await,
            RelayState::Verify {
                range,
                update,
                artifact,
            } => self.verify(range, update, artifact).await?,
            RelayState::Publish {
                range,
                update,
                artifact,
                attempt,
            } => self.publish(range, update, artifact, attempt).await,
            RelayState::Advance { update } => self.advance(update).await,
        };
        Ok(transition)
    }

    async fn fetch_next(&mut self, attempt: u32) -> Transition {
        match self.timed(self.source.finalized_head()).await {
            Ok(head) => self.head = self.head.max(head),
            Err(failure) => {
                warn!(failure = %failure.class, "Failed to read finalized head: {}", failure.reason);
                return Transition::after(RelayState::Idle, self.config.poll_interval);
            }
        }
        match self.cursor.next_range(self.head) {
            Some(range) => {
                debug!("Next range {}", range);
                Transition::now(RelayState::AwaitProof { range, attempt })
            }
            None => Transition::after(RelayState::Idle, self.config.poll_interval),
        }
    }

    async fn await_proof(&mut self, range: SlotRange, attempt: u32) -> Transition {
        let artifact = match self.timed(self.artifacts.candidates(range)).await {
            Ok(candidates) => {
                let total = candidates.len();
                let fresh = candidates
                    .into_iter()
                    .find(|artifact| !self.rejected.contains(&artifact.id()));
                if fresh.is_none() && total > 0 {
                    debug!("All {} artifacts for {} were rejected before", total, range);
                }
                fresh
            }
            Err(failure) => {
                warn!(
                    failure = %failure.class,
                    from = range.from,
                    to = range.to,
                    "Artifact lookup failed: {}",
                    failure.reason
                );
                None
            }
        };
        let Some(artifact) = artifact else {
            return self.back_off(range, attempt);
        };

        let transition = match self.timed(self.source.finalized_update(artifact.range)).await {
            Ok(Some(transition)) => transition,
            Ok(None) => {
                debug!(
                    failure = %FailureClass::Unavailable,
                    from = artifact.range.from,
                    to = artifact.range.to,
                    "Header transition not available yet"
                );
                return self.back_off(range, attempt);
            }
            Err(failure) => {
                warn!(
                    failure = %failure.class,
                    from = artifact.range.from,
                    to = artifact.range.to,
                    "Failed to fetch header transition: {}",
                    failure.reason
                );
                return self.back_off(range, attempt);
            }
        };

        let id = artifact.id();
        let update = transition.into_update(artifact.proof, artifact.public_signals, artifact.vk_id);
        Transition::now(RelayState::Verify {
            range,
            update: Box::new(update),
            artifact: id,
        })
    }

    async fn verify(
        &mut self,
        range: SlotRange,
        update: Box<LightClientUpdate>,
        artifact: ArtifactId,
    ) -> Result<Transition, anyhow::Error> {
        let expectations = UpdateExpectations {
            cursor: self.cursor,
            committee_size: self.config.network.committee_size,
            domain: self.config.network.domain_at(update.attested_slot),
        };
        let verifier = self.verifier.clone();
        let (update, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = verifier.verify_update(&update, &expectations);
            (update, outcome)
        })
        .await
        .map_err(|err| anyhow!("Verification task failed: {}", err))?;

        match outcome {
            Ok(()) => {
                info!("Update {} verified", update.range);
                Ok(Transition::now(RelayState::Publish {
                    range,
                    update,
                    artifact,
                    attempt: 0,
                }))
            }
            Err(rejection) => {
                error!(
                    failure = %FailureClass::CryptoRejection,
                    from = update.range.from,
                    to = update.range.to,
                    artifact = %artifact,
                    "Update rejected: {}",
                    rejection
                );
                self.rejected.insert(artifact);
                Ok(Transition::after(
                    RelayState::AwaitProof { range, attempt: 0 },
                    self.config.poll_interval,
                ))
            }
        }
    }

    async fn publish(
        &mut self,
        range: SlotRange,
        update: Box<LightClientUpdate>,
        artifact: ArtifactId,
        attempt: u32,
    ) -> Transition {
        match self.timed(self.publisher.publish(&update)).await {
            Ok(Receipt::Applied { tx_hash }) => {
                info!("Update {} applied in {}", update.range, tx_hash);
                Transition::now(RelayState::Advance { update })
            }
            Ok(Receipt::AlreadyApplied) => {
                info!(
                    failure = %FailureClass::Duplicate,
                    from = update.range.from,
                    to = update.range.to,
                    "Update already applied on-chain"
                );
                Transition::now(RelayState::Advance { update })
            }
            Err(failure) if failure.class == FailureClass::OnchainRejection => {
                error!(
                    failure = %failure.class,
                    from = update.range.from,
                    to = update.range.to,
                    artifact = %artifact,
                    "Contract refused update: {}",
                    failure.reason
                );
                self.rejected.insert(artifact);
                Transition::after(
                    RelayState::AwaitProof { range, attempt: 0 },
                    self.config.poll_interval,
                )
            }
            Err(failure) => {
                warn!(
                    failure = %failure.class,
                    from = update.range.from,
                    to = update.range.to,
                    attempt,
                    "Publish failed, retrying: {}",
                    failure.reason
                );
                let wait = self.poll_wait(attempt);
                Transition::after(
                    RelayState::Publish {
                        range,
                        update,
                        artifact,
                        attempt: attempt.saturating_add(1),
                    },
                    wait,
                )
            }
        }
    }

    async fn advance(&mut self, update: Box<LightClientUpdate>) -> Transition {
        let cursor = self.cursor.advanced_by(&update);
        match self.timed(self.cursor_store.save_cursor(&cursor)).await {
            Ok(()) => {
                self.cursor = cursor;
                info!("Published header at {}", cursor);
                Transition::now(RelayState::Idle)
            }
            Err(failure) => {
                warn!(
                    failure = %failure.class,
                    "Failed to persist cursor {}: {}",
                    cursor,
                    failure.reason
                );
                Transition::after(RelayState::Advance { update }, self.config.poll_interval)
            }
        }
    }

    /// True once shutdown was requested or the channel is gone
    fn shutdown_requested(&mut self) -> bool {
        !matches!(self.rx_shutdown.try_recv(), Err(TryRecvError::Empty))
    }

    async fn run_inner(&mut self) -> Result<(), anyhow::Error> {
        info!("Relay started at {}", self.cursor);
        let mut state = RelayState::Idle;
        loop {
            if self.shutdown_requested() {
                return Ok(());
            }
            let transition = self.step(state).await?;
            state = transition.next;
            if let Some(wait) = transition.wait {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {},
                    _ = self.rx_shutdown.recv() => return Ok(()),
                }
            }
        }
    }

    pub async fn run(&mut self) -> Result<(), ()> {
        match self.run_inner().await {
            Err(err) => {
                error!("Relay exited: {}", err);
                Err(())
            }
            Ok(()) => {
                info!("Relay terminated at {}", self.cursor());
                Ok(())
            }
        }
    }
}
