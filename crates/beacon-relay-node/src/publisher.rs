//! On-chain publisher: submits verified updates to the light-client contract.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use beacon_zk_verify::LightClientUpdate;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::contract::{decode_head_slot, encode_head_slot_call, encode_update, to_data, ContractError};

/// Outcome of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    Applied { tx_hash: String },
    /// The contract already holds this header or a later one
    AlreadyApplied,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Transient publish failure: {0}")]
    Transient(String),
    #[error("Update rejected on-chain: {0}")]
    Rejected(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, update: &LightClientUpdate) -> Result<Receipt, PublishError>;
}

/// Error types for Ethereum RPC calls
#[derive(Error, Debug)]
pub enum EthClientError {
    #[error("RPC client error: {0}")]
    RpcClient(#[from] jsonrpsee::core::client::Error),
    #[error("Invalid HTTP header value")]
    InvalidHeader,
    #[error("Contract encoding error: {0}")]
    Contract(#[from] ContractError),
}

/// Default HTTP request timeout
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts per RPC request before a transport failure is surfaced
pub const MAX_REQUEST_ATTEMPTS: usize = 5;

/// Upper bound on the time spent retrying a single RPC request
pub const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(60);

/// JSON-RPC error code geth and others use for an execution revert
const EXECUTION_REVERTED_CODE: i32 = 3;

#[derive(Debug, Clone)]
pub struct EthPublisherConfig {
    pub rpc_url: String,
    pub rpc_userpwd: Option<String>,
    /// Light-client contract address
    pub light_client: String,
    /// Node-managed account that signs the transactions
    pub from: String,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
}

/// Ethereum JSON-RPC publisher
pub struct EthPublisher {
    client: HttpClient,
    config: EthPublisherConfig,
    backoff: backoff::ExponentialBackoff,
}

impl EthPublisher {
    pub fn new(config: EthPublisherConfig) -> Result<Self, EthClientError> {
        let mut headers = HeaderMap::new();
        if let Some(userpwd) = &config.rpc_userpwd {
            let creds = general_purpose::STANDARD.encode(userpwd);
            headers.insert(
                "Authorization",
                HeaderValue::from_str(&format!("Basic {creds}"))
                    .map_err(|_| EthClientError::InvalidHeader)?,
            );
        }

        let client = HttpClient::builder()
            .set_headers(headers)
            .request_timeout(HTTP_REQUEST_TIMEOUT)
            .build(&config.rpc_url)?;

        Ok(Self {
            client,
            config,
            backoff: backoff::ExponentialBackoff {
                max_elapsed_time: Some(MAX_RETRY_ELAPSED),
                ..Default::default()
            },
        })
    }

    pub fn with_backoff(mut self, backoff: backoff::ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: ArrayParams,
    ) -> Result<T, EthClientError> {
        request_with_retry(self.backoff.clone(), || async {
            self.client
                .request(method, params.clone())
                .await
                .map_err(Into::into)
        })
        .await
    }

    fn transaction(&self, data: &[u8]) -> serde_json::Value {
        json!({
            "from": self.config.from,
            "to": self.config.light_client,
            "data": to_data(data),
        })
    }

    /// Slot of the header the contract currently holds
    pub async fn head_slot(&self) -> Result<u64, EthClientError> {
        let call = self.transaction(&encode_head_slot_call());
        let data: String = self.request("eth_call", rpc_params![call, "latest"]).await?;
        Ok(decode_head_slot(&data)?)
    }

    async fn wait_receipt(&self, tx_hash: &str) -> Result<TxReceipt, PublishError> {
        let deadline = Instant::now() + self.config.receipt_timeout;
        loop {
            let receipt: Option<TxReceipt> = self
                .request("eth_getTransactionReceipt", rpc_params![tx_hash])
                .await
                .map_err(classify)?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            if Instant::now() + self.config.receipt_poll_interval > deadline {
                return Err(PublishError::Transient(format!(
                    "no receipt for {tx_hash} after {:?}",
                    self.config.receipt_timeout
                )));
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }

    async fn already_applied(&self, update: &LightClientUpdate) -> Result<bool, PublishError> {
        let head = self.head_slot().await.map_err(classify)?;
        debug!("Contract head at slot {}", head);
        Ok(head >= update.finalized_slot)
    }
}

#[async_trait]
impl Publisher for EthPublisher {
    async fn publish(&self, update: &LightClientUpdate) -> Result<Receipt, PublishError> {
        if self.already_applied(update).await? {
            return Ok(Receipt::AlreadyApplied);
        }

        let calldata = encode_update(update).map_err(|err| PublishError::Rejected(err.to_string()))?;
        let transaction = self.transaction(&calldata);

        // Dry run: a revert here means the contract refuses the proof
        let _: String = self
            .request("eth_call", rpc_params![transaction.clone(), "latest"])
            .await
            .map_err(classify_dry_run)?;

        // Sent once; a lost send is retried by the caller after re-reading the head
        let tx_hash: String = self
            .client
            .request("eth_sendTransaction", rpc_params![transaction])
            .await
            .map_err(|err| classify(err.into()))?;
        info!("Submitted update {} in transaction {}", update.range, tx_hash);

        let receipt = self.wait_receipt(&tx_hash).await?;
        match receipt.status.as_deref() {
            Some("0x1") => Ok(Receipt::Applied {
                tx_hash: receipt.transaction_hash,
            }),
            _ => {
                if self.already_applied(update).await? {
                    warn!("Transaction {} reverted but the header landed already", tx_hash);
                    Ok(Receipt::AlreadyApplied)
                } else {
                    Err(PublishError::Rejected(format!("transaction {tx_hash} reverted")))
                }
            }
        }
    }
}

/// Node errors (nonce races, rate limits, missing state) are worth another try
fn classify(err: EthClientError) -> PublishError {
    PublishError::Transient(err.to_string())
}

/// Only an execution revert of the dry run is the contract refusing the update
fn classify_dry_run(err: EthClientError) -> PublishError {
    if is_execution_revert(&err) {
        PublishError::Rejected(err.to_string())
    } else {
        classify(err)
    }
}

fn is_execution_revert(err: &EthClientError) -> bool {
    use jsonrpsee::core::client::Error as RpcError;
    match err {
        EthClientError::RpcClient(RpcError::Call(call)) => {
            call.code() == EXECUTION_REVERTED_CODE || call.message().contains("execution reverted")
        }
        _ => false,
    }
}

/// Execute a request with retry logic using exponential backoff.
/// Only transport-level failures are retried, at most [`MAX_REQUEST_ATTEMPTS`] times.
async fn request_with_retry<F, Fut, T>(
    backoff: backoff::ExponentialBackoff,
    operation: F,
) -> Result<T, EthClientError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, EthClientError>>,
{
    use backoff::{future::retry_notify, Error};

    let attempts = AtomicUsize::new(0);
    retry_notify(
        backoff,
        || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match operation().await {
                Ok(result) => Ok(result),
                Err(err) if attempt < MAX_REQUEST_ATTEMPTS && is_retryable_error(&err) => {
                    Err(Error::transient(err))
                }
                Err(err) => Err(Error::permanent(err)),
            }
        },
        |err, duration| {
            info!("Request failed, retrying in {:?}: {}", duration, err);
        },
    )
    .await
}

fn is_retryable_error(err: &EthClientError) -> bool {
    match err {
        EthClientError::RpcClient(rpc_err) => {
            use jsonrpsee::core::client::Error as RpcError;
            matches!(
                rpc_err,
                RpcError::Transport(_)
                    | RpcError::RequestTimeout
                    | RpcError::RestartNeeded(_)
                    | RpcError::ServiceDisconnect
            )
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{selector, HEAD_SLOT_SIGNATURE};
    use beacon_zk_verify::testing::{transition, TestProver};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const LIGHT_CLIENT: &str = "0x00000000000000000000000000000000000000aa";
    const FROM: &str = "0x00000000000000000000000000000000000000bb";
    const TX_HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    /// Minimal node with a light-client contract holding a head slot
    #[derive(Clone)]
    struct FakeNode {
        head: Arc<Mutex<u64>>,
        revert_dry_run: bool,
        /// Error returned by `eth_sendTransaction` instead of a hash
        send_error: Option<Value>,
        /// Head the contract reaches once the transaction is mined
        head_after_send: Option<u64>,
        receipt_status: Option<&'static str>,
        sent: Arc<AtomicUsize>,
    }

    impl FakeNode {
        fn new(head: u64) -> Self {
            Self {
                head: Arc::new(Mutex::new(head)),
                revert_dry_run: false,
                send_error: None,
                head_after_send: None,
                receipt_status: Some("0x1"),
                sent: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn result(&self, method: &str, params: &Value) -> Result<Value, Value> {
            match method {
                "eth_call" => {
                    let data = params[0]["data"].as_str().unwrap_or_default();
                    if data == to_data(&selector(HEAD_SLOT_SIGNATURE)) {
                        let mut word = [0u8; 32];
                        word[24..].copy_from_slice(&self.head.lock().unwrap().to_be_bytes());
                        Ok(json!(to_data(&word)))
                    } else if self.revert_dry_run {
                        Err(json!({ "code": 3, "message": "execution reverted: invalid proof" }))
                    } else {
                        Ok(json!("0x"))
                    }
                }
                "eth_sendTransaction" => {
                    self.sent.fetch_add(1, Ordering::SeqCst);
                    if let Some(error) = &self.send_error {
                        return Err(error.clone());
                    }
                    if let Some(head) = self.head_after_send {
                        *self.head.lock().unwrap() = head;
                    }
                    Ok(json!(TX_HASH))
                }
                "eth_getTransactionReceipt" => match self.receipt_status {
                    Some(status) => Ok(json!({ "transactionHash": TX_HASH, "status": status })),
                    None => Ok(Value::Null),
                },
                _ => Err(json!({ "code": -32601, "message": "method not found" })),
            }
        }
    }

    impl Respond for FakeNode {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let id = body["id"].clone();
            let method = body["method"].as_str().unwrap_or_default();
            let response = match self.result(method, &body["params"]) {
                Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
            };
            ResponseTemplate::new(200).set_body_json(response)
        }
    }

    async fn publisher_for(node: FakeNode) -> (MockServer, EthPublisher) {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(node).mount(&server).await;
        let publisher = publisher(&server);
        (server, publisher)
    }

    fn publisher(server: &MockServer) -> EthPublisher {
        EthPublisher::new(EthPublisherConfig {
            rpc_url: server.uri(),
            rpc_userpwd: Some("user:pass".to_string()),
            light_client: LIGHT_CLIENT.to_string(),
            from: FROM.to_string(),
            receipt_timeout: Duration::from_millis(200),
            receipt_poll_interval: Duration::from_millis(20),
        })
        .unwrap()
        .with_backoff(backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(5),
            max_elapsed_time: Some(Duration::from_millis(200)),
            ..Default::default()
        })
    }

    fn update() -> LightClientUpdate {
        let mut prover = TestProver::new(17);
        prover.prove_transition(transition(5609044, 5609069, 400), [7u8; 32])
    }

    #[tokio::test]
    async fn test_publish_applied() {
        let mut node = FakeNode::new(5609044);
        node.head_after_send = Some(5609069);
        let sent = node.sent.clone();
        let (_server, publisher) = publisher_for(node).await;

        let receipt = publisher.publish(&update()).await.unwrap();
        assert_eq!(receipt, Receipt::Applied { tx_hash: TX_HASH.to_string() });
        assert_eq!(sent.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.head_slot().await.unwrap(), 5609069);
    }

    #[tokio::test]
    async fn test_publish_twice_is_idempotent() {
        let mut node = FakeNode::new(5609044);
        node.head_after_send = Some(5609069);
        let sent = node.sent.clone();
        let (_server, publisher) = publisher_for(node).await;

        let update = update();
        publisher.publish(&update).await.unwrap();
        assert_eq!(publisher.publish(&update).await.unwrap(), Receipt::AlreadyApplied);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dry_run_revert_is_rejection() {
        let mut node = FakeNode::new(5609044);
        node.revert_dry_run = true;
        let sent = node.sent.clone();
        let (_server, publisher) = publisher_for(node).await;

        let err = publisher.publish(&update()).await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected(reason) if reason.contains("invalid proof")));
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reverted_transaction_after_concurrent_landing() {
        let mut node = FakeNode::new(5609044);
        node.head_after_send = Some(5609100);
        node.receipt_status = Some("0x0");
        let (_server, publisher) = publisher_for(node).await;
        assert_eq!(publisher.publish(&update()).await.unwrap(), Receipt::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_rejection() {
        let mut node = FakeNode::new(5609044);
        node.receipt_status = Some("0x0");
        let (_server, publisher) = publisher_for(node).await;
        assert!(matches!(
            publisher.publish(&update()).await,
            Err(PublishError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_receipt_is_transient() {
        let mut node = FakeNode::new(5609044);
        node.receipt_status = None;
        let (_server, publisher) = publisher_for(node).await;
        assert!(matches!(
            publisher.publish(&update()).await,
            Err(PublishError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_node_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let publisher = publisher(&server);
        assert!(matches!(
            publisher.publish(&update()).await,
            Err(PublishError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_nonce_race_is_transient() {
        for error in [
            json!({ "code": -32000, "message": "nonce too low" }),
            json!({ "code": -32000, "message": "replacement transaction underpriced" }),
            json!({ "code": -32005, "message": "rate limit exceeded" }),
        ] {
            let mut node = FakeNode::new(5609044);
            node.send_error = Some(error);
            let (_server, publisher) = publisher_for(node).await;
            assert!(matches!(
                publisher.publish(&update()).await,
                Err(PublishError::Transient(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_transport_retries_are_capped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let publisher = publisher(&server).with_backoff(backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        });

        assert!(publisher.head_slot().await.is_err());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), MAX_REQUEST_ATTEMPTS);
    }
}
