//! Vault authority client.
//!
//! The vault holds the authoritative round state and the prize balance;
//! every operation returns the new state directly so no caller has to
//! cache a stale snapshot across an asynchronous boundary. Transient
//! failures (a stale-blockhash-style expiry, a gateway hiccup) get a small
//! bounded retry; everything else propagates immediately and leaves local
//! state unchanged.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use common::{Config, RoundPhase};

/// Extra attempts granted to transient failures, beyond the first call.
const RETRY_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum VaultError {
    /// Infrastructure hiccup; safe to retry.
    #[error("transient vault error: {0}")]
    Transient(String),

    /// The ledger rejected the operation; never retried, surfaced for the
    /// next cycle or manual intervention.
    #[error("vault rejected operation: {0}")]
    Permanent(String),
}

impl VaultError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::Transient(_))
    }
}

/// Operations against the external round-state and prize vault. Each call
/// is idempotent when the target state already holds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VaultAuthority: Send + Sync {
    async fn fetch_state(&self) -> Result<RoundPhase, VaultError>;
    async fn activate_round(&self) -> Result<RoundPhase, VaultError>;
    async fn pause_round(&self) -> Result<RoundPhase, VaultError>;
    async fn resume_deposits(&self) -> Result<RoundPhase, VaultError>;
    async fn pause_deposits(&self) -> Result<RoundPhase, VaultError>;
    async fn payout_winner(&self, player_id: &str) -> Result<RoundPhase, VaultError>;
}

/// Bounded retry combinator for vault calls.
///
/// Retries `op` up to [`RETRY_ATTEMPTS`] extra times, but only while
/// `is_retryable` holds for the error. Non-retryable errors propagate
/// immediately.
pub async fn with_retry<T, F, Fut, P>(
    label: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, VaultError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, VaultError>>,
    P: Fn(&VaultError) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < RETRY_ATTEMPTS => {
                attempt += 1;
                warn!(
                    "{} failed (attempt {}/{}), retrying: {}",
                    label,
                    attempt,
                    RETRY_ATTEMPTS + 1,
                    e
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    state: RoundPhase,
}

/// HTTP client for the vault RPC bridge.
pub struct VaultRpcClient {
    http: Client,
    base_url: String,
}

impl VaultRpcClient {
    pub fn new(config: &Config) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: config.vault_rpc_url.clone(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<RoundPhase, VaultError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        Self::parse_state(response).await
    }

    async fn parse_state(response: reqwest::Response) -> Result<RoundPhase, VaultError> {
        let status = response.status();
        // 409 with a state body means the round is already in the target
        // phase; the vault treats that as success and so do we
        if status.is_success() || status == StatusCode::CONFLICT {
            let body: StateResponse = response
                .json()
                .await
                .map_err(|e| VaultError::Permanent(format!("malformed state response: {e}")))?;
            return Ok(body.state);
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(VaultError::Transient(format!("{status}: {message}")))
        } else {
            Err(VaultError::Permanent(format!("{status}: {message}")))
        }
    }
}

fn request_error(e: reqwest::Error) -> VaultError {
    if e.is_timeout() || e.is_connect() {
        VaultError::Transient(e.to_string())
    } else {
        VaultError::Permanent(e.to_string())
    }
}

#[async_trait]
impl VaultAuthority for VaultRpcClient {
    async fn fetch_state(&self) -> Result<RoundPhase, VaultError> {
        let url = format!("{}/round/state", self.base_url);
        let response = self.http.get(&url).send().await.map_err(request_error)?;
        Self::parse_state(response).await
    }

    async fn activate_round(&self) -> Result<RoundPhase, VaultError> {
        self.post("/round/activate", json!({})).await
    }

    async fn pause_round(&self) -> Result<RoundPhase, VaultError> {
        self.post("/round/pause", json!({})).await
    }

    async fn resume_deposits(&self) -> Result<RoundPhase, VaultError> {
        self.post("/deposits/resume", json!({})).await
    }

    async fn pause_deposits(&self) -> Result<RoundPhase, VaultError> {
        self.post("/deposits/pause", json!({})).await
    }

    async fn payout_winner(&self, player_id: &str) -> Result<RoundPhase, VaultError> {
        self.post("/round/payout", json!({ "winner": player_id }))
            .await
    }
}
