//!
//! HTTP client for the wallet API.
//!
//! All wallet-mutating state observed by the sync engine comes through this
//! client: chain tip check-ins, per-address transaction summaries, full
//! transaction detail, invitation (address request) CRUD and user
//! verification state. Calls are async and designed for use with Tokio.
//! Transient failures (timeouts, 5xx, rate limiting) are retried briefly
//! with exponential backoff inside a single call; anything that survives
//! the backoff window propagates so the coordinator can decide whether the
//! pass is re-run on a later trigger.

use super::types::*;
use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Contract consumed by the sync pipeline. Implemented by [`CoinApiClient`]
/// in production and by scripted mocks in tests.
#[async_trait]
pub trait WalletApi: Send + Sync {
    /// Fetch chain tip, fee estimates and pricing.
    async fn check_in(&self) -> Result<CheckInResponse, ApiError>;

    /// Query which transactions touch the given addresses.
    async fn address_transaction_summaries(
        &self,
        addresses: &[String],
    ) -> Result<Vec<AddressTransactionSummary>, ApiError>;

    /// Fetch full detail for one transaction.
    async fn transaction(&self, txid: &str) -> Result<TransactionResponse, ApiError>;

    /// Fetch all invitations involving this wallet.
    async fn invitations(&self) -> Result<Vec<InvitationResponse>, ApiError>;

    /// Push a status/address/txid update for one invitation.
    async fn update_invitation(
        &self,
        update: &InvitationUpdateRequest,
    ) -> Result<InvitationResponse, ApiError>;

    /// Fetch the server-side verification state for this user/device.
    async fn user_verification(&self) -> Result<UserVerificationResponse, ApiError>;
}

/// Production wallet API client.
#[derive(Clone)]
pub struct CoinApiClient {
    http_client: Client,
    base_url: String,
}

impl CoinApiClient {
    pub fn new(base_url: String) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Short backoff window: smooths over blips without turning one call
    /// into a retry loop the coordinator cannot see.
    fn retry_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..ExponentialBackoff::default()
        }
    }

    fn classify_transport(e: reqwest::Error) -> backoff::Error<ApiError> {
        if e.is_timeout() || e.is_connect() {
            warn!("Transient transport failure: {}", e);
            backoff::Error::transient(ApiError::Transport(e))
        } else {
            backoff::Error::permanent(ApiError::Transport(e))
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, backoff::Error<ApiError>> {
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = ApiError::from_status(status, &body);
            return Err(if err.is_retryable() {
                warn!("Retryable API failure (status {}): {}", status, err);
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| backoff::Error::permanent(ApiError::Transport(e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!("GET {}", url);

        retry(Self::retry_policy(), || async {
            let response = self
                .http_client
                .get(&url)
                .send()
                .await
                .map_err(Self::classify_transport)?;
            Self::decode(response).await
        })
        .await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!("POST {}", url);

        retry(Self::retry_policy(), || async {
            let response = self
                .http_client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(Self::classify_transport)?;
            Self::decode(response).await
        })
        .await
    }
}

#[async_trait]
impl WalletApi for CoinApiClient {
    async fn check_in(&self) -> Result<CheckInResponse, ApiError> {
        self.get_json("wallet/check-in").await
    }

    async fn address_transaction_summaries(
        &self,
        addresses: &[String],
    ) -> Result<Vec<AddressTransactionSummary>, ApiError> {
        let body = serde_json::json!({ "addresses": addresses });
        self.post_json("addresses/query", &body).await
    }

    async fn transaction(&self, txid: &str) -> Result<TransactionResponse, ApiError> {
        self.get_json(&format!("transactions/{}", txid)).await
    }

    async fn invitations(&self) -> Result<Vec<InvitationResponse>, ApiError> {
        self.get_json("wallet/address_requests").await
    }

    async fn update_invitation(
        &self,
        update: &InvitationUpdateRequest,
    ) -> Result<InvitationResponse, ApiError> {
        self.post_json(&format!("wallet/address_requests/{}", update.id), update)
            .await
    }

    async fn user_verification(&self) -> Result<UserVerificationResponse, ApiError> {
        self.get_json("user").await
    }
}
