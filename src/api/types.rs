//! Request/response bodies for the wallet API, plus the HTTP error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wallet check-in response: chain tip plus fee and price context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResponse {
    /// Current best block height reported by the server.
    #[serde(rename = "blockheight")]
    pub block_height: u64,
    pub fees: FeeEstimates,
    pub pricing: PriceInfo,
}

/// Fee estimates in sats/vB for three confirmation targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEstimates {
    pub fast: f64,
    pub medium: f64,
    pub slow: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceInfo {
    pub usd: f64,
}

/// One row of a transaction-summary query: an address of ours appeared in
/// the given transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressTransactionSummary {
    pub address: String,
    pub txid: String,
}

/// Full transaction detail as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub txid: String,
    #[serde(rename = "blockhash")]
    pub block_hash: Option<String>,
    /// Height of the containing block; absent while unconfirmed.
    pub height: Option<u64>,
    #[serde(rename = "receivedTime")]
    pub received_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vin: Vec<VinResponse>,
    #[serde(default)]
    pub vout: Vec<VoutResponse>,
}

/// Previous-output reference spent by a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VinResponse {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub addresses: Vec<String>,
    pub value: u64,
}

/// New output created by a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoutResponse {
    pub n: u32,
    pub value: u64,
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Server-side invitation status. `RequestSent`/`AddressSent` are local
/// refinements of `New` based on address presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatusDto {
    New,
    Completed,
    Canceled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationSideDto {
    Sent,
    Received,
}

/// Invitation (address request) as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationResponse {
    pub id: String,
    pub status: InvitationStatusDto,
    pub side: InvitationSideDto,
    /// Amount the sender reserved, in sats.
    pub sats: u64,
    #[serde(rename = "feeSats")]
    pub fee_sats: u64,
    /// Receiving address supplied by the counterparty, once available.
    pub address: Option<String>,
    /// Broadcast txid, present once the sender acknowledged.
    pub txid: Option<String>,
    #[serde(rename = "phoneNumberHash")]
    pub phone_number_hash: Option<String>,
    #[serde(rename = "twitterHandle")]
    pub twitter_handle: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update pushed back to the server for one invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationUpdateRequest {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<InvitationStatusDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatusDto {
    New,
    Pending,
    Verified,
}

/// User verification state as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserVerificationResponse {
    pub id: String,
    pub status: VerificationStatusDto,
    #[serde(default)]
    pub identities: Vec<String>,
}

/// Why the server disavowed our credentials on a 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    DeviceMismatch,
    RecordNotFound,
    Unknown,
}

impl std::fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnauthorizedReason::DeviceMismatch => write!(f, "device mismatch"),
            UnauthorizedReason::RecordNotFound => write!(f, "record not found"),
            UnauthorizedReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Error types for wallet API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: UnauthorizedReason },

    #[error("record not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("rate limited")]
    RateLimited,

    #[error("transient server error: status {0}")]
    Transient(u16),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// Map a non-success HTTP status and response body to an error.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => {
                let reason = if body.contains("device") {
                    UnauthorizedReason::DeviceMismatch
                } else if body.contains("not found") || body.contains("no record") {
                    UnauthorizedReason::RecordNotFound
                } else {
                    UnauthorizedReason::Unknown
                };
                ApiError::Unauthorized { reason }
            }
            404 => ApiError::NotFound,
            409 => ApiError::Conflict,
            429 => ApiError::RateLimited,
            500 | 501 | 502 | 503 | 504 => ApiError::Transient(status),
            other => ApiError::Status(other),
        }
    }

    /// True for failures worth retrying on a later trigger.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimited | ApiError::Transient(_) => true,
            ApiError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// True when the server has disavowed our identity and local identity
    /// markers must be cleared before the next sync.
    pub fn should_deverify(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized {
                reason: UnauthorizedReason::DeviceMismatch | UnauthorizedReason::RecordNotFound
            }
        )
    }
}
