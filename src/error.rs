//! Error types for Mail Tasks.

use std::time::Duration;

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// A uniqueness constraint rejected the write (e.g. a task dedup key
    /// that a concurrent tick inserted first).
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Credential vault errors.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Stored ciphertext is corrupted, tampered with, or was sealed under
    /// another key.
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Mail provider (OAuth + mail REST API) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail provider unreachable: {0}")]
    Transport(String),

    #[error("Mail API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Authorization code exchange failed: {0}")]
    AuthCode(String),

    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("Invalid response from mail provider: {0}")]
    InvalidResponse(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Task classification errors. The ingestion path skips the message.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Classifier call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Malformed classifier output: {0}")]
    Parse(String),

    #[error("Classifier output has no summary")]
    MissingSummary,
}

/// Token lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Tenant {tenant} has no mail connection")]
    NotConnected { tenant: Uuid },

    #[error("Stored credential unreadable: {0}")]
    Vault(#[from] VaultError),

    #[error("Mail provider error: {0}")]
    Mail(#[from] MailError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Errors from explicit task operations (manual tasks, replies, notifications).
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Tenant {id} not found")]
    TenantNotFound { id: Uuid },

    #[error("Tenant {tenant} has no valid mail connection")]
    NotConnected { tenant: Uuid },

    #[error("Send failed: {0}")]
    Send(#[from] MailError),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

const REDACTED_BODY_MAX_CHARS: usize = 200;

/// Trim an upstream response body for inclusion in an error message.
pub(crate) fn redact_body(body: &str) -> String {
    let trimmed = body.trim();
    let total = trimmed.chars().count();
    if total <= REDACTED_BODY_MAX_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(REDACTED_BODY_MAX_CHARS).collect();
        format!("{head}…[truncated {} chars]", total - REDACTED_BODY_MAX_CHARS)
    }
}
