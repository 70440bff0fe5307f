//! Tenant data model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An organizational account. Owns zero-or-one credential and many tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// The user whose mailbox is connected for a tenant.
///
/// Messages sent from this address are never turned into tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantOwner {
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

/// Stored OAuth credential. Both tokens are vault-sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub tenant_id: Uuid,
    pub access_token_enc: String,
    pub refresh_token_enc: String,
    /// Authoritative for refresh decisions.
    pub expires_at: DateTime<Utc>,
    /// Bumped on every write; guards concurrent refreshes.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// True when the access token expires within `skew` of `now` (or already has).
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at <= now + skew
    }
}

/// New sealed token material for a credential write.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub access_token_enc: String,
    pub refresh_token_enc: String,
    pub expires_at: DateTime<Utc>,
}

/// Tenant joined with its credential, if any.
#[derive(Debug, Clone)]
pub struct ConnectedTenant {
    pub tenant: Tenant,
    pub credential: Option<Credential>,
}

impl ConnectedTenant {
    pub fn is_connected(&self) -> bool {
        self.credential.is_some()
    }
}
