//! Token lifecycle: hand out valid access tokens, refreshing ahead of expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, MailError, TokenError};
use crate::mail::{MailProvider, TokenGrant};
use crate::store::Database;
use crate::tenants::{Credential, CredentialUpdate, TenantOwner};
use crate::vault::CredentialVault;

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_SKEW_MINUTES: i64 = 5;

/// Owns the read → refresh → persist cycle for tenant credentials.
///
/// Refreshes for one tenant are serialized by an in-process mutex, and the
/// write is conditional on the credential `version` so a second process
/// cannot silently overwrite a newer token.
pub struct TokenManager {
    db: Arc<dyn Database>,
    vault: Arc<CredentialVault>,
    mail: Arc<dyn MailProvider>,
    skew: Duration,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(
        db: Arc<dyn Database>,
        vault: Arc<CredentialVault>,
        mail: Arc<dyn MailProvider>,
    ) -> Self {
        Self {
            db,
            vault,
            mail,
            skew: Duration::minutes(REFRESH_SKEW_MINUTES),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// A usable access token, or `None` if the tenant is not connected or
    /// the token could not be refreshed. Never fails.
    pub async fn get_valid_access_token(&self, tenant_id: Uuid) -> Option<String> {
        match self.access_token(tenant_id).await {
            Ok(token) => Some(token),
            Err(TokenError::NotConnected { .. }) => {
                debug!(tenant = %tenant_id, "Tenant not connected");
                None
            }
            Err(TokenError::Vault(e)) => {
                error!(
                    tenant = %tenant_id,
                    error = %e,
                    "Stored credential cannot be decrypted; tenant must re-authorize"
                );
                None
            }
            Err(e) => {
                warn!(tenant = %tenant_id, error = %e, "No valid access token");
                None
            }
        }
    }

    /// Like `get_valid_access_token`, with the failure reason.
    pub async fn access_token(&self, tenant_id: Uuid) -> Result<String, TokenError> {
        let credential = self.load(tenant_id).await?;
        if !credential.needs_refresh(Utc::now(), self.skew) {
            return Ok(self.vault.decrypt(&credential.access_token_enc)?);
        }

        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited.
        let credential = self.load(tenant_id).await?;
        if !credential.needs_refresh(Utc::now(), self.skew) {
            return Ok(self.vault.decrypt(&credential.access_token_enc)?);
        }

        self.refresh(credential).await
    }

    async fn refresh(&self, credential: Credential) -> Result<String, TokenError> {
        let tenant_id = credential.tenant_id;
        let refresh_token = self.vault.decrypt(&credential.refresh_token_enc)?;

        debug!(tenant = %tenant_id, expires_at = %credential.expires_at, "Refreshing access token");
        let grant = self.mail.refresh_grant(&refresh_token).await?;
        let update = self.seal(&grant, &refresh_token)?;

        if self
            .db
            .update_credential_if_version(tenant_id, credential.version, &update)
            .await?
        {
            info!(tenant = %tenant_id, expires_at = %update.expires_at, "Access token refreshed");
            return Ok(grant.access_token);
        }

        // Lost the version race. Prefer the stored winner; ours is still usable.
        debug!(tenant = %tenant_id, "Credential changed during refresh");
        match self.db.get_credential(tenant_id).await? {
            Some(winner) if !winner.needs_refresh(Utc::now(), self.skew) => {
                Ok(self.vault.decrypt(&winner.access_token_enc)?)
            }
            _ => Ok(grant.access_token),
        }
    }

    /// Complete the authorization-code flow for a tenant.
    ///
    /// Records the connected mailbox as the tenant owner and stores the
    /// sealed tokens.
    pub async fn connect(&self, tenant_id: Uuid, code: &str) -> Result<TenantOwner, TokenError> {
        if self.db.get_tenant(tenant_id).await?.is_none() {
            return Err(DatabaseError::NotFound {
                entity: "tenant".to_string(),
                id: tenant_id.to_string(),
            }
            .into());
        }

        let grant = self.mail.exchange_auth_code(code).await?;
        let refresh_token = grant.refresh_token.clone().ok_or_else(|| {
            MailError::AuthCode("grant carries no refresh token (offline_access missing?)".into())
        })?;
        let update = self.seal(&grant, &refresh_token)?;
        let profile = self.mail.mailbox_profile(&grant.access_token).await?;

        let owner = TenantOwner {
            tenant_id,
            email: profile.address,
            display_name: profile.display_name,
        };
        self.db.upsert_tenant_owner(&owner).await?;
        self.db.upsert_credential(tenant_id, &update).await?;

        info!(tenant = %tenant_id, mailbox = %owner.email, "Mailbox connected");
        Ok(owner)
    }

    /// Forget the tenant's credential. Returns false if there was none.
    pub async fn revoke(&self, tenant_id: Uuid) -> Result<bool, TokenError> {
        let removed = self.db.delete_credential(tenant_id).await?;
        if removed {
            info!(tenant = %tenant_id, "Mailbox disconnected");
        }
        Ok(removed)
    }

    /// Consent URL for a tenant; the tenant id travels as OAuth `state`.
    pub fn authorization_url(&self, tenant_id: Uuid) -> Result<String, TokenError> {
        Ok(self.mail.authorization_url(&tenant_id.to_string())?)
    }

    async fn load(&self, tenant_id: Uuid) -> Result<Credential, TokenError> {
        self.db
            .get_credential(tenant_id)
            .await?
            .ok_or(TokenError::NotConnected { tenant: tenant_id })
    }

    /// Seal a grant. A grant without a refresh token keeps `fallback_refresh`.
    fn seal(&self, grant: &TokenGrant, fallback_refresh: &str) -> Result<CredentialUpdate, TokenError> {
        let expires_at = Duration::try_seconds(grant.expires_in_secs)
            .filter(|lifetime| *lifetime > Duration::zero())
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                MailError::InvalidResponse(format!(
                    "grant lifetime out of range: {}s",
                    grant.expires_in_secs
                ))
            })?;
        let refresh = grant.refresh_token.as_deref().unwrap_or(fallback_refresh);
        Ok(CredentialUpdate {
            access_token_enc: self.vault.encrypt(&grant.access_token)?,
            refresh_token_enc: self.vault.encrypt(refresh)?,
            expires_at,
        })
    }

    fn lock_for(&self, tenant_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(tenant_id).or_default())
    }
}
