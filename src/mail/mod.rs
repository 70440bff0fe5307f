//! Mail provider client: OAuth grants, message fetch and send.

pub mod graph;
pub mod types;

pub use graph::GraphClient;
pub use types::{MailMessage, MailboxProfile, TokenGrant};

use async_trait::async_trait;

use crate::error::MailError;

/// One OAuth2 + REST mail API.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Messages received in the last `lookback_minutes`, newest first.
    async fn try_fetch_recent_messages(
        &self,
        access_token: &str,
        lookback_minutes: i64,
    ) -> Result<Vec<MailMessage>, MailError>;

    /// Like `try_fetch_recent_messages`, but any failure yields an empty list.
    async fn fetch_recent_messages(
        &self,
        access_token: &str,
        lookback_minutes: i64,
    ) -> Vec<MailMessage> {
        match self
            .try_fetch_recent_messages(access_token, lookback_minutes)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "Mail fetch failed; treating as empty");
                Vec::new()
            }
        }
    }

    /// Refresh-token grant. Fails with `MailError::Refresh`.
    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, MailError>;

    /// Authorization-code grant for the initial connection.
    async fn exchange_auth_code(&self, code: &str) -> Result<TokenGrant, MailError>;

    /// Send a plain-text message. Fails with `MailError::Send`.
    async fn send_message(
        &self,
        access_token: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError>;

    /// Address and display name of the mailbox the token belongs to.
    async fn mailbox_profile(&self, access_token: &str) -> Result<MailboxProfile, MailError>;

    /// Consent URL the user is redirected to; `state` comes back on the callback.
    fn authorization_url(&self, state: &str) -> Result<String, MailError>;
}
