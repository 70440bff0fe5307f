//! Mail provider data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound message as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Provider-issued id; used as the task dedup key.
    pub id: String,
    pub subject: Option<String>,
    /// Raw body, usually HTML.
    pub body: String,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl MailMessage {
    /// True if the sender is `mailbox` (case-insensitive).
    pub fn is_from(&self, mailbox: &str) -> bool {
        self.from_address
            .as_deref()
            .is_some_and(|from| from.trim().eq_ignore_ascii_case(mailbox.trim()))
    }
}

/// Tokens returned by an authorization-code or refresh-token grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Providers may omit this on refresh; the previous one stays valid.
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
}

/// Identity of the connected mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxProfile {
    pub address: String,
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_match_ignores_case_and_padding() {
        let msg = MailMessage {
            id: "1".into(),
            subject: None,
            body: String::new(),
            from_address: Some(" Owner@Acme.example".into()),
            from_name: None,
            received_at: Utc::now(),
        };
        assert!(msg.is_from("owner@acme.example"));
        assert!(!msg.is_from("someone@acme.example"));

        let anonymous = MailMessage {
            from_address: None,
            ..msg
        };
        assert!(!anonymous.is_from("owner@acme.example"));
    }
}
