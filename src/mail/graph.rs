//! Microsoft Graph mail client.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OAuthConfig;
use crate::error::{MailError, redact_body};
use crate::mail::MailProvider;
use crate::mail::types::{MailMessage, MailboxProfile, TokenGrant};

/// Scope requested on token grants.
const GRANT_SCOPE: &str = "https://graph.microsoft.com/.default offline_access";

/// Scopes the user consents to on the authorize page.
const CONSENT_SCOPE: &str = "openid profile offline_access https://graph.microsoft.com/Mail.Read https://graph.microsoft.com/Mail.Send https://graph.microsoft.com/User.Read";

/// Page size for one fetch. Older messages fall to the next lookback window.
const FETCH_PAGE_SIZE: u32 = 50;

/// Default lifetime when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Upper bound on an accepted token lifetime (30 days).
const MAX_EXPIRES_IN_SECS: i64 = 30 * 24 * 3600;

/// Graph REST + identity-platform client. One shared `reqwest::Client`.
pub struct GraphClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    token_url: String,
    authorize_url: String,
    graph_base_url: String,
}

impl GraphClient {
    pub fn new(config: &OAuthConfig) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| MailError::Transport(format!("HTTP client error: {e}")))?;

        let authority = format!("{}/{}/oauth2/v2.0", config.authority_url, config.directory_id);
        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            token_url: format!("{authority}/token"),
            authorize_url: format!("{authority}/authorize"),
            graph_base_url: config.graph_base_url.clone(),
        })
    }

    fn messages_url(&self, since: DateTime<Utc>) -> Result<Url, MailError> {
        let mut url = Url::parse(&format!("{}/me/messages", self.graph_base_url))
            .map_err(|e| MailError::InvalidResponse(format!("bad Graph base URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair(
                "$filter",
                &format!(
                    "receivedDateTime ge {}",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            )
            .append_pair("$orderby", "receivedDateTime desc")
            .append_pair("$select", "id,subject,body,from,receivedDateTime")
            .append_pair("$top", &FETCH_PAGE_SIZE.to_string());
        Ok(url)
    }

    /// POST a form to the token endpoint and decode the grant.
    async fn token_grant(&self, form: &[(&str, &str)]) -> Result<TokenGrant, String> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token endpoint unreachable: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("read token response: {e}"))?;
        if !status.is_success() {
            return Err(format!("status={status} body={}", redact_body(&body)));
        }

        let payload: TokenResponse =
            serde_json::from_str(&body).map_err(|e| format!("decode token response: {e}"))?;
        let access_token = payload
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "token response has no access_token".to_string())?;

        let expires_in_secs = match payload.expires_in {
            Some(raw) => raw.seconds()?,
            None => DEFAULT_EXPIRES_IN_SECS,
        };

        Ok(TokenGrant {
            access_token,
            refresh_token: payload.refresh_token.filter(|t| !t.is_empty()),
            expires_in_secs,
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<ExpiresIn>,
}

/// Some identity endpoints send `expires_in` as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Number(i64),
    Text(String),
}

impl ExpiresIn {
    /// Lifetime in seconds, within `1..=MAX_EXPIRES_IN_SECS`.
    fn seconds(self) -> Result<i64, String> {
        let secs = match self {
            Self::Number(n) => n,
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("token response has unreadable expires_in {s:?}"))?,
        };
        if !(1..=MAX_EXPIRES_IN_SECS).contains(&secs) {
            return Err(format!("token response expires_in out of range: {secs}"));
        }
        Ok(secs)
    }
}

#[derive(Deserialize)]
struct GraphMessageList {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Deserialize)]
struct GraphMessage {
    id: Option<String>,
    subject: Option<String>,
    body: Option<GraphBody>,
    from: Option<GraphRecipient>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
}

#[derive(Deserialize)]
struct GraphBody {
    content: Option<String>,
}

#[derive(Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: Option<GraphEmailAddress>,
}

#[derive(Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Deserialize)]
struct GraphUser {
    mail: Option<String>,
    #[serde(rename = "userPrincipalName")]
    user_principal_name: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl GraphMessage {
    fn into_mail_message(self) -> Option<MailMessage> {
        let id = non_empty(self.id)?;
        let (from_name, from_address) = match self.from.and_then(|f| f.email_address) {
            Some(addr) => (non_empty(addr.name), non_empty(addr.address)),
            None => (None, None),
        };
        let received_at = self
            .received_date_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(MailMessage {
            id,
            subject: non_empty(self.subject),
            body: self.body.and_then(|b| b.content).unwrap_or_default(),
            from_address,
            from_name,
            received_at,
        })
    }
}

#[async_trait]
impl MailProvider for GraphClient {
    async fn try_fetch_recent_messages(
        &self,
        access_token: &str,
        lookback_minutes: i64,
    ) -> Result<Vec<MailMessage>, MailError> {
        let since = Duration::try_minutes(lookback_minutes)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| {
                MailError::InvalidResponse(format!("lookback out of range: {lookback_minutes}m"))
            })?;
        let url = self.messages_url(since)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MailError::Transport(format!("read message list: {e}")))?;
        if !status.is_success() {
            return Err(MailError::Api {
                status: status.as_u16(),
                body: redact_body(&body),
            });
        }

        let list: GraphMessageList = serde_json::from_str(&body)
            .map_err(|e| MailError::InvalidResponse(format!("decode message list: {e}")))?;
        let total = list.value.len();
        let mut messages: Vec<MailMessage> = list
            .value
            .into_iter()
            .filter_map(GraphMessage::into_mail_message)
            .collect();
        if messages.len() < total {
            warn!(dropped = total - messages.len(), "Graph returned messages without id");
        }
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));

        debug!(count = messages.len(), since = %since, "Fetched recent messages");
        Ok(messages)
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, MailError> {
        let grant = self
            .token_grant(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
                ("scope", GRANT_SCOPE),
            ])
            .await
            .map_err(MailError::Refresh)?;
        info!(expires_in = grant.expires_in_secs, "Access token refreshed");
        Ok(grant)
    }

    async fn exchange_auth_code(&self, code: &str) -> Result<TokenGrant, MailError> {
        self.token_grant(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
            ("scope", CONSENT_SCOPE),
        ])
        .await
        .map_err(MailError::AuthCode)
    }

    async fn send_message(
        &self,
        access_token: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let payload = json!({
            "message": {
                "subject": subject,
                "body": { "contentType": "Text", "content": body },
                "toRecipients": [ { "emailAddress": { "address": to } } ]
            },
            "saveToSentItems": true
        });

        let response = self
            .client
            .post(format!("{}/me/sendMail", self.graph_base_url))
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Send(format!("provider unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Send(format!(
                "status={status} body={}",
                redact_body(&body)
            )));
        }
        info!(to = %to, "Message sent");
        Ok(())
    }

    async fn mailbox_profile(&self, access_token: &str) -> Result<MailboxProfile, MailError> {
        let response = self
            .client
            .get(format!("{}/me", self.graph_base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body: redact_body(&body),
            });
        }
        let user: GraphUser = response
            .json()
            .await
            .map_err(|e| MailError::InvalidResponse(format!("decode /me: {e}")))?;

        let address = non_empty(user.mail)
            .or_else(|| non_empty(user.user_principal_name))
            .ok_or_else(|| MailError::InvalidResponse("profile has no mail address".into()))?;
        Ok(MailboxProfile {
            address,
            display_name: non_empty(user.display_name),
        })
    }

    fn authorization_url(&self, state: &str) -> Result<String, MailError> {
        let mut url = Url::parse(&self.authorize_url)
            .map_err(|e| MailError::InvalidResponse(format!("bad authority URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", CONSENT_SCOPE)
            .append_pair("state", state)
            .append_pair("prompt", "consent");
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    use axum::extract::{Form, Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Clone, Default)]
    struct Seen {
        query: Arc<Mutex<HashMap<String, String>>>,
        form: Arc<Mutex<HashMap<String, String>>>,
        json: Arc<Mutex<Option<serde_json::Value>>>,
        auth: Arc<Mutex<Option<String>>>,
    }

    fn bearer(headers: &HeaderMap) -> Option<String> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    async fn start(seen: Seen, fail_messages: bool) -> String {
        let app = Router::new()
            .route(
                "/tenant-x/oauth2/v2.0/token",
                post(
                    |State(s): State<Seen>, Form(form): Form<HashMap<String, String>>| async move {
                        *s.form.lock().unwrap() = form.clone();
                        if form.get("refresh_token").map(String::as_str) == Some("revoked") {
                            return (AxumStatus::BAD_REQUEST, Json(json!({"error": "invalid_grant"})));
                        }
                        let lifetime = match form
                            .get("refresh_token")
                            .or_else(|| form.get("code"))
                            .map(String::as_str)
                        {
                            Some("endless") => json!(10_000_000_000_000_i64),
                            Some("stale") => json!(-30),
                            Some("garbled") => json!("soon"),
                            _ => json!("3599"),
                        };
                        (
                            AxumStatus::OK,
                            Json(json!({
                                "access_token": "new-access",
                                "refresh_token": "new-refresh",
                                "expires_in": lifetime
                            })),
                        )
                    },
                ),
            )
            .route(
                "/v1.0/me/messages",
                get(
                    move |State(s): State<Seen>,
                          headers: HeaderMap,
                          Query(q): Query<HashMap<String, String>>| async move {
                        *s.query.lock().unwrap() = q;
                        *s.auth.lock().unwrap() = bearer(&headers);
                        if fail_messages {
                            return (AxumStatus::SERVICE_UNAVAILABLE, Json(json!({"error": "down"})));
                        }
                        (
                            AxumStatus::OK,
                            Json(json!({"value": [
                                {
                                    "id": "older",
                                    "subject": "Pickup",
                                    "body": {"contentType": "html", "content": "<p>a</p>"},
                                    "from": {"emailAddress": {"name": "Ops", "address": "ops@carrier.example"}},
                                    "receivedDateTime": "2026-03-01T10:00:00Z"
                                },
                                {
                                    "id": "newer",
                                    "subject": null,
                                    "body": {"content": "b"},
                                    "from": {"emailAddress": {"address": "x@y.example"}},
                                    "receivedDateTime": "2026-03-01T11:00:00Z"
                                },
                                { "subject": "no id" }
                            ]})),
                        )
                    },
                ),
            )
            .route(
                "/v1.0/me/sendMail",
                post(
                    |State(s): State<Seen>, Json(body): Json<serde_json::Value>| async move {
                        let reject = body["message"]["toRecipients"][0]["emailAddress"]["address"]
                            == "bounce@example.com";
                        *s.json.lock().unwrap() = Some(body);
                        if reject {
                            AxumStatus::FORBIDDEN
                        } else {
                            AxumStatus::ACCEPTED
                        }
                    },
                ),
            )
            .route(
                "/v1.0/me",
                get(|| async {
                    Json(json!({
                        "displayName": "Owner",
                        "mail": null,
                        "userPrincipalName": "owner@acme.example"
                    }))
                }),
            )
            .with_state(seen);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{port}")
    }

    fn client(base: &str) -> GraphClient {
        GraphClient::new(&OAuthConfig {
            client_id: "client-id".into(),
            client_secret: SecretString::from("client-secret"),
            directory_id: "tenant-x".into(),
            redirect_uri: "http://localhost:8080/api/auth/callback".into(),
            authority_url: base.to_string(),
            graph_base_url: format!("{base}/v1.0"),
            http_timeout: StdDuration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_filters_by_receipt_time_and_orders_newest_first() {
        let seen = Seen::default();
        let graph = client(&start(seen.clone(), false).await);

        let messages = graph.try_fetch_recent_messages("tok", 5).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(messages[1].from_address.as_deref(), Some("ops@carrier.example"));
        assert_eq!(messages[1].from_name.as_deref(), Some("Ops"));
        assert_eq!(messages[1].body, "<p>a</p>");
        assert!(messages[0].subject.is_none());

        let query = seen.query.lock().unwrap().clone();
        assert!(query["$filter"].starts_with("receivedDateTime ge "));
        assert_eq!(query["$orderby"], "receivedDateTime desc");
        assert_eq!(query["$select"], "id,subject,body,from,receivedDateTime");
        assert_eq!(query["$top"], "50");
        assert_eq!(seen.auth.lock().unwrap().as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn fetch_error_is_distinguishable_but_default_fetch_is_empty() {
        let graph = client(&start(Seen::default(), true).await);

        let err = graph.try_fetch_recent_messages("tok", 5).await.unwrap_err();
        assert!(matches!(err, MailError::Api { status: 503, .. }));
        assert!(graph.fetch_recent_messages("tok", 5).await.is_empty());
    }

    #[tokio::test]
    async fn transport_error_when_unreachable() {
        let graph = client("http://127.0.0.1:9");
        let err = graph.try_fetch_recent_messages("tok", 5).await.unwrap_err();
        assert!(matches!(err, MailError::Transport(_)));
        assert!(graph.fetch_recent_messages("tok", 5).await.is_empty());
    }

    #[tokio::test]
    async fn refresh_grant_posts_form_and_parses_string_expiry() {
        let seen = Seen::default();
        let graph = client(&start(seen.clone(), false).await);

        let grant = graph.refresh_grant("old-refresh").await.unwrap();
        assert_eq!(grant.access_token, "new-access");
        assert_eq!(grant.refresh_token.as_deref(), Some("new-refresh"));
        assert_eq!(grant.expires_in_secs, 3599);

        let form = seen.form.lock().unwrap().clone();
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["refresh_token"], "old-refresh");
        assert_eq!(form["client_secret"], "client-secret");
        assert_eq!(form["scope"], GRANT_SCOPE);
    }

    #[tokio::test]
    async fn refresh_grant_failure_is_refresh_error() {
        let graph = client(&start(Seen::default(), false).await);
        let err = graph.refresh_grant("revoked").await.unwrap_err();
        assert!(matches!(err, MailError::Refresh(_)));
    }

    #[tokio::test]
    async fn out_of_range_expiry_is_rejected() {
        let graph = client(&start(Seen::default(), false).await);

        for refresh in ["endless", "stale", "garbled"] {
            let err = graph.refresh_grant(refresh).await.unwrap_err();
            assert!(matches!(err, MailError::Refresh(_)), "{refresh}: {err:?}");
        }
        let err = graph.exchange_auth_code("endless").await.unwrap_err();
        assert!(matches!(err, MailError::AuthCode(_)));
    }

    #[tokio::test]
    async fn absurd_lookback_is_an_error_not_a_panic() {
        let graph = client(&start(Seen::default(), false).await);
        let err = graph
            .try_fetch_recent_messages("tok", i64::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn auth_code_exchange_sends_redirect_uri() {
        let seen = Seen::default();
        let graph = client(&start(seen.clone(), false).await);

        graph.exchange_auth_code("the-code").await.unwrap();
        let form = seen.form.lock().unwrap().clone();
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "the-code");
        assert_eq!(form["redirect_uri"], "http://localhost:8080/api/auth/callback");
    }

    #[tokio::test]
    async fn send_message_builds_text_payload() {
        let seen = Seen::default();
        let graph = client(&start(seen.clone(), false).await);

        graph
            .send_message("tok", "ops@carrier.example", "Re: Pickup", "On my way")
            .await
            .unwrap();
        let body = seen.json.lock().unwrap().clone().unwrap();
        assert_eq!(body["message"]["subject"], "Re: Pickup");
        assert_eq!(body["message"]["body"]["contentType"], "Text");
        assert_eq!(body["message"]["body"]["content"], "On my way");
        assert_eq!(body["saveToSentItems"], true);

        let err = graph
            .send_message("tok", "bounce@example.com", "s", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Send(_)));
    }

    #[tokio::test]
    async fn profile_falls_back_to_principal_name() {
        let graph = client(&start(Seen::default(), false).await);
        let profile = graph.mailbox_profile("tok").await.unwrap();
        assert_eq!(profile.address, "owner@acme.example");
        assert_eq!(profile.display_name.as_deref(), Some("Owner"));
    }

    #[test]
    fn authorization_url_carries_consent_parameters() {
        let graph = client("https://login.example");
        let url = Url::parse(&graph.authorization_url("tenant-42").unwrap()).unwrap();
        assert_eq!(url.path(), "/tenant-x/oauth2/v2.0/authorize");

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["response_mode"], "query");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["state"], "tenant-42");
        assert!(params["scope"].contains("offline_access"));
        assert!(params["scope"].contains("Mail.Send"));
    }
}
