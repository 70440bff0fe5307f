//! Ingestion scheduler: periodically turns new tenant mail into tasks.
//!
//! Each tick:
//! 1. Load tenants (with credentials) and the tenant → owner mailbox index
//! 2. Per tenant: get a valid access token, or skip the tenant
//! 3. Fetch recent messages, newest first
//! 4. Per message: skip self-sent and already-stored, classify, sanitize, insert
//!
//! A failed message never stops its tenant; a failed tenant never stops the tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::DatabaseError;
use crate::mail::{MailMessage, MailProvider};
use crate::oauth::TokenManager;
use crate::pipeline::classifier::TaskClassifier;
use crate::pipeline::sanitize::html_to_text;
use crate::store::Database;
use crate::tasks::model::Task;
use crate::tenants::ConnectedTenant;

/// Counters for one tick. The most recent one is served on `/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tenants_total: u32,
    /// No credential, or no valid token this tick.
    pub tenants_skipped: u32,
    /// Tenant task panicked or the tenant list could not be loaded.
    pub tenants_failed: u32,
    /// Fetches that errored and were treated as empty.
    pub fetch_failures: u32,
    pub messages_seen: u32,
    pub tasks_created: u32,
    pub self_sent_skipped: u32,
    pub duplicates_skipped: u32,
    pub classification_failures: u32,
    /// Inserts rejected by the dedup unique index.
    pub races_lost: u32,
    pub message_failures: u32,
}

impl TickReport {
    fn absorb(&mut self, outcome: TenantOutcome) {
        match outcome {
            TenantOutcome::Skipped => self.tenants_skipped += 1,
            TenantOutcome::Processed(c) => {
                self.fetch_failures += c.fetch_failures;
                self.messages_seen += c.messages_seen;
                self.tasks_created += c.tasks_created;
                self.self_sent_skipped += c.self_sent_skipped;
                self.duplicates_skipped += c.duplicates_skipped;
                self.classification_failures += c.classification_failures;
                self.races_lost += c.races_lost;
                self.message_failures += c.message_failures;
            }
        }
    }
}

#[derive(Debug, Default)]
struct TenantCounts {
    fetch_failures: u32,
    messages_seen: u32,
    tasks_created: u32,
    self_sent_skipped: u32,
    duplicates_skipped: u32,
    classification_failures: u32,
    races_lost: u32,
    message_failures: u32,
}

#[derive(Debug)]
enum TenantOutcome {
    Skipped,
    Processed(TenantCounts),
}

#[derive(Debug, PartialEq, Eq)]
enum MessageOutcome {
    Created,
    SelfSent,
    Duplicate,
    ClassificationFailed,
    RaceLost,
}

/// Drives ingestion ticks over every tenant.
pub struct IngestionScheduler {
    db: Arc<dyn Database>,
    tokens: Arc<TokenManager>,
    mail: Arc<dyn MailProvider>,
    classifier: Arc<TaskClassifier>,
    config: IngestConfig,
    last_report: Mutex<Option<TickReport>>,
}

impl IngestionScheduler {
    pub fn new(
        db: Arc<dyn Database>,
        tokens: Arc<TokenManager>,
        mail: Arc<dyn MailProvider>,
        classifier: Arc<TaskClassifier>,
        config: IngestConfig,
    ) -> Self {
        Self {
            db,
            tokens,
            mail,
            classifier,
            config,
            last_report: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Report of the last completed tick, if any.
    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run one tick to completion. Never fails; problems are counted.
    pub async fn run_tick(self: &Arc<Self>) -> TickReport {
        let mut report = TickReport {
            started_at: Utc::now(),
            ..Default::default()
        };

        let tenants = match self.db.list_tenants_with_credentials().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(error = %e, "Failed to load tenants; skipping tick");
                report.tenants_failed = 1;
                return self.finish(report);
            }
        };
        report.tenants_total = tenants.len() as u32;

        let owners: Arc<HashMap<Uuid, String>> = match self.db.tenant_owner_index().await {
            Ok(index) => Arc::new(index),
            Err(e) => {
                warn!(error = %e, "Owner index unavailable; self-sent filter disabled this tick");
                Arc::new(HashMap::new())
            }
        };

        let (connected, unconnected): (Vec<ConnectedTenant>, Vec<ConnectedTenant>) =
            tenants.into_iter().partition(ConnectedTenant::is_connected);
        for tenant in &unconnected {
            debug!(tenant = %tenant.tenant.id, "Tenant has no credential; skipping");
        }
        report.tenants_skipped += unconnected.len() as u32;

        let concurrency = self.config.max_concurrent_tenants.max(1);
        let results: Vec<(Uuid, Result<TenantOutcome, tokio::task::JoinError>)> =
            stream::iter(connected)
                .map(|tenant| {
                    let this = Arc::clone(self);
                    let owner = owners.get(&tenant.tenant.id).cloned();
                    let tenant_id = tenant.tenant.id;
                    let handle = tokio::spawn(async move { this.process_tenant(tenant, owner).await });
                    async move { (tenant_id, handle.await) }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        for (tenant_id, result) in results {
            match result {
                Ok(outcome) => report.absorb(outcome),
                Err(e) => {
                    error!(tenant = %tenant_id, error = %e, "Tenant ingestion aborted");
                    report.tenants_failed += 1;
                }
            }
        }

        self.finish(report)
    }

    fn finish(&self, mut report: TickReport) -> TickReport {
        report.finished_at = Utc::now();
        info!(
            tenants = report.tenants_total,
            skipped = report.tenants_skipped,
            failed = report.tenants_failed,
            messages = report.messages_seen,
            created = report.tasks_created,
            fetch_failures = report.fetch_failures,
            "Ingestion tick complete"
        );
        *self.last_report.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        report
    }

    async fn process_tenant(&self, tenant: ConnectedTenant, owner: Option<String>) -> TenantOutcome {
        let tenant_id = tenant.tenant.id;

        let Some(token) = self.tokens.get_valid_access_token(tenant_id).await else {
            warn!(tenant = %tenant_id, "No valid access token; skipping tenant this tick");
            return TenantOutcome::Skipped;
        };

        let mut counts = TenantCounts::default();
        let messages = match self
            .mail
            .try_fetch_recent_messages(&token, self.config.lookback_minutes)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(tenant = %tenant_id, error = %e, "Mail fetch failed; treating as empty");
                counts.fetch_failures = 1;
                return TenantOutcome::Processed(counts);
            }
        };
        counts.messages_seen = messages.len() as u32;

        for message in &messages {
            match self.process_message(tenant_id, owner.as_deref(), message).await {
                Ok(MessageOutcome::Created) => counts.tasks_created += 1,
                Ok(MessageOutcome::SelfSent) => counts.self_sent_skipped += 1,
                Ok(MessageOutcome::Duplicate) => counts.duplicates_skipped += 1,
                Ok(MessageOutcome::ClassificationFailed) => counts.classification_failures += 1,
                Ok(MessageOutcome::RaceLost) => counts.races_lost += 1,
                Err(e) => {
                    warn!(
                        tenant = %tenant_id,
                        message_id = %message.id,
                        error = %e,
                        "Failed to ingest message"
                    );
                    counts.message_failures += 1;
                }
            }
        }

        TenantOutcome::Processed(counts)
    }

    async fn process_message(
        &self,
        tenant_id: Uuid,
        owner: Option<&str>,
        message: &MailMessage,
    ) -> Result<MessageOutcome, DatabaseError> {
        if owner.is_some_and(|mailbox| message.is_from(mailbox)) {
            debug!(tenant = %tenant_id, message_id = %message.id, "Skipping self-sent message");
            return Ok(MessageOutcome::SelfSent);
        }

        if self.db.task_exists(&message.id).await? {
            debug!(tenant = %tenant_id, message_id = %message.id, "Message already ingested");
            return Ok(MessageOutcome::Duplicate);
        }

        let classification = match self.classifier.classify(message).await {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    tenant = %tenant_id,
                    message_id = %message.id,
                    error = %e,
                    "Classification failed; skipping message"
                );
                return Ok(MessageOutcome::ClassificationFailed);
            }
        };

        let sanitized = html_to_text(&message.body);
        let mut task = Task::new(
            tenant_id,
            &message.id,
            classification.summary,
            classification.urgency,
            classification.category,
            message.from_address.clone().unwrap_or_default(),
            message.received_at,
        )
        .with_body(message.body.clone(), sanitized);
        if let Some(subject) = &message.subject {
            task = task.with_subject(subject);
        }
        if let Some(confidence) = classification.confidence {
            task = task.with_confidence(confidence);
        }

        match self.db.insert_task(&task).await {
            Ok(()) => {
                info!(
                    tenant = %tenant_id,
                    message_id = %message.id,
                    task_id = %task.id,
                    urgency = %task.urgency,
                    "Task created"
                );
                Ok(MessageOutcome::Created)
            }
            Err(DatabaseError::Constraint(_)) => {
                debug!(tenant = %tenant_id, message_id = %message.id, "Dedup race lost; skipping");
                Ok(MessageOutcome::RaceLost)
            }
            Err(e) => Err(e),
        }
    }
}

/// Spawn the ingestion loop. The first tick runs immediately.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop ticking.
pub fn spawn_ingestion_scheduler(
    scheduler: Arc<IngestionScheduler>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let period = scheduler.config().poll_interval;

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = period.as_secs(),
            lookback_minutes = scheduler.config().lookback_minutes,
            "Ingestion scheduler started"
        );

        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Ingestion scheduler shutting down");
                return;
            }

            scheduler.run_tick().await;
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::error::{LlmError, MailError};
    use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::mail::{MailboxProfile, TokenGrant};
    use crate::store::LibSqlBackend;
    use crate::tasks::model::{TaskFilter, TaskStats, TaskStatus, Urgency};
    use crate::tenants::{Credential, CredentialUpdate, Tenant, TenantOwner};
    use crate::vault::CredentialVault;

    /// Mail provider keyed by access token. Token "broken" fails the fetch.
    #[derive(Default)]
    struct MockMail {
        inbox: Mutex<HashMap<String, Vec<MailMessage>>>,
    }

    impl MockMail {
        fn deliver(&self, token: &str, messages: Vec<MailMessage>) {
            self.inbox.lock().unwrap().insert(token.to_string(), messages);
        }
    }

    #[async_trait]
    impl MailProvider for MockMail {
        async fn try_fetch_recent_messages(
            &self,
            access_token: &str,
            _lookback_minutes: i64,
        ) -> Result<Vec<MailMessage>, MailError> {
            if access_token == "broken" {
                return Err(MailError::Transport("connection refused".into()));
            }
            Ok(self
                .inbox
                .lock()
                .unwrap()
                .get(access_token)
                .cloned()
                .unwrap_or_default())
        }

        async fn refresh_grant(&self, _: &str) -> Result<TokenGrant, MailError> {
            Err(MailError::Refresh("invalid_grant".into()))
        }

        async fn exchange_auth_code(&self, _: &str) -> Result<TokenGrant, MailError> {
            Err(MailError::AuthCode("unused".into()))
        }

        async fn send_message(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), MailError> {
            Ok(())
        }

        async fn mailbox_profile(&self, _: &str) -> Result<MailboxProfile, MailError> {
            Err(MailError::InvalidResponse("unused".into()))
        }

        fn authorization_url(&self, _: &str) -> Result<String, MailError> {
            Ok(String::new())
        }
    }

    /// Summarizes by subject; bodies containing GARBAGE get malformed output.
    struct MockLlm;

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let prompt = &request.messages[1].content;
            let content = if prompt.contains("GARBAGE") {
                "sorry, I cannot help with that".to_string()
            } else {
                let subject = prompt
                    .lines()
                    .find_map(|l| l.strip_prefix("Subject: "))
                    .unwrap_or("?");
                serde_json::json!({
                    "summary": format!("Handle {subject}"),
                    "urgency": "MEDIUM",
                    "category": "operations",
                    "confidence": 0.9
                })
                .to_string()
            };
            Ok(CompletionResponse {
                content,
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    /// Store whose existence check never finds anything, so only the
    /// unique index stands between a message and a second task.
    struct NoLookupStore(Arc<LibSqlBackend>);

    #[async_trait]
    impl Database for NoLookupStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            self.0.run_migrations().await
        }
        async fn create_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError> {
            self.0.create_tenant(tenant).await
        }
        async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, DatabaseError> {
            self.0.get_tenant(id).await
        }
        async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, DatabaseError> {
            self.0.find_tenant_by_name(name).await
        }
        async fn list_tenants_with_credentials(
            &self,
        ) -> Result<Vec<ConnectedTenant>, DatabaseError> {
            self.0.list_tenants_with_credentials().await
        }
        async fn upsert_tenant_owner(&self, owner: &TenantOwner) -> Result<(), DatabaseError> {
            self.0.upsert_tenant_owner(owner).await
        }
        async fn get_tenant_owner(
            &self,
            tenant_id: Uuid,
        ) -> Result<Option<TenantOwner>, DatabaseError> {
            self.0.get_tenant_owner(tenant_id).await
        }
        async fn tenant_owner_index(&self) -> Result<HashMap<Uuid, String>, DatabaseError> {
            self.0.tenant_owner_index().await
        }
        async fn get_credential(&self, tenant_id: Uuid) -> Result<Option<Credential>, DatabaseError> {
            self.0.get_credential(tenant_id).await
        }
        async fn upsert_credential(
            &self,
            tenant_id: Uuid,
            update: &CredentialUpdate,
        ) -> Result<Credential, DatabaseError> {
            self.0.upsert_credential(tenant_id, update).await
        }
        async fn update_credential_if_version(
            &self,
            tenant_id: Uuid,
            expected_version: i64,
            update: &CredentialUpdate,
        ) -> Result<bool, DatabaseError> {
            self.0
                .update_credential_if_version(tenant_id, expected_version, update)
                .await
        }
        async fn delete_credential(&self, tenant_id: Uuid) -> Result<bool, DatabaseError> {
            self.0.delete_credential(tenant_id).await
        }
        async fn task_exists(&self, _dedup_key: &str) -> Result<bool, DatabaseError> {
            Ok(false)
        }
        async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError> {
            self.0.insert_task(task).await
        }
        async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
            self.0.get_task(id).await
        }
        async fn list_tasks(
            &self,
            tenant_id: Uuid,
            filter: &TaskFilter,
            limit: u32,
            offset: u32,
        ) -> Result<Vec<Task>, DatabaseError> {
            self.0.list_tasks(tenant_id, filter, limit, offset).await
        }
        async fn count_tasks(&self, tenant_id: Uuid, filter: &TaskFilter) -> Result<u64, DatabaseError> {
            self.0.count_tasks(tenant_id, filter).await
        }
        async fn task_stats(&self, tenant_id: Uuid) -> Result<TaskStats, DatabaseError> {
            self.0.task_stats(tenant_id).await
        }
        async fn update_task_status(
            &self,
            id: Uuid,
            status: TaskStatus,
        ) -> Result<bool, DatabaseError> {
            self.0.update_task_status(id, status).await
        }
        async fn set_task_completion_message(
            &self,
            id: Uuid,
            message: &str,
        ) -> Result<bool, DatabaseError> {
            self.0.set_task_completion_message(id, message).await
        }
    }

    struct Fixture {
        db: Arc<LibSqlBackend>,
        vault: Arc<CredentialVault>,
        mail: Arc<MockMail>,
        scheduler: Arc<IngestionScheduler>,
    }

    async fn fixture(config: IngestConfig) -> Fixture {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let vault = Arc::new(CredentialVault::new(&[3u8; 32]).unwrap());
        let mail = Arc::new(MockMail::default());
        let tokens = Arc::new(TokenManager::new(db.clone(), vault.clone(), mail.clone()));
        let classifier = Arc::new(TaskClassifier::new(Arc::new(MockLlm)));
        let scheduler = Arc::new(IngestionScheduler::new(
            db.clone(),
            tokens,
            mail.clone(),
            classifier,
            config,
        ));
        Fixture {
            db,
            vault,
            mail,
            scheduler,
        }
    }

    /// Tenant with a stored token valid for an hour and an owner mailbox.
    async fn connected_tenant(f: &Fixture, name: &str, token: &str) -> Tenant {
        let tenant = Tenant::new(name);
        f.db.create_tenant(&tenant).await.unwrap();
        f.db.upsert_tenant_owner(&TenantOwner {
            tenant_id: tenant.id,
            email: format!("owner@{name}.example"),
            display_name: None,
        })
        .await
        .unwrap();
        let update = CredentialUpdate {
            access_token_enc: f.vault.encrypt(token).unwrap(),
            refresh_token_enc: f.vault.encrypt("refresh").unwrap(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        f.db.upsert_credential(tenant.id, &update).await.unwrap();
        tenant
    }

    fn mail(id: &str, from: &str, subject: &str, minutes_ago: i64) -> MailMessage {
        MailMessage {
            id: id.into(),
            subject: Some(subject.into()),
            body: format!("<p>{subject}</p><ul><li>12t</li></ul>"),
            from_address: Some(from.into()),
            from_name: None,
            received_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    async fn tasks_of(f: &Fixture, tenant: &Tenant) -> Vec<Task> {
        f.db.list_tasks(tenant.id, &TaskFilter::default(), 100, 0)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_tasks_and_skips_self_sent() {
        let f = fixture(IngestConfig::default()).await;
        let tenant = connected_tenant(&f, "acme", "token-acme").await;
        f.mail.deliver(
            "token-acme",
            vec![
                mail("m3", "OWNER@acme.example", "Fwd: note to self", 1),
                mail("m2", "client@shipper.example", "Pickup Campinas", 2),
                mail("m1", "client@shipper.example", "Invoice 881", 4),
            ],
        );

        let report = f.scheduler.run_tick().await;
        assert_eq!(report.tenants_total, 1);
        assert_eq!(report.messages_seen, 3);
        assert_eq!(report.tasks_created, 2);
        assert_eq!(report.self_sent_skipped, 1);

        let tasks = tasks_of(&f, &tenant).await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].dedup_key, "m2");
        assert_eq!(tasks[1].dedup_key, "m1");
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));

        let first = &tasks[0];
        assert_eq!(first.summary, "Handle Pickup Campinas");
        assert_eq!(first.urgency, Urgency::Medium);
        assert_eq!(first.category, "OPERATIONS");
        assert_eq!(first.subject.as_deref(), Some("Pickup Campinas"));
        assert_eq!(first.from_address, "client@shipper.example");
        assert_eq!(first.sanitized_body, "Pickup Campinas\n\n• 12t");
        assert!(first.raw_body.starts_with("<p>"));
    }

    #[tokio::test]
    async fn rerun_creates_no_duplicates() {
        let f = fixture(IngestConfig::default()).await;
        let tenant = connected_tenant(&f, "acme", "token-acme").await;
        f.mail.deliver(
            "token-acme",
            vec![mail("m1", "client@shipper.example", "Invoice 881", 1)],
        );

        f.scheduler.run_tick().await;
        let second = f.scheduler.run_tick().await;

        assert_eq!(second.tasks_created, 0);
        assert_eq!(second.duplicates_skipped, 1);
        assert_eq!(tasks_of(&f, &tenant).await.len(), 1);
        assert_eq!(f.scheduler.last_report(), Some(second));
    }

    #[tokio::test]
    async fn unique_index_catches_duplicate_the_lookup_missed() {
        let f = fixture(IngestConfig::default()).await;
        let tenant = connected_tenant(&f, "acme", "token-acme").await;
        f.mail.deliver(
            "token-acme",
            vec![mail("m1", "client@shipper.example", "Invoice 881", 1)],
        );
        let store: Arc<dyn Database> = Arc::new(NoLookupStore(f.db.clone()));
        let tokens = Arc::new(TokenManager::new(store.clone(), f.vault.clone(), f.mail.clone()));
        let scheduler = Arc::new(IngestionScheduler::new(
            store,
            tokens,
            f.mail.clone(),
            Arc::new(TaskClassifier::new(Arc::new(MockLlm))),
            IngestConfig::default(),
        ));

        let first = scheduler.run_tick().await;
        assert_eq!(first.tasks_created, 1);
        let second = scheduler.run_tick().await;
        assert_eq!(second.tasks_created, 0);
        assert_eq!(second.duplicates_skipped, 0);
        assert_eq!(second.races_lost, 1);
        assert_eq!(second.tenants_failed, 0);
        assert_eq!(second.message_failures, 0);
        assert_eq!(tasks_of(&f, &tenant).await.len(), 1);
    }

    #[tokio::test]
    async fn tenant_without_credential_is_skipped() {
        let f = fixture(IngestConfig::default()).await;
        let tenant = Tenant::new("dormant");
        f.db.create_tenant(&tenant).await.unwrap();

        let report = f.scheduler.run_tick().await;
        assert_eq!(report.tenants_total, 1);
        assert_eq!(report.tenants_skipped, 1);
        assert_eq!(report.tenants_failed, 0);
        assert!(tasks_of(&f, &tenant).await.is_empty());
    }

    #[tokio::test]
    async fn expired_token_that_cannot_refresh_is_skipped() {
        let f = fixture(IngestConfig::default()).await;
        let tenant = connected_tenant(&f, "acme", "token-acme").await;
        let update = CredentialUpdate {
            access_token_enc: f.vault.encrypt("token-acme").unwrap(),
            refresh_token_enc: f.vault.encrypt("refresh").unwrap(),
            expires_at: Utc::now() - Duration::minutes(1),
        };
        f.db.upsert_credential(tenant.id, &update).await.unwrap();
        f.mail.deliver(
            "token-acme",
            vec![mail("m1", "client@shipper.example", "Invoice", 1)],
        );

        let report = f.scheduler.run_tick().await;
        assert_eq!(report.tenants_skipped, 1);
        assert!(tasks_of(&f, &tenant).await.is_empty());
    }

    #[tokio::test]
    async fn bad_message_does_not_stop_tenant() {
        let f = fixture(IngestConfig::default()).await;
        let tenant = connected_tenant(&f, "acme", "token-acme").await;
        f.mail.deliver(
            "token-acme",
            vec![
                mail("m2", "client@shipper.example", "GARBAGE", 1),
                mail("m1", "client@shipper.example", "Invoice 881", 2),
            ],
        );

        let report = f.scheduler.run_tick().await;
        assert_eq!(report.classification_failures, 1);
        assert_eq!(report.tasks_created, 1);

        let tasks = tasks_of(&f, &tenant).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].dedup_key, "m1");
    }

    #[tokio::test]
    async fn fetch_failure_is_counted_and_other_tenants_continue() {
        let f = fixture(IngestConfig::default()).await;
        connected_tenant(&f, "broken", "broken").await;
        let healthy = connected_tenant(&f, "acme", "token-acme").await;
        f.mail.deliver(
            "token-acme",
            vec![mail("m1", "client@shipper.example", "Invoice 881", 1)],
        );

        let report = f.scheduler.run_tick().await;
        assert_eq!(report.tenants_total, 2);
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.tasks_created, 1);
        assert_eq!(tasks_of(&f, &healthy).await.len(), 1);
    }

    #[tokio::test]
    async fn bounded_concurrency_processes_every_tenant() {
        let f = fixture(IngestConfig {
            max_concurrent_tenants: 2,
            ..Default::default()
        })
        .await;
        let mut tenants = Vec::new();
        for i in 0..3 {
            let token = format!("token-{i}");
            let tenant = connected_tenant(&f, &format!("t{i}"), &token).await;
            f.mail.deliver(
                &token,
                vec![
                    mail(&format!("t{i}-a"), "client@shipper.example", "A", 1),
                    mail(&format!("t{i}-b"), "client@shipper.example", "B", 2),
                ],
            );
            tenants.push(tenant);
        }

        let report = f.scheduler.run_tick().await;
        assert_eq!(report.tasks_created, 6);
        for tenant in &tenants {
            assert_eq!(tasks_of(&f, tenant).await.len(), 2);
        }
    }

    #[tokio::test]
    async fn spawned_scheduler_ticks_until_stopped() {
        let f = fixture(IngestConfig {
            poll_interval: StdDuration::from_millis(20),
            ..Default::default()
        })
        .await;
        let tenant = connected_tenant(&f, "acme", "token-acme").await;
        f.mail.deliver(
            "token-acme",
            vec![mail("m1", "client@shipper.example", "Invoice 881", 1)],
        );

        let (handle, stop) = spawn_ingestion_scheduler(Arc::clone(&f.scheduler));
        tokio::time::sleep(StdDuration::from_millis(150)).await;
        stop.store(true, Ordering::Relaxed);
        tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        assert!(f.scheduler.last_report().is_some());
        assert_eq!(tasks_of(&f, &tenant).await.len(), 1);
    }
}
