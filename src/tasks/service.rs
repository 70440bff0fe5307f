//! Task operations outside the ingestion path: manual tasks, completion,
//! replies and status notifications.
//!
//! Every outbound send goes through the same `TokenManager` + `MailProvider`
//! path as ingestion.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::mail::MailProvider;
use crate::oauth::TokenManager;
use crate::store::Database;
use crate::tasks::model::{Task, TaskFilter, TaskPage, TaskStats, TaskStatus, Urgency};

/// Largest page `list_tasks` returns.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A task typed in by a user and mailed to `recipient`.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualTaskRequest {
    pub title: String,
    pub category: String,
    pub urgency: Urgency,
    pub recipient: String,
}

/// What happened to the outbound mail of a manual task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    /// The tenant has no valid token; the task exists but nothing was sent.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualTaskOutcome {
    pub task: Task,
    pub send: SendOutcome,
}

pub struct TaskService {
    db: Arc<dyn Database>,
    tokens: Arc<TokenManager>,
    mail: Arc<dyn MailProvider>,
    panel_sender: String,
}

impl TaskService {
    pub fn new(
        db: Arc<dyn Database>,
        tokens: Arc<TokenManager>,
        mail: Arc<dyn MailProvider>,
        panel_sender: impl Into<String>,
    ) -> Self {
        Self {
            db,
            tokens,
            mail,
            panel_sender: panel_sender.into(),
        }
    }

    /// Create a task by hand and mail it to the recipient.
    ///
    /// The task is stored before the send; a missing token or a failed send
    /// is reported in the outcome, not as an error.
    pub async fn submit_manual_task(
        &self,
        tenant_id: Uuid,
        request: ManualTaskRequest,
    ) -> Result<ManualTaskOutcome, TaskError> {
        let title = request.title.trim();
        let recipient = request.recipient.trim();
        if title.is_empty() {
            return Err(TaskError::Invalid("title must not be empty".into()));
        }
        if !recipient.contains('@') {
            return Err(TaskError::Invalid(format!("invalid recipient: {recipient}")));
        }
        if self.db.get_tenant(tenant_id).await?.is_none() {
            return Err(TaskError::TenantNotFound { id: tenant_id });
        }

        let category = match request.category.trim() {
            "" => "GENERAL".to_string(),
            c => c.to_uppercase(),
        };
        let subject = format!("New task: {title}");
        let body = format!(
            "A new task was assigned to you via Mail Tasks.\n\n\
             Title: {title}\n\
             Category: {category}\n\
             Urgency: {}\n\n\
             Please check the panel for details.",
            request.urgency
        );

        let task = Task::new(
            tenant_id,
            format!("manual-{}", Uuid::new_v4()),
            title,
            request.urgency,
            category,
            &self.panel_sender,
            Utc::now(),
        )
        .with_to_address(recipient)
        .with_subject(&subject)
        .with_body(body.clone(), body.clone());
        self.db.insert_task(&task).await?;
        info!(tenant = %tenant_id, task_id = %task.id, "Manual task created");

        let send = match self.tokens.get_valid_access_token(tenant_id).await {
            None => {
                warn!(
                    tenant = %tenant_id,
                    task_id = %task.id,
                    "Tenant has no valid mail connection; task created without sending"
                );
                SendOutcome::Skipped
            }
            Some(token) => match self.mail.send_message(&token, recipient, &subject, &body).await {
                Ok(()) => {
                    info!(task_id = %task.id, to = %recipient, "Manual task mailed");
                    SendOutcome::Sent
                }
                Err(e) => {
                    error!(task_id = %task.id, to = %recipient, error = %e, "Manual task send failed");
                    SendOutcome::Failed(e.to_string())
                }
            },
        };

        Ok(ManualTaskOutcome { task, send })
    }

    /// PENDING → COMPLETED. Completing a completed task returns it unchanged.
    pub async fn mark_completed(&self, task_id: Uuid) -> Result<Task, TaskError> {
        let mut task = self.get_task(task_id).await?;
        if task.complete() {
            self.db
                .update_task_status(task_id, TaskStatus::Completed)
                .await?;
            info!(task_id = %task_id, "Task completed");
        }
        Ok(task)
    }

    /// Reply to the task's sender and remember the reply on the task.
    pub async fn send_reply(&self, task_id: Uuid, message: &str) -> Result<Task, TaskError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(TaskError::Invalid("reply must not be empty".into()));
        }

        let mut task = self.get_task(task_id).await?;
        let subject = format!(
            "Re: {}",
            task.subject.as_deref().unwrap_or(task.summary.as_str())
        );
        self.send_to_sender(&task, &subject, message).await?;

        self.db.set_task_completion_message(task_id, message).await?;
        task.completion_message = Some(message.to_string());
        info!(task_id = %task_id, to = %task.from_address, "Reply sent");
        Ok(task)
    }

    /// Tell the task's sender about a status change.
    pub async fn send_notification(&self, task_id: Uuid, status_text: &str) -> Result<(), TaskError> {
        let status_text = status_text.trim();
        if status_text.is_empty() {
            return Err(TaskError::Invalid("status must not be empty".into()));
        }

        let task = self.get_task(task_id).await?;
        let subject = format!("Task update: {}", task.summary);
        let body = format!(
            "Hello,\n\nThe task you requested by email ({}) is now: {status_text}.\n\nRegards,\nMail Tasks",
            task.subject.as_deref().unwrap_or("no subject"),
        );
        self.send_to_sender(&task, &subject, &body).await?;

        info!(task_id = %task_id, to = %task.from_address, status = status_text, "Notification sent");
        Ok(())
    }

    async fn send_to_sender(&self, task: &Task, subject: &str, body: &str) -> Result<(), TaskError> {
        let token = self
            .tokens
            .get_valid_access_token(task.tenant_id)
            .await
            .ok_or(TaskError::NotConnected {
                tenant: task.tenant_id,
            })?;
        self.mail
            .send_message(&token, &task.from_address, subject, body)
            .await?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task, TaskError> {
        self.db
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound { id: task_id })
    }

    /// One page of a tenant's tasks, newest first. `page` is zero-based.
    pub async fn list_tasks(
        &self,
        tenant_id: Uuid,
        filter: &TaskFilter,
        page: u32,
        page_size: u32,
    ) -> Result<TaskPage, TaskError> {
        let size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = page.saturating_mul(size);
        let tasks = self.db.list_tasks(tenant_id, filter, size, offset).await?;
        let total = self.db.count_tasks(tenant_id, filter).await?;
        Ok(TaskPage::new(tasks, page, size, total))
    }

    pub async fn task_stats(&self, tenant_id: Uuid) -> Result<TaskStats, TaskError> {
        Ok(self.db.task_stats(tenant_id).await?)
    }
}
