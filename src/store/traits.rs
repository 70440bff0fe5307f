//! `Database` trait: single async interface for tenants, credentials and tasks.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::tasks::model::{Task, TaskFilter, TaskStats, TaskStatus};
use crate::tenants::model::{ConnectedTenant, Credential, CredentialUpdate, Tenant, TenantOwner};

/// Backend-agnostic persistence used by the ingestion core and the REST layer.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Tenants ─────────────────────────────────────────────────────

    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError>;

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, DatabaseError>;

    async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, DatabaseError>;

    /// Every tenant, outer-joined with its credential.
    async fn list_tenants_with_credentials(&self) -> Result<Vec<ConnectedTenant>, DatabaseError>;

    /// Insert or replace the owner mailbox of a tenant.
    async fn upsert_tenant_owner(&self, owner: &TenantOwner) -> Result<(), DatabaseError>;

    async fn get_tenant_owner(&self, tenant_id: Uuid) -> Result<Option<TenantOwner>, DatabaseError>;

    /// Tenant id → owner mailbox address, in one query.
    async fn tenant_owner_index(&self) -> Result<HashMap<Uuid, String>, DatabaseError>;

    // ── Credentials ─────────────────────────────────────────────────

    async fn get_credential(&self, tenant_id: Uuid) -> Result<Option<Credential>, DatabaseError>;

    /// Insert or overwrite the tenant's credential, bumping its version.
    async fn upsert_credential(
        &self,
        tenant_id: Uuid,
        update: &CredentialUpdate,
    ) -> Result<Credential, DatabaseError>;

    /// Write only if the stored version still equals `expected_version`.
    /// Returns false when another writer got there first.
    async fn update_credential_if_version(
        &self,
        tenant_id: Uuid,
        expected_version: i64,
        update: &CredentialUpdate,
    ) -> Result<bool, DatabaseError>;

    /// Returns true if a credential was deleted.
    async fn delete_credential(&self, tenant_id: Uuid) -> Result<bool, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Fast-path duplicate check. The unique index is the real guard.
    async fn task_exists(&self, dedup_key: &str) -> Result<bool, DatabaseError>;

    /// Insert a task. A duplicate `dedup_key` fails with `DatabaseError::Constraint`.
    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Tasks of a tenant, newest `received_at` first.
    async fn list_tasks(
        &self,
        tenant_id: Uuid,
        filter: &TaskFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Number of tasks `list_tasks` would return without paging.
    async fn count_tasks(&self, tenant_id: Uuid, filter: &TaskFilter) -> Result<u64, DatabaseError>;

    async fn task_stats(&self, tenant_id: Uuid) -> Result<TaskStats, DatabaseError>;

    /// Returns false if no task has this id.
    async fn update_task_status(&self, id: Uuid, status: TaskStatus) -> Result<bool, DatabaseError>;

    /// Returns false if no task has this id.
    async fn set_task_completion_message(
        &self,
        id: Uuid,
        message: &str,
    ) -> Result<bool, DatabaseError>;
}
