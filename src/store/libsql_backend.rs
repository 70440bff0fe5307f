//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::tasks::model::{Task, TaskFilter, TaskStats, TaskStatus, Urgency};
use crate::tenants::model::{ConnectedTenant, Credential, CredentialUpdate, Tenant, TenantOwner};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so TEXT ordering matches time ordering.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Query(format!("{field} parse: {e}")))
}

fn text(row: &libsql::Row, idx: i32, field: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("{field}: {e}")))
}

fn int(row: &libsql::Row, idx: i32, field: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Query(format!("{field}: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// WHERE clause shared by `list_tasks` and `count_tasks`; binds ?1..?7.
const TASK_FILTER: &str = "tenant_id = ?1 \
     AND (?2 IS NULL OR urgency = ?2) \
     AND (?3 IS NULL OR status = ?3) \
     AND (?4 IS NULL OR category = ?4 COLLATE NOCASE) \
     AND (?5 IS NULL OR summary LIKE ?5 COLLATE NOCASE OR subject LIKE ?5 COLLATE NOCASE) \
     AND (?6 IS NULL OR received_at >= ?6) \
     AND (?7 IS NULL OR received_at < ?7)";

fn filter_params(tenant_id: Uuid, filter: &TaskFilter) -> Vec<libsql::Value> {
    let pattern = filter
        .query
        .as_deref()
        .filter(|q| !q.trim().is_empty())
        .map(|q| format!("%{}%", q.trim()));
    vec![
        libsql::Value::Text(tenant_id.to_string()),
        opt_text(filter.urgency.map(|u| u.as_str())),
        opt_text(filter.status.map(|s| s.as_str())),
        opt_text(filter.category.as_deref()),
        opt_text(pattern.as_deref()),
        opt_text(filter.received_from.as_ref().map(fmt_datetime).as_deref()),
        opt_text(filter.received_before.as_ref().map(fmt_datetime).as_deref()),
    ]
}

fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

/// SQLite reports unique-index violations as "UNIQUE constraint failed: <table>.<col>".
fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

fn row_to_tenant(row: &libsql::Row) -> Result<Tenant, DatabaseError> {
    let id: String = text(row, 0, "tenant.id")?;
    let created: String = text(row, 2, "tenant.created_at")?;
    Ok(Tenant {
        id: parse_uuid(&id, "tenant.id")?,
        name: text(row, 1, "tenant.name")?,
        created_at: parse_datetime(&created),
    })
}

/// Map credential columns starting at `base`.
///
/// Column order matches CREDENTIAL_COLUMNS:
/// +0:tenant_id, +1:access_token_enc, +2:refresh_token_enc, +3:expires_at, +4:version, +5:updated_at
fn row_to_credential(row: &libsql::Row, base: i32) -> Result<Credential, DatabaseError> {
    let tenant_id: String = text(row, base, "credential.tenant_id")?;
    let expires: String = text(row, base + 3, "credential.expires_at")?;
    let updated: String = text(row, base + 5, "credential.updated_at")?;
    Ok(Credential {
        tenant_id: parse_uuid(&tenant_id, "credential.tenant_id")?,
        access_token_enc: text(row, base + 1, "credential.access_token_enc")?,
        refresh_token_enc: text(row, base + 2, "credential.refresh_token_enc")?,
        expires_at: parse_datetime(&expires),
        version: int(row, base + 4, "credential.version")?,
        updated_at: parse_datetime(&updated),
    })
}

/// Map a libsql Row to a Task.
///
/// Column order matches TASK_COLUMNS:
/// 0:id, 1:tenant_id, 2:dedup_key, 3:summary, 4:urgency, 5:category, 6:from_address,
/// 7:to_address, 8:subject, 9:received_at, 10:status, 11:confidence, 12:raw_body,
/// 13:sanitized_body, 14:completion_message, 15:created_at, 16:updated_at
fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let id: String = text(row, 0, "task.id")?;
    let tenant_id: String = text(row, 1, "task.tenant_id")?;

    let urgency_str: String = text(row, 4, "task.urgency")?;
    let urgency: Urgency = urgency_str.parse().unwrap_or(Urgency::Routine);
    let status_str: String = text(row, 10, "task.status")?;
    let status: TaskStatus = status_str.parse().unwrap_or(TaskStatus::Pending);

    let received: String = text(row, 9, "task.received_at")?;
    let created: String = text(row, 15, "task.created_at")?;
    let updated: String = text(row, 16, "task.updated_at")?;

    Ok(Task {
        id: parse_uuid(&id, "task.id")?,
        tenant_id: parse_uuid(&tenant_id, "task.tenant_id")?,
        dedup_key: text(row, 2, "task.dedup_key")?,
        summary: text(row, 3, "task.summary")?,
        urgency,
        category: text(row, 5, "task.category")?,
        from_address: text(row, 6, "task.from_address")?,
        to_address: row.get::<String>(7).ok(),
        subject: row.get::<String>(8).ok(),
        received_at: parse_datetime(&received),
        status,
        confidence: row.get::<f64>(11).ok(),
        raw_body: row.get::<String>(12).unwrap_or_default(),
        sanitized_body: row.get::<String>(13).unwrap_or_default(),
        completion_message: row.get::<String>(14).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const TENANT_COLUMNS: &str = "t.id, t.name, t.created_at";

const CREDENTIAL_COLUMNS: &str =
    "c.tenant_id, c.access_token_enc, c.refresh_token_enc, c.expires_at, c.version, c.updated_at";

const TASK_COLUMNS: &str = "id, tenant_id, dedup_key, summary, urgency, category, from_address, to_address, subject, received_at, status, confidence, raw_body, sanitized_body, completion_message, created_at, updated_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Tenants ─────────────────────────────────────────────────────

    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![
                    tenant.id.to_string(),
                    tenant.name.as_str(),
                    fmt_datetime(&tenant.created_at),
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!("tenant name '{}' taken", tenant.name))
                } else {
                    DatabaseError::Query(format!("create_tenant: {e}"))
                }
            })?;
        debug!(tenant = %tenant.id, name = %tenant.name, "Tenant created");
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TENANT_COLUMNS} FROM tenants t WHERE t.id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_tenant: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_tenant(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_tenant row: {e}"))),
        }
    }

    async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TENANT_COLUMNS} FROM tenants t WHERE t.name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_tenant_by_name: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_tenant(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_tenant_by_name row: {e}"))),
        }
    }

    async fn list_tenants_with_credentials(&self) -> Result<Vec<ConnectedTenant>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TENANT_COLUMNS}, {CREDENTIAL_COLUMNS} \
                     FROM tenants t LEFT JOIN credentials c ON c.tenant_id = t.id \
                     ORDER BY t.created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tenants_with_credentials: {e}")))?;

        let mut tenants = Vec::new();
        loop {
            let row = match rows.next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    return Err(DatabaseError::Query(format!(
                        "list_tenants_with_credentials row: {e}"
                    )));
                }
            };
            let tenant = row_to_tenant(&row)?;
            let has_credential = row.get::<String>(3).is_ok();
            let credential = if has_credential {
                Some(row_to_credential(&row, 3)?)
            } else {
                None
            };
            tenants.push(ConnectedTenant { tenant, credential });
        }
        Ok(tenants)
    }

    async fn upsert_tenant_owner(&self, owner: &TenantOwner) -> Result<(), DatabaseError> {
        let now = fmt_datetime(&Utc::now());
        self.conn()
            .execute(
                "INSERT INTO users (id, tenant_id, email, display_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                    email = excluded.email,
                    display_name = excluded.display_name,
                    updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    owner.tenant_id.to_string(),
                    owner.email.as_str(),
                    opt_text(owner.display_name.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_tenant_owner: {e}")))?;
        debug!(tenant = %owner.tenant_id, email = %owner.email, "Tenant owner saved");
        Ok(())
    }

    async fn get_tenant_owner(&self, tenant_id: Uuid) -> Result<Option<TenantOwner>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT tenant_id, email, display_name FROM users WHERE tenant_id = ?1",
                params![tenant_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_tenant_owner: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(TenantOwner {
                tenant_id,
                email: text(&row, 1, "users.email")?,
                display_name: row.get::<String>(2).ok(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_tenant_owner row: {e}"))),
        }
    }

    async fn tenant_owner_index(&self) -> Result<HashMap<Uuid, String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT tenant_id, email FROM users", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("tenant_owner_index: {e}")))?;

        let mut index = HashMap::new();
        loop {
            let row = match rows.next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    return Err(DatabaseError::Query(format!("tenant_owner_index row: {e}")));
                }
            };
            let tenant: String = text(&row, 0, "users.tenant_id")?;
            let email: String = text(&row, 1, "users.email")?;
            index.insert(parse_uuid(&tenant, "users.tenant_id")?, email);
        }
        Ok(index)
    }

    // ── Credentials ─────────────────────────────────────────────────

    async fn get_credential(&self, tenant_id: Uuid) -> Result<Option<Credential>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials c WHERE c.tenant_id = ?1"),
                params![tenant_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_credential: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_credential(&row, 0)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_credential row: {e}"))),
        }
    }

    async fn upsert_credential(
        &self,
        tenant_id: Uuid,
        update: &CredentialUpdate,
    ) -> Result<Credential, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO credentials (tenant_id, access_token_enc, refresh_token_enc, expires_at, version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                    access_token_enc = excluded.access_token_enc,
                    refresh_token_enc = excluded.refresh_token_enc,
                    expires_at = excluded.expires_at,
                    version = credentials.version + 1,
                    updated_at = excluded.updated_at",
                params![
                    tenant_id.to_string(),
                    update.access_token_enc.as_str(),
                    update.refresh_token_enc.as_str(),
                    fmt_datetime(&update.expires_at),
                    fmt_datetime(&Utc::now()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_credential: {e}")))?;

        self.get_credential(tenant_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "credential".into(),
                id: tenant_id.to_string(),
            })
    }

    async fn update_credential_if_version(
        &self,
        tenant_id: Uuid,
        expected_version: i64,
        update: &CredentialUpdate,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE credentials SET
                    access_token_enc = ?1,
                    refresh_token_enc = ?2,
                    expires_at = ?3,
                    version = version + 1,
                    updated_at = ?4
                 WHERE tenant_id = ?5 AND version = ?6",
                params![
                    update.access_token_enc.as_str(),
                    update.refresh_token_enc.as_str(),
                    fmt_datetime(&update.expires_at),
                    fmt_datetime(&Utc::now()),
                    tenant_id.to_string(),
                    expected_version,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_credential_if_version: {e}")))?;
        Ok(count > 0)
    }

    async fn delete_credential(&self, tenant_id: Uuid) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM credentials WHERE tenant_id = ?1",
                params![tenant_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_credential: {e}")))?;
        Ok(count > 0)
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn task_exists(&self, dedup_key: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM tasks WHERE dedup_key = ?1 LIMIT 1",
                params![dedup_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("task_exists: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("task_exists row: {e}"))),
        }
    }

    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    task.id.to_string(),
                    task.tenant_id.to_string(),
                    task.dedup_key.as_str(),
                    task.summary.as_str(),
                    task.urgency.as_str(),
                    task.category.as_str(),
                    task.from_address.as_str(),
                    opt_text(task.to_address.as_deref()),
                    opt_text(task.subject.as_deref()),
                    fmt_datetime(&task.received_at),
                    task.status.as_str(),
                    opt_real(task.confidence),
                    task.raw_body.as_str(),
                    task.sanitized_body.as_str(),
                    opt_text(task.completion_message.as_deref()),
                    fmt_datetime(&task.created_at),
                    fmt_datetime(&task.updated_at),
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!("dedup_key '{}' already stored", task.dedup_key))
                } else {
                    DatabaseError::Query(format!("insert_task: {e}"))
                }
            })?;
        debug!(id = %task.id, dedup_key = %task.dedup_key, "Task inserted");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task row: {e}"))),
        }
    }

    async fn list_tasks(
        &self,
        tenant_id: Uuid,
        filter: &TaskFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut values = filter_params(tenant_id, filter);
        values.push(libsql::Value::Integer(i64::from(limit)));
        values.push(libsql::Value::Integer(i64::from(offset)));

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE {TASK_FILTER} \
                     ORDER BY received_at DESC, created_at DESC \
                     LIMIT ?8 OFFSET ?9"
                ),
                values,
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;

        let mut tasks = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => tasks.push(row_to_task(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_tasks row: {e}"))),
            }
        }
        Ok(tasks)
    }

    async fn count_tasks(&self, tenant_id: Uuid, filter: &TaskFilter) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT COUNT(*) FROM tasks WHERE {TASK_FILTER}"),
                filter_params(tenant_id, filter),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_tasks: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(int(&row, 0, "count")?.max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_tasks row: {e}"))),
        }
    }

    async fn task_stats(&self, tenant_id: Uuid) -> Result<TaskStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT \
                   COALESCE(SUM(CASE WHEN urgency = 'URGENT' THEN 1 ELSE 0 END), 0), \
                   COALESCE(SUM(CASE WHEN status = 'PENDING' THEN 1 ELSE 0 END), 0), \
                   COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END), 0) \
                 FROM tasks WHERE tenant_id = ?1",
                params![tenant_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("task_stats: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let urgent: i64 = int(&row, 0, "urgent_count")?;
                let pending: i64 = int(&row, 1, "pending_count")?;
                let completed: i64 = int(&row, 2, "completed_count")?;
                Ok(TaskStats {
                    urgent_count: urgent.max(0) as u64,
                    pending_count: pending.max(0) as u64,
                    completed_count: completed.max(0) as u64,
                })
            }
            Ok(None) => Ok(TaskStats::default()),
            Err(e) => Err(DatabaseError::Query(format!("task_stats row: {e}"))),
        }
    }

    async fn update_task_status(&self, id: Uuid, status: TaskStatus) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), fmt_datetime(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task_status: {e}")))?;
        Ok(count > 0)
    }

    async fn set_task_completion_message(
        &self,
        id: Uuid,
        message: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE tasks SET completion_message = ?1, updated_at = ?2 WHERE id = ?3",
                params![message, fmt_datetime(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_task_completion_message: {e}")))?;
        Ok(count > 0)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
