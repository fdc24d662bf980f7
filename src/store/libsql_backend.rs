//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 strings (microseconds, `Z` suffix) so that SQL string
//! comparison orders them chronologically.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, TransactionBehavior, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::contacts::model::{ContactStatus, OutreachContact};
use crate::crawl::model::{CrawlResult, CrawlResultStatus, NewCrawlResult};
use crate::error::{DatabaseError, Error, WorkflowError};
use crate::jobs::model::{CrawlEvent, DomainFilters, Job, JobStatus, NewJob};
use crate::replies::model::{DraftCandidate, DraftSummary, Reply, ReplyStatus};
use crate::store::migrations;
use crate::store::traits::Database;

/// Waiting time for a connection blocked by another connection's write.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// libSQL database backend.
///
/// Single-statement operations share one connection; `libsql::Connection`
/// is `Send + Sync` and safe for concurrent async use. Multi-statement
/// transactions open their own connection so that statements issued by
/// other workers meanwhile cannot join (or be rolled back with) them.
pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Every `:memory:` connection is a separate database, so transactions
    /// stay on the shared connection.
    in_memory: bool,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
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
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy timeout: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            in_memory: false,
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
            in_memory: true,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the shared connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// A connection of its own for one transaction.
    fn tx_conn(&self) -> Result<Connection, DatabaseError> {
        if self.in_memory {
            return Ok(self.conn.clone());
        }
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy timeout: {e}")))?;
        Ok(conn)
    }

    /// Conditional `from -> to` status move on a reply row.
    async fn move_draft(
        &self,
        id: Uuid,
        from: ReplyStatus,
        to: ReplyStatus,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE replies SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), ts(Utc::now()), id.to_string(), from.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("move draft to {}: {e}", to.as_str())))?;
        Ok(affected > 0)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps.
fn ts(dt: DateTime<Utc>) -> String {
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
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("invalid uuid {s:?}: {e}")))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, DatabaseError> {
    s.parse::<T>().map_err(DatabaseError::Serialization)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_integer(v: Option<u8>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(i64::from(v)),
        None => libsql::Value::Null,
    }
}

fn query_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

const JOB_COLUMNS: &str = "id, input_text, filters, status, last_error, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, job_id, is_processing, attempts, progress_updated_at, created_at";

const RESULT_COLUMNS: &str = "id, job_id, url, match_score, matched_snippet, screenshot_path, screenshot_sha256, ots_path, captured_at, status, error";

const CONTACT_COLUMNS: &str = "id, job_id, crawl_result_id, email, status, is_processing, last_reply_text, reply_received_at, created_at, updated_at";

const REPLY_COLUMNS: &str = "id, contact_id, original_reply, llm_draft, final_text, status, created_at, updated_at";

/// Map a libsql Row to a Job. Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("job.id"))?;
    let filters_str: String = row.get(2).map_err(query_err("job.filters"))?;
    let status: String = row.get(3).map_err(query_err("job.status"))?;
    let created: String = row.get(5).map_err(query_err("job.created_at"))?;
    let updated: String = row.get(6).map_err(query_err("job.updated_at"))?;

    let filters: DomainFilters = serde_json::from_str(&filters_str)
        .map_err(|e| DatabaseError::Serialization(format!("job.filters: {e}")))?;

    Ok(Job {
        id: parse_uuid(&id)?,
        input_text: row.get(1).map_err(query_err("job.input_text"))?,
        filters,
        status: parse_enum(&status)?,
        last_error: row.get(4).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order matches EVENT_COLUMNS.
fn row_to_event(row: &libsql::Row) -> Result<CrawlEvent, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("event.id"))?;
    let job_id: String = row.get(1).map_err(query_err("event.job_id"))?;
    let is_processing: i64 = row.get(2).map_err(query_err("event.is_processing"))?;
    let attempts: i64 = row.get(3).map_err(query_err("event.attempts"))?;
    let progress: Option<String> = row.get(4).ok();
    let created: String = row.get(5).map_err(query_err("event.created_at"))?;

    Ok(CrawlEvent {
        id: parse_uuid(&id)?,
        job_id: parse_uuid(&job_id)?,
        is_processing: is_processing != 0,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        progress_updated_at: parse_optional_datetime(&progress),
        created_at: parse_datetime(&created),
    })
}

/// Column order matches RESULT_COLUMNS.
fn row_to_result(row: &libsql::Row) -> Result<CrawlResult, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("result.id"))?;
    let job_id: String = row.get(1).map_err(query_err("result.job_id"))?;
    let score: Option<i64> = row.get(3).ok();
    let captured: String = row.get(8).map_err(query_err("result.captured_at"))?;
    let status: String = row.get(9).map_err(query_err("result.status"))?;

    Ok(CrawlResult {
        id: parse_uuid(&id)?,
        job_id: parse_uuid(&job_id)?,
        url: row.get(2).map_err(query_err("result.url"))?,
        match_score: score.and_then(|s| u8::try_from(s).ok()),
        matched_snippet: row.get(4).ok(),
        screenshot_path: row.get(5).ok(),
        screenshot_sha256: row.get(6).ok(),
        ots_path: row.get(7).ok(),
        captured_at: parse_datetime(&captured),
        status: parse_enum::<CrawlResultStatus>(&status)?,
        error: row.get(10).ok(),
    })
}

/// Column order matches CONTACT_COLUMNS.
fn row_to_contact(row: &libsql::Row) -> Result<OutreachContact, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("contact.id"))?;
    let job_id: String = row.get(1).map_err(query_err("contact.job_id"))?;
    let result_id: String = row.get(2).map_err(query_err("contact.crawl_result_id"))?;
    let status: String = row.get(4).map_err(query_err("contact.status"))?;
    let is_processing: i64 = row.get(5).map_err(query_err("contact.is_processing"))?;
    let received: Option<String> = row.get(7).ok();
    let created: String = row.get(8).map_err(query_err("contact.created_at"))?;
    let updated: String = row.get(9).map_err(query_err("contact.updated_at"))?;

    Ok(OutreachContact {
        id: parse_uuid(&id)?,
        job_id: parse_uuid(&job_id)?,
        crawl_result_id: parse_uuid(&result_id)?,
        email: row.get(3).map_err(query_err("contact.email"))?,
        status: parse_enum(&status)?,
        is_processing: is_processing != 0,
        last_reply_text: row.get(6).ok(),
        reply_received_at: parse_optional_datetime(&received),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order matches REPLY_COLUMNS.
fn row_to_reply(row: &libsql::Row) -> Result<Reply, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("reply.id"))?;
    let contact_id: String = row.get(1).map_err(query_err("reply.contact_id"))?;
    let status: String = row.get(5).map_err(query_err("reply.status"))?;
    let created: String = row.get(6).map_err(query_err("reply.created_at"))?;
    let updated: String = row.get(7).map_err(query_err("reply.updated_at"))?;

    Ok(Reply {
        id: parse_uuid(&id)?,
        contact_id: parse_uuid(&contact_id)?,
        original_reply: row.get(2).map_err(query_err("reply.original_reply"))?,
        llm_draft: row.get(3).map_err(query_err("reply.llm_draft"))?,
        final_text: row.get(4).ok(),
        status: parse_enum::<ReplyStatus>(&status)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// SQL list of the statuses that accept an inbound reply, e.g. `'NOT_CONTACTED','SENT_1ST_MAIL'`.
fn reply_accepting_statuses() -> String {
    ContactStatus::ALL
        .iter()
        .filter(|s| s.accepts_reply())
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn create_job(&self, job: &NewJob) -> Result<Job, DatabaseError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let filters = serde_json::to_string(&job.filters)
            .map_err(|e| DatabaseError::Serialization(format!("create_job filters: {e}")))?;
        let test_email = job
            .test_email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());

        let tx = self
            .tx_conn()?
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(query_err("create_job begin"))?;

        tx.execute(
            "INSERT INTO jobs (id, input_text, filters, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                id.to_string(),
                job.input_text.clone(),
                filters,
                JobStatus::Pending.as_str(),
                ts(now),
            ],
        )
        .await
        .map_err(query_err("create_job insert job"))?;

        tx.execute(
            "INSERT INTO crawl_events (id, job_id, is_processing, attempts, created_at) VALUES (?1, ?2, 0, 0, ?3)",
            params![Uuid::new_v4().to_string(), id.to_string(), ts(now)],
        )
        .await
        .map_err(query_err("create_job insert event"))?;

        if let Some(ref email) = test_email {
            tx.execute(
                "INSERT INTO test_email_map (job_id, email) VALUES (?1, ?2)",
                params![id.to_string(), email.clone()],
            )
            .await
            .map_err(query_err("create_job insert test email"))?;
        }

        tx.commit().await.map_err(query_err("create_job commit"))?;

        info!(job_id = %id, dry_run = test_email.is_some(), "Job created");
        Ok(Job {
            id,
            input_text: job.input_text.clone(),
            filters: job.filters.clone(),
            status: JobStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_job"))?;

        match rows.next().await.map_err(query_err("get_job"))? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_job_status(&self, id: Uuid, to: JobStatus, note: Option<&str>) -> Result<(), Error> {
        let job = self
            .get_job(id)
            .await?
            .ok_or(WorkflowError::NotFound { entity: "job", id })?;

        if job.status == to {
            return Ok(());
        }
        if !job.status.can_transition_to(to) {
            return Err(WorkflowError::InvalidTransition {
                entity: "job",
                id,
                from: job.status.to_string(),
                to: to.to_string(),
            }
            .into());
        }

        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, last_error = COALESCE(?2, last_error), updated_at = ?3 WHERE id = ?4 AND status = ?5",
                params![
                    to.as_str(),
                    opt_text(note),
                    ts(Utc::now()),
                    id.to_string(),
                    job.status.as_str(),
                ],
            )
            .await
            .map_err(query_err("update_job_status"))?;

        if affected == 0 {
            return Err(WorkflowError::LeaseLost {
                entity: "job",
                id,
                expected: job.status.to_string(),
            }
            .into());
        }

        debug!(job_id = %id, from = %job.status, to = %to, "Job status updated");
        Ok(())
    }

    async fn get_test_email(&self, job_id: Uuid) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT email FROM test_email_map WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(query_err("get_test_email"))?;

        match rows.next().await.map_err(query_err("get_test_email"))? {
            Some(row) => Ok(row.get::<String>(0).ok()),
            None => Ok(None),
        }
    }

    // ── Crawl events ────────────────────────────────────────────────

    async fn claim_crawl_event(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<CrawlEvent>, DatabaseError> {
        // Single statement: the inner select and the guarded update run
        // atomically, so two workers can never both flip the same row.
        let sql = format!(
            "UPDATE crawl_events
                SET is_processing = 1, progress_updated_at = ?1, attempts = attempts + 1
              WHERE id = (
                    SELECT id FROM crawl_events
                     WHERE is_processing = 0 OR progress_updated_at IS NULL OR progress_updated_at < ?2
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1)
                AND (is_processing = 0 OR progress_updated_at IS NULL OR progress_updated_at < ?2)
            RETURNING {EVENT_COLUMNS}"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![ts(Utc::now()), ts(stale_before)])
            .await
            .map_err(query_err("claim_crawl_event"))?;

        match rows.next().await.map_err(query_err("claim_crawl_event"))? {
            Some(row) => {
                let event = row_to_event(&row)?;
                debug!(event_id = %event.id, job_id = %event.job_id, attempts = event.attempts, "Crawl event claimed");
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    async fn touch_crawl_event(&self, id: Uuid, lease: u32) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE crawl_events SET progress_updated_at = ?1
                  WHERE id = ?2 AND attempts = ?3 AND is_processing = 1",
                params![ts(Utc::now()), id.to_string(), i64::from(lease)],
            )
            .await
            .map_err(query_err("touch_crawl_event"))?;
        Ok(affected > 0)
    }

    async fn release_crawl_event(&self, id: Uuid, lease: u32) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE crawl_events SET is_processing = 0, progress_updated_at = ?1
                  WHERE id = ?2 AND attempts = ?3 AND is_processing = 1",
                params![ts(Utc::now()), id.to_string(), i64::from(lease)],
            )
            .await
            .map_err(query_err("release_crawl_event"))?;
        Ok(affected > 0)
    }

    async fn delete_crawl_event(&self, id: Uuid, lease: u32) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM crawl_events WHERE id = ?1 AND attempts = ?2",
                params![id.to_string(), i64::from(lease)],
            )
            .await
            .map_err(query_err("delete_crawl_event"))?;
        Ok(affected > 0)
    }

    async fn count_crawl_events(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM crawl_events", ())
            .await
            .map_err(query_err("count_crawl_events"))?;
        match rows.next().await.map_err(query_err("count_crawl_events"))? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(query_err("count_crawl_events"))?;
                Ok(count.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    // ── Crawl results ───────────────────────────────────────────────

    async fn insert_crawl_result(&self, result: &NewCrawlResult) -> Result<CrawlResult, DatabaseError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO crawl_results ({RESULT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    id.to_string(),
                    result.job_id.to_string(),
                    result.url.clone(),
                    opt_integer(result.match_score),
                    opt_text(result.matched_snippet.as_deref()),
                    opt_text(result.screenshot_path.as_deref()),
                    opt_text(result.screenshot_sha256.as_deref()),
                    opt_text(result.ots_path.as_deref()),
                    ts(result.captured_at),
                    result.status.as_str(),
                    opt_text(result.error.as_deref()),
                ],
            )
            .await
            .map_err(query_err("insert_crawl_result"))?;

        debug!(result_id = %id, url = %result.url, status = result.status.as_str(), "Crawl result stored");
        Ok(CrawlResult {
            id,
            job_id: result.job_id,
            url: result.url.clone(),
            match_score: result.match_score,
            matched_snippet: result.matched_snippet.clone(),
            screenshot_path: result.screenshot_path.clone(),
            screenshot_sha256: result.screenshot_sha256.clone(),
            ots_path: result.ots_path.clone(),
            captured_at: result.captured_at,
            status: result.status,
            error: result.error.clone(),
        })
    }

    async fn get_crawl_result(&self, id: Uuid) -> Result<Option<CrawlResult>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RESULT_COLUMNS} FROM crawl_results WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_crawl_result"))?;

        match rows.next().await.map_err(query_err("get_crawl_result"))? {
            Some(row) => Ok(Some(row_to_result(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_crawl_results(&self, job_id: Uuid) -> Result<Vec<CrawlResult>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM crawl_results WHERE job_id = ?1 ORDER BY captured_at ASC"
                ),
                params![job_id.to_string()],
            )
            .await
            .map_err(query_err("list_crawl_results"))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_crawl_results"))? {
            results.push(row_to_result(&row)?);
        }
        Ok(results)
    }

    // ── Outreach contacts ───────────────────────────────────────────

    async fn insert_contacts(
        &self,
        job_id: Uuid,
        crawl_result_id: Uuid,
        emails: &[String],
    ) -> Result<Vec<OutreachContact>, DatabaseError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let tx = self
            .tx_conn()?
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(query_err("insert_contacts begin"))?;

        let mut inserted = Vec::with_capacity(emails.len());
        for email in emails {
            let id = Uuid::new_v4();
            let affected = tx
                .execute(
                    "INSERT OR IGNORE INTO outreach_contacts (id, job_id, crawl_result_id, email, status, is_processing, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
                    params![
                        id.to_string(),
                        job_id.to_string(),
                        crawl_result_id.to_string(),
                        email.clone(),
                        ContactStatus::NotContacted.as_str(),
                        ts(now),
                    ],
                )
                .await
                .map_err(query_err("insert_contacts"))?;

            if affected > 0 {
                inserted.push(OutreachContact {
                    id,
                    job_id,
                    crawl_result_id,
                    email: email.clone(),
                    status: ContactStatus::NotContacted,
                    is_processing: false,
                    last_reply_text: None,
                    reply_received_at: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        tx.commit().await.map_err(query_err("insert_contacts commit"))?;
        debug!(%job_id, %crawl_result_id, count = inserted.len(), "Contacts stored");
        Ok(inserted)
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<OutreachContact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM outreach_contacts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_contact"))?;

        match rows.next().await.map_err(query_err("get_contact"))? {
            Some(row) => Ok(Some(row_to_contact(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_contacts_for_job(&self, job_id: Uuid) -> Result<Vec<OutreachContact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM outreach_contacts WHERE job_id = ?1 ORDER BY created_at ASC, email ASC"
                ),
                params![job_id.to_string()],
            )
            .await
            .map_err(query_err("list_contacts_for_job"))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_contacts_for_job"))? {
            contacts.push(row_to_contact(&row)?);
        }
        Ok(contacts)
    }

    async fn claim_due_contacts(
        &self,
        status: ContactStatus,
        updated_before: DateTime<Utc>,
        lease_stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutreachContact>, DatabaseError> {
        let sql = format!(
            "UPDATE outreach_contacts
                SET is_processing = 1, leased_at = ?1
              WHERE id IN (
                    SELECT id FROM outreach_contacts
                     WHERE status = ?2
                       AND updated_at <= ?3
                       AND (is_processing = 0 OR leased_at IS NULL OR leased_at < ?4)
                     ORDER BY updated_at ASC
                     LIMIT ?5)
                AND status = ?2
                AND (is_processing = 0 OR leased_at IS NULL OR leased_at < ?4)
            RETURNING {CONTACT_COLUMNS}"
        );
        let mut rows = self
            .conn()
            .query(
                &sql,
                params![
                    ts(Utc::now()),
                    status.as_str(),
                    ts(updated_before),
                    ts(lease_stale_before),
                    limit as i64,
                ],
            )
            .await
            .map_err(query_err("claim_due_contacts"))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("claim_due_contacts"))? {
            contacts.push(row_to_contact(&row)?);
        }
        contacts.sort_by_key(|c| c.updated_at);
        Ok(contacts)
    }

    async fn transition_contact(&self, id: Uuid, from: ContactStatus, to: ContactStatus) -> Result<(), Error> {
        if !from.can_transition_to(to) {
            return Err(WorkflowError::InvalidTransition {
                entity: "contact",
                id,
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }

        let affected = self
            .conn()
            .execute(
                "UPDATE outreach_contacts SET status = ?1, is_processing = 0, leased_at = NULL, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), ts(Utc::now()), id.to_string(), from.as_str()],
            )
            .await
            .map_err(query_err("transition_contact"))?;

        if affected == 0 {
            return match self.get_contact(id).await? {
                None => Err(WorkflowError::NotFound { entity: "contact", id }.into()),
                Some(_) => Err(WorkflowError::LeaseLost {
                    entity: "contact",
                    id,
                    expected: from.to_string(),
                }
                .into()),
            };
        }

        debug!(contact_id = %id, %from, %to, "Contact advanced");
        Ok(())
    }

    async fn release_contact(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE outreach_contacts SET is_processing = 0, leased_at = NULL WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(query_err("release_contact"))?;
        Ok(())
    }

    async fn record_reply(
        &self,
        email: &str,
        body: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let sql = format!(
            "UPDATE outreach_contacts
                SET status = ?1, last_reply_text = ?2, reply_received_at = ?3,
                    is_processing = 0, leased_at = NULL, updated_at = ?4
              WHERE email = ?5 AND status IN ({})
            RETURNING id",
            reply_accepting_statuses()
        );
        let mut rows = self
            .conn()
            .query(
                &sql,
                params![
                    ContactStatus::Replied.as_str(),
                    body.to_string(),
                    ts(received_at),
                    ts(Utc::now()),
                    email.to_string(),
                ],
            )
            .await
            .map_err(query_err("record_reply"))?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("record_reply"))? {
            let id: String = row.get(0).map_err(query_err("record_reply id"))?;
            ids.push(parse_uuid(&id)?);
        }
        Ok(ids)
    }

    // ── Reply drafts ────────────────────────────────────────────────

    async fn contacts_awaiting_draft(&self, limit: usize) -> Result<Vec<DraftCandidate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT c.id, c.email, c.last_reply_text, r.matched_snippet
                   FROM outreach_contacts c
                   LEFT JOIN crawl_results r ON r.id = c.crawl_result_id
                  WHERE c.status = ?1
                    AND NOT EXISTS (
                        SELECT 1 FROM replies p
                         WHERE p.contact_id = c.id
                           AND (p.status IN (?2, ?3)
                                OR (p.status = ?4 AND p.created_at >= COALESCE(c.reply_received_at, ''))))
                  ORDER BY c.updated_at ASC
                  LIMIT ?5",
                params![
                    ContactStatus::Replied.as_str(),
                    ReplyStatus::Drafted.as_str(),
                    ReplyStatus::Sending.as_str(),
                    ReplyStatus::Sent.as_str(),
                    limit as i64,
                ],
            )
            .await
            .map_err(query_err("contacts_awaiting_draft"))?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("contacts_awaiting_draft"))? {
            let id: String = row.get(0).map_err(query_err("contacts_awaiting_draft id"))?;
            candidates.push(DraftCandidate {
                contact_id: parse_uuid(&id)?,
                email: row.get(1).map_err(query_err("contacts_awaiting_draft email"))?,
                reply_text: row.get(2).ok(),
                matched_snippet: row.get(3).ok(),
            });
        }
        Ok(candidates)
    }

    async fn insert_draft(
        &self,
        contact_id: Uuid,
        original_reply: &str,
        llm_draft: &str,
    ) -> Result<Reply, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO replies (id, contact_id, original_reply, llm_draft, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id.to_string(),
                    contact_id.to_string(),
                    original_reply.to_string(),
                    llm_draft.to_string(),
                    ReplyStatus::Drafted.as_str(),
                    ts(now),
                ],
            )
            .await
            .map_err(query_err("insert_draft"))?;

        Ok(Reply {
            id,
            contact_id,
            original_reply: original_reply.to_string(),
            llm_draft: llm_draft.to_string(),
            final_text: None,
            status: ReplyStatus::Drafted,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_reply(&self, id: Uuid) -> Result<Option<Reply>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {REPLY_COLUMNS} FROM replies WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_reply"))?;

        match rows.next().await.map_err(query_err("get_reply"))? {
            Some(row) => Ok(Some(row_to_reply(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_drafts(&self, limit: usize) -> Result<Vec<DraftSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT p.id, c.email, p.original_reply, p.llm_draft, p.created_at
                   FROM replies p
                   JOIN outreach_contacts c ON c.id = p.contact_id
                  WHERE p.status = ?1
                  ORDER BY p.created_at DESC
                  LIMIT ?2",
                params![ReplyStatus::Drafted.as_str(), limit as i64],
            )
            .await
            .map_err(query_err("list_drafts"))?;

        let mut drafts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_drafts"))? {
            let id: String = row.get(0).map_err(query_err("list_drafts id"))?;
            let created: String = row.get(4).map_err(query_err("list_drafts created_at"))?;
            drafts.push(DraftSummary {
                draft_id: parse_uuid(&id)?,
                email: row.get(1).map_err(query_err("list_drafts email"))?,
                reply_text: row.get(2).map_err(query_err("list_drafts reply"))?,
                draft_text: row.get(3).map_err(query_err("list_drafts draft"))?,
                generated_at: parse_datetime(&created),
            });
        }
        Ok(drafts)
    }

    async fn claim_draft(&self, id: Uuid) -> Result<Option<Reply>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE replies SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4
                     RETURNING {REPLY_COLUMNS}"
                ),
                params![
                    ReplyStatus::Sending.as_str(),
                    ts(Utc::now()),
                    id.to_string(),
                    ReplyStatus::Drafted.as_str(),
                ],
            )
            .await
            .map_err(query_err("claim_draft"))?;

        match rows.next().await.map_err(query_err("claim_draft"))? {
            Some(row) => Ok(Some(row_to_reply(&row)?)),
            None => Ok(None),
        }
    }

    async fn release_draft(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.move_draft(id, ReplyStatus::Sending, ReplyStatus::Drafted).await
    }

    async fn mark_draft_sent(&self, id: Uuid, final_text: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE replies SET status = ?1, final_text = ?2, updated_at = ?3 WHERE id = ?4 AND status = ?5",
                params![
                    ReplyStatus::Sent.as_str(),
                    final_text.to_string(),
                    ts(Utc::now()),
                    id.to_string(),
                    ReplyStatus::Sending.as_str(),
                ],
            )
            .await
            .map_err(query_err("mark_draft_sent"))?;
        Ok(affected > 0)
    }

    async fn mark_draft_rejected(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.move_draft(id, ReplyStatus::Drafted, ReplyStatus::Rejected).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn matched(job_id: Uuid) -> NewCrawlResult {
        NewCrawlResult {
            job_id,
            url: "https://copy.example/page".into(),
            match_score: Some(92),
            matched_snippet: Some("the quick brown fox".into()),
            screenshot_path: Some("/shared/images/screenshot_1.png".into()),
            screenshot_sha256: Some("ab".repeat(32)),
            ots_path: Some("/shared/ots/screenshot_1.ots".into()),
            captured_at: Utc::now(),
            status: CrawlResultStatus::Matched,
            error: None,
        }
    }

    /// A job with one matched result and the given contacts.
    async fn seeded(db: &LibSqlBackend, emails: &[&str]) -> (Job, CrawlResult, Vec<OutreachContact>) {
        let job = db.create_job(&NewJob::new("the quick brown fox")).await.unwrap();
        let result = db.insert_crawl_result(&matched(job.id)).await.unwrap();
        let emails: Vec<String> = emails.iter().map(|e| e.to_string()).collect();
        let contacts = db.insert_contacts(job.id, result.id, &emails).await.unwrap();
        (job, result, contacts)
    }

    #[tokio::test]
    async fn file_transactions_run_apart_from_the_shared_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_local(&dir.path().join("takedown.db")).await.unwrap();
        let (job, result, _) = seeded(&db, &["owner@site.com"]).await;

        let tx = db.tx_conn().unwrap().transaction().await.unwrap();
        tx.execute(
            "UPDATE jobs SET last_error = 'uncommitted' WHERE id = ?1",
            params![job.id.to_string()],
        )
        .await
        .unwrap();
        assert!(db.get_job(job.id).await.unwrap().unwrap().last_error.is_none());
        tx.rollback().await.unwrap();

        let more = db
            .insert_contacts(job.id, result.id, &["legal@site.com".to_string()])
            .await
            .unwrap();
        assert_eq!(more.len(), 1);
        assert_eq!(db.list_contacts_for_job(job.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_job_enqueues_event_and_override() {
        let db = backend().await;
        let job = db
            .create_job(&NewJob::new("poem").with_test_email("  QA@Example.com "))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(db.count_crawl_events().await.unwrap(), 1);
        assert_eq!(
            db.get_test_email(job.id).await.unwrap().as_deref(),
            Some("qa@example.com")
        );

        let loaded = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.input_text, "poem");
        assert_eq!(loaded.filters, DomainFilters::default());
    }

    #[tokio::test]
    async fn job_without_override_has_none() {
        let db = backend().await;
        let job = db.create_job(&NewJob::new("poem")).await.unwrap();
        assert!(db.get_test_email(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_status_rejects_illegal_transition() {
        let db = backend().await;
        let job = db.create_job(&NewJob::new("poem")).await.unwrap();

        let err = db
            .update_job_status(job.id, JobStatus::Crawled, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Workflow(WorkflowError::InvalidTransition { .. })
        ));

        db.update_job_status(job.id, JobStatus::Crawling, None).await.unwrap();
        db.update_job_status(job.id, JobStatus::Crawling, None).await.unwrap();
        db.update_job_status(job.id, JobStatus::DeadLettered, Some("too many attempts"))
            .await
            .unwrap();

        let loaded = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::DeadLettered);
        assert_eq!(loaded.last_error.as_deref(), Some("too many attempts"));
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_one_lease() {
        let db = backend().await;
        db.create_job(&NewJob::new("poem")).await.unwrap();
        let stale = Utc::now() - Duration::minutes(5);

        let (a, b) = tokio::join!(db.claim_crawl_event(stale), db.claim_crawl_event(stale));
        let winners = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn stale_lease_is_reclaimable() {
        let db = backend().await;
        db.create_job(&NewJob::new("poem")).await.unwrap();

        let first = db
            .claim_crawl_event(Utc::now() - Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.attempts, 1);
        assert!(first.is_processing);

        // Fresh heartbeat: not reclaimable.
        assert!(
            db.claim_crawl_event(Utc::now() - Duration::minutes(5))
                .await
                .unwrap()
                .is_none()
        );

        // Heartbeat older than the cutoff: reclaimed with a bumped attempt count.
        let second = db
            .claim_crawl_event(Utc::now() + Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);
    }

    #[tokio::test]
    async fn released_event_is_claimable_again() {
        let db = backend().await;
        db.create_job(&NewJob::new("poem")).await.unwrap();
        let stale = Utc::now() - Duration::minutes(5);

        let event = db.claim_crawl_event(stale).await.unwrap().unwrap();
        assert!(db.touch_crawl_event(event.id, event.attempts).await.unwrap());
        assert!(db.release_crawl_event(event.id, event.attempts).await.unwrap());
        assert!(!db.touch_crawl_event(event.id, event.attempts).await.unwrap());

        let again = db.claim_crawl_event(stale).await.unwrap().unwrap();
        assert_eq!(again.id, event.id);

        assert!(db.delete_crawl_event(again.id, again.attempts).await.unwrap());
        assert_eq!(db.count_crawl_events().await.unwrap(), 0);
        assert!(db.claim_crawl_event(stale).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reclaimed_lease_rejects_the_previous_holder() {
        let db = backend().await;
        db.create_job(&NewJob::new("poem")).await.unwrap();

        let first = db.claim_crawl_event(Utc::now()).await.unwrap().unwrap();
        let second = db
            .claim_crawl_event(Utc::now() + Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.id, first.id);

        assert!(!db.touch_crawl_event(first.id, first.attempts).await.unwrap());
        assert!(!db.release_crawl_event(first.id, first.attempts).await.unwrap());
        assert!(!db.delete_crawl_event(first.id, first.attempts).await.unwrap());

        // Still held by the second claimant.
        assert!(db.claim_crawl_event(Utc::now() - Duration::minutes(5)).await.unwrap().is_none());
        assert!(db.touch_crawl_event(second.id, second.attempts).await.unwrap());
        assert_eq!(db.count_crawl_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn crawl_results_round_trip() {
        let db = backend().await;
        let job = db.create_job(&NewJob::new("poem")).await.unwrap();
        let stored = db.insert_crawl_result(&matched(job.id)).await.unwrap();
        let error = db
            .insert_crawl_result(&NewCrawlResult::error(job.id, "https://down.example", "timeout"))
            .await
            .unwrap();

        let loaded = db.get_crawl_result(stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.match_score, Some(92));
        assert_eq!(loaded.status, CrawlResultStatus::Matched);

        let loaded_error = db.get_crawl_result(error.id).await.unwrap().unwrap();
        assert_eq!(loaded_error.status, CrawlResultStatus::Error);
        assert_eq!(loaded_error.match_score, None);
        assert_eq!(loaded_error.error.as_deref(), Some("timeout"));

        assert_eq!(db.list_crawl_results(job.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn insert_contacts_skips_duplicates() {
        let db = backend().await;
        let (job, result, contacts) = seeded(&db, &["a@x.com", "b@x.com"]).await;
        assert_eq!(contacts.len(), 2);

        let again = db
            .insert_contacts(job.id, result.id, &["a@x.com".to_string(), "c@x.com".to_string()])
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].email, "c@x.com");
        assert_eq!(db.list_contacts_for_job(job.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dwell_gates_contact_claims() {
        let db = backend().await;
        let (_, _, contacts) = seeded(&db, &["a@x.com"]).await;
        let lease_cutoff = Utc::now() - Duration::minutes(30);

        // Changed just now; a one-day dwell is not yet satisfied.
        let early = db
            .claim_due_contacts(
                ContactStatus::NotContacted,
                Utc::now() - Duration::days(1),
                lease_cutoff,
                20,
            )
            .await
            .unwrap();
        assert!(early.is_empty());

        let due = db
            .claim_due_contacts(
                ContactStatus::NotContacted,
                Utc::now() + Duration::seconds(1),
                lease_cutoff,
                20,
            )
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, contacts[0].id);
        assert!(due[0].is_processing);

        // Leased: a second claim sees nothing.
        let leased = db
            .claim_due_contacts(
                ContactStatus::NotContacted,
                Utc::now() + Duration::seconds(1),
                lease_cutoff,
                20,
            )
            .await
            .unwrap();
        assert!(leased.is_empty());
    }

    #[tokio::test]
    async fn claim_respects_limit() {
        let db = backend().await;
        seeded(&db, &["a@x.com", "b@x.com", "c@x.com"]).await;
        let claimed = db
            .claim_due_contacts(
                ContactStatus::NotContacted,
                Utc::now() + Duration::seconds(1),
                Utc::now() - Duration::minutes(30),
                2,
            )
            .await
            .unwrap();
        assert_eq!(claimed.len(), 2);
    }

    #[tokio::test]
    async fn transition_is_conditional_on_current_status() {
        let db = backend().await;
        let (_, _, contacts) = seeded(&db, &["a@x.com"]).await;
        let id = contacts[0].id;

        db.transition_contact(id, ContactStatus::NotContacted, ContactStatus::Sent1stMail)
            .await
            .unwrap();

        let stale = db
            .transition_contact(id, ContactStatus::NotContacted, ContactStatus::Sent1stMail)
            .await
            .unwrap_err();
        assert!(matches!(stale, Error::Workflow(WorkflowError::LeaseLost { .. })));

        let skip = db
            .transition_contact(id, ContactStatus::Sent1stMail, ContactStatus::Sent3rdMail)
            .await
            .unwrap_err();
        assert!(matches!(
            skip,
            Error::Workflow(WorkflowError::InvalidTransition { .. })
        ));

        let missing = db
            .transition_contact(Uuid::new_v4(), ContactStatus::Sent1stMail, ContactStatus::Sent2ndMail)
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::Workflow(WorkflowError::NotFound { .. })));

        let loaded = db.get_contact(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContactStatus::Sent1stMail);
        assert!(!loaded.is_processing);
    }

    #[tokio::test]
    async fn record_reply_matches_exact_address_only() {
        let db = backend().await;
        let (_, _, contacts) = seeded(&db, &["owner@site.com", "other@site.com"]).await;

        let ids = db
            .record_reply("owner@site.com", "please stop", Utc::now())
            .await
            .unwrap();
        assert_eq!(ids, vec![contacts[0].id]);

        let none = db
            .record_reply("stranger@elsewhere.com", "hi", Utc::now())
            .await
            .unwrap();
        assert!(none.is_empty());

        let replied = db.get_contact(contacts[0].id).await.unwrap().unwrap();
        assert_eq!(replied.status, ContactStatus::Replied);
        assert_eq!(replied.last_reply_text.as_deref(), Some("please stop"));
        assert!(replied.reply_received_at.is_some());

        let untouched = db.get_contact(contacts[1].id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ContactStatus::NotContacted);
    }

    #[tokio::test]
    async fn record_reply_skips_terminal_contacts() {
        let db = backend().await;
        let (_, _, contacts) = seeded(&db, &["owner@site.com"]).await;
        db.transition_contact(contacts[0].id, ContactStatus::NotContacted, ContactStatus::Bounced)
            .await
            .unwrap();

        let ids = db
            .record_reply("owner@site.com", "late reply", Utc::now())
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn draft_lifecycle() {
        let db = backend().await;
        let (_, _, contacts) = seeded(&db, &["owner@site.com"]).await;
        let contact = &contacts[0];
        db.record_reply("owner@site.com", "I took it down", Utc::now())
            .await
            .unwrap();

        let waiting = db.contacts_awaiting_draft(10).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].contact_id, contact.id);
        assert_eq!(waiting[0].reply_text.as_deref(), Some("I took it down"));
        assert_eq!(waiting[0].matched_snippet.as_deref(), Some("the quick brown fox"));

        let draft = db
            .insert_draft(contact.id, "I took it down", "Thank you.")
            .await
            .unwrap();
        assert!(db.contacts_awaiting_draft(10).await.unwrap().is_empty());

        let listed = db.list_drafts(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].draft_id, draft.id);
        assert_eq!(listed[0].email, "owner@site.com");

        // Only sendable once claimed, and only one claimant wins.
        assert!(!db.mark_draft_sent(draft.id, "Thanks!").await.unwrap());
        let claimed = db.claim_draft(draft.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, ReplyStatus::Sending);
        assert!(db.claim_draft(draft.id).await.unwrap().is_none());
        assert!(!db.mark_draft_rejected(draft.id).await.unwrap());
        assert!(db.list_drafts(10).await.unwrap().is_empty());
        assert!(db.contacts_awaiting_draft(10).await.unwrap().is_empty());

        assert!(db.mark_draft_sent(draft.id, "Thanks!").await.unwrap());
        assert!(!db.mark_draft_sent(draft.id, "Thanks!").await.unwrap());
        assert!(!db.release_draft(draft.id).await.unwrap());

        let stored = db.get_reply(draft.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReplyStatus::Sent);
        assert_eq!(stored.final_text.as_deref(), Some("Thanks!"));
        assert!(db.list_drafts(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn released_draft_is_pending_again() {
        let db = backend().await;
        let (_, _, contacts) = seeded(&db, &["owner@site.com"]).await;
        let draft = db.insert_draft(contacts[0].id, "ok", "Thank you.").await.unwrap();

        db.claim_draft(draft.id).await.unwrap().unwrap();
        assert!(db.release_draft(draft.id).await.unwrap());

        assert_eq!(db.get_reply(draft.id).await.unwrap().unwrap().status, ReplyStatus::Drafted);
        assert_eq!(db.list_drafts(10).await.unwrap().len(), 1);
        assert!(db.claim_draft(draft.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejected_draft_allows_regeneration() {
        let db = backend().await;
        seeded(&db, &["owner@site.com"]).await;
        db.record_reply("owner@site.com", "who are you", Utc::now())
            .await
            .unwrap();
        let candidate = db.contacts_awaiting_draft(10).await.unwrap().remove(0);

        let draft = db
            .insert_draft(candidate.contact_id, "who are you", "We represent the author.")
            .await
            .unwrap();
        assert!(db.mark_draft_rejected(draft.id).await.unwrap());

        assert_eq!(db.contacts_awaiting_draft(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_drafts_is_newest_first_and_limited() {
        let db = backend().await;
        let (_, _, contacts) = seeded(&db, &["a@x.com", "b@x.com", "c@x.com"]).await;
        for contact in &contacts {
            db.insert_draft(contact.id, "reply", &format!("draft for {}", contact.email))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let listed = db.list_drafts(2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].email, "c@x.com");
        assert_eq!(listed[1].email, "b@x.com");
    }

    #[tokio::test]
    async fn local_file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("takedown.db");

        let job_id = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.create_job(&NewJob::new("poem")).await.unwrap().id
        };

        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(reopened.get_job(job_id).await.unwrap().is_some());
    }
}
