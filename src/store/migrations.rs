//! Schema history for the libSQL store.
//!
//! Versions are applied in order and recorded in `_migrations`; a database
//! is only ever moved forward.

use libsql::Connection;
use tracing::debug;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                input_text TEXT NOT NULL,
                filters TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'PENDING',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

            CREATE TABLE IF NOT EXISTS crawl_events (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                is_processing INTEGER NOT NULL DEFAULT 0,
                progress_updated_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_crawl_events_lease
                ON crawl_events(is_processing, progress_updated_at);

            CREATE TABLE IF NOT EXISTS crawl_results (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                url TEXT NOT NULL,
                match_score INTEGER,
                matched_snippet TEXT,
                screenshot_path TEXT,
                ots_path TEXT,
                captured_at TEXT NOT NULL,
                status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_crawl_results_job ON crawl_results(job_id);

            CREATE TABLE IF NOT EXISTS outreach_contacts (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                crawl_result_id TEXT NOT NULL REFERENCES crawl_results(id),
                email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'NOT_CONTACTED',
                is_processing INTEGER NOT NULL DEFAULT 0,
                last_reply_text TEXT,
                reply_received_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (crawl_result_id, email)
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_status_updated
                ON outreach_contacts(status, updated_at);
            CREATE INDEX IF NOT EXISTS idx_contacts_email ON outreach_contacts(email);

            CREATE TABLE IF NOT EXISTS replies (
                id TEXT PRIMARY KEY,
                contact_id TEXT NOT NULL REFERENCES outreach_contacts(id),
                original_reply TEXT NOT NULL,
                llm_draft TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'DRAFTED',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_replies_contact ON replies(contact_id);
            CREATE INDEX IF NOT EXISTS idx_replies_status ON replies(status);

            CREATE TABLE IF NOT EXISTS test_email_map (
                job_id TEXT PRIMARY KEY REFERENCES jobs(id),
                email TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "leases_and_dead_letters",
        sql: r#"
            ALTER TABLE jobs ADD COLUMN last_error TEXT;
            ALTER TABLE crawl_events ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE outreach_contacts ADD COLUMN leased_at TEXT;
        "#,
    },
    Migration {
        version: 3,
        name: "evidence_digest_and_sent_text",
        sql: r#"
            ALTER TABLE crawl_results ADD COLUMN screenshot_sha256 TEXT;
            ALTER TABLE crawl_results ADD COLUMN error TEXT;
            ALTER TABLE replies ADD COLUMN final_text TEXT;
        "#,
    },
];

const CREATE_HISTORY: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

fn migration_err(context: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to the latest version.
///
/// Each step runs in its own transaction together with its history row, so
/// a failed step leaves the schema at the previous version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(CREATE_HISTORY, ())
        .await
        .map_err(migration_err("Failed to create migration history"))?;

    let applied = current_version(conn).await?;
    for step in MIGRATIONS.iter().filter(|m| m.version > applied) {
        tracing::info!(version = step.version, name = step.name, "Applying migration");
        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, name) VALUES ({}, '{}');\nCOMMIT;",
            step.sql, step.version, step.name
        );
        if let Err(e) = conn.execute_batch(&batch).await {
            // The batch stops at the failing statement, leaving the transaction open.
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::Migration(format!(
                "V{} ({}) failed: {e}",
                step.version, step.name
            )));
        }
    }

    let version = current_version(conn).await?;
    debug!(version, "Schema up to date");
    Ok(())
}

/// Highest applied version, 0 on a fresh database.
async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(migration_err("Failed to query schema version"))?;
    match rows.next().await.map_err(migration_err("Failed to read schema version"))? {
        Some(row) => row.get::<i64>(0).map_err(migration_err("Bad schema version")),
        None => Ok(0),
    }
}
