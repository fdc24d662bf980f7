//! End-to-end workflow scenarios over an in-memory store.
//!
//! External systems (search, browser, timestamping, SMTP, IMAP, LLM) are
//! replaced by in-process fakes; everything else is the real pipeline.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use takedown_engine::channels::{DeliveryOutcome, MailTransport, Mailbox, OutgoingMail, RawMessage};
use takedown_engine::config::{CrawlConfig, DelayUnit, EscalationConfig};
use takedown_engine::contacts::{ContactExtractor, ContactStatus, OwnershipLookup};
use takedown_engine::crawl::{
    CrawlResultStatus, DetectorParts, EvidenceStore, MatchDetector, PageRenderer, PartialRatio,
    RenderedPage, SearchProvider, TimestampProver,
};
use takedown_engine::error::{ChannelError, CrawlError, Error, LlmError, WorkflowError};
use takedown_engine::jobs::{CrawlWorker, JobStatus, LeaseQueue, NewJob};
use takedown_engine::llm::TextGenerator;
use takedown_engine::outreach::{CourtNotifier, EscalationEngine, TemplateSet};
use takedown_engine::replies::{DraftReviewGate, ReplyIngestor, ReplyStatus};
use takedown_engine::store::{Database, LibSqlBackend};
use takedown_engine::worker::{CycleOutcome, PollTask};

const POEM: &str = "The quiet river bends beneath the silver moon tonight";

// ── Fakes ───────────────────────────────────────────────────────────

struct StaticSearch {
    urls: Vec<String>,
    fail: bool,
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, _query: &str, page: u32, _page_size: usize) -> Result<Vec<String>, CrawlError> {
        if self.fail {
            return Err(CrawlError::Search("quota exhausted".into()));
        }
        Ok(if page == 1 { self.urls.clone() } else { Vec::new() })
    }
}

/// `copycat` pages carry the poem and an owner address; others don't.
struct FakeBrowser;

#[async_trait]
impl PageRenderer for FakeBrowser {
    async fn render(&self, url: &str) -> Result<RenderedPage, CrawlError> {
        let text = if url.contains("copycat") {
            format!("My blog. {POEM}. Contact owner@copycat.example")
        } else {
            "Local weather for the week".to_string()
        };
        Ok(RenderedPage {
            html: format!("<html><body>{text}</body></html>"),
            text,
        })
    }

    async fn screenshot(&self, _url: &str, dest: &Path) -> Result<(), CrawlError> {
        tokio::fs::write(dest, b"\x89PNG fake").await?;
        Ok(())
    }

    async fn fetch_html(&self, url: &str) -> Result<String, CrawlError> {
        Err(CrawlError::Fetch {
            url: url.into(),
            reason: "404".into(),
        })
    }
}

struct FakeProver;

#[async_trait]
impl TimestampProver for FakeProver {
    async fn stamp(&self, _file: &Path, dest: &Path) -> Result<(), CrawlError> {
        tokio::fs::write(dest, b"ots proof").await?;
        Ok(())
    }
}

struct NoRegistrar;

#[async_trait]
impl OwnershipLookup for NoRegistrar {
    async fn contact_emails(&self, _domain: &str) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl Outbox {
    fn subjects_to(&self, to: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == to)
            .map(|m| m.subject.clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for Outbox {
    async fn send(&self, mail: &OutgoingMail) -> DeliveryOutcome {
        self.sent.lock().unwrap().push(mail.clone());
        DeliveryOutcome::Delivered
    }
}

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<RawMessage>>,
    seen: Mutex<Vec<String>>,
}

impl Inbox {
    fn deliver(&self, uid: &str, from: &str, body: &str) {
        let raw = format!("From: {from}\r\nTo: bot@firm.example\r\nSubject: Re: notice\r\n\r\n{body}\r\n");
        self.messages.lock().unwrap().push(RawMessage {
            uid: uid.into(),
            bytes: raw.into_bytes(),
        });
    }
}

#[async_trait]
impl Mailbox for Inbox {
    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, ChannelError> {
        let seen = self.seen.lock().unwrap().clone();
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !seen.contains(&m.uid))
            .cloned()
            .collect())
    }

    async fn mark_seen(&self, uids: &[String]) -> Result<(), ChannelError> {
        self.seen.lock().unwrap().extend_from_slice(uids);
        Ok(())
    }
}

struct PoliteWriter;

#[async_trait]
impl TextGenerator for PoliteWriter {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok("Thanks for getting back to us.\n\nBest regards,\nThird Chair Bot".into())
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

fn crawl_worker(
    db: &Arc<LibSqlBackend>,
    evidence_root: &Path,
    search: StaticSearch,
    max_attempts: u32,
    lease_timeout: Duration,
) -> CrawlWorker {
    let renderer: Arc<dyn PageRenderer> = Arc::new(FakeBrowser);
    let detector = MatchDetector::new(
        db.clone(),
        DetectorParts {
            search: Arc::new(search),
            renderer: renderer.clone(),
            scorer: Arc::new(PartialRatio),
            prover: Arc::new(FakeProver),
            mailer: None,
        },
        EvidenceStore::new(evidence_root),
        ContactExtractor::new(db.clone(), renderer, Arc::new(NoRegistrar)),
        CrawlConfig::default(),
    );
    CrawlWorker::new(LeaseQueue::new(db.clone(), lease_timeout), detector, max_attempts)
}

fn instant_schedule() -> EscalationConfig {
    EscalationConfig {
        unit: DelayUnit::Seconds,
        mail_1: 0,
        mail_2: 0,
        mail_3: 0,
        mail_4: 0,
        legal: 0,
        reply_to_nudge_1: 0,
        nudge_1_to_nudge_2: 0,
        nudge_2_to_legal: 0,
        legal_to_court: 0,
        ..Default::default()
    }
}

fn no_templates() -> TemplateSet {
    TemplateSet::new(std::env::temp_dir().join("takedown-scenarios-no-templates"))
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn crawl_finds_copy_and_first_mail_goes_out() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let evidence = tempfile::tempdir().unwrap();
    let job = db.create_job(&NewJob::new(POEM)).await.unwrap();

    let worker = crawl_worker(
        &db,
        evidence.path(),
        StaticSearch {
            urls: vec![
                "https://copycat.example/poem".into(),
                "https://weather.example/today".into(),
            ],
            fail: false,
        },
        3,
        Duration::from_secs(300),
    );
    assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::Worked(1));
    assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::Idle);

    assert_eq!(db.get_job(job.id).await.unwrap().unwrap().status, JobStatus::Crawled);
    assert_eq!(db.count_crawl_events().await.unwrap(), 0);

    let results = db.list_crawl_results(job.id).await.unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.status, CrawlResultStatus::Matched);
    assert_eq!(result.match_score, Some(100));
    assert!(Path::new(result.screenshot_path.as_deref().unwrap()).exists());
    assert!(Path::new(result.ots_path.as_deref().unwrap()).exists());
    assert_eq!(result.screenshot_sha256.as_deref().map(str::len), Some(64));

    let contacts = db.list_contacts_for_job(job.id).await.unwrap();
    assert!(contacts.iter().any(|c| c.email == "owner@copycat.example"));
    assert!(contacts.iter().any(|c| c.email == "contact@copycat.example"));
    assert!(contacts.iter().all(|c| c.status == ContactStatus::NotContacted));

    let outbox = Arc::new(Outbox::default());
    let engine = EscalationEngine::new(db.clone(), outbox.clone(), no_templates(), EscalationConfig::default());
    assert_eq!(engine.run_once().await.unwrap(), contacts.len());
    assert_eq!(outbox.count(), contacts.len());
    assert_eq!(outbox.subjects_to("owner@copycat.example").len(), 1);

    for contact in db.list_contacts_for_job(job.id).await.unwrap() {
        assert_eq!(contact.status, ContactStatus::Sent1stMail);
    }
}

#[tokio::test]
async fn reply_is_answered_by_a_reviewer_and_escalates_to_court() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let evidence = tempfile::tempdir().unwrap();
    let job = db
        .create_job(&NewJob::new(POEM).with_test_email("qa@firm.example"))
        .await
        .unwrap();

    crawl_worker(
        &db,
        evidence.path(),
        StaticSearch {
            urls: vec!["https://copycat.example/poem".into()],
            fail: false,
        },
        3,
        Duration::from_secs(300),
    )
    .run_cycle()
    .await
    .unwrap();

    let contacts = db.list_contacts_for_job(job.id).await.unwrap();
    assert_eq!(contacts.len(), 1);
    let contact_id = contacts[0].id;
    assert_eq!(contacts[0].email, "qa@firm.example");

    let outbox = Arc::new(Outbox::default());
    let engine = EscalationEngine::new(db.clone(), outbox.clone(), no_templates(), instant_schedule());
    engine.run_once().await.unwrap();
    assert_eq!(db.get_contact(contact_id).await.unwrap().unwrap().status, ContactStatus::Sent1stMail);

    // Owner writes back.
    let inbox = Arc::new(Inbox::default());
    inbox.deliver("7", "QA <qa@firm.example>", "I wrote this myself years ago.");
    let ingestor = ReplyIngestor::new(db.clone(), inbox.clone(), "bot@firm.example");
    assert_eq!(ingestor.run_once().await.unwrap(), 1);
    assert_eq!(db.get_contact(contact_id).await.unwrap().unwrap().status, ContactStatus::Replied);

    // A replied contact is not on any timer.
    let before = outbox.count();
    engine.run_once().await.unwrap();
    assert_eq!(outbox.count(), before);

    let gate = DraftReviewGate::new(db.clone())
        .with_generator(Arc::new(PoliteWriter))
        .with_mailer(outbox.clone());
    assert_eq!(gate.generate_pending().await.unwrap(), 1);
    let draft = gate.list(10).await.unwrap().remove(0);
    assert_eq!(draft.reply_text.trim(), "I wrote this myself years ago.");

    let sent = gate.approve(draft.draft_id, Some("Could you share proof of authorship?")).await.unwrap();
    assert_eq!(sent.status, ReplyStatus::Sent);
    assert_eq!(db.get_contact(contact_id).await.unwrap().unwrap().status, ContactStatus::RepliedByUs);

    let again = gate.approve(draft.draft_id, None).await.unwrap_err();
    assert!(matches!(again, Error::Workflow(WorkflowError::NotFound { .. })));

    // Nudge, nudge, legal letter ready, legal letter sent, court ready.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.run_once().await.unwrap();
    }
    assert_eq!(db.get_contact(contact_id).await.unwrap().unwrap().status, ContactStatus::CourtReady);

    let notifier = CourtNotifier::new(db.clone(), outbox.clone(), instant_schedule());
    assert_eq!(notifier.run_once().await.unwrap(), 1);
    assert_eq!(
        db.get_contact(contact_id).await.unwrap().unwrap().status,
        ContactStatus::CourtNoticeSent
    );
    assert_eq!(db.get_job(job.id).await.unwrap().unwrap().status, JobStatus::CourtNoticeSent);

    let subjects = outbox.subjects_to("qa@firm.example");
    assert!(subjects.iter().any(|s| s == "Follow-up regarding your message"));
    assert_eq!(
        subjects.last().map(String::as_str),
        Some("New court-ready case: https://copycat.example/poem")
    );
}

#[tokio::test]
async fn failing_crawl_is_dead_lettered_after_its_attempts() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let evidence = tempfile::tempdir().unwrap();
    let job = db.create_job(&NewJob::new(POEM)).await.unwrap();

    let worker = crawl_worker(
        &db,
        evidence.path(),
        StaticSearch {
            urls: Vec::new(),
            fail: true,
        },
        2,
        Duration::ZERO,
    );

    assert!(worker.run_cycle().await.is_err());
    assert!(worker.run_cycle().await.is_err());
    assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::Worked(1));

    let job = db.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::DeadLettered);
    assert!(job.last_error.is_some());
    assert_eq!(db.count_crawl_events().await.unwrap(), 0);
    assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::Idle);
}

#[tokio::test]
async fn only_one_worker_holds_a_crawl_lease() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    db.create_job(&NewJob::new(POEM)).await.unwrap();

    let a = LeaseQueue::new(db.clone(), Duration::from_secs(300));
    let b = LeaseQueue::new(db.clone(), Duration::from_secs(300));
    let (first, second) = tokio::join!(a.claim(), b.claim());
    let claimed = [first.unwrap(), second.unwrap()];
    assert_eq!(claimed.iter().filter(|c| c.is_some()).count(), 1);
}

#[tokio::test]
async fn dwell_time_holds_contacts_in_place() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let evidence = tempfile::tempdir().unwrap();
    let job = db
        .create_job(&NewJob::new(POEM).with_test_email("qa@firm.example"))
        .await
        .unwrap();
    crawl_worker(
        &db,
        evidence.path(),
        StaticSearch {
            urls: vec!["https://copycat.example/poem".into()],
            fail: false,
        },
        3,
        Duration::from_secs(300),
    )
    .run_cycle()
    .await
    .unwrap();

    let outbox = Arc::new(Outbox::default());
    let config = EscalationConfig {
        unit: DelayUnit::Hours,
        ..instant_schedule()
    };
    let engine = EscalationEngine::new(
        db.clone(),
        outbox.clone(),
        no_templates(),
        EscalationConfig { mail_2: 1, ..config },
    );

    engine.run_once().await.unwrap();
    engine.run_once().await.unwrap();
    assert_eq!(outbox.count(), 1);
    let contact = db.list_contacts_for_job(job.id).await.unwrap().remove(0);
    assert_eq!(contact.status, ContactStatus::Sent1stMail);
}
