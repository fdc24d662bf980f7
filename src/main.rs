use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use takedown_engine::channels::{EmailConfig, ImapMailbox, MailTransport, SmtpMailer};
use takedown_engine::config::{
    CrawlConfig, EscalationConfig, EvidenceConfig, SearchConfig, StoreConfig, optional_var,
};
use takedown_engine::contacts::{ContactExtractor, WhoisLookup};
use takedown_engine::crawl::{
    DetectorParts, EvidenceStore, MatchDetector, OtsProver, PageRenderer, PartialRatio,
    PlaywrightRenderer, SerperSearch,
};
use takedown_engine::jobs::{CrawlWorker, DomainFilters, LeaseQueue, NewJob};
use takedown_engine::llm::{LlmConfig, create_generator};
use takedown_engine::outreach::{CourtNotifier, EscalationEngine, TemplateSet};
use takedown_engine::replies::{DraftReviewGate, ReplyIngestor};
use takedown_engine::store::{Database, LibSqlBackend};
use takedown_engine::worker::{PollSettings, PollTask, spawn_poller};

/// How long workers get to finish their current cycle after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "takedown", version, about = "Find copies of a text online and run owner outreach")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the database schema.
    Migrate,
    /// Submit a text to search for.
    Submit {
        text: String,
        /// Only scan these hosts (comma-separated).
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,
        /// Never scan these hosts (comma-separated).
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
        /// Send every outbound mail for this job here instead of to owners.
        #[arg(long)]
        test_email: Option<String>,
    },
    /// Show a job with its results and contacts.
    Status { job_id: Uuid },
    /// Run one or all background workers until Ctrl-C.
    Run {
        #[arg(long, value_enum, default_value_t = WorkerKind::All)]
        worker: WorkerKind,
    },
    /// Review generated follow-up drafts.
    Drafts {
        #[command(subcommand)]
        action: DraftAction,
    },
}

#[derive(Subcommand)]
enum DraftAction {
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    Approve {
        draft_id: Uuid,
        /// Send this text instead of the generated draft.
        #[arg(long)]
        text: Option<String>,
    },
    Reject { draft_id: Uuid },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WorkerKind {
    Crawl,
    Outreach,
    Replies,
    Drafts,
    Court,
    All,
}

impl WorkerKind {
    fn includes(self, other: WorkerKind) -> bool {
        self == WorkerKind::All || self == other
    }
}

fn init_tracing() -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match optional_var("TAKEDOWN_LOG_DIR") {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "takedown.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();

    let store = StoreConfig::from_env();
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&store.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", store.db_path.display()))?,
    );

    match cli.command {
        Command::Migrate => {
            db.run_migrations().await?;
            eprintln!("Database ready at {}", store.db_path.display());
        }
        Command::Submit {
            text,
            include,
            exclude,
            test_email,
        } => {
            let mut job = NewJob::new(text).with_filters(DomainFilters {
                include_domains: include,
                exclude_domains: exclude,
            });
            if let Some(email) = test_email {
                job = job.with_test_email(email);
            }
            let job = db.create_job(&job).await?;
            println!("{}", job.id);
        }
        Command::Status { job_id } => print_status(db.as_ref(), job_id).await?,
        Command::Run { worker } => run_workers(db, worker).await?,
        Command::Drafts { action } => review_drafts(db, action).await?,
    }

    Ok(())
}

async fn print_status(db: &dyn Database, job_id: Uuid) -> anyhow::Result<()> {
    let job = db
        .get_job(job_id)
        .await?
        .with_context(|| format!("No job {job_id}"))?;
    println!("Job {} [{}]", job.id, job.status);
    if let Some(reason) = &job.last_error {
        println!("  last error: {reason}");
    }

    for result in db.list_crawl_results(job_id).await? {
        let score = result.match_score.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        println!("  {} {:>3} {}", result.status.as_str(), score, result.url);
    }
    for contact in db.list_contacts_for_job(job_id).await? {
        println!("  contact {} [{}]", contact.email, contact.status);
    }
    Ok(())
}

async fn review_drafts(db: Arc<dyn Database>, action: DraftAction) -> anyhow::Result<()> {
    let gate = DraftReviewGate::new(db);

    match action {
        DraftAction::List { limit } => {
            for draft in gate.list(limit).await? {
                println!("── {} ({}) {}", draft.draft_id, draft.email, draft.generated_at);
                println!("Reply:\n{}\n", draft.reply_text.trim());
                println!("Draft:\n{}\n", draft.draft_text.trim());
            }
        }
        DraftAction::Approve { draft_id, text } => {
            let gate = gate.with_mailer(Arc::new(SmtpMailer::new(EmailConfig::from_env()?)));
            gate.approve(draft_id, text.as_deref()).await?;
            eprintln!("Draft {draft_id} sent");
        }
        DraftAction::Reject { draft_id } => {
            gate.reject(draft_id).await?;
            eprintln!("Draft {draft_id} rejected");
        }
    }
    Ok(())
}

fn crawl_worker(db: &Arc<dyn Database>, mailer: Option<Arc<dyn MailTransport>>) -> anyhow::Result<CrawlWorker> {
    let config = CrawlConfig::from_env()?;
    let evidence = EvidenceConfig::from_env();

    let renderer: Arc<dyn PageRenderer> = Arc::new(PlaywrightRenderer::new(&config)?);
    let parts = DetectorParts {
        search: Arc::new(SerperSearch::new(&SearchConfig::from_env()?)?),
        renderer: Arc::clone(&renderer),
        scorer: Arc::new(PartialRatio),
        prover: Arc::new(OtsProver::new(config.ots_binary.clone(), config.stamp_timeout)),
        mailer,
    };
    let extractor = ContactExtractor::new(
        Arc::clone(db),
        renderer,
        Arc::new(WhoisLookup::new(config.whois_timeout)),
    );
    let detector = MatchDetector::new(
        Arc::clone(db),
        parts,
        EvidenceStore::new(evidence.shared_dir),
        extractor,
        config.clone(),
    );
    Ok(CrawlWorker::new(
        LeaseQueue::new(Arc::clone(db), config.lease_timeout),
        detector,
        config.max_attempts,
    ))
}

async fn run_workers(db: Arc<dyn Database>, kind: WorkerKind) -> anyhow::Result<()> {
    let email = EmailConfig::from_env();
    let mailer: Option<Arc<dyn MailTransport>> = email
        .as_ref()
        .ok()
        .map(|config| Arc::new(SmtpMailer::new(config.clone())) as Arc<dyn MailTransport>);

    let mut tasks: Vec<(Arc<dyn PollTask>, PollSettings)> = Vec::new();

    if kind.includes(WorkerKind::Crawl) {
        if mailer.is_none() {
            tracing::warn!("Email not configured, no-match notices disabled");
        }
        tasks.push((Arc::new(crawl_worker(&db, mailer.clone())?), PollSettings::CRAWL));
    }

    let needs_mail = [WorkerKind::Outreach, WorkerKind::Replies, WorkerKind::Drafts, WorkerKind::Court]
        .into_iter()
        .any(|k| kind.includes(k));
    if needs_mail {
        let email = email.context("Email settings are required for outreach workers")?;
        let mailer: Arc<dyn MailTransport> = Arc::new(SmtpMailer::new(email.clone()));
        let escalation = EscalationConfig::from_env()?;

        if kind.includes(WorkerKind::Outreach) {
            let templates = TemplateSet::new(EvidenceConfig::from_env().templates_dir());
            let engine = EscalationEngine::new(Arc::clone(&db), Arc::clone(&mailer), templates, escalation.clone());
            tasks.push((Arc::new(engine), PollSettings::OUTREACH));
        }
        if kind.includes(WorkerKind::Replies) {
            let mailbox = Arc::new(ImapMailbox::new(email.clone()));
            let ingestor = ReplyIngestor::new(Arc::clone(&db), mailbox, email.from_address.clone());
            tasks.push((Arc::new(ingestor), PollSettings::REPLIES));
        }
        if kind.includes(WorkerKind::Drafts) {
            let generator = create_generator(&LlmConfig::from_env()?)?;
            let gate = DraftReviewGate::new(Arc::clone(&db)).with_generator(generator);
            tasks.push((Arc::new(gate), PollSettings::DRAFTS));
        }
        if kind.includes(WorkerKind::Court) {
            let notifier = CourtNotifier::new(Arc::clone(&db), Arc::clone(&mailer), escalation);
            tasks.push((Arc::new(notifier), PollSettings::COURT));
        }
    }

    let names: Vec<&str> = tasks.iter().map(|(task, _)| task.name()).collect();
    tracing::info!(workers = ?names, "Starting workers");

    let (handles, flags): (Vec<_>, Vec<_>) = tasks
        .into_iter()
        .map(|(task, settings)| spawn_poller(task, settings))
        .unzip();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    for flag in &flags {
        flag.store(true, Ordering::Relaxed);
    }

    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles))
        .await
        .is_err()
    {
        tracing::warn!("Workers still busy after grace period, aborting");
        for abort in aborts {
            abort.abort();
        }
    }
    Ok(())
}
