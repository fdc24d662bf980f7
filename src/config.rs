//! Configuration types.
//!
//! Every section is built from environment variables (a `.env` file is
//! loaded by the binary first). Sections are loaded independently so a
//! process running only some workers needs only their settings.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::contacts::model::ContactStatus;
use crate::error::ConfigError;

// ── Env helpers ─────────────────────────────────────────────────────

/// A non-empty, trimmed environment variable.
pub fn optional_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required_var(key: &str) -> Result<String, ConfigError> {
    optional_var(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

pub fn env_or(key: &str, default: &str) -> String {
    optional_var(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(key) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

// ── Store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: PathBuf::from(env_or("TAKEDOWN_DB_PATH", "./data/takedown.db")),
        }
    }
}

// ── Evidence + templates ────────────────────────────────────────────

/// Shared directory holding `images/`, `ots/`, and `email_templates/`.
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    pub shared_dir: PathBuf,
}

impl EvidenceConfig {
    pub fn from_env() -> Self {
        Self {
            shared_dir: PathBuf::from(env_or("SHARED_DIR", "/app/shared")),
        }
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.shared_dir.join("email_templates")
    }
}

// ── Search ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_url: String,
    pub api_key: SecretString,
}

impl SearchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: env_or("SERPER_API_URL", "https://google.serper.dev/search"),
            api_key: SecretString::from(required_var("SERPER_API_KEY")?),
        })
    }
}

// ── Crawl ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// A crawl lease whose heartbeat is older than this is reclaimable.
    pub lease_timeout: Duration,
    /// Claims beyond this count dead-letter the job.
    pub max_attempts: u32,
    /// Minimum similarity score (inclusive) that counts as a match.
    pub match_threshold: u8,
    pub batch_size: usize,
    /// Results requested per search page.
    pub page_size: usize,
    pub max_pages: u32,
    pub render_timeout: Duration,
    pub settle_delay: Duration,
    pub contact_fetch_timeout: Duration,
    pub whois_timeout: Duration,
    /// Upper bound on one `ots stamp` run.
    pub stamp_timeout: Duration,
    pub node_binary: String,
    pub ots_binary: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(5 * 60),
            max_attempts: 10,
            match_threshold: 85,
            batch_size: 10,
            page_size: 100,
            max_pages: 10,
            render_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_secs(3),
            contact_fetch_timeout: Duration::from_secs(10),
            whois_timeout: Duration::from_secs(10),
            stamp_timeout: Duration::from_secs(60),
            node_binary: "node".into(),
            ots_binary: "ots".into(),
        }
    }
}

impl CrawlConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            lease_timeout: Duration::from_secs(60 * env_parse("CRAWLER_TIMEOUT_MINUTES", 5u64)?),
            max_attempts: env_parse("CRAWL_MAX_ATTEMPTS", d.max_attempts)?,
            match_threshold: env_parse("MATCH_THRESHOLD", d.match_threshold)?.min(100),
            batch_size: env_parse("CRAWL_BATCH_SIZE", d.batch_size)?.max(1),
            page_size: env_parse("CRAWL_PAGE_SIZE", d.page_size)?.max(1),
            max_pages: env_parse("CRAWL_MAX_PAGES", d.max_pages)?,
            render_timeout: Duration::from_secs(env_parse("RENDER_TIMEOUT_SECS", 15u64)?),
            settle_delay: Duration::from_secs(env_parse("RENDER_SETTLE_SECS", 3u64)?),
            contact_fetch_timeout: Duration::from_secs(env_parse("CONTACT_FETCH_TIMEOUT_SECS", 10u64)?),
            whois_timeout: Duration::from_secs(env_parse("WHOIS_TIMEOUT_SECS", 10u64)?),
            stamp_timeout: Duration::from_secs(env_parse("STAMP_TIMEOUT_SECS", 60u64)?),
            node_binary: env_or("NODE_BINARY", &d.node_binary),
            ots_binary: env_or("OTS_BINARY", &d.ots_binary),
        })
    }
}

// ── Escalation ──────────────────────────────────────────────────────

/// Unit applied to every escalation delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    pub fn duration(&self, amount: u32) -> chrono::Duration {
        let amount = i64::from(amount);
        match self {
            Self::Seconds => chrono::Duration::seconds(amount),
            Self::Minutes => chrono::Duration::minutes(amount),
            Self::Hours => chrono::Duration::hours(amount),
            Self::Days => chrono::Duration::days(amount),
        }
    }
}

impl std::str::FromStr for DelayUnit {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "seconds" | "second" | "s" => Ok(Self::Seconds),
            "minutes" | "minute" | "m" => Ok(Self::Minutes),
            "hours" | "hour" | "h" => Ok(Self::Hours),
            "days" | "day" | "d" => Ok(Self::Days),
            other => Err(format!("unknown delay unit {other:?}")),
        }
    }
}

/// Dwell times between escalation stages, in `unit`s.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    pub unit: DelayUnit,
    pub mail_1: u32,
    pub mail_2: u32,
    pub mail_3: u32,
    pub mail_4: u32,
    pub legal: u32,
    pub reply_to_nudge_1: u32,
    pub nudge_1_to_nudge_2: u32,
    pub nudge_2_to_legal: u32,
    pub legal_to_court: u32,
    /// Contacts claimed per stage per cycle.
    pub batch_limit: usize,
    /// Contacts claimed per court-notifier cycle.
    pub court_batch_limit: usize,
    /// A contact lease older than this is treated as abandoned.
    pub lease_timeout: Duration,
    /// Address receiving court-ready notices; falls back to the job's
    /// test email, then the contact itself.
    pub client_address: Option<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            unit: DelayUnit::Days,
            mail_1: 0,
            mail_2: 3,
            mail_3: 6,
            mail_4: 10,
            legal: 14,
            reply_to_nudge_1: 5,
            nudge_1_to_nudge_2: 5,
            nudge_2_to_legal: 3,
            legal_to_court: 7,
            batch_limit: 20,
            court_batch_limit: 5,
            lease_timeout: Duration::from_secs(30 * 60),
            client_address: None,
        }
    }
}

impl EscalationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let unit = env_or("ESCALATION_DELAY_UNIT", "days")
            .parse()
            .map_err(|message| ConfigError::InvalidValue {
                key: "ESCALATION_DELAY_UNIT".into(),
                message,
            })?;

        Ok(Self {
            unit,
            mail_1: env_parse("MAIL_1_DELAY", d.mail_1)?,
            mail_2: env_parse("MAIL_2_DELAY", d.mail_2)?,
            mail_3: env_parse("MAIL_3_DELAY", d.mail_3)?,
            mail_4: env_parse("MAIL_4_DELAY", d.mail_4)?,
            legal: env_parse("LEGAL_DELAY", d.legal)?,
            reply_to_nudge_1: env_parse("REPLY_TO_NUDGE_1", d.reply_to_nudge_1)?,
            nudge_1_to_nudge_2: env_parse("NUDGE_1_TO_NUDGE_2", d.nudge_1_to_nudge_2)?,
            nudge_2_to_legal: env_parse("NUDGE_2_TO_LEGAL", d.nudge_2_to_legal)?,
            legal_to_court: env_parse("LEGAL_TO_COURT", d.legal_to_court)?,
            batch_limit: env_parse("ESCALATION_BATCH_LIMIT", d.batch_limit)?.max(1),
            court_batch_limit: env_parse("COURT_BATCH_LIMIT", d.court_batch_limit)?.max(1),
            lease_timeout: Duration::from_secs(
                60 * env_parse("CONTACT_LEASE_TIMEOUT_MINUTES", 30u64)?,
            ),
            client_address: optional_var("CLIENT_NOTIFY_EMAIL").map(|a| a.to_lowercase()),
        })
    }

    /// Time a contact must spend in `stage` before its next mail goes out.
    /// `None` for stages that are not advanced on a timer.
    pub fn dwell(&self, stage: ContactStatus) -> Option<chrono::Duration> {
        use ContactStatus::*;
        let amount = match stage {
            NotContacted => self.mail_1,
            Sent1stMail => self.mail_2,
            Sent2ndMail => self.mail_3,
            Sent3rdMail => self.mail_4,
            Sent4thMail => self.legal,
            RepliedByUs => self.reply_to_nudge_1,
            NudgedAgain => self.nudge_1_to_nudge_2,
            LegalLetterReady => self.nudge_2_to_legal,
            LegalLetterSent => self.legal_to_court,
            Replied | CourtReady | CourtNoticeSent | Bounced | Failed => return None,
        };
        Some(self.unit.duration(amount))
    }
}
