//! Harvests outreach addresses for a matched page.
//!
//! Sources, in order: the matched page's HTML, a fixed set of likely contact
//! sub-pages, a WHOIS lookup, and standard role prefixes on the bare domain.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::contacts::model::OutreachContact;
use crate::contacts::whois::OwnershipLookup;
use crate::crawl::filter::extract_domain;
use crate::crawl::render::PageRenderer;
use crate::error::DatabaseError;
use crate::store::Database;

/// Sub-pages fetched from the matched site's host.
pub const CONTACT_PATHS: &[&str] = &[
    "/contact",
    "/about",
    "/privacy-policy",
    "/terms",
    "/legal",
    "/contact-us",
    "/support",
    "/help",
    "/team",
    "/reach-us",
    "/connect",
];

/// Role prefixes guessed against the bare domain.
pub const STANDARD_PREFIXES: &[&str] = &[
    "contact", "info", "admin", "support", "legal", "webmaster", "help", "hello", "team",
];

/// Subdomains stripped before guessing addresses.
const STRIPPED_SUBDOMAINS: &[&str] = &["www.", "m.", "blog."];

/// Tails that show a match was an asset filename like `logo@2x.png`.
const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".css", ".js"];

// Also covers `mailto:` links, since the scheme is not part of the class.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+").expect("email regex is valid")
});

/// Lowercase, trim trailing dots, and drop asset false positives.
fn clean_email(raw: &str) -> Option<String> {
    let email = raw.trim().trim_end_matches('.').to_lowercase();
    if ASSET_SUFFIXES.iter().any(|s| email.ends_with(s)) {
        return None;
    }
    Some(email)
}

/// Addresses found anywhere in `text`.
pub fn find_emails(text: &str) -> BTreeSet<String> {
    EMAIL_RE
        .find_iter(text)
        .filter_map(|m| clean_email(m.as_str()))
        .collect()
}

/// `example.com` for `www.example.com`, `m.example.com`, or `blog.example.com`.
pub fn bare_domain(host: &str) -> &str {
    STRIPPED_SUBDOMAINS
        .iter()
        .find_map(|prefix| host.strip_prefix(prefix))
        .unwrap_or(host)
}

pub fn standard_guesses(host: &str) -> Vec<String> {
    let domain = bare_domain(host);
    STANDARD_PREFIXES
        .iter()
        .map(|prefix| format!("{prefix}@{domain}"))
        .collect()
}

pub struct ContactExtractor {
    db: Arc<dyn Database>,
    renderer: Arc<dyn PageRenderer>,
    ownership: Arc<dyn OwnershipLookup>,
}

impl ContactExtractor {
    pub fn new(
        db: Arc<dyn Database>,
        renderer: Arc<dyn PageRenderer>,
        ownership: Arc<dyn OwnershipLookup>,
    ) -> Self {
        Self {
            db,
            renderer,
            ownership,
        }
    }

    /// Collect candidate addresses for `url`. Individual source failures are
    /// skipped.
    pub async fn harvest(&self, url: &str, html: &str) -> BTreeSet<String> {
        let mut found = find_emails(html);
        let Some(host) = extract_domain(url) else {
            return found;
        };

        let fetches = CONTACT_PATHS.iter().map(|path| {
            let sub_url = format!("https://{host}{path}");
            async move {
                let result = self.renderer.fetch_html(&sub_url).await;
                (sub_url, result)
            }
        });
        for (sub_url, result) in join_all(fetches).await {
            match result {
                Ok(sub_html) => found.extend(find_emails(&sub_html)),
                Err(e) => debug!(url = %sub_url, error = %e, "Skipping contact sub-page"),
            }
        }

        let domain = bare_domain(&host);
        found.extend(
            self.ownership
                .contact_emails(domain)
                .await
                .iter()
                .filter_map(|e| clean_email(e)),
        );
        found.extend(standard_guesses(&host));

        debug!(url, count = found.len(), "Harvested contact candidates");
        found
    }

    /// Harvest and persist contacts for a matched page in one batch.
    ///
    /// With a test-email override the harvested addresses are discarded and
    /// only the override is stored.
    pub async fn extract(
        &self,
        job_id: Uuid,
        crawl_result_id: Uuid,
        url: &str,
        html: &str,
        test_email: Option<&str>,
    ) -> Result<Vec<OutreachContact>, DatabaseError> {
        let harvested = self.harvest(url, html).await;

        let emails: Vec<String> = match test_email {
            Some(address) => {
                info!(
                    %job_id,
                    harvested = harvested.len(),
                    test_email = address,
                    "Test-email override active, storing override only"
                );
                vec![address.trim().to_lowercase()]
            }
            None => harvested.into_iter().collect(),
        };

        let contacts = self.db.insert_contacts(job_id, crawl_result_id, &emails).await?;
        info!(%job_id, %crawl_result_id, count = contacts.len(), "Outreach contacts created");
        Ok(contacts)
    }
}
