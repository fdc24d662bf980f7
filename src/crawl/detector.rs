//! Match detection for one job: search, render, score, capture evidence.
//!
//! Search pages are scanned in fixed-size batches; the crawl-event lease is
//! refreshed at every batch. A batch with no match means no further search
//! page is requested once the current page is done.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::{DeliveryOutcome, MailTransport, OutgoingMail};
use crate::config::CrawlConfig;
use crate::contacts::ContactExtractor;
use crate::crawl::evidence::{EvidenceStore, TimestampProver};
use crate::crawl::filter;
use crate::crawl::model::{CrawlResultStatus, NewCrawlResult};
use crate::crawl::render::PageRenderer;
use crate::crawl::search::SearchProvider;
use crate::crawl::similarity::{SimilarityScorer, extract_snippet, is_match, normalize};
use crate::error::{Error, WorkflowError};
use crate::jobs::model::{CrawlEvent, Job, JobStatus};
use crate::store::Database;

pub const NO_MATCH_SUBJECT: &str = "No IP Infringements Found";

/// Counters for one crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages: u32,
    pub scanned: usize,
    pub matched: usize,
    pub errors: usize,
}

enum ScanOutcome {
    Matched,
    NoMatch,
    Failed,
}

/// Per-job state shared by every URL scan.
struct CrawlContext<'a> {
    job: &'a Job,
    normalized_input: String,
    test_email: Option<String>,
}

/// External collaborators used by the detector.
pub struct DetectorParts {
    pub search: Arc<dyn SearchProvider>,
    pub renderer: Arc<dyn PageRenderer>,
    pub scorer: Arc<dyn SimilarityScorer>,
    pub prover: Arc<dyn TimestampProver>,
    /// Used for the "no infringement" notice. `None` disables it.
    pub mailer: Option<Arc<dyn MailTransport>>,
}

pub struct MatchDetector {
    db: Arc<dyn Database>,
    parts: DetectorParts,
    evidence: EvidenceStore,
    extractor: ContactExtractor,
    config: CrawlConfig,
}

impl MatchDetector {
    pub fn new(
        db: Arc<dyn Database>,
        parts: DetectorParts,
        evidence: EvidenceStore,
        extractor: ContactExtractor,
        config: CrawlConfig,
    ) -> Self {
        Self {
            db,
            parts,
            evidence,
            extractor,
            config,
        }
    }

    /// Crawl the job behind a claimed event. The caller acknowledges or
    /// releases the event.
    pub async fn run(&self, event: &CrawlEvent) -> Result<CrawlSummary, Error> {
        let job = self
            .db
            .get_job(event.job_id)
            .await?
            .ok_or(WorkflowError::NotFound {
                entity: "job",
                id: event.job_id,
            })?;

        if !job.status.can_transition_to(JobStatus::Crawling) {
            info!(job_id = %job.id, status = %job.status, "Job already past crawling, skipping");
            return Ok(CrawlSummary::default());
        }
        self.db.update_job_status(job.id, JobStatus::Crawling, None).await?;
        info!(job_id = %job.id, attempt = event.attempts, "Starting crawl");

        let ctx = CrawlContext {
            job: &job,
            normalized_input: normalize(&job.input_text),
            test_email: self.db.get_test_email(job.id).await?,
        };

        // A reclaimed event must not capture evidence twice for the same page.
        let already_matched: HashSet<String> = self
            .db
            .list_crawl_results(job.id)
            .await?
            .into_iter()
            .filter(|r| r.status == CrawlResultStatus::Matched)
            .map(|r| r.url)
            .collect();

        let mut summary = CrawlSummary {
            matched: already_matched.len(),
            ..Default::default()
        };

        for page in 1..=self.config.max_pages.max(1) {
            let mut urls = self
                .parts
                .search
                .search(&job.input_text, page, self.config.page_size)
                .await?;
            if urls.is_empty() {
                debug!(job_id = %job.id, page, "Search exhausted");
                break;
            }
            urls.truncate(self.config.page_size);
            summary.pages = page;
            info!(job_id = %job.id, page, urls = urls.len(), "Scanning search page");

            let mut advance = true;
            for (batch_idx, batch) in urls.chunks(self.config.batch_size.max(1)).enumerate() {
                self.heartbeat(event).await?;

                let mut batch_matches = 0;
                for url in batch {
                    if !filter::passes(url, &job.filters) {
                        debug!(url = %url, "Filtered out");
                        continue;
                    }
                    if already_matched.contains(url) {
                        batch_matches += 1;
                        continue;
                    }
                    // One page's render and evidence can outlast a lease.
                    self.heartbeat(event).await?;
                    summary.scanned += 1;
                    match self.scan(&ctx, url).await? {
                        ScanOutcome::Matched => {
                            batch_matches += 1;
                            summary.matched += 1;
                        }
                        ScanOutcome::NoMatch => {}
                        ScanOutcome::Failed => summary.errors += 1,
                    }
                }

                if batch_matches == 0 && advance {
                    info!(job_id = %job.id, page, batch = batch_idx + 1, "No matches in batch, not requesting further pages");
                    advance = false;
                }
            }

            if !advance {
                break;
            }
        }

        if summary.matched == 0 {
            self.notify_no_match(&ctx).await;
        }

        if let Some(current) = self.db.get_job(job.id).await?
            && current.status == JobStatus::Crawling
        {
            self.db.update_job_status(job.id, JobStatus::Crawled, None).await?;
        }

        info!(
            job_id = %job.id,
            pages = summary.pages,
            scanned = summary.scanned,
            matched = summary.matched,
            errors = summary.errors,
            "Crawl finished"
        );
        Ok(summary)
    }

    async fn heartbeat(&self, event: &CrawlEvent) -> Result<(), Error> {
        if self.db.touch_crawl_event(event.id, event.attempts).await? {
            Ok(())
        } else {
            Err(WorkflowError::LeaseLost {
                entity: "crawl_event",
                id: event.id,
                expected: "leased".into(),
            }
            .into())
        }
    }

    /// Render one URL and record the result. Only store failures are errors;
    /// render and evidence failures become `ERROR` rows.
    async fn scan(&self, ctx: &CrawlContext<'_>, url: &str) -> Result<ScanOutcome, Error> {
        let job_id = ctx.job.id;
        let page = match self.parts.renderer.render(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(%job_id, url, error = %e, "Render failed");
                self.db
                    .insert_crawl_result(&NewCrawlResult::error(job_id, url, e.to_string()))
                    .await?;
                return Ok(ScanOutcome::Failed);
            }
        };

        let text = normalize(&page.text);
        let score = self.parts.scorer.score(&ctx.normalized_input, &text);
        if !is_match(score, self.config.match_threshold) {
            debug!(%job_id, url, score, "Below threshold");
            return Ok(ScanOutcome::NoMatch);
        }
        info!(%job_id, url, score, "Match found");

        let evidence = match self
            .evidence
            .capture(url, self.parts.renderer.as_ref(), self.parts.prover.as_ref())
            .await
        {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!(%job_id, url, error = %e, "Evidence capture failed");
                self.db
                    .insert_crawl_result(&NewCrawlResult::error(job_id, url, e.to_string()))
                    .await?;
                return Ok(ScanOutcome::Failed);
            }
        };

        let snippet = extract_snippet(&text, &ctx.normalized_input);
        let result = self
            .db
            .insert_crawl_result(&NewCrawlResult::matched(job_id, url, score, snippet, &evidence))
            .await?;

        self.extractor
            .extract(job_id, result.id, url, &page.html, ctx.test_email.as_deref())
            .await?;
        Ok(ScanOutcome::Matched)
    }

    async fn notify_no_match(&self, ctx: &CrawlContext<'_>) {
        let job_id = ctx.job.id;
        let (Some(mailer), Some(to)) = (&self.parts.mailer, ctx.test_email.as_deref()) else {
            info!(%job_id, "No matches found");
            return;
        };

        let body = format!(
            "Hello,\n\nWe completed the crawl for the search input:\n\n\"{}\"\n\n\
             After scanning multiple sources, we did not find any suspected cases of IP infringement.\n\n\
             Thank you,\nThird Chair",
            ctx.job.input_text
        );
        match mailer.send(&OutgoingMail::new(to, NO_MATCH_SUBJECT, body)).await {
            DeliveryOutcome::Delivered => info!(%job_id, to, "Sent no-match notice"),
            other => warn!(%job_id, to, outcome = ?other, "No-match notice not delivered"),
        }
    }
}
