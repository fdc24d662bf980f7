//! Page rendering via headless Chromium (Playwright driven through node).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::CrawlConfig;
use crate::error::CrawlError;

/// Rendered page content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderedPage {
    /// Full HTML after scripts ran.
    pub html: String,
    /// Visible text of `<body>`.
    #[serde(default)]
    pub text: String,
}

/// Fetches pages for scoring, evidence, and contact harvesting.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Navigate to `url` and return its rendered content.
    async fn render(&self, url: &str) -> Result<RenderedPage, CrawlError>;

    /// Write a full-page PNG screenshot of `url` to `dest`.
    async fn screenshot(&self, url: &str, dest: &Path) -> Result<(), CrawlError>;

    /// Plain HTTP fetch of a page's HTML with a short timeout.
    async fn fetch_html(&self, url: &str) -> Result<String, CrawlError>;
}

/// Args: url, mode (`content` | `screenshot`), dest, nav timeout ms, settle ms.
const PLAYWRIGHT_SCRIPT: &str = r#"
const { chromium } = require('playwright');
const [url, mode, dest, navTimeout, settle] = process.argv.slice(1);
(async () => {
    const browser = await chromium.launch({ headless: true });
    try {
        const page = await browser.newPage();
        await page.goto(url, { timeout: Number(navTimeout) });
        await page.waitForTimeout(Number(settle));
        if (mode === 'screenshot') {
            await page.screenshot({ path: dest, fullPage: true });
            process.stdout.write('{"html":""}');
        } else {
            const html = await page.content();
            const text = (await page.textContent('body')) || '';
            process.stdout.write(JSON.stringify({ html, text }));
        }
    } finally {
        await browser.close();
    }
})().catch((err) => {
    console.error(String((err && err.message) || err));
    process.exit(1);
});
"#;

/// Extra time given to the node process on top of navigation + settle.
const PROCESS_SLACK: Duration = Duration::from_secs(15);

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Renders pages by running a Playwright script with `node`.
pub struct PlaywrightRenderer {
    node_binary: String,
    nav_timeout: Duration,
    settle_delay: Duration,
    http: reqwest::Client,
}

impl PlaywrightRenderer {
    pub fn new(config: &CrawlConfig) -> Result<Self, CrawlError> {
        let http = reqwest::Client::builder()
            .timeout(config.contact_fetch_timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| CrawlError::Fetch {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            node_binary: config.node_binary.clone(),
            nav_timeout: config.render_timeout,
            settle_delay: config.settle_delay,
            http,
        })
    }

    async fn run_script(&self, url: &str, mode: &str, dest: &str) -> Result<Vec<u8>, CrawlError> {
        let render_err = |reason: String| CrawlError::Render {
            url: url.to_string(),
            reason,
        };

        let child = tokio::process::Command::new(&self.node_binary)
            .arg("-e")
            .arg(PLAYWRIGHT_SCRIPT)
            .arg(url)
            .arg(mode)
            .arg(dest)
            .arg(self.nav_timeout.as_millis().to_string())
            .arg(self.settle_delay.as_millis().to_string())
            .kill_on_drop(true)
            .output();

        let limit = self.nav_timeout + self.settle_delay + PROCESS_SLACK;
        let output = tokio::time::timeout(limit, child)
            .await
            .map_err(|_| render_err(format!("renderer timed out after {}s", limit.as_secs())))?
            .map_err(|e| render_err(format!("failed to run {}: {e}", self.node_binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(render_err(stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl PageRenderer for PlaywrightRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, CrawlError> {
        let stdout = self.run_script(url, "content", "").await?;
        let page: RenderedPage = serde_json::from_slice(&stdout).map_err(|e| CrawlError::Render {
            url: url.to_string(),
            reason: format!("invalid renderer output: {e}"),
        })?;
        debug!(url, html_len = page.html.len(), text_len = page.text.len(), "Page rendered");
        Ok(page)
    }

    async fn screenshot(&self, url: &str, dest: &Path) -> Result<(), CrawlError> {
        let dest_str = dest.to_string_lossy();
        self.run_script(url, "screenshot", &dest_str).await?;
        match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(CrawlError::Render {
                url: url.to_string(),
                reason: format!("screenshot not written to {}", dest.display()),
            }),
        }
    }

    async fn fetch_html(&self, url: &str) -> Result<String, CrawlError> {
        let fetch_err = |reason: String| CrawlError::Fetch {
            url: url.to_string(),
            reason,
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        response.text().await.map_err(|e| fetch_err(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_output_parses() {
        let page: RenderedPage =
            serde_json::from_str(r#"{"html":"<body>Hi</body>","text":"Hi"}"#).unwrap();
        assert_eq!(page.text, "Hi");

        let page: RenderedPage = serde_json::from_str(r#"{"html":""}"#).unwrap();
        assert!(page.text.is_empty());
    }

    #[tokio::test]
    async fn missing_node_binary_is_a_render_error() {
        let config = CrawlConfig {
            node_binary: "/nonexistent/node-binary".into(),
            ..Default::default()
        };
        let renderer = PlaywrightRenderer::new(&config).unwrap();
        let err = renderer.render("https://example.com").await.unwrap_err();
        assert!(matches!(err, CrawlError::Render { ref url, .. } if url == "https://example.com"));
    }
}
