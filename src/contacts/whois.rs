//! Best-effort domain ownership lookup over WHOIS (port 43).

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::contacts::extractor::find_emails;

const IANA_SERVER: &str = "whois.iana.org";

/// Responses beyond this are truncated.
const MAX_RESPONSE_BYTES: usize = 256 * 1024;

/// Domain → registrant/abuse contact addresses. Failures yield none.
#[async_trait]
pub trait OwnershipLookup: Send + Sync {
    async fn contact_emails(&self, domain: &str) -> Vec<String>;
}

/// Queries IANA for the registry, then the registry for the domain.
pub struct WhoisLookup {
    timeout: Duration,
}

impl WhoisLookup {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn query(&self, server: &str, domain: &str) -> std::io::Result<String> {
        let exchange = async {
            let mut stream = TcpStream::connect((server, 43)).await?;
            stream.write_all(format!("{domain}\r\n").as_bytes()).await?;

            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 || buf.len() >= MAX_RESPONSE_BYTES {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "whois timed out"))?
    }
}

/// The registry server named by an IANA `refer:` / `whois:` line.
pub fn parse_referral(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        ((key == "refer" || key == "whois") && !value.is_empty()).then(|| value.to_string())
    })
}

#[async_trait]
impl OwnershipLookup for WhoisLookup {
    async fn contact_emails(&self, domain: &str) -> Vec<String> {
        let iana = match self.query(IANA_SERVER, domain).await {
            Ok(text) => text,
            Err(e) => {
                debug!(domain, error = %e, "WHOIS lookup failed");
                return Vec::new();
            }
        };

        let Some(registry) = parse_referral(&iana) else {
            return find_emails(&iana).into_iter().collect();
        };

        match self.query(&registry, domain).await {
            Ok(text) => find_emails(&text).into_iter().collect(),
            Err(e) => {
                debug!(domain, registry = %registry, error = %e, "WHOIS registry lookup failed");
                Vec::new()
            }
        }
    }
}
