//! Inbound mail: raw IMAP over rustls, parsed with mail-parser.
//!
//! The IMAP session is blocking and runs inside `spawn_blocking`. Messages
//! are fetched with `BODY.PEEK[]` so they stay unseen until the caller has
//! recorded them and calls [`Mailbox::mark_seen`].

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders, PartType};
use secrecy::ExposeSecret;

use crate::channels::email::EmailConfig;
use crate::error::ChannelError;

/// Body used when a message has no text/plain part.
pub const NO_PLAIN_TEXT: &str = "[No text/plain part found]";

/// An unseen message as fetched from the server.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: String,
    pub bytes: Vec<u8>,
}

/// The parts of an inbound message the workflow cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    /// Lowercased sender address.
    pub sender: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Source of unseen inbound mail.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Fetch every unseen message without marking it seen.
    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, ChannelError>;

    /// Flag messages as seen.
    async fn mark_seen(&self, uids: &[String]) -> Result<(), ChannelError>;
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse raw RFC 822 bytes. Returns `None` when there is no usable sender.
pub fn parse_inbound(raw: &[u8]) -> Option<InboundReply> {
    let parsed = MessageParser::default().parse(raw)?;
    let sender = extract_sender(&parsed)?;
    let body = first_plain_text(&parsed)
        .or_else(|| single_part_html(&parsed))
        .unwrap_or_else(|| NO_PLAIN_TEXT.to_string());

    Some(InboundReply {
        sender,
        subject: parsed.subject().map(|s| s.to_string()),
        body,
    })
}

fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// First inline text/plain part. A part without a Content-Type is text/plain.
fn first_plain_text(parsed: &mail_parser::Message) -> Option<String> {
    parsed.parts.iter().find_map(|part| {
        let is_attachment = MimeHeaders::content_disposition(part)
            .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"));
        let is_plain = MimeHeaders::content_type(part).is_none_or(|ct| {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_none_or(|sub| sub.eq_ignore_ascii_case("plain"))
        });
        match &part.body {
            PartType::Text(text) if is_plain && !is_attachment => Some(text.trim().to_string()),
            _ => None,
        }
    })
}

/// A message that is nothing but an HTML body, reduced to text.
fn single_part_html(parsed: &mail_parser::Message) -> Option<String> {
    match parsed.parts.as_slice() {
        [part] => match &part.body {
            PartType::Html(html) => Some(strip_html(html)),
            _ => None,
        },
        _ => None,
    }
}

pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for the blocking IMAP session.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Untagged lines plus any literals (`{n}` payloads) in a tagged response.
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

impl ImapResponse {
    fn is_ok(&self, tag: &str) -> bool {
        self.lines
            .last()
            .is_some_and(|l| l.starts_with(&format!("{tag} OK")))
    }
}

/// Parse the `{n}` literal length at the end of a response line.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end_matches(['\r', '\n']);
    let open = line.rfind('{')?;
    line.strip_suffix('}')?[open + 1..].parse().ok()
}

/// Quote a string for an IMAP command argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Numbers from `* SEARCH 1 2 3` lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

struct ImapSession {
    stream: BufReader<TlsStream>,
    tag_counter: u32,
}

impl ImapSession {
    fn connect(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            tag_counter: 0,
        };
        let _greeting = session.read_line()?;

        let login = session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        if !login.0 {
            return Err("IMAP login failed".into());
        }
        let select = session.command("SELECT \"INBOX\"")?;
        if !select.0 {
            return Err("IMAP SELECT INBOX failed".into());
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err("IMAP connection closed".into());
        }
        Ok(String::from_utf8_lossy(&buf).to_string())
    }

    /// Send a tagged command and collect its response. Returns whether the
    /// server answered OK.
    fn command(&mut self, cmd: &str) -> Result<(bool, ImapResponse), ImapError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);
        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = ImapResponse {
            lines: Vec::new(),
            literals: Vec::new(),
        };
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            let done = line.starts_with(&format!("{tag} "));
            response.lines.push(line);
            if done {
                break;
            }
        }
        Ok((response.is_ok(&tag), response))
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

fn fetch_unseen_blocking(config: &EmailConfig) -> Result<Vec<RawMessage>, ImapError> {
    let mut session = ImapSession::connect(config)?;
    let (ok, search) = session.command("UID SEARCH UNSEEN")?;
    if !ok {
        return Err("IMAP SEARCH failed".into());
    }

    let mut messages = Vec::new();
    for uid in parse_search(&search.lines) {
        let (ok, fetch) = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        match fetch.literals.into_iter().next() {
            Some(bytes) if ok => messages.push(RawMessage { uid, bytes }),
            _ => tracing::warn!(%uid, "IMAP fetch returned no message body"),
        }
    }

    session.logout();
    Ok(messages)
}

fn mark_seen_blocking(config: &EmailConfig, uids: &[String]) -> Result<(), ImapError> {
    let mut session = ImapSession::connect(config)?;
    let (ok, _) = session.command(&format!("UID STORE {} +FLAGS (\\Seen)", uids.join(",")))?;
    session.logout();
    if !ok {
        return Err("IMAP STORE failed".into());
    }
    Ok(())
}

/// IMAP mailbox over implicit TLS.
pub struct ImapMailbox {
    config: EmailConfig,
}

impl ImapMailbox {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, ChannelError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen_blocking(&config))
            .await
            .map_err(|e| ChannelError::Disconnected {
                name: "imap".into(),
                reason: format!("IMAP task failed: {e}"),
            })?
            .map_err(|e| ChannelError::Disconnected {
                name: "imap".into(),
                reason: e.to_string(),
            })
    }

    async fn mark_seen(&self, uids: &[String]) -> Result<(), ChannelError> {
        if uids.is_empty() {
            return Ok(());
        }
        let config = self.config.clone();
        let uids = uids.to_vec();
        tokio::task::spawn_blocking(move || mark_seen_blocking(&config, &uids))
            .await
            .map_err(|e| ChannelError::Disconnected {
                name: "imap".into(),
                reason: format!("IMAP task failed: {e}"),
            })?
            .map_err(|e| ChannelError::Disconnected {
                name: "imap".into(),
                reason: e.to_string(),
            })
    }
}
