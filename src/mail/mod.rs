//! Mail-retrieval seam — message snapshot types and the `MailClient` trait.
//!
//! The pipeline only ever sees [`EmailContext`] snapshots. Transport details
//! (REST endpoints, payload walking, base64 decode) live in [`rest`].

pub mod rest;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::MailError;

pub use rest::RestMailClient;

/// Reference to a message attachment — bytes are fetched separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Attachment id within the message.
    pub id: String,
    /// Original filename.
    pub filename: String,
    /// Declared MIME type.
    pub mime_type: String,
}

/// Immutable per-message snapshot handed to the classifier and handlers.
#[derive(Debug, Clone)]
pub struct EmailContext {
    /// Service-assigned message id.
    pub id: String,
    /// Internal delivery timestamp, milliseconds since epoch.
    pub internal_ts: i64,
    /// From header.
    pub sender: String,
    /// To/Cc/Bcc recipients, flattened.
    pub recipients: Vec<String>,
    /// Subject header.
    pub subject: String,
    /// Date header, as sent.
    pub date: String,
    /// Body reduced to plain text (markup stripped, whitespace collapsed).
    pub body: String,
    /// Attachment references.
    pub attachments: Vec<AttachmentRef>,
}

/// Mail-retrieval API seam.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Fetch messages delivered at or after the given watermark.
    ///
    /// Implementations may use a coarse upstream time filter — the poller
    /// re-filters to millisecond precision, so returning a superset is fine.
    async fn fetch_since(&self, watermark_ms: i64) -> Result<Vec<EmailContext>, MailError>;

    /// Fetch the raw bytes of one attachment.
    async fn fetch_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailError>;
}

static MARKUP_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());

/// Best-effort reduction of an email body to plain text.
///
/// Strips markup tags, collapses runs of spaces/tabs, and squeezes repeated
/// blank lines. Line structure is preserved — the financial-window filter
/// downstream works line by line.
pub fn strip_markup(text: &str) -> String {
    let text = MARKUP_TAG.replace_all(text, " ");
    let text = INLINE_SPACE.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n");
    text.trim().to_string()
}

/// Lowercase and collapse every whitespace run to a single space.
///
/// All rule-table text comparisons go through this, which makes matching
/// robust against line wrapping and encoding noise.
pub fn normalize_ws(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space && !out.is_empty() {
                out.push(' ');
            }
            in_space = true;
        } else {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            in_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}
