//! REST mail-retrieval client.
//!
//! Thin transport over a Gmail-style message API: list ids newer than a
//! coarse timestamp, fetch full messages, fetch attachment bytes. Payload
//! decoding is pure and unit-tested; auth is a static bearer token — token
//! acquisition/refresh is out of scope.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::MailError;
use crate::mail::{AttachmentRef, EmailContext, MailClient, strip_markup};

const PAGE_SIZE: u32 = 100;

/// Mail client over the retrieval REST API.
pub struct RestMailClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl RestMailClient {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, MailError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| MailError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MailError::Http(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| MailError::MalformedPayload(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MailClient for RestMailClient {
    async fn fetch_since(&self, watermark_ms: i64) -> Result<Vec<EmailContext>, MailError> {
        // The upstream filter is whole-second; the poller re-filters to ms.
        let after_seconds = (watermark_ms / 1000).max(0);
        let query = format!("in:inbox after:{after_seconds}");
        debug!(query = %query, "Listing messages");

        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!(
                "{}/messages?q={}&maxResults={}",
                self.base_url,
                urlencode(&query),
                PAGE_SIZE
            );
            if let Some(ref token) = page_token {
                url.push_str("&pageToken=");
                url.push_str(token);
            }

            let page: ListResponse = self
                .get_json(&url)
                .await
                .map_err(|e| MailError::ListFailed(e.to_string()))?;
            ids.extend(page.messages.into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        let mut contexts = Vec::with_capacity(ids.len());
        for id in ids {
            let url = format!("{}/messages/{}?format=full", self.base_url, id);
            let full: FullMessage =
                self.get_json(&url)
                    .await
                    .map_err(|e| MailError::FetchFailed {
                        id: id.clone(),
                        reason: e.to_string(),
                    })?;
            contexts.push(context_from_message(full));
        }

        debug!(count = contexts.len(), "Fetched full messages");
        Ok(contexts)
    }

    async fn fetch_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailError> {
        let url = format!(
            "{}/messages/{}/attachments/{}",
            self.base_url, message_id, attachment_id
        );
        let body: AttachmentData =
            self.get_json(&url)
                .await
                .map_err(|e| MailError::AttachmentFailed {
                    message_id: message_id.to_string(),
                    attachment_id: attachment_id.to_string(),
                    reason: e.to_string(),
                })?;

        let data = body.data.unwrap_or_default();
        decode_b64url(&data).ok_or_else(|| MailError::AttachmentFailed {
            message_id: message_id.to_string(),
            attachment_id: attachment_id.to_string(),
            reason: "attachment data is not valid base64url".to_string(),
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FullMessage {
    id: String,
    #[serde(rename = "internalDate", default)]
    internal_date: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    data: Option<String>,
    #[serde(rename = "attachmentId")]
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentData {
    data: Option<String>,
}

// ── Payload decoding (pure) ─────────────────────────────────────────

fn context_from_message(msg: FullMessage) -> EmailContext {
    let internal_ts = msg.internal_date.parse::<i64>().unwrap_or(0);
    let sender = header_value(&msg.payload, "From");
    let subject = header_value(&msg.payload, "Subject");
    let date = header_value(&msg.payload, "Date");
    let recipients = collect_recipients(&msg.payload);
    let body = strip_markup(&collect_body_text(&msg.payload));
    let attachments = collect_attachments(&msg.payload);

    EmailContext {
        id: msg.id,
        internal_ts,
        sender,
        recipients,
        subject,
        date,
        body,
        attachments,
    }
}

fn header_value(payload: &Payload, name: &str) -> String {
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

fn collect_recipients(payload: &Payload) -> Vec<String> {
    let mut out = Vec::new();
    for header in ["To", "Cc", "Bcc"] {
        let block = header_value(payload, header);
        out.extend(
            block
                .split([';', ','])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
    }
    out
}

fn collect_body_text(payload: &Payload) -> String {
    fn walk(part: &Payload, out: &mut Vec<String>) {
        if !part.parts.is_empty() {
            for p in &part.parts {
                walk(p, out);
            }
            return;
        }
        if matches!(part.mime_type.as_str(), "text/plain" | "text/html")
            && let Some(ref data) = part.body.data
            && let Some(bytes) = decode_b64url(data)
        {
            out.push(String::from_utf8_lossy(&bytes).into_owned());
        }
    }

    if payload.mime_type.starts_with("multipart/") || !payload.parts.is_empty() {
        let mut chunks = Vec::new();
        walk(payload, &mut chunks);
        chunks.join("\n")
    } else {
        payload
            .body
            .data
            .as_deref()
            .and_then(decode_b64url)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

fn collect_attachments(payload: &Payload) -> Vec<AttachmentRef> {
    fn walk(part: &Payload, out: &mut Vec<AttachmentRef>) {
        for p in &part.parts {
            walk(p, out);
        }
        if !part.filename.is_empty()
            && let Some(ref id) = part.body.attachment_id
        {
            out.push(AttachmentRef {
                id: id.clone(),
                filename: part.filename.clone(),
                mime_type: part.mime_type.clone(),
            });
        }
    }
    let mut out = Vec::new();
    walk(payload, &mut out);
    out
}

/// Decode base64url data, tolerating both padded and unpadded encodings.
fn decode_b64url(data: &str) -> Option<Vec<u8>> {
    URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data))
        .ok()
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
