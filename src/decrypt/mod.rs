//! Password-protected document handling.
//!
//! Candidate passwords are assembled from an ordered chain of sources and
//! tried against each decoding backend in turn. Passwords never reach the
//! logs; only which positional source produced the winning candidate does.

pub mod backends;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DecryptError;

pub use backends::{DecodeBackend, LopdfBackend, PdfExtractBackend, extract_text_guarded};

/// Password lookup table loaded from a JSON file, keyed by sender domain,
/// full sender address, or subject fragment. Each key maps to a list of
/// passwords to try.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordRules {
    #[serde(default)]
    pub domains: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub senders: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub subjects: HashMap<String, Vec<String>>,
}

impl PasswordRules {
    pub fn load(path: &Path) -> Result<Self, DecryptError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| DecryptError::Open(format!("bad password rules file: {e}")))
    }

    /// Passwords this table contributes for a message, senders before
    /// domains before subject fragments.
    ///
    /// All matching is substring containment on the raw headers — the From
    /// header usually reads `Display Name <user@domain>`, so suffix or
    /// equality tests would never fire.
    pub fn lookup(&self, sender: &str, subject: &str) -> Vec<String> {
        let sender_lc = sender.to_lowercase();
        let subject_lc = subject.to_lowercase();
        let mut out = Vec::new();

        for (addr, pws) in &self.senders {
            if sender_lc.contains(&addr.to_lowercase()) {
                out.extend(pws.iter().cloned());
            }
        }
        for (domain, pws) in &self.domains {
            if sender_lc.contains(&domain.to_lowercase()) {
                out.extend(pws.iter().cloned());
            }
        }
        for (fragment, pws) in &self.subjects {
            if subject_lc.contains(&fragment.to_lowercase()) {
                out.extend(pws.iter().cloned());
            }
        }
        out
    }
}

static BODY_PASSWORD_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:password|pwd)\s*[:\-]\s*([A-Za-z0-9@#_\-\.]+)").unwrap()
});

/// Passwords mentioned in the email body itself ("password: XYZ").
pub fn body_password_hints(body: &str) -> Vec<String> {
    BODY_PASSWORD_HINT
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect()
}

/// Assemble the ordered candidate list for one document.
///
/// Order: rule override, global default, per-source defaults, list defaults,
/// lookup-table matches, body hints. Duplicates keep their first position.
pub fn candidate_passwords(
    rule_override: Option<&str>,
    config: &Config,
    rules: Option<&PasswordRules>,
    sender: &str,
    subject: &str,
    body: &str,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |pw: String| {
        if !pw.is_empty() && !out.contains(&pw) {
            out.push(pw);
        }
    };

    if let Some(pw) = rule_override {
        push(pw.to_string());
    }
    if let Some(pw) = &config.pdf_password {
        push(pw.clone());
    }
    for (_, pw) in &config.source_passwords {
        push(pw.clone());
    }
    for pw in &config.pdf_password_list {
        push(pw.clone());
    }
    if let Some(rules) = rules {
        for pw in rules.lookup(sender, subject) {
            push(pw);
        }
    }
    for pw in body_password_hints(body) {
        push(pw);
    }
    out
}

/// Result of opening a possibly protected document.
#[derive(Debug, Clone)]
pub struct DecryptOutcome {
    /// Readable document path (the original, or a decrypted copy).
    pub path: PathBuf,
    /// Password to pass to the text reader, when the readable file is still
    /// the protected original.
    pub password: Option<String>,
    /// Whether `path` is a decrypted copy written next to the original.
    pub decrypted_copy: bool,
}

/// Seam over the document decoding stack so handlers can be tested without
/// real protected files.
pub trait DocumentCodec: Send + Sync {
    fn is_encrypted(&self, path: &Path) -> bool;

    /// Try each candidate password until one opens the document.
    fn decrypt(&self, path: &Path, candidates: &[String])
    -> Result<DecryptOutcome, DecryptError>;

    /// Extract the document's text.
    fn read_text(&self, outcome: &DecryptOutcome) -> Result<String, DecryptError>;
}

/// Production codec over the PDF backends.
pub struct PdfCodec {
    backends: Vec<Box<dyn DecodeBackend>>,
}

impl PdfCodec {
    pub fn new() -> Self {
        Self {
            backends: vec![Box::new(LopdfBackend), Box::new(PdfExtractBackend)],
        }
    }
}

impl Default for PdfCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentCodec for PdfCodec {
    fn is_encrypted(&self, path: &Path) -> bool {
        // The structural backend has the reliable probe.
        self.backends
            .first()
            .is_some_and(|b| b.is_encrypted(path))
    }

    fn decrypt(
        &self,
        path: &Path,
        candidates: &[String],
    ) -> Result<DecryptOutcome, DecryptError> {
        // All candidates against one backend before moving to the next, so
        // the copy-producing backend gets every chance first.
        for backend in &self.backends {
            for (position, password) in candidates.iter().enumerate() {
                match backend.try_password(path, password) {
                    Ok(readable) => {
                        let decrypted_copy = readable != path;
                        info!(
                            backend = backend.name(),
                            candidate = position,
                            decrypted_copy,
                            "Document opened"
                        );
                        return Ok(DecryptOutcome {
                            path: readable,
                            password: (!decrypted_copy).then(|| password.clone()),
                            decrypted_copy,
                        });
                    }
                    Err(e) => {
                        debug!(backend = backend.name(), candidate = position, error = %e,
                               "Candidate rejected");
                    }
                }
            }
        }
        warn!(candidates = candidates.len(), "No candidate password worked");
        Err(DecryptError::StillEncrypted)
    }

    fn read_text(&self, outcome: &DecryptOutcome) -> Result<String, DecryptError> {
        extract_text_guarded(&outcome.path, outcome.password.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn test_config() -> Config {
        Config {
            extract_model: "m".into(),
            extract_api_key: SecretString::from("k"),
            extract_base_url: "http://x".into(),
            max_chars_body: 8_000,
            max_chars_document: 12_000,
            mail_base_url: "http://x".into(),
            mail_api_token: SecretString::from("t"),
            archive_base_url: "http://x".into(),
            archive_api_token: None,
            archive_folder_id: None,
            archive_folder_name: "advices".into(),
            poll_interval_secs: 30,
            state_path: "state.json".into(),
            store_path: "store.json".into(),
            download_dir: "downloads".into(),
            pdf_password: Some("global-pw".into()),
            source_passwords: vec![("ACME".into(), "acme-pw".into())],
            pdf_password_list: vec!["list-pw".into(), "global-pw".into()],
            password_rules_path: None,
            advice_pdf_password: None,
        }
    }

    #[test]
    fn candidates_keep_source_order_and_dedup_first_position() {
        let config = test_config();
        let body = "Your statement password: body-pw for this month";
        let out = candidate_passwords(Some("rule-pw"), &config, None, "a@b.c", "subj", body);
        // "global-pw" appears once, at its config position, not its list one
        assert_eq!(
            out,
            vec!["rule-pw", "global-pw", "acme-pw", "list-pw", "body-pw"]
        );
    }

    #[test]
    fn lookup_table_contributes_by_sender_domain_and_subject() {
        let mut rules = PasswordRules::default();
        rules
            .senders
            .insert("alerts@bank.example".into(), vec!["s-pw".into()]);
        rules
            .domains
            .insert("bank.example".into(), vec!["d-pw1".into(), "d-pw2".into()]);
        rules
            .subjects
            .insert("credit advice".into(), vec!["j-pw".into()]);

        let hits = rules.lookup("ALERTS@BANK.EXAMPLE", "Re: Credit Advice 42");
        assert!(hits.contains(&"s-pw".to_string()));
        assert!(hits.contains(&"d-pw1".to_string()));
        assert!(hits.contains(&"d-pw2".to_string()));
        assert!(hits.contains(&"j-pw".to_string()));
        assert!(rules.lookup("x@other.example", "hello").is_empty());
    }

    #[test]
    fn lookup_matches_domain_inside_a_display_name_header() {
        let mut rules = PasswordRules::default();
        rules
            .domains
            .insert("bank.example".into(), vec!["d-pw".into()]);

        // Raw From header with display name and angle brackets
        let hits = rules.lookup("Treasury Alerts <alerts@bank.example>", "");
        assert_eq!(hits, vec!["d-pw"]);
    }

    #[test]
    fn rules_file_with_password_lists_deserializes() {
        let raw = r#"{
            "domains": {"bank.example": ["pw1", "pw2"]},
            "senders": {"alerts@bank.example": ["pw3"]}
        }"#;
        let rules: PasswordRules = serde_json::from_str(raw).unwrap();
        assert_eq!(rules.domains["bank.example"], vec!["pw1", "pw2"]);
        assert!(rules.subjects.is_empty());
    }

    #[test]
    fn body_hints_match_password_and_pwd_prefixes() {
        let body = "PDF Password: Abc@123\nsecond pwd - xy_z.9";
        assert_eq!(body_password_hints(body), vec!["Abc@123", "xy_z.9"]);
        assert!(body_password_hints("no secrets here").is_empty());
    }

    #[test]
    fn empty_chain_yields_no_candidates() {
        let mut config = test_config();
        config.pdf_password = None;
        config.source_passwords.clear();
        config.pdf_password_list.clear();
        let out = candidate_passwords(None, &config, None, "a@b.c", "s", "clean body");
        assert!(out.is_empty());
    }
}
