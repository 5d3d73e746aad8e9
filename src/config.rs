//! Runtime configuration, built from environment variables.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Pipeline configuration.
///
/// Password material is held as plain strings because the decryption
/// subsystem assembles them into an ordered candidate list; they are never
/// written to logs. API credentials use [`SecretString`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Extraction service model identifier.
    pub extract_model: String,
    /// Extraction service API key.
    pub extract_api_key: SecretString,
    /// Extraction service base URL.
    pub extract_base_url: String,
    /// Max characters sent to the extraction service for body text.
    pub max_chars_body: usize,
    /// Max characters sent to the extraction service for document text.
    pub max_chars_document: usize,

    /// Mail-retrieval API base URL.
    pub mail_base_url: String,
    /// Mail-retrieval API bearer token.
    pub mail_api_token: SecretString,

    /// Document-archival API base URL.
    pub archive_base_url: String,
    /// Document-archival API bearer token. Archival is disabled when unset.
    pub archive_api_token: Option<SecretString>,
    /// Explicit archival folder id — skips the find-or-create lookup.
    pub archive_folder_id: Option<String>,
    /// Folder name used when no explicit folder id is configured.
    pub archive_folder_name: String,

    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Watermark/processed-id state file.
    pub state_path: PathBuf,
    /// Tabular store file.
    pub store_path: PathBuf,
    /// Directory for downloaded attachments.
    pub download_dir: PathBuf,

    /// Single global default document password.
    pub pdf_password: Option<String>,
    /// Per-source named default passwords (`PDF_PASSWORD_<NAME>`), sorted by name.
    pub source_passwords: Vec<(String, String)>,
    /// Comma-separated password list default.
    pub pdf_password_list: Vec<String>,
    /// Optional password lookup table (domains/senders/subjects maps).
    pub password_rules_path: Option<PathBuf>,
    /// Externalized password override for the second credit-advice rule.
    pub advice_pdf_password: Option<String>,
}

impl Config {
    /// Build configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let extract_api_key = require_env("EXTRACT_API_KEY")?;
        let mail_base_url = require_env("MAIL_API_BASE")?;
        let mail_api_token = require_env("MAIL_API_TOKEN")?;

        let mut source_passwords: Vec<(String, String)> = std::env::vars()
            .filter_map(|(k, v)| {
                let name = k.strip_prefix("PDF_PASSWORD_")?;
                if name.is_empty() || v.trim().is_empty() {
                    return None;
                }
                Some((name.to_string(), v.trim().to_string()))
            })
            .collect();
        source_passwords.sort_by(|a, b| a.0.cmp(&b.0));

        let pdf_password_list: Vec<String> = std::env::var("PDF_PASSWORDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            extract_model: env_or("EXTRACT_MODEL", "gpt-4o-mini"),
            extract_api_key: SecretString::from(extract_api_key),
            extract_base_url: env_or("EXTRACT_BASE_URL", "https://api.openai.com/v1"),
            max_chars_body: parse_env("EXTRACT_MAX_CHARS_BODY", 8_000)?,
            max_chars_document: parse_env("EXTRACT_MAX_CHARS_DOCUMENT", 12_000)?,
            mail_base_url,
            mail_api_token: SecretString::from(mail_api_token),
            archive_base_url: env_or(
                "ARCHIVE_API_BASE",
                "https://www.googleapis.com/drive/v3",
            ),
            archive_api_token: std::env::var("ARCHIVE_API_TOKEN")
                .ok()
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            archive_folder_id: std::env::var("ARCHIVE_FOLDER_ID")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            archive_folder_name: env_or("ARCHIVE_FOLDER_NAME", "advices"),
            poll_interval_secs: parse_env("POLL_INTERVAL_SECS", 30)?,
            state_path: PathBuf::from(env_or("STATE_PATH", "state.json")),
            store_path: PathBuf::from(env_or("STORE_PATH", "remittances.json")),
            download_dir: PathBuf::from(env_or("DOWNLOAD_DIR", "downloads")),
            pdf_password: non_empty_env("PDF_PASSWORD"),
            source_passwords,
            pdf_password_list,
            password_rules_path: non_empty_env("PASSWORD_RULES_PATH").map(PathBuf::from),
            advice_pdf_password: non_empty_env("ADVICE_PDF_PASSWORD"),
        })
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("could not parse '{raw}'"),
                })
        }
        _ => Ok(default),
    }
}
