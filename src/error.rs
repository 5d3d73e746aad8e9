//! Error types for Remit Watch.

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Decryption error: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration file {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail-retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail list request failed: {0}")]
    ListFailed(String),

    #[error("Failed to fetch message {id}: {reason}")]
    FetchFailed { id: String, reason: String },

    #[error("Failed to fetch attachment {attachment_id} of message {message_id}: {reason}")]
    AttachmentFailed {
        message_id: String,
        attachment_id: String,
        reason: String,
    },

    #[error("Malformed message payload: {0}")]
    MalformedPayload(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Extraction-service errors.
///
/// `RateLimited` is the only transient variant — everything else fails the
/// call immediately with no retry.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Extraction service rate limited")]
    RateLimited,

    #[error("Extraction request failed: {0}")]
    RequestFailed(String),

    #[error("Extraction service authentication failed")]
    AuthFailed,

    #[error("Invalid extraction response: {0}")]
    InvalidResponse(String),

    #[error("Rate limit retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtractError {
    /// Whether this failure is transient and worth a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Document-decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("Failed to open document: {0}")]
    Open(String),

    #[error("Password rejected by backend {backend}")]
    BadPassword { backend: &'static str },

    #[error("Document is encrypted and no candidate password worked")]
    StillEncrypted,

    #[error("Text extraction failed: {0}")]
    TextExtraction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document-archival errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Folder lookup/creation failed: {0}")]
    Folder(String),

    #[error("Upload of {filename} failed: {reason}")]
    Upload { filename: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Tabular-store and persisted-state errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handler/dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No handler registered for category {0}")]
    NoHandler(String),

    #[error("Handler {handler} failed: {reason}")]
    HandlerFailed { handler: String, reason: String },

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Decryption error: {0}")]
    Decrypt(#[from] DecryptError),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
