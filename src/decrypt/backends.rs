//! Decoding backends for protected PDF documents.
//!
//! Two independent backends because real bank advices are produced by a zoo
//! of generators and each library chokes on a different subset. The first
//! backend rewrites a decrypted sibling copy; the second validates the
//! password in place and leaves decryption to the text reader.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::DecryptError;

/// One way of opening a protected document with a password.
pub trait DecodeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the document at `path` is password protected.
    fn is_encrypted(&self, path: &Path) -> bool;

    /// Try `password` against the document. On success, returns the path of
    /// a readable document (either a decrypted copy or the original).
    fn try_password(&self, path: &Path, password: &str) -> Result<PathBuf, DecryptError>;
}

/// Structural decryption via `lopdf`: loads the document, decrypts it, and
/// saves a plain sibling copy.
pub struct LopdfBackend;

impl DecodeBackend for LopdfBackend {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn is_encrypted(&self, path: &Path) -> bool {
        match lopdf::Document::load(path) {
            Ok(doc) => doc.is_encrypted(),
            // Some generators emit files lopdf cannot even open until
            // decrypted; treat load failure as "possibly encrypted" and let
            // try_password decide.
            Err(_) => true,
        }
    }

    fn try_password(&self, path: &Path, password: &str) -> Result<PathBuf, DecryptError> {
        let mut doc =
            lopdf::Document::load(path).map_err(|e| DecryptError::Open(e.to_string()))?;
        if doc.is_encrypted() {
            doc.decrypt(password)
                .map_err(|_| DecryptError::BadPassword {
                    backend: self.name(),
                })?;
        }
        let out = decrypted_sibling(path);
        doc.save(&out).map_err(|e| DecryptError::Io(std::io::Error::other(e.to_string())))?;
        debug!(path = %out.display(), "Wrote decrypted copy");
        Ok(out)
    }
}

/// Validation via `pdf-extract`: a successful password-aware text pass proves
/// the password without rewriting the file.
pub struct PdfExtractBackend;

impl DecodeBackend for PdfExtractBackend {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn is_encrypted(&self, path: &Path) -> bool {
        // No cheap encryption probe in this library; a plain extraction
        // attempt failing on an openable file is the signal.
        extract_text_guarded(path, None).is_err()
    }

    fn try_password(&self, path: &Path, password: &str) -> Result<PathBuf, DecryptError> {
        extract_text_guarded(path, Some(password)).map_err(|_| DecryptError::BadPassword {
            backend: self.name(),
        })?;
        Ok(path.to_path_buf())
    }
}

/// Sibling path for the decrypted copy of `path`.
pub fn decrypted_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!("{stem}.decrypted.pdf"))
}

/// Extract text from a PDF, with or without a password.
///
/// The parser is known to panic on malformed files, so the call is isolated
/// behind `catch_unwind` and a panic surfaces as a normal error.
pub fn extract_text_guarded(
    path: &Path,
    password: Option<&str>,
) -> Result<String, DecryptError> {
    let path = path.to_path_buf();
    let password = password.map(str::to_owned);
    let outcome = std::panic::catch_unwind(move || match password.as_deref() {
        Some(pw) => pdf_extract::extract_text_encrypted(&path, pw),
        None => pdf_extract::extract_text(&path),
    });
    match outcome {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(DecryptError::TextExtraction(e.to_string())),
        Err(_) => Err(DecryptError::TextExtraction(
            "parser panicked on malformed document".into(),
        )),
    }
}
