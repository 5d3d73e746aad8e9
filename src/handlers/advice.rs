//! Credit-advice handler: attachment download → decode → extraction →
//! archival → keyed merge.
//!
//! Archival and extraction are independent: a document that cannot be
//! decoded or is judged irrelevant is still archived, it just contributes
//! no store row.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::archive::ArchiveClient;
use crate::config::Config;
use crate::decrypt::{DecryptOutcome, DocumentCodec, PasswordRules, candidate_passwords};
use crate::error::PipelineError;
use crate::extract::schema::ADVICE_FIELDS;
use crate::extract::{ADVICE_SCHEMA, Extractor, LINKAGE_FIELD, extract_with_retry, financial_window};
use crate::handlers::intimation::META_COLUMNS;
use crate::mail::{AttachmentRef, EmailContext, MailClient};
use crate::pipeline::Handler;
use crate::pipeline::rules::{Category, MatchResult};
use crate::store::{self, INWARD_PK, Sheet, SheetStore};

pub struct AdviceHandler {
    mail: Arc<dyn MailClient>,
    extractor: Arc<dyn Extractor>,
    archive: Option<Arc<dyn ArchiveClient>>,
    codec: Arc<dyn DocumentCodec>,
    sheet_store: Arc<dyn SheetStore>,
    config: Config,
    password_rules: Option<PasswordRules>,
}

impl AdviceHandler {
    pub fn new(
        mail: Arc<dyn MailClient>,
        extractor: Arc<dyn Extractor>,
        archive: Option<Arc<dyn ArchiveClient>>,
        codec: Arc<dyn DocumentCodec>,
        sheet_store: Arc<dyn SheetStore>,
        config: Config,
        password_rules: Option<PasswordRules>,
    ) -> Self {
        Self {
            mail,
            extractor,
            archive,
            codec,
            sheet_store,
            config,
            password_rules,
        }
    }

    fn allowed_columns() -> Vec<&'static str> {
        let mut allowed: Vec<&'static str> = ADVICE_FIELDS.to_vec();
        allowed.push(INWARD_PK);
        allowed.push("SavedFiles");
        allowed.push("ArchiveFileId");
        allowed.push("ArchiveFileUrl");
        allowed.extend_from_slice(META_COLUMNS);
        allowed
    }

    async fn download(&self, ctx: &EmailContext, att: &AttachmentRef) -> Option<PathBuf> {
        let bytes = match self.mail.fetch_attachment(&ctx.id, &att.id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(id = %ctx.id, filename = %att.filename, error = %e,
                      "Attachment fetch failed");
                return None;
            }
        };
        // Strip any path components the remote filename may carry.
        let filename = Path::new(&att.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.pdf", att.id));
        if let Err(e) = tokio::fs::create_dir_all(&self.config.download_dir).await {
            warn!(error = %e, "Could not create download directory");
            return None;
        }
        let path = self.config.download_dir.join(filename);
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Attachment write failed");
                None
            }
        }
    }

    fn open_document(
        &self,
        ctx: &EmailContext,
        matched: &MatchResult,
        path: &Path,
    ) -> Option<DecryptOutcome> {
        if !self.codec.is_encrypted(path) {
            return Some(DecryptOutcome {
                path: path.to_path_buf(),
                password: None,
                decrypted_copy: false,
            });
        }

        let candidates = candidate_passwords(
            matched.pdf_password.as_deref(),
            &self.config,
            self.password_rules.as_ref(),
            &ctx.sender,
            &ctx.subject,
            &ctx.body,
        );
        match self.codec.decrypt(path, &candidates) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(id = %ctx.id, path = %path.display(), error = %e,
                      "Document could not be opened, skipping extraction");
                None
            }
        }
    }

    async fn archive_document(&self, folder_id: Option<&str>, path: &Path) -> Option<crate::archive::ArchivedFile> {
        let archive = self.archive.as_ref()?;
        let folder_id = folder_id?;
        match archive.upload(folder_id, path, "application/pdf").await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Archival upload failed");
                None
            }
        }
    }

    fn saved_files_for(sheet: &Sheet, inward: &str, filename: &str) -> String {
        let previous = sheet
            .rows
            .iter()
            .find(|row| row.get(INWARD_PK).is_some_and(|v| v == inward))
            .and_then(|row| row.get("SavedFiles"))
            .map(String::as_str);
        store::merged_file_list(previous, filename)
    }
}

#[async_trait]
impl Handler for AdviceHandler {
    fn category(&self) -> Category {
        Category::CreditAdvice
    }

    async fn handle(
        &self,
        ctx: &EmailContext,
        matched: &MatchResult,
    ) -> Result<(), PipelineError> {
        let pdfs: Vec<&AttachmentRef> = ctx
            .attachments
            .iter()
            .filter(|a| a.filename.to_lowercase().ends_with(".pdf"))
            .collect();
        if pdfs.is_empty() {
            info!(id = %ctx.id, "Advice message carries no recognized document");
            return Ok(());
        }

        let folder_id = match &self.archive {
            Some(archive) => match archive.ensure_folder(&self.config.archive_folder_name).await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "Archive folder unavailable, uploads disabled");
                    None
                }
            },
            None => None,
        };

        let allowed = Self::allowed_columns();
        let mut sheet = self.sheet_store.load()?;
        let mut written = 0;

        for att in pdfs {
            let Some(path) = self.download(ctx, att).await else {
                continue;
            };
            // Archive the decrypted copy when decryption produced one; an
            // undecryptable document is archived in its protected form.
            let outcome = self.open_document(ctx, matched, &path);
            let archive_path = outcome.as_ref().map_or(path.as_path(), |o| o.path.as_path());
            let archived = self.archive_document(folder_id.as_deref(), archive_path).await;

            let Some(outcome) = outcome else {
                continue;
            };
            let text = match self.codec.read_text(&outcome) {
                Ok(text) => text,
                Err(e) => {
                    warn!(id = %ctx.id, path = %path.display(), error = %e,
                          "Text extraction failed");
                    continue;
                }
            };

            let window = financial_window(&text, self.config.max_chars_document);
            let result =
                match extract_with_retry(self.extractor.as_ref(), &window, &ADVICE_SCHEMA).await
                {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(id = %ctx.id, error = %e, "Advice extraction failed");
                        continue;
                    }
                };

            let inward = result
                .fields
                .get(LINKAGE_FIELD)
                .map(String::as_str)
                .unwrap_or("");
            if !result.is_relevant || inward.is_empty() {
                info!(
                    id = %ctx.id,
                    relevant = result.is_relevant,
                    archived = archived.is_some(),
                    "Document not linkable, archived without a store row"
                );
                continue;
            }

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut updates: BTreeMap<String, String> = result
                .fields
                .iter()
                .filter(|(k, _)| ADVICE_FIELDS.iter().any(|f| f == k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            updates.insert(INWARD_PK.into(), inward.to_string());
            updates.insert(
                "SavedFiles".into(),
                Self::saved_files_for(&sheet, inward, &filename),
            );
            if let Some(file) = &archived {
                updates.insert("ArchiveFileId".into(), file.id.clone());
                updates.insert("ArchiveFileUrl".into(), file.url.clone());
            }
            updates.insert("EMAIL_Type".into(), "CreditAdvice".into());
            updates.insert("EmailSubject".into(), ctx.subject.clone());
            updates.insert("EmailFrom".into(), ctx.sender.clone());
            updates.insert("EmailDate".into(), ctx.date.clone());

            let cells = store::merge(&mut sheet, INWARD_PK, &updates, &allowed);
            debug!(id = %ctx.id, %inward, cells, "Advice merged");
            written += cells;
        }

        if written > 0 {
            self.sheet_store.save(&sheet)?;
            info!(id = %ctx.id, cells = written, "Advice stored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use secrecy::SecretString;

    use crate::archive::ArchivedFile;
    use crate::error::{ArchiveError, DecryptError, ExtractError, MailError, StoreError};
    use crate::extract::{ExtractionResult, ExtractionSchema};

    fn test_config(dir: &Path) -> Config {
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
            state_path: dir.join("state.json"),
            store_path: dir.join("store.json"),
            download_dir: dir.join("downloads"),
            pdf_password: None,
            source_passwords: vec![],
            pdf_password_list: vec![],
            password_rules_path: None,
            advice_pdf_password: None,
        }
    }

    struct FakeMail;

    #[async_trait]
    impl MailClient for FakeMail {
        async fn fetch_since(&self, _watermark_ms: i64) -> Result<Vec<EmailContext>, MailError> {
            Ok(vec![])
        }

        async fn fetch_attachment(
            &self,
            _message_id: &str,
            _attachment_id: &str,
        ) -> Result<Vec<u8>, MailError> {
            Ok(b"%PDF-1.4 fake".to_vec())
        }
    }

    struct FakeCodec {
        encrypted: bool,
        accepts: Option<String>,
        produces_copy: bool,
        text: String,
        seen_candidates: Mutex<Vec<Vec<String>>>,
    }

    impl DocumentCodec for FakeCodec {
        fn is_encrypted(&self, _path: &Path) -> bool {
            self.encrypted
        }

        fn decrypt(
            &self,
            path: &Path,
            candidates: &[String],
        ) -> Result<DecryptOutcome, DecryptError> {
            self.seen_candidates
                .lock()
                .unwrap()
                .push(candidates.to_vec());
            match &self.accepts {
                Some(pw) if candidates.contains(pw) => {
                    if self.produces_copy {
                        Ok(DecryptOutcome {
                            path: crate::decrypt::backends::decrypted_sibling(path),
                            password: None,
                            decrypted_copy: true,
                        })
                    } else {
                        Ok(DecryptOutcome {
                            path: path.to_path_buf(),
                            password: Some(pw.clone()),
                            decrypted_copy: false,
                        })
                    }
                }
                _ => Err(DecryptError::StillEncrypted),
            }
        }

        fn read_text(&self, _outcome: &DecryptOutcome) -> Result<String, DecryptError> {
            Ok(self.text.clone())
        }
    }

    struct FixedExtractor {
        result: ExtractionResult,
    }

    #[async_trait]
    impl Extractor for FixedExtractor {
        async fn extract(
            &self,
            _text: &str,
            _schema: &ExtractionSchema,
        ) -> Result<ExtractionResult, ExtractError> {
            Ok(self.result.clone())
        }
    }

    struct MemorySheetStore {
        sheet: Mutex<Sheet>,
    }

    impl SheetStore for MemorySheetStore {
        fn load(&self) -> Result<Sheet, StoreError> {
            Ok(self.sheet.lock().unwrap().clone())
        }

        fn save(&self, sheet: &Sheet) -> Result<(), StoreError> {
            *self.sheet.lock().unwrap() = sheet.clone();
            Ok(())
        }
    }

    struct CountingArchive {
        uploads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArchiveClient for CountingArchive {
        async fn ensure_folder(&self, _name: &str) -> Result<String, ArchiveError> {
            Ok("folder-1".into())
        }

        async fn upload(
            &self,
            _folder_id: &str,
            path: &Path,
            _mime_type: &str,
        ) -> Result<ArchivedFile, ArchiveError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.uploads.lock().unwrap().push(name.clone());
            Ok(ArchivedFile {
                id: format!("id-{name}"),
                url: format!("https://archive.example/{name}"),
            })
        }
    }

    fn ctx(attachments: Vec<AttachmentRef>) -> EmailContext {
        EmailContext {
            id: "m1".into(),
            internal_ts: 1,
            sender: "advices@bank.example".into(),
            recipients: vec![],
            subject: "Debit cum credit advice".into(),
            date: "Mon, 1 Jan 2024 10:00:00 +0000".into(),
            body: "please find attached. password: Hint99".into(),
            attachments,
        }
    }

    fn pdf(name: &str) -> AttachmentRef {
        AttachmentRef {
            id: "att-1".into(),
            filename: name.into(),
            mime_type: "application/pdf".into(),
        }
    }

    fn matched(password: Option<&str>) -> MatchResult {
        MatchResult {
            rule_name: "credit_advice".into(),
            category: Category::CreditAdvice,
            stop_after_match: true,
            pdf_password: password.map(str::to_owned),
            reasons: vec![],
        }
    }

    fn relevant_result(inward: &str) -> ExtractionResult {
        ExtractionResult {
            is_relevant: true,
            confidence: 0.95,
            fields: [
                (LINKAGE_FIELD.to_string(), inward.to_string()),
                ("AmountFCY".to_string(), "2500.00".to_string()),
            ]
            .into(),
        }
    }

    fn handler(
        dir: &Path,
        codec: Arc<FakeCodec>,
        extractor_result: ExtractionResult,
        archive: Option<Arc<CountingArchive>>,
    ) -> (AdviceHandler, Arc<MemorySheetStore>) {
        let store = Arc::new(MemorySheetStore {
            sheet: Mutex::new(Sheet::default()),
        });
        let h = AdviceHandler::new(
            Arc::new(FakeMail),
            Arc::new(FixedExtractor {
                result: extractor_result,
            }),
            archive.map(|a| a as Arc<dyn ArchiveClient>),
            codec,
            Arc::clone(&store) as Arc<dyn SheetStore>,
            test_config(dir),
            None,
        );
        (h, store)
    }

    #[tokio::test]
    async fn no_pdf_attachment_is_a_quiet_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            encrypted: false,
            accepts: None,
            produces_copy: false,
            text: String::new(),
            seen_candidates: Mutex::new(vec![]),
        });
        let (h, store) = handler(dir.path(), codec, relevant_result("IRM-1"), None);

        let ctx = ctx(vec![AttachmentRef {
            id: "att-1".into(),
            filename: "notes.txt".into(),
            mime_type: "text/plain".into(),
        }]);
        h.handle(&ctx, &matched(None)).await.unwrap();
        assert!(store.sheet.lock().unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn encrypted_document_uses_rule_password_first_and_body_hints() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            encrypted: true,
            accepts: Some("Hint99".into()),
            produces_copy: false,
            text: "advice text".into(),
            seen_candidates: Mutex::new(vec![]),
        });
        let (h, store) = handler(dir.path(), Arc::clone(&codec), relevant_result("IRM-1"), None);

        h.handle(&ctx(vec![pdf("advice.pdf")]), &matched(Some("rule-pw")))
            .await
            .unwrap();

        let candidates = codec.seen_candidates.lock().unwrap();
        // Rule override first, body hint last
        assert_eq!(candidates[0], vec!["rule-pw", "Hint99"]);
        let sheet = store.sheet.lock().unwrap();
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0][INWARD_PK], "IRM-1");
    }

    #[tokio::test]
    async fn undecryptable_document_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            encrypted: true,
            accepts: None,
            produces_copy: false,
            text: String::new(),
            seen_candidates: Mutex::new(vec![]),
        });
        let (h, store) = handler(dir.path(), codec, relevant_result("IRM-1"), None);

        h.handle(&ctx(vec![pdf("advice.pdf")]), &matched(None))
            .await
            .unwrap();
        assert!(store.sheet.lock().unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn irrelevant_document_is_archived_without_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            encrypted: false,
            accepts: None,
            produces_copy: false,
            text: "unrelated flyer".into(),
            seen_candidates: Mutex::new(vec![]),
        });
        let archive = Arc::new(CountingArchive {
            uploads: Mutex::new(vec![]),
        });
        let (h, store) = handler(
            dir.path(),
            codec,
            ExtractionResult {
                is_relevant: false,
                confidence: 0.2,
                fields: BTreeMap::new(),
            },
            Some(Arc::clone(&archive)),
        );

        h.handle(&ctx(vec![pdf("flyer.pdf")]), &matched(None))
            .await
            .unwrap();
        assert_eq!(*archive.uploads.lock().unwrap(), vec!["flyer.pdf"]);
        assert!(store.sheet.lock().unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn repeated_advice_merges_and_deduplicates_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            encrypted: false,
            accepts: None,
            produces_copy: false,
            text: "advice text".into(),
            seen_candidates: Mutex::new(vec![]),
        });
        let (h, store) = handler(dir.path(), codec, relevant_result("IRM-7"), None);

        let ctx = ctx(vec![pdf("advice_7.pdf")]);
        h.handle(&ctx, &matched(None)).await.unwrap();
        h.handle(&ctx, &matched(None)).await.unwrap();

        let sheet = store.sheet.lock().unwrap();
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0]["SavedFiles"], "advice_7.pdf");
        assert!(!sheet.rows[0].contains_key("ArchiveFileId"));
    }

    #[tokio::test]
    async fn archived_metadata_lands_in_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            encrypted: false,
            accepts: None,
            produces_copy: false,
            text: "advice text".into(),
            seen_candidates: Mutex::new(vec![]),
        });
        let archive = Arc::new(CountingArchive {
            uploads: Mutex::new(vec![]),
        });
        let (h, store) = handler(
            dir.path(),
            codec,
            relevant_result("IRM-3"),
            Some(archive),
        );

        h.handle(&ctx(vec![pdf("adv.pdf")]), &matched(None))
            .await
            .unwrap();
        let sheet = store.sheet.lock().unwrap();
        assert_eq!(sheet.rows[0]["ArchiveFileId"], "id-adv.pdf");
        assert_eq!(
            sheet.rows[0]["ArchiveFileUrl"],
            "https://archive.example/adv.pdf"
        );
    }

    #[tokio::test]
    async fn decrypted_copy_is_what_gets_archived() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            encrypted: true,
            accepts: Some("pw".into()),
            produces_copy: true,
            text: "advice text".into(),
            seen_candidates: Mutex::new(vec![]),
        });
        let archive = Arc::new(CountingArchive {
            uploads: Mutex::new(vec![]),
        });
        let (h, store) = handler(
            dir.path(),
            codec,
            relevant_result("IRM-5"),
            Some(Arc::clone(&archive)),
        );

        h.handle(&ctx(vec![pdf("adv.pdf")]), &matched(Some("pw")))
            .await
            .unwrap();

        // The plain sibling copy is uploaded, not the protected original
        assert_eq!(*archive.uploads.lock().unwrap(), vec!["adv.decrypted.pdf"]);
        let sheet = store.sheet.lock().unwrap();
        // The saved-file history still records the original filename
        assert_eq!(sheet.rows[0]["SavedFiles"], "adv.pdf");
    }
}
