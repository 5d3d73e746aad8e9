//! End-to-end pipeline scenarios over in-memory collaborators: poll →
//! classify → dispatch → handler → store, exercising the production rule
//! table and wiring.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;

use remit_watch::config::Config;
use remit_watch::decrypt::{DecryptOutcome, DocumentCodec};
use remit_watch::error::{DecryptError, ExtractError, MailError, StoreError};
use remit_watch::extract::{ExtractionResult, ExtractionSchema, Extractor};
use remit_watch::handlers::default_dispatcher;
use remit_watch::mail::{AttachmentRef, EmailContext, MailClient};
use remit_watch::pipeline::RuleSet;
use remit_watch::poller::{Poller, StateStore, WatermarkState};
use remit_watch::store::{INWARD_PK, Sheet, SheetStore};

fn test_config(dir: &Path) -> Config {
    Config {
        extract_model: "test-model".into(),
        extract_api_key: SecretString::from("key"),
        extract_base_url: "http://extract.test".into(),
        max_chars_body: 8_000,
        max_chars_document: 12_000,
        mail_base_url: "http://mail.test".into(),
        mail_api_token: SecretString::from("token"),
        archive_base_url: "http://archive.test".into(),
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
        advice_pdf_password: Some("Tr@de1".into()),
    }
}

struct FixedMail {
    messages: Vec<EmailContext>,
}

#[async_trait]
impl MailClient for FixedMail {
    async fn fetch_since(&self, watermark_ms: i64) -> Result<Vec<EmailContext>, MailError> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.internal_ts > watermark_ms)
            .cloned()
            .collect())
    }

    async fn fetch_attachment(
        &self,
        _message_id: &str,
        _attachment_id: &str,
    ) -> Result<Vec<u8>, MailError> {
        Ok(b"%PDF-1.4 synthetic".to_vec())
    }
}

struct FixedExtractor {
    result: ExtractionResult,
    calls: Mutex<usize>,
}

#[async_trait]
impl Extractor for FixedExtractor {
    async fn extract(
        &self,
        _text: &str,
        _schema: &ExtractionSchema,
    ) -> Result<ExtractionResult, ExtractError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.result.clone())
    }
}

struct FakeCodec {
    encrypted: bool,
    accepts: Option<String>,
    text: String,
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
        match &self.accepts {
            Some(pw) if candidates.contains(pw) => Ok(DecryptOutcome {
                path: path.to_path_buf(),
                password: Some(pw.clone()),
                decrypted_copy: false,
            }),
            _ => Err(DecryptError::StillEncrypted),
        }
    }

    fn read_text(&self, _outcome: &DecryptOutcome) -> Result<String, DecryptError> {
        Ok(self.text.clone())
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

struct MemoryStateStore {
    state: Mutex<Option<WatermarkState>>,
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<WatermarkState>, StoreError> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn save(&self, state: &WatermarkState) -> Result<(), StoreError> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

fn extraction(relevant: bool, pairs: &[(&str, &str)]) -> ExtractionResult {
    ExtractionResult {
        is_relevant: relevant,
        confidence: 0.9,
        fields: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

struct Harness {
    poller: Poller,
    sheet: Arc<MemorySheetStore>,
    extractor: Arc<FixedExtractor>,
}

fn harness(dir: &Path, messages: Vec<EmailContext>, result: ExtractionResult, codec: FakeCodec) -> Harness {
    let config = test_config(dir);
    let mail: Arc<dyn MailClient> = Arc::new(FixedMail { messages });
    let extractor = Arc::new(FixedExtractor {
        result,
        calls: Mutex::new(0),
    });
    let sheet = Arc::new(MemorySheetStore {
        sheet: Mutex::new(Sheet::default()),
    });
    let dispatcher = default_dispatcher(
        &config,
        Arc::clone(&mail),
        Arc::clone(&extractor) as Arc<dyn Extractor>,
        None,
        Arc::new(codec),
        Arc::clone(&sheet) as Arc<dyn SheetStore>,
    );
    let poller = Poller::new(
        mail,
        RuleSet::default_rules(&config),
        dispatcher,
        Arc::new(MemoryStateStore {
            state: Mutex::new(None),
        }),
        std::time::Duration::from_secs(1),
    );
    Harness {
        poller,
        sheet,
        extractor,
    }
}

fn message(id: &str, ts: i64, subject: &str, body: &str, attachments: Vec<AttachmentRef>) -> EmailContext {
    EmailContext {
        id: id.into(),
        internal_ts: ts,
        sender: "alerts@bank.example".into(),
        recipients: vec!["treasury@corp.example".into()],
        subject: subject.into(),
        date: "Mon, 1 Jan 2024 10:00:00 +0000".into(),
        body: body.into(),
        attachments,
    }
}

fn intimation_message(id: &str, ts: i64) -> EmailContext {
    message(
        id,
        ts,
        "Disposal required for FCY Inward Remittance",
        "Dear Customer,\n\
         We are in receipt of following inward remittance in your favour.\n\
         INW_NO: IRM20240001\n\
         Kindly provide following disposal instructions at the earliest.",
        vec![],
    )
}

fn trade_advice_message(id: &str, ts: i64, filename: &str) -> EmailContext {
    message(
        id,
        ts,
        "Inward Remittance credited to your account",
        "Dear Customer,\n\
         We attach herewith the transaction advice for trade transaction reference 991.",
        vec![AttachmentRef {
            id: "att-1".into(),
            filename: filename.into(),
            mime_type: "application/pdf".into(),
        }],
    )
}

#[tokio::test]
async fn intimation_email_creates_a_row_keyed_by_inward_reference() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        vec![intimation_message("m1", 1_000)],
        extraction(
            true,
            &[
                ("InwardReference", "IRM20240001"),
                ("CurrencyCode", "USD"),
                ("AmountFCY", "25000.00"),
            ],
        ),
        FakeCodec {
            encrypted: false,
            accepts: None,
            text: String::new(),
        },
    );

    let mut state = WatermarkState::starting_at(0);
    let processed = h.poller.poll_cycle(&mut state).await.unwrap();
    assert_eq!(processed, 1);

    let sheet = h.sheet.sheet.lock().unwrap();
    assert_eq!(sheet.rows.len(), 1);
    let row = &sheet.rows[0];
    assert_eq!(row[INWARD_PK], "IRM20240001");
    assert_eq!(row["CurrencyCode"], "USD");
    assert_eq!(row["EMAIL_Type"], "RemittanceIntimation");
    assert_eq!(state.last_internal_ts, 1_000);
}

#[tokio::test]
async fn encrypted_trade_advice_links_by_reference_and_records_filename_once() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        vec![
            trade_advice_message("m1", 1_000, "TRADE_ADVICE_991.pdf"),
            trade_advice_message("m2", 2_000, "TRADE_ADVICE_991.pdf"),
        ],
        extraction(
            true,
            &[("InwardReference", "IRM20240002"), ("AmountINR", "2075000")],
        ),
        FakeCodec {
            // Only the rule-carried password opens it
            encrypted: true,
            accepts: Some("Tr@de1".into()),
            text: "transaction advice text".into(),
        },
    );

    let mut state = WatermarkState::starting_at(0);
    let processed = h.poller.poll_cycle(&mut state).await.unwrap();
    assert_eq!(processed, 2);

    let sheet = h.sheet.sheet.lock().unwrap();
    // Both messages merged into the one row for the inward reference
    assert_eq!(sheet.rows.len(), 1);
    let row = &sheet.rows[0];
    assert_eq!(row[INWARD_PK], "IRM20240002");
    assert_eq!(row["SavedFiles"], "TRADE_ADVICE_991.pdf");
    assert_eq!(row["EMAIL_Type"], "CreditAdvice");
}

#[tokio::test]
async fn unmatched_email_is_marked_processed_without_any_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        vec![message("m1", 1_000, "Weekly newsletter", "nothing financial", vec![])],
        extraction(true, &[("InwardReference", "IRM-X")]),
        FakeCodec {
            encrypted: false,
            accepts: None,
            text: String::new(),
        },
    );

    let mut state = WatermarkState::starting_at(0);
    let processed = h.poller.poll_cycle(&mut state).await.unwrap();
    assert_eq!(processed, 1);
    assert!(state.is_processed("m1"));
    assert_eq!(state.last_internal_ts, 1_000);

    assert_eq!(*h.extractor.calls.lock().unwrap(), 0);
    assert!(h.sheet.sheet.lock().unwrap().rows.is_empty());
}

#[tokio::test]
async fn undecryptable_advice_still_advances_the_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        vec![trade_advice_message("m1", 1_000, "TRADE_ADVICE_7.pdf")],
        extraction(true, &[("InwardReference", "IRM-7")]),
        FakeCodec {
            encrypted: true,
            accepts: None,
            text: String::new(),
        },
    );

    let mut state = WatermarkState::starting_at(0);
    h.poller.poll_cycle(&mut state).await.unwrap();
    assert!(state.is_processed("m1"));
    assert!(h.sheet.sheet.lock().unwrap().rows.is_empty());
}

#[tokio::test]
async fn replaying_a_cycle_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        vec![intimation_message("m1", 1_000)],
        extraction(true, &[("InwardReference", "IRM20240001")]),
        FakeCodec {
            encrypted: false,
            accepts: None,
            text: String::new(),
        },
    );

    let mut state = WatermarkState::starting_at(0);
    h.poller.poll_cycle(&mut state).await.unwrap();
    let rows_after_first = h.sheet.sheet.lock().unwrap().rows.clone();

    // Same state replayed: watermark and processed ids both guard
    h.poller.poll_cycle(&mut state).await.unwrap();
    assert_eq!(h.sheet.sheet.lock().unwrap().rows, rows_after_first);

    // Fresh state but the row already exists: merge, not append
    let mut fresh = WatermarkState::starting_at(0);
    h.poller.poll_cycle(&mut fresh).await.unwrap();
    let sheet = h.sheet.sheet.lock().unwrap();
    assert_eq!(sheet.rows.len(), 1);
}

#[tokio::test]
async fn irrelevant_intimation_leaves_store_empty() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        vec![intimation_message("m1", 1_000)],
        ExtractionResult {
            is_relevant: false,
            confidence: 0.1,
            fields: BTreeMap::new(),
        },
        FakeCodec {
            encrypted: false,
            accepts: None,
            text: String::new(),
        },
    );

    let mut state = WatermarkState::starting_at(0);
    h.poller.poll_cycle(&mut state).await.unwrap();
    assert!(h.sheet.sheet.lock().unwrap().rows.is_empty());
    assert!(state.is_processed("m1"));
}
