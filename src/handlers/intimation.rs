//! Remittance-intimation handler: body text → extraction → keyed merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::extract::schema::REMITTANCE_FIELDS;
use crate::extract::{Extractor, REMITTANCE_SCHEMA, extract_with_retry, financial_window};
use crate::mail::EmailContext;
use crate::pipeline::rules::{Category, MatchResult};
use crate::pipeline::Handler;
use crate::store::{self, INWARD_PK, REMITTER_PK, SheetStore};

/// Metadata columns every handler writes alongside extracted fields.
pub const META_COLUMNS: &[&str] = &["EMAIL_Type", "EmailSubject", "EmailFrom", "EmailDate"];

pub struct IntimationHandler {
    extractor: Arc<dyn Extractor>,
    sheet_store: Arc<dyn SheetStore>,
    max_chars: usize,
}

impl IntimationHandler {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        sheet_store: Arc<dyn SheetStore>,
        max_chars: usize,
    ) -> Self {
        Self {
            extractor,
            sheet_store,
            max_chars,
        }
    }

    fn allowed_columns() -> Vec<&'static str> {
        let mut allowed: Vec<&'static str> = REMITTANCE_FIELDS.to_vec();
        allowed.push(REMITTER_PK);
        allowed.push(INWARD_PK);
        allowed.extend_from_slice(META_COLUMNS);
        allowed
    }
}

#[async_trait]
impl Handler for IntimationHandler {
    fn category(&self) -> Category {
        Category::RemittanceIntimation
    }

    async fn handle(
        &self,
        ctx: &EmailContext,
        matched: &MatchResult,
    ) -> Result<(), PipelineError> {
        let window = financial_window(&ctx.body, self.max_chars);
        let result = extract_with_retry(self.extractor.as_ref(), &window, &REMITTANCE_SCHEMA)
            .await?;

        if !result.is_relevant {
            info!(
                id = %ctx.id,
                rule = %matched.rule_name,
                confidence = result.confidence,
                "Extraction judged body irrelevant, nothing stored"
            );
            return Ok(());
        }

        let mut updates: BTreeMap<String, String> = result
            .fields
            .iter()
            .filter(|(k, _)| REMITTANCE_FIELDS.iter().any(|f| f == k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // Key columns mirror their reference fields.
        if let Some(r) = result.fields.get("RemitterReference") {
            updates.insert(REMITTER_PK.into(), r.clone());
        }
        if let Some(i) = result.fields.get("InwardReference") {
            updates.insert(INWARD_PK.into(), i.clone());
        }
        updates.insert("EMAIL_Type".into(), "RemittanceIntimation".into());
        updates.insert("EmailSubject".into(), ctx.subject.clone());
        updates.insert("EmailFrom".into(), ctx.sender.clone());
        updates.insert("EmailDate".into(), ctx.date.clone());

        let pk_col = store::select_primary_key(
            result.fields.get("RemitterReference").map(String::as_str),
            result.fields.get("InwardReference").map(String::as_str),
        );

        let allowed = Self::allowed_columns();
        let mut sheet = self.sheet_store.load()?;
        let written = store::merge(&mut sheet, pk_col, &updates, &allowed);
        if written > 0 {
            self.sheet_store.save(&sheet)?;
            info!(id = %ctx.id, key = pk_col, cells = written, "Intimation stored");
        } else {
            debug!(id = %ctx.id, "Intimation merge was a no-op");
        }
        Ok(())
    }
}
