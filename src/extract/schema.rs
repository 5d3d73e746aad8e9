//! Canonical extraction schemas.
//!
//! Canonical field names are normalized, source-agnostic names for extracted
//! financial attributes. The tabular store's schema is the union of these
//! lists across handlers.

/// The linkage field tying a notification, an advice document, and a store
/// row together.
pub const LINKAGE_FIELD: &str = "InwardReference";

/// Fixed schema given to the extraction service for one document kind.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionSchema {
    /// What the input text is, for the prompt.
    pub label: &'static str,
    /// Canonical field names the service must fill (or null).
    pub fields: &'static [&'static str],
    /// Schema-specific guidance lines.
    pub guidance: &'static str,
}

/// Bank-agnostic financial fields extracted from intimation email bodies.
pub const REMITTANCE_FIELDS: &[&str] = &[
    "RemitterName",
    "RemitterReference",
    "BeneficiaryName",
    "BeneficiaryAccount",
    "InwardReference",
    "CurrencyCode",
    "AmountFCY",
    "AmountINR",
    "ExchangeRate",
    "ValueDate",
    "CreditDate",
    "RemittingBankName",
    "RemittingBankSWIFT",
    "PurposeCode",
    "PurposeDescription",
];

/// Fields extracted from credit-advice documents: the remittance fields plus
/// advice identifiers and the per-component GST line items advices print
/// (IGST/CGST/SGST/UTGST/Cess, each with a rate and an amount).
pub const ADVICE_FIELDS: &[&str] = &[
    "InwardReference",
    "AdviceNumber",
    "IssueDate",
    "BeneficiaryName",
    "BeneficiaryAccount",
    "RemitterName",
    "RemitterReference",
    "RemittingBankName",
    "RemittingBankSWIFT",
    "CurrencyCode",
    "AmountFCY",
    "AmountINR",
    "ExchangeRate",
    "ValueDate",
    "CreditDate",
    "GSTInvoiceNumber",
    "CustomerGSTIN",
    "BankGSTIN",
    "IGSTRatePercent",
    "IGSTAmount",
    "CGSTRatePercent",
    "CGSTAmount",
    "SGSTRatePercent",
    "SGSTAmount",
    "UTGSTRatePercent",
    "UTGSTAmount",
    "CessRatePercent",
    "CessAmount",
    "GrandTotal",
    "PurposeCode",
    "PurposeDescription",
];

/// Schema for the body-text (intimation) variant.
pub const REMITTANCE_SCHEMA: ExtractionSchema = ExtractionSchema {
    label: "the full email body of a bank inward-remittance notification",
    fields: REMITTANCE_FIELDS,
    guidance: "- RemitterName = full name of the sending person/company.\n\
               - RemitterReference = the sender's reference/id if present; do not invent one.\n\
               - InwardReference = the bank's inward/transaction reference for this credit.",
};

/// Schema for the attachment (advice document) variant.
pub const ADVICE_SCHEMA: ExtractionSchema = ExtractionSchema {
    label: "the full text of a bank-issued debit-cum-credit advice document",
    fields: ADVICE_FIELDS,
    guidance: "- InwardReference = the bank's inward/transaction reference; required to link the advice.\n\
               - AdviceNumber = the advice/certificate number if printed.\n\
               - GST fields only when the advice carries a tax invoice section; fill each \
               component (IGST/CGST/SGST/UTGST/Cess) separately, null when not printed.",
};
