//! Declarative rule table and the generic matcher that evaluates it.
//!
//! Rule *content* is data: [`RuleSet::default_rules`] holds the bank-specific
//! substrings, and nothing in the matcher knows about any particular bank.
//! Every text comparison is case-insensitive with whitespace runs collapsed,
//! guarding against line-wrap and encoding noise.

use tracing::debug;

use crate::config::Config;
use crate::mail::{EmailContext, normalize_ws};

/// Handler category a rule routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Inward-remittance intimation — fields extracted from the body text.
    RemittanceIntimation,
    /// Debit-cum-credit advice — fields extracted from an attached document.
    CreditAdvice,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemittanceIntimation => write!(f, "remittance_intimation"),
            Self::CreditAdvice => write!(f, "credit_advice"),
        }
    }
}

/// Attachment-extension match mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtMode {
    /// At least one extension present among the attachments.
    Any,
    /// Every listed extension present among the attachments.
    All,
}

/// A single predicate over an [`EmailContext`].
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Subject contains the substring.
    SubjectContains(String),
    /// Body contains every one of the substrings.
    BodyContainsAll(Vec<String>),
    /// Message has at least one attachment.
    HasAttachment,
    /// Attachment filenames carry the given extensions.
    AttachmentExt { exts: Vec<String>, mode: ExtMode },
    /// Some attachment filename contains one of the substrings.
    AttachmentNameContains(Vec<String>),
}

/// One declarative matching rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Rule name, for diagnostics.
    pub name: String,
    /// Handler category this rule routes to.
    pub category: Category,
    /// Stop dispatching further matches for the message after this one.
    pub stop_after_match: bool,
    /// All predicates must hold for the rule to match.
    pub predicates: Vec<Predicate>,
    /// Optional document-password override carried to the handler.
    pub pdf_password: Option<String>,
}

/// One classifier hit — transient, one per matching rule.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub rule_name: String,
    pub category: Category,
    pub stop_after_match: bool,
    /// Password override from the rule, already externalized to config.
    pub pdf_password: Option<String>,
    /// Which predicates held, for diagnostics.
    pub reasons: Vec<String>,
}

/// Ordered rule table.
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// The production rule data.
    ///
    /// The two credit-advice rules intentionally differ in predicate detail
    /// (the second adds a filename filter and a password override); both
    /// route to the same category.
    pub fn default_rules(config: &Config) -> Self {
        let rules = vec![
            Rule {
                name: "inward_remittance_intimation".into(),
                category: Category::RemittanceIntimation,
                stop_after_match: true,
                predicates: vec![
                    Predicate::SubjectContains("disposal required for fcy inward".into()),
                    Predicate::BodyContainsAll(vec![
                        "we are in receipt of following inward remittance".into(),
                        "kindly provide following disposal instructions".into(),
                        "inw_no".into(),
                    ]),
                ],
                pdf_password: None,
            },
            Rule {
                name: "credit_advice".into(),
                category: Category::CreditAdvice,
                stop_after_match: true,
                predicates: vec![
                    Predicate::SubjectContains(
                        "debit cum credit advice for fcy inward remittance".into(),
                    ),
                    Predicate::BodyContainsAll(vec![
                        "please find the attached debit cum credit advice for inward".into(),
                    ]),
                    Predicate::HasAttachment,
                    Predicate::AttachmentExt {
                        exts: vec!["pdf".into()],
                        mode: ExtMode::Any,
                    },
                ],
                pdf_password: None,
            },
            Rule {
                name: "credit_advice_trade".into(),
                category: Category::CreditAdvice,
                stop_after_match: true,
                predicates: vec![
                    Predicate::SubjectContains("inward remittance".into()),
                    Predicate::BodyContainsAll(vec![
                        "we attach herewith the transaction advice for trade transaction reference"
                            .into(),
                    ]),
                    Predicate::HasAttachment,
                    Predicate::AttachmentExt {
                        exts: vec!["pdf".into()],
                        mode: ExtMode::Any,
                    },
                    Predicate::AttachmentNameContains(vec!["advice".into()]),
                ],
                pdf_password: config.advice_pdf_password.clone(),
            },
        ];
        Self { rules }
    }

    /// Empty rule table (for tests).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Evaluate a message against every rule independently.
    ///
    /// Pure function: every matching rule contributes one result, in table
    /// order. Precedence and early-stop are the dispatcher's concern.
    pub fn categorize(&self, ctx: &EmailContext) -> Vec<MatchResult> {
        let mut matches = Vec::new();
        for rule in &self.rules {
            let mut reasons = Vec::with_capacity(rule.predicates.len());
            let hit = rule.predicates.iter().all(|p| {
                let ok = eval_predicate(p, ctx);
                if ok {
                    reasons.push(describe(p));
                }
                ok
            });

            if hit {
                debug!(rule = %rule.name, category = %rule.category, "Rule matched");
                matches.push(MatchResult {
                    rule_name: rule.name.clone(),
                    category: rule.category,
                    stop_after_match: rule.stop_after_match,
                    pdf_password: rule.pdf_password.clone(),
                    reasons,
                });
            }
        }
        matches
    }
}

fn eval_predicate(predicate: &Predicate, ctx: &EmailContext) -> bool {
    match predicate {
        Predicate::SubjectContains(needle) => contains_norm(&ctx.subject, needle),
        Predicate::BodyContainsAll(needles) => {
            let body = normalize_ws(&ctx.body);
            needles.iter().all(|n| body.contains(&normalize_ws(n)))
        }
        Predicate::HasAttachment => !ctx.attachments.is_empty(),
        Predicate::AttachmentExt { exts, mode } => {
            let files: Vec<String> = ctx
                .attachments
                .iter()
                .map(|a| normalize_ws(&a.filename))
                .collect();
            let has_ext = |ext: &String| {
                let suffix = format!(".{}", normalize_ws(ext.trim_start_matches('.')));
                files.iter().any(|f| f.ends_with(&suffix))
            };
            match mode {
                ExtMode::Any => exts.iter().any(has_ext),
                ExtMode::All => exts.iter().all(has_ext),
            }
        }
        Predicate::AttachmentNameContains(needles) => ctx.attachments.iter().any(|a| {
            let name = normalize_ws(&a.filename);
            needles.iter().any(|n| name.contains(&normalize_ws(n)))
        }),
    }
}

fn contains_norm(haystack: &str, needle: &str) -> bool {
    normalize_ws(haystack).contains(&normalize_ws(needle))
}

fn describe(predicate: &Predicate) -> String {
    match predicate {
        Predicate::SubjectContains(s) => format!("subject contains '{s}'"),
        Predicate::BodyContainsAll(list) => format!("body contains all of {} phrases", list.len()),
        Predicate::HasAttachment => "has attachment".to_string(),
        Predicate::AttachmentExt { exts, .. } => format!("attachment extension in {exts:?}"),
        Predicate::AttachmentNameContains(list) => {
            format!("attachment name contains one of {list:?}")
        }
    }
}
