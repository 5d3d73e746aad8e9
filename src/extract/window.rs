//! Financially relevant window pre-filter.
//!
//! Keeps only lines matching the domain-keyword patterns plus a little
//! surrounding context, bounding the payload sent to the extraction service.
//! If nothing matches, the full text is kept — the filter only ever narrows.

use std::sync::LazyLock;

use regex::Regex;

/// Lines of context kept around each matching line.
pub const CONTEXT_LINES: usize = 2;

static FINANCIAL_HINTS: LazyLock<Regex> = LazyLock::new(|| {
    let patterns = [
        r"\b(inw[_\s-]?no|inward|irm|osn|utr|ref(?:erence)?)\b",
        r"\b(value\s*date|credit\s*date|date)\b",
        r"\b(currency|cur|ccy|usd|eur|gbp|inr)\b",
        r"\b(amount|fcy\s*amt|fcy\s*amount|inr\s*amount|exchange\s*rate|x?rate)\b",
        r"\b(remitter|remitting|ordering|sender)\b",
        r"\b(beneficiary|bene(?:f)?|account|a/c|acc(?:ount)?)\b",
        r"\b(swift|bic|ifsc|sort)\b",
        r"\b(purpose|purpose\s*code|reason)\b",
    ];
    Regex::new(&format!("(?i){}", patterns.join("|"))).unwrap()
});

/// Reduce `text` to the financially relevant lines (+ context), capped at
/// `max_chars`. Falls back to the full text when no line matches.
pub fn financial_window(text: &str, max_chars: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut keep = vec![false; lines.len()];

    for (i, line) in lines.iter().enumerate() {
        if FINANCIAL_HINTS.is_match(line) {
            let lo = i.saturating_sub(CONTEXT_LINES);
            let hi = (i + CONTEXT_LINES + 1).min(lines.len());
            keep[lo..hi].iter_mut().for_each(|k| *k = true);
        }
    }

    let filtered: String = lines
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(l, _)| *l)
        .collect::<Vec<_>>()
        .join("\n");

    let window = if filtered.is_empty() { text } else { &filtered };
    truncate_chars(window, max_chars)
}

/// Truncate to at most `max_chars` characters, never splitting a codepoint.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
