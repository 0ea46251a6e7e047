//! Pre-filter for recognized tile text.
//!
//! Vision models answer blank tiles with placeholders ("EMPTY", "N/A") or with
//! symbol noise. Those outputs are rejected before combination, the survivors are
//! cleaned, and exact repeats within one run are dropped.

use crate::core::config::FilterConfig;
use ahash::AHashSet;
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Why a recognized text was not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Nothing left after cleaning.
    Blank,
    /// Matches a configured placeholder.
    Placeholder,
    /// Too few letters and digits.
    LowSignal,
    /// Same text already kept in this run.
    Duplicate,
}

/// Outcome of filtering one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Accepted(String),
    Rejected(Rejection),
}

/// Remove control characters (tabs and line breaks survive) and trailing whitespace
/// on every line and at the end.
pub fn clean_text(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect();
    let normalized = stripped.replace("\r\n", "\n").replace('\r', "\n");
    normalized
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

/// Share of alphanumeric characters among non-whitespace characters.
pub fn alnum_ratio(text: &str) -> f64 {
    let (alnum, total) = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .fold((0usize, 0usize), |(a, t), c| (a + usize::from(c.is_alphanumeric()), t + 1));
    if total == 0 {
        return 0.0;
    }
    alnum as f64 / total as f64
}

/// Whether `text` is exactly one of the placeholders, ignoring case, surrounding
/// whitespace, wrapping quotes or brackets, trailing periods and inner spacing.
pub fn is_placeholder(text: &str, placeholders: &[String]) -> bool {
    let trimmed = text
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '[' | ']' | '(' | ')' | '*'))
        .trim_end_matches('.')
        .trim();
    let candidate = WHITESPACE_RUN.replace_all(trimmed, " ").to_lowercase();
    placeholders.iter().any(|p| p.trim().to_lowercase() == candidate)
}

/// Stateful filter for one pipeline run. Owns the set of texts already seen.
#[derive(Debug)]
pub struct TextFilter {
    config: FilterConfig,
    seen: AHashSet<String>,
}

impl TextFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            seen: AHashSet::new(),
        }
    }

    /// Check a text without recording it.
    pub fn inspect(&self, raw: &str) -> FilterOutcome {
        let cleaned = clean_text(raw);
        if cleaned.trim().is_empty() {
            return FilterOutcome::Rejected(Rejection::Blank);
        }
        if is_placeholder(&cleaned, &self.config.placeholders) {
            return FilterOutcome::Rejected(Rejection::Placeholder);
        }
        if alnum_ratio(&cleaned) < self.config.min_alnum_ratio {
            return FilterOutcome::Rejected(Rejection::LowSignal);
        }
        if self.seen.contains(&cleaned) {
            return FilterOutcome::Rejected(Rejection::Duplicate);
        }
        FilterOutcome::Accepted(cleaned)
    }

    /// Check a text and remember it when accepted.
    pub fn accept(&mut self, raw: &str) -> FilterOutcome {
        let outcome = self.inspect(raw);
        if let FilterOutcome::Accepted(text) = &outcome {
            self.seen.insert(text.clone());
        }
        outcome
    }
}
