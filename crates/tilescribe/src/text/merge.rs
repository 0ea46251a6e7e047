//! Deterministic merge of overlapping tile texts.
//!
//! Neighbouring tiles overlap, so the last lines of one record often reappear as the
//! first lines of the next, sometimes with small recognition differences. The merger
//! walks records in reading order and, when a record's tile touches the previous one,
//! looks for the longest run of similar lines at the seam. Matched lines are emitted
//! once (the longer reading wins). When no whole line matches, a word cut by the tile
//! edge is spliced on a shared character run instead. Records from tiles that do not
//! touch are only joined by a line break. Nothing is ever added besides line breaks.

use crate::core::config::CombineConfig;
use crate::types::{ExtractionRecord, Rect};
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Lowercase, collapse inner whitespace and trim.
pub fn normalize_line(line: &str) -> String {
    WHITESPACE_RUN.replace_all(line.trim(), " ").to_lowercase()
}

/// Edit distance between two character sequences.
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Similarity of two lines in `[0, 1]` after normalization; 1.0 means identical.
pub fn line_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize_line(a).chars().collect();
    let b: Vec<char> = normalize_line(b).chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

/// Line-level overlap resolver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapMerger {
    pub similarity_threshold: f64,
    pub max_overlap_lines: usize,
    /// Shortest shared run for a character splice; 0 disables splicing.
    pub min_char_overlap: usize,
    /// Largest pixel gap between two tiles that still share a seam.
    pub max_seam_gap: u32,
}

impl From<&CombineConfig> for OverlapMerger {
    fn from(config: &CombineConfig) -> Self {
        Self {
            similarity_threshold: config.line_similarity_threshold,
            max_overlap_lines: config.max_overlap_lines,
            min_char_overlap: config.min_char_overlap,
            max_seam_gap: config.max_seam_gap,
        }
    }
}

impl OverlapMerger {
    /// Merge records that are already in reading order.
    pub fn merge(&self, records: &[ExtractionRecord]) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut previous: Option<Rect> = None;
        for record in records {
            let shares_seam = previous.is_some_and(|p| p.gap(&record.position) <= self.max_seam_gap);
            if self.append(&mut lines, &record.text, shares_seam) {
                previous = Some(record.position);
            }
        }
        lines.join("\n")
    }

    /// Append one record's lines. Returns false when the record had no lines.
    fn append(&self, lines: &mut Vec<String>, text: &str, shares_seam: bool) -> bool {
        let incoming: Vec<&str> = text.lines().collect();
        if incoming.is_empty() {
            return false;
        }
        if lines.is_empty() || !shares_seam {
            lines.extend(incoming.iter().map(|l| l.to_string()));
            return true;
        }

        if let Some(k) = self.line_overlap(lines, &incoming) {
            let start = lines.len() - k;
            for (existing, candidate) in lines[start..].iter_mut().zip(&incoming[..k]) {
                if candidate.chars().count() > existing.chars().count() {
                    *existing = candidate.to_string();
                }
            }
            tracing::trace!(lines = k, "resolved line overlap");
            lines.extend(incoming[k..].iter().map(|l| l.to_string()));
            return true;
        }

        if let Some(last) = lines.last_mut()
            && let Some(shared) = self.char_overlap(last, incoming[0])
        {
            let tail: String = incoming[0].chars().skip(shared).collect();
            last.push_str(&tail);
            tracing::trace!(chars = shared, "spliced words across tile seam");
            lines.extend(incoming[1..].iter().map(|l| l.to_string()));
            return true;
        }

        lines.extend(incoming.iter().map(|l| l.to_string()));
        true
    }

    /// Longest `k` such that the last `k` existing lines match the first `k` incoming
    /// lines pairwise. Runs made only of blank lines do not count.
    fn line_overlap(&self, lines: &[String], incoming: &[&str]) -> Option<usize> {
        let limit = self.max_overlap_lines.min(lines.len()).min(incoming.len());
        (1..=limit).rev().find(|&k| {
            let tail = &lines[lines.len() - k..];
            let head = &incoming[..k];
            tail.iter().any(|l| !l.trim().is_empty())
                && tail
                    .iter()
                    .zip(head)
                    .all(|(a, b)| line_similarity(a, b) >= self.similarity_threshold)
        })
    }

    /// Length in characters of the longest case-insensitive run that ends `last` and
    /// starts `first`, if at least `min_char_overlap` long.
    fn char_overlap(&self, last: &str, first: &str) -> Option<usize> {
        if self.min_char_overlap == 0 {
            return None;
        }
        let tail: Vec<char> = last.chars().flat_map(char::to_lowercase).collect();
        let head: Vec<char> = first.chars().flat_map(char::to_lowercase).collect();
        if tail.len() != last.chars().count() || head.len() != first.chars().count() {
            // Case folding changed lengths; offsets would no longer line up.
            return None;
        }

        let limit = tail.len().min(head.len());
        (self.min_char_overlap..=limit)
            .rev()
            .find(|&n| tail[tail.len() - n..] == head[..n] && head[..n].iter().any(|c| !c.is_whitespace()))
    }
}
