//! Summary point extraction.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use moltdigest_shared::{Candidate, MAX_SUMMARY_POINTS, MIN_SUMMARY_POINTS};

/// Produces summary statements for a candidate.
///
/// The renderer only enforces the point count and shape; how the statements
/// are produced is up to the implementation.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, candidate: &Candidate) -> Vec<String>;
}

/// Extractive summarizer: picks sentences straight out of the post body.
///
/// Pre-computed `summary_points` on the candidate take precedence. When the
/// body has too few sentences the extractor falls back to clause boundaries.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    /// Fragments shorter than this (in chars) are dropped.
    pub min_chars: usize,
    /// Longer points are cut and suffixed with `…`.
    pub max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            min_chars: 8,
            max_chars: 160,
        }
    }
}

impl Summarizer for ExtractiveSummarizer {
    fn summarize(&self, candidate: &Candidate) -> Vec<String> {
        if !candidate.summary_points.is_empty() {
            return self.finish(candidate.summary_points.iter().map(|p| single_line(p)));
        }

        let lines = body_lines(&candidate.raw_body);
        let sentences: Vec<String> = lines.iter().flat_map(|l| split_sentences(l)).collect();
        let points = self.finish(sentences.iter().cloned());
        if points.len() >= MIN_SUMMARY_POINTS {
            return points;
        }

        let clauses = self.finish(sentences.iter().flat_map(|s| split_clauses(s)));
        if clauses.len() > points.len() {
            clauses
        } else {
            points
        }
    }
}

impl ExtractiveSummarizer {
    fn finish(&self, fragments: impl Iterator<Item = String>) -> Vec<String> {
        let mut seen = HashSet::new();
        fragments
            .map(|f| f.trim().to_string())
            .filter(|f| f.chars().count() >= self.min_chars)
            .filter(|f| seen.insert(f.to_lowercase()))
            .map(|f| truncate(&f, self.max_chars))
            .take(MAX_SUMMARY_POINTS)
            .collect()
    }
}

/// Body lines with fenced code, headings and list markers stripped.
fn body_lines(body: &str) -> Vec<String> {
    static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\s*(?:#{1,6}\s+|[-*+•]\s+|\d{1,3}[.)、]\s*|>\s*)+").expect("valid regex")
    });

    let mut in_fence = false;
    let mut lines = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || trimmed.is_empty() {
            continue;
        }
        let stripped = MARKER_RE.replace(trimmed, "");
        let text = single_line(&stripped);
        if !text.is_empty() {
            lines.push(text);
        }
    }
    lines
}

/// Split on `.`/`!`/`?` followed by whitespace, and on CJK terminators.
fn split_sentences(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let ends = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().is_none_or(|n| n.is_whitespace()),
            _ => false,
        };
        if ends {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn split_clauses(sentence: &str) -> Vec<String> {
    static CLAUSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[，；：;]|,\s|:\s|\s[-–]\s").expect("valid regex"));
    CLAUSE_RE.split(sentence).map(str::to_string).collect()
}

/// Collapse all whitespace runs, newlines included, into single spaces.
pub(crate) fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}
