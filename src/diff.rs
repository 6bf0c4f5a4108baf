//! Sentence-level comparison of two drafts.
//!
//! Sentences are compared on a normalized key that ignores citation markers,
//! years and footnote markers, so relabelled citations do not show as edits.

use once_cell::sync::Lazy;
use regex::Regex;
use similar::{capture_diff_slices, Algorithm, DiffTag};

use crate::marker::strip_markers;

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:1[5-9]|20)\d{2}[a-z]?\b").expect("year pattern is valid"));

// `[3]`, `[3, 4]`, and raw placeholders such as `(8, Chen et al., 2019)`.
static FOOTNOTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\d+(?:\s*,\s*\d+)*\]|\(\d+,[^()]*\)").expect("footnote pattern is valid")
});

static LIST_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\s+").expect("list marker pattern is valid"));

static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("space pattern is valid"));

const ABBREVIATIONS: &[&str] = &["al", "e.g", "i.e", "etc", "fig", "vs", "eq", "cf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Unchanged,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: ChangeKind,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideBySide {
    pub left: Vec<DiffLine>,
    pub right: Vec<DiffLine>,
}

impl SideBySide {
    pub fn has_changes(&self) -> bool {
        self.left
            .iter()
            .chain(self.right.iter())
            .any(|l| l.kind != ChangeKind::Unchanged)
    }
}

/// `1.` at the start of a line numbers a list item, it does not end a sentence.
fn is_list_marker(current: &str) -> bool {
    let number = current.trim().trim_end_matches('.');
    !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
}

fn ends_with_abbreviation(sentence: &str) -> bool {
    let word = sentence
        .trim_end_matches('.')
        .rsplit(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    ABBREVIATIONS.contains(&word.as_str())
}

/// Splits on line breaks and on `.`, `!`, `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in text.lines() {
        let mut current = String::new();
        let mut line_start = true;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            let at_boundary = matches!(c, '.' | '!' | '?')
                && chars.peek().map_or(true, |next| next.is_whitespace());
            let keep_going = c == '.'
                && (ends_with_abbreviation(&current) || (line_start && is_list_marker(&current)));
            if at_boundary && !keep_going {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                    line_start = false;
                }
                current.clear();
            }
        }
        let rest = current.trim();
        if !rest.is_empty() {
            sentences.push(rest.to_string());
        }
    }
    sentences
}

pub fn normalize_sentence(sentence: &str) -> String {
    let without_number = LIST_MARKER_RE.replace(sentence, "");
    let without_notes = FOOTNOTE_RE.replace_all(&without_number, " ");
    let without_years = YEAR_RE.replace_all(&without_notes, " ");
    SPACE_RE.replace_all(without_years.trim(), " ").into_owned()
}

struct Sentence {
    text: String,
    key: String,
}

fn prepare(text: &str) -> Vec<Sentence> {
    let without_markers = strip_markers(text);
    let without_notes = FOOTNOTE_RE.replace_all(&without_markers, "");
    split_sentences(&without_notes)
        .into_iter()
        .map(|text| {
            let text = SPACE_RE.replace_all(&text, " ").into_owned();
            let key = normalize_sentence(&text);
            Sentence { text, key }
        })
        .filter(|s| !s.key.is_empty())
        .collect()
}

pub fn diff_drafts(previous: &str, current: &str) -> SideBySide {
    let old = prepare(previous);
    let new = prepare(current);
    let old_keys: Vec<&str> = old.iter().map(|s| s.key.as_str()).collect();
    let new_keys: Vec<&str> = new.iter().map(|s| s.key.as_str()).collect();

    let line = |kind, sentence: &Sentence| DiffLine {
        kind,
        text: sentence.text.clone(),
    };

    let mut out = SideBySide::default();
    for op in capture_diff_slices(Algorithm::Myers, &old_keys, &new_keys) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => {
                out.left.extend(old[old_range].iter().map(|s| line(ChangeKind::Unchanged, s)));
                out.right.extend(new[new_range].iter().map(|s| line(ChangeKind::Unchanged, s)));
            }
            DiffTag::Delete => {
                out.left.extend(old[old_range].iter().map(|s| line(ChangeKind::Removed, s)));
            }
            DiffTag::Insert => {
                out.right.extend(new[new_range].iter().map(|s| line(ChangeKind::Added, s)));
            }
            DiffTag::Replace => {
                out.left.extend(old[old_range].iter().map(|s| line(ChangeKind::Removed, s)));
                out.right.extend(new[new_range].iter().map(|s| line(ChangeKind::Added, s)));
            }
        }
    }
    out
}
