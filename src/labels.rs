//! Author-year reference labels.
//!
//! Labels are assigned by folding over the citation list in order. Citations
//! whose candidate label collides with an earlier one are disambiguated with
//! sequential letters: the first holder is retroactively suffixed `a` when
//! the second shows up, which takes `b`, and so on. The fold is pure, so
//! resolving the same iteration twice yields the same table.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::warn;

use crate::models::{CitationRef, CorpusId, PaperMetadata};
use crate::progress::{self, Kind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("paper {0} has no metadata")]
    MissingMetadata(CorpusId),
    #[error("paper {0} has no authors")]
    NoAuthors(CorpusId),
    #[error("paper {0} first author has no name")]
    NoFamilyName(CorpusId),
    #[error("paper {0} has no publication year")]
    NoYear(CorpusId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEntry {
    pub label: String,
    pub title: String,
    pub corpus_id: CorpusId,
    /// `true` when the label is the raw placeholder because metadata was unusable.
    pub fallback: bool,
}

/// `placeholder id -> label`, immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    entries: BTreeMap<String, LabelEntry>,
}

impl LabelTable {
    pub fn get(&self, placeholder_id: &str) -> Option<&LabelEntry> {
        self.entries.get(placeholder_id)
    }

    pub fn label(&self, placeholder_id: &str) -> Option<&str> {
        self.get(placeholder_id).map(|e| e.label.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LabelEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Last whitespace-separated token of a display name.
pub fn family_name(display_name: &str) -> Option<&str> {
    display_name.split_whitespace().last()
}

/// `"Family. Year"` for one author, `"Family et al. Year"` otherwise.
pub fn candidate_label(paper: &PaperMetadata) -> Result<String, LabelError> {
    let first = paper
        .authors
        .first()
        .ok_or(LabelError::NoAuthors(paper.corpus_id))?;
    let family = family_name(&first.name).ok_or(LabelError::NoFamilyName(paper.corpus_id))?;
    let year = paper.year.ok_or(LabelError::NoYear(paper.corpus_id))?;
    if paper.authors.len() == 1 {
        Ok(format!("{}. {}", family, year))
    } else {
        Ok(format!("{} et al. {}", family, year))
    }
}

/// Disambiguation suffix for the `index`-th holder of a label: a, b, ..., z, aa, ab, ...
pub fn letter_suffix(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'a' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

struct Collision {
    count: usize,
    first_holder: String,
}

#[derive(Default)]
struct LabelFold {
    entries: BTreeMap<String, LabelEntry>,
    collisions: HashMap<String, Collision>,
}

impl LabelFold {
    fn step(mut self, citation: &CitationRef, papers: &HashMap<CorpusId, PaperMetadata>) -> Self {
        if self.entries.contains_key(&citation.id) {
            return self;
        }

        let paper = papers.get(&citation.corpus_id);
        let title = paper.map(|p| p.title.clone()).unwrap_or_default();
        let candidate = paper
            .ok_or(LabelError::MissingMetadata(citation.corpus_id))
            .and_then(candidate_label);

        let candidate = match candidate {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(placeholder = %citation.id, error = %e, "falling back to placeholder label");
                progress::log_with(Kind::Resolve, format!("{}: {}", citation.id, e));
                self.entries.insert(
                    citation.id.clone(),
                    LabelEntry {
                        label: citation.id.clone(),
                        title,
                        corpus_id: citation.corpus_id,
                        fallback: true,
                    },
                );
                return self;
            }
        };

        let collision = self
            .collisions
            .entry(candidate.clone())
            .or_insert_with(|| Collision {
                count: 0,
                first_holder: citation.id.clone(),
            });
        collision.count += 1;

        let label = match collision.count {
            1 => candidate.clone(),
            count => {
                if count == 2 {
                    let first_holder = collision.first_holder.clone();
                    if let Some(first) = self.entries.get_mut(&first_holder) {
                        first.label = format!("{}{}", candidate, letter_suffix(0));
                    }
                }
                format!("{}{}", candidate, letter_suffix(count - 1))
            }
        };

        self.entries.insert(
            citation.id.clone(),
            LabelEntry {
                label,
                title,
                corpus_id: citation.corpus_id,
                fallback: false,
            },
        );
        self
    }
}

pub fn assign_labels(citations: &[CitationRef], papers: &HashMap<CorpusId, PaperMetadata>) -> LabelTable {
    let fold = citations
        .iter()
        .fold(LabelFold::default(), |fold, citation| fold.step(citation, papers));
    LabelTable { entries: fold.entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;

    fn paper(corpus_id: CorpusId, authors: &[&str], year: Option<i32>) -> PaperMetadata {
        PaperMetadata {
            corpus_id,
            title: format!("Paper {}", corpus_id),
            year,
            venue: String::new(),
            authors: authors
                .iter()
                .map(|name| Author {
                    author_id: None,
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    fn cite(id: &str, corpus_id: CorpusId) -> CitationRef {
        CitationRef {
            id: id.to_string(),
            corpus_id,
            snippet: String::new(),
            n_citations: None,
            score: None,
        }
    }

    fn index(papers: Vec<PaperMetadata>) -> HashMap<CorpusId, PaperMetadata> {
        papers.into_iter().map(|p| (p.corpus_id, p)).collect()
    }

    #[test]
    fn single_author_label() {
        let papers = index(vec![paper(42, &["Jane Smith"], Some(2021))]);
        let table = assign_labels(&[cite("C1", 42)], &papers);
        assert_eq!(table.label("C1"), Some("Smith. 2021"));
        assert_eq!(table.get("C1").unwrap().title, "Paper 42");
    }

    #[test]
    fn multi_author_label() {
        let papers = index(vec![paper(1, &["Ann Lee", "Bo Kim"], Some(2020))]);
        let table = assign_labels(&[cite("C1", 1)], &papers);
        assert_eq!(table.label("C1"), Some("Lee et al. 2020"));
    }

    #[test]
    fn collision_retroactively_suffixes_first_holder() {
        let papers = index(vec![
            paper(1, &["Ann Lee", "Bo Kim"], Some(2020)),
            paper(2, &["Cy Lee", "Di Park"], Some(2020)),
        ]);
        let table = assign_labels(&[cite("C1", 1), cite("C2", 2)], &papers);
        assert_eq!(table.label("C1"), Some("Lee et al. 2020a"));
        assert_eq!(table.label("C2"), Some("Lee et al. 2020b"));
    }

    #[test]
    fn later_collisions_take_sequential_letters() {
        let papers = index(vec![
            paper(1, &["Ann Lee"], Some(2020)),
            paper(2, &["Ann Lee"], Some(2020)),
            paper(3, &["Ann Lee"], Some(2020)),
            paper(4, &["Ann Lee"], Some(2019)),
        ]);
        let citations = [cite("A", 1), cite("B", 2), cite("C", 3), cite("D", 4)];
        let table = assign_labels(&citations, &papers);
        assert_eq!(table.label("A"), Some("Lee. 2020a"));
        assert_eq!(table.label("B"), Some("Lee. 2020b"));
        assert_eq!(table.label("C"), Some("Lee. 2020c"));
        assert_eq!(table.label("D"), Some("Lee. 2019"));
    }

    #[test]
    fn repeated_placeholder_keeps_first_assignment() {
        let papers = index(vec![paper(1, &["Ann Lee"], Some(2020))]);
        let table = assign_labels(&[cite("A", 1), cite("A", 1)], &papers);
        assert_eq!(table.len(), 1);
        assert_eq!(table.label("A"), Some("Lee. 2020"));
    }

    #[test]
    fn labels_are_idempotent() {
        let papers = index(vec![
            paper(1, &["Ann Lee", "X Y"], Some(2020)),
            paper(2, &["Cy Lee", "Z W"], Some(2020)),
            paper(3, &["Jane Smith"], Some(2021)),
        ]);
        let citations = [cite("C1", 1), cite("C2", 2), cite("C3", 3)];
        assert_eq!(assign_labels(&citations, &papers), assign_labels(&citations, &papers));
    }

    #[test]
    fn missing_or_malformed_metadata_falls_back_to_placeholder() {
        let papers = index(vec![paper(1, &[], Some(2020)), paper(2, &["Solo Author"], None)]);
        let citations = [cite("(1, Lee, 2020)", 1), cite("(2, ?)", 2), cite("(3, gone)", 3), cite("ok", 4)];
        let mut papers = papers;
        papers.insert(4, paper(4, &["Jane Smith"], Some(2021)));

        let table = assign_labels(&citations, &papers);
        assert_eq!(table.label("(1, Lee, 2020)"), Some("(1, Lee, 2020)"));
        assert_eq!(table.label("(2, ?)"), Some("(2, ?)"));
        assert_eq!(table.label("(3, gone)"), Some("(3, gone)"));
        assert!(table.get("(3, gone)").unwrap().fallback);
        assert!(table.get("(3, gone)").unwrap().title.is_empty());
        assert_eq!(table.label("ok"), Some("Smith. 2021"));
    }

    #[test]
    fn letter_suffix_continues_past_z() {
        assert_eq!(letter_suffix(0), "a");
        assert_eq!(letter_suffix(1), "b");
        assert_eq!(letter_suffix(25), "z");
        assert_eq!(letter_suffix(26), "aa");
        assert_eq!(letter_suffix(27), "ab");
    }
}
