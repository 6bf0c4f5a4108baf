use std::collections::HashSet;

use crate::models::{CorpusId, PaperMetadata};
use crate::resolver::RenderedSection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub corpus_id: CorpusId,
    pub line: String,
    pub url: String,
}

/// `"Author, Author et al. Title. Year. Venue."`; empty parts are skipped.
pub fn format_reference(paper: &PaperMetadata, max_authors: usize) -> String {
    let names: Vec<&str> = paper
        .authors
        .iter()
        .take(max_authors)
        .map(|a| a.name.as_str())
        .filter(|n| !n.is_empty())
        .collect();
    let mut authors = names.join(", ");
    if paper.authors.len() > max_authors {
        authors.push_str(" et al");
    }

    let year = paper.year.map(|y| y.to_string()).unwrap_or_default();
    let parts: Vec<&str> = [authors.as_str(), paper.title.trim(), year.as_str(), paper.venue.trim()]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    format!("{}.", parts.join(". "))
}

pub fn paper_url(base: &str, corpus_id: CorpusId) -> String {
    format!("{}/{}", base.trim_end_matches('/'), corpus_id)
}

/// One line per distinct cited paper, in order of first citation.
pub fn build_references(section: &RenderedSection, max_authors: usize, paper_url_base: &str) -> Vec<Reference> {
    let mut seen = HashSet::new();
    section
        .citations
        .iter()
        .map(|c| c.citation.corpus_id)
        .filter(|id| seen.insert(*id))
        .filter_map(|id| section.papers.get(&id))
        .map(|paper| Reference {
            corpus_id: paper.corpus_id,
            line: format_reference(paper, max_authors),
            url: paper_url(paper_url_base, paper.corpus_id),
        })
        .filter(|r| !r.line.is_empty())
        .collect()
}
