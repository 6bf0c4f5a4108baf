use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::PaperLookup;
use crate::labels::{assign_labels, LabelTable};
use crate::marker::PaperMarker;
use crate::models::{CitationRef, CorpusId, Iteration, PaperMetadata};
use crate::progress::{self, Kind};

/// A citation together with what the resolver decided for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCitation {
    pub citation: CitationRef,
    pub label: String,
    pub title: String,
}

/// Rendering-ready form of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSection {
    pub text: String,
    pub labels: LabelTable,
    pub citations: Vec<ResolvedCitation>,
    pub papers: BTreeMap<CorpusId, PaperMetadata>,
}

impl RenderedSection {
    /// Snippets for one placeholder, in citation-list order.
    pub fn evidence_for(&self, placeholder_id: &str) -> Vec<String> {
        self.citations
            .iter()
            .filter(|c| c.citation.id == placeholder_id)
            .map(|c| c.citation.snippet.clone())
            .collect()
    }
}

#[derive(Clone)]
pub struct Resolver {
    lookup: Arc<dyn PaperLookup>,
    fields: Vec<String>,
}

impl Resolver {
    pub fn new(lookup: Arc<dyn PaperLookup>, fields: Vec<String>) -> Self {
        Resolver { lookup, fields }
    }

    pub async fn resolve(&self, iteration: &Iteration) -> RenderedSection {
        if iteration.citations.is_empty() {
            return RenderedSection {
                text: iteration.text.clone(),
                labels: LabelTable::default(),
                citations: Vec::new(),
                papers: BTreeMap::new(),
            };
        }

        let papers = self.hydrate(&distinct_corpus_ids(&iteration.citations)).await;
        let labels = assign_labels(&iteration.citations, &papers);
        let text = rewrite_text(&iteration.text, &labels);

        let citations = iteration
            .citations
            .iter()
            .map(|citation| {
                let entry = labels.get(&citation.id);
                ResolvedCitation {
                    citation: citation.clone(),
                    label: entry.map(|e| e.label.clone()).unwrap_or_else(|| citation.id.clone()),
                    title: entry.map(|e| e.title.clone()).unwrap_or_default(),
                }
            })
            .collect();

        progress::log_with(
            Kind::Resolve,
            format!("resolved {} citations, {} papers", labels.len(), papers.len()),
        );

        RenderedSection {
            text,
            labels,
            citations,
            papers: papers.into_iter().collect(),
        }
    }

    /// One batched lookup for the whole iteration. A failed batch leaves
    /// every citation on its fallback label.
    async fn hydrate(&self, corpus_ids: &[CorpusId]) -> HashMap<CorpusId, PaperMetadata> {
        if corpus_ids.is_empty() {
            return HashMap::new();
        }
        debug!(count = corpus_ids.len(), "hydrating paper metadata");
        match self.lookup.paper_details(corpus_ids, &self.fields).await {
            Ok(papers) => papers.into_iter().map(|p| (p.corpus_id, p)).collect(),
            Err(e) => {
                warn!(error = %e, "paper metadata lookup failed");
                progress::log_with(Kind::Error, format!("paper details failed: {}", e));
                HashMap::new()
            }
        }
    }
}

/// Distinct, sorted corpus ids. Negative ids mark citations without a paper.
pub fn distinct_corpus_ids(citations: &[CitationRef]) -> Vec<CorpusId> {
    citations
        .iter()
        .map(|c| c.corpus_id)
        .filter(|id| *id >= 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Replaces every literal placeholder occurrence with its marker in one
/// left-to-right pass. At each position the longest matching placeholder
/// wins, and inserted markers are never rescanned.
pub fn rewrite_text(text: &str, labels: &LabelTable) -> String {
    let mut replacements: Vec<(&str, String)> = labels
        .iter()
        .filter(|(id, _)| !id.is_empty())
        .map(|(id, entry)| {
            let marker = PaperMarker {
                corpus_id: entry.corpus_id,
                placeholder_id: id.clone(),
                label: entry.label.clone(),
                title: entry.title.clone(),
            };
            (id.as_str(), marker.to_markup())
        })
        .collect();
    if replacements.is_empty() {
        return text.to_string();
    }
    replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'scan: while let Some(c) = rest.chars().next() {
        for (id, markup) in &replacements {
            if rest.starts_with(id) {
                out.push_str(markup);
                rest = &rest[id.len()..];
                continue 'scan;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}
