//! Inline citation markers embedded in answer markdown.
//!
//! A resolved placeholder becomes
//! `<Paper corpusId="42" id="(C1)" label="Smith. 2021" paperTitle="…"></Paper>`.
//! Attribute values are XML-escaped so the markdown parser sees the marker as
//! a single inline HTML tag.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::CorpusId;

pub const PAPER_TAG: &str = "Paper";
pub const AUTHOR_TAG: &str = "Author";

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(/?)([A-Za-z][A-Za-z0-9-]*)((?:\s+[A-Za-z_:][A-Za-z0-9_.:-]*(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*(/?)>"#)
        .expect("tag pattern is valid")
});

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][A-Za-z0-9_.:-]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("attribute pattern is valid")
});

static PAPER_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<Paper\b[^>]*?/>|<Paper\b[^>]*>.*?</Paper\s*>").expect("marker pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperMarker {
    pub corpus_id: CorpusId,
    pub placeholder_id: String,
    pub label: String,
    pub title: String,
}

impl PaperMarker {
    pub fn to_markup(&self) -> String {
        format!(
            r#"<{tag} corpusId="{}" id="{}" label="{}" paperTitle="{}"></{tag}>"#,
            self.corpus_id,
            escape_attr(&self.placeholder_id),
            escape_attr(&self.label),
            escape_attr(&self.title),
            tag = PAPER_TAG,
        )
    }
}

pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' | '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// One HTML tag found in a chunk of markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlTag {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub closing: bool,
    pub self_closing: bool,
}

impl HtmlTag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Boolean attributes such as `isShortName` count as present.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(key, _)| key == name)
    }
}

/// A piece of an HTML chunk: either a tag or the text between tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlPiece<'a> {
    Tag(HtmlTag),
    Text(&'a str),
}

pub fn split_html(html: &str) -> Vec<HtmlPiece<'_>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in TAG_RE.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            pieces.push(HtmlPiece::Text(&html[last..whole.start()]));
        }
        let attrs = caps
            .get(3)
            .map(|m| parse_attrs(m.as_str()))
            .unwrap_or_default();
        pieces.push(HtmlPiece::Tag(HtmlTag {
            name: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            attrs,
            closing: caps.get(1).map_or(false, |m| !m.as_str().is_empty()),
            self_closing: caps.get(4).map_or(false, |m| !m.as_str().is_empty()),
        }));
        last = whole.end();
    }
    if last < html.len() {
        pieces.push(HtmlPiece::Text(&html[last..]));
    }
    pieces
}

fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| unescape_attr(m.as_str()))
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

/// Removes every paper marker, including whatever it wraps.
pub fn strip_markers(text: &str) -> String {
    PAPER_MARKER_RE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> PaperMarker {
        PaperMarker {
            corpus_id: 42,
            placeholder_id: "(8, Chen et al., 2019)".to_string(),
            label: "Chen et al. 2019a".to_string(),
            title: "Say \"what\" <again> & again".to_string(),
        }
    }

    #[test]
    fn markup_survives_parsing() {
        let markup = marker().to_markup();
        let pieces = split_html(&markup);
        assert_eq!(pieces.len(), 2);
        let HtmlPiece::Tag(open) = &pieces[0] else { panic!("expected tag") };
        assert_eq!(open.name, "Paper");
        assert!(!open.closing);
        assert_eq!(open.attr("corpusId"), Some("42"));
        assert_eq!(open.attr("id"), Some("(8, Chen et al., 2019)"));
        assert_eq!(open.attr("label"), Some("Chen et al. 2019a"));
        assert_eq!(open.attr("paperTitle"), Some("Say \"what\" <again> & again"));
        let HtmlPiece::Tag(close) = &pieces[1] else { panic!("expected tag") };
        assert!(close.closing);
    }

    #[test]
    fn splits_text_between_tags() {
        let pieces = split_html(r#"<Author authorId="7">Jane Smith</Author> wrote"#);
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[1], HtmlPiece::Text("Jane Smith"));
        assert_eq!(pieces[3], HtmlPiece::Text(" wrote"));
    }

    #[test]
    fn boolean_attributes_are_present() {
        let pieces = split_html(r#"<Paper corpusId="1" isShortName/>"#);
        let HtmlPiece::Tag(tag) = &pieces[0] else { panic!("expected tag") };
        assert!(tag.has_attr("isShortName"));
        assert!(tag.self_closing);
    }

    #[test]
    fn strip_removes_markers_only() {
        let text = format!("Metrics improve {} results.", marker().to_markup());
        assert_eq!(strip_markers(&text), "Metrics improve  results.");
    }
}
