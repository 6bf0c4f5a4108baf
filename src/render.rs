//! Turns a resolved section's markdown into a typed document the view can
//! lay out. Inline `Paper` and `Author` tags become chips; everything else
//! the markdown parser reports becomes plain styled runs.

use std::cell::Cell;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};
use tracing::debug;

use crate::config::PapersConfig;
use crate::labels::family_name;
use crate::marker::{split_html, HtmlPiece, HtmlTag, AUTHOR_TAG, PAPER_TAG};
use crate::models::CorpusId;
use crate::references::{build_references, format_reference, paper_url, Reference};
use crate::resolver::RenderedSection;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextStyle {
    pub emphasis: bool,
    pub strong: bool,
    pub code: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationChip {
    /// Position among the chips of one document; evidence popovers are
    /// toggled per occurrence.
    pub occurrence: usize,
    pub corpus_id: CorpusId,
    pub placeholder_id: String,
    pub label: String,
    pub title: String,
    pub evidence: Vec<String>,
    pub details: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorChip {
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Text { text: String, style: TextStyle },
    Link { text: String, url: String },
    Citation(CitationChip),
    Author(AuthorChip),
}

impl Span {
    pub fn plain(&self) -> String {
        match self {
            Span::Text { text, .. } | Span::Link { text, .. } => text.clone(),
            Span::Citation(chip) => format!("[{}]", chip.label),
            Span::Author(chip) => chip.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Heading { level: u8 },
    Paragraph,
    ListItem { marker: String, depth: usize },
    Quote,
    Code,
    Rule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub spans: Vec<Span>,
}

impl Block {
    pub fn plain(&self) -> String {
        self.spans.iter().map(Span::plain).collect()
    }

    pub fn chips(&self) -> impl Iterator<Item = &CitationChip> {
        self.spans.iter().filter_map(|s| match s {
            Span::Citation(chip) => Some(chip),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub blocks: Vec<Block>,
    pub references: Vec<Reference>,
}

impl Document {
    pub fn chips(&self) -> impl Iterator<Item = &CitationChip> {
        self.blocks.iter().flat_map(Block::chips)
    }

    pub fn chip(&self, occurrence: usize) -> Option<&CitationChip> {
        self.chips().find(|c| c.occurrence == occurrence)
    }

    /// Clipboard form: chips collapse to `[label]`, references follow.
    pub fn plain_text(&self) -> String {
        let mut out: Vec<String> = self
            .blocks
            .iter()
            .map(|block| match &block.kind {
                BlockKind::Heading { level } => {
                    format!("{} {}", "#".repeat(usize::from(*level)), block.plain())
                }
                BlockKind::ListItem { marker, depth } => {
                    format!("{}{} {}", "  ".repeat(*depth), marker, block.plain())
                }
                BlockKind::Quote => format!("> {}", block.plain()),
                BlockKind::Rule => "---".to_string(),
                BlockKind::Paragraph | BlockKind::Code => block.plain(),
            })
            .collect();
        if !self.references.is_empty() {
            out.push("References".to_string());
            out.extend(self.references.iter().map(|r| r.line.clone()));
        }
        out.join("\n\n")
    }
}

struct RenderContext<'a> {
    section: &'a RenderedSection,
    papers: &'a PapersConfig,
    next_occurrence: Cell<usize>,
}

type TagRenderer = fn(&HtmlTag, &str, &RenderContext<'_>) -> Option<Span>;

const TAG_RENDERERS: &[(&str, TagRenderer)] = &[(PAPER_TAG, render_paper), (AUTHOR_TAG, render_author)];

fn renderer_for(name: &str) -> Option<TagRenderer> {
    TAG_RENDERERS
        .iter()
        .find(|(tag, _)| *tag == name)
        .map(|(_, render)| *render)
}

fn render_paper(tag: &HtmlTag, children: &str, ctx: &RenderContext<'_>) -> Option<Span> {
    let title = tag.attr("paperTitle").map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return None;
    }
    let corpus_id: CorpusId = tag.attr("corpusId")?.trim().parse().ok()?;
    let placeholder_id = tag.attr("id").unwrap_or_default().to_string();
    let label = tag
        .attr("label")
        .filter(|l| !l.trim().is_empty())
        .or_else(|| Some(children.trim()).filter(|c| !c.is_empty()))
        .unwrap_or(placeholder_id.as_str())
        .to_string();

    let occurrence = ctx.next_occurrence.get();
    ctx.next_occurrence.set(occurrence + 1);

    Some(Span::Citation(CitationChip {
        occurrence,
        corpus_id,
        evidence: ctx.section.evidence_for(&placeholder_id),
        details: ctx
            .section
            .papers
            .get(&corpus_id)
            .map(|p| format_reference(p, ctx.papers.max_authors))
            .filter(|line| !line.is_empty()),
        url: paper_url(&ctx.papers.paper_url_base, corpus_id),
        placeholder_id,
        label,
        title: title.to_string(),
    }))
}

fn render_author(tag: &HtmlTag, children: &str, ctx: &RenderContext<'_>) -> Option<Span> {
    let full = Some(children.trim())
        .filter(|c| !c.is_empty())
        .or_else(|| tag.attr("name").map(str::trim))
        .filter(|n| !n.is_empty())?;
    let name = if tag.has_attr("isShortName") {
        family_name(full).unwrap_or(full)
    } else {
        full
    };
    let url = tag
        .attr("authorId")
        .filter(|id| !id.is_empty())
        .map(|id| format!("{}/{}", ctx.papers.author_url_base.trim_end_matches('/'), id));
    Some(Span::Author(AuthorChip {
        name: name.to_string(),
        url,
    }))
}

struct Capture {
    tag: HtmlTag,
    render: TagRenderer,
    children: String,
}

struct Builder<'a> {
    ctx: RenderContext<'a>,
    blocks: Vec<Block>,
    kind: BlockKind,
    spans: Vec<Span>,
    styles: Vec<Tag<'a>>,
    link: Option<(String, String)>,
    /// Chips rendered inside an open link; they follow the link span.
    pending: Vec<Span>,
    captures: Vec<Capture>,
    lists: Vec<Option<u64>>,
    quote_depth: usize,
}

impl<'a> Builder<'a> {
    fn new(ctx: RenderContext<'a>) -> Self {
        Builder {
            ctx,
            blocks: Vec::new(),
            kind: BlockKind::Paragraph,
            spans: Vec::new(),
            styles: Vec::new(),
            link: None,
            pending: Vec::new(),
            captures: Vec::new(),
            lists: Vec::new(),
            quote_depth: 0,
        }
    }

    fn style(&self) -> TextStyle {
        let mut style = TextStyle {
            code: self.kind == BlockKind::Code,
            ..TextStyle::default()
        };
        for tag in &self.styles {
            match tag {
                Tag::Emphasis => style.emphasis = true,
                Tag::Strong => style.strong = true,
                _ => {}
            }
        }
        style
    }

    fn base_kind(&self) -> BlockKind {
        if self.quote_depth > 0 {
            BlockKind::Quote
        } else {
            BlockKind::Paragraph
        }
    }

    fn push_text(&mut self, text: &str, style: TextStyle) {
        if text.is_empty() {
            return;
        }
        if let Some(capture) = self.captures.last_mut() {
            capture.children.push_str(text);
            return;
        }
        if let Some((link_text, _)) = self.link.as_mut() {
            link_text.push_str(text);
            return;
        }
        if let Some(Span::Text { text: last, style: last_style }) = self.spans.last_mut() {
            if *last_style == style {
                last.push_str(text);
                return;
            }
        }
        self.spans.push(Span::Text {
            text: text.to_string(),
            style,
        });
    }

    fn html(&mut self, html: &str) {
        for piece in split_html(html) {
            match piece {
                HtmlPiece::Text(text) => {
                    let style = self.style();
                    self.push_text(&text.replace('\n', " "), style);
                }
                HtmlPiece::Tag(tag) => self.html_tag(tag),
            }
        }
    }

    fn html_tag(&mut self, tag: HtmlTag) {
        if tag.closing {
            if self.captures.last().map_or(false, |c| c.tag.name == tag.name) {
                if let Some(capture) = self.captures.pop() {
                    self.finish_capture(capture);
                }
            }
            return;
        }
        let Some(render) = renderer_for(&tag.name) else {
            debug!(tag = %tag.name, "ignoring unknown inline tag");
            return;
        };
        let capture = Capture {
            tag,
            render,
            children: String::new(),
        };
        if capture.tag.self_closing {
            self.finish_capture(capture);
        } else {
            self.captures.push(capture);
        }
    }

    fn finish_capture(&mut self, capture: Capture) {
        if let Some(span) = (capture.render)(&capture.tag, &capture.children, &self.ctx) {
            if self.link.is_some() {
                self.pending.push(span);
            } else {
                self.spans.push(span);
            }
        }
    }

    fn close_link(&mut self) {
        if let Some((text, url)) = self.link.take() {
            let text = if text.is_empty() { url.clone() } else { text };
            self.spans.push(Span::Link { text, url });
        }
        self.spans.append(&mut self.pending);
    }

    fn flush(&mut self) {
        while let Some(capture) = self.captures.pop() {
            self.finish_capture(capture);
        }
        self.close_link();
        let mut spans = std::mem::take(&mut self.spans);
        if self.kind == BlockKind::Code {
            if let Some(Span::Text { text, .. }) = spans.last_mut() {
                let trimmed = text.trim_end_matches('\n').len();
                text.truncate(trimmed);
            }
        }
        let has_content = spans.iter().any(|s| match s {
            Span::Text { text, .. } => !text.trim().is_empty(),
            _ => true,
        });
        let base = self.base_kind();
        let kind = std::mem::replace(&mut self.kind, base);
        if has_content {
            self.blocks.push(Block { kind, spans });
        }
    }

    fn start(&mut self, tag: Tag<'a>) {
        match tag {
            Tag::Paragraph => {
                let continues_item = matches!(self.kind, BlockKind::ListItem { .. }) && self.spans.is_empty();
                if !continues_item {
                    self.flush();
                }
            }
            Tag::Heading(level, _, _) => {
                self.flush();
                self.kind = BlockKind::Heading { level: level as u8 };
            }
            Tag::BlockQuote => {
                self.flush();
                self.quote_depth += 1;
                self.kind = self.base_kind();
            }
            Tag::CodeBlock(_) => {
                self.flush();
                self.kind = BlockKind::Code;
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}.", n);
                        *n += 1;
                        marker
                    }
                    _ => "•".to_string(),
                };
                self.kind = BlockKind::ListItem { marker, depth };
            }
            Tag::Emphasis | Tag::Strong => self.styles.push(tag),
            Tag::Link(_, url, _) | Tag::Image(_, url, _) => {
                self.link = Some((String::new(), url.to_string()));
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: Tag<'a>) {
        match tag {
            Tag::Paragraph | Tag::Heading(..) | Tag::Item | Tag::TableRow | Tag::TableHead => self.flush(),
            Tag::CodeBlock(kind) => {
                if let CodeBlockKind::Fenced(lang) = kind {
                    debug!(lang = %lang, "rendered fenced code block");
                }
                self.flush();
            }
            Tag::BlockQuote => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.kind = self.base_kind();
            }
            Tag::List(_) => {
                self.flush();
                self.lists.pop();
            }
            Tag::Emphasis | Tag::Strong => {
                self.styles.pop();
            }
            Tag::Link(..) | Tag::Image(..) => self.close_link(),
            Tag::TableCell => {
                let style = self.style();
                self.push_text(" | ", style);
            }
            _ => {}
        }
    }

    fn event(&mut self, event: Event<'a>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                let style = self.style();
                self.push_text(&text, style);
            }
            Event::Code(code) => {
                let style = TextStyle {
                    code: true,
                    ..self.style()
                };
                self.push_text(&code, style);
            }
            Event::Html(html) => self.html(&html),
            Event::SoftBreak => {
                let style = self.style();
                self.push_text(" ", style);
            }
            Event::HardBreak => {
                let style = self.style();
                self.push_text("\n", style);
            }
            Event::Rule => {
                self.flush();
                self.blocks.push(Block {
                    kind: BlockKind::Rule,
                    spans: Vec::new(),
                });
            }
            Event::FootnoteReference(name) => {
                let style = self.style();
                self.push_text(&format!("[{}]", name), style);
            }
            Event::TaskListMarker(done) => {
                let style = self.style();
                self.push_text(if done { "[x] " } else { "[ ] " }, style);
            }
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }
}

pub fn render_section(section: &RenderedSection, papers: &PapersConfig) -> Document {
    let ctx = RenderContext {
        section,
        papers,
        next_occurrence: Cell::new(0),
    };
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut builder = Builder::new(ctx);
    for event in Parser::new_ext(&section.text, options) {
        builder.event(event);
    }
    Document {
        blocks: builder.finish(),
        references: build_references(section, papers.max_authors, &papers.paper_url_base),
    }
}
