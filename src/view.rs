//! Widgets for a rendered document and its surrounding controls.

use iced::font::Weight;
use iced::widget::{button, column, container, horizontal_rule, row, text, Column, Row, Space};
use iced::{Alignment, Color, Element, Font, Length};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::diff::{ChangeKind, DiffLine, SideBySide};
use crate::drafts::{tab_label, DraftTabs};
use crate::render::{Block, BlockKind, CitationChip, Document, Span};
use crate::references::Reference;
use crate::Message;

pub const NO_ABSTRACT: &str = "Due to licensing constraints, we cannot display the abstract here. \
Please click on the title above to see the abstract.";

const MUTED: Color = Color::from_rgb(0.6, 0.62, 0.72);
const ADDED: Color = Color::from_rgb(0.45, 0.8, 0.5);
const REMOVED: Color = Color::from_rgb(0.95, 0.45, 0.45);

fn bold() -> Font {
    Font {
        weight: Weight::Bold,
        ..Font::MONOSPACE
    }
}

/// Cuts `s` to at most `max` terminal columns, ending in `…` when shortened.
pub fn truncate(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    let mut width = 0;
    let mut out = String::new();
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if width + w > max.saturating_sub(1) {
            out.push('…');
            return out;
        }
        width += w;
        out.push(c);
    }
    out
}

pub fn document<'a>(doc: &'a Document, open_evidence: Option<usize>) -> Element<'a, Message> {
    let mut content = Column::new().spacing(10);
    for block in &doc.blocks {
        content = content.push(block_view(block, open_evidence));
    }
    if !doc.references.is_empty() {
        content = content.push(horizontal_rule(1)).push(references(&doc.references));
    }
    content.into()
}

fn block_view<'a>(block: &'a Block, open_evidence: Option<usize>) -> Element<'a, Message> {
    let body: Element<'a, Message> = match &block.kind {
        BlockKind::Heading { level } => {
            let size: u16 = match level {
                1 => 22,
                2 => 19,
                _ => 17,
            };
            text(block.plain()).size(size).font(bold()).into()
        }
        BlockKind::ListItem { marker, depth } => row![
            Space::with_width(Length::Fixed(16.0 * *depth as f32)),
            text(marker.clone()).size(15),
            text(block.plain()).size(15),
        ]
        .spacing(6)
        .into(),
        BlockKind::Quote => container(text(block.plain()).size(15).color(MUTED))
            .padding([4, 12])
            .into(),
        BlockKind::Code => container(text(block.plain()).size(14))
            .padding(8)
            .width(Length::Fill)
            .style(container::rounded_box)
            .into(),
        BlockKind::Rule => horizontal_rule(1).into(),
        BlockKind::Paragraph => text(block.plain()).size(15).into(),
    };

    let actions = span_actions(&block.spans);
    let open = block.chips().find(|c| Some(c.occurrence) == open_evidence);

    let mut col = column![body].spacing(6);
    if let Some(actions) = actions {
        col = col.push(actions);
    }
    if let Some(chip) = open {
        col = col.push(evidence_panel(chip));
    }
    col.into()
}

/// Chips and links of one block as a row of small buttons.
fn span_actions<'a>(spans: &'a [Span]) -> Option<Element<'a, Message>> {
    let buttons: Vec<Element<'a, Message>> = spans
        .iter()
        .filter_map(|span| match span {
            Span::Citation(chip) => Some(
                button(text(format!("[{}]", chip.label)).size(12))
                    .style(button::secondary)
                    .padding([2, 6])
                    .on_press(Message::ToggleEvidence(chip.occurrence))
                    .into(),
            ),
            Span::Link { text: label, url } => Some(
                button(text(truncate(label, 40)).size(12))
                    .style(button::text)
                    .padding([2, 6])
                    .on_press(Message::OpenUrl(url.clone()))
                    .into(),
            ),
            Span::Author(author) => author.url.as_ref().map(|url| {
                button(text(author.name.clone()).size(12))
                    .style(button::text)
                    .padding([2, 6])
                    .on_press(Message::OpenUrl(url.clone()))
                    .into()
            }),
            Span::Text { .. } => None,
        })
        .collect();
    if buttons.is_empty() {
        return None;
    }
    Some(Row::with_children(buttons).spacing(4).into())
}

pub fn evidence_panel<'a>(chip: &'a CitationChip) -> Element<'a, Message> {
    let mut col = Column::new().spacing(8).push(
        button(text(chip.title.as_str()).size(15).font(bold()))
            .style(button::text)
            .padding(0)
            .on_press(Message::OpenUrl(chip.url.clone())),
    );
    if let Some(details) = &chip.details {
        col = col.push(text(details.as_str()).size(13).color(MUTED));
    }
    for snippet in &chip.evidence {
        let quoted = if snippet.trim().is_empty() {
            text(NO_ABSTRACT).size(13).color(MUTED)
        } else {
            text(format!("\u{201c}{}\u{201d}", snippet.trim())).size(13)
        };
        col = col.push(quoted);
    }
    col = col.push(
        row![
            button(text("Open paper details page").size(13))
                .style(button::secondary)
                .on_press(Message::OpenUrl(chip.url.clone())),
            button(text("Close").size(13))
                .style(button::text)
                .on_press(Message::ToggleEvidence(chip.occurrence)),
        ]
        .spacing(8),
    );
    container(col)
        .padding(12)
        .width(Length::Fill)
        .style(container::rounded_box)
        .into()
}

pub fn references<'a>(refs: &'a [Reference]) -> Element<'a, Message> {
    let mut col = Column::new().spacing(6).push(text("References").size(16).font(bold()));
    for reference in refs {
        col = col.push(
            button(text(reference.line.as_str()).size(13))
                .style(button::text)
                .padding(0)
                .on_press(Message::OpenUrl(reference.url.clone())),
        );
    }
    col.into()
}

pub fn draft_tabs<'a>(tabs: &DraftTabs, running: bool) -> Element<'a, Message> {
    let count = tabs.count();
    let selected = tabs.selected();
    let mut tab_row = Row::new().spacing(4).align_y(Alignment::Center);
    for index in 0..count {
        let style: fn(&iced::Theme, button::Status) -> button::Style = if Some(index) == selected {
            button::primary
        } else {
            button::secondary
        };
        tab_row = tab_row.push(
            button(text(tab_label(index, count, running)).size(13))
                .style(style)
                .padding([4, 10])
                .on_press(Message::SelectDraft(index)),
        );
    }
    if tabs.previous().is_some() {
        let label = if tabs.show_diff() { "Hide changes" } else { "Show changes" };
        tab_row = tab_row.push(Space::with_width(Length::Fill)).push(
            button(text(label).size(13))
                .style(button::text)
                .on_press(Message::ToggleDiff),
        );
    }
    tab_row.into()
}

fn diff_side<'a>(title: &'static str, lines: Vec<DiffLine>) -> Element<'a, Message> {
    let mut col = Column::new().spacing(4).width(Length::FillPortion(1));
    col = col.push(text(title).size(13).color(MUTED));
    for line in lines {
        let (prefix, color) = match line.kind {
            ChangeKind::Unchanged => ("  ", None),
            ChangeKind::Added => ("+ ", Some(ADDED)),
            ChangeKind::Removed => ("- ", Some(REMOVED)),
        };
        let t = text(format!("{}{}", prefix, line.text)).size(14);
        col = col.push(match color {
            Some(c) => t.color(c),
            None => t,
        });
    }
    col.into()
}

pub fn diff_columns<'a>(diff: SideBySide) -> Element<'a, Message> {
    if !diff.has_changes() {
        return text("No changes from the previous draft.").size(14).color(MUTED).into();
    }
    row![diff_side("Previous draft", diff.left), diff_side("This draft", diff.right)]
        .spacing(16)
        .into()
}
