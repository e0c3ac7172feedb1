//! Markdown parsing, heading extraction, and the HTML render pipeline.
//!
//! Pages are parsed once into a pulldown-cmark event stream, and every
//! transform is a pure `Vec<Event> -> Vec<Event>` pass over that stream.
//! The passes run in a fixed order: sanitize raw HTML, split text nodes
//! around search-term occurrences, attach heading anchors, then inject the
//! dark-mode text classes. Highlighting runs before anchor injection so the
//! anchor is always derived from the heading's original text, even when the
//! heading itself contains the search term.

use pulldown_cmark::{Alignment, Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};
use regex::Regex;

use crate::sanitize::sanitize_events;
use crate::search::literal_pattern;

/// Class pair applied to highlighted search-term occurrences.
pub const HIGHLIGHT_CLASSES: &str = "bg-yellow-300 font-bold text-yellow-800";

/// Class giving headings, strong text, and table cells a readable dark-mode color.
pub const DARK_TEXT_CLASS: &str = "dark:text-gray-200";

/// One heading of a document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// Depth 1-6.
    pub level: u8,
    /// Concatenated plain text and inline code of the heading's direct
    /// children; nested formatting (emphasis, links, images) contributes
    /// nothing.
    pub text: String,
}

fn gfm_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH
}

/// Extracts every heading from `markdown` for the table of contents.
///
/// Pure and deterministic; callers re-invoke it whenever the source text
/// changes.
pub fn extract_headings(markdown: &str) -> Vec<Heading> {
    let parser = Parser::new_ext(markdown, gfm_options());
    let mut headings = Vec::new();
    let mut in_heading = false;
    let mut current_level = 0u8;
    let mut current_text = String::new();
    let mut nested = 0usize;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                in_heading = true;
                current_level = heading_level_number(level);
                current_text.clear();
                nested = 0;
            }
            Event::End(TagEnd::Heading(_)) => {
                if in_heading {
                    headings.push(Heading {
                        level: current_level,
                        text: current_text.clone(),
                    });
                }
                in_heading = false;
            }
            // Only direct children count: text inside emphasis, links, or
            // images sits at nested > 0 and is dropped wholesale.
            Event::Start(_) if in_heading => nested += 1,
            Event::End(_) if in_heading => nested = nested.saturating_sub(1),
            Event::Text(text) if in_heading && nested == 0 => current_text.push_str(&text),
            Event::Code(code) if in_heading && nested == 0 => current_text.push_str(&code),
            // Setext headings can span lines; the break counts as whitespace.
            Event::SoftBreak | Event::HardBreak if in_heading && nested == 0 => {
                current_text.push(' ');
            }
            _ => {}
        }
    }

    headings
}

/// Derives the anchor id for a heading: runs of whitespace become a single
/// hyphen and the result is lower-cased.
///
/// `"My Heading"` → `"my-heading"`, `"Already-Has-Dash"` →
/// `"already-has-dash"`. Leading and trailing whitespace runs also become
/// hyphens; the TOC links and the injected ids share this function, so the
/// derivation is a stable contract.
pub fn anchor_id(text: &str) -> String {
    let mut id = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_hyphen = true;
        } else {
            if pending_hyphen {
                id.push('-');
                pending_hyphen = false;
            }
            for lower in ch.to_lowercase() {
                id.push(lower);
            }
        }
    }
    if pending_hyphen {
        id.push('-');
    }
    id
}

/// Renders a page body to HTML, optionally highlighting a search term.
///
/// An empty (or all-whitespace) term renders the document unchanged apart
/// from sanitization, anchors, and dark-mode classes.
pub fn render_page_html(markdown: &str, highlight_term: &str) -> String {
    let events: Vec<Event> = Parser::new_ext(markdown, gfm_options()).collect();
    let events = sanitize_events(events);
    let events = highlight_events(events, highlight_term);
    let events = inject_heading_anchors(events);
    let events = inject_dark_mode_classes(events);

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events.into_iter());
    out
}

fn heading_level_number(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Splits text events around case-insensitive occurrences of `term` and
/// wraps each occurrence in the highlight span, preserving the matched
/// text's original casing. Code blocks and inline code are left alone.
fn highlight_events<'a>(events: Vec<Event<'a>>, term: &str) -> Vec<Event<'a>> {
    let term = term.trim();
    if term.is_empty() {
        return events;
    }
    let Some(pattern) = literal_pattern(term) else {
        return events;
    };

    let mut out = Vec::with_capacity(events.len());
    let mut in_code_block = false;
    for event in events {
        match event {
            Event::Start(Tag::CodeBlock(_)) => {
                in_code_block = true;
                out.push(event);
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push(event);
            }
            Event::Text(text) if !in_code_block => append_highlighted(&text, &pattern, &mut out),
            other => out.push(other),
        }
    }
    out
}

fn append_highlighted<'a>(text: &str, pattern: &Regex, out: &mut Vec<Event<'a>>) {
    let mut cursor = 0;
    for m in pattern.find_iter(text) {
        if m.start() > cursor {
            out.push(Event::Text(text[cursor..m.start()].to_string().into()));
        }
        out.push(Event::InlineHtml(
            format!("<span class=\"{HIGHLIGHT_CLASSES}\">").into(),
        ));
        out.push(Event::Text(m.as_str().to_string().into()));
        out.push(Event::InlineHtml("</span>".into()));
        cursor = m.end();
    }
    if cursor < text.len() {
        out.push(Event::Text(text[cursor..].to_string().into()));
    }
}

/// Attaches an anchor id and the dark-mode class to every heading.
///
/// The id comes from [`anchor_id`] over the heading's direct text, which the
/// highlight pass preserves as plain text events, so it always matches the
/// pre-highlight derivation used by the TOC.
fn inject_heading_anchors(events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut out = Vec::with_capacity(events.len());
    let mut buffer: Vec<Event> = Vec::new();
    let mut in_heading = false;

    for event in events {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                in_heading = true;
                buffer.clear();
            }
            Event::End(TagEnd::Heading(level)) if in_heading => {
                let anchor = anchor_id(&direct_heading_text(&buffer));
                out.push(Event::Start(Tag::Heading {
                    level,
                    id: Some(anchor.into()),
                    classes: vec![DARK_TEXT_CLASS.into()],
                    attrs: Vec::new(),
                }));
                out.append(&mut buffer);
                out.push(Event::End(TagEnd::Heading(level)));
                in_heading = false;
            }
            other if in_heading => buffer.push(other),
            other => out.push(other),
        }
    }
    out
}

fn direct_heading_text(events: &[Event<'_>]) -> String {
    let mut text = String::new();
    let mut nested = 0usize;
    for event in events {
        match event {
            Event::Start(_) => nested += 1,
            Event::End(_) => nested = nested.saturating_sub(1),
            Event::Text(t) if nested == 0 => text.push_str(t),
            Event::Code(c) if nested == 0 => text.push_str(c),
            Event::SoftBreak | Event::HardBreak if nested == 0 => text.push(' '),
            _ => {}
        }
    }
    text
}

/// Rewrites strong and table-cell tags to carry the dark-mode text class.
///
/// Table cells are emitted as raw HTML, so this pass mirrors the
/// serializer's own th/td choice and alignment styles.
fn inject_dark_mode_classes(events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut out = Vec::with_capacity(events.len());
    let mut alignments: Vec<Alignment> = Vec::new();
    let mut cell_index = 0usize;
    let mut in_table_head = false;

    for event in events {
        match event {
            Event::Start(Tag::Strong) => out.push(Event::InlineHtml(
                format!("<strong class=\"{DARK_TEXT_CLASS}\">").into(),
            )),
            Event::End(TagEnd::Strong) => out.push(Event::InlineHtml("</strong>".into())),
            Event::Start(Tag::Table(aligns)) => {
                alignments = aligns.clone();
                out.push(Event::Start(Tag::Table(aligns)));
            }
            Event::End(TagEnd::Table) => {
                alignments.clear();
                out.push(event);
            }
            Event::Start(Tag::TableHead) => {
                in_table_head = true;
                cell_index = 0;
                out.push(event);
            }
            Event::End(TagEnd::TableHead) => {
                in_table_head = false;
                out.push(event);
            }
            Event::Start(Tag::TableRow) => {
                cell_index = 0;
                out.push(event);
            }
            Event::Start(Tag::TableCell) => {
                out.push(Event::Html(
                    table_cell_open(in_table_head, alignments.get(cell_index)).into(),
                ));
            }
            Event::End(TagEnd::TableCell) => {
                out.push(Event::Html(
                    if in_table_head { "</th>" } else { "</td>" }.into(),
                ));
                cell_index += 1;
            }
            other => out.push(other),
        }
    }
    out
}

fn table_cell_open(in_head: bool, alignment: Option<&Alignment>) -> String {
    let tag = if in_head { "th" } else { "td" };
    let style = match alignment {
        Some(Alignment::Left) => " style=\"text-align: left\"",
        Some(Alignment::Center) => " style=\"text-align: center\"",
        Some(Alignment::Right) => " style=\"text-align: right\"",
        _ => "",
    };
    format!("<{tag} class=\"{DARK_TEXT_CLASS}\"{style}>")
}
