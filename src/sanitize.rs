//! Allowlist sanitization of raw HTML embedded in page content.
//!
//! Pages may legitimately carry a small inline subset of HTML — most
//! importantly the highlight spans the render pipeline itself emits — but
//! anything executable must never reach the browser. The pass rewrites the
//! raw-HTML events of a parsed document: allowed tags are rebuilt with only
//! allowed attributes, unknown tags are dropped (their text flows through as
//! ordinary events), and dangerous container elements are dropped together
//! with everything up to their closing tag.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use pulldown_cmark::Event;

static ALLOWED_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "b", "blockquote", "br", "code", "del", "div", "em", "h1", "h2", "h3", "h4", "h5",
        "h6", "hr", "i", "img", "ins", "kbd", "li", "mark", "ol", "p", "pre", "s", "span",
        "strong", "sub", "sup", "table", "tbody", "td", "th", "thead", "tr", "u", "ul",
    ]
    .into_iter()
    .collect()
});

static ALLOWED_ATTRS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["alt", "class", "href", "id", "src", "title"]
        .into_iter()
        .collect()
});

/// Elements whose content must disappear along with the tags.
const DANGEROUS_CONTAINERS: [&str; 6] = ["script", "style", "iframe", "object", "embed", "noscript"];

/// Sanitizes the raw-HTML events of a parsed document.
///
/// While a dangerous container is open, every event — including ordinary
/// text — is dropped until its closing tag shows up in a later fragment.
pub fn sanitize_events(events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut out = Vec::with_capacity(events.len());
    let mut suppressing: Option<String> = None;

    for event in events {
        match event {
            Event::Html(raw) => {
                let cleaned = sanitize_fragment(&raw, &mut suppressing);
                if !cleaned.is_empty() {
                    out.push(Event::Html(cleaned.into()));
                }
            }
            Event::InlineHtml(raw) => {
                let cleaned = sanitize_fragment(&raw, &mut suppressing);
                if !cleaned.is_empty() {
                    out.push(Event::InlineHtml(cleaned.into()));
                }
            }
            _ if suppressing.is_some() => {}
            other => out.push(other),
        }
    }
    out
}

fn sanitize_fragment(fragment: &str, suppressing: &mut Option<String>) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut i = 0;

    while i < fragment.len() {
        if let Some(name) = suppressing.clone() {
            match find_close_tag(fragment, i, &name) {
                Some(past) => {
                    *suppressing = None;
                    i = past;
                    continue;
                }
                None => return out,
            }
        }

        let Some(rel) = fragment[i..].find('<') else {
            out.push_str(&fragment[i..]);
            break;
        };
        let lt = i + rel;
        out.push_str(&fragment[i..lt]);
        let rest = &fragment[lt..];

        if rest.starts_with("<!--") {
            match fragment[lt + 4..].find("-->") {
                Some(end_rel) => i = lt + 4 + end_rel + 3,
                None => break,
            }
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            match find_tag_end(fragment, lt + 1) {
                Some(gt) => i = gt + 1,
                None => break,
            }
            continue;
        }
        let Some(gt) = find_tag_end(fragment, lt + 1) else {
            // A lone '<' that never closes cannot stay raw.
            out.push_str("&lt;");
            i = lt + 1;
            continue;
        };
        let body = &fragment[lt + 1..gt];
        i = gt + 1;

        if let Some(closing) = body.strip_prefix('/') {
            let name = closing.trim().to_ascii_lowercase();
            if ALLOWED_TAGS.contains(name.as_str()) {
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
            }
            continue;
        }

        let (name, attr_src, self_closing) = split_tag_body(body);
        if name.is_empty() {
            continue;
        }
        if DANGEROUS_CONTAINERS.contains(&name.as_str()) {
            if !self_closing {
                *suppressing = Some(name);
            }
            continue;
        }
        if ALLOWED_TAGS.contains(name.as_str()) {
            out.push_str(&rebuild_tag(&name, attr_src, self_closing));
        }
    }
    out
}

/// Index of the closing '>' starting the search at `from`, honoring quoted
/// attribute values.
fn find_tag_end(fragment: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in fragment[from..].char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '>' => return Some(from + idx),
                _ => {}
            },
        }
    }
    None
}

/// Finds `</name>` (case-insensitive, optional whitespace before '>') and
/// returns the index just past it.
fn find_close_tag(fragment: &str, from: usize, name: &str) -> Option<usize> {
    let lower = fragment.to_ascii_lowercase();
    let needle = format!("</{name}");
    let mut search_from = from;
    while let Some(rel) = lower[search_from..].find(&needle) {
        let after = search_from + rel + needle.len();
        let rest = &fragment[after..];
        let trimmed = rest.trim_start();
        if let Some(stripped) = trimmed.strip_prefix('>') {
            let consumed = rest.len() - stripped.len();
            return Some(after + consumed);
        }
        search_from = after;
    }
    None
}

fn split_tag_body(body: &str) -> (String, &str, bool) {
    let (body, self_closing) = match body.strip_suffix('/') {
        Some(stripped) => (stripped, true),
        None => (body, false),
    };
    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(body.len());
    let name = body[..name_len].to_ascii_lowercase();
    (name, &body[name_len..], self_closing)
}

fn rebuild_tag(name: &str, attr_src: &str, self_closing: bool) -> String {
    let mut tag = String::with_capacity(attr_src.len() + name.len() + 3);
    tag.push('<');
    tag.push_str(name);
    for (attr_name, attr_value) in parse_attrs(attr_src) {
        if !ALLOWED_ATTRS.contains(attr_name.as_str()) {
            continue;
        }
        if (attr_name == "href" || attr_name == "src") && !safe_url(&attr_value) {
            continue;
        }
        tag.push(' ');
        tag.push_str(&attr_name);
        tag.push_str("=\"");
        tag.push_str(&escape_attr(&attr_value));
        tag.push('"');
    }
    if self_closing {
        tag.push_str(" /");
    }
    tag.push('>');
    tag
}

fn parse_attrs(src: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = src.trim_start();

    while !rest.is_empty() {
        let name_len = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_len].trim_matches('/').to_ascii_lowercase();
        rest = rest[name_len..].trim_start();

        let mut value = String::new();
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            if let Some(quote) = after_eq.chars().next().filter(|c| *c == '"' || *c == '\'') {
                let inner = &after_eq[1..];
                match inner.find(quote) {
                    Some(end) => {
                        value = inner[..end].to_string();
                        rest = &inner[end + 1..];
                    }
                    None => {
                        value = inner.to_string();
                        rest = "";
                    }
                }
            } else {
                let end = after_eq
                    .find(char::is_whitespace)
                    .unwrap_or(after_eq.len());
                value = after_eq[..end].to_string();
                rest = &after_eq[end..];
            }
        }

        if !name.is_empty() {
            attrs.push((name, value));
        }
        rest = rest.trim_start();
    }
    attrs
}

/// Accepts http(s), mailto, fragment, and relative URLs; rejects anything
/// that smuggles a scheme such as `javascript:` or `data:`.
fn safe_url(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    if v.starts_with("http://") || v.starts_with("https://") || v.starts_with("mailto:") {
        return true;
    }
    if v.starts_with('#') || v.starts_with('/') {
        return true;
    }
    match v.find(|c| c == ':' || c == '/' || c == '?' || c == '#') {
        Some(idx) => v.as_bytes()[idx] != b':',
        None => true,
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
