//! Literal substring search over the in-memory page list.
//!
//! The term is matched case-insensitively and counted without overlap, the
//! way a global regex scan counts: advance past each match and keep going.
//! Every character of the term is literal; metacharacters are escaped before
//! the pattern is built, so searching for `c++` or `.` means exactly that.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::store::Page;

/// One page that matched a search, with its occurrence count.
///
/// Ephemeral: recomputed from scratch on every search, never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub page_id: i64,
    pub title: String,
    pub match_count: usize,
    pub term: String,
}

/// Scans `pages` for `term` and reports one [`SearchResult`] per page with at
/// least one occurrence, in the order the pages were given.
///
/// The term is trimmed first; an empty term yields an empty result without
/// touching the pages.
pub fn search(pages: &[Page], term: &str) -> Vec<SearchResult> {
    let term = term.trim();
    if term.is_empty() {
        return Vec::new();
    }
    let Some(pattern) = literal_pattern(term) else {
        return Vec::new();
    };

    pages
        .iter()
        .filter_map(|page| {
            let match_count = pattern.find_iter(&page.content).count();
            (match_count > 0).then(|| SearchResult {
                page_id: page.id,
                title: page.title.clone(),
                match_count,
                term: term.to_string(),
            })
        })
        .collect()
}

/// Compiles a case-insensitive pattern that matches `term` literally.
///
/// Shared with the highlight annotator so both sides agree on what counts
/// as an occurrence. An escaped literal always compiles; the `None` arm only
/// guards the engine's compiled-size limit on absurdly long terms.
pub(crate) fn literal_pattern(term: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: i64, title: &str, content: &str) -> Page {
        Page {
            id,
            user_id: 1,
            title: title.to_string(),
            content: content.to_string(),
            is_favorite: false,
        }
    }

    #[test]
    fn test_empty_term_returns_nothing() {
        let pages = vec![page(1, "A", "anything at all")];
        assert!(search(&pages, "").is_empty());
        assert!(search(&pages, "   ").is_empty());
        assert!(search(&pages, "\t\n").is_empty());
    }

    #[test]
    fn test_term_is_trimmed_before_matching() {
        let pages = vec![page(1, "A", "cat")];
        let results = search(&pages, "  cat  ");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].term, "cat");
    }

    #[test]
    fn test_match_count_is_exact() {
        let pages = vec![
            page(1, "A", "cat cat dog"),
            page(2, "B", "no match here"),
        ];
        let results = search(&pages, "cat");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_id, 1);
        assert_eq!(results[0].match_count, 2);
    }

    #[test]
    fn test_case_insensitive_matching() {
        let pages = vec![page(1, "A", "Cat CAT cAt")];
        let results = search(&pages, "cat");
        assert_eq!(results[0].match_count, 3);

        let results = search(&pages, "CAT");
        assert_eq!(results[0].match_count, 3);
    }

    #[test]
    fn test_overlapping_occurrences_not_double_counted() {
        // "aaaa" scanned for "aa" advances past each match: two, not three.
        let pages = vec![page(1, "A", "aaaa")];
        let results = search(&pages, "aa");
        assert_eq!(results[0].match_count, 2);
    }

    #[test]
    fn test_pages_without_matches_are_absent() {
        let pages = vec![
            page(1, "A", "hello"),
            page(2, "B", "world"),
            page(3, "C", "hello world"),
        ];
        let ids: Vec<i64> = search(&pages, "world")
            .into_iter()
            .map(|r| r.page_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_results_follow_scan_order() {
        let pages = vec![
            page(9, "last", "x"),
            page(2, "mid", "x"),
            page(5, "first", "x"),
        ];
        let ids: Vec<i64> = search(&pages, "x").into_iter().map(|r| r.page_id).collect();
        assert_eq!(ids, vec![9, 2, 5]);
    }

    #[test]
    fn test_metacharacters_match_literally() {
        let pages = vec![page(1, "A", "uses c++ and c--")];
        let results = search(&pages, "c++");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_count, 1);

        // A bare dot must not act as a wildcard.
        let pages = vec![page(1, "A", "abc"), page(2, "B", "a.c")];
        let results = search(&pages, ".");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_id, 2);

        // An unbalanced paren would be a pattern error if left unescaped.
        let pages = vec![page(1, "A", "f(x) = a(b"), page(2, "B", "ab")];
        let results = search(&pages, "a(b");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_count, 1);
    }

    #[test]
    fn test_unicode_case_folding() {
        let pages = vec![page(1, "A", "Größe")];
        let results = search(&pages, "größe");
        assert_eq!(results[0].match_count, 1);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = SearchResult {
            page_id: 1,
            title: "A".to_string(),
            match_count: 2,
            term: "cat".to_string(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"pageId": 1, "title": "A", "matchCount": 2, "term": "cat"})
        );
    }
}
