//! Page range parsing (`"1-3, 5, 9-7"`).

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::warn;

/// Pages selected by a range expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSelection {
    /// Zero-based page indices, ascending and unique.
    pub pages: Vec<usize>,
    /// Parts that could not be parsed and were ignored.
    pub invalid_parts: Vec<String>,
}

impl PageSelection {
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

fn part_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$").expect("page range pattern is valid")
    })
}

/// Clamp a 1-based page number into `[1, page_count]` and convert to 0-based.
fn clamp_page(raw: &str, page_count: usize) -> usize {
    // Numbers too large for usize clamp to the last page.
    let n = raw.parse::<usize>().unwrap_or(usize::MAX);
    n.clamp(1, page_count) - 1
}

/// Parse `spec` against a document of `page_count` pages.
///
/// Comma-separated parts are `N` or `N-M` (1-based, whitespace tolerant).
/// Numbers are clamped to the document, reversed ranges are swapped, and an
/// empty spec or `all` selects every page.
pub fn parse_page_range(spec: &str, page_count: usize) -> PageSelection {
    let mut selection = PageSelection::default();
    if page_count == 0 {
        return selection;
    }

    let spec = spec.trim();
    if spec.is_empty() || spec.eq_ignore_ascii_case("all") {
        selection.pages = (0..page_count).collect();
        return selection;
    }

    let mut pages = BTreeSet::new();
    for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
        let Some(caps) = part_pattern().captures(part) else {
            warn!(part = part.trim(), "Invalid page range part");
            selection.invalid_parts.push(part.trim().to_string());
            continue;
        };

        let start = clamp_page(&caps[1], page_count);
        let end = caps
            .get(2)
            .map(|m| clamp_page(m.as_str(), page_count))
            .unwrap_or(start);
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        pages.extend(lo..=hi);
    }

    selection.pages = pages.into_iter().collect();
    selection
}
