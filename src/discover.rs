//! Browser-less table discovery over the rendered HTML.

use scraper::{Html, Selector};
use std::collections::HashMap;

/// CSS selector matching every exportable table.
pub const TABLE_SELECTOR: &str = "table[id]";

/// Ids of every `table[id]` in document order, duplicates included.
pub fn discover_tables(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    // TABLE_SELECTOR is a constant, parsing cannot fail
    let selector = match Selector::parse(TABLE_SELECTOR) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("id"))
        .map(|id| id.to_string())
        .collect()
}

/// Ids that occur more than once, in order of first appearance.
pub fn duplicate_ids(ids: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in ids {
        *counts.entry(id.as_str()).or_default() += 1;
    }
    let mut seen = Vec::new();
    for id in ids {
        if counts[id.as_str()] > 1 && !seen.contains(id) {
            seen.push(id.clone());
        }
    }
    seen
}
