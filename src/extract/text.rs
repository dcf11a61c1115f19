//! Whitespace and text helpers shared by extraction and normalization.

use scraper::ElementRef;

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

/// Visible text of an element, skipping scripts and styles.
pub fn element_text(el: &ElementRef) -> String {
    let mut parts = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    normalize_ws(&parts.join(" "))
}

/// Normalized text, or `None` when nothing is left.
pub fn clean_field(s: &str) -> Option<String> {
    let cleaned = normalize_ws(&s.replace('\u{a0}', " "));
    let cleaned = cleaned.trim_matches(|c: char| c == '|' || c == '-' || c == '•' || c.is_whitespace());
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Lowercase words made of letters and digits only.
pub fn fold_words(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-word phrase search on already lowercased text.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric();
    haystack.match_indices(phrase).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + phrase.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}
