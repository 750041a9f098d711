use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use stop_words::{get, LANGUAGE};

/// Tokens shorter than this are dropped; too short to carry meaning as a
/// standalone keyword.
const MIN_KEYWORD_LEN: usize = 2;

fn stop_word_set() -> &'static HashSet<String> {
    static STOP_WORDS: OnceLock<HashSet<String>> = OnceLock::new();
    STOP_WORDS.get_or_init(|| get(LANGUAGE::English).into_iter().collect())
}

/// Derive the deduplicated keyword set a job's prompt will be matched
/// against, per spec §4.4:
///
/// 1. Lowercase with case-folding.
/// 2. Split on whitespace and punctuation.
/// 3. Drop stop words.
/// 4. Drop tokens shorter than 2 characters.
/// 5. Deduplicate while preserving first-seen order.
pub fn extract_keywords(prompt: &str) -> Vec<String> {
    let stop_words = stop_word_set();
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for token in prompt.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        if token.chars().count() < MIN_KEYWORD_LEN {
            continue;
        }
        if stop_words.contains(token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            keywords.push(token.to_string());
        }
    }

    keywords
}

/// Compile a case-insensitive, word-boundary-anchored disjunction of the
/// given keywords. `None` if `keywords` is empty — the "never matches"
/// regex of spec §4.4, represented as the absence of a pattern rather than
/// an unsatisfiable one (the `regex` crate has no negative lookaround to
/// express that directly).
pub fn compile_match_regex(keywords: &[String]) -> Option<Regex> {
    if keywords.is_empty() {
        return None;
    }

    let alternatives = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");

    let pattern = format!(r"(?i)\b(?:{alternatives})\b");
    Regex::new(&pattern).ok()
}
