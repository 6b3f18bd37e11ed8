use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

use crate::stopwords::DEFAULT_STOPWORDS;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

// Internal apostrophes (ASCII and typographic) stay inside the token.
static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\w+(?:['’]\w+)*\b").expect("word pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    pub min_length: usize,
    pub max_length: usize,
    exclusions: HashSet<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::new(3, 20).with_default_stopwords()
    }
}

impl FilterConfig {
    pub fn new(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length,
            exclusions: HashSet::new(),
        }
    }

    pub fn with_default_stopwords(mut self) -> Self {
        self.exclusions
            .extend(DEFAULT_STOPWORDS.iter().map(|w| (*w).to_string()));
        self
    }

    pub fn with_exclusions<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            let word = word.as_ref().trim();
            if !word.is_empty() {
                self.exclusions.insert(word.to_lowercase());
            }
        }
        self
    }

    pub fn is_excluded(&self, token: &str) -> bool {
        self.exclusions.contains(&token.to_lowercase())
    }

    fn accepts_length(&self, len: usize) -> bool {
        self.min_length <= len && len <= self.max_length
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub total: usize,
    pub kept: usize,
    pub numeric: usize,
    pub out_of_range: usize,
    pub excluded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub text: String,
    pub stats: FilterStats,
}

impl FilterOutcome {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Splits a newline-separated block of user words into exclusion entries.
pub fn parse_exclusion_list(block: &str) -> Vec<String> {
    block
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    WORD.find_iter(&normalized)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn is_numeric_token(token: &str) -> bool {
    token.chars().all(char::is_numeric)
}

pub fn filter_text(text: &str, config: &FilterConfig) -> FilterOutcome {
    let mut stats = FilterStats::default();
    let mut kept: Vec<String> = Vec::new();

    for token in tokenize(text) {
        stats.total += 1;
        if is_numeric_token(&token) {
            stats.numeric += 1;
            continue;
        }
        if !config.accepts_length(token.chars().count()) {
            stats.out_of_range += 1;
            continue;
        }
        if config.exclusions.contains(&token) {
            stats.excluded += 1;
            continue;
        }
        kept.push(token);
    }

    stats.kept = kept.len();
    FilterOutcome {
        text: kept.join(" "),
        stats,
    }
}

pub fn filter_words(text: &str, config: &FilterConfig) -> String {
    filter_text(text, config).text
}

pub fn approx_word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
