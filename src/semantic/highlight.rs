//! Keyword highlighting layered on top of semantic results.

use regex::RegexBuilder;
use serde::Serialize;

/// Minimum token length (in characters) worth highlighting
const MIN_TOKEN_CHARS: usize = 2;

/// A run of text, marked when it matched a query token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    pub matched: bool,
}

impl Segment {
    fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            matched: false,
        }
    }
}

/// Split a query into whitespace-separated tokens of at least two characters.
pub fn query_tokens(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// Split `text` into segments, marking case-insensitive occurrences of any
/// token.
pub fn highlight(text: &str, tokens: &[String]) -> Vec<Segment> {
    if text.is_empty() {
        return Vec::new();
    }
    if tokens.is_empty() {
        return vec![Segment::plain(text)];
    }

    let pattern = tokens
        .iter()
        .map(|token| regex::escape(token))
        .collect::<Vec<_>>()
        .join("|");

    let matcher = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(matcher) => matcher,
        Err(e) => {
            log::debug!("highlight pattern rejected: {e}");
            return vec![Segment::plain(text)];
        }
    };

    let mut segments = Vec::new();
    let mut cursor = 0;
    for found in matcher.find_iter(text) {
        if found.start() > cursor {
            segments.push(Segment::plain(&text[cursor..found.start()]));
        }
        segments.push(Segment {
            text: found.as_str().to_string(),
            matched: true,
        });
        cursor = found.end();
    }
    if cursor < text.len() {
        segments.push(Segment::plain(&text[cursor..]));
    }

    segments
}

/// Render segments as a single string, wrapping matches in `open`/`close`.
pub fn render(segments: &[Segment], open: &str, close: &str) -> String {
    segments
        .iter()
        .map(|segment| {
            if segment.matched {
                format!("{open}{}{close}", segment.text)
            } else {
                segment.text.clone()
            }
        })
        .collect()
}
