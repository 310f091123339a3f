//! Text matching helpers for `Contains` clauses and free-text queries.

use std::borrow::Cow;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Comparison options for substring matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatchOptions {
    /// Ignore letter case.
    pub case_insensitive: bool,
    /// Ignore accents and other combining marks.
    pub diacritic_insensitive: bool,
}

impl MatchOptions {
    /// Exact comparison.
    #[must_use]
    pub const fn exact() -> Self {
        Self {
            case_insensitive: false,
            diacritic_insensitive: false,
        }
    }

    /// Case- and accent-insensitive comparison, as used by free-text search.
    #[must_use]
    pub const fn folded() -> Self {
        Self {
            case_insensitive: true,
            diacritic_insensitive: true,
        }
    }
}

/// Normalizes `text` according to `options`.
pub(crate) fn fold(text: &str, options: MatchOptions) -> Cow<'_, str> {
    let mut folded = Cow::Borrowed(text);
    if options.diacritic_insensitive {
        folded = Cow::Owned(folded.nfd().filter(|c| !is_combining_mark(*c)).collect());
    }
    if options.case_insensitive {
        folded = Cow::Owned(folded.to_lowercase());
    }
    folded
}

/// Substring test under `options`.
pub(crate) fn contains(haystack: &str, needle: &str, options: MatchOptions) -> bool {
    fold(haystack, options).contains(fold(needle, options).as_ref())
}

/// Splits a free-text query into search tokens.
///
/// Surrounding whitespace is trimmed and the rest is split on single
/// spaces. Runs of spaces would yield empty tokens; those are dropped since
/// they match every field.
pub fn tokenize(query: &str) -> Vec<&str> {
    query
        .trim()
        .split(' ')
        .filter(|token| !token.is_empty())
        .collect()
}
