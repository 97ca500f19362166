//! Glob filter over child key names.

use glob::{MatchOptions, Pattern};

/// `\` has no special meaning in key names. Case is folded before matching.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Glob filter applied to child key names (`*`, `?` and `[...]` classes).
///
/// Matching ignores case for every script, not only ASCII. A run of `*`
/// behaves like a single `*`. A malformed pattern never fails: it matches
/// nothing, and the reason is kept so the caller can report it.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    /// Pattern as the caller wrote it.
    pattern: String,
    /// Compiled lowercase pattern, or why compiling failed.
    compiled: Result<Pattern, String>,
}

impl KeyFilter {
    /// Compile `pattern`; see [`KeyFilter::error`] for malformed input.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let folded = collapse_stars(&pattern.to_lowercase());
        Self {
            pattern: pattern.to_owned(),
            compiled: Pattern::new(&folded).map_err(|error| error.msg.to_owned()),
        }
    }

    /// Filter that accepts every name.
    #[must_use]
    pub fn any() -> Self {
        Self::new("*")
    }

    /// Pattern as given to [`KeyFilter::new`].
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Why the pattern could not be compiled, if it could not.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.compiled.as_ref().err().map(String::as_str)
    }

    /// Whether `name` is included. Always false for a malformed pattern.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.compiled
            .as_ref()
            .is_ok_and(|pattern| pattern.matches_with(&name.to_lowercase(), MATCH_OPTIONS))
    }
}

impl Default for KeyFilter {
    fn default() -> Self {
        Self::any()
    }
}

/// Decide whether a key name is included by a glob pattern.
#[must_use]
pub fn matches(name: &str, pattern: &str) -> bool {
    KeyFilter::new(pattern).matches(name)
}

/// Merge every run of `*` into one, so `App**` means `App*`.
fn collapse_stars(pattern: &str) -> String {
    let mut collapsed = String::with_capacity(pattern.len());
    let mut previous = None;
    for ch in pattern.chars() {
        if ch != '*' || previous != Some('*') {
            collapsed.push(ch);
        }
        previous = Some(ch);
    }
    collapsed
}
