//! Glob patterns for `SCAN ... MATCH`.
//!
//! Patterns follow the usual store conventions: `*` matches any run of
//! characters (including the key delimiter), `?` matches one character,
//! `[...]` matches a class, and `\` escapes the next character.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{StorageError, StorageResult};

/// Compile a match pattern.
///
/// # Errors
///
/// Returns [`StorageError::InvalidPattern`] if the glob is malformed.
pub fn compile(pattern: &str) -> StorageResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| StorageError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Escape glob metacharacters so `literal` only matches itself.
#[must_use]
pub fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_spans_delimiters() {
        let m = compile("user:*:object").unwrap();
        assert!(m.is_match("user:part1:part2:object"));
        assert!(!m.is_match("user:part1:instances"));
    }

    #[test]
    fn test_escape_makes_metacharacters_literal() {
        let m = compile(&format!("{}:*", escape("odd*type"))).unwrap();
        assert!(m.is_match("odd*type:1"));
        assert!(!m.is_match("oddXtype:1"));
    }

    #[test]
    fn test_malformed_pattern_rejected() {
        assert!(compile("user:[").is_err());
    }
}
