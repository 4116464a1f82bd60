// Copyright 2026 The BluePass Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Message filtering.
//!
//! Patterns are always matched against the whole input, never searched for
//! inside it. The content pattern doubles as the extraction rule: its first
//! capture group is the code to relay.

mod matcher;

pub use matcher::{FilterRule, MatchResult};

use regex::Regex;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// A pattern that compiled successfully, anchored at both ends.
#[derive(Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    /// The pattern text as the user wrote it.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of capture groups, not counting the implicit whole-match group.
    pub fn group_count(&self) -> usize {
        self.regex.captures_len().saturating_sub(1)
    }

    /// Whether `text` matches the pattern in its entirety.
    pub fn is_full_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub(crate) fn regex(&self) -> &Regex {
        &self.regex
    }
}

impl fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledPattern").field(&self.source).finish()
    }
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CompiledPattern {}

/// Compile a pattern with whole-string match semantics.
///
/// Returns `None` for invalid syntax; the failure is logged, never raised.
pub fn compile(pattern: &str) -> Option<CompiledPattern> {
    match anchored(pattern) {
        Ok(regex) => Some(CompiledPattern {
            source: pattern.to_string(),
            regex,
        }),
        Err(e) => {
            warn!("Failed to compile pattern '{}': {:#}", pattern, e);
            None
        }
    }
}

/// Build a regex that only matches whole strings.
///
/// The pattern is parsed and printed back before it is wrapped, so
/// extended-mode comments and whitespace are already resolved and cannot
/// swallow the anchors. The wrapper is non-capturing, which keeps group
/// numbering identical to the user's pattern.
fn anchored(pattern: &str) -> anyhow::Result<Regex> {
    let hir = regex_syntax::Parser::new().parse(pattern)?;
    Ok(Regex::new(&format!("^(?:{hir})$"))?)
}

/// Compile optional pattern text, treating absent text as an unset pattern.
pub fn compile_optional(pattern: Option<&str>) -> Option<CompiledPattern> {
    pattern.and_then(compile)
}

/// Why no code could be extracted from a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The pattern is unset or failed to compile.
    #[error("invalid pattern")]
    InvalidPattern,
    /// The pattern does not match the whole text.
    #[error("no match")]
    NoMatch,
    /// The pattern matched but has no capture group, or group 1 did not participate.
    #[error("no groups")]
    NoGroups,
}

/// Extract the code captured by group 1 of `pattern` from `text`.
///
/// The three failure modes stay distinct so a settings surface can tell
/// the user what to fix.
pub fn extract_code(pattern: Option<&CompiledPattern>, text: &str) -> Result<String, ExtractError> {
    let pattern = pattern.ok_or(ExtractError::InvalidPattern)?;
    let captures = pattern
        .regex()
        .captures(text)
        .ok_or(ExtractError::NoMatch)?;

    if pattern.group_count() == 0 {
        return Err(ExtractError::NoGroups);
    }

    captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .ok_or(ExtractError::NoGroups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_invalid_pattern() {
        assert!(compile("[unterminated").is_none());
        assert!(compile("(open").is_none());
    }

    #[test]
    fn test_compile_keeps_source_text() {
        let pattern = compile(r"^CODE:(\d{4})$").unwrap();
        assert_eq!(pattern.as_str(), r"^CODE:(\d{4})$");
        assert_eq!(pattern.group_count(), 1);
    }

    #[test]
    fn test_full_match_not_search() {
        let pattern = compile(r"\d{6}").unwrap();
        assert!(pattern.is_full_match("123456"));
        assert!(!pattern.is_full_match("code 123456"));
        assert!(!pattern.is_full_match("1234567"));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        // Without the wrapper group "a|b" would become "^a|b$".
        let pattern = compile("a|b").unwrap();
        assert!(pattern.is_full_match("a"));
        assert!(pattern.is_full_match("b"));
        assert!(!pattern.is_full_match("ax"));
        assert!(!pattern.is_full_match("xb"));
    }

    #[test]
    fn test_extended_mode_comment_does_not_eat_anchors() {
        let pattern = compile(r"(?x) CODE: (\d{4})  # the code").unwrap();
        assert_eq!(pattern.group_count(), 1);
        assert!(!pattern.is_full_match("CODE:98210"));
        assert_eq!(extract_code(Some(&pattern), "CODE:9821"), Ok("9821".to_string()));
    }

    #[test]
    fn test_group_numbering_survives_rewrite() {
        let pattern = compile(r"(?:from )?(?P<who>\w+): (\d+)").unwrap();
        assert_eq!(pattern.group_count(), 2);
        assert_eq!(extract_code(Some(&pattern), "from bank: 4711"), Ok("bank".to_string()));
    }

    #[test]
    fn test_extract_code() {
        let pattern = compile(r"^(\d{6})$");
        assert_eq!(extract_code(pattern.as_ref(), "123456"), Ok("123456".to_string()));
        assert_eq!(
            extract_code(pattern.as_ref(), "1234567"),
            Err(ExtractError::NoMatch)
        );
    }

    #[test]
    fn test_extract_distinct_failures() {
        assert_eq!(
            extract_code(compile("[bad").as_ref(), "anything"),
            Err(ExtractError::InvalidPattern)
        );
        assert_eq!(
            extract_code(compile(r"\d+").as_ref(), "1234"),
            Err(ExtractError::NoGroups)
        );
        assert_eq!(
            extract_code(compile(r"(\d+)?x").as_ref(), "x"),
            Err(ExtractError::NoGroups)
        );
        assert_eq!(
            extract_code(compile(r"(\d+)").as_ref(), "abc"),
            Err(ExtractError::NoMatch)
        );
    }

    #[test]
    fn test_extract_empty_group() {
        let pattern = compile(r"code:(\d*)");
        assert_eq!(extract_code(pattern.as_ref(), "code:"), Ok(String::new()));
    }

    #[test]
    fn test_extract_error_messages() {
        assert_eq!(ExtractError::InvalidPattern.to_string(), "invalid pattern");
        assert_eq!(ExtractError::NoMatch.to_string(), "no match");
        assert_eq!(ExtractError::NoGroups.to_string(), "no groups");
    }
}
