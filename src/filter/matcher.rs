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

//! Sender/content rule matching for inbound messages.

use tracing::debug;

use super::{compile_optional, extract_code, CompiledPattern, ExtractError};

/// Result of checking one inbound message against a [`FilterRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// Either pattern is unset; the rule is inactive.
    NoRule,
    /// The sender does not match the sender pattern.
    SenderMismatch,
    /// The body does not match the content pattern.
    ContentNoMatch,
    /// The body matches but group 1 is missing or did not participate.
    ContentNoGroup,
    /// A code was extracted from group 1.
    Matched(String),
}

impl MatchResult {
    /// The extracted code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Matched(code) => Some(code),
            _ => None,
        }
    }

    /// Short description used in logs and by `bluepass check`.
    pub fn describe(&self) -> String {
        match self {
            Self::NoRule => "no rule: sender or content pattern not set".to_string(),
            Self::SenderMismatch => "sender does not match".to_string(),
            Self::ContentNoMatch => "content does not match".to_string(),
            Self::ContentNoGroup => "content matches but has no code group".to_string(),
            Self::Matched(code) => format!("matched: {code}"),
        }
    }
}

/// Compiled sender and content patterns.
///
/// Immutable once built; rebuild it when the configured pattern text changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRule {
    sender: Option<CompiledPattern>,
    content: Option<CompiledPattern>,
}

impl FilterRule {
    /// Build a rule from already compiled patterns.
    pub fn new(sender: Option<CompiledPattern>, content: Option<CompiledPattern>) -> Self {
        Self { sender, content }
    }

    /// Build a rule from pattern text. Text that fails to compile leaves
    /// that side unset.
    pub fn from_patterns(sender: Option<&str>, content: Option<&str>) -> Self {
        Self::new(compile_optional(sender), compile_optional(content))
    }

    pub fn sender_pattern(&self) -> Option<&CompiledPattern> {
        self.sender.as_ref()
    }

    pub fn content_pattern(&self) -> Option<&CompiledPattern> {
        self.content.as_ref()
    }

    /// Whether both sides are set.
    pub fn is_active(&self) -> bool {
        self.sender.is_some() && self.content.is_some()
    }

    /// Check a message and extract its code.
    pub fn check(&self, sender: &str, body: &str) -> MatchResult {
        let (Some(sender_pattern), Some(content_pattern)) = (&self.sender, &self.content) else {
            debug!("Filters are not set up");
            return MatchResult::NoRule;
        };

        if !sender_pattern.is_full_match(sender) {
            debug!(
                "Sender '{}' doesn't match pattern '{}'",
                sender, sender_pattern
            );
            return MatchResult::SenderMismatch;
        }

        match extract_code(Some(content_pattern), body) {
            Ok(code) => MatchResult::Matched(code),
            Err(ExtractError::NoMatch) => {
                debug!("Content doesn't match pattern '{}'", content_pattern);
                MatchResult::ContentNoMatch
            }
            Err(ExtractError::NoGroups) => {
                debug!("Couldn't extract a code from the message");
                MatchResult::ContentNoGroup
            }
            // The pattern is present and compiled, so this cannot come back.
            Err(ExtractError::InvalidPattern) => MatchResult::NoRule,
        }
    }
}
