//! `@agent` mentions used to route feedback to a specific team member.

use regex::Regex;

pub const DEFAULT_MENTION_PATTERN: &str = r"@(TestCase_\w+)";
pub const AGENT_PREFIX: &str = "TestCase_";

/// Extracts the target agent from a feedback message.
#[derive(Debug, Clone)]
pub struct MentionPattern {
    regex: Regex,
}

impl MentionPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// First mention in `text`, without the `@`. Uses the first capture group
    /// when the pattern has one, else the whole match.
    pub fn extract(&self, text: &str) -> Option<String> {
        let captures = self.regex.captures(text)?;
        let matched = captures.get(1).or_else(|| captures.get(0))?.as_str();
        Some(matched.trim_start_matches('@').to_string())
    }
}

impl Default for MentionPattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_MENTION_PATTERN).expect("valid mention regex"),
        }
    }
}

/// Agent name without the team prefix, for compact display.
pub fn short_agent_name(agent_name: &str) -> &str {
    agent_name.strip_prefix(AGENT_PREFIX).unwrap_or(agent_name)
}
