use crate::core::config::data::Config;
use crate::core::config::io::ConfigError;
use crate::core::mention::MentionPattern;
use crate::core::mode::ChatMode;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const BASE_URL_ENV: &str = "TROUPE_API_URL";

/// Keys accepted by `troupe set` / `troupe unset`.
pub const CONFIG_KEYS: [&str; 7] = [
    "base-url",
    "default-mode",
    "mention-pattern",
    "turn-timeout",
    "gate",
    "session-file",
    "export-dir",
];

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// `TROUPE_API_URL`, then the config file, then the local default.
    pub fn resolved_base_url(&self) -> String {
        self.base_url_with_env(std::env::var(BASE_URL_ENV).ok())
    }

    pub(crate) fn base_url_with_env(&self, env_value: Option<String>) -> String {
        non_empty(env_value)
            .or_else(|| non_empty(self.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn default_mode(&self) -> Result<ChatMode, ConfigError> {
        match self.default_mode.as_deref() {
            Some(mode) => ChatMode::try_from(mode).map_err(|message| invalid("default-mode", message)),
            None => Ok(ChatMode::default()),
        }
    }

    pub fn mention(&self) -> Result<MentionPattern, ConfigError> {
        match self.mention_pattern.as_deref() {
            Some(pattern) => MentionPattern::new(pattern)
                .map_err(|err| invalid("mention-pattern", err.to_string())),
            None => Ok(MentionPattern::default()),
        }
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Gate chain for `mode`. Keys match mode names case-insensitively.
    pub fn gate_for(&self, mode: ChatMode) -> Vec<String> {
        self.gates
            .iter()
            .find(|(key, _)| ChatMode::try_from(key.as_str()) == Ok(mode))
            .map(|(_, chain)| chain.clone())
            .unwrap_or_default()
    }

    /// Reject values that parse as TOML but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_mode()?;
        self.mention()?;
        for key in self.gates.keys() {
            ChatMode::try_from(key.as_str()).map_err(|message| invalid("gate", message))?;
        }
        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: &[String]) -> Result<(), ConfigError> {
        let joined = value.join(" ");
        if joined.trim().is_empty() {
            return Err(invalid(key, "a value is required"));
        }

        match key {
            "base-url" => self.base_url = Some(joined.trim().to_string()),
            "default-mode" => {
                let mode = ChatMode::try_from(joined.as_str())
                    .map_err(|message| invalid(key, message))?;
                self.default_mode = Some(mode.to_string());
            }
            "mention-pattern" => {
                MentionPattern::new(&joined).map_err(|err| invalid(key, err.to_string()))?;
                self.mention_pattern = Some(joined);
            }
            "turn-timeout" => {
                let secs = joined
                    .trim()
                    .parse::<u64>()
                    .map_err(|err| invalid(key, err.to_string()))?;
                self.turn_timeout_secs = Some(secs);
            }
            "gate" => {
                let (mode, chain) = value
                    .split_first()
                    .ok_or_else(|| invalid(key, "expected a mode followed by agent names"))?;
                let mode = ChatMode::try_from(mode.as_str()).map_err(|message| invalid(key, message))?;
                self.gates.retain(|existing, _| ChatMode::try_from(existing.as_str()) != Ok(mode));
                if !chain.is_empty() {
                    self.gates.insert(mode.to_string(), chain.to_vec());
                }
            }
            "session-file" => self.session_file = Some(PathBuf::from(joined.trim())),
            "export-dir" => self.export_dir = Some(PathBuf::from(joined.trim())),
            _ => return Err(invalid(key, "unknown config key")),
        }
        Ok(())
    }

    /// Clear a key. For `gate`, `mode` selects which chain to drop.
    pub fn unset_value(&mut self, key: &str, mode: Option<&str>) -> Result<(), ConfigError> {
        match key {
            "base-url" => self.base_url = None,
            "default-mode" => self.default_mode = None,
            "mention-pattern" => self.mention_pattern = None,
            "turn-timeout" => self.turn_timeout_secs = None,
            "gate" => match mode {
                Some(mode) => {
                    let mode = ChatMode::try_from(mode).map_err(|message| invalid(key, message))?;
                    self.gates
                        .retain(|existing, _| ChatMode::try_from(existing.as_str()) != Ok(mode));
                }
                None => self.gates.clear(),
            },
            "session-file" => self.session_file = None,
            "export-dir" => self.export_dir = None,
            _ => return Err(invalid(key, "unknown config key")),
        }
        Ok(())
    }
}
