use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ExtractError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// A setting that may be spelled several ways across releases. Newest key first.
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey {
    pub current: &'static str,
    pub deprecated: &'static [&'static str],
}

pub const BASE_URL_KEY: ConfigKey = ConfigKey {
    current: "OPENAI_BASE_URL",
    deprecated: &["OPENAI_API_BASE"],
};
pub const API_KEY_KEY: ConfigKey = ConfigKey { current: "OPENAI_API_KEY", deprecated: &[] };
pub const MODEL_KEY: ConfigKey = ConfigKey { current: "OPENAI_MODEL", deprecated: &[] };
pub const TIMEOUT_KEY: ConfigKey = ConfigKey { current: "POLICY_BACKEND_TIMEOUT_SECS", deprecated: &[] };

impl ConfigKey {
    /// First non-empty value in precedence order. Any deprecated key that is set gets one warning.
    pub fn resolve<F>(&self, lookup: &F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolved = lookup(self.current).filter(|v| !v.trim().is_empty());
        for old in self.deprecated {
            let Some(value) = lookup(*old).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            if resolved.is_none() {
                warn!(
                    key = *old,
                    replacement = self.current,
                    "Environment variable is deprecated; please use the replacement"
                );
                resolved = Some(value);
            } else {
                warn!(
                    key = *old,
                    replacement = self.current,
                    "Deprecated environment variable is ignored because a newer key is set"
                );
            }
        }
        resolved
    }
}

/// Fixed for the whole process, not chosen per call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 8192,
            top_p: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub sampling: SamplingParams,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            sampling: SamplingParams::default(),
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = BASE_URL_KEY
            .resolve(&lookup)
            .unwrap_or(defaults.base_url)
            .trim_end_matches('/')
            .to_string();

        let timeout_secs = match TIMEOUT_KEY.resolve(&lookup) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                ExtractError::Config(format!("{} must be a whole number of seconds: {e}", TIMEOUT_KEY.current))
            })?,
            None => defaults.timeout_secs,
        };

        Ok(Self {
            base_url,
            api_key: API_KEY_KEY.resolve(&lookup),
            model: MODEL_KEY.resolve(&lookup).unwrap_or(defaults.model),
            timeout_secs,
            sampling: defaults.sampling,
        })
    }
}
