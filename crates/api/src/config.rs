use anyhow::{Context, Result};
use policy_extract::config::ConfigKey;
use policy_extract::sink::DEFAULT_RESULT_LOG;
use policy_extract::{BackendConfig, StrategyKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub extraction: ExtractionConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Accept `application/pdf` uploads.
    pub allow_pdf: bool,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub strategy: StrategyKind,
    pub prompt_path: PathBuf,
    pub few_shot_prompt_path: PathBuf,
    pub result_log_path: PathBuf,
    /// Overall deadline for one extraction, retries included.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:8000".to_string(),
                allow_pdf: false,
                max_upload_bytes: 20 * 1024 * 1024,
            },
            backend: BackendConfig::default(),
            extraction: ExtractionConfig {
                strategy: StrategyKind::Schema,
                prompt_path: PathBuf::from("data/instructions/privacy_policy_extraction_prompt.md"),
                few_shot_prompt_path: PathBuf::from("data/instructions/few_shot_prompt.md"),
                result_log_path: PathBuf::from(DEFAULT_RESULT_LOG),
                request_timeout_secs: 300,
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
        }
    }
}

const BIND_ADDR: ConfigKey = ConfigKey { current: "POLICY_BIND_ADDR", deprecated: &[] };
const ALLOW_PDF: ConfigKey = ConfigKey { current: "POLICY_ALLOW_PDF", deprecated: &[] };
const MAX_UPLOAD_BYTES: ConfigKey = ConfigKey { current: "POLICY_MAX_UPLOAD_BYTES", deprecated: &[] };
const STRATEGY: ConfigKey = ConfigKey { current: "POLICY_STRATEGY", deprecated: &[] };
const PROMPT_PATH: ConfigKey = ConfigKey { current: "POLICY_PROMPT_PATH", deprecated: &[] };
const FEW_SHOT_PROMPT_PATH: ConfigKey = ConfigKey { current: "POLICY_FEW_SHOT_PROMPT_PATH", deprecated: &[] };
const RESULT_LOG: ConfigKey = ConfigKey { current: "POLICY_RESULT_LOG", deprecated: &[] };
const REQUEST_TIMEOUT: ConfigKey = ConfigKey { current: "POLICY_REQUEST_TIMEOUT_SECS", deprecated: &[] };
const MAX_RETRIES: ConfigKey = ConfigKey { current: "POLICY_MAX_RETRIES", deprecated: &[] };
const INITIAL_BACKOFF: ConfigKey = ConfigKey { current: "POLICY_INITIAL_BACKOFF_MS", deprecated: &[] };
const MAX_BACKOFF: ConfigKey = ConfigKey { current: "POLICY_MAX_BACKOFF_MS", deprecated: &[] };

impl AppConfig {
    /// Read the process environment once at startup.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let backend = BackendConfig::from_lookup(&lookup)?;

        Ok(Self {
            server: ServerConfig {
                bind_addr: BIND_ADDR.resolve(&lookup).unwrap_or(defaults.server.bind_addr),
                allow_pdf: parse_bool(&lookup, ALLOW_PDF, defaults.server.allow_pdf)?,
                max_upload_bytes: parse_or(&lookup, MAX_UPLOAD_BYTES, defaults.server.max_upload_bytes)?,
            },
            backend,
            extraction: ExtractionConfig {
                strategy: parse_or(&lookup, STRATEGY, defaults.extraction.strategy)?,
                prompt_path: path_or(&lookup, PROMPT_PATH, defaults.extraction.prompt_path),
                few_shot_prompt_path: path_or(&lookup, FEW_SHOT_PROMPT_PATH, defaults.extraction.few_shot_prompt_path),
                result_log_path: path_or(&lookup, RESULT_LOG, defaults.extraction.result_log_path),
                request_timeout_secs: parse_or(&lookup, REQUEST_TIMEOUT, defaults.extraction.request_timeout_secs)?,
            },
            retry: RetryConfig {
                max_retries: parse_or(&lookup, MAX_RETRIES, defaults.retry.max_retries)?,
                initial_backoff_ms: parse_or(&lookup, INITIAL_BACKOFF, defaults.retry.initial_backoff_ms)?,
                max_backoff_ms: parse_or(&lookup, MAX_BACKOFF, defaults.retry.max_backoff_ms)?,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: ConfigKey, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match key.resolve(lookup) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {}: {:?}", key.current, raw)),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: ConfigKey, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match key.resolve(lookup).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => anyhow::bail!("invalid value for {}: {:?}", key.current, v),
        None => Ok(default),
    }
}

fn path_or<F>(lookup: &F, key: ConfigKey, default: PathBuf) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    key.resolve(lookup).map(PathBuf::from).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
        assert!(!config.server.allow_pdf);
        assert_eq!(config.extraction.strategy, StrategyKind::Schema);
        assert_eq!(config.extraction.result_log_path, PathBuf::from("output/llm_extracted_results.jsonl"));
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("POLICY_STRATEGY", "few_shot"),
            ("POLICY_ALLOW_PDF", "TRUE"),
            ("POLICY_RESULT_LOG", "/var/log/policy.jsonl"),
            ("POLICY_MAX_RETRIES", "0"),
            ("OPENAI_MODEL", "qwen2.5-72b-instruct"),
        ])
        .unwrap();

        assert_eq!(config.extraction.strategy, StrategyKind::FewShot);
        assert!(config.server.allow_pdf);
        assert_eq!(config.extraction.result_log_path, PathBuf::from("/var/log/policy.jsonl"));
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.backend.model, "qwen2.5-72b-instruct");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config_from(&[("POLICY_STRATEGY", "regex")]).is_err());
        assert!(config_from(&[("POLICY_ALLOW_PDF", "maybe")]).is_err());
        assert!(config_from(&[("POLICY_MAX_RETRIES", "-1")]).is_err());
    }
}
