use anyhow::{Context, Result};
use std::path::PathBuf;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_DB_PATH: &str = "lina.db";
const DEFAULT_COMPLETION_URL: &str = "http://localhost:11434/v1";
const DEFAULT_MODEL: &str = "llama3.1";
const DEFAULT_SESSION_TTL_SECS: i64 = 3600;
const DEFAULT_HISTORY_LIMIT: u32 = 20;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Lina, a warm and thoughtful companion. \
Keep replies short, kind and conversational. Ask gentle follow-up questions.";

/// Engine settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind: String,
    pub db_path: PathBuf,
    pub completion_url: String,
    pub completion_api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub session_ttl_secs: i64,
    pub history_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            completion_url: DEFAULT_COMPLETION_URL.to_string(),
            completion_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(bind) = lookup("LINA_BIND") {
            config.bind = bind;
        }
        if let Some(path) = lookup("LINA_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("LINA_COMPLETION_URL") {
            config.completion_url = url.trim_end_matches('/').to_string();
        }
        config.completion_api_key = lookup("LINA_COMPLETION_API_KEY").filter(|k| !k.is_empty());
        if let Some(model) = lookup("LINA_MODEL") {
            config.model = model;
        }
        if let Some(prompt) = lookup("LINA_SYSTEM_PROMPT") {
            config.system_prompt = prompt;
        }
        if let Some(ttl) = lookup("LINA_SESSION_TTL_SECS") {
            config.session_ttl_secs = ttl
                .parse()
                .with_context(|| format!("LINA_SESSION_TTL_SECS is not a number: {}", ttl))?;
        }
        if let Some(limit) = lookup("LINA_HISTORY_LIMIT") {
            config.history_limit = limit
                .parse()
                .with_context(|| format!("LINA_HISTORY_LIMIT is not a number: {}", limit))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.session_ttl_secs, 3600);
        assert!(config.completion_api_key.is_none());
    }

    #[test]
    fn test_overrides_and_trims_url() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("LINA_COMPLETION_URL", "https://api.example.com/v1/"),
            ("LINA_COMPLETION_API_KEY", "sk-test"),
            ("LINA_HISTORY_LIMIT", "8"),
        ]))
        .unwrap();
        assert_eq!(config.completion_url, "https://api.example.com/v1");
        assert_eq!(config.completion_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.history_limit, 8);
    }

    #[test]
    fn test_rejects_bad_number() {
        let result = EngineConfig::from_lookup(lookup_from(&[("LINA_SESSION_TTL_SECS", "soon")]));
        assert!(result.is_err());
    }
}
