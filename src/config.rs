//! Service credentials and endpoints, injected from the environment.

use crate::error::{PipelineError, Result};

pub const DEFAULT_SYNC_BASE: &str = "https://api.sync.so";
pub const DEFAULT_CARTESIA_BASE: &str = "https://api.cartesia.ai";
pub const DEFAULT_GROQ_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_VISION_BASE: &str = "http://localhost:8001";

/// API keys and base URLs for every remote collaborator.
///
/// Keys are optional here; a missing one only becomes an error when the
/// client that needs it is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub sync_api_key: Option<String>,
    pub cartesia_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub sync_base: String,
    pub cartesia_base: String,
    pub groq_base: String,
    pub vision_base: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sync_api_key: None,
            cartesia_api_key: None,
            groq_api_key: None,
            sync_base: DEFAULT_SYNC_BASE.to_string(),
            cartesia_base: DEFAULT_CARTESIA_BASE.to_string(),
            groq_base: DEFAULT_GROQ_BASE.to_string(),
            vision_base: DEFAULT_VISION_BASE.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            sync_api_key: get("SYNC_API_KEY"),
            cartesia_api_key: get("CARTESIA_API_KEY"),
            groq_api_key: get("GROQ_API_KEY"),
            sync_base: get("SYNC_API_BASE").unwrap_or(defaults.sync_base),
            cartesia_base: get("CARTESIA_API_BASE").unwrap_or(defaults.cartesia_base),
            groq_base: get("GROQ_API_BASE").unwrap_or(defaults.groq_base),
            vision_base: get("VISION_API_BASE").unwrap_or(defaults.vision_base),
        }
    }

    pub fn sync_key(&self) -> Result<&str> {
        require(&self.sync_api_key, "SYNC_API_KEY")
    }

    pub fn cartesia_key(&self) -> Result<&str> {
        require(&self.cartesia_api_key, "CARTESIA_API_KEY")
    }

    pub fn groq_key(&self) -> Result<&str> {
        require(&self.groq_api_key, "GROQ_API_KEY")
    }
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| PipelineError::MissingConfig(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ServiceConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ServiceConfig::default());
        assert!(matches!(
            config.sync_key(),
            Err(PipelineError::MissingConfig(name)) if name == "SYNC_API_KEY"
        ));
    }

    #[test]
    fn keys_and_overrides_are_read() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("SYNC_API_KEY", " sk-123 "),
            ("CARTESIA_API_KEY", ""),
            ("GROQ_API_BASE", "http://127.0.0.1:9999/v1"),
        ]));
        assert_eq!(config.sync_key().unwrap(), "sk-123");
        assert!(config.cartesia_key().is_err());
        assert_eq!(config.groq_base, "http://127.0.0.1:9999/v1");
        assert_eq!(config.sync_base, DEFAULT_SYNC_BASE);
    }
}
