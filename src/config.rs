use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::client::RemoteApiConfig;
use crate::error::{AssistantError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            organization: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_model_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeGraphConfig {
    #[serde(default = "default_kg_base_url")]
    pub base_url: String,
    #[serde(default = "default_kg_timeout")]
    pub timeout_secs: u64,
    /// OpenAPI document the tool menu is built from. Empty selects the
    /// built-in catalog.
    #[serde(default = "default_kg_spec_url")]
    pub spec_url: String,
    /// `operationId`s from the document the model may call.
    #[serde(default = "default_kg_operations")]
    pub operations: Vec<String>,
}

impl Default for KnowledgeGraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_kg_base_url(),
            timeout_secs: default_kg_timeout(),
            spec_url: default_kg_spec_url(),
            operations: default_kg_operations(),
        }
    }
}

impl KnowledgeGraphConfig {
    pub fn remote_api(&self) -> RemoteApiConfig {
        RemoteApiConfig::default()
            .with_base_url(self.base_url.clone())
            .with_timeout_secs(self.timeout_secs)
    }

    pub fn uses_openapi(&self) -> bool {
        !self.spec_url.trim().is_empty()
    }
}

fn default_kg_base_url() -> String {
    "https://neo4j-fastapi.vercel.app".into()
}

fn default_kg_timeout() -> u64 {
    30
}

fn default_kg_spec_url() -> String {
    "https://neo4j-fastapi.vercel.app/openapi.json".into()
}

fn default_kg_operations() -> Vec<String> {
    vec!["get_gene".into(), "get_protein".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_steps() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub knowledge_graph: KnowledgeGraphConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| AssistantError::Config(format!("Failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    /// Load `path` if it exists, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file_or_default(path)?;
        cfg.apply_overrides(|name| env::var(name).ok())?;
        Ok(cfg)
    }

    pub fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `EVOKG_*` style overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("EVOKG_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var::<u16, _>(&lookup, "EVOKG_PORT")? {
            self.server.port = port;
        }
        if let Some(model) = lookup("EVOKG_MODEL") {
            self.model.model = model;
        }
        if let Some(url) = lookup("EVOKG_MODEL_BASE_URL") {
            self.model.base_url = Some(url);
        }
        // The conventional variable first, the prefixed one wins.
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(key) = lookup("EVOKG_OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(org) = lookup("EVOKG_OPENAI_ORG") {
            self.model.organization = Some(org);
        }
        if let Some(url) = lookup("EVOKG_KG_BASE_URL") {
            self.knowledge_graph.base_url = url;
        }
        if let Some(url) = lookup("EVOKG_KG_SPEC_URL") {
            self.knowledge_graph.spec_url = url;
        }
        if let Some(ops) = lookup("EVOKG_KG_OPERATIONS") {
            self.knowledge_graph.operations = ops
                .split(',')
                .map(str::trim)
                .filter(|op| !op.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "EVOKG_KG_TIMEOUT_SECS")? {
            self.knowledge_graph.timeout_secs = secs.max(1);
        }
        if let Some(steps) = parse_var::<usize, _>(&lookup, "EVOKG_MAX_STEPS")? {
            self.agent.max_steps = steps.max(1);
        }
        if let Some(json) = parse_var::<bool, _>(&lookup, "EVOKG_LOG_JSON")? {
            self.logging.json = json;
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.model.api_key.clone())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AssistantError::Config(format!("invalid value `{raw}` for {name}"))),
        None => Ok(None),
    }
}

/// Model API key for one session: the configured default, optionally
/// replaced by a key the user supplied.
#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
    default_key: Option<String>,
    user_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.masked())
            .field("user_override", &self.user_key.is_some())
            .finish()
    }
}

impl Credentials {
    pub fn new(default_key: Option<String>) -> Self {
        Self {
            default_key: default_key.filter(|k| !k.trim().is_empty()),
            user_key: None,
        }
    }

    pub fn set_override(&mut self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        let key = key.trim();
        if key.is_empty() {
            return Err(AssistantError::Config("API key override must not be empty".into()));
        }
        self.user_key = Some(key.to_string());
        Ok(())
    }

    pub fn current(&self) -> Option<&str> {
        self.user_key.as_deref().or(self.default_key.as_deref())
    }

    pub fn has_key(&self) -> bool {
        self.current().is_some()
    }

    /// Display form such as `sk-...lk6`.
    pub fn masked(&self) -> Option<String> {
        self.current().map(|key| {
            let chars: Vec<char> = key.chars().collect();
            if chars.len() <= 6 {
                return "***".to_string();
            }
            let head: String = chars[..3].iter().collect();
            let tail: String = chars[chars.len() - 3..].iter().collect();
            format!("{head}...{tail}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nhost='0.0.0.0'\nport=9000\n[model]\nmodel='gpt-4o'\n[knowledge_graph]\nbase_url='http://kg.local'"
        )
        .unwrap();

        let env = vars(&[
            ("EVOKG_KG_TIMEOUT_SECS", "12"),
            ("EVOKG_KG_OPERATIONS", "get_gene, predict_tail,"),
        ]);
        let mut cfg = AppConfig::from_file_or_default(file.path()).unwrap();
        cfg.apply_overrides(|name| env.get(name).cloned()).unwrap();

        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.model.model, "gpt-4o");
        assert_eq!(cfg.model.provider, "openai");
        assert_eq!(cfg.knowledge_graph.base_url, "http://kg.local");
        assert_eq!(cfg.knowledge_graph.timeout_secs, 12);
        assert_eq!(cfg.knowledge_graph.operations, vec!["get_gene", "predict_tail"]);
        assert_eq!(cfg.agent.max_steps, 8);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::from_file_or_default(dir.path().join("absent.toml")).unwrap();
        cfg.apply_overrides(|_| None).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.knowledge_graph.timeout_secs, 30);
        assert!(cfg.knowledge_graph.uses_openapi());
        assert_eq!(cfg.knowledge_graph.operations, vec!["get_gene", "get_protein"]);
    }

    #[test]
    fn prefixed_key_wins_and_bad_numbers_fail() {
        let env = vars(&[
            ("OPENAI_API_KEY", "sk-plain"),
            ("EVOKG_OPENAI_API_KEY", "sk-prefixed"),
            ("EVOKG_KG_SPEC_URL", ""),
        ]);
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|name| env.get(name).cloned()).unwrap();
        assert_eq!(cfg.model.api_key.as_deref(), Some("sk-prefixed"));
        assert!(!cfg.knowledge_graph.uses_openapi());

        let env = vars(&[("EVOKG_PORT", "eighty")]);
        assert!(matches!(
            cfg.apply_overrides(|name| env.get(name).cloned()),
            Err(AssistantError::Config(_))
        ));
    }

    #[test]
    fn rejects_unparsable_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport=").unwrap();
        assert!(matches!(
            AppConfig::from_file(file.path()),
            Err(AssistantError::Config(_))
        ));
    }

    #[test]
    fn user_key_overrides_default() {
        let mut creds = Credentials::new(Some("sk-default-key-000".into()));
        assert_eq!(creds.current(), Some("sk-default-key-000"));

        creds.set_override("sk-user-supplied-lk6").unwrap();
        assert_eq!(creds.current(), Some("sk-user-supplied-lk6"));
        assert_eq!(creds.masked().as_deref(), Some("sk-...lk6"));

        assert!(creds.set_override("   ").is_err());
        assert_eq!(creds.current(), Some("sk-user-supplied-lk6"));
    }

    #[test]
    fn empty_default_counts_as_missing() {
        let creds = Credentials::new(Some(String::new()));
        assert!(!creds.has_key());
        assert!(creds.masked().is_none());
    }
}
