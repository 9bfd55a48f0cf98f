use std::path::{Path, PathBuf};

use keepsake_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::{AppConfig, LlmProviderKind};

/// Loads `AppConfig` from a YAML or TOML file, then applies environment
/// overrides and validates the result.
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Loader for the default location, `~/.keepsake/config.yml`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("could not determine home directory".into()))?;
        Ok(Self {
            config_path: home.join(".keepsake").join("config.yml"),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Read the file (defaults when missing), apply process environment
    /// overrides and validate.
    pub fn load(&self) -> Result<AppConfig> {
        let mut config = self.load_file()?;
        apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the config file without overrides or validation.
    pub fn load_file(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "no config file at {}, using defaults",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let raw = std::fs::read_to_string(&self.config_path)?;
        let config = match self
            .config_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("toml") => toml::from_str(&raw).map_err(|e| {
                Error::Config(format!(
                    "failed to parse {}: {e}",
                    self.config_path.display()
                ))
            })?,
            Some("yml") | Some("yaml") | None => serde_yaml::from_str(&raw).map_err(|e| {
                Error::Config(format!(
                    "failed to parse {}: {e}",
                    self.config_path.display()
                ))
            })?,
            Some(other) => {
                return Err(Error::Config(format!(
                    "unsupported config format: .{other}"
                )));
            }
        };

        debug!("loaded config from {}", self.config_path.display());
        Ok(config)
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Recognised keys: `MODEL_SERVER`, `MODEL_NAME`, `OPENAI_API_KEY`,
/// `OLLAMA_HOST`, `EMB_MODEL`, `EMB_DIMENSION`, `ENABLE_JUDGE`,
/// `KEEPSAKE_DB_PATH`.
pub fn apply_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(server) = get("MODEL_SERVER") {
        config.llm.provider = server.parse::<LlmProviderKind>()?;
    }
    if let Some(model) = get("MODEL_NAME") {
        config.llm.model = model;
    }
    if let Some(key) = get("OPENAI_API_KEY") {
        config.llm.api_key = Some(key);
    }
    if let Some(host) = get("OLLAMA_HOST") {
        if config.llm.provider == LlmProviderKind::Ollama {
            config.llm.base_url = Some(host.clone());
        }
        config.embedding.base_url = host;
    }
    if let Some(model) = get("EMB_MODEL") {
        config.embedding.model = model;
    }
    if let Some(dims) = get("EMB_DIMENSION") {
        let parsed = dims
            .trim()
            .parse::<usize>()
            .map_err(|e| Error::Config(format!("EMB_DIMENSION '{dims}' is not a number: {e}")))?;
        config.embedding.dimensions = Some(parsed);
    }
    if let Some(flag) = get("ENABLE_JUDGE") {
        config.judge.enabled = parse_flag(&flag).ok_or_else(|| {
            Error::Config(format!("ENABLE_JUDGE '{flag}' is not a boolean"))
        })?;
    }
    if let Some(path) = get("KEEPSAKE_DB_PATH") {
        config.memory.db_path = Some(PathBuf::from(path));
    }

    if config.llm.provider == LlmProviderKind::Ollama && config.llm.api_key.is_some() {
        warn!("an API key is configured but the ollama provider does not use it");
    }
    Ok(())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::MemoryMode;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_path(dir.path().join("absent.yml"));
        assert_eq!(loader.load_file().unwrap(), AppConfig::default());
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "llm:\n  model: qwen2.5\nmemory:\n  mode: \"off\"\n  short_term_capacity: 4\n",
        )
        .unwrap();
        let config = ConfigLoader::with_path(&path).load_file().unwrap();
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.memory.mode, MemoryMode::Off);
        assert_eq!(config.memory.short_term_capacity, 4);
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[agent]\nhistory_window = 8\n\n[memory.retrieval]\nnum_results = 3\n",
        )
        .unwrap();
        let config = ConfigLoader::with_path(&path).load_file().unwrap();
        assert_eq!(config.agent.history_window, 8);
        assert_eq!(config.memory.retrieval.num_results, 3);
        assert_eq!(config.memory.retrieval.similarity, 1.0);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "llm: [unclosed").unwrap();
        let err = ConfigLoader::with_path(&path).load_file().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(ConfigLoader::with_path(&path).load_file().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            env(&[
                ("MODEL_SERVER", "OPENAI"),
                ("MODEL_NAME", "gpt-4o-mini"),
                ("OPENAI_API_KEY", "sk-test"),
                ("EMB_MODEL", "mxbai-embed-large"),
                ("EMB_DIMENSION", "1024"),
                ("ENABLE_JUDGE", "0"),
                ("KEEPSAKE_DB_PATH", "/var/lib/keepsake/memory.db"),
            ]),
        )
        .unwrap();

        assert_eq!(config.llm.provider, LlmProviderKind::Openai);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.embedding.model, "mxbai-embed-large");
        assert_eq!(config.embedding.dimensions, Some(1024));
        assert!(!config.judge.enabled);
        assert_eq!(
            config.memory.db_path,
            Some(PathBuf::from("/var/lib/keepsake/memory.db"))
        );
        config.validate().unwrap();
    }

    #[test]
    fn ollama_host_sets_chat_and_embedding_urls() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, env(&[("OLLAMA_HOST", "http://ollama:11434")])).unwrap();
        assert_eq!(config.llm.base_url.as_deref(), Some("http://ollama:11434"));
        assert_eq!(config.embedding.base_url, "http://ollama:11434");
    }

    #[test]
    fn blank_values_are_ignored() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, env(&[("MODEL_NAME", "  ")])).unwrap();
        assert_eq!(config.llm.model, AppConfig::default().llm.model);
    }

    #[test]
    fn bad_override_values_error() {
        let mut config = AppConfig::default();
        assert!(apply_overrides(&mut config, env(&[("EMB_DIMENSION", "lots")])).is_err());
        assert!(apply_overrides(&mut config, env(&[("ENABLE_JUDGE", "maybe")])).is_err());
        assert!(apply_overrides(&mut config, env(&[("MODEL_SERVER", "VERTEXAI")])).is_err());
    }
}
