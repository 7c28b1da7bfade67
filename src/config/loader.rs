use crate::config::settings::DealscopeConfig;
use crate::error::{DealscopeError, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/// Get XDG-compliant config directory
pub fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", "dealscope")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| DealscopeError::Config("Could not determine config directory".to_string()))
}

/// Get XDG-compliant data directory
pub fn data_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", "dealscope")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| DealscopeError::Config("Could not determine data directory".to_string()))
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get database path, honouring the `[storage]` override
pub fn database_path(config: &DealscopeConfig) -> Result<PathBuf> {
    match &config.storage.database_path {
        Some(path) => Ok(path.clone()),
        None => Ok(data_dir()?.join("dealscope.db")),
    }
}

/// Get vector database path, honouring the `[vector_store]` override
pub fn vector_store_path(config: &DealscopeConfig) -> Result<PathBuf> {
    match &config.vector_store.path {
        Some(path) => Ok(path.clone()),
        None => Ok(data_dir()?.join("vectors.db")),
    }
}

/// Get notes directory
pub fn notes_dir(config: &DealscopeConfig) -> Result<PathBuf> {
    match &config.storage.notes_dir {
        Some(path) => Ok(path.clone()),
        None => Ok(data_dir()?.join("reports")),
    }
}

/// Get socket path
pub fn socket_path(config: &DealscopeConfig) -> Result<PathBuf> {
    match &config.daemon.socket_path {
        Some(path) => Ok(path.clone()),
        None => Ok(data_dir()?.join("dealscope.sock")),
    }
}

/// Load config from file, creating default if not exists
pub fn load_config() -> Result<DealscopeConfig> {
    let path = config_path()?;

    if !path.exists() {
        let config = DealscopeConfig::default();
        save_config(&config)?;
        return Ok(config);
    }

    let content = fs::read_to_string(&path)?;
    let config: DealscopeConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save config to file
pub fn save_config(config: &DealscopeConfig) -> Result<()> {
    let path = config_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)?;
    fs::write(&path, content)?;
    Ok(())
}

/// Ensure all data directories exist
pub fn ensure_directories(config: &DealscopeConfig) -> Result<()> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    fs::create_dir_all(notes_dir(config)?)?;
    Ok(())
}

/// Load config and overlay secrets from the environment.
///
/// API keys are expected to come from the environment in deployed setups; values in the
/// file are only used when the matching variable is absent.
pub fn load_config_with_env() -> Result<DealscopeConfig> {
    let config = load_config()?;
    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

pub fn apply_env_overrides<F>(mut config: DealscopeConfig, lookup: F) -> DealscopeConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("DEALSCOPE_LLM_API_KEY") {
        config.llm.api_key = Some(key);
    }
    if let Some(provider) = lookup("DEALSCOPE_LLM_PROVIDER") {
        config.llm.provider = provider;
    }
    if let Some(model) = lookup("DEALSCOPE_LLM_MODEL") {
        config.llm.model = model;
    }
    if let Some(key) = lookup("DEALSCOPE_DEEP_CONTEXT_API_KEY") {
        config.llm.deep_context.api_key = Some(key);
        config.llm.deep_context.enabled = true;
    }
    if let Some(key) = lookup("DEALSCOPE_EMBEDDING_API_KEY") {
        config.embedding.api_key = Some(key);
    }
    if let Some(backend) = lookup("DEALSCOPE_VECTOR_BACKEND") {
        config.vector_store.backend = backend;
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_serializes() {
        let config = DealscopeConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[llm]"));
        assert!(toml.contains("[embedding]"));
        assert!(toml.contains("[vector_store]"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = DealscopeConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: DealscopeConfig = toml::from_str(&toml).unwrap();
        assert_eq!(config.chunking, parsed.chunking);
        assert_eq!(config.llm.model, parsed.llm.model);
    }

    #[test]
    fn test_env_overrides_inject_secrets() {
        let env: HashMap<&str, &str> = [
            ("DEALSCOPE_LLM_API_KEY", "sk-general"),
            ("DEALSCOPE_DEEP_CONTEXT_API_KEY", "deep-key"),
            ("DEALSCOPE_VECTOR_BACKEND", "memory"),
        ]
        .into_iter()
        .collect();

        let config = apply_env_overrides(DealscopeConfig::default(), |key| {
            env.get(key).map(|v| v.to_string())
        });

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-general"));
        assert_eq!(config.llm.deep_context.api_key.as_deref(), Some("deep-key"));
        assert!(config.llm.deep_context.enabled);
        assert_eq!(config.vector_store.backend, "memory");
        assert!(config.embedding.api_key.is_none());
    }

    #[test]
    fn test_path_overrides() {
        let mut config = DealscopeConfig::default();
        config.storage.database_path = Some(PathBuf::from("/tmp/custom.db"));
        assert_eq!(
            database_path(&config).unwrap(),
            PathBuf::from("/tmp/custom.db")
        );
    }

    #[test]
    fn test_config_paths_are_valid() {
        let config = DealscopeConfig::default();
        let _ = config_dir();
        let _ = data_dir();
        let _ = config_path();
        let _ = database_path(&config);
        let _ = socket_path(&config);
    }
}
