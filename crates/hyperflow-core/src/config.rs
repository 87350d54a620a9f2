use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HyperflowError, Result};
use crate::types::ProviderType;

/// Top-level hyperflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub vault: VaultConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub scripts: ScriptConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Symmetric secret the credential vault is keyed from.
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// URL-safe base64 encoding of 32 random bytes.
    pub secret: String,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_database() -> String { "~/.hyperflow/hyperflow.db".to_string() }
fn default_data_dir() -> String { "~/.hyperflow".to_string() }

/// Key rotation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Fixed pause between attempts on different keys.
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            retry_pause_ms: default_retry_pause_ms(),
        }
    }
}

fn default_retry_pause_ms() -> u64 { 100 }

/// Embedded script execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Script nodes refuse to run unless this is set.
    #[serde(default)]
    pub enable_unsafe_exec: bool,
    /// Interpreter used by `javascript` nodes.
    #[serde(default = "default_node_binary")]
    pub node_binary: String,
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            enable_unsafe_exec: false,
            node_binary: default_node_binary(),
            timeout_secs: default_script_timeout(),
        }
    }
}

fn default_node_binary() -> String { "node".to_string() }
fn default_script_timeout() -> u64 { 30 }

/// Per-provider endpoint and default model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderSettings,
    #[serde(default)]
    pub anthropic: ProviderSettings,
    #[serde(default)]
    pub gemini: ProviderSettings,
    #[serde(default)]
    pub ollama: ProviderSettings,
}

impl ProvidersConfig {
    pub fn settings(&self, provider: ProviderType) -> &ProviderSettings {
        match provider {
            ProviderType::OpenAi => &self.openai,
            ProviderType::Anthropic => &self.anthropic,
            ProviderType::Gemini => &self.gemini,
            ProviderType::Ollama => &self.ollama,
        }
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| HyperflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| HyperflowError::Config(e.to_string()))
    }

    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.storage.database)
    }

    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.storage.data_dir)
    }

    /// TOML rendering with the vault secret masked.
    pub fn redacted_toml(&self) -> Result<String> {
        let mut copy = self.clone();
        copy.vault.secret = "********".to_string();
        toml::to_string_pretty(&copy).map_err(|e| HyperflowError::Config(e.to_string()))
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_HYPERFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_HYPERFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_HYPERFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_HYPERFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_HYPERFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[vault]
secret = "abc"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rotation.retry_pause_ms, 100);
        assert!(!config.scripts.enable_unsafe_exec);
        assert_eq!(config.scripts.node_binary, "node");
        assert_eq!(config.scripts.timeout_secs, 30);
        assert_eq!(config.storage.database, "~/.hyperflow/hyperflow.db");
        assert!(config.providers.openai.base_url.is_none());
    }

    #[test]
    fn test_missing_vault_section_is_an_error() {
        let result: std::result::Result<AppConfig, _> = toml::from_str("[scripts]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_settings_lookup() {
        let toml_str = r#"
[vault]
secret = "abc"

[providers.ollama]
base_url = "http://gpu-box:11434"
default_model = "llama3.1"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let ollama = config.providers.settings(ProviderType::Ollama);
        assert_eq!(ollama.base_url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(ollama.default_model.as_deref(), Some("llama3.1"));
        assert!(config.providers.settings(ProviderType::Gemini).default_model.is_none());
    }

    #[test]
    fn test_redacted_toml_hides_secret() {
        let config: AppConfig = toml::from_str("[vault]\nsecret = \"super-secret\"\n").unwrap();
        let rendered = config.redacted_toml().unwrap();
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("********"));
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_home("~/db.sqlite"), PathBuf::from("/home/tester/db.sqlite"));
        assert_eq!(expand_home("/abs/db.sqlite"), PathBuf::from("/abs/db.sqlite"));
    }
}
