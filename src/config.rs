use anyhow::{Context, Result, anyhow, bail};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_EDITOR: &str = "vim";

const CONFIG_FILE_NAME: &str = ".aiterm";

/// Environment variables that override a provider's API key.
const API_KEY_ENV_VARS: &[(&str, &str)] = &[("gemini", "GEMINI_API_KEY")];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Explicit provider id. When absent the provider is inferred from the model family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    #[serde(skip)]
    pub use_mock: bool,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

impl Default for Config {
    fn default() -> Self {
        let mut api_keys = BTreeMap::new();
        api_keys.insert("gemini".to_string(), String::new());
        Self {
            model: default_model(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            provider: None,
            api_keys,
            use_mock: false,
        }
    }
}

impl Config {
    /// Load configuration from `~/.aiterm`, creating it with defaults when
    /// missing, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, writing defaults", path.display());
            let config = Self::default();
            config
                .save_to(path)
                .context("failed to create default config")?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create config directory {}", parent.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(CONFIG_FILE_NAME))
    }

    /// Environment variables override values from the file.
    pub fn apply_env_overrides(&mut self, mut get_var: impl FnMut(&str) -> Option<String>) {
        let non_empty = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(model) = non_empty(get_var("AITERM_MODEL")) {
            debug!(model = %model, "model overridden from environment");
            self.model = model;
        }

        if let Some(provider) = non_empty(get_var("AITERM_PROVIDER")) {
            self.provider = Some(provider);
        }

        for &(provider, var) in API_KEY_ENV_VARS {
            if let Some(key) = non_empty(get_var(var)) {
                debug!(provider = %provider, "API key taken from {}", var);
                self.api_keys.insert(provider.to_string(), key);
            }
        }

        if get_var("AITERM_USE_MOCK").is_some() {
            self.use_mock = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            bail!("invalid configuration: model must not be empty");
        }
        if self.max_tokens == 0 {
            bail!("invalid configuration: max_tokens must be greater than zero");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!(
                "invalid configuration: temperature {} is outside 0.0..=2.0",
                self.temperature
            );
        }
        Ok(())
    }

    /// Get the API key for a provider. Empty strings count as missing.
    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.api_keys
            .get(&provider.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|key| !key.trim().is_empty())
    }

    /// Name of the environment variable that overrides `provider`'s API key.
    pub fn api_key_env_var(provider: &str) -> Option<&'static str> {
        API_KEY_ENV_VARS
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(provider))
            .map(|(_, var)| *var)
    }
}

/// The editor used by the `config` command: `$EDITOR`, or `vim`.
pub fn resolve_editor(get_var: impl FnOnce(&str) -> Option<String>) -> String {
    get_var("EDITOR")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn overrides(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".aiterm");

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["model"], "gemini-2.0-flash");
        assert_eq!(written["max_tokens"], 1024);
        assert_eq!(written["temperature"], 0.8);
        assert_eq!(written["api_keys"]["gemini"], "");
        assert!(written.get("provider").is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".aiterm");
        fs::write(&path, r#"{"model": "gemini-1.5-pro", "api_keys": {"gemini": "k"}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.model, "gemini-1.5-pro");
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(config.api_key("gemini"), Some("k"));
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".aiterm");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn test_env_overrides_win_over_file_values() {
        let mut config = Config::default();
        config.api_keys.insert("gemini".to_string(), "from-file".to_string());

        config.apply_env_overrides(overrides(&[
            ("AITERM_MODEL", "gemini-1.5-flash"),
            ("GEMINI_API_KEY", "from-env"),
            ("AITERM_PROVIDER", "gemini"),
        ]));

        assert_eq!(config.model, "gemini-1.5-flash");
        assert_eq!(config.api_key("gemini"), Some("from-env"));
        assert_eq!(config.provider.as_deref(), Some("gemini"));
        assert!(!config.use_mock);
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(overrides(&[("AITERM_MODEL", "   "), ("GEMINI_API_KEY", "")]));

        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.api_key("gemini"), None);
    }

    #[test]
    fn test_use_mock_is_set_from_env() {
        let mut config = Config::default();
        config.apply_env_overrides(overrides(&[("AITERM_USE_MOCK", "1")]));
        assert!(config.use_mock);
    }

    #[test]
    fn test_empty_api_key_counts_as_missing() {
        let config = Config::default();
        assert_eq!(config.api_key("gemini"), None);
        assert_eq!(config.api_key("unknown"), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.max_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.temperature = 3.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.model = String::new();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_api_key_env_var_lookup() {
        assert_eq!(Config::api_key_env_var("gemini"), Some("GEMINI_API_KEY"));
        assert_eq!(Config::api_key_env_var("GEMINI"), Some("GEMINI_API_KEY"));
        assert_eq!(Config::api_key_env_var("other"), None);
    }

    #[test]
    fn test_resolve_editor_defaults_to_vim() {
        assert_eq!(resolve_editor(|_| None), "vim");
        assert_eq!(resolve_editor(|_| Some("  ".to_string())), "vim");
        assert_eq!(resolve_editor(|_| Some("nano".to_string())), "nano");
    }
}
