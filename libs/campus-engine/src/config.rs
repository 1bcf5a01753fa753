//! Engine configuration: environment-driven settings plus the language
//! registry loaded from `config/languages.json`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;
use crate::executor::DEFAULT_TIMEOUT;
use crate::runner::ExternalRunner;

fn default_version() -> String {
    "latest".to_string()
}

/// How to run one language's submissions: the staged file name and the
/// command template (`%FILE%` is substituted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSpec {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub file_name: String,
    pub command: String,
}

impl LanguageSpec {
    pub fn run_command(&self, file: &str) -> String {
        self.command.replace("%FILE%", file)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageSpec>,
}

/// The authoritative source for which languages code exercises may use.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    configs: HashMap<String, LanguageSpec>,
}

impl LanguageRegistry {
    /// Load language specs from a languages.json file.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("language config file not found: {}", config_path.display());
        }
        let content = fs::read_to_string(config_path).context("failed to read languages.json")?;
        let file: LanguagesFile =
            serde_json::from_str(&content).context("failed to parse languages.json")?;
        if file.languages.is_empty() {
            bail!("no languages configured in languages.json");
        }
        Ok(Self::from_specs(file.languages))
    }

    /// `config/languages.json` when present, built-in defaults otherwise.
    pub fn load_default() -> Self {
        match Self::load(Path::new("config/languages.json")) {
            Ok(registry) => registry,
            Err(e) => {
                info!("using built-in language registry ({e})");
                Self::builtin()
            }
        }
    }

    pub fn builtin() -> Self {
        Self::from_specs(vec![
            LanguageSpec {
                name: "python".to_string(),
                version: "3.11".to_string(),
                file_name: "main.py".to_string(),
                command: "python3 %FILE%".to_string(),
            },
            LanguageSpec {
                name: "javascript".to_string(),
                version: "18".to_string(),
                file_name: "main.js".to_string(),
                command: "node %FILE%".to_string(),
            },
            LanguageSpec {
                name: "go".to_string(),
                version: "1.21".to_string(),
                file_name: "main.go".to_string(),
                command: "go run %FILE%".to_string(),
            },
        ])
    }

    pub fn from_specs(specs: Vec<LanguageSpec>) -> Self {
        let mut configs = HashMap::new();
        for spec in specs {
            configs.insert(spec.name.clone(), spec);
        }
        Self { configs }
    }

    pub fn get(&self, name: &str) -> Result<&LanguageSpec, EngineError> {
        let canonical = match name {
            "python3" => "python",
            "golang" => "go",
            "js" | "node" => "javascript",
            other => other,
        };
        self.configs
            .get(canonical)
            .ok_or_else(|| EngineError::UnsupportedLanguage(name.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Environment-driven engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_timeout: Duration,
    /// Binary used for ephemeral cluster scopes.
    pub kubectl: String,
    /// External runner command line; in-process execution when unset.
    pub runner: Option<ExternalRunner>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let default_timeout = std::env::var("CAMPUS_DEFAULT_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let kubectl =
            std::env::var("CAMPUS_KUBECTL").unwrap_or_else(|_| "kubectl".to_string());
        let runner = std::env::var("CAMPUS_RUNNER")
            .ok()
            .and_then(|raw| ExternalRunner::parse(&raw));
        Self {
            default_timeout,
            kubectl,
            runner,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            kubectl: "kubectl".to_string(),
            runner: None,
        }
    }
}
