//! Crew configuration stored in `crew.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::scope::SourceScope;
use crate::reasoning::ReasoningLimits;

pub const DEFAULT_CONFIG_PATH: &str = "crew.toml";

/// Crew configuration (TOML).
///
/// Missing fields default to values that work against the public OpenAI and
/// Serper endpoints. Credentials are never stored here, only the names of the
/// environment variables that hold them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrewConfig {
    pub model: ModelConfig,
    pub reasoning: ReasoningConfig,
    pub tools: ToolsConfig,
    pub transcript: TranscriptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub api_base: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Model turns per reasoning step before a final answer is forced.
    pub max_iterations: u32,
    pub max_delegation_depth: u32,
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub search_api_base: String,
    pub search_api_key_env: String,
    pub results_per_query: u32,
    /// Authoritative documentation site for the first stage.
    pub docs_scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Write run transcripts under this directory when set. An explicit
    /// `[transcript]` table without `dir` turns transcripts off.
    pub dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            request_timeout_secs: 120,
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            max_delegation_depth: 2,
            tool_timeout_secs: 30,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_api_base: crate::tools::search::DEFAULT_API_BASE.to_string(),
            search_api_key_env: "SERPER_API_KEY".to_string(),
            results_per_query: 5,
            docs_scope: "https://platform.openai.com/docs".to_string(),
        }
    }
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            reasoning: ReasoningConfig::default(),
            tools: ToolsConfig::default(),
            transcript: TranscriptConfig {
                dir: Some(PathBuf::from(".crew/runs")),
            },
        }
    }
}

impl CrewConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.api_base.trim().is_empty() {
            return Err(anyhow!("model.api_base must be non-empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must be non-empty"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow!("model.temperature must be between 0 and 2"));
        }
        if self.reasoning.max_iterations == 0 {
            return Err(anyhow!("reasoning.max_iterations must be > 0"));
        }
        if self.reasoning.max_delegation_depth == 0 {
            return Err(anyhow!("reasoning.max_delegation_depth must be >= 1"));
        }
        if self.reasoning.tool_timeout_secs == 0 {
            return Err(anyhow!("reasoning.tool_timeout_secs must be > 0"));
        }
        if self.tools.search_api_base.trim().is_empty() {
            return Err(anyhow!("tools.search_api_base must be non-empty"));
        }
        if self.tools.results_per_query == 0 {
            return Err(anyhow!("tools.results_per_query must be > 0"));
        }
        self.docs_scope().context("tools.docs_scope")?;
        Ok(())
    }

    pub fn docs_scope(&self) -> Result<SourceScope> {
        Ok(SourceScope::parse(&self.tools.docs_scope)?)
    }

    pub fn reasoning_limits(&self) -> ReasoningLimits {
        ReasoningLimits {
            max_iterations: self.reasoning.max_iterations,
            max_delegation_depth: self.reasoning.max_delegation_depth,
            tool_timeout: Duration::from_secs(self.reasoning.tool_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_secs)
    }
}

/// Read a credential from the environment variable named by `var`.
pub fn env_credential(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CrewConfig::default()`.
pub fn load_config(path: &Path) -> Result<CrewConfig> {
    if !path.exists() {
        let cfg = CrewConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CrewConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CrewConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CrewConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("crew.toml");
        let cfg = CrewConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("crew.toml");
        fs::write(&path, "[reasoning]\nmax_delegation_depth = 3\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.reasoning.max_delegation_depth, 3);
        assert_eq!(cfg.reasoning.max_iterations, 8);
        assert_eq!(cfg.model.model, "gpt-4o-mini");
        assert_eq!(cfg.transcript.dir, Some(PathBuf::from(".crew/runs")));
    }

    #[test]
    fn empty_transcript_table_disables_transcripts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("crew.toml");
        fs::write(&path, "[transcript]\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.transcript.dir, None);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = CrewConfig::default();
        cfg.reasoning.max_delegation_depth = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = CrewConfig::default();
        cfg.tools.docs_scope = "not a url".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("tools.docs_scope"));
    }

    #[test]
    fn limits_follow_config() {
        let mut cfg = CrewConfig::default();
        cfg.reasoning.tool_timeout_secs = 5;
        let limits = cfg.reasoning_limits();
        assert_eq!(limits.tool_timeout, Duration::from_secs(5));
        assert_eq!(limits.max_delegation_depth, 2);
    }
}
