//! Loop configuration stored at `<workdir>/taskloop.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name inside the working directory.
pub const CONFIG_FILE: &str = "taskloop.toml";

/// Loop configuration (TOML).
///
/// Intended to be edited by humans. Every table defaults independently, so a
/// file only needs the fields it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    pub model: ModelConfig,
    pub generation: GenerationConfig,
    pub run: RunConfig,
    pub exec: ExecConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// Base URL of the Generative Language REST API.
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemini-1.5-flash-002".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 500,
            response_mime_type: "text/plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Failed executions retried before a task is marked failed.
    pub max_retries: u32,
    /// Turns replayed to the model, including the goal turn.
    pub history_window: usize,
    /// Executed steps after which the run stops.
    pub max_iterations: u32,
    /// Store file name, relative to the working directory.
    pub store_file: String,
    /// Conversation log file name, relative to the working directory.
    pub log_file: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            history_window: 20,
            max_iterations: 200,
            store_file: "taskloop.db".to_string(),
            log_file: "llm_log.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecConfig {
    /// Shell program and arguments; the command line is appended.
    pub shell: Vec<String>,
    /// Program used for `node` tasks.
    pub interpreter: String,
    /// Kill shell/interpreter commands after this many seconds. Unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        let shell = if cfg!(windows) {
            vec!["cmd".to_string(), "/C".to_string()]
        } else {
            vec!["sh".to_string(), "-c".to_string()]
        };
        Self {
            shell,
            interpreter: "node".to_string(),
            command_timeout_secs: None,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must not be empty"));
        }
        if self.model.api_key_env.trim().is_empty() {
            return Err(anyhow!("model.api_key_env must not be empty"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if self.run.max_retries == 0 {
            return Err(anyhow!("run.max_retries must be > 0"));
        }
        if self.run.history_window == 0 {
            return Err(anyhow!("run.history_window must be > 0"));
        }
        if self.run.max_iterations == 0 {
            return Err(anyhow!("run.max_iterations must be > 0"));
        }
        if self.run.store_file.trim().is_empty() || self.run.log_file.trim().is_empty() {
            return Err(anyhow!("run.store_file and run.log_file must not be empty"));
        }
        if self.exec.shell.is_empty() || self.exec.shell[0].trim().is_empty() {
            return Err(anyhow!("exec.shell must be a non-empty array"));
        }
        if self.exec.interpreter.trim().is_empty() {
            return Err(anyhow!("exec.interpreter must not be empty"));
        }
        if self.exec.command_timeout_secs == Some(0) {
            return Err(anyhow!("exec.command_timeout_secs must be > 0 when set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
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
        assert_eq!(cfg, LoopConfig::default());
        assert_eq!(cfg.run.max_retries, 3);
        assert_eq!(cfg.generation.top_k, 40);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join(CONFIG_FILE);
        let mut cfg = LoopConfig::default();
        cfg.exec.command_timeout_secs = Some(30);
        cfg.run.history_window = 8;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[run]\nmax_iterations = 5\n\n[exec]\ninterpreter = \"python3\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.run.max_iterations, 5);
        assert_eq!(cfg.run.max_retries, 3);
        assert_eq!(cfg.exec.interpreter, "python3");
        assert_eq!(cfg.exec.shell, ExecConfig::default().shell);
        assert_eq!(cfg.model, ModelConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[exec]\nshell = []\n").expect("write");
        let err = load_config(&path).expect_err("empty shell");
        assert!(format!("{err:#}").contains("exec.shell"));

        let mut cfg = LoopConfig::default();
        cfg.run.history_window = 0;
        assert!(cfg.validate().is_err());
        cfg.run.history_window = 4;
        cfg.exec.command_timeout_secs = Some(0);
        assert!(cfg.validate().is_err());
    }
}
