use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::RetryPolicy;
use crate::safety::{ApprovalMode, DEFAULT_TAG_PREFIX};
use crate::sandbox::{DEFAULT_DENYLIST, GateConfig, JailConfig};
use crate::state::StateDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub approval_mode: ApprovalMode,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub shell: ShellConfig,
    pub files: FilesConfig,
    pub git: GitConfig,
    pub tests: CommandOverride,
    pub lint: CommandOverride,
    pub cleanup: CleanupConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            model: "Qwen/Qwen2.5-72B-Instruct-AWQ".to_string(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 4096,
            timeout_secs: 120,
            max_retries: 3,
            retry_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    /// Intermediate checkpoint after this many successful mutations (0 = never)
    pub checkpoint_every: u32,
    /// Identical consecutive calls that count as stuck
    pub stuck_window: usize,
    /// Inject a reflection prompt every N iterations (0 = never)
    pub reflect_every: u32,
    /// Remaining iterations at which reflection turns urgent
    pub urgency_threshold: u32,
    pub read_before_edit: bool,
    pub max_history_chars: usize,
    /// Tool results quoted in an exhaustion failure reason
    pub failure_context: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            checkpoint_every: 5,
            stuck_window: 3,
            reflect_every: 5,
            urgency_threshold: 5,
            read_before_edit: true,
            max_history_chars: 120_000,
            failure_context: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    pub denylist: Vec<String>,
    pub allowlist: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_output_bytes: 50_000,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            allowlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub max_read_chars: usize,
    pub max_search_results: usize,
    pub external_patch: bool,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_read_chars: 8_000,
            max_search_results: 50,
            external_patch: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub auto_checkpoint: bool,
    pub tag_prefix: String,
    /// Save the discarded diff before a failure rollback
    pub preserve_partial_diff: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            auto_checkpoint: true,
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
            preserve_partial_diff: true,
        }
    }
}

/// Overrides framework detection for the test and lint tools
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOverride {
    pub command: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub temp_max_age_hours: u64,
    pub log_max_mb: u64,
    pub log_keep: usize,
    pub journal_max_days: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            temp_max_age_hours: 24,
            log_max_mb: 50,
            log_keep: 3,
            journal_max_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            approval_mode: ApprovalMode::default(),
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            shell: ShellConfig::default(),
            files: FilesConfig::default(),
            git: GitConfig::default(),
            tests: CommandOverride::default(),
            lint: CommandOverride::default(),
            cleanup: CleanupConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply `CORRAL_*`
    /// environment overrides and validate.
    ///
    /// 1. explicit path (must load)
    /// 2. `<workspace>/.corral/config.yml`
    /// 3. `~/.config/corral/corral.yml`
    /// 4. defaults
    pub fn load(config_path: Option<&Path>, workspace: &Path) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path, workspace)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&Path>, workspace: &Path) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let mut candidates: Vec<PathBuf> = vec![StateDir::new(workspace).config_path()];
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            candidates.push(config_dir.join(project_name).join(format!("{}.yml", project_name)));
        }

        for candidate in candidates {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CORRAL_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("CORRAL_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("CORRAL_LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = lookup("CORRAL_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("CORRAL_APPROVAL_MODE") {
            match v.parse() {
                Ok(mode) => self.approval_mode = mode,
                Err(e) => log::warn!("Ignoring CORRAL_APPROVAL_MODE: {}", e),
            }
        }
        if let Some(v) = lookup("CORRAL_MAX_ITERATIONS") {
            match v.parse() {
                Ok(n) => self.agent.max_iterations = n,
                Err(e) => log::warn!("Ignoring CORRAL_MAX_ITERATIONS={}: {}", v, e),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(eyre!("agent.max_iterations must be at least 1"));
        }
        if self.agent.stuck_window < 2 {
            return Err(eyre!("agent.stuck_window must be at least 2"));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(eyre!("llm.base_url must not be empty"));
        }
        if self.shell.timeout_secs == 0 {
            return Err(eyre!("shell.timeout_secs must be at least 1"));
        }
        Ok(())
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            timeout: Duration::from_secs(self.shell.timeout_secs),
            max_output_bytes: self.shell.max_output_bytes,
            denylist: self.shell.denylist.clone(),
            allowlist: self.shell.allowlist.clone(),
        }
    }

    pub fn jail_config(&self) -> JailConfig {
        JailConfig {
            max_read_chars: self.files.max_read_chars,
            max_search_results: self.files.max_search_results,
            external_patch: self.files.external_patch,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.llm.max_retries,
            base_delay: Duration::from_millis(self.llm.retry_base_ms),
        }
    }
}
