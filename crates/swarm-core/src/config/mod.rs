//! Configuration management for dev-swarm.
//!
//! Configuration is a single TOML file, by default `~/.config/dev-swarm/config.toml`
//! (the directory can be moved with `DEV_SWARM_DIR`):
//!
//! ```text
//! ~/.config/dev-swarm/
//! ├── config.toml           # Main configuration
//! ├── dev-swarm.lock        # Process lock (owner PID)
//! ├── dev-swarm.log         # Daemon log
//! └── worktrees/
//!     └── {codebase}/issue-{n}/   # One workspace per issue
//! ```
//!
//! Missing settings fall back to defaults. Present-but-invalid settings are
//! rejected by validation, never silently replaced.

mod defaults;

pub use defaults::default_label;

use crate::error::{Error, Result};
use crate::labels::{LabelDefinition, LabelOwner, LabelRole, LabelSet, PickupRule};
use defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";
const LOCK_FILE_NAME: &str = "dev-swarm.lock";
const LOG_FILE_NAME: &str = "dev-swarm.log";
const WORKTREES_DIR_NAME: &str = "worktrees";

/// Configuration directory: `$DEV_SWARM_DIR` or `~/.config/dev-swarm`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DEV_SWARM_DIR") {
        return PathBuf::from(dir);
    }
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".config").join("dev-swarm")
}

/// Default path of the config file.
pub fn config_file_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub settings: Settings,

    /// Global label definitions (partial; unset fields use built-in defaults)
    #[serde(default)]
    pub labels: LabelsConfig,

    /// Free-text instructions included in every prompt
    #[serde(default)]
    pub instructions: Instructions,

    /// Monitored repositories
    #[serde(default)]
    pub codebases: Vec<CodebaseConfig>,

    /// Directory the config was loaded from; anchors the lock, log and worktrees.
    #[serde(skip, default = "config_dir")]
    pub config_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Poll interval in seconds while no session is running
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Poll interval in seconds while at least one session is running
    #[serde(default = "default_active_poll_interval")]
    pub active_poll_interval_secs: u64,

    /// Ceiling on simultaneously running agent sessions
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    /// Output lines retained per session
    #[serde(default = "default_output_buffer_lines")]
    pub output_buffer_lines: usize,

    /// Comments included in the prompt (most recent first kept)
    #[serde(default = "default_max_prompt_comments")]
    pub max_prompt_comments: usize,

    /// Phrases a reviewer uses to approve; surfaced to the agent in the prompt
    #[serde(default = "default_approval_keywords")]
    pub approval_keywords: Vec<String>,

    /// Override for the workspaces root (defaults to `{config_dir}/worktrees`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktrees_dir: Option<PathBuf>,

    /// Agent executable
    #[serde(default)]
    pub agent: AgentCommand,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            active_poll_interval_secs: default_active_poll_interval(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            output_buffer_lines: default_output_buffer_lines(),
            max_prompt_comments: default_max_prompt_comments(),
            approval_keywords: default_approval_keywords(),
            worktrees_dir: None,
            agent: AgentCommand::default(),
        }
    }
}

/// How the coding agent is launched. `{prompt_file}` in `args` is replaced
/// with the path of the prompt artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    #[serde(default = "default_agent_program")]
    pub program: String,

    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
}

impl Default for AgentCommand {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            args: default_agent_args(),
        }
    }
}

impl AgentCommand {
    /// Arguments with `{prompt_file}` substituted.
    pub fn render_args(&self, prompt_file: &Path) -> Vec<String> {
        let prompt = prompt_file.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{prompt_file}", &prompt))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(default)]
    pub general: String,
}

impl Default for Instructions {
    fn default() -> Self {
        Self {
            general: GENERAL_INSTRUCTIONS.to_string(),
        }
    }
}

/// Partial label definition as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<LabelOwner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup: Option<PickupRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl LabelPatch {
    fn apply(&self, base: &mut LabelDefinition) {
        if let Some(ref name) = self.name {
            base.name = name.clone();
        }
        if let Some(ref color) = self.color {
            base.color = color.clone();
        }
        if let Some(ref description) = self.description {
            base.description = description.clone();
        }
        if let Some(owner) = self.owner {
            base.owner = owner;
        }
        if let Some(pickup) = self.pickup {
            base.pickup = pickup;
        }
        if let Some(ref instructions) = self.instructions {
            base.instructions = instructions.clone();
        }
    }

    fn full(def: &LabelDefinition) -> Self {
        Self {
            name: Some(def.name.clone()),
            color: Some(def.color.clone()),
            description: Some(def.description.clone()),
            owner: Some(def.owner),
            pickup: Some(def.pickup),
            instructions: if def.instructions.is_empty() {
                None
            } else {
                Some(def.instructions.clone())
            },
        }
    }
}

/// Label section of the config file, one optional patch per role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_plan: Option<LabelPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_review: Option<LabelPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_implement: Option<LabelPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_review: Option<LabelPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<LabelPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning: Option<LabelPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementing: Option<LabelPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_failed: Option<LabelPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<LabelPatch>,
}

impl LabelsConfig {
    /// Every role spelled out with its built-in definition.
    pub fn full_defaults() -> Self {
        let mut labels = Self::default();
        for role in LabelRole::ALL {
            *labels.slot_mut(role) = Some(LabelPatch::full(&default_label(role)));
        }
        labels
    }

    pub fn get(&self, role: LabelRole) -> Option<&LabelPatch> {
        match role {
            LabelRole::ReadyToPlan => self.ready_to_plan.as_ref(),
            LabelRole::PlanReview => self.plan_review.as_ref(),
            LabelRole::ReadyToImplement => self.ready_to_implement.as_ref(),
            LabelRole::CodeReview => self.code_review.as_ref(),
            LabelRole::Blocked => self.blocked.as_ref(),
            LabelRole::Planning => self.planning.as_ref(),
            LabelRole::Implementing => self.implementing.as_ref(),
            LabelRole::CiFailed => self.ci_failed.as_ref(),
            LabelRole::Done => self.done.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: LabelRole) -> &mut Option<LabelPatch> {
        match role {
            LabelRole::ReadyToPlan => &mut self.ready_to_plan,
            LabelRole::PlanReview => &mut self.plan_review,
            LabelRole::ReadyToImplement => &mut self.ready_to_implement,
            LabelRole::CodeReview => &mut self.code_review,
            LabelRole::Blocked => &mut self.blocked,
            LabelRole::Planning => &mut self.planning,
            LabelRole::Implementing => &mut self.implementing,
            LabelRole::CiFailed => &mut self.ci_failed,
            LabelRole::Done => &mut self.done,
        }
    }

    /// Built-in definitions with this config's patches applied.
    pub fn resolve(&self) -> LabelSet {
        self.resolve_with(None)
    }

    /// Built-in definitions, then these global patches, then per-codebase overrides.
    pub fn resolve_with(&self, overrides: Option<&LabelsConfig>) -> LabelSet {
        let labels = LabelRole::ALL
            .iter()
            .map(|&role| {
                let mut def = default_label(role);
                if let Some(patch) = self.get(role) {
                    patch.apply(&mut def);
                }
                if let Some(patch) = overrides.and_then(|o| o.get(role)) {
                    patch.apply(&mut def);
                }
                def
            })
            .collect();
        LabelSet::new(labels)
    }
}

/// A monitored repository as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseConfig {
    /// Short name; used for workspace directories. Defaults to the repo name.
    #[serde(default)]
    pub name: String,

    /// Repository in `owner/name` form
    #[serde(default)]
    pub repo: String,

    /// Local checkout the workspaces branch from
    #[serde(default)]
    pub local_path: PathBuf,

    #[serde(default = "default_branch")]
    pub default_branch: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-codebase label overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelsConfig>,
}

/// A monitored repository with its labels resolved.
#[derive(Debug, Clone)]
pub struct Codebase {
    pub name: String,
    pub repo: String,
    pub local_path: PathBuf,
    pub default_branch: String,
    pub enabled: bool,
    pub labels: LabelSet,
}

impl Config {
    /// Load, default, and validate the configuration at `path` (or the default location).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(PathBuf::from).unwrap_or_else(config_file_path);
        if !path.exists() {
            return Err(Error::ConfigNotFound(path));
        }

        let content = fs::read_to_string(&path)?;
        let mut config = Self::from_toml(&content)?;
        if let Some(parent) = path.parent() {
            config.config_dir = parent.to_path_buf();
        }
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// A starter configuration with every label spelled out and a disabled example codebase.
    pub fn default_with_example() -> Self {
        Self {
            settings: Settings::default(),
            labels: LabelsConfig::full_defaults(),
            instructions: Instructions::default(),
            codebases: vec![CodebaseConfig {
                name: "example".to_string(),
                repo: "owner/example-repo".to_string(),
                local_path: PathBuf::from("~/code/example-repo"),
                default_branch: default_branch(),
                enabled: false,
                labels: None,
            }],
            config_dir: config_dir(),
        }
    }

    /// Write the configuration as TOML, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn normalize(&mut self) {
        for cb in &mut self.codebases {
            cb.local_path = expand_tilde(&cb.local_path);
            if cb.name.is_empty() {
                cb.name = cb.repo.rsplit('/').next().unwrap_or_default().to_string();
            }
        }
        if let Some(dir) = self.settings.worktrees_dir.take() {
            self.settings.worktrees_dir = Some(expand_tilde(&dir));
        }
    }

    /// Check the configuration for errors
    pub fn validate(&self) -> Result<()> {
        let s = &self.settings;
        if s.poll_interval_secs < 1 {
            return Err(Error::config("settings.poll_interval_secs", "must be at least 1"));
        }
        if s.active_poll_interval_secs < 1 {
            return Err(Error::config(
                "settings.active_poll_interval_secs",
                "must be at least 1",
            ));
        }
        if s.max_concurrent_sessions < 1 {
            return Err(Error::config(
                "settings.max_concurrent_sessions",
                "must be at least 1",
            ));
        }
        if s.output_buffer_lines < 1 {
            return Err(Error::config("settings.output_buffer_lines", "must be at least 1"));
        }
        if s.agent.program.trim().is_empty() {
            return Err(Error::config("settings.agent.program", "is required"));
        }

        validate_labels(&self.labels.resolve(), "labels")?;

        let mut names = HashSet::new();
        for (i, cb) in self.codebases.iter().enumerate() {
            if cb.repo.is_empty() {
                return Err(Error::config(format!("codebases[{}].repo", i), "is required"));
            }
            if !cb.repo.contains('/') {
                return Err(Error::config(
                    format!("codebases[{}].repo", i),
                    "must be in 'owner/name' format",
                ));
            }
            if cb.local_path.as_os_str().is_empty() {
                return Err(Error::config(
                    format!("codebases[{}].local_path", i),
                    "is required",
                ));
            }
            if cb.default_branch.is_empty() {
                return Err(Error::config(
                    format!("codebases[{}].default_branch", i),
                    "is required",
                ));
            }
            if !is_safe_name(&cb.name) {
                return Err(Error::config(
                    format!("codebases[{}].name", i),
                    format!("'{}' must not contain path separators or '..'", cb.name),
                ));
            }
            if !names.insert(cb.name.as_str()) {
                return Err(Error::config(
                    format!("codebases[{}].name", i),
                    format!("duplicate codebase name '{}'", cb.name),
                ));
            }
            if cb.labels.is_some() {
                validate_labels(
                    &self.labels.resolve_with(cb.labels.as_ref()),
                    &format!("codebases[{}].labels", i),
                )?;
            }
        }

        Ok(())
    }

    /// Root directory for per-issue workspaces.
    pub fn worktrees_root(&self) -> PathBuf {
        self.settings
            .worktrees_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join(WORKTREES_DIR_NAME))
    }

    /// Path of the process lock record.
    pub fn lock_file_path(&self) -> PathBuf {
        self.config_dir.join(LOCK_FILE_NAME)
    }

    /// Path of the daemon log file.
    pub fn log_file_path(&self) -> PathBuf {
        self.config_dir.join(LOG_FILE_NAME)
    }

    /// Global label definitions.
    pub fn global_labels(&self) -> LabelSet {
        self.labels.resolve()
    }

    /// All codebases with resolved labels.
    pub fn codebases(&self) -> Vec<Codebase> {
        self.codebases
            .iter()
            .map(|cb| Codebase {
                name: cb.name.clone(),
                repo: cb.repo.clone(),
                local_path: cb.local_path.clone(),
                default_branch: cb.default_branch.clone(),
                enabled: cb.enabled,
                labels: self.labels.resolve_with(cb.labels.as_ref()),
            })
            .collect()
    }

    /// Enabled codebases with resolved labels.
    pub fn enabled_codebases(&self) -> Vec<Codebase> {
        self.codebases().into_iter().filter(|cb| cb.enabled).collect()
    }

    pub fn codebase_by_name(&self, name: &str) -> Option<Codebase> {
        self.codebases().into_iter().find(|cb| cb.name == name)
    }

    pub fn codebase_by_repo(&self, repo: &str) -> Option<Codebase> {
        self.codebases().into_iter().find(|cb| cb.repo == repo)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            labels: LabelsConfig::default(),
            instructions: Instructions::default(),
            codebases: Vec::new(),
            config_dir: config_dir(),
        }
    }
}

/// A codebase name becomes a directory under the worktrees root.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
}

fn validate_labels(labels: &LabelSet, field: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for def in labels.iter() {
        let key = format!("{}.{}.name", field, def.role.config_key());
        if def.name.trim().is_empty() {
            return Err(Error::config(key, "is required"));
        }
        if !seen.insert(def.name.as_str()) {
            return Err(Error::config(key, format!("duplicate label name '{}'", def.name)));
        }
    }
    Ok(())
}
