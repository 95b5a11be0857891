use crate::analysis::CommandAnalyzer;
use crate::error::{MenderError, Result};
use crate::paths;
use crate::store::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Overrides the detected host name in evidence and messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_command_poll")]
    pub command_poll_secs: u64,
    /// Plans older than this are re-checked against fresh evidence before
    /// they run.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_check_interval() -> u64 {
    300
}

fn default_command_poll() -> u64 {
    30
}

fn default_stale_after() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            check_interval_secs: default_check_interval(),
            command_poll_secs: default_command_poll(),
            stale_after_secs: default_stale_after(),
            dry_run: false,
        }
    }
}

// ---------------------------------------------------------------------------
// DedupConfig / SafetyConfig / StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_suppress_hours")]
    pub suppress_hours: f64,
}

fn default_suppress_hours() -> f64 {
    2.0
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            suppress_hours: default_suppress_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_fixes")]
    pub max_fixes_per_hour: usize,
    /// Services that must never be restarted, stopped or removed by a plan.
    #[serde(default)]
    pub never_restart: Vec<String>,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
    #[serde(default = "default_stdout_limit")]
    pub stdout_limit: usize,
    #[serde(default = "default_stderr_limit")]
    pub stderr_limit: usize,
}

fn default_max_fixes() -> usize {
    3
}

fn default_check_timeout() -> u64 {
    30
}

fn default_stdout_limit() -> usize {
    5000
}

fn default_stderr_limit() -> usize {
    1000
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_fixes_per_hour: default_max_fixes(),
            never_restart: Vec::new(),
            check_timeout_secs: default_check_timeout(),
            stdout_limit: default_stdout_limit(),
            stderr_limit: default_stderr_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
}

// ---------------------------------------------------------------------------
// AnalysisConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_command")]
    pub command: String,
    /// `{prompt}` is replaced by the prompt; without it the prompt goes to stdin.
    #[serde(default = "CommandAnalyzer::default_args")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_analysis_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub fallback_playbooks: bool,
}

fn default_analysis_command() -> String {
    "claude".to_string()
}

fn default_analysis_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            command: default_analysis_command(),
            args: CommandAnalyzer::default_args(),
            model: None,
            timeout_secs: default_analysis_timeout(),
            fallback_playbooks: true,
        }
    }
}

impl AnalysisConfig {
    /// The command with a leading `~/` expanded to the home directory.
    pub fn resolved_command(&self) -> String {
        expand_home(&self.command)
    }
}

// ---------------------------------------------------------------------------
// CollectorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub name: String,
    pub command: String,
    #[serde(default = "default_collector_timeout")]
    pub timeout_secs: u64,
}

fn default_collector_timeout() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Notifications / commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Sending account.
    pub number: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub url: String,
    pub number: String,
    /// Senders allowed to issue commands.
    #[serde(default)]
    pub authorized: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            agent: AgentConfig::default(),
            dedup: DedupConfig::default(),
            safety: SafetyConfig::default(),
            store: StoreConfig::default(),
            analysis: AnalysisConfig::default(),
            collectors: Vec::new(),
            notifications: NotificationsConfig::default(),
            commands: CommandsConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(MenderError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.agent.check_interval_secs)
    }

    pub fn command_poll(&self) -> Duration {
        Duration::from_secs(self.agent.command_poll_secs)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.agent.check_interval_secs == 0 {
            warnings.push(ConfigWarning::error("agent.check_interval_secs must be positive"));
        }
        if self.agent.command_poll_secs == 0 {
            warnings.push(ConfigWarning::error("agent.command_poll_secs must be positive"));
        }
        if self.agent.stale_after_secs == 0 {
            warnings.push(ConfigWarning::warning(
                "agent.stale_after_secs is 0: every approval re-collects evidence first",
            ));
        }
        if self.dedup.suppress_hours.is_nan() || self.dedup.suppress_hours <= 0.0 {
            warnings.push(ConfigWarning::error("dedup.suppress_hours must be positive"));
        }
        if self.safety.max_fixes_per_hour == 0 {
            warnings.push(ConfigWarning::warning(
                "safety.max_fixes_per_hour is 0: no plan will ever execute",
            ));
        }

        if self.collectors.is_empty() {
            warnings.push(ConfigWarning::warning(
                "no collectors configured: evidence cycles will never find issues",
            ));
        }
        let mut names = HashSet::new();
        for c in &self.collectors {
            if c.command.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "collector '{}' has an empty command",
                    c.name
                )));
            }
            if !names.insert(c.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "collector name '{}' is used more than once",
                    c.name
                )));
            }
        }

        if which::which(self.analysis.resolved_command()).is_err() {
            let message = if self.analysis.fallback_playbooks {
                format!(
                    "analysis command '{}' not found; only built-in playbooks will be used",
                    self.analysis.command
                )
            } else {
                format!(
                    "analysis command '{}' not found and playbooks are disabled",
                    self.analysis.command
                )
            };
            warnings.push(ConfigWarning::warning(message));
        }

        if let Some(hook) = &self.notifications.webhook {
            if hook.url.trim().is_empty() {
                warnings.push(ConfigWarning::error("notifications.webhook.url is empty"));
            }
            if hook.recipients.is_empty() {
                warnings.push(ConfigWarning::error(
                    "notifications.webhook.recipients is empty",
                ));
            }
        }

        if let Some(signal) = &self.commands.signal {
            if signal.url.trim().is_empty() {
                warnings.push(ConfigWarning::error("commands.signal.url is empty"));
            }
            if signal.authorized.is_empty() {
                warnings.push(ConfigWarning::warning(
                    "commands.signal.authorized is empty: all inbound commands will be ignored",
                ));
            }
        }

        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}

fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => home::home_dir()
            .map(|h| h.join(rest).to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string()),
        None => path.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
