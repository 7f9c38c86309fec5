//! Configuration schema for the `.minds/` inputs.
//!
//! Types only — the YAML loading and file-fallback resolution live in the
//! minds crate. Defaults follow serde-default helper functions so a partial
//! file deserializes to a usable config.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Team configuration (.minds/team.yaml)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TeamConfig {
    #[serde(default)]
    pub members: Vec<MemberConfig>,
    #[serde(default)]
    pub defaults: TeamDefaults,
    /// Members allowed to see shell tools. Hidden members always are.
    #[serde(default)]
    pub shell_specialists: Vec<String>,
}

impl TeamConfig {
    pub fn member(&self, id: &str) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Effective diligence-push budget ceiling for a member.
    pub fn diligence_push_max(&self, id: &str) -> i64 {
        self.member(id)
            .and_then(|m| m.diligence_push_max)
            .unwrap_or(self.defaults.diligence_push_max)
    }

    /// Effective model id for a member, falling back to the team default.
    pub fn model_for(&self, id: &str) -> Option<&str> {
        self.member(id)
            .and_then(|m| m.model.as_deref())
            .or(self.defaults.model.as_deref())
    }

    pub fn is_shell_specialist(&self, id: &str) -> bool {
        self.shell_specialists.iter().any(|s| s == id)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.members.is_empty() {
            issues.push(ConfigIssue::error("team: no members configured"));
        }
        let mut seen = std::collections::HashSet::new();
        for member in &self.members {
            if member.id.is_empty() {
                issues.push(ConfigIssue::error("team: member with empty id"));
            }
            if !seen.insert(member.id.as_str()) {
                issues.push(ConfigIssue::error(format!(
                    "team: duplicate member id '{}'",
                    member.id
                )));
            }
        }
        for specialist in &self.shell_specialists {
            if self.member(specialist).is_none() {
                issues.push(ConfigIssue::warning(format!(
                    "team: shell specialist '{specialist}' is not a member"
                )));
            }
        }
        issues
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Model id (key into `llm.yaml` models). None = team default.
    #[serde(default)]
    pub model: Option<String>,
    /// Per-member diligence-push ceiling override.
    #[serde(default)]
    pub diligence_push_max: Option<i64>,
    /// Hidden members do not appear in the roster shown to teammates and
    /// bypass the shell-specialist filter.
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub disable_diligence_push: bool,
    /// Fresh-boots reasoning: every generation must produce at least one
    /// tool call; a tool-less generation is a policy violation.
    #[serde(default)]
    pub fresh_boots_reasoning: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDefaults {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_0i")]
    pub diligence_push_max: i64,
    /// BCP-47-ish language code preferred for personas and prompts.
    #[serde(default)]
    pub language: Option<String>,
    /// Member that owns operator-opened root dialogs. Falls back to the
    /// first configured member.
    #[serde(default)]
    pub root_agent: Option<String>,
}

impl Default for TeamDefaults {
    fn default() -> Self {
        Self {
            model: None,
            diligence_push_max: 0,
            language: None,
            root_agent: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM configuration (.minds/llm.yaml)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    /// Model used when neither the member nor the team pins one.
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Model id → metadata.
    #[serde(default)]
    pub models: HashMap<String, ModelMeta>,
}

impl LlmConfig {
    pub fn model(&self, id: &str) -> Option<&ModelMeta> {
        self.models.get(id)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.models.is_empty() {
            issues.push(ConfigIssue::error("llm: no models configured"));
        }
        if let Some(default) = &self.default_model {
            if !self.models.contains_key(default) {
                issues.push(ConfigIssue::error(format!(
                    "llm: default_model '{default}' is not in models"
                )));
            }
        }
        for (id, meta) in &self.models {
            if let (Some(optimal), Some(critical)) =
                (meta.optimal_max_tokens, meta.critical_max_tokens)
            {
                if optimal > critical {
                    issues.push(ConfigIssue::warning(format!(
                        "llm: model '{id}' optimal_max_tokens exceeds critical_max_tokens"
                    )));
                }
            }
        }
        issues
    }
}

/// Metadata for one configured model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelMeta {
    /// Provider id this model is served by (informational here).
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub optimal_max_tokens: Option<u32>,
    #[serde(default)]
    pub critical_max_tokens: Option<u32>,
    /// How many generations between repeated caution prompts. The driver
    /// additionally caps remediation at once per dialog instance.
    #[serde(default = "d_1u")]
    pub caution_remediation_cadence_generations: u32,
}

/// Retry policy for LLM invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_2u")]
    pub max_retries: u32,
    #[serde(default = "d_500u64")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "d_2f")]
    pub retry_backoff_multiplier: f64,
    #[serde(default = "d_30000u64")]
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_initial_delay_ms: 500,
            retry_backoff_multiplier: 2.0,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Backoff delay for the given attempt number (0-indexed), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let base = self.retry_initial_delay_ms as f64;
        let delay = base * self.retry_backoff_multiplier.powi(attempt as i32);
        let capped = delay.min(self.retry_max_delay_ms as f64);
        std::time::Duration::from_millis(capped as u64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_0i() -> i64 {
    0
}
fn d_1u() -> u32 {
    1
}
fn d_2u() -> u32 {
    2
}
fn d_2f() -> f64 {
    2.0
}
fn d_500u64() -> u64 {
    500
}
fn d_30000u64() -> u64 {
    30_000
}
