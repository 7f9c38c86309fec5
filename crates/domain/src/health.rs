//! Context-health projection.
//!
//! A pure function over the latest generation's token usage and the model's
//! configured limits. The drive loop attaches the resulting snapshot to the
//! dialog and uses `caution` to trigger a one-shot remediation prompt.

use serde::{Deserialize, Serialize};

use crate::config::ModelMeta;

/// Token usage reported by the provider for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Caution,
    Critical,
}

/// Snapshot of a dialog's context-window health after a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "availability", rename_all = "snake_case")]
pub enum ContextHealth {
    Unavailable {
        reason: String,
    },
    Available {
        prompt_tokens: u32,
        completion_tokens: u32,
        model_context_limit_tokens: u32,
        effective_optimal_max_tokens: u32,
        effective_critical_max_tokens: u32,
        level: HealthLevel,
    },
}

impl ContextHealth {
    pub fn level(&self) -> Option<HealthLevel> {
        match self {
            ContextHealth::Available { level, .. } => Some(*level),
            ContextHealth::Unavailable { .. } => None,
        }
    }
}

/// Fraction of the context limit treated as the optimal ceiling when the
/// model metadata does not pin one explicitly.
const DEFAULT_OPTIMAL_FRACTION: f64 = 0.75;
/// Same, for the critical ceiling.
const DEFAULT_CRITICAL_FRACTION: f64 = 0.9;

/// Project usage + model metadata to a health snapshot.
///
/// Without a known `context_length` the snapshot is `unavailable` and no
/// remediation is ever triggered from it.
pub fn evaluate_context_health(usage: &LlmUsage, meta: &ModelMeta) -> ContextHealth {
    let limit = match meta.context_length {
        Some(limit) if limit > 0 => limit,
        _ => {
            return ContextHealth::Unavailable {
                reason: "model_limit_unavailable".into(),
            }
        }
    };

    let optimal = meta
        .optimal_max_tokens
        .unwrap_or((limit as f64 * DEFAULT_OPTIMAL_FRACTION) as u32);
    let critical = meta
        .critical_max_tokens
        .unwrap_or((limit as f64 * DEFAULT_CRITICAL_FRACTION) as u32);

    let level = if usage.prompt_tokens > critical {
        HealthLevel::Critical
    } else if usage.prompt_tokens > optimal {
        HealthLevel::Caution
    } else {
        HealthLevel::Healthy
    };

    ContextHealth::Available {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        model_context_limit_tokens: limit,
        effective_optimal_max_tokens: optimal,
        effective_critical_max_tokens: critical,
        level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(limit: Option<u32>, optimal: Option<u32>, critical: Option<u32>) -> ModelMeta {
        ModelMeta {
            context_length: limit,
            optimal_max_tokens: optimal,
            critical_max_tokens: critical,
            ..ModelMeta::default()
        }
    }

    #[test]
    fn missing_limit_is_unavailable() {
        let h = evaluate_context_health(
            &LlmUsage {
                prompt_tokens: 100,
                completion_tokens: 5,
            },
            &meta(None, None, None),
        );
        match h {
            ContextHealth::Unavailable { reason } => {
                assert_eq!(reason, "model_limit_unavailable")
            }
            _ => panic!("expected unavailable"),
        }
    }

    #[test]
    fn healthy_under_optimal() {
        let h = evaluate_context_health(
            &LlmUsage {
                prompt_tokens: 1_000,
                completion_tokens: 50,
            },
            &meta(Some(100_000), Some(70_000), Some(90_000)),
        );
        assert_eq!(h.level(), Some(HealthLevel::Healthy));
    }

    #[test]
    fn caution_between_optimal_and_critical() {
        let h = evaluate_context_health(
            &LlmUsage {
                prompt_tokens: 75_000,
                completion_tokens: 50,
            },
            &meta(Some(100_000), Some(70_000), Some(90_000)),
        );
        assert_eq!(h.level(), Some(HealthLevel::Caution));
    }

    #[test]
    fn critical_over_critical_ceiling() {
        let h = evaluate_context_health(
            &LlmUsage {
                prompt_tokens: 90_001,
                completion_tokens: 50,
            },
            &meta(Some(100_000), Some(70_000), Some(90_000)),
        );
        assert_eq!(h.level(), Some(HealthLevel::Critical));
    }

    #[test]
    fn ceilings_default_from_context_length() {
        let h = evaluate_context_health(
            &LlmUsage {
                prompt_tokens: 80_000,
                completion_tokens: 0,
            },
            &meta(Some(100_000), None, None),
        );
        match h {
            ContextHealth::Available {
                effective_optimal_max_tokens,
                effective_critical_max_tokens,
                level,
                ..
            } => {
                assert_eq!(effective_optimal_max_tokens, 75_000);
                assert_eq!(effective_critical_max_tokens, 90_000);
                assert_eq!(level, HealthLevel::Caution);
            }
            _ => panic!("expected available"),
        }
    }

    #[test]
    fn exactly_at_ceiling_is_not_over() {
        let h = evaluate_context_health(
            &LlmUsage {
                prompt_tokens: 70_000,
                completion_tokens: 0,
            },
            &meta(Some(100_000), Some(70_000), Some(90_000)),
        );
        assert_eq!(h.level(), Some(HealthLevel::Healthy));
    }
}
