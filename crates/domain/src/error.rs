use crate::runstate::StopKind;

/// Shared error type used across all driver crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The dialog's abort signal fired. Carries the stop reason recorded in
    /// the run-state registry at the time the stop was requested.
    #[error("interrupted: {0}")]
    Interrupted(StopKind),

    /// Transport-level LLM failure (connection reset, hang-up, timeout).
    #[error("LLM transport: {0}")]
    Transport(String),

    /// HTTP-level LLM failure with a status code.
    #[error("LLM HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The provider rejected the request (non-retriable 4xx).
    #[error("LLM failed: {0}")]
    LlmRejected(String),

    /// Unclassifiable LLM failure.
    #[error("LLM failed: {0}")]
    LlmFatal(String),

    #[error("config: {0}")]
    Config(String),

    /// The dialog is locked by another drive and the caller declined to wait.
    #[error("dialog busy: {0}")]
    Busy(String),

    /// Drive preflight refused to run (dead, stop-requested, interrupted
    /// without resume, or blocked without fresh input).
    #[error("drive refused: {0}")]
    DriveRefused(String),

    /// A reply was about to be delivered upstream without a valid assistant
    /// saying to deliver.
    #[error("supply invariant: {0}")]
    SupplyInvariant(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when this error came from the abort signal rather than a fault.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_carries_reason() {
        let e = Error::Interrupted(StopKind::EmergencyStop);
        assert!(e.is_interrupted());
        assert_eq!(e.to_string(), "interrupted: emergency_stop");
    }

    #[test]
    fn http_error_display() {
        let e = Error::Http {
            status: 503,
            message: "overloaded".into(),
        };
        assert_eq!(e.to_string(), "LLM HTTP 503: overloaded");
        assert!(!e.is_interrupted());
    }

    #[test]
    fn system_stop_detail_in_display() {
        let e = Error::Interrupted(StopKind::SystemStop {
            detail: "provider gone".into(),
        });
        assert!(e.to_string().contains("provider gone"));
    }
}
