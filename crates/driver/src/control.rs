//! Operator control channel.
//!
//! The serve process listens on a Unix domain socket; each connection
//! carries one JSON request per line and gets one JSON response per line.
//! The CLI subcommands are thin clients of this protocol.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use dk_domain::{Error, Result, StopKind};

use crate::ops;
use crate::state::DriverState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Input { dialog_id: String, content: String },
    Stop { dialog_id: String, reason: String },
    Resume { dialog_id: String },
    Answer { q4h_id: String, text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Err {
        message: String,
    },
}

/// Parse an operator-supplied stop reason.
pub fn parse_stop_reason(reason: &str) -> StopKind {
    match reason {
        "emergency" | "emergency_stop" => StopKind::EmergencyStop,
        "user" | "user_stop" | "" => StopKind::UserStop,
        other => StopKind::SystemStop {
            detail: other.to_owned(),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accept operator connections until the process exits.
pub async fn serve_control(state: DriverState, socket_path: &Path) -> Result<()> {
    // A stale socket file from a previous run would fail the bind.
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    tracing::info!(socket = %socket_path.display(), "control socket listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, stream).await {
                tracing::debug!(error = %e, "control connection ended with error");
            }
        });
    }
}

async fn handle_connection(state: DriverState, stream: UnixStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => dispatch(&state, request),
            Err(e) => ControlResponse::Err {
                message: format!("bad request: {e}"),
            },
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

fn dispatch(state: &DriverState, request: ControlRequest) -> ControlResponse {
    let result = match request {
        ControlRequest::Input { dialog_id, content } => {
            ops::operator_input(state, &dialog_id, &content)
        }
        ControlRequest::Stop { dialog_id, reason } => {
            ops::operator_stop(state, &dialog_id, parse_stop_reason(&reason))
        }
        ControlRequest::Resume { dialog_id } => ops::operator_resume(state, &dialog_id),
        ControlRequest::Answer { q4h_id, text } => ops::operator_answer(state, &q4h_id, &text),
    };
    match result {
        Ok(()) => ControlResponse::Ok { detail: None },
        Err(e) => ControlResponse::Err {
            message: e.to_string(),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Send one command to a running serve process.
pub async fn send_command(socket_path: &Path, request: &ControlRequest) -> Result<ControlResponse> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| {
        Error::Other(format!(
            "cannot reach driver at {}: {e} (is `dialogd serve` running?)",
            socket_path.display()
        ))
    })?;
    let (read_half, mut write_half) = stream.into_split();

    let mut out = serde_json::to_string(request)?;
    out.push('\n');
    write_half.write_all(out.as_bytes()).await?;
    write_half.shutdown().await?;

    let mut lines = BufReader::new(read_half).lines();
    match lines.next_line().await? {
        Some(line) => Ok(serde_json::from_str(&line)?),
        None => Err(Error::Other("driver closed the connection".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_parsing() {
        assert_eq!(parse_stop_reason("emergency"), StopKind::EmergencyStop);
        assert_eq!(parse_stop_reason("emergency_stop"), StopKind::EmergencyStop);
        assert_eq!(parse_stop_reason("user"), StopKind::UserStop);
        assert_eq!(parse_stop_reason(""), StopKind::UserStop);
        assert!(matches!(
            parse_stop_reason("maintenance window"),
            StopKind::SystemStop { detail } if detail == "maintenance window"
        ));
    }

    #[test]
    fn request_json_shape() {
        let request = ControlRequest::Input {
            dialog_id: "r1".into(),
            content: "hello".into(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"cmd\":\"input\""));
        let back: ControlRequest = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ControlRequest::Input { dialog_id, .. } if dialog_id == "r1"));
    }

    #[test]
    fn response_json_shape() {
        let ok = ControlResponse::Ok { detail: None };
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"status":"ok"}"#);

        let err: ControlResponse =
            serde_json::from_str(r#"{"status":"err","message":"nope"}"#).unwrap();
        assert!(matches!(err, ControlResponse::Err { message } if message == "nope"));
    }
}
