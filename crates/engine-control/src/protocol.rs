//! Wire format for the engine's control endpoint.
//!
//! Messages are newline-delimited JSON objects using serde's externally
//! tagged enum representation, e.g. `{"RequestPermissions":{}}`. The engine
//! may interleave unsolicited broadcast lines (layer changes and the like);
//! [`decode_response`] reports those as `None` so readers can skip them.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Upper bound on a single response line.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Requests we send to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClientMessage {
    /// Reachability handshake.
    Hello {},
    /// Present a session token.
    Authenticate {
        /// Shared secret.
        token: String,
        /// Free-form client label for the engine's logs.
        client_name: String,
    },
    /// Ask the engine to self-report its permission state.
    RequestPermissions {},
    /// Reload the engine's configuration from disk.
    Reload {},
    /// Restart the engine's event loop.
    Restart {},
}

/// Permission state as reported by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePermissions {
    /// Raw accessibility field, e.g. `"granted"`.
    pub accessibility: String,
    /// Raw input monitoring field.
    pub input_monitoring: String,
}

/// Responses the engine may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake answer.
    HelloOk {
        /// Engine version string.
        version: String,
        /// Advertised optional features.
        #[serde(default)]
        capabilities: Vec<String>,
    },
    /// Outcome of an `Authenticate` request.
    AuthResult {
        /// Whether the token was accepted.
        success: bool,
    },
    /// Answer to `RequestPermissions`.
    Permissions(EnginePermissions),
    /// Generic acknowledgement for commands.
    Status {
        /// Whether the command succeeded.
        ok: bool,
        /// Optional human-readable detail.
        #[serde(default)]
        message: Option<String>,
    },
    /// Request-level failure.
    Error {
        /// Failure description.
        msg: String,
    },
}

/// Encode a request as a single line, including the trailing newline.
pub fn encode_request(msg: &ClientMessage) -> Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one response line.
///
/// Returns `Ok(None)` for well-formed JSON that is not a response we know
/// (broadcasts), and an error for anything that is not JSON at all.
pub fn decode_response(line: &str) -> Result<Option<ServerMessage>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_LINE_BYTES {
        return Err(Error::Protocol(format!(
            "response line of {} bytes exceeds limit",
            trimmed.len()
        )));
    }
    match serde_json::from_str::<ServerMessage>(trimmed) {
        Ok(msg) => Ok(Some(msg)),
        Err(_) => {
            // Valid JSON we don't model is a broadcast; garbage is an error.
            let _: serde_json::Value = serde_json::from_str(trimmed)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_external_tagging() {
        assert_eq!(
            encode_request(&ClientMessage::RequestPermissions {}).unwrap(),
            "{\"RequestPermissions\":{}}\n"
        );
        let auth = encode_request(&ClientMessage::Authenticate {
            token: "t".into(),
            client_name: "keygate".into(),
        })
        .unwrap();
        assert_eq!(
            auth,
            "{\"Authenticate\":{\"token\":\"t\",\"client_name\":\"keygate\"}}\n"
        );
    }

    #[test]
    fn decodes_permissions_and_skips_broadcasts() {
        let msg = decode_response(
            r#"{"Permissions":{"accessibility":"granted","input_monitoring":"Denied"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Some(ServerMessage::Permissions(EnginePermissions {
                accessibility: "granted".into(),
                input_monitoring: "Denied".into(),
            }))
        );
        assert_eq!(
            decode_response(r#"{"LayerChange":{"new":"base"}}"#).unwrap(),
            None
        );
        assert_eq!(decode_response("   ").unwrap(), None);
        assert!(decode_response("not json").is_err());
    }

    #[test]
    fn status_message_defaults() {
        let msg = decode_response(r#"{"Status":{"ok":true}}"#).unwrap();
        assert_eq!(
            msg,
            Some(ServerMessage::Status {
                ok: true,
                message: None
            })
        );
    }
}
