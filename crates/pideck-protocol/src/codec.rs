//! ProtocolCodec: schema-versioned (de)serialization of mutations,
//! deltas, snapshots, and client/server messages.
//!
//! The wire format is plain JSON text frames, wrapped in a thin envelope
//! carrying `protocolVersion` so a future breaking change can be detected
//! by a client before it tries to interpret a payload it doesn't
//! understand. Forward compatibility for *values* of a known shape is
//! handled by keeping every new field optional, so an older decoder simply
//! sees it as absent; a genuinely unknown mutation `kind` still decodes
//! successfully, as `Mutation::Unknown`, rather than failing the whole
//! frame — `pideck-state` is what rejects it, with a logged warning.

use serde::{Deserialize, Serialize};

use crate::model::GlobalState;
use crate::mutation::Mutation;

/// Current wire schema version. Bumped on breaking changes to the envelope
/// or to any message family; additive (new optional field, new enum
/// variant) changes do not require a bump.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version {0}, expected {PROTOCOL_VERSION}")]
    UnsupportedVersion(u32),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A versioned log/broadcast entry: `(version, mutation)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub version: u64,
    pub mutation: Mutation,
}

/// A version-stamped copy of the complete state, used for catch-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub state: GlobalState,
}

/// Self-describing envelope: `{ protocolVersion, type, payload }`. `T` is normally [`crate::ClientMessage`] or [`crate::ServerMessage`],
/// both of which already carry their own internal `type` tag — so in
/// practice the envelope's `type` mirrors the inner tag and is mostly useful
/// for a client to reject an envelope whose `protocolVersion` it doesn't
/// understand before even looking at `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub protocol_version: u32,
    #[serde(flatten)]
    pub payload: T,
}

pub fn encode<T: Serialize>(payload: &T) -> Result<String, ProtocolError> {
    let envelope = Envelope {
        protocol_version: PROTOCOL_VERSION,
        payload,
    };
    Ok(serde_json::to_string(&envelope)?)
}

pub fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if let Some(v) = value.get("protocolVersion").and_then(|v| v.as_u64()) {
        if v as u32 != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(v as u32));
        }
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientMessage, ServerMessage};

    #[test]
    fn hello_round_trips_through_envelope() {
        let msg = ClientMessage::Hello {
            client_id: Some("tab-1".into()),
            resume_from_version: Some(42),
        };
        let text = encode(&msg).unwrap();
        assert!(text.contains("\"protocolVersion\":1"));
        let back: ClientMessage = decode(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unsupported_protocol_version_is_rejected() {
        let text = r#"{"protocolVersion":99,"type":"ack","version":1}"#;
        let err = decode::<ClientMessage>(text).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(99)));
    }

    #[test]
    fn error_message_serializes_with_camel_case_fields() {
        let msg = ServerMessage::error_for(
            "path_not_allowed",
            "not allowed",
            crate::WorkspaceId("ws-1".into()),
        );
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"workspaceId\":\"ws-1\""));
    }

    #[test]
    fn a_delta_with_an_unrecognized_mutation_kind_decodes_instead_of_failing() {
        let text = r#"{"version":7,"mutation":{"kind":"futureMutation","wsId":"ws-1","angle":3}}"#;
        let delta: Delta = serde_json::from_str(text).unwrap();
        match delta.mutation {
            crate::Mutation::Unknown { kind, raw } => {
                assert_eq!(kind, "futureMutation");
                assert_eq!(raw["wsId"], "ws-1");
            }
            other => panic!("expected Mutation::Unknown, got {other:?}"),
        }
    }

    #[test]
    fn an_unknown_mutation_round_trips_its_raw_body_unchanged() {
        let text = r#"{"kind":"futureMutation","wsId":"ws-1","angle":3}"#;
        let mutation: crate::Mutation = serde_json::from_str(text).unwrap();
        let back = serde_json::to_string(&mutation).unwrap();
        let original: serde_json::Value = serde_json::from_str(text).unwrap();
        let round_tripped: serde_json::Value = serde_json::from_str(&back).unwrap();
        assert_eq!(original, round_tripped);
    }
}
