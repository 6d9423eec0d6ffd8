//! Inbound webhook payload schema and user-text extraction.
//!
//! Parsing never fails: anything unusable becomes
//! [`InboundTranscript::Malformed`], which normalizes to empty text and
//! therefore classifies as Low with no matches.

use serde_json::Value;

use crate::types::{Speaker, Transcript, Turn};

/// Conversation fields lifted out of a webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    pub conversation_id: Option<String>,
    pub transcript: InboundTranscript,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTranscript {
    Valid(Transcript),
    Malformed { reason: String },
}

impl InboundTranscript {
    /// User-only normalized text; empty for a malformed transcript.
    pub fn normalized_text(&self) -> String {
        match self {
            InboundTranscript::Valid(t) => normalize(t),
            InboundTranscript::Malformed { .. } => String::new(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, InboundTranscript::Malformed { .. })
    }
}

impl InboundPayload {
    fn malformed(conversation_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            conversation_id,
            transcript: InboundTranscript::Malformed { reason: reason.into() },
        }
    }
}

/// Parse a raw webhook body.
pub fn parse_payload(body: &[u8]) -> InboundPayload {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => parse_value(&value),
        Err(e) => InboundPayload::malformed(None, format!("body is not JSON: {e}")),
    }
}

/// Parse an already-decoded webhook body. Accepts the fields at the top
/// level or nested in a post-call `data` envelope.
pub fn parse_value(value: &Value) -> InboundPayload {
    let Some(root) = value.as_object() else {
        return InboundPayload::malformed(None, "body is not a JSON object");
    };
    let fields = match root.get("data").and_then(Value::as_object) {
        Some(data) if !root.contains_key("transcript") => data,
        _ => root,
    };

    let conversation_id = fields
        .get("conversation_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    let turns = match fields.get("transcript") {
        None | Some(Value::Null) => {
            return InboundPayload::malformed(conversation_id, "transcript missing");
        }
        Some(Value::Array(turns)) => turns,
        Some(_) => {
            return InboundPayload::malformed(conversation_id, "transcript is not an array");
        }
    };

    let transcript = Transcript {
        turns: turns.iter().filter_map(parse_turn).collect(),
    };
    InboundPayload {
        conversation_id,
        transcript: InboundTranscript::Valid(transcript),
    }
}

/// A turn survives only with a recognized role and a string message.
fn parse_turn(value: &Value) -> Option<Turn> {
    let speaker = match value.get("role")?.as_str()? {
        "user" => Speaker::User,
        "agent" => Speaker::Agent,
        _ => return None,
    };
    let text = value.get("message")?.as_str()?.to_owned();
    Some(Turn { speaker, text })
}

/// Space-joined, lower-cased user turns in original order. Agent text never
/// contributes.
pub fn normalize(transcript: &Transcript) -> String {
    transcript
        .turns
        .iter()
        .filter(|t| t.speaker == Speaker::User)
        .map(|t| t.text.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
