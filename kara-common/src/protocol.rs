//! Control protocol: inbound envelopes and commands
//!
//! Inbound messages are `{action, payload?}` JSON objects. Decoding is
//! defensive: one known client sometimes double-encodes the envelope, either
//! as a JSON string or nested inside the `action` field. [`decode`] undoes
//! those encodings with an ordered chain of pure unwrapping steps before
//! validating the result.
//!
//! The unwrapping chain is a compatibility shim for that client and can be
//! removed once it sends plain envelopes. Why the double encoding happens is
//! not known.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Inbound decoding failures
///
/// These are protocol errors: the message is logged and dropped without a
/// reply.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Raw bytes are not JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Decoded value is not a JSON object
    #[error("message is not an object")]
    NotAnObject,

    /// Object has no non-empty string `action`
    #[error("message missing action field")]
    MissingAction,
}

/// Structurally valid payload errors for known actions
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("Invalid {action} payload: {reason}")]
    InvalidPayload { action: String, reason: String },
}

/// Decoded `{action, payload}` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(action: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }

    /// Serialize for the wire
    pub fn encode(&self) -> String {
        // Serializing a String + Value cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `Ok` with the unwrapped value, or `Err` handing the input back untouched
type UnwrapStep = fn(Value) -> Result<Value, Value>;

/// Unwrapping steps, applied in order
const UNWRAP_CHAIN: [(&str, UnwrapStep); 4] = [
    ("string-encoded envelope", unwrap_string_envelope),
    ("envelope nested in action", unwrap_nested_action),
    ("single-key encoded envelope", unwrap_single_key_envelope),
    ("braced action fallback", unwrap_braced_action),
];

/// Decode raw bytes into an [`Envelope`]
pub fn decode(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let mut value: Value = serde_json::from_slice(raw)?;

    for (name, step) in UNWRAP_CHAIN {
        value = match step(value) {
            Ok(unwrapped) => {
                debug!("Unwrapped {}", name);
                unwrapped
            }
            Err(unchanged) => unchanged,
        };
    }

    validate(value)
}

fn validate(value: Value) -> Result<Envelope, DecodeError> {
    let Value::Object(mut object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let action = match object.remove("action") {
        Some(Value::String(action)) if !action.is_empty() => action,
        _ => return Err(DecodeError::MissingAction),
    };

    let payload = match object.remove("payload") {
        None | Some(Value::Null) => None,
        Some(payload) => Some(payload),
    };

    Ok(Envelope { action, payload })
}

fn action_str(value: &Value) -> Option<&str> {
    value.get("action").and_then(Value::as_str)
}

/// JavaScript-style truthiness, used to judge decoded candidates
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn has_action_and_payload(value: &Value) -> bool {
    truthy(value.get("action")) && truthy(value.get("payload"))
}

/// The whole message was serialized twice: parse the inner string
fn unwrap_string_envelope(value: Value) -> Result<Value, Value> {
    if let Value::String(inner) = &value {
        if let Ok(decoded) = serde_json::from_str::<Value>(inner) {
            return Ok(decoded);
        }
    }
    Err(value)
}

/// The real envelope was serialized into the `action` field
fn unwrap_nested_action(value: Value) -> Result<Value, Value> {
    if let Some(action) = action_str(&value) {
        if action.starts_with('{') {
            if let Ok(decoded) = serde_json::from_str::<Value>(action) {
                return Ok(decoded);
            }
        }
    }
    Err(value)
}

/// A lone `action` key whose text mentions `"action"`
fn unwrap_single_key_envelope(value: Value) -> Result<Value, Value> {
    let single_key = value.as_object().map(Map::len) == Some(1);
    if let Some(action) = action_str(&value) {
        if single_key && action.contains("\"action\"") {
            if let Ok(decoded) = serde_json::from_str::<Value>(action) {
                if has_action_and_payload(&decoded) {
                    return Ok(decoded);
                }
            }
        }
    }
    Err(value)
}

/// Last attempt: an `action` that is still a braced JSON object
fn unwrap_braced_action(value: Value) -> Result<Value, Value> {
    if let Some(action) = action_str(&value).map(str::trim) {
        if action.starts_with('{') && action.ends_with('}') {
            if let Ok(decoded) = serde_json::from_str::<Value>(action) {
                if has_action_and_payload(&decoded) {
                    return Ok(decoded);
                }
            }
        }
    }
    Err(value)
}

/// Typed control commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadSong {
        song_id: String,
        input_device: Option<String>,
        output_device: Option<String>,
    },
    StartSession,
    StopSession,
    Pause,
    Resume,
    RefreshSongs,
    SetVoiceEffect { effect: String, value: Value },
    SetVoiceEffects { effects: Map<String, Value> },
    SetVoicePreset { preset: String },
    /// Action not recognized; ignored by the dispatcher
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadSongPayload {
    song_id: Option<String>,
    input_device: Option<String>,
    output_device: Option<String>,
}

#[derive(Deserialize)]
struct SetVoiceEffectPayload {
    effect: Option<String>,
    value: Option<Value>,
}

#[derive(Deserialize)]
struct SetVoicePresetPayload {
    preset: Option<String>,
}

impl Command {
    /// Parse a decoded envelope into a command
    pub fn from_envelope(envelope: &Envelope) -> Result<Command, CommandError> {
        let action = envelope.action.as_str();
        let invalid = |reason: &str| CommandError::InvalidPayload {
            action: action.to_string(),
            reason: reason.to_string(),
        };
        let payload = || envelope.payload.clone().unwrap_or(Value::Null);

        let command = match action {
            "load_song" => {
                let parsed: LoadSongPayload = serde_json::from_value(payload())
                    .map_err(|_| invalid("expected {songId, inputDevice?, outputDevice?}"))?;
                let song_id = parsed
                    .song_id
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| invalid("missing songId"))?;
                Command::LoadSong {
                    song_id,
                    input_device: parsed.input_device.filter(|d| !d.is_empty()),
                    output_device: parsed.output_device.filter(|d| !d.is_empty()),
                }
            }
            "start_session" => Command::StartSession,
            "stop_session" => Command::StopSession,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "refresh_songs" => Command::RefreshSongs,
            "set_voice_effect" => {
                let parsed: SetVoiceEffectPayload = serde_json::from_value(payload())
                    .map_err(|_| invalid("expected {effect, value}"))?;
                Command::SetVoiceEffect {
                    effect: parsed.effect.ok_or_else(|| invalid("missing effect"))?,
                    value: parsed.value.ok_or_else(|| invalid("missing value"))?,
                }
            }
            "set_voice_effects" => match payload() {
                Value::Object(effects) => Command::SetVoiceEffects { effects },
                _ => return Err(invalid("expected an object of effects")),
            },
            "set_voice_preset" => {
                let parsed: SetVoicePresetPayload = serde_json::from_value(payload())
                    .map_err(|_| invalid("expected {preset}"))?;
                Command::SetVoicePreset {
                    preset: parsed.preset.ok_or_else(|| invalid("missing preset"))?,
                }
            }
            other => Command::Unknown(other.to_string()),
        };

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_str(raw: &str) -> Result<Envelope, DecodeError> {
        decode(raw.as_bytes())
    }

    #[test]
    fn test_plain_envelope() {
        let envelope = decode_str(r#"{"action":"load_song","payload":{"songId":"X"}}"#).unwrap();
        assert_eq!(envelope.action, "load_song");
        assert_eq!(envelope.payload, Some(json!({"songId": "X"})));
    }

    #[test]
    fn test_envelope_without_payload() {
        let envelope = decode_str(r#"{"action":"start_session"}"#).unwrap();
        assert_eq!(envelope.action, "start_session");
        assert_eq!(envelope.payload, None);
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(matches!(decode_str("{not json"), Err(DecodeError::InvalidJson(_))));
    }

    #[test]
    fn test_string_encoded_envelope() {
        let inner = r#"{"action":"pause"}"#;
        let raw = serde_json::to_string(inner).unwrap();
        assert_eq!(decode_str(&raw).unwrap().action, "pause");
    }

    #[test]
    fn test_envelope_nested_in_action_field() {
        let inner = r#"{"action":"set_voice_preset","payload":{"preset":"Robot"}}"#;
        let raw = json!({ "action": inner }).to_string();

        let envelope = decode_str(&raw).unwrap();
        assert_eq!(envelope.action, "set_voice_preset");
        assert_eq!(envelope.payload, Some(json!({"preset": "Robot"})));
    }

    #[test]
    fn test_string_then_nested_action() {
        let inner = r#"{"action":"resume","payload":{}}"#;
        let outer = json!({ "action": inner }).to_string();
        let raw = serde_json::to_string(&outer).unwrap();

        assert_eq!(decode_str(&raw).unwrap().action, "resume");
    }

    #[test]
    fn test_braced_action_with_padding_uses_fallback() {
        let inner = r#"  {"action":"load_song","payload":{"songId":"Y"}}  "#;
        let raw = json!({ "action": inner, "extra": 1 }).to_string();

        let envelope = decode_str(&raw).unwrap();
        assert_eq!(envelope.action, "load_song");
        assert_eq!(envelope.payload, Some(json!({"songId": "Y"})));
    }

    #[test]
    fn test_unwrapping_is_idempotent_on_well_formed_envelopes() {
        let raw = r#"{"action":"refresh_songs","payload":{"note":"{\"action\":1}"}}"#;
        let envelope = decode_str(raw).unwrap();
        assert_eq!(envelope.action, "refresh_songs");
        assert_eq!(envelope.payload, Some(json!({"note": "{\"action\":1}"})));
    }

    #[test]
    fn test_steps_report_whether_they_unwrapped() {
        let plain = json!({"action": "pause", "payload": {"at": 3}});
        for (name, step) in UNWRAP_CHAIN {
            assert_eq!(step(plain.clone()), Err(plain.clone()), "{}", name);
        }

        let nested = json!({"action": "{\"action\":\"resume\"}"});
        assert_eq!(unwrap_nested_action(nested), Ok(json!({"action": "resume"})));

        let encoded = Value::String(plain.to_string());
        assert_eq!(unwrap_string_envelope(encoded), Ok(plain));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(decode_str("[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_str("42"), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn test_missing_or_empty_action_is_rejected() {
        assert!(matches!(decode_str(r#"{"payload":{}}"#), Err(DecodeError::MissingAction)));
        assert!(matches!(decode_str(r#"{"action":""}"#), Err(DecodeError::MissingAction)));
        assert!(matches!(decode_str(r#"{"action":7}"#), Err(DecodeError::MissingAction)));
    }

    #[test]
    fn test_load_song_command() {
        let envelope = Envelope::new(
            "load_song",
            Some(json!({"songId": "X", "inputDevice": "usb_mic", "outputDevice": ""})),
        );
        assert_eq!(
            Command::from_envelope(&envelope).unwrap(),
            Command::LoadSong {
                song_id: "X".to_string(),
                input_device: Some("usb_mic".to_string()),
                output_device: None,
            }
        );
    }

    #[test]
    fn test_load_song_requires_song_id() {
        let envelope = Envelope::new("load_song", Some(json!({})));
        assert!(Command::from_envelope(&envelope).is_err());
    }

    #[test]
    fn test_effect_commands() {
        let single = Envelope::new("set_voice_effect", Some(json!({"effect": "autotune", "value": 0.4})));
        assert_eq!(
            Command::from_envelope(&single).unwrap(),
            Command::SetVoiceEffect {
                effect: "autotune".to_string(),
                value: json!(0.4)
            }
        );

        let many = Envelope::new("set_voice_effects", Some(json!({"pitch_shift": 2})));
        assert!(matches!(
            Command::from_envelope(&many).unwrap(),
            Command::SetVoiceEffects { .. }
        ));

        let bad = Envelope::new("set_voice_effects", Some(json!([1])));
        assert!(Command::from_envelope(&bad).is_err());
    }

    #[test]
    fn test_unknown_action() {
        let envelope = Envelope::new("dance", None);
        assert_eq!(
            Command::from_envelope(&envelope).unwrap(),
            Command::Unknown("dance".to_string())
        );
    }

    #[test]
    fn test_encode_omits_missing_payload() {
        assert_eq!(Envelope::new("pause", None).encode(), r#"{"action":"pause"}"#);
    }
}
