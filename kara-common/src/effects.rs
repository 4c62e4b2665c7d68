//! Voice effect parameters
//!
//! The engine's tunable parameters, split by mutation cost:
//! - **Hot** keys reach a running engine through the parameter file
//! - **Cold** keys only take effect when the engine is relaunched
//!
//! Wire names are the snake_case field names of [`VoiceEffectSet`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Effect update errors
#[derive(Debug, Error, PartialEq)]
pub enum EffectError {
    /// Effect name not recognized
    #[error("Unknown voice effect: {0}")]
    UnknownEffect(String),

    /// Value has the wrong type or is not finite
    #[error("Invalid value for {effect}: {reason}")]
    InvalidValue { effect: String, reason: String },

    /// Preset name not recognized
    #[error("Unknown voice preset: {0}")]
    UnknownPreset(String),
}

/// Mutation cost class of an effect key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectClass {
    /// Propagated through the parameter file, no restart
    Hot,
    /// Requires relaunching the engine
    Cold,
}

/// Names of the individual effect parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKey {
    Autotune,
    PitchShift,
    VoiceVolume,
    InstrumentVolume,
    EnableChorus,
    ChorusDepth,
    EnableReverb,
    ReverbWetness,
}

impl EffectKey {
    pub const ALL: [EffectKey; 8] = [
        EffectKey::Autotune,
        EffectKey::PitchShift,
        EffectKey::VoiceVolume,
        EffectKey::InstrumentVolume,
        EffectKey::EnableChorus,
        EffectKey::ChorusDepth,
        EffectKey::EnableReverb,
        EffectKey::ReverbWetness,
    ];

    /// Wire name of the key
    pub fn name(self) -> &'static str {
        match self {
            EffectKey::Autotune => "autotune",
            EffectKey::PitchShift => "pitch_shift",
            EffectKey::VoiceVolume => "voice_volume",
            EffectKey::InstrumentVolume => "instrument_volume",
            EffectKey::EnableChorus => "enable_chorus",
            EffectKey::ChorusDepth => "chorus_depth",
            EffectKey::EnableReverb => "enable_reverb",
            EffectKey::ReverbWetness => "reverb_wetness",
        }
    }

    pub fn class(self) -> EffectClass {
        match self {
            EffectKey::Autotune
            | EffectKey::PitchShift
            | EffectKey::VoiceVolume
            | EffectKey::InstrumentVolume => EffectClass::Hot,
            EffectKey::EnableChorus
            | EffectKey::ChorusDepth
            | EffectKey::EnableReverb
            | EffectKey::ReverbWetness => EffectClass::Cold,
        }
    }

    /// Key used in the parameter file, `None` for cold keys
    ///
    /// Note that `autotune` is stored as `autotune_strength`.
    pub fn param_key(self) -> Option<&'static str> {
        match self {
            EffectKey::Autotune => Some("autotune_strength"),
            EffectKey::PitchShift => Some("pitch_shift"),
            EffectKey::VoiceVolume => Some("voice_volume"),
            EffectKey::InstrumentVolume => Some("instrument_volume"),
            _ => None,
        }
    }

    /// Engine launch flag for this key
    pub fn launch_flag(self) -> &'static str {
        match self {
            EffectKey::Autotune => "--autotune",
            EffectKey::PitchShift => "--pitch-shift",
            EffectKey::VoiceVolume => "--voice-volume",
            EffectKey::InstrumentVolume => "--instrument-volume",
            EffectKey::EnableChorus => "--enable-chorus",
            EffectKey::ChorusDepth => "--chorus-depth",
            EffectKey::EnableReverb => "--enable-reverb",
            EffectKey::ReverbWetness => "--reverb-wetness",
        }
    }

    /// Whether the key holds an on/off flag rather than a number
    pub fn is_flag(self) -> bool {
        matches!(self, EffectKey::EnableChorus | EffectKey::EnableReverb)
    }

    /// Inclusive bounds for numeric keys
    fn bounds(self) -> (f64, f64) {
        match self {
            EffectKey::Autotune => (0.0, 1.0),
            EffectKey::PitchShift => (-12.0, 12.0),
            EffectKey::VoiceVolume | EffectKey::InstrumentVolume => (0.0, f64::MAX),
            EffectKey::ChorusDepth | EffectKey::ReverbWetness => (0.0, 1.0),
            EffectKey::EnableChorus | EffectKey::EnableReverb => (0.0, 1.0),
        }
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectKey {
    type Err = EffectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectKey::ALL
            .iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| EffectError::UnknownEffect(s.to_string()))
    }
}

/// A single effect value as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectValue {
    Number(f64),
    Flag(bool),
}

impl EffectValue {
    /// Interpret a JSON value for `key`
    ///
    /// Numeric keys accept JSON numbers and numeric strings. Flag keys accept
    /// booleans, `0`/`1` style numbers and `"true"`/`"false"`/`"1"`/`"0"`.
    pub fn from_json(key: EffectKey, value: &Value) -> Result<Self, EffectError> {
        let invalid = |reason: &str| EffectError::InvalidValue {
            effect: key.name().to_string(),
            reason: reason.to_string(),
        };

        if key.is_flag() {
            return match value {
                Value::Bool(b) => Ok(EffectValue::Flag(*b)),
                Value::Number(n) => n
                    .as_f64()
                    .map(|v| EffectValue::Flag(v != 0.0))
                    .ok_or_else(|| invalid("expected a boolean")),
                Value::String(s) => match s.trim() {
                    "true" | "1" => Ok(EffectValue::Flag(true)),
                    "false" | "0" => Ok(EffectValue::Flag(false)),
                    _ => Err(invalid("expected a boolean")),
                },
                _ => Err(invalid("expected a boolean")),
            };
        }

        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| invalid("expected a number"))?;

        if !number.is_finite() {
            return Err(invalid("value must be finite"));
        }
        Ok(EffectValue::Number(number))
    }

    pub fn to_json(self) -> Value {
        match self {
            EffectValue::Number(n) => serde_json::json!(n),
            EffectValue::Flag(b) => Value::Bool(b),
        }
    }
}

/// The engine's complete tunable parameter set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceEffectSet {
    pub autotune: f64,
    pub pitch_shift: f64,
    pub voice_volume: f64,
    pub instrument_volume: f64,
    pub enable_chorus: bool,
    pub chorus_depth: f64,
    pub enable_reverb: bool,
    pub reverb_wetness: f64,
}

impl Default for VoiceEffectSet {
    fn default() -> Self {
        Self {
            autotune: 1.0,
            pitch_shift: 0.0,
            voice_volume: 1.1,
            instrument_volume: 2.0,
            enable_chorus: false,
            chorus_depth: 0.1,
            enable_reverb: false,
            reverb_wetness: 0.3,
        }
    }
}

impl VoiceEffectSet {
    pub fn get(&self, key: EffectKey) -> EffectValue {
        match key {
            EffectKey::Autotune => EffectValue::Number(self.autotune),
            EffectKey::PitchShift => EffectValue::Number(self.pitch_shift),
            EffectKey::VoiceVolume => EffectValue::Number(self.voice_volume),
            EffectKey::InstrumentVolume => EffectValue::Number(self.instrument_volume),
            EffectKey::EnableChorus => EffectValue::Flag(self.enable_chorus),
            EffectKey::ChorusDepth => EffectValue::Number(self.chorus_depth),
            EffectKey::EnableReverb => EffectValue::Flag(self.enable_reverb),
            EffectKey::ReverbWetness => EffectValue::Number(self.reverb_wetness),
        }
    }

    /// Overwrite one key, clamping numbers into the key's bounds
    ///
    /// Returns the value actually stored.
    pub fn set(&mut self, key: EffectKey, value: EffectValue) -> EffectValue {
        let (lo, hi) = key.bounds();
        let number = |v: EffectValue| match v {
            EffectValue::Number(n) => n.clamp(lo, hi),
            EffectValue::Flag(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        };
        let flag = |v: EffectValue| match v {
            EffectValue::Flag(b) => b,
            EffectValue::Number(n) => n != 0.0,
        };

        match key {
            EffectKey::Autotune => self.autotune = number(value),
            EffectKey::PitchShift => self.pitch_shift = number(value),
            EffectKey::VoiceVolume => self.voice_volume = number(value),
            EffectKey::InstrumentVolume => self.instrument_volume = number(value),
            EffectKey::EnableChorus => self.enable_chorus = flag(value),
            EffectKey::ChorusDepth => self.chorus_depth = number(value),
            EffectKey::EnableReverb => self.enable_reverb = flag(value),
            EffectKey::ReverbWetness => self.reverb_wetness = number(value),
        }
        self.get(key)
    }

    /// Merge a partial update, returning the keys it touched
    pub fn apply(&mut self, patch: &EffectPatch) -> Vec<EffectKey> {
        let touched = patch.keys();
        for key in &touched {
            if let Some(value) = patch.get(*key) {
                self.set(*key, value);
            }
        }
        touched
    }

    /// Parameter-file entries for the given keys (cold keys are skipped)
    pub fn param_entries(&self, keys: &[EffectKey]) -> Vec<(String, String)> {
        keys.iter()
            .filter_map(|key| {
                key.param_key()
                    .map(|name| (name.to_string(), format_value(self.get(*key))))
            })
            .collect()
    }

    /// Parameter-file entries for every hot key
    pub fn hot_param_entries(&self) -> Vec<(String, String)> {
        let hot: Vec<EffectKey> = EffectKey::ALL
            .iter()
            .copied()
            .filter(|key| key.class() == EffectClass::Hot)
            .collect();
        self.param_entries(&hot)
    }

    /// Named launch flags for the full effect set
    ///
    /// Flags are rendered as `1`/`0`.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(EffectKey::ALL.len() * 2);
        for key in EffectKey::ALL {
            args.push(key.launch_flag().to_string());
            args.push(match self.get(key) {
                EffectValue::Flag(b) => (if b { "1" } else { "0" }).to_string(),
                number => format_value(number),
            });
        }
        args
    }
}

fn format_value(value: EffectValue) -> String {
    match value {
        EffectValue::Number(n) => n.to_string(),
        EffectValue::Flag(b) => b.to_string(),
    }
}

/// Partial effect update: only present fields are applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autotune: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch_shift: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_chorus: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chorus_depth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_reverb: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverb_wetness: Option<f64>,
}

impl EffectPatch {
    /// Build a patch from a JSON object of `{effect_name: value}` pairs
    ///
    /// Every key must be a known effect and every value must be valid.
    pub fn from_json(value: &Value) -> Result<Self, EffectError> {
        let object = value.as_object().ok_or_else(|| EffectError::InvalidValue {
            effect: "effects".to_string(),
            reason: "expected an object".to_string(),
        })?;

        let mut patch = EffectPatch::default();
        for (name, raw) in object {
            let key: EffectKey = name.parse()?;
            patch.set(key, EffectValue::from_json(key, raw)?);
        }
        Ok(patch)
    }

    pub fn single(key: EffectKey, value: EffectValue) -> Self {
        let mut patch = EffectPatch::default();
        patch.set(key, value);
        patch
    }

    pub fn set(&mut self, key: EffectKey, value: EffectValue) {
        let number = match value {
            EffectValue::Number(n) => n,
            EffectValue::Flag(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        };
        let flag = match value {
            EffectValue::Flag(b) => b,
            EffectValue::Number(n) => n != 0.0,
        };
        match key {
            EffectKey::Autotune => self.autotune = Some(number),
            EffectKey::PitchShift => self.pitch_shift = Some(number),
            EffectKey::VoiceVolume => self.voice_volume = Some(number),
            EffectKey::InstrumentVolume => self.instrument_volume = Some(number),
            EffectKey::EnableChorus => self.enable_chorus = Some(flag),
            EffectKey::ChorusDepth => self.chorus_depth = Some(number),
            EffectKey::EnableReverb => self.enable_reverb = Some(flag),
            EffectKey::ReverbWetness => self.reverb_wetness = Some(number),
        }
    }

    pub fn get(&self, key: EffectKey) -> Option<EffectValue> {
        match key {
            EffectKey::Autotune => self.autotune.map(EffectValue::Number),
            EffectKey::PitchShift => self.pitch_shift.map(EffectValue::Number),
            EffectKey::VoiceVolume => self.voice_volume.map(EffectValue::Number),
            EffectKey::InstrumentVolume => self.instrument_volume.map(EffectValue::Number),
            EffectKey::EnableChorus => self.enable_chorus.map(EffectValue::Flag),
            EffectKey::ChorusDepth => self.chorus_depth.map(EffectValue::Number),
            EffectKey::EnableReverb => self.enable_reverb.map(EffectValue::Flag),
            EffectKey::ReverbWetness => self.reverb_wetness.map(EffectValue::Number),
        }
    }

    /// Keys present in this patch, in canonical order
    pub fn keys(&self) -> Vec<EffectKey> {
        EffectKey::ALL
            .iter()
            .copied()
            .filter(|key| self.get(*key).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Whether applying this patch requires an engine restart
    pub fn touches_cold(&self) -> bool {
        self.keys().iter().any(|key| key.class() == EffectClass::Cold)
    }
}

/// Built-in voice presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePreset {
    Natural,
    Autotune,
    Chipmunk,
    DeepVoice,
    Robot,
    Angelic,
}

impl VoicePreset {
    pub const ALL: [VoicePreset; 6] = [
        VoicePreset::Natural,
        VoicePreset::Autotune,
        VoicePreset::Chipmunk,
        VoicePreset::DeepVoice,
        VoicePreset::Robot,
        VoicePreset::Angelic,
    ];

    /// Display name, as sent by clients
    pub fn name(self) -> &'static str {
        match self {
            VoicePreset::Natural => "Natural",
            VoicePreset::Autotune => "Autotune",
            VoicePreset::Chipmunk => "Chipmunk",
            VoicePreset::DeepVoice => "Deep Voice",
            VoicePreset::Robot => "Robot",
            VoicePreset::Angelic => "Angelic",
        }
    }

    /// Fixed settings applied by the preset
    pub fn patch(self) -> EffectPatch {
        let base = |autotune: f64, pitch_shift: f64, voice_volume: f64| EffectPatch {
            autotune: Some(autotune),
            pitch_shift: Some(pitch_shift),
            voice_volume: Some(voice_volume),
            instrument_volume: Some(2.0),
            ..EffectPatch::default()
        };

        match self {
            VoicePreset::Natural => base(0.3, 0.0, 1.0),
            VoicePreset::Autotune => base(1.0, 0.0, 1.1),
            VoicePreset::Chipmunk => base(0.8, 7.0, 1.2),
            VoicePreset::DeepVoice => base(0.6, -7.0, 1.3),
            VoicePreset::Robot => EffectPatch {
                enable_chorus: Some(true),
                ..base(1.0, 0.0, 1.0)
            },
            VoicePreset::Angelic => EffectPatch {
                enable_reverb: Some(true),
                ..base(0.9, 2.0, 1.4)
            },
        }
    }
}

impl FromStr for VoicePreset {
    type Err = EffectError;

    /// Case-insensitive; `_` and `-` are accepted in place of spaces
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['_', '-'], " ").to_lowercase();
        VoicePreset::ALL
            .iter()
            .copied()
            .find(|preset| preset.name().to_lowercase() == wanted)
            .ok_or_else(|| EffectError::UnknownPreset(s.to_string()))
    }
}

impl fmt::Display for VoicePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
