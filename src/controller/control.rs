use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantics of a physical control channel.
///
/// Unknown type names are kept verbatim so that devices the engine has never
/// heard of can still be matched by exact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ControlType {
    /// Absolute MIDI continuous controller (0-127)
    MidiCc,
    /// MIDI note on/off, velocity as value
    MidiNote,
    /// Generic MIDI message
    Midi,
    /// Bipolar gamepad axis (-1.0 to 1.0)
    GamepadAxis,
    /// Momentary gamepad button
    GamepadButton,
    Other(String),
}

impl ControlType {
    pub fn as_str(&self) -> &str {
        match self {
            ControlType::MidiCc => "midi_cc",
            ControlType::MidiNote => "midi_note",
            ControlType::Midi => "midi",
            ControlType::GamepadAxis => "gamepad_axis",
            ControlType::GamepadButton => "gamepad_button",
            ControlType::Other(name) => name,
        }
    }

    /// True for axes whose declared range is symmetric around zero.
    pub fn is_bipolar_axis(&self) -> bool {
        match self {
            ControlType::GamepadAxis => true,
            ControlType::Other(name) => name.to_lowercase().contains("axis"),
            _ => false,
        }
    }

    /// Buttons and notes are momentary; everything else is continuous.
    pub fn is_button_like(&self) -> bool {
        match self {
            ControlType::GamepadButton | ControlType::MidiNote => true,
            ControlType::Other(name) => name.to_lowercase().contains("button"),
            _ => false,
        }
    }

    /// Input range a freshly learned control of this type starts with.
    pub fn default_input_range(&self) -> (f64, f64) {
        match self {
            ControlType::MidiCc | ControlType::MidiNote | ControlType::Midi => (0.0, 127.0),
            ControlType::GamepadAxis => (-1.0, 1.0),
            _ => (0.0, 1.0),
        }
    }
}

impl From<String> for ControlType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "midi_cc" => ControlType::MidiCc,
            "midi_note" => ControlType::MidiNote,
            "midi" => ControlType::Midi,
            "gamepad_axis" => ControlType::GamepadAxis,
            "gamepad_button" => ControlType::GamepadButton,
            _ => ControlType::Other(value),
        }
    }
}

impl From<&str> for ControlType {
    fn from(value: &str) -> Self {
        ControlType::from(value.to_string())
    }
}

impl From<ControlType> for String {
    fn from(value: ControlType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one physical input channel and the raw range it reports in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub control_type: ControlType,
    pub device_id: String,
    pub control_id: String,
    pub input_min: f64,
    pub input_max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Control {
    pub fn new(
        control_type: ControlType,
        device_id: impl Into<String>,
        control_id: impl Into<String>,
        input_min: f64,
        input_max: f64,
    ) -> Self {
        Self {
            control_type,
            device_id: device_id.into(),
            control_id: control_id.into(),
            input_min,
            input_max,
            name: None,
        }
    }

    /// Builds a control using the default input range of its type.
    pub fn with_default_range(
        control_type: ControlType,
        device_id: impl Into<String>,
        control_id: impl Into<String>,
    ) -> Self {
        let (input_min, input_max) = control_type.default_input_range();
        Self::new(control_type, device_id, control_id, input_min, input_max)
    }

    /// Exact match on device, control and type. The input range is not part
    /// of a control's identity.
    pub fn matches(&self, input: &ControlInput) -> bool {
        self.device_id == input.device_id
            && self.control_id == input.control_id
            && self.control_type == input.control_type
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.control_type, self.control_id))
    }
}

/// One raw reading as emitted by a device source.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlInput {
    pub control_type: ControlType,
    pub device_id: String,
    pub control_id: String,
    pub raw_value: f64,
    pub input_min: f64,
    pub input_max: f64,
}

impl ControlInput {
    pub fn new(
        control_type: ControlType,
        device_id: impl Into<String>,
        control_id: impl Into<String>,
        raw_value: f64,
        input_min: f64,
        input_max: f64,
    ) -> Self {
        Self {
            control_type,
            device_id: device_id.into(),
            control_id: control_id.into(),
            raw_value,
            input_min,
            input_max,
        }
    }

    /// The control this reading came from, carrying the range the device
    /// declared for it.
    pub fn to_control(&self) -> Control {
        Control::new(
            self.control_type.clone(),
            self.device_id.clone(),
            self.control_id.clone(),
            self.input_min,
            self.input_max,
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ControlParseError {
    #[error("Expected 6 fields (type device control raw min max), got {0}")]
    FieldCount(usize),

    #[error("Invalid number in field '{field}': {value}")]
    InvalidNumber { field: &'static str, value: String },
}

/// Parses `type device control raw min max`, whitespace separated.
impl FromStr for ControlInput {
    type Err = ControlParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(ControlParseError::FieldCount(fields.len()));
        }

        let number = |field: &'static str, value: &str| -> Result<f64, ControlParseError> {
            value
                .parse::<f64>()
                .map_err(|_| ControlParseError::InvalidNumber {
                    field,
                    value: value.to_string(),
                })
        };

        Ok(Self::new(
            ControlType::from(fields[0]),
            fields[1],
            fields[2],
            number("raw", fields[3])?,
            number("min", fields[4])?,
            number("max", fields[5])?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_types_round_trip_verbatim() {
        let ty = ControlType::from("osc_fader");
        assert_eq!(ty, ControlType::Other("osc_fader".to_string()));
        assert_eq!(String::from(ty), "osc_fader");
    }

    #[test]
    fn axis_detection_covers_custom_names() {
        assert!(ControlType::GamepadAxis.is_bipolar_axis());
        assert!(ControlType::from("hid_Axis_x").is_bipolar_axis());
        assert!(!ControlType::MidiCc.is_bipolar_axis());
    }

    #[test]
    fn parses_device_line() {
        let input: ControlInput = "midi_cc d1 176_7 64 0 127".parse().unwrap();
        assert_eq!(input.control_type, ControlType::MidiCc);
        assert_eq!(input.device_id, "d1");
        assert_eq!(input.control_id, "176_7");
        assert_eq!(input.raw_value, 64.0);
        assert_eq!(input.input_max, 127.0);
    }

    #[test]
    fn rejects_short_lines() {
        let err = "midi_cc d1 64".parse::<ControlInput>().unwrap_err();
        assert_eq!(err, ControlParseError::FieldCount(3));
    }

    #[test]
    fn matching_ignores_input_range() {
        let control = Control::new(ControlType::MidiCc, "d1", "176_7", 0.0, 127.0);
        let input = ControlInput::new(ControlType::MidiCc, "d1", "176_7", 3.0, 0.0, 1.0);
        assert!(control.matches(&input));

        let other = ControlInput::new(ControlType::MidiNote, "d1", "176_7", 3.0, 0.0, 127.0);
        assert!(!control.matches(&other));
    }
}
