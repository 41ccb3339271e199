//! Gemeinsame Datentypen für die Mapping Engine
//!
//! Defines the persisted mapping record, its target and transform, the
//! mapping types, and the in-memory runtime flags that are never written to
//! disk.

use crate::controller::{Control, ControlType};
use crate::mapping::error::MappingError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Opaque, store-unique mapping identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingId(String);

impl MappingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates `mapping_<millis>_<seq>`; `seq` keeps ids unique within one
    /// millisecond.
    pub fn generate(seq: u64) -> Self {
        Self(format!("mapping_{}_{}", Utc::now().timestamp_millis(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MappingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MappingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Behavioral mode that decides how a raw reading becomes a target effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MappingType {
    /// Scales the normalized value onto the target range (alias: absolute)
    #[default]
    Direct,
    /// On/off around the midpoint, evaluated every event
    Toggle,
    /// Like toggle, but the low value is an explicit release
    Momentary,
    /// Steps the live value up on each press (alias: increment)
    Incremental,
    /// Steps the live value down on each press (alias: decrement)
    Decremental,
    /// Fires commands only, never produces a value
    Trigger,
}

impl MappingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingType::Direct => "direct",
            MappingType::Toggle => "toggle",
            MappingType::Momentary => "momentary",
            MappingType::Incremental => "incremental",
            MappingType::Decremental => "decremental",
            MappingType::Trigger => "trigger",
        }
    }

    /// Parses a type name, accepting the legacy aliases. Returns `None` for
    /// names that are not a mapping type at all.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "direct" | "absolute" => Some(MappingType::Direct),
            "toggle" => Some(MappingType::Toggle),
            "momentary" => Some(MappingType::Momentary),
            "incremental" | "increment" => Some(MappingType::Incremental),
            "decremental" | "decrement" => Some(MappingType::Decremental),
            "trigger" => Some(MappingType::Trigger),
            _ => None,
        }
    }
}

impl From<String> for MappingType {
    fn from(value: String) -> Self {
        MappingType::parse(&value).unwrap_or_else(|| {
            warn!("Unknown mapping type '{}', falling back to direct", value);
            MappingType::Direct
        })
    }
}

impl From<MappingType> for String {
    fn from(value: MappingType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of value a widget holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WidgetKind {
    Number,
    Boolean,
    /// Enumerable list of options, addressed by index
    Options,
    Other(String),
}

impl From<String> for WidgetKind {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "number" | "float" | "int" | "slider" => WidgetKind::Number,
            "boolean" | "toggle" => WidgetKind::Boolean,
            "options" | "combo" | "combobox" => WidgetKind::Options,
            _ => WidgetKind::Other(value),
        }
    }
}

impl From<&str> for WidgetKind {
    fn from(value: &str) -> Self {
        WidgetKind::from(value.to_string())
    }
}

impl From<WidgetKind> for String {
    fn from(value: WidgetKind) -> Self {
        match value {
            WidgetKind::Number => "number".to_string(),
            WidgetKind::Boolean => "boolean".to_string(),
            WidgetKind::Options => "options".to_string(),
            WidgetKind::Other(name) => name,
        }
    }
}

/// A named parameter on a host node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetTarget {
    pub node_id: String,
    pub widget_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_kind: Option<WidgetKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_step: Option<f64>,
}

impl WidgetTarget {
    pub fn new(node_id: impl Into<String>, widget_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            widget_name: widget_name.into(),
            widget_kind: None,
            widget_min: None,
            widget_max: None,
            widget_step: None,
        }
    }

    pub fn with_kind(mut self, kind: WidgetKind) -> Self {
        self.widget_kind = Some(kind);
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.widget_min = Some(min);
        self.widget_max = Some(max);
        self
    }

    /// Same physical parameter, regardless of declared metadata.
    pub fn same_widget(&self, other: &WidgetTarget) -> bool {
        self.node_id == other.node_id && self.widget_name == other.widget_name
    }
}

/// What a mapping affects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    Widget(WidgetTarget),
    Command { command_id: String },
    UiElement { element_id: String },
}

impl Target {
    pub fn widget(node_id: impl Into<String>, widget_name: impl Into<String>) -> Self {
        Target::Widget(WidgetTarget::new(node_id, widget_name))
    }

    pub fn command(command_id: impl Into<String>) -> Self {
        Target::Command {
            command_id: command_id.into(),
        }
    }

    pub fn ui_element(element_id: impl Into<String>) -> Self {
        Target::UiElement {
            element_id: element_id.into(),
        }
    }

    pub fn as_widget(&self) -> Option<&WidgetTarget> {
        match self {
            Target::Widget(widget) => Some(widget),
            _ => None,
        }
    }

    /// Identity comparison: widgets by `(node_id, widget_name)`, commands and
    /// elements by id.
    pub fn same_target(&self, other: &Target) -> bool {
        match (self, other) {
            (Target::Widget(a), Target::Widget(b)) => a.same_widget(b),
            (Target::Command { command_id: a }, Target::Command { command_id: b }) => a == b,
            (Target::UiElement { element_id: a }, Target::UiElement { element_id: b }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Widget(w) => write!(f, "widget {}.{}", w.node_id, w.widget_name),
            Target::Command { command_id } => write!(f, "command {}", command_id),
            Target::UiElement { element_id } => write!(f, "ui element {}", element_id),
        }
    }
}

/// Per-mapping output shaping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_size: Option<f64>,
    #[serde(default)]
    pub is_inverted: bool,
}

impl Transform {
    pub fn with_range(min: f64, max: f64) -> Self {
        Self {
            target_min: Some(min),
            target_max: Some(max),
            ..Default::default()
        }
    }

    pub fn has_range(&self) -> bool {
        self.target_min.is_some() || self.target_max.is_some()
    }
}

/// Edge-detection flags. Lives only in memory, reset on load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeState {
    /// Normalized value was above 0.5 on the previous tick (value pipeline)
    pub was_active: bool,
    /// Raw value was above the threshold on the previous tick (toggle firing)
    pub was_above_threshold: bool,
}

/// Persisted binding of one control to one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default)]
    pub id: MappingId,
    #[serde(default)]
    pub profile: String,
    pub control: Control,
    pub target: Target,
    #[serde(default)]
    pub mapping_type: MappingType,
    #[serde(default)]
    pub transform: Transform,
    #[serde(skip)]
    pub runtime: RuntimeState,
}

impl Mapping {
    /// New mapping without id or profile; the store fills both in on add.
    pub fn new(control: Control, target: Target, mapping_type: MappingType) -> Self {
        Self {
            id: MappingId::default(),
            profile: String::new(),
            control,
            target,
            mapping_type,
            transform: Transform::default(),
            runtime: RuntimeState::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<MappingId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn control_type(&self) -> &ControlType {
        &self.control.control_type
    }

    /// Checks the fields the pipeline relies on.
    pub fn validate(&self) -> Result<(), MappingError> {
        if self.control.device_id.is_empty() {
            return Err(MappingError::MissingDeviceId);
        }
        if self.control.control_id.is_empty() {
            return Err(MappingError::MissingControlId);
        }
        if !self.control.input_min.is_finite() || !self.control.input_max.is_finite() {
            return Err(MappingError::InvalidInputRange {
                min: self.control.input_min,
                max: self.control.input_max,
            });
        }
        if let Some(step) = self.transform.step_size {
            if !step.is_finite() || step <= 0.0 {
                return Err(MappingError::InvalidStepSize(step));
            }
        }
        let min = self.transform.target_min.unwrap_or(0.0);
        let max = self.transform.target_max.unwrap_or(0.0);
        if !min.is_finite() || !max.is_finite() {
            return Err(MappingError::InvalidTargetRange { min, max });
        }

        match &self.target {
            Target::Widget(w) if w.node_id.is_empty() => {
                Err(MappingError::IncompleteTarget("node id"))
            }
            Target::Widget(w) if w.widget_name.is_empty() => {
                Err(MappingError::IncompleteTarget("widget name"))
            }
            Target::Command { command_id } if command_id.is_empty() => {
                Err(MappingError::IncompleteTarget("command id"))
            }
            Target::UiElement { element_id } if element_id.is_empty() => {
                Err(MappingError::IncompleteTarget("element id"))
            }
            _ => Ok(()),
        }
    }
}

/// Shallow update of a mapping. `None` fields are left untouched; a present
/// `transform` replaces the whole transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingPatch {
    pub profile: Option<String>,
    pub control: Option<Control>,
    pub target: Option<Target>,
    pub mapping_type: Option<MappingType>,
    pub transform: Option<Transform>,
}

impl MappingPatch {
    pub fn transform(transform: Transform) -> Self {
        Self {
            transform: Some(transform),
            ..Default::default()
        }
    }

    pub fn mapping_type(mapping_type: MappingType) -> Self {
        Self {
            mapping_type: Some(mapping_type),
            ..Default::default()
        }
    }
}

/// A value produced for, or read from, a target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TargetValue {
    Number(f64),
    Bool(bool),
    /// Index into an options list
    Index(usize),
}

impl TargetValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            TargetValue::Number(value) => *value,
            TargetValue::Bool(true) => 1.0,
            TargetValue::Bool(false) => 0.0,
            TargetValue::Index(index) => *index as f64,
        }
    }

    /// Interprets the value as an options index, if it can be one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            TargetValue::Index(index) => Some(*index),
            TargetValue::Number(value) if *value >= 0.0 && value.is_finite() => {
                Some(*value as usize)
            }
            _ => None,
        }
    }
}

impl fmt::Display for TargetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetValue::Number(value) => write!(f, "{}", value),
            TargetValue::Bool(value) => write!(f, "{}", value),
            TargetValue::Index(index) => write!(f, "#{}", index),
        }
    }
}

/// Bounds metadata a target adapter reports for a live widget.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TargetBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub option_count: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_type_aliases() {
        assert_eq!(MappingType::parse("Absolute"), Some(MappingType::Direct));
        assert_eq!(MappingType::parse("increment"), Some(MappingType::Incremental));
        assert_eq!(MappingType::parse("decrement"), Some(MappingType::Decremental));
        assert_eq!(MappingType::parse("scratch"), None);
        assert_eq!(MappingType::from("scratch".to_string()), MappingType::Direct);
    }

    #[test]
    fn widget_kind_aliases() {
        assert_eq!(WidgetKind::from("combo"), WidgetKind::Options);
        assert_eq!(WidgetKind::from("INT"), WidgetKind::Number);
        assert_eq!(WidgetKind::from("toggle"), WidgetKind::Boolean);
        assert_eq!(WidgetKind::from("text"), WidgetKind::Other("text".to_string()));
    }

    #[test]
    fn targets_compare_by_identity() {
        let a = Target::Widget(WidgetTarget::new("4", "cfg").with_range(1.0, 30.0));
        let b = Target::widget("4", "cfg");
        assert!(a.same_target(&b));
        assert!(!a.same_target(&Target::widget("4", "steps")));
        assert!(!a.same_target(&Target::command("4")));
    }

    #[test]
    fn validation_rejects_bad_step() {
        let control = Control::new(ControlType::MidiCc, "d1", "7", 0.0, 127.0);
        let mut mapping = Mapping::new(control, Target::widget("1", "x"), MappingType::Direct);
        assert!(mapping.validate().is_ok());

        mapping.transform.step_size = Some(0.0);
        assert_eq!(mapping.validate(), Err(MappingError::InvalidStepSize(0.0)));
    }

    #[test]
    fn validation_rejects_empty_command() {
        let control = Control::new(ControlType::GamepadButton, "pad", "a", 0.0, 1.0);
        let mapping = Mapping::new(control, Target::command(""), MappingType::Trigger);
        assert_eq!(
            mapping.validate(),
            Err(MappingError::IncompleteTarget("command id"))
        );
    }
}
