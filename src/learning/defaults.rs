//! Heuristics for mappings created by learning.

use crate::controller::ControlType;
use crate::mapping::types::{MappingType, Target, WidgetKind};
use tracing::debug;

/// Starting point for a mapping created by quick learning.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultSettings {
    pub mapping_type: MappingType,
    pub range_min: f64,
    pub range_max: f64,
    pub is_inverted: bool,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            mapping_type: MappingType::Direct,
            range_min: 0.0,
            range_max: 1.0,
            is_inverted: false,
        }
    }
}

/// Derives default settings from a widget's kind and declared range.
///
/// Numeric widgets map directly over their own range, with reversed bounds
/// put back in order; a single-point range is widened by one so the mapping
/// stays usable. Boolean widgets toggle,
/// options and unknown widgets map directly over `[0, 1]`.
pub fn default_settings_for_widget(
    kind: Option<&WidgetKind>,
    min: Option<f64>,
    max: Option<f64>,
) -> DefaultSettings {
    let defaults = DefaultSettings::default();

    match kind {
        Some(WidgetKind::Number) => {
            let mut range_min = min.unwrap_or(0.0);
            let mut range_max = max.unwrap_or(1.0);
            if range_min > range_max {
                std::mem::swap(&mut range_min, &mut range_max);
            }
            if range_min == range_max {
                range_max = range_min + 1.0;
            }
            DefaultSettings {
                range_min,
                range_max,
                ..defaults
            }
        }
        Some(WidgetKind::Boolean) => DefaultSettings {
            mapping_type: MappingType::Toggle,
            ..defaults
        },
        Some(WidgetKind::Options) => defaults,
        Some(WidgetKind::Other(name)) => {
            debug!("Using default direct mapping for widget kind {}", name);
            defaults
        }
        None => defaults,
    }
}

/// Picks a mapping type for a control/target pair.
///
/// Buttons and notes toggle, except on options widgets where each press
/// steps to the next option. Continuous controls map directly.
pub fn detect_mapping_type(control_type: &ControlType, target: &Target) -> MappingType {
    let is_options = target
        .as_widget()
        .and_then(|w| w.widget_kind.as_ref())
        .is_some_and(|kind| *kind == WidgetKind::Options);

    if control_type.is_button_like() {
        if is_options {
            MappingType::Incremental
        } else {
            MappingType::Toggle
        }
    } else {
        MappingType::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::types::WidgetTarget;

    #[test]
    fn numeric_widget_uses_its_range() {
        let settings = default_settings_for_widget(Some(&WidgetKind::Number), Some(1.0), Some(150.0));
        assert_eq!(settings.mapping_type, MappingType::Direct);
        assert_eq!((settings.range_min, settings.range_max), (1.0, 150.0));
    }

    #[test]
    fn reversed_widget_range_is_ordered() {
        let settings = default_settings_for_widget(Some(&WidgetKind::Number), Some(30.0), Some(2.0));
        assert_eq!((settings.range_min, settings.range_max), (2.0, 30.0));
        assert!(!settings.is_inverted);
    }

    #[test]
    fn single_point_range_is_widened() {
        let settings = default_settings_for_widget(Some(&WidgetKind::Number), Some(4.0), Some(4.0));
        assert_eq!((settings.range_min, settings.range_max), (4.0, 5.0));
    }

    #[test]
    fn boolean_widget_toggles() {
        let settings = default_settings_for_widget(Some(&WidgetKind::Boolean), None, None);
        assert_eq!(settings.mapping_type, MappingType::Toggle);
        assert_eq!((settings.range_min, settings.range_max), (0.0, 1.0));
    }

    #[test]
    fn unknown_widget_falls_back() {
        let settings = default_settings_for_widget(Some(&WidgetKind::from("text")), Some(3.0), Some(9.0));
        assert_eq!(settings, DefaultSettings::default());
    }

    #[test]
    fn buttons_step_through_options() {
        let combo = Target::Widget(WidgetTarget::new("2", "sampler").with_kind(WidgetKind::Options));
        assert_eq!(detect_mapping_type(&ControlType::GamepadButton, &combo), MappingType::Incremental);
        assert_eq!(detect_mapping_type(&ControlType::MidiNote, &Target::widget("2", "x")), MappingType::Toggle);
        assert_eq!(detect_mapping_type(&ControlType::MidiCc, &combo), MappingType::Direct);
    }
}
