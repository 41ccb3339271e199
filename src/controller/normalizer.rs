//! Conversion of raw control readings into the unit interval.
//!
//! Devices report in their own ranges: MIDI CCs in 0-127, gamepad axes in
//! -1.0 to 1.0, buttons in 0-1. Every mapping type works on the normalized
//! value, so this is the first stage for each input.

use super::control::Control;

/// Normalizes `raw` against the control's declared input range.
///
/// Bipolar axes are shifted and halved rather than scaled by min/max. Both
/// agree for an exactly symmetric range; the branch stays separate so an
/// asymmetric axis range does not silently change behavior.
pub fn normalize(control: &Control, raw: f64) -> f64 {
    let (min, max) = (control.input_min, control.input_max);

    // Single-point range: step function at that point
    if max == min {
        return if raw >= min { 1.0 } else { 0.0 };
    }

    if control.control_type.is_bipolar_axis() {
        return ((raw + 1.0) / 2.0).clamp(0.0, 1.0);
    }

    ((raw - min) / (max - min)).clamp(0.0, 1.0)
}

/// Midpoint of the control's raw range; readings above it count as active.
pub fn threshold(control: &Control) -> f64 {
    control.input_min + 0.5 * (control.input_max - control.input_min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControlType;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn midi_cc_scales_to_unit() {
        let control = Control::new(ControlType::MidiCc, "d1", "176_7", 0.0, 127.0);
        assert_approx_eq!(normalize(&control, 64.0), 64.0 / 127.0);
        assert_eq!(normalize(&control, 0.0), 0.0);
        assert_eq!(normalize(&control, 127.0), 1.0);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let control = Control::new(ControlType::MidiCc, "d1", "1", 0.0, 127.0);
        assert_eq!(normalize(&control, 200.0), 1.0);
        assert_eq!(normalize(&control, -5.0), 0.0);
    }

    #[test]
    fn bipolar_axis_shift_and_halve() {
        let axis = Control::new(ControlType::GamepadAxis, "pad", "left_x", -1.0, 1.0);
        assert_eq!(normalize(&axis, -1.0), 0.0);
        assert_eq!(normalize(&axis, 0.0), 0.5);
        assert_eq!(normalize(&axis, 1.0), 1.0);
    }

    #[test]
    fn degenerate_range_is_a_step() {
        let control = Control::new(ControlType::GamepadButton, "pad", "a", 1.0, 1.0);
        assert_eq!(normalize(&control, 1.0), 1.0);
        assert_eq!(normalize(&control, 2.0), 1.0);
        assert_eq!(normalize(&control, 0.5), 0.0);
    }

    #[test]
    fn threshold_is_midpoint() {
        let control = Control::new(ControlType::MidiCc, "d1", "1", 0.0, 127.0);
        assert_eq!(threshold(&control), 63.5);

        let axis = Control::new(ControlType::GamepadAxis, "pad", "x", -1.0, 1.0);
        assert_eq!(threshold(&axis), 0.0);
    }
}
