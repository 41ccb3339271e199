//! Per-mapping-type transform from a raw reading to a target value.
//!
//! ```text
//! raw ──► normalize ──► [mapping type] ──► Some(value) | None (no change)
//!                           │
//!                    RuntimeState (edge flags)
//! ```
//!
//! `apply` produces values; `should_fire` answers the separate question of
//! whether a command bound to the same mapping runs on this reading. The two
//! keep independent edge flags.

use crate::controller::normalizer::{normalize, threshold};
use crate::mapping::adapter::TargetReader;
use crate::mapping::types::{
    Mapping, MappingType, RuntimeState, TargetBounds, TargetValue, WidgetKind,
};

/// Fraction of the target range used as increment when no step is set.
const DEFAULT_STEP_FRACTION: f64 = 0.1;

/// Normalized level above which a control counts as pressed.
const ACTIVE_LEVEL: f64 = 0.5;

/// Effective output range of a mapping: transform override, then the
/// widget's declared range, then the adapter's bounds, then `[0, 1]`.
pub fn resolve_range(mapping: &Mapping, bounds: Option<&TargetBounds>) -> (f64, f64) {
    let widget = mapping.target.as_widget();
    let min = mapping
        .transform
        .target_min
        .or_else(|| widget.and_then(|w| w.widget_min))
        .or_else(|| bounds.and_then(|b| b.min))
        .unwrap_or(0.0);
    let max = mapping
        .transform
        .target_max
        .or_else(|| widget.and_then(|w| w.widget_max))
        .or_else(|| bounds.and_then(|b| b.max))
        .unwrap_or(1.0);
    (min, max)
}

/// Runs the value pipeline for one reading. `None` means the target must
/// not be touched.
pub fn apply<R>(mapping: &mut Mapping, raw: f64, reader: &R) -> Option<TargetValue>
where
    R: TargetReader + ?Sized,
{
    let unit = normalize(&mapping.control, raw);
    let bounds = mapping.target.as_widget().and_then(|w| reader.bounds(w));
    let (min, max) = resolve_range(mapping, bounds.as_ref());
    let options = option_count(bounds.as_ref()).filter(|_| mapping.target.as_widget().is_some());

    match mapping.mapping_type {
        MappingType::Direct => Some(direct_value(mapping, unit, min, max, options)),
        MappingType::Toggle | MappingType::Momentary => Some(binary_value(mapping, unit, min, max)),
        MappingType::Incremental => {
            if rising_edge(&mut mapping.runtime, unit) {
                Some(step_value(mapping, reader, min, max, options, 1.0))
            } else {
                None
            }
        }
        MappingType::Decremental => {
            if rising_edge(&mut mapping.runtime, unit) {
                Some(step_value(mapping, reader, min, max, options, -1.0))
            } else {
                None
            }
        }
        MappingType::Trigger => {
            // Edge is tracked so the flag history stays consistent, but a
            // trigger only ever acts through command dispatch.
            rising_edge(&mut mapping.runtime, unit);
            None
        }
    }
}

/// Whether a command bound to this mapping runs for this raw reading.
///
/// Toggle is edge-gated on its own flag. Trigger fires on level, every
/// reading it stays above the threshold, even though its value pipeline is
/// edge-gated.
pub fn should_fire(mapping: &mut Mapping, raw: f64) -> bool {
    let above = raw > threshold(&mapping.control);

    match mapping.mapping_type {
        MappingType::Momentary => above,
        MappingType::Toggle => {
            if !mapping.runtime.was_above_threshold && above {
                mapping.runtime.was_above_threshold = true;
                true
            } else {
                mapping.runtime.was_above_threshold = above;
                false
            }
        }
        MappingType::Trigger => above,
        _ => above,
    }
}

fn option_count(bounds: Option<&TargetBounds>) -> Option<usize> {
    bounds.and_then(|b| b.option_count).filter(|count| *count > 0)
}

fn rising_edge(runtime: &mut RuntimeState, unit: f64) -> bool {
    let active = unit > ACTIVE_LEVEL;
    if !runtime.was_active && active {
        runtime.was_active = true;
        return true;
    }
    runtime.was_active = active;
    false
}

fn ordered(min: f64, max: f64) -> (f64, f64) {
    if min <= max {
        (min, max)
    } else {
        (max, min)
    }
}

fn direct_value(
    mapping: &Mapping,
    unit: f64,
    min: f64,
    max: f64,
    options: Option<usize>,
) -> TargetValue {
    if let Some(count) = options {
        let index = ((unit * count as f64).floor() as usize).min(count - 1);
        let index = if mapping.transform.is_inverted {
            count - 1 - index
        } else {
            index
        };
        return TargetValue::Index(index);
    }

    let (from, to) = if mapping.transform.is_inverted {
        (max, min)
    } else {
        (min, max)
    };
    let mut value = from + unit * (to - from);

    if let Some(step) = mapping.transform.step_size {
        value = ((value - min) / step).round() * step + min;
    }

    let (lo, hi) = ordered(min, max);
    TargetValue::Number(value.clamp(lo, hi))
}

fn binary_value(mapping: &Mapping, unit: f64, min: f64, max: f64) -> TargetValue {
    let active = unit > ACTIVE_LEVEL;
    let is_boolean = mapping
        .target
        .as_widget()
        .and_then(|w| w.widget_kind.as_ref())
        .is_some_and(|kind| *kind == WidgetKind::Boolean);

    if is_boolean {
        return TargetValue::Bool(active != mapping.transform.is_inverted);
    }

    let (off, on) = if mapping.transform.is_inverted {
        (max, min)
    } else {
        (min, max)
    };
    TargetValue::Number(if active { on } else { off })
}

fn step_value<R: TargetReader + ?Sized>(
    mapping: &Mapping,
    reader: &R,
    min: f64,
    max: f64,
    options: Option<usize>,
    direction: f64,
) -> TargetValue {
    let current = mapping.target.as_widget().and_then(|w| reader.read_value(w));

    if let Some(count) = options {
        let index = current.and_then(|v| v.as_index()).unwrap_or(0) % count;
        let next = if direction > 0.0 {
            (index + 1) % count
        } else {
            (index + count - 1) % count
        };
        return TargetValue::Index(next);
    }

    let start = current
        .map(|v| v.as_f64())
        .unwrap_or(if direction > 0.0 { min } else { max });
    let step = mapping
        .transform
        .step_size
        .unwrap_or((max - min) * DEFAULT_STEP_FRACTION);

    let (lo, hi) = ordered(min, max);
    TargetValue::Number((start + direction * step).clamp(lo, hi))
}
