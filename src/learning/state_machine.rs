//! Learning sessions that turn a control gesture into a mapping
//!
//! ```text
//!            start_learning                 select_control / observe
//!   Idle ─────────────────────► Standard ◄─────────────────────────┐
//!    ▲  start_quick_learning        │ complete_learning            │
//!    ├─────────────────────► Quick  │                              │
//!    │        observe (input)  │    │                              │
//!    └─────────────────────────┴────┘ cancel_learning ─────────────┘
//! ```

use super::defaults::{detect_mapping_type, DefaultSettings};
use super::error::LearningError;
use crate::controller::{Control, ControlInput};
use crate::events::{EngineEvent, Notifier};
use crate::mapping::engine::MappingEngine;
use crate::mapping::types::{Mapping, MappingId, Target, Transform, WidgetTarget};
use std::fmt;
use tracing::{debug, info, warn};

/// What the user is binding in a standard session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LearnKind {
    Widget,
    UiElement,
    Command,
}

impl fmt::Display for LearnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnKind::Widget => write!(f, "widget"),
            LearnKind::UiElement => write!(f, "ui element"),
            LearnKind::Command => write!(f, "command"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningState {
    Idle,
    Standard,
    Quick,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LearningSession {
    /// Interactive: the caller picks a control, then completes explicitly
    Standard {
        kind: LearnKind,
        target: Target,
        selected_control: Option<Control>,
        last_detected: Option<ControlInput>,
    },
    /// The next input on any control becomes the mapping
    Quick {
        widget: WidgetTarget,
        defaults: DefaultSettings,
    },
}

/// Caller overrides applied when a standard session is completed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub target_min: Option<f64>,
    pub target_max: Option<f64>,
    pub mapping_type: Option<crate::mapping::types::MappingType>,
    pub step_size: Option<f64>,
    pub is_inverted: bool,
}

pub struct LearningStateMachine {
    session: Option<LearningSession>,
    notifier: Notifier,
}

impl LearningStateMachine {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            session: None,
            notifier,
        }
    }

    pub fn state(&self) -> LearningState {
        match self.session {
            None => LearningState::Idle,
            Some(LearningSession::Standard { .. }) => LearningState::Standard,
            Some(LearningSession::Quick { .. }) => LearningState::Quick,
        }
    }

    pub fn session(&self) -> Option<&LearningSession> {
        self.session.as_ref()
    }

    pub fn is_learning(&self) -> bool {
        self.session.is_some()
    }

    /// Input seen most recently by the open standard session.
    pub fn last_detected(&self) -> Option<&ControlInput> {
        match &self.session {
            Some(LearningSession::Standard { last_detected, .. }) => last_detected.as_ref(),
            _ => None,
        }
    }

    pub fn start_learning(&mut self, kind: LearnKind, target: Target) {
        self.cancel_learning();
        info!("Learning started for {} ({})", target, kind);

        self.session = Some(LearningSession::Standard {
            kind,
            target: target.clone(),
            selected_control: None,
            last_detected: None,
        });
        self.notifier
            .emit(EngineEvent::LearningStarted { kind, target });
    }

    pub fn start_quick_learning(&mut self, widget: WidgetTarget, defaults: DefaultSettings) {
        self.cancel_learning();
        info!(
            "Quick learning started for {}.{}",
            widget.node_id, widget.widget_name
        );

        self.notifier.emit(EngineEvent::LearningStarted {
            kind: LearnKind::Widget,
            target: Target::Widget(widget.clone()),
        });
        self.session = Some(LearningSession::Quick { widget, defaults });
    }

    pub fn select_control(&mut self, control: Control) -> Result<(), LearningError> {
        match &mut self.session {
            Some(LearningSession::Standard {
                selected_control, ..
            }) => {
                debug!("Selected control {}", control.display_name());
                self.notifier.emit(EngineEvent::LearningControlSelected {
                    control_id: control.control_id.clone(),
                    device_id: control.device_id.clone(),
                });
                *selected_control = Some(control);
                Ok(())
            }
            Some(LearningSession::Quick { .. }) => Err(LearningError::NotStandard),
            None => Err(LearningError::NotLearning),
        }
    }

    /// Feeds one dispatched input to the open session. Returns the id of
    /// the mapping a quick session created from it.
    pub fn observe(&mut self, input: &ControlInput, engine: &mut MappingEngine) -> Option<MappingId> {
        match &mut self.session {
            None => None,
            Some(LearningSession::Standard { last_detected, .. }) => {
                *last_detected = Some(input.clone());
                self.notifier.emit(EngineEvent::LearningInputDetected {
                    input: input.clone(),
                });
                None
            }
            Some(LearningSession::Quick { widget, defaults }) => {
                let mapping = quick_mapping(input, widget, defaults);
                self.session = None;

                match engine.add_mapping(mapping) {
                    Ok(id) => {
                        info!("Quick learning created mapping {}", id);
                        self.notifier
                            .emit(EngineEvent::LearningCompleted { mapping_id: id.clone() });
                        Some(id)
                    }
                    Err(e) => {
                        warn!("Quick learning could not add mapping: {}", e);
                        self.notifier.emit(EngineEvent::LearningCanceled);
                        None
                    }
                }
            }
        }
    }

    /// Turns the open standard session into a mapping.
    ///
    /// Without a selected control the session stays open. Ranges not given
    /// in `options` are taken from an existing mapping of the same widget.
    pub fn complete_learning(
        &mut self,
        engine: &mut MappingEngine,
        options: CompletionOptions,
    ) -> Result<MappingId, LearningError> {
        let (target, selected) = match &self.session {
            None => return Err(LearningError::NotLearning),
            Some(LearningSession::Quick { .. }) => return Err(LearningError::AwaitingInput),
            Some(LearningSession::Standard {
                target,
                selected_control,
                ..
            }) => match selected_control {
                Some(control) => (target.clone(), control.clone()),
                None => return Err(LearningError::NoControlSelected),
            },
        };

        let mut control = Control::with_default_range(
            selected.control_type.clone(),
            selected.device_id.clone(),
            selected.control_id.clone(),
        );
        control.name = Some(selected.display_name());

        let (mut target_min, mut target_max) = (options.target_min, options.target_max);
        if let Some(widget) = target.as_widget() {
            if let Some(existing) = engine
                .store()
                .for_profile(engine.active_profile())
                .find(|m| {
                    m.target.as_widget().is_some_and(|w| w.same_widget(widget))
                        && m.transform.has_range()
                })
            {
                target_min = target_min.or(existing.transform.target_min);
                target_max = target_max.or(existing.transform.target_max);
            }
        }

        let mut transform = Transform {
            step_size: options.step_size,
            is_inverted: options.is_inverted,
            ..Default::default()
        };
        if let (Some(min), Some(max)) = (target_min, target_max) {
            transform.target_min = Some(min);
            transform.target_max = Some(max);
        }

        let mapping_type = options
            .mapping_type
            .unwrap_or_else(|| detect_mapping_type(&control.control_type, &target));
        let mapping = Mapping::new(control, target, mapping_type).with_transform(transform);

        let id = engine.add_mapping(mapping)?;
        self.session = None;
        info!("Learning completed with mapping {}", id);
        self.notifier
            .emit(EngineEvent::LearningCompleted { mapping_id: id.clone() });
        Ok(id)
    }

    /// Returns to Idle. Returns whether a session was open.
    pub fn cancel_learning(&mut self) -> bool {
        if self.session.take().is_some() {
            info!("Learning canceled");
            self.notifier.emit(EngineEvent::LearningCanceled);
            true
        } else {
            false
        }
    }
}

fn quick_mapping(input: &ControlInput, widget: &WidgetTarget, defaults: &DefaultSettings) -> Mapping {
    let mut control = input.to_control();
    if control.input_min == control.input_max {
        let (min, max) = control.control_type.default_input_range();
        control.input_min = min;
        control.input_max = max;
    }

    let transform = Transform {
        target_min: Some(defaults.range_min),
        target_max: Some(defaults.range_max),
        step_size: None,
        is_inverted: defaults.is_inverted,
    };
    Mapping::new(control, Target::Widget(widget.clone()), defaults.mapping_type)
        .with_transform(transform)
}
