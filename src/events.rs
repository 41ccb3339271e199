//! Notifications published by the engine and the learning state machine
//!
//! Every event is a variant of [`EngineEvent`]; subscribers receive them
//! through a `tokio::sync::broadcast` channel wrapped by [`Notifier`]. A
//! missing or lagging subscriber never blocks or fails the publisher.

use crate::controller::ControlInput;
use crate::learning::LearnKind;
use crate::mapping::types::{MappingId, Target, TargetValue, WidgetTarget};
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the broadcast buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    MappingAdded { id: MappingId, profile: String },
    MappingUpdated { id: MappingId },
    MappingDeleted { id: MappingId },
    /// Add was refused, e.g. because the id already exists
    MappingRejected { id: MappingId, reason: String },
    ProfileChanged { profile: String },

    WidgetValueWritten { target: WidgetTarget, value: TargetValue },
    UiElementValue { element_id: String, value: TargetValue },
    CommandExecuted { command_id: String },
    AdapterError { mapping_id: MappingId, message: String },
    ValidationSkipped { mapping_id: MappingId, reason: String },

    LearningStarted { kind: LearnKind, target: Target },
    LearningControlSelected { control_id: String, device_id: String },
    LearningInputDetected { input: ControlInput },
    LearningCompleted { mapping_id: MappingId },
    LearningCanceled,

    /// Raised after every input, whether or not a mapping consumed it
    ControlInputUnhandled { input: ControlInput },

    MappingsSaved { session: String, count: usize },
    MappingsLoaded { session: String, count: usize },
    MappingsPruned { removed: Vec<MappingId> },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::MappingAdded { .. } => "mapping-added",
            EngineEvent::MappingUpdated { .. } => "mapping-updated",
            EngineEvent::MappingDeleted { .. } => "mapping-deleted",
            EngineEvent::MappingRejected { .. } => "mapping-rejected",
            EngineEvent::ProfileChanged { .. } => "profile-changed",
            EngineEvent::WidgetValueWritten { .. } => "widget-value-written",
            EngineEvent::UiElementValue { .. } => "ui-element-value",
            EngineEvent::CommandExecuted { .. } => "command-executed",
            EngineEvent::AdapterError { .. } => "adapter-error",
            EngineEvent::ValidationSkipped { .. } => "validation-skipped",
            EngineEvent::LearningStarted { .. } => "learning-started",
            EngineEvent::LearningControlSelected { .. } => "learning-control-selected",
            EngineEvent::LearningInputDetected { .. } => "learning-input-detected",
            EngineEvent::LearningCompleted { .. } => "learning-completed",
            EngineEvent::LearningCanceled => "learning-canceled",
            EngineEvent::ControlInputUnhandled { .. } => "control-input-unhandled",
            EngineEvent::MappingsSaved { .. } => "mappings-saved",
            EngineEvent::MappingsLoaded { .. } => "mappings-loaded",
            EngineEvent::MappingsPruned { .. } => "mappings-pruned",
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::MappingAdded { id, profile } => write!(f, "{} {} [{}]", self.name(), id, profile),
            EngineEvent::MappingUpdated { id } | EngineEvent::MappingDeleted { id } => {
                write!(f, "{} {}", self.name(), id)
            }
            EngineEvent::WidgetValueWritten { target, value } => write!(
                f,
                "{} {}.{} = {}",
                self.name(),
                target.node_id,
                target.widget_name,
                value
            ),
            EngineEvent::UiElementValue { element_id, value } => {
                write!(f, "{} {} = {}", self.name(), element_id, value)
            }
            EngineEvent::CommandExecuted { command_id } => write!(f, "{} {}", self.name(), command_id),
            EngineEvent::AdapterError { mapping_id, message } => {
                write!(f, "{} {}: {}", self.name(), mapping_id, message)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Cloneable publishing side of the event channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<EngineEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: EngineEvent) {
        trace!("Event: {}", event);
        // Err only means nobody is subscribed right now
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let notifier = Notifier::default();
        notifier.emit(EngineEvent::LearningCanceled);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn subscribers_receive_in_order() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();
        notifier.emit(EngineEvent::ProfileChanged {
            profile: "live".to_string(),
        });
        notifier.emit(EngineEvent::LearningCanceled);

        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::ProfileChanged {
                profile: "live".to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::LearningCanceled);
    }
}
