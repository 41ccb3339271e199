//! Collaborator contracts for targets and commands, plus in-memory
//! implementations used by the binary and the tests.

use crate::mapping::error::AdapterError;
use crate::mapping::types::{TargetBounds, TargetValue, WidgetTarget};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Read access to live widget state. The transform pipeline only ever needs
/// this half of the adapter.
pub trait TargetReader {
    fn read_value(&self, target: &WidgetTarget) -> Option<TargetValue>;

    fn bounds(&self, target: &WidgetTarget) -> Option<TargetBounds>;
}

/// Full widget adapter as owned by the engine.
pub trait TargetAdapter: TargetReader + Send {
    fn write_value(&mut self, target: &WidgetTarget, value: TargetValue)
        -> Result<(), AdapterError>;
}

/// Executes named host actions.
pub trait CommandAdapter: Send {
    fn execute(&mut self, command_id: &str) -> Result<(), AdapterError>;
}

/// Live state of one widget held by [`InMemoryTargets`].
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetState {
    pub value: TargetValue,
    pub bounds: TargetBounds,
}

type WidgetKey = (String, String);

/// Widget table shared between clones, so a caller can keep a handle and
/// observe what the engine wrote.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTargets {
    widgets: Arc<Mutex<HashMap<WidgetKey, WidgetState>>>,
    /// Create unknown widgets on first write instead of rejecting them
    permissive: bool,
}

impl InMemoryTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::default()
        }
    }

    pub fn insert_widget(
        &self,
        node_id: impl Into<String>,
        widget_name: impl Into<String>,
        value: TargetValue,
        bounds: TargetBounds,
    ) {
        self.lock()
            .insert((node_id.into(), widget_name.into()), WidgetState { value, bounds });
    }

    pub fn value(&self, node_id: &str, widget_name: &str) -> Option<TargetValue> {
        self.lock()
            .get(&(node_id.to_string(), widget_name.to_string()))
            .map(|state| state.value)
    }

    pub fn remove_node(&self, node_id: &str) {
        self.lock().retain(|(node, _), _| node != node_id);
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.lock().keys().any(|(node, _)| node == node_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WidgetKey, WidgetState>> {
        self.widgets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn key(target: &WidgetTarget) -> WidgetKey {
    (target.node_id.clone(), target.widget_name.clone())
}

impl TargetReader for InMemoryTargets {
    fn read_value(&self, target: &WidgetTarget) -> Option<TargetValue> {
        self.lock().get(&key(target)).map(|state| state.value)
    }

    fn bounds(&self, target: &WidgetTarget) -> Option<TargetBounds> {
        self.lock().get(&key(target)).map(|state| state.bounds)
    }
}

impl TargetAdapter for InMemoryTargets {
    fn write_value(
        &mut self,
        target: &WidgetTarget,
        value: TargetValue,
    ) -> Result<(), AdapterError> {
        let permissive = self.permissive;
        let mut widgets = self.lock();

        match widgets.get_mut(&key(target)) {
            Some(state) => {
                if let (TargetValue::Index(index), Some(count)) = (value, state.bounds.option_count)
                {
                    if index >= count {
                        return Err(AdapterError::WriteRejected {
                            target: format!("{}.{}", target.node_id, target.widget_name),
                            reason: format!("option index {} out of {} options", index, count),
                        });
                    }
                }
                debug!(
                    "Widget {}.{}: {} -> {}",
                    target.node_id, target.widget_name, state.value, value
                );
                state.value = value;
                Ok(())
            }
            None if permissive => {
                info!(
                    "Registering widget {}.{} on first write",
                    target.node_id, target.widget_name
                );
                widgets.insert(
                    key(target),
                    WidgetState {
                        value,
                        bounds: TargetBounds {
                            min: target.widget_min,
                            max: target.widget_max,
                            step: target.widget_step,
                            option_count: None,
                        },
                    },
                );
                Ok(())
            }
            None => Err(AdapterError::UnknownTarget(format!(
                "{}.{}",
                target.node_id, target.widget_name
            ))),
        }
    }
}

/// Typ für Command-Handler-Funktionen
pub type CommandHandler = Box<dyn FnMut() -> Result<(), String> + Send>;

/// Command adapter backed by registered handler closures.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the handler for `command_id`.
    pub fn register<F>(&mut self, command_id: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut() -> Result<(), String> + Send + 'static,
    {
        let command_id = command_id.into();
        if self.handlers.contains_key(&command_id) {
            warn!("Replacing handler for command {}", command_id);
        }
        self.handlers.insert(command_id, Box::new(handler));
        self
    }

    pub fn is_registered(&self, command_id: &str) -> bool {
        self.handlers.contains_key(command_id)
    }

    pub fn command_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl CommandAdapter for CommandRegistry {
    fn execute(&mut self, command_id: &str) -> Result<(), AdapterError> {
        let handler = self
            .handlers
            .get_mut(command_id)
            .ok_or_else(|| AdapterError::UnknownCommand(command_id.to_string()))?;

        handler().map_err(|reason| AdapterError::CommandFailed {
            command_id: command_id.to_string(),
            reason,
        })
    }
}
