//! Manager für Engine und Learning-Modus
//!
//! Bundles the mapping engine with the learning state machine and enforces
//! their ordering: an input is fully dispatched by the engine before the
//! learning session gets to see it.

use crate::controller::{Control, ControlInput};
use crate::events::Notifier;
use crate::learning::{
    default_settings_for_widget, CompletionOptions, DefaultSettings, LearnKind, LearningError,
    LearningState, LearningStateMachine,
};
use crate::mapping::adapter::{CommandAdapter, TargetAdapter};
use crate::mapping::engine::{DispatchReport, MappingEngine};
use crate::mapping::types::{MappingId, Target, WidgetKind, WidgetTarget};
use tracing::debug;

pub struct MappingEngineManager {
    engine: MappingEngine,
    learning: LearningStateMachine,
}

impl MappingEngineManager {
    /// Erstellt Engine und Learning-Modus mit gemeinsamem Notifier
    pub fn new(
        targets: Box<dyn TargetAdapter>,
        commands: Box<dyn CommandAdapter>,
        notifier: Notifier,
    ) -> Self {
        Self {
            engine: MappingEngine::new(targets, commands, notifier.clone()),
            learning: LearningStateMachine::new(notifier),
        }
    }

    pub fn engine(&self) -> &MappingEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MappingEngine {
        &mut self.engine
    }

    pub fn learning(&self) -> &LearningStateMachine {
        &self.learning
    }

    /// Verarbeitet eine Eingabe: erst Dispatch, danach Learning
    pub fn handle_input(&mut self, input: &ControlInput) -> DispatchReport {
        let report = self.engine.process_input(input);
        if !self.learning.is_learning() {
            return report;
        }
        if let Some(id) = self.learning.observe(input, &mut self.engine) {
            debug!("Input created mapping {} while learning", id);
        }
        report
    }

    pub fn start_learning(&mut self, kind: LearnKind, target: Target) {
        self.learning.start_learning(kind, target);
    }

    /// Quick learning with defaults derived from the widget's metadata and,
    /// where that is missing, from the live adapter bounds.
    pub fn start_quick_learning(&mut self, widget: WidgetTarget) {
        let defaults = self.defaults_for(&widget);
        self.learning.start_quick_learning(widget, defaults);
    }

    pub fn start_quick_learning_with(&mut self, widget: WidgetTarget, defaults: DefaultSettings) {
        self.learning.start_quick_learning(widget, defaults);
    }

    pub fn select_control(&mut self, control: Control) -> Result<(), LearningError> {
        self.learning.select_control(control)
    }

    pub fn complete_learning(&mut self, options: CompletionOptions) -> Result<MappingId, LearningError> {
        self.learning.complete_learning(&mut self.engine, options)
    }

    pub fn cancel_learning(&mut self) -> bool {
        self.learning.cancel_learning()
    }

    pub fn learning_state(&self) -> LearningState {
        self.learning.state()
    }

    fn defaults_for(&self, widget: &WidgetTarget) -> DefaultSettings {
        let bounds = self.engine.targets().bounds(widget);
        let kind = widget.widget_kind.clone().or_else(|| {
            bounds
                .and_then(|b| b.option_count)
                .filter(|count| *count > 0)
                .map(|_| WidgetKind::Options)
        });
        let min = widget.widget_min.or_else(|| bounds.and_then(|b| b.min));
        let max = widget.widget_max.or_else(|| bounds.and_then(|b| b.max));
        default_settings_for_widget(kind.as_ref(), min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControlType;
    use crate::mapping::adapter::{CommandRegistry, InMemoryTargets};
    use crate::mapping::types::{MappingType, TargetBounds, TargetValue};

    fn manager(targets: InMemoryTargets) -> MappingEngineManager {
        MappingEngineManager::new(
            Box::new(targets),
            Box::new(CommandRegistry::new()),
            Notifier::default(),
        )
    }

    #[test]
    fn learning_sees_input_after_dispatch() {
        let targets = InMemoryTargets::new();
        targets.insert_widget("3", "cfg", TargetValue::Number(0.0), TargetBounds::default());
        let mut manager = manager(targets.clone());

        manager.start_quick_learning(WidgetTarget::new("3", "cfg").with_kind(WidgetKind::Number));
        let input = ControlInput::new(ControlType::MidiCc, "d1", "7", 127.0, 0.0, 127.0);

        // the mapping created by this input must not have handled it
        let report = manager.handle_input(&input);
        assert_eq!(report.matched, 0);
        assert_eq!(manager.engine().store().len(), 1);
        assert_eq!(manager.learning_state(), LearningState::Idle);

        let report = manager.handle_input(&input);
        assert_eq!(report.values_written, 1);
        assert_eq!(targets.value("3", "cfg"), Some(TargetValue::Number(1.0)));
    }

    #[test]
    fn quick_defaults_use_adapter_bounds() {
        let targets = InMemoryTargets::new();
        targets.insert_widget(
            "5",
            "steps",
            TargetValue::Number(20.0),
            TargetBounds {
                min: Some(1.0),
                max: Some(150.0),
                ..Default::default()
            },
        );
        targets.insert_widget(
            "5",
            "sampler",
            TargetValue::Index(0),
            TargetBounds {
                option_count: Some(4),
                ..Default::default()
            },
        );
        let manager = manager(targets);

        let numeric = manager.defaults_for(&WidgetTarget::new("5", "steps").with_kind(WidgetKind::Number));
        assert_eq!((numeric.range_min, numeric.range_max), (1.0, 150.0));

        let options = manager.defaults_for(&WidgetTarget::new("5", "sampler"));
        assert_eq!(options.mapping_type, MappingType::Direct);
        assert_eq!((options.range_min, options.range_max), (0.0, 1.0));
    }
}
