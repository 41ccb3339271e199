//! Mapping engine: dispatch of control inputs and mapping management
//!
//! Owns the [`MappingStore`], the active profile and the collaborators that
//! apply results. Synchronous and single-threaded; concurrent callers go
//! through [`crate::mapping::handle::MappingEngineHandle`].
//!
//! # Dispatch
//!
//! ```text
//! ControlInput ──► matching mappings (active profile, store order)
//!                     │
//!                     ├─ widget      ──► apply() ──► TargetAdapter::write_value
//!                     ├─ ui element  ──► apply() ──► UiElementValue event
//!                     └─ command     ──► should_fire() ──► CommandAdapter::execute
//!                  ──► ControlInputUnhandled (always, last)
//! ```

use crate::controller::ControlInput;
use crate::events::{EngineEvent, Notifier};
use crate::mapping::adapter::{CommandAdapter, TargetAdapter};
use crate::mapping::error::StoreError;
use crate::mapping::pipeline;
use crate::mapping::store::{MappingStore, DEFAULT_PROFILE};
use crate::mapping::types::{Mapping, MappingId, MappingPatch, MappingType, Target};
use crate::persistence::MappingSnapshot;
use chrono::Utc;
use tracing::{debug, info, warn};

/// What happened while dispatching one input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Mappings in the active profile bound to the input's control
    pub matched: usize,
    pub values_written: usize,
    pub ui_values: usize,
    pub commands_fired: usize,
    /// Failed validation
    pub skipped: usize,
    pub adapter_errors: usize,
}

impl DispatchReport {
    /// True if any mapping produced an effect.
    pub fn had_effect(&self) -> bool {
        self.values_written + self.ui_values + self.commands_fired > 0
    }
}

pub struct MappingEngine {
    store: MappingStore,
    active_profile: String,
    targets: Box<dyn TargetAdapter>,
    commands: Box<dyn CommandAdapter>,
    notifier: Notifier,
    /// Store changed since the last save
    dirty: bool,
}

impl MappingEngine {
    pub fn new(
        targets: Box<dyn TargetAdapter>,
        commands: Box<dyn CommandAdapter>,
        notifier: Notifier,
    ) -> Self {
        Self {
            store: MappingStore::new(),
            active_profile: DEFAULT_PROFILE.to_string(),
            targets,
            commands,
            notifier,
            dirty: false,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub fn targets(&self) -> &dyn TargetAdapter {
        self.targets.as_ref()
    }

    /// Runs one input through every matching mapping of the active profile.
    ///
    /// A failing mapping never stops the others; its problem is reported as
    /// an event and counted in the returned report.
    pub fn process_input(&mut self, input: &ControlInput) -> DispatchReport {
        let mut report = DispatchReport::default();
        let raw = input.raw_value;
        let profile = self.active_profile.as_str();

        for mapping in self
            .store
            .iter_mut()
            .filter(|m| m.profile == profile && m.control.matches(input))
        {
            report.matched += 1;

            if let Err(e) = mapping.validate() {
                warn!("Skipping mapping {}: {}", mapping.id, e);
                self.notifier.emit(EngineEvent::ValidationSkipped {
                    mapping_id: mapping.id.clone(),
                    reason: e.to_string(),
                });
                report.skipped += 1;
                continue;
            }

            match mapping.target.clone() {
                Target::Widget(widget) => {
                    let Some(value) = pipeline::apply(mapping, raw, self.targets.as_ref()) else {
                        continue;
                    };
                    match self.targets.write_value(&widget, value) {
                        Ok(()) => {
                            report.values_written += 1;
                            self.notifier.emit(EngineEvent::WidgetValueWritten {
                                target: widget,
                                value,
                            });
                        }
                        Err(e) => {
                            warn!("Mapping {}: {}", mapping.id, e);
                            report.adapter_errors += 1;
                            self.notifier.emit(EngineEvent::AdapterError {
                                mapping_id: mapping.id.clone(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
                Target::UiElement { element_id } => {
                    if let Some(value) = pipeline::apply(mapping, raw, self.targets.as_ref()) {
                        report.ui_values += 1;
                        self.notifier
                            .emit(EngineEvent::UiElementValue { element_id, value });
                    }
                }
                Target::Command { command_id } => {
                    if !pipeline::should_fire(mapping, raw) {
                        continue;
                    }
                    match self.commands.execute(&command_id) {
                        Ok(()) => {
                            debug!("Mapping {} fired command {}", mapping.id, command_id);
                            report.commands_fired += 1;
                            self.notifier
                                .emit(EngineEvent::CommandExecuted { command_id });
                        }
                        Err(e) => {
                            warn!("Mapping {}: {}", mapping.id, e);
                            report.adapter_errors += 1;
                            self.notifier.emit(EngineEvent::AdapterError {
                                mapping_id: mapping.id.clone(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        self.notifier.emit(EngineEvent::ControlInputUnhandled {
            input: input.clone(),
        });
        report
    }

    /// Adds a mapping to the store. Mappings without a profile land in the
    /// active one.
    pub fn add_mapping(&mut self, mut mapping: Mapping) -> Result<MappingId, StoreError> {
        if mapping.profile.is_empty() {
            mapping.profile = self.active_profile.clone();
        }
        let requested = mapping.id.clone();

        match self.store.add(mapping) {
            Ok(id) => {
                let profile = self
                    .store
                    .get(&id)
                    .map(|m| m.profile.clone())
                    .unwrap_or_default();
                info!("Mapping added: {} [{}]", id, profile);
                self.dirty = true;
                self.notifier.emit(EngineEvent::MappingAdded {
                    id: id.clone(),
                    profile,
                });
                Ok(id)
            }
            Err(e) => {
                self.notifier.emit(EngineEvent::MappingRejected {
                    id: requested,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn update_mapping(&mut self, id: &MappingId, patch: MappingPatch) -> Result<(), StoreError> {
        self.store.update(id, patch)?;
        self.dirty = true;
        self.notifier
            .emit(EngineEvent::MappingUpdated { id: id.clone() });
        Ok(())
    }

    pub fn delete_mapping(&mut self, id: &MappingId) -> Result<Mapping, StoreError> {
        let removed = self.store.delete(id)?;
        self.dirty = true;
        self.notifier
            .emit(EngineEvent::MappingDeleted { id: id.clone() });
        Ok(removed)
    }

    pub fn mapping(&self, id: &MappingId) -> Option<&Mapping> {
        self.store.get(id)
    }

    /// Mappings of the active profile.
    pub fn mappings(&self) -> Vec<&Mapping> {
        self.store.for_profile(&self.active_profile).collect()
    }

    pub fn mappings_for_profile(&self, profile: &str) -> Vec<&Mapping> {
        self.store.for_profile(profile).collect()
    }

    /// Mappings of the active profile addressing `target`.
    pub fn mappings_for_target(&self, target: &Target) -> Vec<&Mapping> {
        self.store.for_target(&self.active_profile, target)
    }

    /// Switches the profile used for dispatch. Stored mappings are untouched.
    pub fn set_active_profile(&mut self, profile: impl Into<String>) {
        let profile = profile.into();
        if profile == self.active_profile {
            return;
        }
        info!("Active profile: {} -> {}", self.active_profile, profile);
        self.active_profile = profile.clone();
        self.dirty = true;
        self.notifier.emit(EngineEvent::ProfileChanged { profile });
    }

    pub fn active_profile(&self) -> &str {
        &self.active_profile
    }

    /// Known profiles plus the active one, even if it has no mappings yet.
    pub fn available_profiles(&self) -> Vec<String> {
        let mut profiles = self.store.profiles();
        if !profiles.contains(&self.active_profile) {
            profiles.push(self.active_profile.clone());
            profiles.sort();
        }
        profiles
    }

    pub fn set_range(
        &mut self,
        id: &MappingId,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<(), StoreError> {
        let mut transform = self.transform_of(id)?;
        transform.target_min = min;
        transform.target_max = max;
        self.update_mapping(id, MappingPatch::transform(transform))
    }

    pub fn set_mapping_type(&mut self, id: &MappingId, mapping_type: MappingType) -> Result<(), StoreError> {
        self.update_mapping(id, MappingPatch::mapping_type(mapping_type))
    }

    pub fn set_step_size(&mut self, id: &MappingId, step_size: Option<f64>) -> Result<(), StoreError> {
        let mut transform = self.transform_of(id)?;
        transform.step_size = step_size;
        self.update_mapping(id, MappingPatch::transform(transform))
    }

    pub fn set_inverted(&mut self, id: &MappingId, is_inverted: bool) -> Result<(), StoreError> {
        let mut transform = self.transform_of(id)?;
        transform.is_inverted = is_inverted;
        self.update_mapping(id, MappingPatch::transform(transform))
    }

    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot {
            active_profile: self.active_profile.clone(),
            saved_at: Some(Utc::now()),
            mappings: self.store.iter().cloned().collect(),
        }
    }

    /// Replaces the store with the snapshot's mappings. Records that the
    /// store rejects are skipped. Returns the number of restored mappings.
    pub fn restore(&mut self, snapshot: MappingSnapshot) -> usize {
        self.store.clear();
        for mapping in snapshot.mappings {
            let id = mapping.id.clone();
            if let Err(e) = self.store.add(mapping) {
                warn!("Not restoring mapping {}: {}", id, e);
            }
        }
        self.active_profile = if snapshot.active_profile.is_empty() {
            DEFAULT_PROFILE.to_string()
        } else {
            snapshot.active_profile
        };
        self.dirty = false;
        info!(
            "Restored {} mappings, active profile {}",
            self.store.len(),
            self.active_profile
        );
        self.store.len()
    }

    /// Drops widget mappings whose node no longer exists. Mappings for
    /// commands and UI elements are kept.
    pub fn prune_widget_targets<F>(&mut self, node_exists: F) -> Vec<MappingId>
    where
        F: Fn(&str) -> bool,
    {
        let removed: Vec<MappingId> = self
            .store
            .retain(|m| m.target.as_widget().map_or(true, |w| node_exists(&w.node_id)))
            .into_iter()
            .map(|m| m.id)
            .collect();

        if !removed.is_empty() {
            info!("Pruned {} mappings with missing nodes", removed.len());
            self.dirty = true;
            self.notifier.emit(EngineEvent::MappingsPruned {
                removed: removed.clone(),
            });
        }
        removed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    fn transform_of(&self, id: &MappingId) -> Result<crate::mapping::types::Transform, StoreError> {
        self.store
            .get(id)
            .map(|m| m.transform.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Control, ControlType};
    use crate::mapping::adapter::{CommandRegistry, InMemoryTargets};
    use crate::mapping::types::{TargetBounds, TargetValue, Transform};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    struct Fixture {
        engine: MappingEngine,
        targets: InMemoryTargets,
        fired: Arc<AtomicUsize>,
        events: broadcast::Receiver<EngineEvent>,
    }

    fn fixture() -> Fixture {
        let targets = InMemoryTargets::new();
        targets.insert_widget("3", "cfg", TargetValue::Number(7.0), TargetBounds::default());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut commands = CommandRegistry::new();
        commands.register("queue", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let notifier = Notifier::new(64);
        let events = notifier.subscribe();
        let engine = MappingEngine::new(Box::new(targets.clone()), Box::new(commands), notifier);
        Fixture {
            engine,
            targets,
            fired,
            events,
        }
    }

    fn cc() -> Control {
        Control::new(ControlType::MidiCc, "d1", "176_7", 0.0, 127.0)
    }

    fn cc_input(raw: f64) -> ControlInput {
        ControlInput::new(ControlType::MidiCc, "d1", "176_7", raw, 0.0, 127.0)
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn writes_direct_value_to_widget() {
        let mut f = fixture();
        f.engine
            .add_mapping(
                Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Direct)
                    .with_transform(Transform::with_range(0.0, 100.0)),
            )
            .unwrap();

        let report = f.engine.process_input(&cc_input(127.0));
        assert_eq!(report.values_written, 1);
        assert!(report.had_effect());
        assert_eq!(f.targets.value("3", "cfg"), Some(TargetValue::Number(100.0)));

        let other = ControlInput::new(ControlType::MidiCc, "d2", "1", 1.0, 0.0, 127.0);
        assert!(!f.engine.process_input(&other).had_effect());
    }

    #[test]
    fn unhandled_is_emitted_last() {
        let mut f = fixture();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Direct))
            .unwrap();
        drain(&mut f.events);

        f.engine.process_input(&cc_input(10.0));
        let events = drain(&mut f.events);
        assert!(matches!(events.first(), Some(EngineEvent::WidgetValueWritten { .. })));
        assert!(matches!(events.last(), Some(EngineEvent::ControlInputUnhandled { .. })));

        // also without any mapping
        let other = ControlInput::new(ControlType::MidiCc, "d2", "1", 1.0, 0.0, 127.0);
        let report = f.engine.process_input(&other);
        assert_eq!(report.matched, 0);
        assert!(matches!(
            drain(&mut f.events).as_slice(),
            [EngineEvent::ControlInputUnhandled { .. }]
        ));
    }

    #[test]
    fn invalid_mapping_is_skipped_and_others_run() {
        let mut f = fixture();
        let mut broken = Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Direct);
        broken.transform.step_size = Some(-1.0);
        f.engine.add_mapping(broken).unwrap();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::command("queue"), MappingType::Momentary))
            .unwrap();

        let report = f.engine.process_input(&cc_input(127.0));
        assert_eq!(report.skipped, 1);
        assert_eq!(report.commands_fired, 1);
        assert!(drain(&mut f.events)
            .iter()
            .any(|e| matches!(e, EngineEvent::ValidationSkipped { .. })));
    }

    #[test]
    fn adapter_errors_become_events() {
        let mut f = fixture();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::widget("9", "gone"), MappingType::Direct))
            .unwrap();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::command("missing"), MappingType::Momentary))
            .unwrap();

        let report = f.engine.process_input(&cc_input(127.0));
        assert_eq!(report.adapter_errors, 2);
        let errors = drain(&mut f.events)
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::AdapterError { .. }))
            .count();
        assert_eq!(errors, 2);
    }

    #[test]
    fn toggle_command_fires_once_per_press() {
        let mut f = fixture();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::command("queue"), MappingType::Toggle))
            .unwrap();

        for raw in [127.0, 127.0, 127.0, 0.0, 127.0] {
            f.engine.process_input(&cc_input(raw));
        }
        assert_eq!(f.fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn trigger_command_fires_while_held() {
        let mut f = fixture();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::command("queue"), MappingType::Trigger))
            .unwrap();

        for raw in [127.0, 127.0, 127.0] {
            f.engine.process_input(&cc_input(raw));
        }
        assert_eq!(f.fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn ui_element_values_are_published() {
        let mut f = fixture();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::ui_element("zoom"), MappingType::Direct))
            .unwrap();
        drain(&mut f.events);

        f.engine.process_input(&cc_input(127.0));
        assert!(drain(&mut f.events).contains(&EngineEvent::UiElementValue {
            element_id: "zoom".to_string(),
            value: TargetValue::Number(1.0),
        }));
    }

    #[test]
    fn only_active_profile_dispatches() {
        let mut f = fixture();
        f.engine
            .add_mapping(
                Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Direct).with_profile("live"),
            )
            .unwrap();

        assert_eq!(f.engine.process_input(&cc_input(127.0)).matched, 0);
        f.engine.set_active_profile("live");
        assert_eq!(f.engine.process_input(&cc_input(127.0)).matched, 1);
        assert_eq!(f.engine.available_profiles(), vec!["default", "live"]);
    }

    #[test]
    fn duplicate_add_is_rejected_with_event() {
        let mut f = fixture();
        let m = Mapping::new(cc(), Target::command("queue"), MappingType::Trigger).with_id("m1");
        f.engine.add_mapping(m.clone()).unwrap();
        drain(&mut f.events);

        assert!(f.engine.add_mapping(m).is_err());
        assert_eq!(f.engine.store().len(), 1);
        assert!(matches!(
            drain(&mut f.events).as_slice(),
            [EngineEvent::MappingRejected { .. }]
        ));
    }

    #[test]
    fn edits_go_through_store() {
        let mut f = fixture();
        let id = f
            .engine
            .add_mapping(Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Direct))
            .unwrap();

        f.engine.set_range(&id, Some(0.0), Some(10.0)).unwrap();
        f.engine.set_step_size(&id, Some(5.0)).unwrap();
        f.engine.set_inverted(&id, true).unwrap();
        f.engine.set_mapping_type(&id, MappingType::Toggle).unwrap();

        let mapping = f.engine.mapping(&id).unwrap();
        assert_eq!(mapping.transform.target_max, Some(10.0));
        assert_eq!(mapping.transform.step_size, Some(5.0));
        assert!(mapping.transform.is_inverted);
        assert_eq!(mapping.mapping_type, MappingType::Toggle);
        assert!(f.engine.set_inverted(&MappingId::from("nope"), true).is_err());
    }

    #[test]
    fn clearing_a_range_clears_the_shared_widget() {
        let mut f = fixture();
        let a = f
            .engine
            .add_mapping(
                Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Direct)
                    .with_transform(Transform::with_range(0.0, 50.0)),
            )
            .unwrap();
        let b = f
            .engine
            .add_mapping(Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Toggle))
            .unwrap();

        f.engine.set_range(&a, None, None).unwrap();
        for id in [&a, &b] {
            let t = &f.engine.mapping(id).unwrap().transform;
            assert_eq!((t.target_min, t.target_max), (None, None));
        }
    }

    #[test]
    fn snapshot_and_restore_keep_records() {
        let mut f = fixture();
        let id = f
            .engine
            .add_mapping(Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Incremental))
            .unwrap();
        f.engine.set_active_profile("live");
        f.engine.process_input(&cc_input(127.0));

        let snapshot = f.engine.snapshot();
        assert!(f.engine.is_dirty());

        let mut other = fixture();
        assert_eq!(other.engine.restore(snapshot), 1);
        assert_eq!(other.engine.active_profile(), "live");
        assert!(!other.engine.is_dirty());
        let restored = other.engine.mapping(&id).unwrap();
        assert!(!restored.runtime.was_active);
    }

    #[test]
    fn prune_removes_mappings_of_missing_nodes() {
        let mut f = fixture();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::widget("3", "cfg"), MappingType::Direct))
            .unwrap();
        f.targets
            .insert_widget("8", "seed", TargetValue::Number(0.0), TargetBounds::default());
        let gone = f
            .engine
            .add_mapping(Mapping::new(cc(), Target::widget("8", "seed"), MappingType::Direct))
            .unwrap();
        f.engine
            .add_mapping(Mapping::new(cc(), Target::command("queue"), MappingType::Trigger))
            .unwrap();

        f.targets.remove_node("8");
        let live = f.targets.clone();
        let removed = f.engine.prune_widget_targets(|node| live.contains_node(node));
        assert_eq!(removed, vec![gone]);
        assert_eq!(f.engine.store().len(), 2);
    }
}
