//! Profile-scoped collection of mappings
//!
//! Holds every mapping of every profile in insertion order. The store keeps
//! two invariants on its own:
//!
//! * ids are unique across all profiles
//! * all widget mappings of one profile that address the same
//!   `(node_id, widget_name)` carry the same `target_min`/`target_max`

use crate::mapping::error::StoreError;
use crate::mapping::types::{Mapping, MappingId, MappingPatch, RuntimeState, Target, WidgetTarget};
use tracing::{debug, info, warn};

/// Profile that always exists, even with no mappings in it.
pub const DEFAULT_PROFILE: &str = "default";

type RangePair = (Option<f64>, Option<f64>);

#[derive(Debug, Clone, Default)]
pub struct MappingStore {
    mappings: Vec<Mapping>,
    /// Sequence part of generated ids
    next_seq: u64,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Adds a mapping, generating an id if it has none.
    ///
    /// The widget range of the new mapping is reconciled with the mappings
    /// already targeting the same widget in its profile before it is stored.
    pub fn add(&mut self, mut mapping: Mapping) -> Result<MappingId, StoreError> {
        if mapping.id.is_empty() {
            mapping.id = self.generate_id();
        } else if self.get(&mapping.id).is_some() {
            warn!("Rejecting mapping with duplicate id {}", mapping.id);
            return Err(StoreError::DuplicateId(mapping.id.to_string()));
        }

        if mapping.profile.is_empty() {
            mapping.profile = DEFAULT_PROFILE.to_string();
        }
        mapping.runtime = RuntimeState::default();

        let id = mapping.id.clone();
        self.mappings.push(mapping);
        let index = self.mappings.len() - 1;
        self.reconcile_range(index);

        debug!("Added mapping {} ({} total)", id, self.mappings.len());
        Ok(id)
    }

    /// Applies a shallow patch. A changed range, cleared ones included, is
    /// propagated to every other mapping of the same widget in the same
    /// profile.
    pub fn update(&mut self, id: &MappingId, patch: MappingPatch) -> Result<&Mapping, StoreError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let moved = patch.target.is_some() || patch.profile.is_some();

        let mapping = &mut self.mappings[index];
        let previous: RangePair = (mapping.transform.target_min, mapping.transform.target_max);
        let range_patched = patch.transform.as_ref().is_some_and(|t| {
            t.has_range() || (t.target_min, t.target_max) != previous
        });
        let mut reset_runtime = false;

        if let Some(profile) = patch.profile {
            mapping.profile = profile;
        }
        if let Some(control) = patch.control {
            reset_runtime |= control != mapping.control;
            mapping.control = control;
        }
        if let Some(target) = patch.target {
            mapping.target = target;
        }
        if let Some(mapping_type) = patch.mapping_type {
            reset_runtime |= mapping_type != mapping.mapping_type;
            mapping.mapping_type = mapping_type;
        }
        if let Some(transform) = patch.transform {
            mapping.transform = transform;
        }
        if reset_runtime {
            mapping.runtime = RuntimeState::default();
        }

        if range_patched {
            self.propagate_range(index);
        } else if moved {
            self.reconcile_range(index);
        }

        debug!("Updated mapping {}", id);
        Ok(&self.mappings[index])
    }

    pub fn delete(&mut self, id: &MappingId) -> Result<Mapping, StoreError> {
        match self.index_of(id) {
            Some(index) => {
                info!("Deleting mapping {}", id);
                Ok(self.mappings.remove(index))
            }
            None => {
                warn!("Cannot delete unknown mapping {}", id);
                Err(StoreError::NotFound(id.to_string()))
            }
        }
    }

    pub fn get(&self, id: &MappingId) -> Option<&Mapping> {
        self.mappings.iter().find(|m| &m.id == id)
    }

    pub fn get_mut(&mut self, id: &MappingId) -> Option<&mut Mapping> {
        self.mappings.iter_mut().find(|m| &m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Mapping> {
        self.mappings.iter_mut()
    }

    pub fn for_profile<'a>(&'a self, profile: &str) -> impl Iterator<Item = &'a Mapping> + 'a {
        let profile = profile.to_string();
        self.mappings.iter().filter(move |m| m.profile == profile)
    }

    /// Mappings of `profile` addressing `target` (by identity, not metadata).
    pub fn for_target(&self, profile: &str, target: &Target) -> Vec<&Mapping> {
        self.for_profile(profile)
            .filter(|m| m.target.same_target(target))
            .collect()
    }

    /// All known profile names, sorted, always including the default one.
    pub fn profiles(&self) -> Vec<String> {
        let mut profiles: Vec<String> = self.mappings.iter().map(|m| m.profile.clone()).collect();
        profiles.push(DEFAULT_PROFILE.to_string());
        profiles.sort();
        profiles.dedup();
        profiles
    }

    /// First mapping of `profile` bound to the given widget.
    pub fn find_for_widget(&self, profile: &str, node_id: &str, widget_name: &str) -> Option<&Mapping> {
        self.for_profile(profile).find(|m| {
            m.target
                .as_widget()
                .is_some_and(|w| w.node_id == node_id && w.widget_name == widget_name)
        })
    }

    pub fn is_widget_mapped(&self, profile: &str, node_id: &str, widget_name: &str) -> bool {
        self.find_for_widget(profile, node_id, widget_name).is_some()
    }

    /// Keeps the mappings for which `keep` returns true and hands back the
    /// removed ones.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<Mapping>
    where
        F: FnMut(&Mapping) -> bool,
    {
        let (kept, removed): (Vec<Mapping>, Vec<Mapping>) =
            std::mem::take(&mut self.mappings).into_iter().partition(|m| keep(m));
        self.mappings = kept;
        removed
    }

    pub fn clear(&mut self) {
        self.mappings.clear();
    }

    fn generate_id(&mut self) -> MappingId {
        loop {
            self.next_seq += 1;
            let id = MappingId::generate(self.next_seq);
            if self.get(&id).is_none() {
                return id;
            }
        }
    }

    fn index_of(&self, id: &MappingId) -> Option<usize> {
        self.mappings.iter().position(|m| &m.id == id)
    }

    /// Indices of the other mappings sharing profile and widget with `index`.
    fn siblings(&self, index: usize) -> Vec<usize> {
        let source = &self.mappings[index];
        let Some(widget) = source.target.as_widget() else {
            return Vec::new();
        };

        self.mappings
            .iter()
            .enumerate()
            .filter(|(i, m)| {
                *i != index && m.profile == source.profile && shares_widget(&m.target, widget)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Adopts the range of the first sibling that has one; if no sibling
    /// defines a range, pushes this mapping's range onto the siblings.
    fn reconcile_range(&mut self, index: usize) {
        let siblings = self.siblings(index);
        let canonical = siblings.iter().find_map(|i| {
            let t = &self.mappings[*i].transform;
            t.has_range().then_some((t.target_min, t.target_max))
        });

        match canonical {
            Some((min, max)) => {
                let mapping = &mut self.mappings[index];
                if mapping.transform.target_min != min || mapping.transform.target_max != max {
                    debug!(
                        "Mapping {} adopts shared range {:?}..{:?}",
                        mapping.id, min, max
                    );
                }
                mapping.transform.target_min = min;
                mapping.transform.target_max = max;
            }
            None if self.mappings[index].transform.has_range() => self.propagate_range(index),
            None => {}
        }
    }

    fn propagate_range(&mut self, index: usize) {
        let range: RangePair = (
            self.mappings[index].transform.target_min,
            self.mappings[index].transform.target_max,
        );
        let siblings = self.siblings(index);
        if siblings.is_empty() {
            return;
        }

        debug!(
            "Propagating range {:?}..{:?} to {} mapping(s)",
            range.0,
            range.1,
            siblings.len()
        );
        for i in siblings {
            let transform = &mut self.mappings[i].transform;
            transform.target_min = range.0;
            transform.target_max = range.1;
        }
    }
}

fn shares_widget(target: &Target, widget: &WidgetTarget) -> bool {
    target.as_widget().is_some_and(|w| w.same_widget(widget))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Control, ControlType};
    use crate::mapping::types::{MappingType, Transform};

    fn cc(control_id: &str) -> Control {
        Control::new(ControlType::MidiCc, "d1", control_id, 0.0, 127.0)
    }

    fn widget_mapping(control_id: &str, node: &str, widget: &str) -> Mapping {
        Mapping::new(cc(control_id), Target::widget(node, widget), MappingType::Direct)
    }

    #[test]
    fn add_generates_unique_ids() {
        let mut store = MappingStore::new();
        let a = store.add(widget_mapping("1", "1", "a")).unwrap();
        let b = store.add(widget_mapping("2", "1", "b")).unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("mapping_"));
        assert_eq!(store.get(&a).map(|m| m.profile.as_str()), Some(DEFAULT_PROFILE));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut store = MappingStore::new();
        store.add(widget_mapping("1", "1", "a").with_id("m1")).unwrap();
        let result = store.add(widget_mapping("2", "1", "b").with_id("m1"));
        assert_eq!(result, Err(StoreError::DuplicateId("m1".to_string())));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn new_mapping_adopts_existing_range() {
        let mut store = MappingStore::new();
        store
            .add(widget_mapping("1", "4", "cfg").with_transform(Transform::with_range(1.0, 20.0)))
            .unwrap();
        let id = store
            .add(widget_mapping("2", "4", "cfg").with_transform(Transform::with_range(0.0, 5.0)))
            .unwrap();

        let added = store.get(&id).unwrap();
        assert_eq!(added.transform.target_min, Some(1.0));
        assert_eq!(added.transform.target_max, Some(20.0));
    }

    #[test]
    fn first_declared_range_propagates_to_existing() {
        let mut store = MappingStore::new();
        let first = store.add(widget_mapping("1", "4", "cfg")).unwrap();
        store
            .add(widget_mapping("2", "4", "cfg").with_transform(Transform::with_range(2.0, 8.0)))
            .unwrap();

        let first = store.get(&first).unwrap();
        assert_eq!(first.transform.target_min, Some(2.0));
        assert_eq!(first.transform.target_max, Some(8.0));
    }

    #[test]
    fn ranges_do_not_leak_across_profiles_or_widgets() {
        let mut store = MappingStore::new();
        let other_profile = store
            .add(widget_mapping("1", "4", "cfg").with_profile("live"))
            .unwrap();
        let other_widget = store.add(widget_mapping("2", "4", "steps")).unwrap();
        store
            .add(widget_mapping("3", "4", "cfg").with_transform(Transform::with_range(2.0, 8.0)))
            .unwrap();

        assert!(!store.get(&other_profile).unwrap().transform.has_range());
        assert!(!store.get(&other_widget).unwrap().transform.has_range());
    }

    #[test]
    fn update_propagates_range_and_resets_runtime() {
        let mut store = MappingStore::new();
        let a = store.add(widget_mapping("1", "4", "cfg")).unwrap();
        let b = store.add(widget_mapping("2", "4", "cfg")).unwrap();

        store.get_mut(&a).unwrap().runtime.was_active = true;
        store
            .update(&a, MappingPatch::mapping_type(MappingType::Incremental))
            .unwrap();
        assert!(!store.get(&a).unwrap().runtime.was_active);

        store
            .update(&a, MappingPatch::transform(Transform::with_range(3.0, 9.0)))
            .unwrap();
        assert_eq!(store.get(&b).unwrap().transform.target_max, Some(9.0));
    }

    #[test]
    fn cleared_range_is_cleared_for_siblings() {
        let mut store = MappingStore::new();
        let a = store
            .add(widget_mapping("1", "4", "cfg").with_transform(Transform::with_range(0.0, 50.0)))
            .unwrap();
        let b = store.add(widget_mapping("2", "4", "cfg")).unwrap();
        assert_eq!(store.get(&b).unwrap().transform.target_max, Some(50.0));

        store
            .update(&a, MappingPatch::transform(Transform::default()))
            .unwrap();
        let b = store.get(&b).unwrap();
        assert_eq!((b.transform.target_min, b.transform.target_max), (None, None));
    }

    #[test]
    fn narrowed_range_reaches_every_sibling() {
        let mut store = MappingStore::new();
        let a = store
            .add(widget_mapping("1", "4", "cfg").with_transform(Transform::with_range(0.0, 50.0)))
            .unwrap();
        let b = store.add(widget_mapping("2", "4", "cfg")).unwrap();
        let c = store.add(widget_mapping("3", "4", "cfg")).unwrap();

        store
            .update(&b, MappingPatch::transform(Transform::with_range(10.0, 20.0)))
            .unwrap();
        for id in [&a, &c] {
            let t = &store.get(id).unwrap().transform;
            assert_eq!((t.target_min, t.target_max), (Some(10.0), Some(20.0)));
        }
    }

    #[test]
    fn first_range_declared_by_update_propagates() {
        let mut store = MappingStore::new();
        let a = store.add(widget_mapping("1", "4", "cfg")).unwrap();
        let b = store.add(widget_mapping("2", "4", "cfg")).unwrap();
        assert!(!store.get(&b).unwrap().transform.has_range());

        store
            .update(&a, MappingPatch::transform(Transform::with_range(1.0, 5.0)))
            .unwrap();
        let b = store.get(&b).unwrap();
        assert_eq!((b.transform.target_min, b.transform.target_max), (Some(1.0), Some(5.0)));
    }

    #[test]
    fn update_unknown_id_fails() {
        let mut store = MappingStore::new();
        let result = store.update(&MappingId::from("nope"), MappingPatch::default());
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn delete_unknown_id_keeps_size() {
        let mut store = MappingStore::new();
        store.add(widget_mapping("1", "1", "a")).unwrap();
        assert!(store.delete(&MappingId::from("missing")).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn profiles_always_include_default() {
        let mut store = MappingStore::new();
        assert_eq!(store.profiles(), vec![DEFAULT_PROFILE.to_string()]);
        store.add(widget_mapping("1", "1", "a").with_profile("live")).unwrap();
        assert_eq!(store.profiles(), vec!["default".to_string(), "live".to_string()]);
    }

    #[test]
    fn lookups_by_target_and_widget() {
        let mut store = MappingStore::new();
        store.add(widget_mapping("1", "7", "seed")).unwrap();
        store
            .add(Mapping::new(cc("2"), Target::command("queue"), MappingType::Trigger))
            .unwrap();

        assert!(store.is_widget_mapped(DEFAULT_PROFILE, "7", "seed"));
        assert!(!store.is_widget_mapped("live", "7", "seed"));
        assert_eq!(store.for_target(DEFAULT_PROFILE, &Target::command("queue")).len(), 1);
    }

    #[test]
    fn retain_returns_removed() {
        let mut store = MappingStore::new();
        store.add(widget_mapping("1", "1", "a")).unwrap();
        store.add(widget_mapping("2", "2", "b")).unwrap();

        let removed = store.retain(|m| m.target.as_widget().is_some_and(|w| w.node_id == "1"));
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
