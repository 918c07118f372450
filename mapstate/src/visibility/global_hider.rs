use std::sync::Arc;

use ahash::{HashMap, HashSet};
use parking_lot::RwLock;

use super::{Revision, VisibilityAction, VisibilityEvent};
use crate::event::{EventEmitter, ListenerHandle};
use crate::feature::{FeatureHandle, FeatureId};

#[derive(Debug)]
struct HiddenEntry {
    count: usize,
    features: HashSet<FeatureHandle>,
}

/// Reference counted hiding shared by independent owners.
///
/// Every owner that hides an id must show it again before the id becomes visible: an id is
/// hidden while at least one hide is not matched by a show. Only transitions between hidden
/// and visible are reported to the listeners.
///
/// One hider is usually created by the application and passed to every layer that should
/// honor it.
#[derive(Default)]
pub struct GlobalHider {
    hidden: RwLock<HashMap<FeatureId, HiddenEntry>>,
    last_updated: RwLock<Revision>,
    changed: Arc<EventEmitter<VisibilityEvent>>,
}

impl GlobalHider {
    /// Creates a hider with nothing hidden.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one hide for each id. Ids that were visible before are reported with a single
    /// [`VisibilityAction::Hide`] event.
    pub fn hide_objects(&self, ids: impl IntoIterator<Item = FeatureId>) {
        let mut added = Vec::new();
        {
            let mut hidden = self.hidden.write();
            for id in ids {
                hidden
                    .entry(id.clone())
                    .and_modify(|entry| entry.count += 1)
                    .or_insert_with(|| {
                        added.push(id);
                        HiddenEntry {
                            count: 1,
                            features: HashSet::default(),
                        }
                    });
            }
        }

        self.emit(VisibilityAction::Hide, added);
    }

    /// Removes one hide for each id. Ids whose last hide was removed become visible, their
    /// features are released and the ids are reported with a single
    /// [`VisibilityAction::Show`] event. Ids that are not hidden are ignored.
    pub fn show_objects(&self, ids: impl IntoIterator<Item = FeatureId>) {
        let mut removed = Vec::new();
        let mut released = Vec::new();
        {
            let mut hidden = self.hidden.write();
            for id in ids {
                let Some(entry) = hidden.get_mut(&id) else {
                    continue;
                };

                entry.count -= 1;
                if entry.count == 0 {
                    if let Some(entry) = hidden.remove(&id) {
                        released.extend(entry.features);
                    }
                    removed.push(id);
                }
            }
        }

        for feature in released {
            feature.edit_overlay(|overlay| overlay.globally_hidden = false);
        }

        self.emit(VisibilityAction::Show, removed);
    }

    /// Attaches a concrete feature to a hidden id and hides it. Does nothing if the id is not
    /// hidden.
    pub fn add_feature(&self, id: &FeatureId, feature: FeatureHandle) {
        {
            let mut hidden = self.hidden.write();
            let Some(entry) = hidden.get_mut(id) else {
                return;
            };

            entry.features.insert(feature.clone());
        }

        feature.edit_overlay(|overlay| overlay.globally_hidden = true);
    }

    /// Forgets a concrete feature. The id stays hidden.
    pub fn release_feature(&self, feature: &FeatureHandle) {
        for entry in self.hidden.write().values_mut() {
            entry.features.remove(feature);
        }
    }

    /// Detaches the feature from every id other than `keep`. Returns true if it was attached
    /// to any of them.
    pub(crate) fn detach_feature(&self, feature: &FeatureHandle, keep: Option<&FeatureId>) -> bool {
        let mut detached = false;
        for (id, entry) in self.hidden.write().iter_mut() {
            if Some(id) != keep {
                detached |= entry.features.remove(feature);
            }
        }
        detached
    }

    /// Returns true if the id is hidden.
    pub fn is_hidden(&self, id: &FeatureId) -> bool {
        self.hidden.read().contains_key(id)
    }

    /// Number of unmatched hides of the id.
    pub fn hide_count(&self, id: &FeatureId) -> usize {
        self.hidden.read().get(id).map_or(0, |entry| entry.count)
    }

    /// All hidden ids.
    pub fn hidden_ids(&self) -> Vec<FeatureId> {
        self.hidden.read().keys().cloned().collect()
    }

    /// Revision of the last hidden/visible transition.
    pub fn last_updated(&self) -> Revision {
        *self.last_updated.read()
    }

    /// Registers a listener for hidden/visible transitions.
    pub fn on_changed(
        &self,
        listener: impl Fn(&VisibilityEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.changed.add_listener(listener)
    }

    fn emit(&self, action: VisibilityAction, ids: Vec<FeatureId>) {
        if ids.is_empty() {
            return;
        }

        *self.last_updated.write() = Revision::next();
        self.changed.raise(&VisibilityEvent { action, ids });
    }
}

impl std::fmt::Debug for GlobalHider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalHider")
            .field("hidden", &self.hidden.read().len())
            .field("last_updated", &*self.last_updated.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::feature::Feature;

    #[test]
    fn id_is_visible_after_every_hide_is_matched() {
        let hider = GlobalHider::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let _listener = {
            let events = events.clone();
            hider.on_changed(move |event| events.lock().push(event.action))
        };
        let id = FeatureId::from("a");
        let feature = FeatureHandle::new(Feature::new().with_id("a"));

        hider.hide_objects([id.clone()]);
        hider.hide_objects([id.clone()]);
        hider.add_feature(&id, feature.clone());
        assert_eq!(hider.hide_count(&id), 2);

        hider.show_objects([id.clone()]);
        assert!(hider.is_hidden(&id));
        assert!(feature.read().overlay().is_globally_hidden());

        hider.show_objects([id.clone()]);
        assert!(!hider.is_hidden(&id));
        assert!(!feature.read().overlay().is_globally_hidden());

        assert_eq!(
            *events.lock(),
            vec![VisibilityAction::Hide, VisibilityAction::Show]
        );
    }

    #[test]
    fn showing_unknown_ids_does_nothing() {
        let hider = GlobalHider::new();
        hider.show_objects([FeatureId::Int(1)]);
        assert_eq!(hider.hide_count(&FeatureId::Int(1)), 0);
        assert_eq!(hider.last_updated(), Revision::INITIAL);

        hider.hide_objects([FeatureId::Int(1)]);
        assert_eq!(hider.hide_count(&FeatureId::Int(1)), 1);
    }

    #[test]
    fn features_of_visible_ids_are_not_hidden() {
        let hider = GlobalHider::new();
        let feature = FeatureHandle::new(Feature::new().with_id(3));
        hider.add_feature(&FeatureId::Int(3), feature.clone());
        assert!(!feature.read().overlay().is_active());
    }
}
