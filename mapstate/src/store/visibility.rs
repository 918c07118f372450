use std::sync::Arc;

use super::changes::{FeatureStoreLayerChanges, TrackingPause};
use crate::collection::MutationKind;
use crate::event::ListenerHandle;
use crate::feature::{FeatureHandle, FeatureId};
use crate::style::Style;
use crate::visibility::{FeatureVisibility, VisibilityEvent};

/// Visibility of a feature store layer.
///
/// Works like [`FeatureVisibility`], but applying and removing overlays never shows up in the
/// change tracker of the layer: while the tracker is active, change tracking is paused for the
/// duration of every mutator.
#[derive(Clone)]
pub struct FeatureStoreFeatureVisibility {
    visibility: Arc<FeatureVisibility>,
    changes: FeatureStoreLayerChanges,
}

impl FeatureStoreFeatureVisibility {
    /// Creates an empty visibility bound to the tracker.
    pub fn new(changes: FeatureStoreLayerChanges) -> Self {
        Self {
            visibility: Arc::new(FeatureVisibility::new()),
            changes,
        }
    }

    /// The underlying visibility, e.g. to synchronize other visibilities with it.
    pub fn visibility(&self) -> &Arc<FeatureVisibility> {
        &self.visibility
    }

    fn pause(&self) -> Option<TrackingPause> {
        self.changes
            .is_active()
            .then(|| self.changes.pause_tracking(MutationKind::Change))
    }

    /// See [`FeatureVisibility::highlight`].
    pub fn highlight(&self, to_highlight: impl IntoIterator<Item = (FeatureId, Style)>) {
        let _pause = self.pause();
        self.visibility.highlight(to_highlight);
    }

    /// See [`FeatureVisibility::un_highlight`].
    pub fn un_highlight(&self, ids: impl IntoIterator<Item = FeatureId>) {
        let _pause = self.pause();
        self.visibility.un_highlight(ids);
    }

    /// See [`FeatureVisibility::hide_objects`].
    pub fn hide_objects(&self, ids: impl IntoIterator<Item = FeatureId>) {
        let _pause = self.pause();
        self.visibility.hide_objects(ids);
    }

    /// See [`FeatureVisibility::show_objects`].
    pub fn show_objects(&self, ids: impl IntoIterator<Item = FeatureId>) {
        let _pause = self.pause();
        self.visibility.show_objects(ids);
    }

    /// See [`FeatureVisibility::add_highlight_feature`].
    pub fn add_highlight_feature(&self, id: &FeatureId, feature: FeatureHandle) {
        let _pause = self.pause();
        self.visibility.add_highlight_feature(id, feature);
    }

    /// See [`FeatureVisibility::add_hidden_feature`].
    pub fn add_hidden_feature(&self, id: &FeatureId, feature: FeatureHandle) {
        let _pause = self.pause();
        self.visibility.add_hidden_feature(id, feature);
    }

    /// See [`FeatureVisibility::clear`].
    pub fn clear(&self) {
        let _pause = self.pause();
        self.visibility.clear();
    }

    /// Returns true if the id is highlighted.
    pub fn is_highlighted(&self, id: &FeatureId) -> bool {
        self.visibility.is_highlighted(id)
    }

    /// Returns true if the id is hidden.
    pub fn is_hidden(&self, id: &FeatureId) -> bool {
        self.visibility.is_hidden(id)
    }

    /// Registers a listener for structural changes.
    pub fn on_changed(
        &self,
        listener: impl Fn(&VisibilityEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.visibility.on_changed(listener)
    }
}

impl std::fmt::Debug for FeatureStoreFeatureVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStoreFeatureVisibility")
            .field("visibility", &self.visibility)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::collection::FeatureCollection;
    use crate::feature::{Feature, StoreState};
    use crate::tests::TestAuthority;
    use crate::Color;

    #[test]
    fn overlays_do_not_reach_the_tracker() {
        let collection = FeatureCollection::new();
        let changes = FeatureStoreLayerChanges::new(
            "test",
            collection.clone(),
            Arc::new(TestAuthority::default()),
            Arc::new(FeatureVisibility::new()),
        );
        changes.track();
        let visibility = FeatureStoreFeatureVisibility::new(changes.clone());

        let paused_during_edit = Arc::new(Mutex::new(Vec::new()));
        let _listener = {
            let paused_during_edit = paused_during_edit.clone();
            let changes = changes.clone();
            collection.on_mutation(move |_| {
                paused_during_edit
                    .lock()
                    .push(changes.is_paused(MutationKind::Change))
            })
        };

        let feature = collection
            .add_feature(
                Feature::new()
                    .with_id("d")
                    .with_store_state(StoreState::Dynamic),
            )
            .expect("added");
        let id = FeatureId::from("d");
        visibility.highlight([(id.clone(), Style::fill(Color::RED))]);
        visibility.add_highlight_feature(&id, feature.clone());
        visibility.hide_objects([id.clone()]);
        visibility.add_hidden_feature(&id, feature.clone());
        visibility.show_objects([id.clone()]);
        visibility.un_highlight([id]);

        assert!(!changes.has_changes());
        assert!(!changes.is_paused(MutationKind::Change));
        assert_eq!(*paused_during_edit.lock(), vec![false, true, true, true, true]);
        assert!(!feature.read().overlay().is_active());
    }
}
