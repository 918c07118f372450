//! Ordered, identity-stable store of concrete features that reports every mutation.

use std::sync::Arc;

use ahash::HashMap;
use parking_lot::RwLock;

use crate::error::MapStateError;
use crate::event::{EventEmitter, ListenerHandle};
use crate::feature::{Feature, FeatureHandle, FeatureId, FeatureUid};

/// Kind of a collection mutation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// A feature was added to the collection.
    Add,
    /// A feature in the collection was modified.
    Change,
    /// A feature was removed from the collection.
    Remove,
}

/// Origin of a collection mutation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChangeSource {
    /// Mutation made by the application or the user.
    User,
    /// Overlay (highlight or hide) applied or revoked by a visibility tracker.
    Overlay,
    /// Feature restored or updated from the authority by a change tracker.
    Authority,
}

/// A single mutation of a [`FeatureCollection`]. Each event carries exactly one feature.
#[derive(Debug, Clone)]
pub struct CollectionEvent {
    /// What happened.
    pub kind: MutationKind,
    /// The feature that was added, changed or removed.
    pub feature: FeatureHandle,
    /// Who caused the mutation.
    pub source: ChangeSource,
}

/// Ordered collection of concrete features.
///
/// All mutations - adding and removing features, and editing features through their
/// [`FeatureHandle`] - are reported to the listeners registered with
/// [`FeatureCollection::on_mutation`]. Cloning the collection returns another handle to the
/// same collection.
#[derive(Clone, Default)]
pub struct FeatureCollection {
    shared: Arc<CollectionShared>,
}

#[derive(Default)]
pub(crate) struct CollectionShared {
    state: RwLock<CollectionState>,
    events: Arc<EventEmitter<CollectionEvent>>,
}

#[derive(Default)]
struct CollectionState {
    features: Vec<FeatureHandle>,
    by_id: HashMap<FeatureId, FeatureHandle>,
    ids: HashMap<FeatureUid, FeatureId>,
}

impl FeatureCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new feature as a user mutation and returns its handle.
    pub fn add_feature(&self, feature: Feature) -> Result<FeatureHandle, MapStateError> {
        self.add_feature_with(feature, ChangeSource::User)
    }

    /// Adds a new feature, reporting the mutation with the given source.
    pub fn add_feature_with(
        &self,
        feature: Feature,
        source: ChangeSource,
    ) -> Result<FeatureHandle, MapStateError> {
        let handle = FeatureHandle::new(feature);
        self.add_handle_with(handle.clone(), source)?;
        Ok(handle)
    }

    /// Adds an existing concrete feature as a user mutation.
    pub fn add_handle(&self, handle: FeatureHandle) -> Result<(), MapStateError> {
        self.add_handle_with(handle, ChangeSource::User)
    }

    /// Adds an existing concrete feature. Adding a feature that is already in this collection
    /// does nothing.
    ///
    /// Fails if the feature belongs to another collection or if a feature with the same id is
    /// already in the collection.
    pub fn add_handle_with(
        &self,
        handle: FeatureHandle,
        source: ChangeSource,
    ) -> Result<(), MapStateError> {
        if let Some(owner) = handle.owner() {
            if Arc::ptr_eq(&owner, &self.shared) {
                return Ok(());
            }

            return Err(MapStateError::Generic(
                "feature already belongs to another collection".into(),
            ));
        }

        let id = handle.id();
        {
            let mut state = self.shared.state.write();
            if let Some(id) = id {
                if state.by_id.contains_key(&id) {
                    return Err(MapStateError::DuplicateId(id));
                }

                state.by_id.insert(id.clone(), handle.clone());
                state.ids.insert(handle.uid(), id);
            }

            state.features.push(handle.clone());
        }

        handle.set_owner(Some(Arc::downgrade(&self.shared)));
        self.shared.raise(MutationKind::Add, handle, source);

        Ok(())
    }

    /// Removes the feature as a user mutation. Returns false if the feature is not in the
    /// collection.
    pub fn remove_feature(&self, handle: &FeatureHandle) -> bool {
        self.remove_feature_with(handle, ChangeSource::User)
    }

    /// Removes the feature, reporting the mutation with the given source.
    pub fn remove_feature_with(&self, handle: &FeatureHandle, source: ChangeSource) -> bool {
        if !self.contains(handle) {
            return false;
        }

        {
            let mut state = self.shared.state.write();
            state.features.retain(|f| f != handle);
            if let Some(id) = state.ids.remove(&handle.uid()) {
                if state.by_id.get(&id) == Some(handle) {
                    state.by_id.remove(&id);
                }
            }
        }

        handle.set_owner(None);
        self.shared.raise(MutationKind::Remove, handle.clone(), source);

        true
    }

    /// Returns the feature with the given id.
    pub fn feature_by_id(&self, id: &FeatureId) -> Option<FeatureHandle> {
        self.shared.state.read().by_id.get(id).cloned()
    }

    /// Returns true if the concrete feature is in this collection.
    pub fn contains(&self, handle: &FeatureHandle) -> bool {
        handle
            .owner()
            .is_some_and(|owner| Arc::ptr_eq(&owner, &self.shared))
    }

    /// All features in insertion order.
    pub fn features(&self) -> Vec<FeatureHandle> {
        self.shared.state.read().features.clone()
    }

    /// Number of features in the collection.
    pub fn len(&self) -> usize {
        self.shared.state.read().features.len()
    }

    /// Returns true if the collection has no features.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a listener for all mutations of the collection.
    pub fn on_mutation(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.events.add_listener(listener)
    }
}

impl CollectionShared {
    pub(crate) fn feature_changed(&self, handle: &FeatureHandle, source: ChangeSource) {
        let new_id = handle.id();
        {
            let mut state = self.state.write();
            let old_id = state.ids.get(&handle.uid()).cloned();
            if old_id != new_id {
                if let Some(old_id) = old_id {
                    if state.by_id.get(&old_id) == Some(handle) {
                        state.by_id.remove(&old_id);
                    }
                    state.ids.remove(&handle.uid());
                }

                if let Some(new_id) = new_id {
                    if state.by_id.contains_key(&new_id) {
                        log::warn!("Feature id {new_id} is used by several features in a collection");
                    } else {
                        state.by_id.insert(new_id.clone(), handle.clone());
                    }
                    state.ids.insert(handle.uid(), new_id);
                }
            }
        }

        self.raise(MutationKind::Change, handle.clone(), source);
    }

    fn raise(&self, kind: MutationKind, feature: FeatureHandle, source: ChangeSource) {
        self.events.raise(&CollectionEvent {
            kind,
            feature,
            source,
        });
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    use super::*;

    fn record(collection: &FeatureCollection) -> (Arc<Mutex<Vec<CollectionEvent>>>, ListenerHandle) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let events = events.clone();
            collection.on_mutation(move |event| events.lock().push(event.clone()))
        };
        (events, handle)
    }

    #[test]
    fn mutations_are_reported_in_order() {
        let collection = FeatureCollection::new();
        let (events, _listener) = record(&collection);

        let feature = collection
            .add_feature(Feature::new().with_id("F1"))
            .expect("added");
        feature.edit(|f| f.properties_mut().insert("name".into(), "a".into()));
        assert!(collection.remove_feature(&feature));
        assert!(!collection.remove_feature(&feature));

        let events = events.lock();
        let kinds: Vec<_> = events.iter().map(|e| (e.kind, e.source)).collect();
        assert_eq!(
            kinds,
            vec![
                (MutationKind::Add, ChangeSource::User),
                (MutationKind::Change, ChangeSource::User),
                (MutationKind::Remove, ChangeSource::User),
            ]
        );
        assert!(events.iter().all(|e| e.feature == feature));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let collection = FeatureCollection::new();
        collection
            .add_feature(Feature::new().with_id(1))
            .expect("added");

        let result = collection.add_feature(Feature::new().with_id(1));
        assert_matches!(result, Err(MapStateError::DuplicateId(FeatureId::Int(1))));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn id_index_follows_edits() {
        let collection = FeatureCollection::new();
        let feature = collection.add_feature(Feature::new()).expect("added");
        assert!(collection.feature_by_id(&"server-1".into()).is_none());

        feature.edit_with(ChangeSource::Authority, |f| {
            f.set_id(Some("server-1".into()))
        });
        assert_eq!(collection.feature_by_id(&"server-1".into()), Some(feature.clone()));

        collection.remove_feature(&feature);
        assert!(collection.feature_by_id(&"server-1".into()).is_none());
        assert!(collection.is_empty());
    }

    #[test]
    fn feature_belongs_to_one_collection() {
        let first = FeatureCollection::new();
        let second = FeatureCollection::new();
        let feature = first.add_feature(Feature::new()).expect("added");

        assert!(first.add_handle(feature.clone()).is_ok());
        assert_eq!(first.len(), 1);
        assert!(second.add_handle(feature.clone()).is_err());

        first.remove_feature(&feature);
        assert!(second.add_handle(feature.clone()).is_ok());
        assert!(second.contains(&feature));
        assert!(!first.contains(&feature));
    }
}
