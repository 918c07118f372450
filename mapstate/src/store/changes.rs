//! Tracking of local modifications of a feature store and committing them to the authority.

use std::sync::{Arc, Weak};

use ahash::{HashMap, HashSet};
use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::authority::{CommitAction, CommitKind, FailedAction, FeatureAuthority};
use crate::collection::{ChangeSource, CollectionEvent, FeatureCollection, MutationKind};
use crate::error::MapStateError;
use crate::event::{EventEmitter, ListenerHandle};
use crate::feature::{FeatureHandle, FeatureUid, StoreState};
use crate::visibility::FeatureVisibility;

/// Pending modifications of a store, as returned by
/// [`FeatureStoreLayerChanges::get_changes`].
#[derive(Debug, Clone, Default)]
pub struct Changes {
    /// New features that do not exist on the authority yet.
    pub add: Vec<FeatureHandle>,
    /// Stored features that were modified.
    pub edit: Vec<FeatureHandle>,
    /// Stored features that were removed.
    pub remove: Vec<FeatureHandle>,
    /// Static features that were copied into the store but not modified yet.
    pub converted: Vec<FeatureHandle>,
}

impl Changes {
    /// Returns true if there is nothing to add, edit or remove. Converted features alone are
    /// not a change.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.edit.is_empty() && self.remove.is_empty()
    }
}

/// Sizes of the change sets, reported after every tracked mutation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Number of added features.
    pub added: usize,
    /// Number of edited features.
    pub edited: usize,
    /// Number of removed features.
    pub removed: usize,
    /// Number of converted static features.
    pub converted: usize,
}

/// Result of [`FeatureStoreLayerChanges::commit_changes`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitOutcome {
    /// Number of actions accepted by the authority.
    pub committed: usize,
    /// Actions rejected by the authority. Their features were rolled back.
    pub failed: Vec<FailedAction>,
    /// Number of unmodified converted features that were restored to their static version.
    pub restored: usize,
    /// Number of added features the authority accepted without returning an id. They stay
    /// in the change set.
    pub unresolved: usize,
}

#[derive(Debug, Default)]
struct ChangeSets {
    added: Vec<FeatureHandle>,
    edited: Vec<FeatureHandle>,
    removed: Vec<FeatureHandle>,
    converted: Vec<FeatureHandle>,
    /// Removed features that had been edited before their removal.
    edited_before_removal: HashSet<FeatureUid>,
    dirty: bool,
    seq: u64,
    stamps: HashMap<FeatureUid, u64>,
}

impl ChangeSets {
    fn touch(&mut self, feature: &FeatureHandle) {
        self.seq += 1;
        let uid = feature.uid();
        if self.contains(feature) {
            self.stamps.insert(uid, self.seq);
        } else {
            self.stamps.remove(&uid);
        }
        if !self.removed.contains(feature) {
            self.edited_before_removal.remove(&uid);
        }
        self.dirty = !self.is_clear();
    }

    fn contains(&self, feature: &FeatureHandle) -> bool {
        [&self.added, &self.edited, &self.removed, &self.converted]
            .iter()
            .any(|set| set.contains(feature))
    }

    fn is_clear(&self) -> bool {
        self.added.is_empty()
            && self.edited.is_empty()
            && self.removed.is_empty()
            && self.converted.is_empty()
    }

    /// Moves a stored feature into the removed set.
    fn mark_removed(&mut self, feature: &FeatureHandle) {
        if remove(&mut self.edited, feature) {
            self.edited_before_removal.insert(feature.uid());
        }
        remove(&mut self.converted, feature);
        insert(&mut self.removed, feature);
    }

    /// Takes a stored feature back after it was removed. Returns false if the feature was not
    /// in the removed set and is not static.
    fn mark_restored(&mut self, feature: &FeatureHandle, state: StoreState) -> bool {
        let was_removed = remove(&mut self.removed, feature);
        if self.edited_before_removal.remove(&feature.uid()) {
            insert(&mut self.edited, feature);
        } else if state == StoreState::Static {
            insert(&mut self.converted, feature);
        }

        was_removed || state == StoreState::Static
    }

    fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            added: self.added.len(),
            edited: self.edited.len(),
            removed: self.removed.len(),
            converted: self.converted.len(),
        }
    }

    fn snapshot(&self) -> (Changes, u64) {
        (
            Changes {
                add: self.added.clone(),
                edit: self.edited.clone(),
                remove: self.removed.clone(),
                converted: self.converted.clone(),
            },
            self.seq,
        )
    }

    /// Removes the features of the snapshot that were not classified again after it was
    /// taken.
    fn drain(&mut self, snapshot: &Changes, seq: u64, keep: &[FeatureHandle]) {
        let stamps = &self.stamps;
        let drained = |feature: &FeatureHandle| {
            !keep.contains(feature) && stamps.get(&feature.uid()).is_some_and(|s| *s <= seq)
        };

        let is_drained = |set: &[FeatureHandle], feature: &FeatureHandle| {
            set.contains(feature) && drained(feature)
        };

        self.added.retain(|f| !is_drained(snapshot.add.as_slice(), f));
        self.edited.retain(|f| !is_drained(snapshot.edit.as_slice(), f));
        self.removed.retain(|f| !is_drained(snapshot.remove.as_slice(), f));
        self.converted.retain(|f| !is_drained(snapshot.converted.as_slice(), f));

        let Self {
            added,
            edited,
            removed,
            converted,
            edited_before_removal,
            stamps,
            ..
        } = &mut *self;
        stamps.retain(|uid, _| {
            [&*added, &*edited, &*removed, &*converted]
                .iter()
                .any(|set| set.iter().any(|f| f.uid() == *uid))
        });
        edited_before_removal.retain(|uid| removed.iter().any(|f| f.uid() == *uid));

        self.dirty = !self.is_clear();
    }
}

fn insert(set: &mut Vec<FeatureHandle>, feature: &FeatureHandle) {
    if !set.contains(feature) {
        set.push(feature.clone());
    }
}

fn remove(set: &mut Vec<FeatureHandle>, feature: &FeatureHandle) -> bool {
    let len = set.len();
    set.retain(|f| f != feature);
    set.len() != len
}

/// Change tracker of a feature store layer.
///
/// While active, the tracker listens to the user mutations of the layer collection and sorts
/// the touched features into added, edited, removed and converted sets based on their
/// store-state tag. Mutations made by visibility overlays or by the tracker itself are never
/// tracked.
///
/// Cloning returns another handle to the same tracker.
#[derive(Clone)]
pub struct FeatureStoreLayerChanges {
    shared: Arc<ChangesShared>,
}

struct ChangesShared {
    collection: FeatureCollection,
    authority: Arc<dyn FeatureAuthority>,
    hidden_static: Arc<FeatureVisibility>,
    state: Arc<TrackerState>,
    listener: Mutex<Option<ListenerHandle>>,
    operation: tokio::sync::Mutex<()>,
}

struct TrackerState {
    layer_name: String,
    sets: Mutex<ChangeSets>,
    paused: Mutex<HashMap<MutationKind, usize>>,
    changed: Arc<EventEmitter<ChangeSummary>>,
}

impl FeatureStoreLayerChanges {
    /// Creates an inactive tracker for the given collection.
    ///
    /// `hidden_static` holds the ids of static features that are superseded by a local copy.
    /// Restoring a static feature shows its id there again.
    pub fn new(
        layer_name: impl Into<String>,
        collection: FeatureCollection,
        authority: Arc<dyn FeatureAuthority>,
        hidden_static: Arc<FeatureVisibility>,
    ) -> Self {
        Self {
            shared: Arc::new(ChangesShared {
                collection,
                authority,
                hidden_static,
                state: Arc::new(TrackerState {
                    layer_name: layer_name.into(),
                    sets: Mutex::new(ChangeSets::default()),
                    paused: Mutex::new(HashMap::default()),
                    changed: Arc::new(EventEmitter::new()),
                }),
                listener: Mutex::new(None),
                operation: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Starts listening to the collection. Does nothing if already active.
    pub fn track(&self) {
        let mut listener = self.shared.listener.lock();
        if listener.is_some() {
            return;
        }

        let weak: Weak<TrackerState> = Arc::downgrade(&self.shared.state);
        *listener = Some(self.shared.collection.on_mutation(move |event| {
            if let Some(state) = weak.upgrade() {
                state.classify(event);
            }
        }));

        debug!("Layer {}: change tracking started", self.shared.state.layer_name);
    }

    /// Stops listening to the collection. Collected changes are kept.
    pub fn un_track(&self) {
        if self.shared.listener.lock().take().is_some() {
            debug!("Layer {}: change tracking stopped", self.shared.state.layer_name);
        }
    }

    /// Returns true if the tracker listens to the collection.
    pub fn is_active(&self) -> bool {
        self.shared.listener.lock().is_some()
    }

    /// Suspends tracking of one mutation kind until the returned guard is dropped. Pauses
    /// nest.
    pub fn pause_tracking(&self, kind: MutationKind) -> TrackingPause {
        *self.shared.state.paused.lock().entry(kind).or_default() += 1;
        TrackingPause {
            state: self.shared.state.clone(),
            kind,
        }
    }

    /// Returns true if the given mutation kind is currently paused.
    pub fn is_paused(&self, kind: MutationKind) -> bool {
        self.shared.state.is_paused(kind)
    }

    /// Current change sets.
    pub fn get_changes(&self) -> Changes {
        self.shared.state.sets.lock().snapshot().0
    }

    /// Returns true if there is anything to commit or restore.
    pub fn has_changes(&self) -> bool {
        self.shared.state.sets.lock().dirty
    }

    /// Registers the removal of a feature that is not part of the collection, e.g. a static
    /// feature that only exists in the static representation.
    pub fn remove_feature(&self, feature: &FeatureHandle) {
        {
            let mut sets = self.shared.state.sets.lock();
            if feature.store_state().is_none() {
                remove(&mut sets.added, feature);
            } else {
                sets.mark_removed(feature);
            }
            sets.touch(feature);
        }

        self.shared.state.notify();
    }

    /// Registers a listener called with the set sizes after every tracked mutation.
    pub fn on_changed(
        &self,
        listener: impl Fn(&ChangeSummary) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.state.changed.add_listener(listener)
    }

    /// Sends all changes to the authority in one request.
    ///
    /// If nothing was added, edited or removed, converted features are restored to their
    /// static version and no request is made. Otherwise accepted actions are applied to
    /// their features and rejected ones are rolled back. Unmodified converted features are
    /// restored in both cases.
    ///
    /// Returns an error and keeps every change if the request itself fails. Changes made
    /// while the request is in flight are kept for the next commit.
    pub async fn commit_changes(&self, url: &str) -> Result<CommitOutcome, MapStateError> {
        let _operation = self.shared.operation.lock().await;
        let layer_name = &self.shared.state.layer_name;
        let (snapshot, seq) = self.shared.state.sets.lock().snapshot();

        if snapshot.is_empty() {
            let restored = self.shared.restore_all(&snapshot.converted).await;
            self.shared.state.drain(&snapshot, seq, &[]);

            debug!("Layer {layer_name}: nothing to commit, restored {restored} converted features");
            return Ok(CommitOutcome {
                restored,
                ..Default::default()
            });
        }

        let actions: Vec<CommitAction> = snapshot
            .add
            .iter()
            .cloned()
            .map(CommitAction::add)
            .chain(snapshot.edit.iter().cloned().map(CommitAction::edit))
            .chain(snapshot.remove.iter().cloned().map(CommitAction::remove))
            .collect();
        let items = actions
            .iter()
            .map(CommitAction::request_item)
            .collect::<Result<Vec<_>, _>>()?;

        let response = match self.shared.authority.commit(url, &items).await {
            Ok(response) => response,
            Err(err) => {
                error!("Layer {layer_name}: failed to commit changes to {url}: {err}");
                return Err(err);
            }
        };

        let failed: HashMap<usize, &FailedAction> = response
            .failed_actions
            .iter()
            .map(|failure| (failure.index, failure))
            .collect();
        let mut inserted_ids = response.inserted_ids.iter();
        let mut rollback = Vec::new();
        let mut unresolved = Vec::new();
        let mut committed = 0;

        for (index, action) in actions.iter().enumerate() {
            if let Some(failure) = failed.get(&index) {
                warn!(
                    "Layer {layer_name}: {:?} of {:?} was rejected: {}",
                    action.kind(),
                    action.feature(),
                    failure.error
                );
                rollback.push(action.feature().clone());
                continue;
            }

            match action.kind() {
                CommitKind::Add => match inserted_ids.next() {
                    Some(inserted) => action.succeed(Some(inserted.id.clone())),
                    None => {
                        error!(
                            "Layer {layer_name}: authority accepted {:?} without returning its id",
                            action.feature()
                        );
                        unresolved.push(action.feature().clone());
                        continue;
                    }
                },
                _ => action.succeed(None),
            }

            committed += 1;
        }

        if inserted_ids.next().is_some() {
            warn!("Layer {layer_name}: authority returned more ids than features were added");
        }

        self.shared.restore_all(&rollback).await;
        let restored = self.shared.restore_all(&snapshot.converted).await;
        self.shared.state.drain(&snapshot, seq, &unresolved);

        info!(
            "Layer {layer_name}: committed {committed} changes, {} rejected",
            rollback.len()
        );

        Ok(CommitOutcome {
            committed,
            failed: response.failed_actions.clone(),
            restored,
            unresolved: unresolved.len(),
        })
    }

    /// Discards every change: new features are removed, static features are restored to
    /// their static version and other features are reloaded from the authority.
    ///
    /// Features that fail to reload are logged and left as they are. The change sets are
    /// cleared in any case.
    pub async fn reset(&self) {
        let _operation = self.shared.operation.lock().await;
        let (snapshot, seq) = self.shared.state.sets.lock().snapshot();

        let mut features: Vec<FeatureHandle> = Vec::new();
        for feature in snapshot
            .add
            .iter()
            .chain(&snapshot.edit)
            .chain(&snapshot.remove)
            .chain(&snapshot.converted)
        {
            insert(&mut features, feature);
        }

        let restored = self.shared.restore_all(&features).await;
        self.shared.state.drain(&snapshot, seq, &[]);

        info!(
            "Layer {}: reset {restored} of {} changed features",
            self.shared.state.layer_name,
            features.len()
        );
    }

    /// Restores one feature to its stored version.
    pub async fn reset_feature(&self, feature: &FeatureHandle) -> Result<(), MapStateError> {
        self.shared.reset_feature(feature).await
    }
}

impl std::fmt::Debug for FeatureStoreLayerChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStoreLayerChanges")
            .field("layer_name", &self.shared.state.layer_name)
            .field("active", &self.is_active())
            .field("changes", &self.shared.state.sets.lock().summary())
            .finish()
    }
}

impl TrackerState {
    fn is_paused(&self, kind: MutationKind) -> bool {
        self.paused.lock().get(&kind).is_some_and(|count| *count > 0)
    }

    fn classify(&self, event: &CollectionEvent) {
        if event.source != ChangeSource::User || self.is_paused(event.kind) {
            return;
        }

        let feature = &event.feature;
        let state = feature.store_state();
        let changed = {
            let mut sets = self.sets.lock();
            let changed = match (event.kind, state) {
                (MutationKind::Add, None) => {
                    insert(&mut sets.added, feature);
                    true
                }
                (MutationKind::Add, Some(state)) => sets.mark_restored(feature, state),
                (MutationKind::Change, None) => false,
                (MutationKind::Change, Some(StoreState::Static)) => {
                    remove(&mut sets.converted, feature);
                    insert(&mut sets.edited, feature);
                    true
                }
                (MutationKind::Change, Some(_)) => {
                    insert(&mut sets.edited, feature);
                    true
                }
                (MutationKind::Remove, None) => remove(&mut sets.added, feature),
                (MutationKind::Remove, Some(_)) => {
                    sets.mark_removed(feature);
                    true
                }
            };

            if changed {
                sets.touch(feature);
            }
            changed
        };

        if changed {
            self.notify();
        }
    }

    fn notify(&self) {
        let summary = self.sets.lock().summary();
        self.changed.raise(&summary);
    }

    fn drain(&self, snapshot: &Changes, seq: u64, keep: &[FeatureHandle]) {
        self.sets.lock().drain(snapshot, seq, keep);
        self.notify();
    }
}

impl ChangesShared {
    /// Restores the features concurrently. Returns the number of successful restorations.
    async fn restore_all(&self, features: &[FeatureHandle]) -> usize {
        let results = join_all(features.iter().map(|f| self.reset_feature(f))).await;

        let mut restored = 0;
        for (feature, result) in features.iter().zip(results) {
            match result {
                Ok(()) => restored += 1,
                Err(err) => warn!(
                    "Layer {}: failed to restore {feature:?}: {err}",
                    self.state.layer_name
                ),
            }
        }

        restored
    }

    async fn reset_feature(&self, feature: &FeatureHandle) -> Result<(), MapStateError> {
        match feature.store_state() {
            None => {
                self.collection
                    .remove_feature_with(feature, ChangeSource::Authority);
            }
            Some(StoreState::Static) => {
                if let Some(id) = feature.id() {
                    self.hidden_static.show_objects([id]);
                }
                self.collection
                    .remove_feature_with(feature, ChangeSource::Authority);
            }
            Some(state) => {
                let id = feature.id().ok_or_else(|| {
                    MapStateError::Generic("stored feature has no id".into())
                })?;

                let mut stored = self.authority.fetch_feature(&id).await?;
                if stored.store_state().is_none() {
                    stored.set_store_state(Some(state));
                }

                feature.replace_with(stored, ChangeSource::Authority);
                if !self.collection.contains(feature) {
                    self.collection
                        .add_handle_with(feature.clone(), ChangeSource::Authority)?;
                }
            }
        }

        Ok(())
    }
}

/// Keeps a mutation kind untracked while alive. Created by
/// [`FeatureStoreLayerChanges::pause_tracking`].
#[must_use = "tracking resumes as soon as the guard is dropped"]
pub struct TrackingPause {
    state: Arc<TrackerState>,
    kind: MutationKind,
}

impl Drop for TrackingPause {
    fn drop(&mut self) {
        let mut paused = self.state.paused.lock();
        if let Some(count) = paused.get_mut(&self.kind) {
            *count = count.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for TrackingPause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingPause")
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::feature::{Feature, FeatureId};
    use crate::store::authority::{CommitResponse, InsertedId};
    use crate::style::Style;
    use crate::tests::TestAuthority;
    use crate::Color;

    const URL: &str = "https://example.com/commit";

    struct Fixture {
        collection: FeatureCollection,
        authority: Arc<TestAuthority>,
        hidden_static: Arc<FeatureVisibility>,
        changes: FeatureStoreLayerChanges,
    }

    fn fixture() -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();

        let collection = FeatureCollection::new();
        let authority = Arc::new(TestAuthority::default());
        let hidden_static = Arc::new(FeatureVisibility::new());
        let changes = FeatureStoreLayerChanges::new(
            "test",
            collection.clone(),
            authority.clone(),
            hidden_static.clone(),
        );
        changes.track();

        Fixture {
            collection,
            authority,
            hidden_static,
            changes,
        }
    }

    fn stored(id: &str, state: StoreState) -> Feature {
        Feature::new().with_id(id).with_store_state(state)
    }

    #[test]
    fn add_then_remove_cancels() {
        let fx = fixture();
        let feature = fx.collection.add_feature(Feature::new()).expect("added");
        assert_eq!(fx.changes.get_changes().add, vec![feature.clone()]);

        fx.collection.remove_feature(&feature);
        let changes = fx.changes.get_changes();
        assert!(changes.add.is_empty());
        assert!(changes.remove.is_empty());
        assert!(!fx.changes.has_changes());
    }

    fn assert_disjoint(changes: &Changes) {
        let all: Vec<&FeatureHandle> = changes
            .add
            .iter()
            .chain(&changes.edit)
            .chain(&changes.remove)
            .chain(&changes.converted)
            .collect();
        for (i, feature) in all.iter().enumerate() {
            assert!(
                !all[i + 1..].contains(feature),
                "{feature:?} is in more than one change set"
            );
        }
    }

    #[test]
    fn re_added_feature_leaves_the_removed_set() {
        let fx = fixture();
        let dynamic = fx
            .collection
            .add_feature(stored("d", StoreState::Dynamic))
            .expect("added");
        fx.collection.remove_feature(&dynamic);
        assert_eq!(fx.changes.get_changes().remove, vec![dynamic.clone()]);

        fx.collection.add_handle(dynamic.clone()).expect("re-added");
        assert!(fx.changes.get_changes().remove.is_empty());
        assert!(!fx.changes.has_changes());

        dynamic.edit(|f| f.set_style(Some(Style::fill(Color::RED))));
        let changes = fx.changes.get_changes();
        assert_disjoint(&changes);
        assert_eq!(changes.edit, vec![dynamic.clone()]);
        assert!(changes.remove.is_empty());

        fx.collection.remove_feature(&dynamic);
        fx.collection.add_handle(dynamic.clone()).expect("re-added");
        let changes = fx.changes.get_changes();
        assert_disjoint(&changes);
        assert_eq!(changes.edit, vec![dynamic]);
    }

    #[test]
    fn re_added_static_feature_is_converted_again() {
        let fx = fixture();
        let converted = fx
            .collection
            .add_feature(stored("s", StoreState::Static))
            .expect("added");
        fx.collection.remove_feature(&converted);
        let changes = fx.changes.get_changes();
        assert_eq!(changes.remove, vec![converted.clone()]);
        assert!(changes.converted.is_empty());

        fx.collection.add_handle(converted.clone()).expect("re-added");
        let changes = fx.changes.get_changes();
        assert_disjoint(&changes);
        assert_eq!(changes.converted, vec![converted]);
        assert!(changes.remove.is_empty());
    }

    #[test]
    fn classification_follows_store_state() {
        let fx = fixture();
        let dynamic = fx
            .collection
            .add_feature(stored("d", StoreState::Dynamic))
            .expect("added");
        let converted = fx
            .collection
            .add_feature(stored("s", StoreState::Static))
            .expect("added");
        assert!(fx.changes.get_changes().edit.is_empty());
        assert_eq!(fx.changes.get_changes().converted, vec![converted.clone()]);

        dynamic.edit(|f| f.set_style(Some(Style::fill(Color::RED))));
        converted.edit(|f| f.properties_mut().insert("a".into(), json!(1)));

        let changes = fx.changes.get_changes();
        assert_eq!(changes.edit, vec![dynamic.clone(), converted.clone()]);
        assert!(changes.converted.is_empty());

        fx.collection.remove_feature(&dynamic);
        let changes = fx.changes.get_changes();
        assert_eq!(changes.edit, vec![converted]);
        assert_eq!(changes.remove, vec![dynamic]);
    }

    #[test]
    fn paused_and_overlay_changes_are_not_tracked() {
        let fx = fixture();
        let feature = fx
            .collection
            .add_feature(stored("d", StoreState::Dynamic))
            .expect("added");

        let visibility = FeatureVisibility::new();
        visibility.hide_objects([FeatureId::from("d")]);
        visibility.add_hidden_feature(&"d".into(), feature.clone());

        {
            let _pause = fx.changes.pause_tracking(MutationKind::Change);
            assert!(fx.changes.is_paused(MutationKind::Change));
            feature.edit(|f| f.set_style(None));
        }
        assert!(!fx.changes.is_paused(MutationKind::Change));
        assert!(!fx.changes.has_changes());

        fx.changes.un_track();
        feature.edit(|f| f.set_style(None));
        assert!(!fx.changes.has_changes());
    }

    #[test]
    fn summary_is_reported() {
        let fx = fixture();
        let summaries = Arc::new(Mutex::new(Vec::new()));
        let _listener = {
            let summaries = summaries.clone();
            fx.changes
                .on_changed(move |summary| summaries.lock().push(*summary))
        };

        fx.collection.add_feature(Feature::new()).expect("added");
        assert_eq!(
            *summaries.lock(),
            vec![ChangeSummary {
                added: 1,
                ..Default::default()
            }]
        );
    }

    #[tokio::test]
    async fn partial_failure_commit() {
        let fx = fixture();
        let f1 = fx.collection.add_feature(Feature::new()).expect("added");
        let f2 = fx
            .collection
            .add_feature(stored("F2", StoreState::Dynamic))
            .expect("added");
        f2.edit(|f| f.properties_mut().insert("name".into(), json!("local")));

        fx.authority
            .store(stored("F2", StoreState::Dynamic).with_property("name", json!("server")));
        fx.authority.respond(CommitResponse {
            inserted_ids: vec![InsertedId {
                id: "server-1".into(),
            }],
            failed_actions: vec![FailedAction {
                index: 1,
                error: "conflict".into(),
            }],
        });

        let outcome = fx.changes.commit_changes(URL).await.expect("committed");
        assert_eq!(outcome.committed, 1);
        assert_eq!(outcome.failed.len(), 1);

        let requests = fx.authority.requests();
        assert_eq!(requests.len(), 1);
        let (url, items) = &requests[0];
        assert_eq!(url, URL);
        let kinds: Vec<_> = items.iter().map(|item| item.action).collect();
        assert_eq!(kinds, vec![CommitKind::Add, CommitKind::Edit]);

        assert_eq!(f1.id(), Some(FeatureId::from("server-1")));
        assert_eq!(f1.store_state(), Some(StoreState::Dynamic));
        assert_eq!(f2.read().properties()["name"], json!("server"));
        assert!(fx.collection.contains(&f2));
        assert!(!fx.changes.has_changes());
    }

    #[tokio::test]
    async fn transport_failure_keeps_changes() {
        let fx = fixture();
        let feature = fx.collection.add_feature(Feature::new()).expect("added");
        fx.authority
            .fail_next_commit(MapStateError::Transport("connection refused".into()));

        let result = fx.changes.commit_changes(URL).await;
        assert_matches!(result, Err(MapStateError::Transport(_)));
        assert_eq!(fx.changes.get_changes().add, vec![feature.clone()]);
        assert_eq!(feature.store_state(), None);
    }

    #[tokio::test]
    async fn add_without_returned_id_stays_pending() {
        let fx = fixture();
        let first = fx.collection.add_feature(Feature::new()).expect("added");
        let second = fx.collection.add_feature(Feature::new()).expect("added");
        fx.authority.respond(CommitResponse {
            inserted_ids: vec![InsertedId { id: FeatureId::Int(1) }],
            failed_actions: vec![],
        });

        let outcome = fx.changes.commit_changes(URL).await.expect("committed");
        assert_eq!(outcome.unresolved, 1);
        assert_eq!(first.id(), Some(FeatureId::Int(1)));
        assert_eq!(fx.changes.get_changes().add, vec![second]);
    }

    #[tokio::test]
    async fn empty_commit_restores_converted_features() {
        let fx = fixture();
        fx.hidden_static.hide_objects([FeatureId::from("s")]);
        let converted = fx
            .collection
            .add_feature(stored("s", StoreState::Static))
            .expect("added");

        let outcome = fx.changes.commit_changes(URL).await.expect("committed");
        assert_eq!(outcome.restored, 1);
        assert!(fx.authority.requests().is_empty());
        assert!(!fx.collection.contains(&converted));
        assert!(!fx.hidden_static.is_hidden(&"s".into()));
        assert!(!fx.changes.has_changes());
    }

    #[tokio::test]
    async fn reset_restores_every_feature() {
        let fx = fixture();
        let new_feature = fx.collection.add_feature(Feature::new()).expect("added");
        let edited = fx
            .collection
            .add_feature(stored("e", StoreState::Edited))
            .expect("added");
        edited.edit(|f| f.set_style(Some(Style::fill(Color::RED))));
        let removed = fx
            .collection
            .add_feature(stored("r", StoreState::Dynamic))
            .expect("added");
        fx.collection.remove_feature(&removed);

        fx.hidden_static.hide_objects([FeatureId::from("s")]);
        let static_placeholder = FeatureHandle::new(stored("s", StoreState::Static));
        fx.changes.remove_feature(&static_placeholder);

        fx.authority.store(stored("e", StoreState::Edited));
        fx.authority.store(stored("r", StoreState::Dynamic));

        fx.changes.reset().await;

        assert!(!fx.collection.contains(&new_feature));
        assert_eq!(edited.read().style(), None);
        assert_eq!(edited.store_state(), Some(StoreState::Edited));
        assert!(fx.collection.contains(&removed));
        assert!(!fx.hidden_static.is_hidden(&"s".into()));
        assert!(!fx.changes.has_changes());
    }

    #[tokio::test]
    async fn failed_restoration_is_skipped() {
        let fx = fixture();
        let feature = fx
            .collection
            .add_feature(stored("gone", StoreState::Dynamic))
            .expect("added");
        feature.edit(|f| f.set_style(Some(Style::fill(Color::RED))));

        fx.changes.reset().await;

        assert_eq!(feature.read().style(), Some(&Style::fill(Color::RED)));
        assert!(!fx.changes.has_changes());
        assert_matches!(
            fx.changes.reset_feature(&feature).await,
            Err(MapStateError::NotFound)
        );
    }
}
