//! Functions that keep visibility trackers and feature collections in sync.
//!
//! Both functions first replay the current state of the source and then forward every
//! structural change as it happens. Synchronization lasts as long as the returned value
//! is alive.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{FeatureVisibility, GlobalHider, Revision, VisibilityAction, VisibilityEvent};
use crate::collection::{ChangeSource, CollectionEvent, FeatureCollection, MutationKind};
use crate::event::ListenerHandle;
use crate::feature::FeatureHandle;

/// Makes `destination` follow `source`.
///
/// Everything currently highlighted or hidden in `source` is applied to `destination`, after
/// that every structural change of `source` is applied to `destination` as well. Dropping
/// the returned handle stops forwarding. Changes made directly to `destination` are not
/// propagated back.
pub fn synchronize_feature_visibility(
    source: &Arc<FeatureVisibility>,
    destination: &Arc<FeatureVisibility>,
) -> ListenerHandle {
    destination.highlight(source.highlighted());
    destination.hide_objects(source.hidden_ids());

    let weak_source = Arc::downgrade(source);
    let weak_destination = Arc::downgrade(destination);
    source.on_changed(move |event| {
        let (Some(source), Some(destination)) =
            (weak_source.upgrade(), weak_destination.upgrade())
        else {
            return;
        };

        forward_event(&source, &destination, event);
    })
}

fn forward_event(source: &FeatureVisibility, destination: &FeatureVisibility, event: &VisibilityEvent) {
    let ids = event.ids.iter().cloned();
    match event.action {
        VisibilityAction::Highlight => destination.highlight(
            ids.filter_map(|id| source.highlight_style(&id).map(|style| (id, style))),
        ),
        VisibilityAction::UnHighlight => destination.un_highlight(ids),
        VisibilityAction::Hide => destination.hide_objects(ids),
        VisibilityAction::Show => destination.show_objects(ids),
    }
}

/// Keeps the features of a collection in sync with a visibility tracker and, optionally, a
/// global hider. Created by [`synchronize_collection_visibility`].
///
/// Dropping the value stops synchronization. Overlays that were already applied stay on the
/// features.
///
/// Forwarding of new highlights and hides can be suspended with
/// [`suspend`](Self::suspend), e.g. while a large batch of ids is hidden. The collection then
/// falls behind the trackers and [`catch_up`](Self::catch_up) brings it up to date with one
/// scan. Features arriving in the collection get their overlays in either case.
pub struct CollectionVisibilitySync {
    shared: Arc<SyncShared>,
    _listeners: Vec<ListenerHandle>,
}

struct SyncShared {
    collection: FeatureCollection,
    visibility: Arc<FeatureVisibility>,
    global_hider: Option<Arc<GlobalHider>>,
    watermarks: Mutex<Watermarks>,
    suspended: Mutex<usize>,
}

/// Revisions of the trackers the collection is in sync with. A tracker event that was not
/// forwarded freezes the watermark of its tracker until the next scan.
#[derive(Debug, Default, Copy, Clone)]
struct Watermarks {
    visibility: Revision,
    global_hider: Revision,
    visibility_missed: bool,
    global_hider_missed: bool,
}

/// Guard returned by [`CollectionVisibilitySync::suspend`]. Forwarding resumes when every
/// guard is dropped.
#[must_use]
pub struct SyncSuspension {
    shared: Arc<SyncShared>,
}

impl Drop for SyncSuspension {
    fn drop(&mut self) {
        let mut suspended = self.shared.suspended.lock();
        *suspended = suspended.saturating_sub(1);
    }
}

/// Applies the overlays of `visibility` and `global_hider` to the features of `collection`.
///
/// Features already in the collection get their overlays immediately. Features added later get
/// them on arrival, and highlights and hides made later are applied to the matching features
/// of the collection. Features removed from the collection are released from both trackers.
pub fn synchronize_collection_visibility(
    collection: &FeatureCollection,
    visibility: &Arc<FeatureVisibility>,
    global_hider: Option<&Arc<GlobalHider>>,
) -> CollectionVisibilitySync {
    let shared = Arc::new(SyncShared {
        collection: collection.clone(),
        visibility: visibility.clone(),
        global_hider: global_hider.cloned(),
        watermarks: Mutex::new(Watermarks::default()),
        suspended: Mutex::new(0),
    });

    let mut listeners = Vec::with_capacity(3);

    let weak = Arc::downgrade(&shared);
    listeners.push(collection.on_mutation(move |event| {
        if let Some(shared) = weak.upgrade() {
            shared.on_collection_event(event);
        }
    }));

    let weak = Arc::downgrade(&shared);
    listeners.push(visibility.on_changed(move |event| {
        if let Some(shared) = weak.upgrade() {
            shared.on_visibility_event(event);
        }
    }));

    if let Some(hider) = global_hider {
        let weak: Weak<SyncShared> = Arc::downgrade(&shared);
        listeners.push(hider.on_changed(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_global_hider_event(event);
            }
        }));
    }

    shared.scan();

    CollectionVisibilitySync {
        shared,
        _listeners: listeners,
    }
}

impl CollectionVisibilitySync {
    /// Returns true if the trackers changed since the collection was last synchronized.
    pub fn is_stale(&self) -> bool {
        self.shared.is_stale()
    }

    /// Re-applies all overlays to every feature of the collection if the collection is staler
    /// than the trackers. Returns true if a scan was made.
    pub fn catch_up(&self) -> bool {
        if !self.shared.is_stale() {
            return false;
        }

        self.shared.scan();
        true
    }

    /// Stops forwarding highlights and hides to the features of the collection until the
    /// returned guard is dropped.
    pub fn suspend(&self) -> SyncSuspension {
        *self.shared.suspended.lock() += 1;
        SyncSuspension {
            shared: self.shared.clone(),
        }
    }

    /// Returns true while forwarding is suspended.
    pub fn is_suspended(&self) -> bool {
        self.shared.is_suspended()
    }
}

impl std::fmt::Debug for CollectionVisibilitySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionVisibilitySync")
            .field("watermarks", &*self.shared.watermarks.lock())
            .finish()
    }
}

impl SyncShared {
    fn current(&self) -> Watermarks {
        Watermarks {
            visibility: self.visibility.last_updated(),
            global_hider: self
                .global_hider
                .as_ref()
                .map_or(Revision::INITIAL, |hider| hider.last_updated()),
            ..Default::default()
        }
    }

    fn is_suspended(&self) -> bool {
        *self.suspended.lock() > 0
    }

    fn is_stale(&self) -> bool {
        let current = self.current();
        let synced = *self.watermarks.lock();
        current.visibility > synced.visibility || current.global_hider > synced.global_hider
    }

    fn scan(&self) {
        let current = self.current();
        for feature in self.collection.features() {
            self.apply(&feature);
        }
        *self.watermarks.lock() = Watermarks {
            visibility: current.visibility,
            global_hider: current.global_hider,
            ..Default::default()
        };
    }

    fn apply(&self, feature: &FeatureHandle) {
        let Some(id) = feature.id() else {
            return;
        };

        self.visibility.add_hidden_feature(&id, feature.clone());
        self.visibility.add_highlight_feature(&id, feature.clone());
        if let Some(hider) = &self.global_hider {
            hider.add_feature(&id, feature.clone());
        }
    }

    fn on_collection_event(&self, event: &CollectionEvent) {
        match (event.kind, event.source) {
            (_, ChangeSource::Overlay) => {}
            (MutationKind::Add, _) => self.apply(&event.feature),
            (MutationKind::Change, _) => {
                self.detach_stale(&event.feature);
                self.apply(&event.feature);
            }
            (MutationKind::Remove, _) => {
                self.visibility.release_feature(&event.feature);
                if let Some(hider) = &self.global_hider {
                    hider.release_feature(&event.feature);
                }
            }
        }
    }

    /// Takes the overlays of ids the feature no longer has off the feature.
    fn detach_stale(&self, feature: &FeatureHandle) {
        let id = feature.id();
        let (from_hidden, from_highlighted) =
            self.visibility.detach_feature(feature, id.as_ref());
        let from_global = self
            .global_hider
            .as_ref()
            .is_some_and(|hider| hider.detach_feature(feature, id.as_ref()));

        let hidden = id.as_ref().is_some_and(|id| self.visibility.is_hidden(id));
        let highlighted = id.as_ref().is_some_and(|id| self.visibility.is_highlighted(id));
        let globally_hidden = id.as_ref().is_some_and(|id| {
            self.global_hider
                .as_ref()
                .is_some_and(|hider| hider.is_hidden(id))
        });

        let unhide = from_hidden && !hidden;
        let unhighlight = from_highlighted && !highlighted;
        let unhide_global = from_global && !globally_hidden;
        if unhide || unhighlight || unhide_global {
            feature.edit_overlay(|overlay| {
                if unhide {
                    overlay.hidden = false;
                }
                if unhighlight {
                    overlay.highlight = None;
                }
                if unhide_global {
                    overlay.globally_hidden = false;
                }
            });
        }
    }

    fn on_visibility_event(&self, event: &VisibilityEvent) {
        let forwarded = matches!(
            event.action,
            VisibilityAction::Highlight | VisibilityAction::Hide
        );
        if forwarded && self.is_suspended() {
            self.watermarks.lock().visibility_missed = true;
            return;
        }

        for id in &event.ids {
            let Some(feature) = self.collection.feature_by_id(id) else {
                continue;
            };

            match event.action {
                VisibilityAction::Highlight => self.visibility.add_highlight_feature(id, feature),
                VisibilityAction::Hide => self.visibility.add_hidden_feature(id, feature),
                VisibilityAction::UnHighlight | VisibilityAction::Show => {}
            }
        }

        let mut watermarks = self.watermarks.lock();
        if !watermarks.visibility_missed {
            watermarks.visibility = self.visibility.last_updated();
        }
    }

    fn on_global_hider_event(&self, event: &VisibilityEvent) {
        let Some(hider) = &self.global_hider else {
            return;
        };

        if event.action == VisibilityAction::Hide && self.is_suspended() {
            self.watermarks.lock().global_hider_missed = true;
            return;
        }

        if event.action == VisibilityAction::Hide {
            for id in &event.ids {
                if let Some(feature) = self.collection.feature_by_id(id) {
                    hider.add_feature(id, feature);
                }
            }
        }

        let mut watermarks = self.watermarks.lock();
        if !watermarks.global_hider_missed {
            watermarks.global_hider = hider.last_updated();
        }
    }
}
