//! Visibility overlays: highlighting and hiding features by id.
//!
//! A [`FeatureVisibility`] keeps the set of highlighted and hidden ids of one owner (usually
//! a layer) together with the concrete features currently realizing each id. Concrete
//! features are attached with [`FeatureVisibility::add_highlight_feature`] and
//! [`FeatureVisibility::add_hidden_feature`], usually by the functions in [`sync`] as
//! features stream into a collection.
//!
//! Listeners registered with [`FeatureVisibility::on_changed`] are only notified when the
//! set of ids changes. Changing the style of an already highlighted id updates the
//! realized features but does not emit an event.

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::event::{EventEmitter, ListenerHandle};
use crate::feature::{FeatureHandle, FeatureId};
use crate::style::Style;

mod global_hider;
pub mod sync;

pub use global_hider::GlobalHider;

/// Structural change of a visibility tracker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VisibilityAction {
    /// Ids were highlighted.
    Highlight,
    /// Ids stopped being highlighted.
    UnHighlight,
    /// Ids were hidden.
    Hide,
    /// Ids were shown again.
    Show,
}

/// Payload of the `changed` event of [`FeatureVisibility`] and [`GlobalHider`].
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityEvent {
    /// What happened.
    pub action: VisibilityAction,
    /// Ids that entered or left the highlighted or hidden set, in call order.
    pub ids: Vec<FeatureId>,
}

/// Monotonic marker of the last structural change of a visibility tracker.
///
/// Revisions are unique across all trackers, so a consumer can store the revision it last
/// synchronized with and compare it to the tracker's current one.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(u64);

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

impl Revision {
    /// Revision of a tracker that has never changed.
    pub const INITIAL: Revision = Revision(0);

    pub(crate) fn next() -> Self {
        Self(NEXT_REVISION.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct HighlightEntry {
    style: Style,
    features: HashSet<FeatureHandle>,
}

#[derive(Debug, Default)]
struct VisibilityState {
    hidden: HashMap<FeatureId, HashSet<FeatureHandle>>,
    highlighted: HashMap<FeatureId, HighlightEntry>,
}

/// Highlighted and hidden ids of one owner.
#[derive(Default)]
pub struct FeatureVisibility {
    state: RwLock<VisibilityState>,
    last_updated: RwLock<Revision>,
    changed: Arc<EventEmitter<VisibilityEvent>>,
}

impl FeatureVisibility {
    /// Creates a tracker with nothing highlighted or hidden.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highlights the given ids with the given styles.
    ///
    /// New ids are reported in a single [`VisibilityAction::Highlight`] event. Ids that are
    /// already highlighted with another style get the new style applied to all their realized
    /// features without an event.
    pub fn highlight(&self, to_highlight: impl IntoIterator<Item = (FeatureId, Style)>) {
        let mut added = Vec::new();
        let mut restyled = Vec::new();
        {
            let mut state = self.state.write();
            for (id, style) in to_highlight {
                match state.highlighted.entry(id) {
                    Entry::Occupied(mut entry) => {
                        if entry.get().style != style {
                            restyled.extend(
                                entry
                                    .get()
                                    .features
                                    .iter()
                                    .map(|feature| (feature.clone(), style.clone())),
                            );
                            entry.get_mut().style = style;
                        }
                    }
                    Entry::Vacant(entry) => {
                        added.push(entry.key().clone());
                        entry.insert(HighlightEntry {
                            style,
                            features: HashSet::default(),
                        });
                    }
                }
            }
        }

        for (feature, style) in restyled {
            feature.edit_overlay(|overlay| overlay.highlight = Some(style));
        }

        self.emit(VisibilityAction::Highlight, added);
    }

    /// Removes the highlight of the given ids and reverts their realized features.
    pub fn un_highlight(&self, ids: impl IntoIterator<Item = FeatureId>) {
        let mut removed = Vec::new();
        let mut released = Vec::new();
        {
            let mut state = self.state.write();
            for id in ids {
                if let Some(entry) = state.highlighted.remove(&id) {
                    released.extend(entry.features);
                    removed.push(id);
                }
            }
        }

        for feature in released {
            feature.edit_overlay(|overlay| overlay.highlight = None);
        }

        self.emit(VisibilityAction::UnHighlight, removed);
    }

    /// Hides the given ids.
    pub fn hide_objects(&self, ids: impl IntoIterator<Item = FeatureId>) {
        let mut added = Vec::new();
        {
            let mut state = self.state.write();
            for id in ids {
                if let Entry::Vacant(entry) = state.hidden.entry(id) {
                    added.push(entry.key().clone());
                    entry.insert(HashSet::default());
                }
            }
        }

        self.emit(VisibilityAction::Hide, added);
    }

    /// Shows the given ids again. Realized features of ids that are still highlighted become
    /// highlighted.
    pub fn show_objects(&self, ids: impl IntoIterator<Item = FeatureId>) {
        let mut removed = Vec::new();
        let mut released = Vec::new();
        {
            let mut state = self.state.write();
            for id in ids {
                let Some(features) = state.hidden.remove(&id) else {
                    continue;
                };

                for feature in features {
                    let pending_highlight = match state.highlighted.get_mut(&id) {
                        Some(entry) => {
                            entry.features.insert(feature.clone());
                            Some(entry.style.clone())
                        }
                        None => None,
                    };
                    released.push((feature, pending_highlight));
                }

                removed.push(id);
            }
        }

        for (feature, pending_highlight) in released {
            feature.edit_overlay(|overlay| {
                overlay.hidden = false;
                if pending_highlight.is_some() {
                    overlay.highlight = pending_highlight;
                }
            });
        }

        self.emit(VisibilityAction::Show, removed);
    }

    /// Attaches a concrete feature to a highlighted id and highlights it. Does nothing if the
    /// id is not highlighted.
    pub fn add_highlight_feature(&self, id: &FeatureId, feature: FeatureHandle) {
        let style = {
            let mut state = self.state.write();
            let Some(entry) = state.highlighted.get_mut(id) else {
                return;
            };

            entry.features.insert(feature.clone());
            entry.style.clone()
        };

        feature.edit_overlay(|overlay| overlay.highlight = Some(style));
    }

    /// Attaches a concrete feature to a hidden id and hides it. Does nothing if the id is not
    /// hidden.
    pub fn add_hidden_feature(&self, id: &FeatureId, feature: FeatureHandle) {
        {
            let mut state = self.state.write();
            let Some(features) = state.hidden.get_mut(id) else {
                return;
            };

            features.insert(feature.clone());
        }

        feature.edit_overlay(|overlay| overlay.hidden = true);
    }

    /// Forgets a concrete feature, e.g. after it was removed from its collection. The feature
    /// keeps its overlays; ids stay highlighted or hidden.
    pub fn release_feature(&self, feature: &FeatureHandle) {
        let mut state = self.state.write();
        for features in state.hidden.values_mut() {
            features.remove(feature);
        }
        for entry in state.highlighted.values_mut() {
            entry.features.remove(feature);
        }
    }

    /// Detaches the feature from every id other than `keep`. Returns whether it was detached
    /// from a hidden id and from a highlighted id.
    pub(crate) fn detach_feature(
        &self,
        feature: &FeatureHandle,
        keep: Option<&FeatureId>,
    ) -> (bool, bool) {
        let mut state = self.state.write();
        let mut from_hidden = false;
        for (id, features) in state.hidden.iter_mut() {
            if Some(id) != keep {
                from_hidden |= features.remove(feature);
            }
        }

        let mut from_highlighted = false;
        for (id, entry) in state.highlighted.iter_mut() {
            if Some(id) != keep {
                from_highlighted |= entry.features.remove(feature);
            }
        }

        (from_hidden, from_highlighted)
    }

    /// Un-highlights and shows everything.
    pub fn clear(&self) {
        let highlighted: Vec<FeatureId> = self.state.read().highlighted.keys().cloned().collect();
        self.un_highlight(highlighted);
        let hidden = self.hidden_ids();
        self.show_objects(hidden);
    }

    /// Returns true if the id is highlighted.
    pub fn is_highlighted(&self, id: &FeatureId) -> bool {
        self.state.read().highlighted.contains_key(id)
    }

    /// Returns true if the id is hidden.
    pub fn is_hidden(&self, id: &FeatureId) -> bool {
        self.state.read().hidden.contains_key(id)
    }

    /// Highlight style of the id.
    pub fn highlight_style(&self, id: &FeatureId) -> Option<Style> {
        self.state
            .read()
            .highlighted
            .get(id)
            .map(|entry| entry.style.clone())
    }

    /// All highlighted ids with their styles.
    pub fn highlighted(&self) -> Vec<(FeatureId, Style)> {
        self.state
            .read()
            .highlighted
            .iter()
            .map(|(id, entry)| (id.clone(), entry.style.clone()))
            .collect()
    }

    /// All hidden ids.
    pub fn hidden_ids(&self) -> Vec<FeatureId> {
        self.state.read().hidden.keys().cloned().collect()
    }

    /// Returns true if the concrete feature is attached to the highlighted id.
    pub fn has_highlight_feature(&self, id: &FeatureId, feature: &FeatureHandle) -> bool {
        self.state
            .read()
            .highlighted
            .get(id)
            .is_some_and(|entry| entry.features.contains(feature))
    }

    /// Returns true if the concrete feature is attached to the hidden id.
    pub fn has_hidden_feature(&self, id: &FeatureId, feature: &FeatureHandle) -> bool {
        self.state
            .read()
            .hidden
            .get(id)
            .is_some_and(|features| features.contains(feature))
    }

    /// Revision of the last structural change.
    pub fn last_updated(&self) -> Revision {
        *self.last_updated.read()
    }

    /// Registers a listener for structural changes.
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

impl std::fmt::Debug for FeatureVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("FeatureVisibility")
            .field("hidden", &state.hidden.len())
            .field("highlighted", &state.highlighted.len())
            .field("last_updated", &*self.last_updated.read())
            .finish()
    }
}
