//! Concrete feature objects and their shared handles.
//!
//! A [`Feature`] is one realization of a logical feature in one collection. Several
//! concrete features (for example one per renderer) may carry the same [`FeatureId`].
//! Features are shared between collections, visibility trackers and change trackers
//! through a [`FeatureHandle`]; handle identity, not the id, tells concrete objects apart.

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use geojson::JsonObject;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::collection::{ChangeSource, CollectionShared};
use crate::style::{EffectiveStyle, Style};

mod geojson_io;

pub(crate) use geojson_io::ID_KEY;

/// Reference of a logical feature, unique within the collection it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    /// Integer id.
    Int(i64),
    /// String id.
    Str(String),
}

impl Display for FeatureId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureId::Int(v) => write!(f, "{v}"),
            FeatureId::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for FeatureId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for FeatureId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Provenance of a feature in a feature store. A feature without a tag is new and exists
/// only on the client.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreState {
    /// Read-only baseline feature provided by the server's static representation.
    Static,
    /// Feature persisted in the dynamic store.
    Dynamic,
    /// Static feature that has been edited and persisted in the dynamic store.
    Edited,
}

/// Visual overrides currently applied to a concrete feature.
///
/// Overlays never touch the feature's own style, so removing every overlay always brings
/// back exactly the style the feature had before.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayState {
    pub(crate) hidden: bool,
    pub(crate) globally_hidden: bool,
    pub(crate) highlight: Option<Style>,
}

impl OverlayState {
    /// Hidden by a [`FeatureVisibility`](crate::visibility::FeatureVisibility).
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Hidden by a [`GlobalHider`](crate::visibility::GlobalHider).
    pub fn is_globally_hidden(&self) -> bool {
        self.globally_hidden
    }

    /// Highlight style, if highlighted.
    pub fn highlight(&self) -> Option<&Style> {
        self.highlight.as_ref()
    }

    /// Returns true if any overlay is applied.
    pub fn is_active(&self) -> bool {
        self.hidden || self.globally_hidden || self.highlight.is_some()
    }

    /// Resolves overlay precedence against the feature's own style.
    pub fn effective<'a>(&'a self, base: Option<&'a Style>) -> EffectiveStyle<'a> {
        if self.hidden || self.globally_hidden {
            EffectiveStyle::Hidden
        } else if let Some(highlight) = &self.highlight {
            EffectiveStyle::Highlighted(highlight)
        } else {
            EffectiveStyle::Base(base)
        }
    }
}

/// A single geospatial entity: geometry, attributes and style.
#[derive(Debug, Clone, Default)]
pub struct Feature {
    id: Option<FeatureId>,
    geometry: Option<geojson::Geometry>,
    properties: JsonObject,
    style: Option<Style>,
    store_state: Option<StoreState>,
    overlay: OverlayState,
}

impl Feature {
    /// Creates an empty feature without id, geometry or properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the id.
    pub fn with_id(mut self, id: impl Into<FeatureId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the geometry.
    pub fn with_geometry(mut self, geometry: geojson::Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Sets a property value.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Sets the feature's own style.
    pub fn with_style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    /// Sets the store-state tag.
    pub fn with_store_state(mut self, state: StoreState) -> Self {
        self.store_state = Some(state);
        self
    }

    /// Id of the feature.
    pub fn id(&self) -> Option<&FeatureId> {
        self.id.as_ref()
    }

    /// Changes the id of the feature.
    pub fn set_id(&mut self, id: Option<FeatureId>) {
        self.id = id;
    }

    /// Geometry of the feature.
    pub fn geometry(&self) -> Option<&geojson::Geometry> {
        self.geometry.as_ref()
    }

    /// Replaces the geometry of the feature.
    pub fn set_geometry(&mut self, geometry: Option<geojson::Geometry>) {
        self.geometry = geometry;
    }

    /// Attributes of the feature.
    pub fn properties(&self) -> &JsonObject {
        &self.properties
    }

    /// Mutable attributes of the feature.
    pub fn properties_mut(&mut self) -> &mut JsonObject {
        &mut self.properties
    }

    /// Own style of the feature, ignoring overlays.
    pub fn style(&self) -> Option<&Style> {
        self.style.as_ref()
    }

    /// Changes the own style of the feature.
    pub fn set_style(&mut self, style: Option<Style>) {
        self.style = style;
    }

    /// Store-state tag. `None` for features that exist only on the client.
    pub fn store_state(&self) -> Option<StoreState> {
        self.store_state
    }

    pub(crate) fn set_store_state(&mut self, state: Option<StoreState>) {
        self.store_state = state;
    }

    /// Overlays currently applied to the feature.
    pub fn overlay(&self) -> &OverlayState {
        &self.overlay
    }

    /// Style to draw the feature with.
    pub fn effective_style(&self) -> EffectiveStyle<'_> {
        self.overlay.effective(self.style.as_ref())
    }
}

/// Unique identity of a concrete feature object.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeatureUid(u64);

static NEXT_UID: AtomicU64 = AtomicU64::new(0);

impl FeatureUid {
    fn next() -> Self {
        Self(NEXT_UID.fetch_add(1, Ordering::Relaxed))
    }
}

struct FeatureCell {
    uid: FeatureUid,
    feature: RwLock<Feature>,
    owner: RwLock<Option<Weak<CollectionShared>>>,
}

/// Shared handle to a concrete feature.
///
/// Cloning the handle does not clone the feature. Modifications made through the handle are
/// reported to the collection the feature belongs to as `Change` events.
#[derive(Clone)]
pub struct FeatureHandle {
    cell: Arc<FeatureCell>,
}

impl FeatureHandle {
    /// Wraps a feature into a new handle. The feature does not belong to any collection yet.
    pub fn new(feature: Feature) -> Self {
        Self {
            cell: Arc::new(FeatureCell {
                uid: FeatureUid::next(),
                feature: RwLock::new(feature),
                owner: RwLock::new(None),
            }),
        }
    }

    /// Identity of the concrete object.
    pub fn uid(&self) -> FeatureUid {
        self.cell.uid
    }

    /// Locks the feature for reading.
    ///
    /// Do not hold the guard while modifying the feature through the handle.
    pub fn read(&self) -> RwLockReadGuard<'_, Feature> {
        self.cell.feature.read()
    }

    /// Id of the feature.
    pub fn id(&self) -> Option<FeatureId> {
        self.read().id.clone()
    }

    /// Store-state tag of the feature.
    pub fn store_state(&self) -> Option<StoreState> {
        self.read().store_state
    }

    /// Modifies the feature as a user edit.
    pub fn edit<R>(&self, edit: impl FnOnce(&mut Feature) -> R) -> R {
        self.edit_with(ChangeSource::User, edit)
    }

    /// Modifies the feature, reporting the change with the given source.
    pub fn edit_with<R>(&self, source: ChangeSource, edit: impl FnOnce(&mut Feature) -> R) -> R {
        let result = {
            let mut feature = self.cell.feature.write();
            edit(&mut feature)
        };

        self.notify_change(source);
        result
    }

    /// Modifies overlays. A change event is only reported if the overlay state changed.
    pub(crate) fn edit_overlay(&self, edit: impl FnOnce(&mut OverlayState)) {
        let changed = {
            let mut feature = self.cell.feature.write();
            let before = feature.overlay.clone();
            edit(&mut feature.overlay);
            feature.overlay != before
        };

        if changed {
            self.notify_change(ChangeSource::Overlay);
        }
    }

    /// Replaces the content of the feature with `other`, keeping overlays and identity.
    pub(crate) fn replace_with(&self, other: Feature, source: ChangeSource) {
        self.edit_with(source, |feature| {
            let overlay = std::mem::take(&mut feature.overlay);
            *feature = Feature { overlay, ..other };
        });
    }

    pub(crate) fn owner(&self) -> Option<Arc<CollectionShared>> {
        self.cell.owner.read().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_owner(&self, owner: Option<Weak<CollectionShared>>) {
        *self.cell.owner.write() = owner;
    }

    fn notify_change(&self, source: ChangeSource) {
        if let Some(owner) = self.owner() {
            owner.feature_changed(self, source);
        }
    }
}

impl PartialEq for FeatureHandle {
    fn eq(&self, other: &Self) -> bool {
        self.cell.uid == other.cell.uid
    }
}

impl Eq for FeatureHandle {}

impl Hash for FeatureHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cell.uid.hash(state);
    }
}

impl std::fmt::Debug for FeatureHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let feature = self.read();
        f.debug_struct("FeatureHandle")
            .field("uid", &self.cell.uid)
            .field("id", &feature.id)
            .field("store_state", &feature.store_state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;

    #[test]
    fn hidden_wins_over_highlight() {
        let base = Style::fill(Color::BLUE);
        let highlight = Style::fill(Color::RED);
        let mut overlay = OverlayState::default();
        assert_eq!(overlay.effective(Some(&base)), EffectiveStyle::Base(Some(&base)));

        overlay.highlight = Some(highlight.clone());
        assert_eq!(
            overlay.effective(Some(&base)),
            EffectiveStyle::Highlighted(&highlight)
        );

        overlay.globally_hidden = true;
        assert!(overlay.effective(Some(&base)).is_hidden());

        overlay.globally_hidden = false;
        overlay.hidden = true;
        assert!(overlay.effective(Some(&base)).is_hidden());
    }

    #[test]
    fn replace_keeps_overlay_and_identity() {
        let handle = FeatureHandle::new(Feature::new().with_id("a"));
        handle.edit_overlay(|o| o.hidden = true);
        let uid = handle.uid();

        handle.replace_with(
            Feature::new()
                .with_id("a")
                .with_store_state(StoreState::Dynamic),
            ChangeSource::Authority,
        );

        assert_eq!(handle.uid(), uid);
        assert_eq!(handle.store_state(), Some(StoreState::Dynamic));
        assert!(handle.read().overlay().is_hidden());
    }

    #[test]
    fn feature_id_json_is_untagged() {
        let ids: Vec<FeatureId> = serde_json::from_str(r#"[1, "a"]"#).expect("valid ids");
        assert_eq!(ids, vec![FeatureId::Int(1), FeatureId::from("a")]);
        assert_eq!(FeatureId::Int(7).to_string(), "7");
    }
}
