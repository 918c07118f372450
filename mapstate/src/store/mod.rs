//! Editable feature store layers.
//!
//! A [`FeatureStoreLayer`] combines the read-only static representation of a store with a
//! collection of dynamic features that the user may add, edit and remove. Modifications are
//! tracked by [`FeatureStoreLayerChanges`] and committed to a [`FeatureAuthority`] in
//! batches.
//!
//! Static features become editable by converting them with
//! [`FeatureStoreLayer::switch_static_feature_to_dynamic`]: a copy of the static feature is
//! added to the dynamic collection and the static original is hidden until the change is
//! committed or reset.

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::collection::FeatureCollection;
use crate::error::MapStateError;
use crate::event::ListenerHandle;
use crate::feature::{Feature, FeatureHandle, FeatureId, StoreState};
use crate::visibility::sync::{
    synchronize_collection_visibility, synchronize_feature_visibility, CollectionVisibilitySync,
};
use crate::visibility::{FeatureVisibility, GlobalHider};

mod authority;
mod changes;
mod visibility;

pub use authority::{
    CommitAction, CommitKind, CommitRequestItem, CommitResponse, FailedAction, FeatureAuthority,
    InsertedId, StaticFeatureSource,
};
#[cfg(not(target_arch = "wasm32"))]
pub use authority::{HttpAuthority, HttpStaticSource};
pub use changes::{ChangeSummary, Changes, CommitOutcome, FeatureStoreLayerChanges, TrackingPause};
pub use visibility::FeatureStoreFeatureVisibility;

/// Configuration of a [`FeatureStoreLayer`].
///
/// ```
/// use mapstate::store::FeatureStoreOptions;
///
/// let options = FeatureStoreOptions::from_json(r#"{
///     "name": "roads",
///     "featureUrl": "https://example.com/roads/features/{id}",
///     "hiddenStaticFeatureIds": [12, "a-7"]
/// }"#)?;
/// assert_eq!(options.hidden_static_feature_ids.len(), 2);
/// # Ok::<(), mapstate::error::MapStateError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStoreOptions {
    /// Name of the layer, used in log messages.
    pub name: String,
    /// Url template of a single stored feature. `{id}` is replaced with the feature id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_url: Option<String>,
    /// Static features hidden when the layer is created, e.g. because they were deleted
    /// in an earlier session.
    #[serde(default)]
    pub hidden_static_feature_ids: Vec<FeatureId>,
}

impl FeatureStoreOptions {
    /// Options with the given layer name and nothing else.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Reads the options from JSON.
    pub fn from_json(json: &str) -> Result<Self, MapStateError> {
        serde_json::from_str(json)
            .map_err(|err| MapStateError::Configuration(format!("invalid layer options: {err}")))
    }
}

/// Static features of a store as seen by the renderers of the static representation.
///
/// Its visibility follows the visibility of the layer. Static features superseded by a
/// dynamic copy are additionally hidden by [`StaticRepresentation::superseded`].
pub struct StaticRepresentation {
    visibility: Arc<FeatureVisibility>,
    superseded: Arc<FeatureVisibility>,
    _layer_sync: ListenerHandle,
}

/// Synchronization of a static feature collection with a [`StaticRepresentation`]. Created by
/// [`StaticRepresentation::attach`].
#[derive(Debug)]
pub struct StaticRepresentationSync {
    _visibility: CollectionVisibilitySync,
    _superseded: CollectionVisibilitySync,
}

impl StaticRepresentation {
    fn new(layer_visibility: &Arc<FeatureVisibility>, superseded: Arc<FeatureVisibility>) -> Self {
        let visibility = Arc::new(FeatureVisibility::new());
        let layer_sync = synchronize_feature_visibility(layer_visibility, &visibility);

        Self {
            visibility,
            superseded,
            _layer_sync: layer_sync,
        }
    }

    /// Highlighted and hidden ids of the layer, as applied to static features.
    pub fn visibility(&self) -> &Arc<FeatureVisibility> {
        &self.visibility
    }

    /// Static ids hidden because they are converted or removed.
    pub fn superseded(&self) -> &Arc<FeatureVisibility> {
        &self.superseded
    }

    /// Returns true if the static feature is hidden in favour of a dynamic copy or because it
    /// was removed.
    pub fn is_superseded(&self, id: &FeatureId) -> bool {
        self.superseded.is_hidden(id)
    }

    /// Applies the static representation to a collection of static features, e.g. the
    /// collection of a renderer.
    pub fn attach(
        &self,
        collection: &FeatureCollection,
        global_hider: Option<&Arc<GlobalHider>>,
    ) -> StaticRepresentationSync {
        StaticRepresentationSync {
            _visibility: synchronize_collection_visibility(
                collection,
                &self.visibility,
                global_hider,
            ),
            _superseded: synchronize_collection_visibility(collection, &self.superseded, None),
        }
    }
}

impl std::fmt::Debug for StaticRepresentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticRepresentation")
            .field("visibility", &self.visibility)
            .field("superseded", &self.superseded)
            .finish()
    }
}

/// Constructor for a [`FeatureStoreLayer`].
///
/// ```no_run
/// use std::sync::Arc;
/// use mapstate::store::{FeatureStoreLayerBuilder, FeatureStoreOptions};
/// use mapstate::visibility::GlobalHider;
///
/// let hider = Arc::new(GlobalHider::new());
/// let mut options = FeatureStoreOptions::new("roads");
/// options.feature_url = Some("https://example.com/roads/features/{id}".into());
///
/// let layer = FeatureStoreLayerBuilder::new(options)
///     .with_global_hider(hider)
///     .build()?;
/// # Ok::<(), mapstate::error::MapStateError>(())
/// ```
pub struct FeatureStoreLayerBuilder {
    options: FeatureStoreOptions,
    authority: Option<Arc<dyn FeatureAuthority>>,
    static_source: Option<Arc<dyn StaticFeatureSource>>,
    global_hider: Option<Arc<GlobalHider>>,
}

impl FeatureStoreLayerBuilder {
    /// Initializes a builder with the given options.
    pub fn new(options: FeatureStoreOptions) -> Self {
        Self {
            options,
            authority: None,
            static_source: None,
            global_hider: None,
        }
    }

    /// Sets the authority the layer commits to.
    ///
    /// If not set, an [`HttpAuthority`] using the `featureUrl` of the options is created on
    /// native targets. Building fails if neither is available.
    pub fn with_authority(mut self, authority: Arc<dyn FeatureAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Sets the source of static features. Without it static features cannot be converted.
    pub fn with_static_source(mut self, source: Arc<dyn StaticFeatureSource>) -> Self {
        self.static_source = Some(source);
        self
    }

    /// Sets the global hider honored by the features of the layer.
    pub fn with_global_hider(mut self, global_hider: Arc<GlobalHider>) -> Self {
        self.global_hider = Some(global_hider);
        self
    }

    /// Consumes the builder and constructs the layer.
    ///
    /// Will return an error if the layer is configured incorrectly.
    pub fn build(self) -> Result<FeatureStoreLayer, MapStateError> {
        let Self {
            options,
            authority,
            static_source,
            global_hider,
        } = self;

        if options.name.is_empty() {
            return Err(MapStateError::Configuration(
                "feature store layer name cannot be empty".into(),
            ));
        }

        if let Some(url) = &options.feature_url {
            authority::expand_feature_url(url, &FeatureId::Int(0))?;
        }

        let authority = match authority {
            Some(authority) => authority,
            None => Self::default_authority(&options)?,
        };

        let collection = FeatureCollection::new();
        let superseded = Arc::new(FeatureVisibility::new());
        superseded.hide_objects(options.hidden_static_feature_ids.iter().cloned());

        let changes = FeatureStoreLayerChanges::new(
            options.name.clone(),
            collection.clone(),
            authority,
            superseded.clone(),
        );
        let visibility = FeatureStoreFeatureVisibility::new(changes.clone());
        let static_representation = StaticRepresentation::new(visibility.visibility(), superseded);

        let collection_sync = synchronize_collection_visibility(
            &collection,
            visibility.visibility(),
            global_hider.as_ref(),
        );

        changes.track();

        Ok(FeatureStoreLayer {
            options,
            collection,
            changes,
            visibility,
            static_representation,
            static_source,
            global_hider,
            _collection_sync: collection_sync,
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn default_authority(
        options: &FeatureStoreOptions,
    ) -> Result<Arc<dyn FeatureAuthority>, MapStateError> {
        match &options.feature_url {
            Some(url) => Ok(Arc::new(HttpAuthority::new(url.clone())?)),
            None => Err(MapStateError::Configuration(
                "feature store layer needs either an authority or a feature url".into(),
            )),
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn default_authority(
        _options: &FeatureStoreOptions,
    ) -> Result<Arc<dyn FeatureAuthority>, MapStateError> {
        Err(MapStateError::Configuration(
            "feature store layer needs an authority".into(),
        ))
    }
}

/// Editable layer backed by a feature store.
pub struct FeatureStoreLayer {
    options: FeatureStoreOptions,
    collection: FeatureCollection,
    changes: FeatureStoreLayerChanges,
    visibility: FeatureStoreFeatureVisibility,
    static_representation: StaticRepresentation,
    static_source: Option<Arc<dyn StaticFeatureSource>>,
    global_hider: Option<Arc<GlobalHider>>,
    _collection_sync: CollectionVisibilitySync,
}

impl FeatureStoreLayer {
    /// Name of the layer.
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Options the layer was built with.
    pub fn options(&self) -> &FeatureStoreOptions {
        &self.options
    }

    /// Dynamic features of the layer.
    pub fn collection(&self) -> &FeatureCollection {
        &self.collection
    }

    /// Change tracker of the layer.
    pub fn changes(&self) -> &FeatureStoreLayerChanges {
        &self.changes
    }

    /// Highlighted and hidden features of the layer.
    pub fn visibility(&self) -> &FeatureStoreFeatureVisibility {
        &self.visibility
    }

    /// Static features of the layer.
    pub fn static_representation(&self) -> &StaticRepresentation {
        &self.static_representation
    }

    /// Global hider honored by the layer.
    pub fn global_hider(&self) -> Option<&Arc<GlobalHider>> {
        self.global_hider.as_ref()
    }

    /// Ids of static features that are hidden because they were converted or removed.
    pub fn hidden_static_feature_ids(&self) -> Vec<FeatureId> {
        self.static_representation.superseded.hidden_ids()
    }

    /// Makes a static feature editable by copying it into the dynamic collection.
    ///
    /// Returns the dynamic copy if there already is one. Fails with
    /// [`MapStateError::MissingFetch`] if the layer has no static feature source.
    pub async fn switch_static_feature_to_dynamic(
        &self,
        id: &FeatureId,
    ) -> Result<FeatureHandle, MapStateError> {
        if let Some(existing) = self.collection.feature_by_id(id) {
            return Ok(existing);
        }

        let source = self
            .static_source
            .as_ref()
            .ok_or_else(|| MapStateError::MissingFetch(id.clone()))?;

        let mut feature = source.fetch_static_feature(id).await?;
        feature.set_id(Some(id.clone()));
        feature.set_store_state(Some(StoreState::Static));

        let superseded = &self.static_representation.superseded;
        let was_superseded = superseded.is_hidden(id);
        superseded.hide_objects([id.clone()]);

        match self.collection.add_feature(feature) {
            Ok(handle) => {
                debug!("Layer {}: static feature {id} converted", self.name());
                Ok(handle)
            }
            Err(MapStateError::DuplicateId(_)) => self
                .collection
                .feature_by_id(id)
                .ok_or(MapStateError::NotFound),
            Err(err) => {
                if !was_superseded {
                    superseded.show_objects([id.clone()]);
                }
                Err(err)
            }
        }
    }

    /// Removes a static feature.
    ///
    /// If the feature was converted, its dynamic copy is removed from the collection.
    /// Otherwise the static feature is hidden and its removal is registered with the change
    /// tracker. Returns the removed feature.
    pub fn remove_static_feature(&self, id: &FeatureId) -> FeatureHandle {
        self.static_representation
            .superseded
            .hide_objects([id.clone()]);

        if let Some(existing) = self.collection.feature_by_id(id) {
            self.collection.remove_feature(&existing);
            return existing;
        }

        let placeholder = FeatureHandle::new(
            Feature::new()
                .with_id(id.clone())
                .with_store_state(StoreState::Static),
        );
        self.changes.remove_feature(&placeholder);

        debug!("Layer {}: static feature {id} removed", self.name());
        placeholder
    }
}

impl std::fmt::Debug for FeatureStoreLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStoreLayer")
            .field("options", &self.options)
            .field("features", &self.collection.len())
            .field("changes", &self.changes)
            .finish()
    }
}
