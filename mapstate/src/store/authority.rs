//! Remote authority of a feature store and the commit wire format.

use async_trait::async_trait;
use maybe_sync::{MaybeSend, MaybeSync};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strfmt::DisplayStr;

use crate::collection::ChangeSource;
use crate::error::MapStateError;
use crate::feature::{Feature, FeatureHandle, FeatureId, StoreState, ID_KEY};

/// Kind of a commit action.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitKind {
    /// Insert a new feature.
    Add,
    /// Replace an existing feature.
    Edit,
    /// Delete an existing feature.
    Remove,
}

/// One element of a commit request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequestItem {
    /// What to do.
    pub action: CommitKind,
    /// GeoJSON feature for `add` and `edit`, `{"_id": ...}` for `remove`.
    pub feature: Value,
}

/// Id assigned by the authority to a successfully added feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertedId {
    /// The new id.
    #[serde(rename = "_id")]
    pub id: FeatureId,
}

/// Action of a commit request that the authority rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAction {
    /// Index of the action in the request.
    pub index: usize,
    /// Reason given by the authority.
    #[serde(default)]
    pub error: String,
}

/// Response to a commit request.
///
/// Inserted ids are listed in the order of the successful `add` actions of the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// Ids of the added features.
    #[serde(default)]
    pub inserted_ids: Vec<InsertedId>,
    /// Rejected actions.
    #[serde(default)]
    pub failed_actions: Vec<FailedAction>,
}

/// A pending change of one feature, together with the transition applied to the feature
/// when the authority accepts it.
#[derive(Debug, Clone)]
pub struct CommitAction {
    kind: CommitKind,
    feature: FeatureHandle,
}

impl CommitAction {
    /// Action inserting a new feature.
    pub fn add(feature: FeatureHandle) -> Self {
        Self {
            kind: CommitKind::Add,
            feature,
        }
    }

    /// Action replacing an existing feature.
    pub fn edit(feature: FeatureHandle) -> Self {
        Self {
            kind: CommitKind::Edit,
            feature,
        }
    }

    /// Action deleting an existing feature.
    pub fn remove(feature: FeatureHandle) -> Self {
        Self {
            kind: CommitKind::Remove,
            feature,
        }
    }

    /// Kind of the action.
    pub fn kind(&self) -> CommitKind {
        self.kind
    }

    /// The feature the action was created for.
    pub fn feature(&self) -> &FeatureHandle {
        &self.feature
    }

    /// Serializes the action for the request body.
    pub fn request_item(&self) -> Result<CommitRequestItem, MapStateError> {
        let feature = self.feature.read();
        let feature = match self.kind {
            CommitKind::Add => feature.commit_json(false)?,
            CommitKind::Edit => feature.commit_json(true)?,
            CommitKind::Remove => {
                let mut members = serde_json::Map::new();
                members.insert(ID_KEY.into(), serde_json::to_value(feature.id())?);
                Value::Object(members)
            }
        };

        Ok(CommitRequestItem {
            action: self.kind,
            feature,
        })
    }

    /// Applies the success transition: an added feature gets the server id and becomes
    /// dynamic, an edited static feature becomes edited. Removals need nothing.
    pub(crate) fn succeed(&self, inserted_id: Option<FeatureId>) {
        match self.kind {
            CommitKind::Add => self.feature.edit_with(ChangeSource::Authority, |feature| {
                if let Some(id) = inserted_id {
                    feature.set_id(Some(id));
                }
                feature.set_store_state(Some(StoreState::Dynamic));
            }),
            CommitKind::Edit => {
                if self.feature.store_state() == Some(StoreState::Static) {
                    self.feature.edit_with(ChangeSource::Authority, |feature| {
                        feature.set_store_state(Some(StoreState::Edited))
                    });
                }
            }
            CommitKind::Remove => {}
        }
    }
}

/// Remote service owning the canonical feature store.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait FeatureAuthority: MaybeSend + MaybeSync {
    /// Sends one batched commit request to the given endpoint.
    async fn commit(
        &self,
        url: &str,
        actions: &[CommitRequestItem],
    ) -> Result<CommitResponse, MapStateError>;

    /// Loads the canonical version of a feature.
    async fn fetch_feature(&self, id: &FeatureId) -> Result<Feature, MapStateError>;
}

/// Source of the read-only baseline features of a store.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait StaticFeatureSource: MaybeSend + MaybeSync {
    /// Loads the static feature with the given id.
    async fn fetch_static_feature(&self, id: &FeatureId) -> Result<Feature, MapStateError>;
}

impl DisplayStr for FeatureId {
    fn display_str(&self, f: &mut strfmt::Formatter) -> strfmt::Result<()> {
        f.str(&self.to_string())?;
        Ok(())
    }
}

/// Substitutes `{id}` in a feature url template.
pub(crate) fn expand_feature_url(template: &str, id: &FeatureId) -> Result<String, MapStateError> {
    let vars = std::collections::HashMap::from([("id".to_string(), id.clone())]);
    strfmt::strfmt(template, &vars)
        .map_err(|err| MapStateError::Configuration(format!("invalid feature url {template}: {err}")))
}

#[cfg(not(target_arch = "wasm32"))]
pub use http::{HttpAuthority, HttpStaticSource};

#[cfg(not(target_arch = "wasm32"))]
mod http {
    use log::{debug, info};

    use super::*;

    const USER_AGENT: &str = "mapstate/0.1";

    /// [`FeatureAuthority`] speaking JSON over HTTP.
    ///
    /// Commits are `POST`ed to the url given to [`FeatureAuthority::commit`]. Single features are
    /// loaded with `GET` from the feature url template, where `{id}` is replaced with the
    /// feature id.
    #[derive(Debug, Clone)]
    pub struct HttpAuthority {
        client: reqwest::Client,
        feature_url: String,
    }

    impl HttpAuthority {
        /// Creates an authority with a default http client.
        pub fn new(feature_url: impl Into<String>) -> Result<Self, MapStateError> {
            let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
            Ok(Self::with_client(client, feature_url))
        }

        /// Creates an authority using the given http client.
        pub fn with_client(client: reqwest::Client, feature_url: impl Into<String>) -> Self {
            Self {
                client,
                feature_url: feature_url.into(),
            }
        }
    }

    #[async_trait]
    impl FeatureAuthority for HttpAuthority {
        async fn commit(
            &self,
            url: &str,
            actions: &[CommitRequestItem],
        ) -> Result<CommitResponse, MapStateError> {
            debug!("Sending {} commit actions to {url}", actions.len());

            let response = self.client.post(url).json(actions).send().await?;
            let body = checked_body(url, response).await?;

            Ok(serde_json::from_str(&body)?)
        }

        async fn fetch_feature(&self, id: &FeatureId) -> Result<Feature, MapStateError> {
            let url = expand_feature_url(&self.feature_url, id)?;
            get_feature(&self.client, &url).await
        }
    }

    /// [`StaticFeatureSource`] loading GeoJSON features over HTTP from a url template with an
    /// `{id}` placeholder.
    #[derive(Debug, Clone)]
    pub struct HttpStaticSource {
        client: reqwest::Client,
        url: String,
    }

    impl HttpStaticSource {
        /// Creates a source with a default http client.
        pub fn new(url: impl Into<String>) -> Result<Self, MapStateError> {
            let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
            Ok(Self {
                client,
                url: url.into(),
            })
        }
    }

    #[async_trait]
    impl StaticFeatureSource for HttpStaticSource {
        async fn fetch_static_feature(&self, id: &FeatureId) -> Result<Feature, MapStateError> {
            let url = expand_feature_url(&self.url, id)?;
            get_feature(&self.client, &url).await
        }
    }

    async fn get_feature(client: &reqwest::Client, url: &str) -> Result<Feature, MapStateError> {
        let response = client.get(url).send().await?;
        let body = checked_body(url, response).await?;
        let feature: geojson::Feature = serde_json::from_str(&body)?;

        Feature::from_geojson(feature)
    }

    async fn checked_body(url: &str, response: reqwest::Response) -> Result<String, MapStateError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MapStateError::NotFound);
        }

        if !status.is_success() {
            info!(
                "Request to {url} failed: {status}, {:?}",
                response.text().await
            );
            return Err(MapStateError::Transport(format!("{url} returned {status}")));
        }

        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::collection::FeatureCollection;

    #[test]
    fn request_items_follow_wire_format() {
        let new_feature = FeatureHandle::new(Feature::new().with_id("local"));
        let existing = FeatureHandle::new(
            Feature::new()
                .with_id(10)
                .with_store_state(StoreState::Dynamic),
        );

        let add = CommitAction::add(new_feature).request_item().expect("serializable");
        assert_eq!(add.action, CommitKind::Add);
        assert!(add.feature.get("_id").is_none());
        assert_eq!(add.feature["type"], json!("Feature"));

        let edit = CommitAction::edit(existing.clone())
            .request_item()
            .expect("serializable");
        assert_eq!(edit.feature["_id"], json!(10));

        let remove = CommitAction::remove(existing)
            .request_item()
            .expect("serializable");
        assert_eq!(
            serde_json::to_value(&remove).expect("serializable"),
            json!({ "action": "remove", "feature": { "_id": 10 } })
        );
    }

    #[test]
    fn response_fields_are_optional() {
        let response: CommitResponse = serde_json::from_str(
            r#"{ "insertedIds": [ { "_id": "server-1" }, { "_id": 2 } ] }"#,
        )
        .expect("valid response");

        assert_eq!(
            response.inserted_ids,
            vec![
                InsertedId {
                    id: "server-1".into()
                },
                InsertedId {
                    id: FeatureId::Int(2)
                },
            ]
        );
        assert!(response.failed_actions.is_empty());

        let response: CommitResponse =
            serde_json::from_str(r#"{ "failedActions": [ { "index": 1 } ] }"#)
                .expect("valid response");
        assert_eq!(response.failed_actions[0].index, 1);
    }

    #[test]
    fn success_transitions() {
        let collection = FeatureCollection::new();
        let added = collection.add_feature(Feature::new()).expect("added");
        CommitAction::add(added.clone()).succeed(Some("server-1".into()));
        assert_eq!(added.id(), Some(FeatureId::from("server-1")));
        assert_eq!(added.store_state(), Some(StoreState::Dynamic));
        assert_eq!(collection.feature_by_id(&"server-1".into()), Some(added));

        let edited = FeatureHandle::new(
            Feature::new()
                .with_id("s")
                .with_store_state(StoreState::Static),
        );
        CommitAction::edit(edited.clone()).succeed(None);
        assert_eq!(edited.store_state(), Some(StoreState::Edited));

        let dynamic = FeatureHandle::new(
            Feature::new()
                .with_id("d")
                .with_store_state(StoreState::Dynamic),
        );
        CommitAction::edit(dynamic.clone()).succeed(None);
        assert_eq!(dynamic.store_state(), Some(StoreState::Dynamic));
    }

    #[test]
    fn feature_url_expansion() {
        assert_eq!(
            expand_feature_url("https://example.com/features/{id}", &FeatureId::Int(4))
                .expect("valid template"),
            "https://example.com/features/4"
        );
        assert_matches!(
            expand_feature_url("https://example.com/{layer}/{id}", &FeatureId::Int(4)),
            Err(MapStateError::Configuration(_))
        );
    }
}
