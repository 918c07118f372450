use std::collections::VecDeque;

use ahash::HashMap;
use parking_lot::Mutex;

use crate::error::MapStateError;
use crate::feature::{Feature, FeatureId};
use crate::store::{
    CommitRequestItem, CommitResponse, FeatureAuthority, StaticFeatureSource,
};

/// In-memory authority. Commits answer with the queued responses (an empty response when the
/// queue is empty), fetches return the stored features.
#[derive(Default)]
pub struct TestAuthority {
    responses: Mutex<VecDeque<Result<CommitResponse, MapStateError>>>,
    requests: Mutex<Vec<(String, Vec<CommitRequestItem>)>>,
    features: Mutex<HashMap<FeatureId, Feature>>,
}

impl TestAuthority {
    pub fn respond(&self, response: CommitResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    pub fn fail_next_commit(&self, error: MapStateError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn store(&self, feature: Feature) {
        if let Some(id) = feature.id().cloned() {
            self.features.lock().insert(id, feature);
        }
    }

    pub fn requests(&self) -> Vec<(String, Vec<CommitRequestItem>)> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl FeatureAuthority for TestAuthority {
    async fn commit(
        &self,
        url: &str,
        actions: &[CommitRequestItem],
    ) -> Result<CommitResponse, MapStateError> {
        self.requests.lock().push((url.to_string(), actions.to_vec()));
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(CommitResponse::default()))
    }

    async fn fetch_feature(&self, id: &FeatureId) -> Result<Feature, MapStateError> {
        self.features
            .lock()
            .get(id)
            .cloned()
            .ok_or(MapStateError::NotFound)
    }
}

/// In-memory static feature source.
#[derive(Default)]
pub struct TestStaticSource {
    features: Mutex<HashMap<FeatureId, Feature>>,
}

impl TestStaticSource {
    pub fn with_feature(self, feature: Feature) -> Self {
        if let Some(id) = feature.id().cloned() {
            self.features.lock().insert(id, feature);
        }
        self
    }
}

#[async_trait::async_trait]
impl StaticFeatureSource for TestStaticSource {
    async fn fetch_static_feature(&self, id: &FeatureId) -> Result<Feature, MapStateError> {
        self.features
            .lock()
            .get(id)
            .cloned()
            .ok_or(MapStateError::NotFound)
    }
}
