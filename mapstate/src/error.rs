//! Error types used by the crate.

use thiserror::Error;

use crate::feature::FeatureId;

/// Mapstate error type.
#[derive(Debug, Error)]
pub enum MapStateError {
    /// Request to the feature authority failed (network error or bad status).
    #[error("failed to reach the feature authority: {0}")]
    Transport(String),
    /// Error decoding or encoding data.
    #[error("failed to decode data: {0}")]
    Decoding(String),
    /// Item not found.
    #[error("item not found")]
    NotFound,
    /// A static feature was requested, but no static feature source was given to the layer.
    #[error("cannot load static feature {0}: no static feature source is set")]
    MissingFetch(FeatureId),
    /// A feature with the same id is already in the collection.
    #[error("feature with id {0} is already in the collection")]
    DuplicateId(FeatureId),
    /// Invalid layer configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Generic error - details are inside.
    #[error("{0}")]
    Generic(String),
}

impl From<serde_json::Error> for MapStateError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decoding(value.to_string())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<reqwest::Error> for MapStateError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}
