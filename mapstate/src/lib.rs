//! Mapstate keeps the visual and transactional state of map features consistent across any
//! number of renderers and owners.
//!
//! The crate has two parts:
//!
//! * **visibility overlays** ([`visibility`]): highlighting and hiding features by id,
//!   including reference counted hiding shared between independent owners
//!   ([`GlobalHider`](visibility::GlobalHider)). Overlays never touch the style of a feature,
//!   so removing them always brings back exactly what was there before.
//! * **editable feature stores** ([`store`]): a change tracker that sorts user modifications
//!   of a feature collection into added, edited, removed and converted features, commits them
//!   to a remote authority in one batch and recovers from partially failed commits.
//!
//! # Features and collections
//!
//! A [`Feature`](feature::Feature) is a GeoJSON geometry with properties, an optional style and
//! a store-state tag. Features live in a [`FeatureCollection`](collection::FeatureCollection)
//! and are shared through [`FeatureHandle`](feature::FeatureHandle)s. Every modification of a
//! feature in a collection is reported to the listeners of the collection together with its
//! origin, which is how the change tracker tells user edits from overlays.
//!
//! ```
//! use std::sync::Arc;
//! use mapstate::collection::FeatureCollection;
//! use mapstate::feature::Feature;
//! use mapstate::style::Style;
//! use mapstate::visibility::FeatureVisibility;
//! use mapstate::visibility::sync::synchronize_collection_visibility;
//! use mapstate::Color;
//!
//! let collection = FeatureCollection::new();
//! let visibility = Arc::new(FeatureVisibility::new());
//! let _sync = synchronize_collection_visibility(&collection, &visibility, None);
//!
//! let feature = collection.add_feature(Feature::new().with_id("road-1"))?;
//! visibility.highlight([("road-1".into(), Style::fill(Color::RED))]);
//! assert_eq!(feature.read().overlay().highlight(), Some(&Style::fill(Color::RED)));
//! # Ok::<(), mapstate::error::MapStateError>(())
//! ```

#![warn(clippy::unwrap_used)]
#![warn(missing_docs)]

pub mod collection;
mod color;
pub mod error;
pub mod event;
pub mod feature;
pub mod store;
pub mod style;
pub mod visibility;

#[cfg(test)]
pub(crate) mod tests;

pub use color::Color;
