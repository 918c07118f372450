use geojson::feature::Id;
use geojson::JsonObject;
use serde_json::Value;

use super::{Feature, FeatureId};
use crate::error::MapStateError;
use crate::style::Style;

/// Member of a GeoJSON feature that carries the feature store id.
pub(crate) const ID_KEY: &str = "_id";
const STYLE_KEY: &str = "style";

impl Feature {
    /// Writes the feature as a GeoJSON feature.
    ///
    /// The id is written into the `_id` foreign member and the own style into `style`.
    /// Overlays and the store-state tag are never written.
    pub fn to_geojson(&self) -> Result<geojson::Feature, MapStateError> {
        let mut foreign_members = JsonObject::new();
        if let Some(id) = &self.id {
            foreign_members.insert(ID_KEY.into(), serde_json::to_value(id)?);
        }
        if let Some(style) = &self.style {
            foreign_members.insert(STYLE_KEY.into(), serde_json::to_value(style)?);
        }

        Ok(geojson::Feature {
            bbox: None,
            geometry: self.geometry.clone(),
            id: None,
            properties: Some(self.properties.clone()),
            foreign_members: (!foreign_members.is_empty()).then_some(foreign_members),
        })
    }

    /// Reads a feature from a GeoJSON feature.
    ///
    /// The id is taken from the `_id` member, falling back to the GeoJSON `id`. The result has
    /// no store-state tag.
    pub fn from_geojson(feature: geojson::Feature) -> Result<Self, MapStateError> {
        let mut foreign_members = feature.foreign_members.unwrap_or_default();

        let id = match foreign_members.remove(ID_KEY) {
            Some(Value::Null) | None => feature.id.map(feature_id_from_geojson),
            Some(value) => Some(serde_json::from_value::<FeatureId>(value)?),
        };

        let style = match foreign_members.remove(STYLE_KEY) {
            Some(Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value::<Style>(value)?),
        };

        Ok(Self {
            id,
            geometry: feature.geometry,
            properties: feature.properties.unwrap_or_default(),
            style,
            ..Default::default()
        })
    }

    /// JSON of the feature as sent to the authority in a commit request.
    pub(crate) fn commit_json(&self, with_id: bool) -> Result<Value, MapStateError> {
        let mut feature = self.to_geojson()?;
        if !with_id {
            if let Some(members) = feature.foreign_members.as_mut() {
                members.remove(ID_KEY);
            }
        }

        Ok(serde_json::to_value(&feature)?)
    }
}

fn feature_id_from_geojson(id: Id) -> FeatureId {
    match id {
        Id::String(v) => FeatureId::Str(v),
        Id::Number(n) => match n.as_i64() {
            Some(v) => FeatureId::Int(v),
            None => FeatureId::Str(n.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Color;

    fn point() -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::Point(vec![13.4, 52.5]))
    }

    #[test]
    fn writes_id_and_style_as_members() {
        let feature = Feature::new()
            .with_id("road-1")
            .with_geometry(point())
            .with_property("name", json!("Unter den Linden"))
            .with_style(Style::fill(Color::RED));

        let value = feature.commit_json(true).expect("serializable");
        assert_eq!(value["_id"], json!("road-1"));
        assert_eq!(value["style"]["fill"], json!("#FF0000FF"));
        assert_eq!(value["properties"]["name"], json!("Unter den Linden"));
        assert_eq!(value["geometry"]["type"], json!("Point"));

        let without_id = feature.commit_json(false).expect("serializable");
        assert!(without_id.get("_id").is_none());
    }

    #[test]
    fn reads_store_id_before_geojson_id() {
        let parsed: geojson::Feature = serde_json::from_value(json!({
            "type": "Feature",
            "id": "ignored",
            "_id": 42,
            "geometry": { "type": "Point", "coordinates": [1.0, 2.0] },
            "properties": { "kind": "tree" }
        }))
        .expect("valid geojson");

        let feature = Feature::from_geojson(parsed).expect("valid feature");
        assert_eq!(feature.id(), Some(&FeatureId::Int(42)));
        assert_eq!(feature.properties()["kind"], json!("tree"));
        assert_eq!(feature.store_state(), None);
    }

    #[test]
    fn falls_back_to_geojson_id() {
        let parsed: geojson::Feature = serde_json::from_value(json!({
            "type": "Feature",
            "id": 7,
            "geometry": null,
            "properties": null
        }))
        .expect("valid geojson");

        let feature = Feature::from_geojson(parsed).expect("valid feature");
        assert_eq!(feature.id(), Some(&FeatureId::Int(7)));
        assert!(feature.geometry().is_none());
    }
}
