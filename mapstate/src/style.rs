//! Feature styles and the effective style a renderer should draw.

use serde::{Deserialize, Serialize};

use crate::Color;

/// Style of a feature, used both as the base style of a feature and as a highlight style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    /// Fill color of polygons and points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Color>,
    /// Stroke color of lines and outlines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<Color>,
    /// Stroke width in pixels.
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
}

fn default_stroke_width() -> f64 {
    1.0
}

impl Default for Style {
    fn default() -> Self {
        Self {
            fill: None,
            stroke: None,
            stroke_width: default_stroke_width(),
        }
    }
}

impl Style {
    /// Style with only the fill color set.
    pub fn fill(color: Color) -> Self {
        Self {
            fill: Some(color),
            ..Default::default()
        }
    }

    /// Returns a copy of the style with the given stroke.
    pub fn with_stroke(self, color: Color, width: f64) -> Self {
        Self {
            stroke: Some(color),
            stroke_width: width,
            ..self
        }
    }
}

/// Style a renderer should use for a concrete feature after all overlays are applied.
///
/// Hidden states take precedence over highlighting, highlighting takes precedence over the
/// feature's own style.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectiveStyle<'a> {
    /// The feature must not be drawn.
    Hidden,
    /// The feature is drawn with the highlight style.
    Highlighted(&'a Style),
    /// The feature is drawn with its own style, or the layer default if it has none.
    Base(Option<&'a Style>),
}

impl EffectiveStyle<'_> {
    /// Returns true if the feature should not be drawn.
    pub fn is_hidden(&self) -> bool {
        matches!(self, Self::Hidden)
    }
}
