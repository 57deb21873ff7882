use crate::color::{build_scale, ColorScale};
use crate::susceptibility::{classify, style_for, SusceptibilityLevel};
use crate::types::{HazardFeature, HazardKind, HazardLayer};
use serde::Serialize;

/// Path style handed to the map renderer for one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStyle {
    pub fill_color: String,
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
    pub fill_opacity: f64,
}

/// How a layer's features get their colors.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerStyler {
    /// Free-text susceptibility attribute mapped through the classifier.
    Susceptibility { kind: HazardKind, key: &'static str },
    /// Legend-driven color scale. `key` is `None` for a constant scale.
    Scale {
        kind: HazardKind,
        key: Option<String>,
        scale: ColorScale,
    },
}

/// Property holding the susceptibility text for kinds published that way.
pub fn susceptibility_key(kind: HazardKind) -> Option<&'static str> {
    match kind {
        HazardKind::Flood => Some("FloodSusc"),
        HazardKind::Landslide => Some("LndslideSu"),
        HazardKind::StormSurge => Some("HazardLvl"),
        HazardKind::Liquefaction => Some("LiqSusc"),
        HazardKind::Tsunami | HazardKind::FaultLine => None,
    }
}

// (weight, opacity, fillOpacity)
fn stroke(kind: HazardKind) -> (f64, f64, f64) {
    match kind {
        HazardKind::FaultLine => (3.0, 0.9, 0.0),
        HazardKind::Tsunami | HazardKind::StormSurge => (1.0, 0.8, 0.45),
        HazardKind::Flood | HazardKind::Landslide | HazardKind::Liquefaction => (1.0, 1.0, 0.6),
    }
}

/// A configured legend always wins; otherwise kinds with a susceptibility
/// attribute are classified, and the rest get the flat default color.
pub fn styler_for(layer: &HazardLayer) -> LayerStyler {
    if let Some(legend) = &layer.legend {
        return LayerStyler::Scale {
            kind: layer.kind,
            key: Some(legend.key.clone()),
            scale: build_scale(&layer.features, Some(legend), layer.color_settings.as_ref()),
        };
    }

    match susceptibility_key(layer.kind) {
        Some(key) => LayerStyler::Susceptibility {
            kind: layer.kind,
            key,
        },
        None => LayerStyler::Scale {
            kind: layer.kind,
            key: None,
            scale: build_scale(&layer.features, None, layer.color_settings.as_ref()),
        },
    }
}

impl LayerStyler {
    pub fn kind(&self) -> HazardKind {
        match self {
            LayerStyler::Susceptibility { kind, .. } | LayerStyler::Scale { kind, .. } => *kind,
        }
    }

    /// Style for one feature, plus its level when classified.
    pub fn style(&self, feature: &HazardFeature) -> (FeatureStyle, Option<SusceptibilityLevel>) {
        let (fill, level) = match self {
            LayerStyler::Susceptibility { key, .. } => {
                let level = classify(feature.property(key));
                (style_for(level).to_string(), Some(level))
            }
            LayerStyler::Scale { key, scale, .. } => {
                let value = key.as_deref().and_then(|k| feature.property(k));
                (scale.color_for(value).to_string(), None)
            }
        };

        let (weight, opacity, fill_opacity) = stroke(self.kind());
        let style = FeatureStyle {
            color: fill.clone(),
            fill_color: fill,
            weight,
            opacity,
            fill_opacity,
        };
        (style, level)
    }
}
