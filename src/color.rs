use crate::types::{ColorSettings, HazardFeature, LegendDescriptor, LegendKind};
use geojson::JsonValue;
use serde::{Serialize, Serializer};
use std::fmt;

pub const DEFAULT_COLOR: &str = "#3388ff";
/// Used for a flat numeric scale when no `min` color is configured.
pub const FALLBACK_MIN_COLOR: &str = "#00ff00";
pub const FALLBACK_MAX_COLOR: &str = "#ff0000";

/// A computed color, rendered either as the configured hex string or as an
/// interpolated `rgb(r,g,b)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Color {
    Hex(String),
    // Channels are not clamped: extrapolated values can leave 0..=255.
    Rgb { r: i64, g: i64, b: i64 },
}

impl Color {
    pub fn hex(value: impl Into<String>) -> Self {
        Color::Hex(value.into())
    }

    pub fn default_color() -> Self {
        Color::Hex(DEFAULT_COLOR.to_string())
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Hex(hex) => f.write_str(hex),
            Color::Rgb { r, g, b } => write!(f, "rgb({},{},{})", r, g, b),
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Splits `#rrggbb` into channels. Malformed channels decode as 0.
pub fn hex_to_rgb(hex: &str) -> Rgb {
    let hex = hex.trim_start_matches('#');
    let channel = |start: usize| {
        hex.get(start..start + 2)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            .unwrap_or(0)
    };
    Rgb {
        r: channel(0),
        g: channel(2),
        b: channel(4),
    }
}

/// Per-feature color function built from a layer's legend.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorScale {
    Constant(Color),
    Categorical(ColorSettings),
    Gradient {
        min: f64,
        max: f64,
        from: Rgb,
        to: Rgb,
    },
}

impl ColorScale {
    pub fn color_for(&self, value: Option<&JsonValue>) -> Color {
        match self {
            ColorScale::Constant(color) => color.clone(),
            ColorScale::Categorical(colors) => value
                .and_then(category_key)
                .and_then(|key| colors.get(&key))
                .map(Color::hex)
                .unwrap_or_else(Color::default_color),
            ColorScale::Gradient { min, max, from, to } => match value.and_then(numeric_value) {
                Some(v) => {
                    let ratio = (v - min) / (max - min);
                    Color::Rgb {
                        r: lerp_channel(from.r, to.r, ratio),
                        g: lerp_channel(from.g, to.g, ratio),
                        b: lerp_channel(from.b, to.b, ratio),
                    }
                }
                None => Color::default_color(),
            },
        }
    }
}

// Rounds half up, so -127.5 becomes -127 and 127.5 becomes 128.
fn lerp_channel(from: u8, to: u8, ratio: f64) -> i64 {
    let from = f64::from(from);
    let to = f64::from(to);
    (from + (to - from) * ratio + 0.5).floor() as i64
}

/// Numbers, and strings that parse as finite numbers.
pub fn numeric_value(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn category_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(number_key(n)),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// 1.0 is keyed as "1", the way the stored category maps spell integers.
fn number_key(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(v) if n.is_f64() && v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => {
            format!("{}", v as i64)
        }
        _ => n.to_string(),
    }
}

pub fn build_scale(
    features: &[HazardFeature],
    legend: Option<&LegendDescriptor>,
    settings: Option<&ColorSettings>,
) -> ColorScale {
    let (Some(legend), Some(settings)) = (legend, settings) else {
        return ColorScale::Constant(Color::default_color());
    };

    match legend.kind {
        LegendKind::Categorical => ColorScale::Categorical(settings.clone()),
        LegendKind::Numeric => {
            let values: Vec<f64> = features
                .iter()
                .filter_map(|feature| feature.property(&legend.key))
                .filter_map(numeric_value)
                .collect();

            if values.is_empty() {
                return ColorScale::Constant(Color::default_color());
            }

            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min_color = settings.min().unwrap_or(FALLBACK_MIN_COLOR);

            if min == max {
                return ColorScale::Constant(Color::hex(min_color));
            }

            ColorScale::Gradient {
                min,
                max,
                from: hex_to_rgb(min_color),
                to: hex_to_rgb(settings.max().unwrap_or(FALLBACK_MAX_COLOR)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::{Geometry, JsonObject, Value};
    use serde_json::json;

    fn feature(props: JsonValue) -> HazardFeature {
        let properties: JsonObject = props.as_object().cloned().unwrap_or_default();
        HazardFeature {
            geometry: Geometry::new(Value::Point(vec![124.0, 10.0])),
            properties,
        }
    }

    fn numeric(key: &str) -> LegendDescriptor {
        LegendDescriptor {
            key: key.to_string(),
            kind: LegendKind::Numeric,
        }
    }

    fn green_to_red() -> ColorSettings {
        [("min", "#00ff00"), ("max", "#ff0000")].into_iter().collect()
    }

    #[test]
    fn hex_splits_into_channels() {
        assert_eq!(hex_to_rgb("#3388ff"), Rgb { r: 0x33, g: 0x88, b: 0xff });
        assert_eq!(hex_to_rgb("#zz"), Rgb { r: 0, g: 0, b: 0 });
    }

    #[test]
    fn no_legend_is_constant_default() {
        let scale = build_scale(&[], None, Some(&green_to_red()));
        assert_eq!(scale.color_for(Some(&json!(3))).to_string(), DEFAULT_COLOR);
    }

    #[test]
    fn missing_settings_is_constant_default() {
        let features = vec![feature(json!({"v": 1})), feature(json!({"v": 9}))];
        let scale = build_scale(&features, Some(&numeric("v")), None);
        assert_eq!(scale, ColorScale::Constant(Color::default_color()));
    }

    #[test]
    fn flat_values_use_min_color() {
        let features = vec![feature(json!({"v": 5})), feature(json!({"v": 5}))];
        let scale = build_scale(&features, Some(&numeric("v")), Some(&green_to_red()));
        for input in [json!(5), json!(0), json!(100)] {
            assert_eq!(scale.color_for(Some(&input)).to_string(), "#00ff00");
        }
    }

    #[test]
    fn flat_values_without_min_color_fall_back_to_green() {
        let features = vec![feature(json!({"v": 2}))];
        let settings: ColorSettings = [("max", "#0000ff")].into_iter().collect();
        let scale = build_scale(&features, Some(&numeric("v")), Some(&settings));
        assert_eq!(scale.color_for(Some(&json!(2))).to_string(), FALLBACK_MIN_COLOR);
    }

    #[test]
    fn midpoint_interpolates_each_channel() {
        let features = vec![feature(json!({"v": 0})), feature(json!({"v": 100}))];
        let scale = build_scale(&features, Some(&numeric("v")), Some(&green_to_red()));
        assert_eq!(scale.color_for(Some(&json!(50))).to_string(), "rgb(128,128,0)");
        assert_eq!(scale.color_for(Some(&json!(0))).to_string(), "rgb(0,255,0)");
        assert_eq!(scale.color_for(Some(&json!(100))).to_string(), "rgb(255,0,0)");
    }

    #[test]
    fn out_of_range_values_extrapolate_without_clamping() {
        let features = vec![feature(json!({"v": 0})), feature(json!({"v": 100}))];
        let scale = build_scale(&features, Some(&numeric("v")), Some(&green_to_red()));
        assert_eq!(scale.color_for(Some(&json!(200))).to_string(), "rgb(510,-255,0)");
        assert_eq!(scale.color_for(Some(&json!(-100))).to_string(), "rgb(-255,510,0)");
    }

    #[test]
    fn null_input_on_gradient_is_default() {
        let features = vec![feature(json!({"v": 0})), feature(json!({"v": 10}))];
        let scale = build_scale(&features, Some(&numeric("v")), Some(&green_to_red()));
        assert_eq!(scale.color_for(None).to_string(), DEFAULT_COLOR);
        assert_eq!(scale.color_for(Some(&json!("n/a"))).to_string(), DEFAULT_COLOR);
    }

    #[test]
    fn features_without_key_give_default() {
        let features = vec![feature(json!({"other": 1})), feature(json!({"v": null}))];
        let scale = build_scale(&features, Some(&numeric("v")), Some(&green_to_red()));
        assert_eq!(scale.color_for(Some(&json!(7))).to_string(), "#3388ff");
    }

    #[test]
    fn numeric_strings_count_as_values() {
        let features = vec![feature(json!({"v": "0"})), feature(json!({"v": "10"}))];
        let scale = build_scale(&features, Some(&numeric("v")), Some(&green_to_red()));
        assert_eq!(scale.color_for(Some(&json!("10"))).to_string(), "rgb(255,0,0)");
    }

    #[test]
    fn categorical_lookup_and_fallback() {
        let legend = LegendDescriptor {
            key: "zone".into(),
            kind: LegendKind::Categorical,
        };
        let settings: ColorSettings = [("A", "#111111"), ("3", "#333333")].into_iter().collect();
        let scale = build_scale(&[], Some(&legend), Some(&settings));
        assert_eq!(scale.color_for(Some(&json!("A"))).to_string(), "#111111");
        assert_eq!(scale.color_for(Some(&json!(3))).to_string(), "#333333");
        assert_eq!(scale.color_for(Some(&json!("B"))).to_string(), "#3388ff");
        assert_eq!(scale.color_for(None).to_string(), "#3388ff");
    }

    #[test]
    fn integer_valued_floats_match_integer_categories() {
        let legend = LegendDescriptor {
            key: "class".into(),
            kind: LegendKind::Categorical,
        };
        let settings: ColorSettings = [("1", "#111111"), ("2.5", "#252525")].into_iter().collect();
        let scale = build_scale(&[], Some(&legend), Some(&settings));
        assert_eq!(scale.color_for(Some(&json!(1.0))).to_string(), "#111111");
        assert_eq!(scale.color_for(Some(&json!(1))).to_string(), "#111111");
        assert_eq!(scale.color_for(Some(&json!(2.5))).to_string(), "#252525");
        assert_eq!(scale.color_for(Some(&json!(-0.0))).to_string(), DEFAULT_COLOR);
    }
}
