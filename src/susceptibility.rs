//! Susceptibility classification of raw hazard attribute values.
//!
//! Hazard datasets label susceptibility in free text ("High Susceptibility",
//! "generally low", "Least susceptible", ...). Classification is a keyword
//! match in a fixed priority order, so values carrying several keywords
//! resolve deterministically.

use geojson::JsonValue;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SusceptibilityLevel {
    High,
    Moderate,
    Low,
    GenerallySusceptible,
    Unknown,
}

impl SusceptibilityLevel {
    pub const ALL: [SusceptibilityLevel; 5] = [
        SusceptibilityLevel::High,
        SusceptibilityLevel::Moderate,
        SusceptibilityLevel::Low,
        SusceptibilityLevel::GenerallySusceptible,
        SusceptibilityLevel::Unknown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SusceptibilityLevel::High => "High",
            SusceptibilityLevel::Moderate => "Moderate",
            SusceptibilityLevel::Low => "Low",
            SusceptibilityLevel::GenerallySusceptible => "Generally Susceptible",
            SusceptibilityLevel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SusceptibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for SusceptibilityLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Fixed color for a level, used for both text emphasis and map fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayColor(pub &'static str);

impl DisplayColor {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for DisplayColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// Order matters: "generally low" must be Low, "generally high" must be High.
const KEYWORDS: [(&str, SusceptibilityLevel); 5] = [
    ("high", SusceptibilityLevel::High),
    ("moderate", SusceptibilityLevel::Moderate),
    ("low", SusceptibilityLevel::Low),
    ("least", SusceptibilityLevel::Low),
    ("general", SusceptibilityLevel::GenerallySusceptible),
];

/// Classifies a raw property value. Anything but a non-empty string is
/// `Unknown`.
pub fn classify(raw: Option<&JsonValue>) -> SusceptibilityLevel {
    match raw {
        Some(JsonValue::String(s)) => classify_str(s),
        _ => SusceptibilityLevel::Unknown,
    }
}

pub fn classify_str(raw: &str) -> SusceptibilityLevel {
    if raw.is_empty() {
        return SusceptibilityLevel::Unknown;
    }
    let lowered = raw.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, level)| *level)
        .unwrap_or(SusceptibilityLevel::Unknown)
}

pub fn style_for(level: SusceptibilityLevel) -> DisplayColor {
    match level {
        SusceptibilityLevel::High => DisplayColor("#e53935"),
        SusceptibilityLevel::Moderate => DisplayColor("#fb8c00"),
        SusceptibilityLevel::Low => DisplayColor("#fdd835"),
        SusceptibilityLevel::GenerallySusceptible => DisplayColor("#8e24aa"),
        SusceptibilityLevel::Unknown => DisplayColor("#9e9e9e"),
    }
}
