use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub(super) const DEFAULT_THRESHOLDS_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueCategory {
    #[serde(rename = "Not Valuable")]
    NotValuable,
    #[serde(rename = "Somewhat Valuable")]
    SomewhatValuable,
    #[serde(rename = "Valuable")]
    Valuable,
}

impl ValueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotValuable => "Not Valuable",
            Self::SomewhatValuable => "Somewhat Valuable",
            Self::Valuable => "Valuable",
        }
    }
}

impl fmt::Display for ValueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// USD thresholds; each is the inclusive lower bound of its tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueThresholds {
    pub somewhat_valuable: f64,
    pub valuable: f64,
}

impl ValueThresholds {
    pub const fn new(somewhat_valuable: f64, valuable: f64) -> Self {
        Self {
            somewhat_valuable,
            valuable,
        }
    }
}

impl Default for ValueThresholds {
    fn default() -> Self {
        Self::new(25.0, 100.0)
    }
}

pub fn classify_value(average: f64, thresholds: ValueThresholds) -> ValueCategory {
    if average >= thresholds.valuable {
        ValueCategory::Valuable
    } else if average >= thresholds.somewhat_valuable {
        ValueCategory::SomewhatValuable
    } else {
        ValueCategory::NotValuable
    }
}

pub(super) fn default_thresholds() -> IndexMap<String, ValueThresholds> {
    let mut map = IndexMap::new();
    map.insert("pokemon_card".to_string(), ValueThresholds::new(10.0, 50.0));
    map.insert("sports_card".to_string(), ValueThresholds::new(20.0, 100.0));
    map.insert("video_game".to_string(), ValueThresholds::new(30.0, 100.0));
    map.insert(DEFAULT_THRESHOLDS_KEY.to_string(), ValueThresholds::default());
    map
}
