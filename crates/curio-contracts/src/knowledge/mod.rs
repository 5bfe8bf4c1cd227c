//! Static domain tables keyed by object category.
//!
//! Every lookup is total: an unknown category resolves to the `collectible`
//! entry (or the `default` value thresholds), never to an error.

mod conditions;
mod labels;
mod markets;
mod values;

use std::sync::LazyLock;

use indexmap::IndexMap;

pub use conditions::{ConditionTemplate, Criterion, Grade, GradeScore};
pub use markets::{MarketSourceHint, SourceKind};
pub use values::{classify_value, ValueCategory, ValueThresholds};

pub const FALLBACK_CATEGORY: &str = "collectible";
pub const FALLBACK_DISPLAY_LABEL: &str = "Collectible Item";

static DEFAULT_KNOWLEDGE: LazyLock<KnowledgeBase> = LazyLock::new(|| KnowledgeBase::new(None));

/// Shared read-only instance holding the built-in tables.
pub fn default_knowledge() -> &'static KnowledgeBase {
    &DEFAULT_KNOWLEDGE
}

pub fn condition_template_for(category: &str) -> &'static ConditionTemplate {
    default_knowledge().condition_template_for(category)
}

pub fn market_sources_for(category: &str) -> &'static [MarketSourceHint] {
    default_knowledge().market_sources_for(category)
}

pub fn display_label_for(category: &str) -> &'static str {
    default_knowledge().display_label_for(category)
}

#[derive(Debug, Clone)]
pub struct KnowledgeTables {
    pub conditions: IndexMap<String, ConditionTemplate>,
    pub markets: IndexMap<String, Vec<MarketSourceHint>>,
    pub values: IndexMap<String, ValueThresholds>,
    pub labels: IndexMap<String, String>,
}

impl Default for KnowledgeTables {
    fn default() -> Self {
        Self {
            conditions: conditions::default_templates(),
            markets: markets::default_sources(),
            values: values::default_thresholds(),
            labels: labels::default_labels(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    tables: KnowledgeTables,
    fallback_condition: ConditionTemplate,
    fallback_markets: Vec<MarketSourceHint>,
}

impl KnowledgeBase {
    /// Custom tables may omit the `collectible` keys; the built-in fallback
    /// entries are used in that case so lookups stay total.
    pub fn new(tables: Option<KnowledgeTables>) -> Self {
        let tables = tables.unwrap_or_default();
        let fallback_condition = tables
            .conditions
            .get(FALLBACK_CATEGORY)
            .cloned()
            .unwrap_or_else(conditions::collectible_template);
        let fallback_markets = tables
            .markets
            .get(FALLBACK_CATEGORY)
            .cloned()
            .unwrap_or_else(markets::collectible_sources);
        Self {
            tables,
            fallback_condition,
            fallback_markets,
        }
    }

    pub fn condition_template_for(&self, category: &str) -> &ConditionTemplate {
        self.tables
            .conditions
            .get(category)
            .unwrap_or(&self.fallback_condition)
    }

    pub fn market_sources_for(&self, category: &str) -> &[MarketSourceHint] {
        self.tables
            .markets
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(self.fallback_markets.as_slice())
    }

    pub fn value_thresholds_for(&self, category: &str) -> ValueThresholds {
        self.tables
            .values
            .get(category)
            .or_else(|| self.tables.values.get(values::DEFAULT_THRESHOLDS_KEY))
            .copied()
            .unwrap_or_default()
    }

    pub fn classify_value(&self, average: f64, category: &str) -> ValueCategory {
        classify_value(average, self.value_thresholds_for(category))
    }

    pub fn display_label_for(&self, category: &str) -> &str {
        self.tables
            .labels
            .get(category)
            .map(String::as_str)
            .unwrap_or(FALLBACK_DISPLAY_LABEL)
    }

    /// Category keys the classifier prompt offers to the model, in table order.
    pub fn known_categories(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in self
            .tables
            .markets
            .keys()
            .chain(self.tables.conditions.keys())
            .chain(self.tables.labels.keys())
        {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        if let Some(idx) = keys.iter().position(|key| key == FALLBACK_CATEGORY) {
            let fallback = keys.remove(idx);
            keys.push(fallback);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    #[test]
    fn lookups_fall_back_to_collectible_for_unknown_keys() {
        let knowledge = KnowledgeBase::new(None);
        assert_eq!(
            knowledge.condition_template_for("unknown_widget"),
            knowledge.condition_template_for("collectible")
        );
        assert_eq!(
            knowledge.market_sources_for("unknown_widget"),
            knowledge.market_sources_for("collectible")
        );
        assert_eq!(knowledge.display_label_for("unknown_widget"), "Collectible Item");
        assert_eq!(
            knowledge.value_thresholds_for("unknown_widget"),
            ValueThresholds::new(25.0, 100.0)
        );
    }

    #[test]
    fn lookups_are_total_for_every_known_category() {
        let knowledge = default_knowledge();
        for category in knowledge.known_categories() {
            let template = knowledge.condition_template_for(&category);
            assert!(!template.criteria.is_empty(), "{category} has no criteria");
            assert!(!template.grades.is_empty(), "{category} has no grades");
            assert!(
                !knowledge.market_sources_for(&category).is_empty(),
                "{category} has no market sources"
            );
        }
    }

    #[test]
    fn known_categories_put_fallback_last() {
        let categories = default_knowledge().known_categories();
        assert_eq!(categories.first().map(String::as_str), Some("pokemon_card"));
        assert_eq!(categories.last().map(String::as_str), Some("collectible"));
        assert!(categories.iter().any(|key| key == "comic_book"));
    }

    #[test]
    fn pokemon_card_has_dedicated_entries() {
        assert_eq!(display_label_for("pokemon_card"), "Pokemon Card");
        assert_eq!(market_sources_for("pokemon_card")[0].name, "TCGPlayer");
        assert_eq!(condition_template_for("pokemon_card").criteria[0].name, "Surface");
    }

    #[test]
    fn custom_tables_without_fallback_still_resolve() {
        let tables = KnowledgeTables {
            conditions: IndexMap::new(),
            markets: IndexMap::new(),
            values: IndexMap::new(),
            labels: IndexMap::new(),
        };
        let knowledge = KnowledgeBase::new(Some(tables));
        assert_eq!(
            knowledge.condition_template_for("pokemon_card").criteria[0].name,
            "Overall Condition"
        );
        assert_eq!(knowledge.market_sources_for("pokemon_card")[0].name, "eBay");
        assert_eq!(
            knowledge.classify_value(30.0, "pokemon_card"),
            ValueCategory::SomewhatValuable
        );
    }
}
