use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub name: String,
    pub description: String,
    pub max_points: u32,
}

/// Grading scales mix numeric (PSA style) and letter scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GradeScore {
    Numeric(u32),
    Letter(String),
}

impl fmt::Display for GradeScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Letter(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub label: String,
    pub score_value: GradeScore,
    pub min_points: u32,
    pub description: String,
}

/// Weighted per-criterion rubric plus its grade scale.
///
/// `grades` is ordered by descending `min_points`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionTemplate {
    pub criteria: Vec<Criterion>,
    pub grades: Vec<Grade>,
}

impl ConditionTemplate {
    pub fn max_points(&self) -> u32 {
        self.criteria
            .iter()
            .map(|criterion| criterion.max_points)
            .sum()
    }

    /// Highest grade whose threshold the total reaches.
    pub fn grade_for(&self, points: u32) -> Option<&Grade> {
        self.grades
            .iter()
            .filter(|grade| grade.min_points <= points)
            .max_by_key(|grade| grade.min_points)
    }
}

pub(super) fn default_templates() -> IndexMap<String, ConditionTemplate> {
    let mut map = IndexMap::new();
    map.insert("pokemon_card".to_string(), trading_card_template());
    map.insert(super::FALLBACK_CATEGORY.to_string(), collectible_template());
    map
}

fn criterion(name: &str, description: &str, max_points: u32) -> Criterion {
    Criterion {
        name: name.to_string(),
        description: description.to_string(),
        max_points,
    }
}

fn grade(label: &str, score_value: GradeScore, min_points: u32, description: &str) -> Grade {
    Grade {
        label: label.to_string(),
        score_value,
        min_points,
        description: description.to_string(),
    }
}

fn letter(value: &str) -> GradeScore {
    GradeScore::Letter(value.to_string())
}

fn trading_card_template() -> ConditionTemplate {
    ConditionTemplate {
        criteria: vec![
            criterion(
                "Surface",
                "Check for scratches, whitening, scuffs, or print defects",
                30,
            ),
            criterion("Corners", "Examine corner sharpness and wear", 30),
            criterion("Edges", "Look for edge wear or damage", 20),
            criterion("Centering", "Evaluate print centering on front and back", 20),
        ],
        grades: vec![
            grade("Gem Mint", GradeScore::Numeric(10), 98, "Perfect condition in every way"),
            grade("Mint", GradeScore::Numeric(9), 90, "Nearly perfect with minimal imperfections"),
            grade("Near Mint", GradeScore::Numeric(8), 80, "Excellent condition with very minor wear"),
            grade("Excellent", GradeScore::Numeric(6), 60, "Light wear but still very presentable"),
            grade("Good", GradeScore::Numeric(4), 40, "Moderate wear visible"),
            grade("Poor", GradeScore::Numeric(2), 0, "Heavy wear or damage"),
        ],
    }
}

pub(super) fn collectible_template() -> ConditionTemplate {
    ConditionTemplate {
        criteria: vec![
            criterion("Overall Condition", "General condition and preservation", 40),
            criterion("Completeness", "All original parts present", 30),
            criterion("Functionality", "Working condition if applicable", 15),
            criterion("Aesthetics", "Visual appeal and original finish", 15),
        ],
        grades: vec![
            grade("Mint", letter("A"), 90, "Perfect or nearly perfect condition"),
            grade("Excellent", letter("B"), 75, "Minor wear but very well preserved"),
            grade("Good", letter("C"), 60, "Shows wear but intact and presentable"),
            grade("Fair", letter("D"), 40, "Significant wear or damage"),
            grade("Poor", letter("F"), 0, "Heavy wear or damage"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rubrics_sum_to_one_hundred_points() {
        for (key, template) in default_templates() {
            assert_eq!(template.max_points(), 100, "{key}");
        }
    }

    #[test]
    fn grades_are_ordered_by_descending_threshold() {
        for (key, template) in default_templates() {
            let thresholds: Vec<u32> = template.grades.iter().map(|g| g.min_points).collect();
            let mut sorted = thresholds.clone();
            sorted.sort_by(|a, b| b.cmp(a));
            assert_eq!(thresholds, sorted, "{key}");
            assert_eq!(thresholds.last(), Some(&0), "{key} must grade every total");
        }
    }

    #[test]
    fn grade_for_picks_highest_reached_threshold() {
        let template = trading_card_template();
        assert_eq!(template.grade_for(85).map(|g| g.label.as_str()), Some("Near Mint"));
        assert_eq!(template.grade_for(80).map(|g| g.label.as_str()), Some("Near Mint"));
        assert_eq!(template.grade_for(79).map(|g| g.label.as_str()), Some("Excellent"));
        assert_eq!(template.grade_for(100).map(|g| g.label.as_str()), Some("Gem Mint"));
        assert_eq!(template.grade_for(0).map(|g| g.label.as_str()), Some("Poor"));
    }

    #[test]
    fn grade_scores_serialize_as_plain_values() -> anyhow::Result<()> {
        let numeric = serde_json::to_value(GradeScore::Numeric(8))?;
        let letter = serde_json::to_value(letter("B"))?;
        assert_eq!(numeric, serde_json::json!(8));
        assert_eq!(letter, serde_json::json!("B"));
        let parsed: GradeScore = serde_json::from_value(serde_json::json!("A"))?;
        assert_eq!(parsed.to_string(), "A");
        Ok(())
    }
}
