use serde::Deserialize;

use super::result::ObjectClass;

/// Detector class names grouped by the role they play in the rule.
///
/// Matching is case-insensitive and ignores any `:sub_label` suffix, so
/// `"Scooper:metal"` resolves the same way as `"scooper"`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LabelMap {
    pub hand: Vec<String>,
    pub utensil: Vec<String>,
    pub food: Vec<String>,
}

impl Default for LabelMap {
    fn default() -> Self {
        Self {
            hand: vec!["hand".to_string()],
            utensil: vec!["scooper".to_string(), "utensil".to_string()],
            food: vec!["pizza".to_string(), "food".to_string()],
        }
    }
}

impl LabelMap {
    pub fn normalized(&self) -> Self {
        fn norm(names: &[String]) -> Vec<String> {
            names
                .iter()
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect()
        }
        Self {
            hand: norm(&self.hand),
            utensil: norm(&self.utensil),
            food: norm(&self.food),
        }
    }

    pub fn classify(&self, label: &str) -> ObjectClass {
        let base = label.split(':').next().unwrap_or(label).trim();
        let hit = |names: &[String]| names.iter().any(|name| name.eq_ignore_ascii_case(base));

        if hit(&self.hand) {
            ObjectClass::Hand
        } else if hit(&self.utensil) {
            ObjectClass::Utensil
        } else if hit(&self.food) {
            ObjectClass::Food
        } else {
            ObjectClass::Background
        }
    }
}
