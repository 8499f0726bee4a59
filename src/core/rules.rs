//! Story rules: tunable thresholds, designated scenes, and derived flag names.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const FLAG_RECRUIT_INOSUKE: &str = "recruited_inosuke";
pub const FLAG_RECRUIT_ZENITSU: &str = "recruited_zenitsu";
pub const FLAG_ORDER_FIRST_INOSUKE: &str = "order_first_inosuke";
pub const FLAG_ORDER_INOSUKE_THEN_ZENITSU: &str = "order_inosuke_then_zenitsu";
pub const FLAG_HIDDEN_ELIGIBLE: &str = "hidden_ending_eligible";

pub const INOSUKE: &str = "inosuke";
pub const ZENITSU: &str = "zenitsu";

pub const AFFINITY_MAX: u32 = 1000;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Turn budgets that gate hidden-ending eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLimits {
    /// Per recruited character, inclusive.
    pub character: u32,
    /// Whole mission, inclusive.
    pub mission: u32,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            character: 3,
            mission: 8,
        }
    }
}

/// Engine configuration. Every field has a default, so a RON file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryRules {
    /// Minimum router confidence (inclusive) for a choice hint to be trusted.
    pub hint_confidence_threshold: f64,
    pub limits: TurnLimits,
    /// Scene used when the state carries no current scene.
    pub default_scene: String,
    pub mission_scene: String,
    pub hidden_end_scene: String,
    pub original_end_scene: String,
    /// Choice value that triggers the mission ending judgement.
    pub finish_choice: Option<String>,
    /// Character whose affinity selects the tone hint.
    pub tone_character: String,
    pub default_affinity: u32,
}

impl Default for StoryRules {
    fn default() -> Self {
        Self {
            hint_confidence_threshold: 0.75,
            limits: TurnLimits::default(),
            default_scene: "scene5_fork".to_string(),
            mission_scene: "scene5_mission_gather".to_string(),
            hidden_end_scene: "scene5_end_hidden".to_string(),
            original_end_scene: "scene5_end_original".to_string(),
            finish_choice: Some("finish".to_string()),
            tone_character: "tanjiro".to_string(),
            default_affinity: 500,
        }
    }
}

impl StoryRules {
    pub fn load_from_ron(path: &Path) -> Result<StoryRules, RulesError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<StoryRules, RulesError> {
        Ok(ron::from_str(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_scene5() {
        let rules = StoryRules::default();
        assert_eq!(rules.hint_confidence_threshold, 0.75);
        assert_eq!(rules.limits.character, 3);
        assert_eq!(rules.limits.mission, 8);
        assert_eq!(rules.mission_scene, "scene5_mission_gather");
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let rules = StoryRules::parse_ron("(hint_confidence_threshold: 0.9)").unwrap();
        assert_eq!(rules.hint_confidence_threshold, 0.9);
        assert_eq!(rules.limits, TurnLimits::default());
        assert_eq!(rules.finish_choice.as_deref(), Some("finish"));
    }

    #[test]
    fn loads_data_file() {
        let rules = StoryRules::load_from_ron(Path::new("story_data/scene5/rules.ron")).unwrap();
        assert_eq!(rules.default_scene, "scene5_fork");
        assert_eq!(rules.limits.mission, 8);
    }
}
