use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::patch::Patch;

/// A choice the scene offers the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceSpec {
    pub id: String,
    pub text: String,
    pub value: String,
    /// Extra phrases that select this choice when found in free text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl ChoiceSpec {
    /// The case-folded alias set: value, display text, then explicit aliases.
    /// Empty entries are dropped.
    pub fn alias_set(&self) -> Vec<String> {
        std::iter::once(&self.value)
            .chain(std::iter::once(&self.text))
            .chain(self.aliases.iter())
            .filter(|a| !a.is_empty())
            .map(|a| a.to_lowercase())
            .collect()
    }
}

/// Replaces a scene's allowed speakers while its flag guard holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeakerRule {
    #[serde(default)]
    pub require_flags: Vec<String>,
    #[serde(default)]
    pub forbid_flags: Vec<String>,
    /// A rule without an override list never matches.
    #[serde(default)]
    pub r#override: Option<Vec<String>>,
}

/// Maps a choice value (plus flag guard) to a target scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRule {
    pub when: String,
    pub goto: String,
    #[serde(default)]
    pub require_flags: Vec<String>,
    #[serde(default)]
    pub forbid_flags: Vec<String>,
    /// Supplemental patch applied alongside the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Patch>,
}

/// Shared flag guard: every required flag present, no forbidden flag present.
pub fn guard_holds(require: &[String], forbid: &[String], flags: &FxHashSet<String>) -> bool {
    require.iter().all(|f| flags.contains(f)) && !forbid.iter().any(|f| flags.contains(f))
}

/// A node of the narrative graph. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneDefinition {
    pub id: String,
    pub summary: String,
    /// Empty means unrestricted.
    pub allowed_speakers: Vec<String>,
    pub speaker_rules: Vec<SpeakerRule>,
    pub beats: BTreeMap<String, String>,
    pub choices: Vec<ChoiceSpec>,
    pub branch_rules: Vec<BranchRule>,
}

impl SceneDefinition {
    pub fn has_choice_id(&self, choice_id: &str) -> bool {
        self.choices.iter().any(|c| c.id == choice_id)
    }

    pub fn has_choice_value(&self, value: &str) -> bool {
        self.choices.iter().any(|c| c.value == value)
    }

    /// Terminal scenes offer no choices and no branches.
    pub fn is_terminal(&self) -> bool {
        self.choices.is_empty() && self.branch_rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice() -> ChoiceSpec {
        ChoiceSpec {
            id: "d".to_string(),
            text: "Gather Allies".to_string(),
            value: "gather_allies".to_string(),
            aliases: vec!["ALLY".to_string(), String::new()],
        }
    }

    #[test]
    fn alias_set_is_case_folded_and_ordered() {
        assert_eq!(
            choice().alias_set(),
            vec!["gather_allies", "gather allies", "ally"]
        );
    }

    #[test]
    fn guard_requires_and_forbids() {
        let flags: FxHashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert!(guard_holds(&[], &[], &flags));
        assert!(guard_holds(&["a".to_string()], &["c".to_string()], &flags));
        assert!(!guard_holds(&["c".to_string()], &[], &flags));
        assert!(!guard_holds(&[], &["b".to_string()], &flags));
    }

    #[test]
    fn choice_lookup() {
        let scene = SceneDefinition {
            id: "fork".to_string(),
            choices: vec![choice()],
            ..SceneDefinition::default()
        };
        assert!(scene.has_choice_id("d"));
        assert!(!scene.has_choice_id("gather_allies"));
        assert!(scene.has_choice_value("gather_allies"));
        assert!(!scene.is_terminal());
    }
}
