//! Static story data: scenes, characters, and known resources.
//!
//! Loaded once at engine construction and read-only afterwards.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

use crate::core::validator::ResourceOracle;
use crate::schema::scene::{BranchRule, ChoiceSpec, SceneDefinition, SpeakerRule};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scene defined twice: {0}")]
    DuplicateScene(String),
}

// On-disk scene shape. The scene id lives in the map key, so it is
// copied into the definition after parsing.

#[derive(Debug, Deserialize)]
#[serde(rename = "Scene")]
struct RawScene {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    allowed_speakers: Vec<String>,
    #[serde(default)]
    speaker_rules: Vec<SpeakerRule>,
    #[serde(default)]
    beats: BTreeMap<String, String>,
    #[serde(default)]
    choices: Vec<ChoiceSpec>,
    #[serde(default, alias = "split_rules")]
    branch_rules: Vec<BranchRule>,
}

impl RawScene {
    fn into_definition(self, id: String) -> SceneDefinition {
        SceneDefinition {
            id,
            summary: self.summary,
            allowed_speakers: self.allowed_speakers,
            speaker_rules: self.speaker_rules,
            beats: self.beats,
            choices: self.choices,
            branch_rules: self.branch_rules,
        }
    }
}

/// Read-only repository of scene definitions.
#[derive(Debug, Clone, Default)]
pub struct SceneCatalog {
    scenes: HashMap<String, SceneDefinition>,
}

impl SceneCatalog {
    pub fn load_from_ron(path: &Path) -> Result<SceneCatalog, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<SceneCatalog, CatalogError> {
        let raw: HashMap<String, RawScene> = ron::from_str(input)?;
        Ok(Self::from_raw(raw))
    }

    /// Parse the JSON form: an object of scene id to scene body.
    pub fn parse_json(input: &str) -> Result<SceneCatalog, CatalogError> {
        let raw: HashMap<String, RawScene> = serde_json::from_str(input)?;
        Ok(Self::from_raw(raw))
    }

    pub fn load(path: &Path) -> Result<SceneCatalog, CatalogError> {
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            let contents = std::fs::read_to_string(path)?;
            Self::parse_json(&contents)
        } else {
            Self::load_from_ron(path)
        }
    }

    fn from_raw(raw: HashMap<String, RawScene>) -> SceneCatalog {
        let scenes = raw
            .into_iter()
            .map(|(id, scene)| (id.clone(), scene.into_definition(id)))
            .collect();
        SceneCatalog { scenes }
    }

    pub fn from_scenes(scenes: impl IntoIterator<Item = SceneDefinition>) -> SceneCatalog {
        SceneCatalog {
            scenes: scenes.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    /// Fold another catalog into this one. Scene ids must not collide.
    pub fn merge(&mut self, other: SceneCatalog) -> Result<(), CatalogError> {
        if let Some(id) = other.scenes.keys().find(|id| self.scenes.contains_key(*id)) {
            return Err(CatalogError::DuplicateScene(id.clone()));
        }
        self.scenes.extend(other.scenes);
        Ok(())
    }

    pub fn get(&self, scene_id: &str) -> Option<&SceneDefinition> {
        self.scenes.get(scene_id)
    }

    pub fn contains(&self, scene_id: &str) -> bool {
        self.scenes.contains_key(scene_id)
    }

    pub fn has_choice_id(&self, scene_id: &str, choice_id: &str) -> bool {
        self.get(scene_id).is_some_and(|s| s.has_choice_id(choice_id))
    }

    /// Scene ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.scenes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

/// Affinity band used to pick a tone line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToneLevel {
    Low,
    Medium,
    High,
}

impl ToneLevel {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// `High` from 801, `Medium` from 401, otherwise `Low`.
pub fn select_tone_level(affinity: u32) -> ToneLevel {
    if affinity >= 801 {
        ToneLevel::High
    } else if affinity >= 401 {
        ToneLevel::Medium
    } else {
        ToneLevel::Low
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "Character")]
pub struct Character {
    #[serde(default)]
    pub name: String,
    /// Tone line per level key: "low", "medium", "high".
    #[serde(default)]
    pub tone: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct CharacterCatalog {
    characters: HashMap<String, Character>,
}

impl CharacterCatalog {
    pub fn load_from_ron(path: &Path) -> Result<CharacterCatalog, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<CharacterCatalog, CatalogError> {
        Ok(CharacterCatalog {
            characters: ron::from_str(input)?,
        })
    }

    pub fn get(&self, character_id: &str) -> Option<&Character> {
        self.characters.get(character_id)
    }

    pub fn all_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.characters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// The tone line for `character_id` at the band `affinity` falls in.
    pub fn tone_hint(&self, character_id: &str, affinity: u32) -> Option<&str> {
        self.get(character_id)?
            .tone
            .get(select_tone_level(affinity).key())
            .map(String::as_str)
    }
}

/// Known resource ids, e.g. scene illustrations.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    ids: FxHashSet<String>,
}

impl ResourceSet {
    pub fn load_from_ron(path: &Path) -> Result<ResourceSet, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// A RON list of ids.
    pub fn parse_ron(input: &str) -> Result<ResourceSet, CatalogError> {
        let ids: Vec<String> = ron::from_str(input)?;
        Ok(ids.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        ResourceSet {
            ids: iter.into_iter().collect(),
        }
    }
}

impl ResourceOracle for ResourceSet {
    fn has(&self, resource_id: &str) -> bool {
        self.ids.contains(resource_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::patch::PatchField;

    const SCENES_RON: &str = r#"{
        "fork": Scene(
            summary: "The fork",
            allowed_speakers: ["tanjiro"],
            choices: [
                (id: "c", text: "Rush", value: "rush", aliases: ["charge"]),
                (id: "d", text: "Gather", value: "gather_allies"),
            ],
            branch_rules: [
                (when: "rush", goto: "end"),
                (when: "gather_allies", goto: "mission", set: Some({"turn": {"inc": 1}})),
            ],
            beats: {"intro": "Which way?"},
        ),
        "end": Scene(summary: "The end"),
        "mission": Scene(summary: "The mission"),
    }"#;

    #[test]
    fn parse_scenes_from_ron() {
        let catalog = SceneCatalog::parse_ron(SCENES_RON).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.ids(), vec!["end", "fork", "mission"]);

        let fork = catalog.get("fork").unwrap();
        assert_eq!(fork.id, "fork");
        assert_eq!(fork.choices[0].aliases, vec!["charge"]);
        assert!(fork.choices[1].aliases.is_empty());
        assert_eq!(fork.beats["intro"], "Which way?");
        let set = fork.branch_rules[1].set.as_ref().unwrap();
        assert!(set.touches(PatchField::Turn));
        assert!(catalog.get("end").unwrap().is_terminal());
    }

    #[test]
    fn ron_rejects_malformed_branch_patch() {
        let input = r#"{"fork": Scene(branch_rules: [(when: "x", goto: "y", set: Some({"scene": "oops"}))])}"#;
        assert!(SceneCatalog::parse_ron(input).is_err());
    }

    #[test]
    fn parse_scenes_from_json_with_split_rules() {
        let catalog = SceneCatalog::parse_json(
            r#"{"scene5_cutscene": {
                "allowed_speakers": ["tanjiro"],
                "choices": [{"id": "go_fork", "text": "To the fork", "value": "to_fork"}],
                "split_rules": [{"when": "to_fork", "goto": "scene5_fork"}]
            }}"#,
        )
        .unwrap();
        let scene = catalog.get("scene5_cutscene").unwrap();
        assert_eq!(scene.branch_rules[0].goto, "scene5_fork");
        assert!(catalog.has_choice_id("scene5_cutscene", "go_fork"));
        assert!(!catalog.has_choice_id("missing", "go_fork"));
    }

    #[test]
    fn load_scene5_data() {
        let catalog =
            SceneCatalog::load_from_ron(Path::new("story_data/scene5/scenes.ron")).unwrap();
        assert!(catalog.contains("scene5_fork"));
        assert!(catalog.contains("scene5_mission_gather"));
        assert!(catalog.contains("scene5_end_hidden"));
        assert!(catalog.contains("scene5_end_original"));
    }

    #[test]
    fn merge_rejects_duplicate_scene() {
        let mut catalog = SceneCatalog::parse_ron(SCENES_RON).unwrap();
        let extra = SceneCatalog::parse_ron(r#"{"epilogue": Scene(summary: "After")}"#).unwrap();
        catalog.merge(extra).unwrap();
        assert_eq!(catalog.len(), 4);

        let clash = SceneCatalog::parse_ron(r#"{"end": Scene(summary: "Again")}"#).unwrap();
        match catalog.merge(clash) {
            Err(CatalogError::DuplicateScene(id)) => assert_eq!(id, "end"),
            other => panic!("expected duplicate scene, got {other:?}"),
        }
        assert_eq!(catalog.get("end").unwrap().summary, "The end");
    }

    #[test]
    fn tone_levels() {
        assert_eq!(select_tone_level(0), ToneLevel::Low);
        assert_eq!(select_tone_level(400), ToneLevel::Low);
        assert_eq!(select_tone_level(401), ToneLevel::Medium);
        assert_eq!(select_tone_level(800), ToneLevel::Medium);
        assert_eq!(select_tone_level(801), ToneLevel::High);
    }

    #[test]
    fn tone_hint_lookup() {
        let characters = CharacterCatalog::parse_ron(
            r#"{"tanjiro": Character(name: "Tanjiro", tone: {"low": "polite", "high": "warm"})}"#,
        )
        .unwrap();
        assert_eq!(characters.tone_hint("tanjiro", 900), Some("warm"));
        assert_eq!(characters.tone_hint("tanjiro", 500), None);
        assert_eq!(characters.tone_hint("zenitsu", 900), None);
    }

    #[test]
    fn resource_set_oracle() {
        let resources = ResourceSet::parse_ron(r#"["fork_bg", "hidden_end_cg"]"#).unwrap();
        assert!(resources.has("fork_bg"));
        assert!(!resources.has("missing"));
    }
}
