use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The scene object of a game state: the current scene id plus any
/// scene-local fields a patch has merged in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_scene: Option<String>,
    #[serde(flatten)]
    pub locals: Map<String, Value>,
}

impl SceneState {
    pub fn at(scene_id: &str) -> Self {
        Self {
            current_scene: Some(scene_id.to_string()),
            locals: Map::new(),
        }
    }
}

/// The durable per-session game document.
///
/// The engine takes a state by reference and returns a fresh value; the
/// caller's copy is never modified, so discarding a turn's result leaves
/// the prior state valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,

    pub scene: SceneState,
    pub route: Option<String>,

    pub turn: u32,
    pub total_turns_used: u32,
    pub character_turns_used: BTreeMap<String, u32>,

    pub allies: BTreeMap<String, bool>,
    /// Always within `0..=1000`.
    pub affinity: BTreeMap<String, u32>,
    /// Sorted and duplicate-free after every patch.
    pub flags: Vec<String>,

    pub ending: Option<String>,
    /// Sticky: the first non-empty value wins.
    pub end_reason: Option<String>,

    pub user_choice: Option<String>,
    pub last_user_msg: String,

    /// Append-only.
    pub scene_history: Vec<String>,
    pub dialogue_rules: Map<String, Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl GameState {
    /// A fresh session positioned at `scene_id`.
    pub fn starting_at(scene_id: &str) -> Self {
        Self {
            scene: SceneState::at(scene_id),
            ..Self::default()
        }
    }

    pub fn current_scene(&self) -> Option<&str> {
        self.scene.current_scene.as_deref()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn flag_set(&self) -> FxHashSet<String> {
        self.flags.iter().cloned().collect()
    }

    pub fn is_ally(&self, character: &str) -> bool {
        self.allies.get(character).copied().unwrap_or(false)
    }

    pub fn character_turns(&self, character: &str) -> u32 {
        self.character_turns_used.get(character).copied().unwrap_or(0)
    }

    /// True once an ending has been recorded.
    pub fn is_finished(&self) -> bool {
        self.ending.as_deref().is_some_and(|e| !e.is_empty())
    }
}
