//! WASM bindings for story-engine: plays the bundled scene 5 data in the browser.

use wasm_bindgen::prelude::*;

use story_engine::core::catalog::{CharacterCatalog, ResourceSet, SceneCatalog};
use story_engine::core::generator::MockGenerator;
use story_engine::core::pipeline::StoryEngine;
use story_engine::core::rules::StoryRules;
use story_engine::schema::envelope::ContextEnvelope;
use story_engine::schema::payload::RenderPayload;
use story_engine::schema::state::GameState;

// ---------------------------------------------------------------------------
// Embedded story data, compiled into the WASM binary
// ---------------------------------------------------------------------------
mod data {
    pub const SCENES: &str = include_str!("../../story_data/scene5/scenes.ron");
    pub const CHARACTERS: &str = include_str!("../../story_data/scene5/characters.ron");
    pub const RESOURCES: &str = include_str!("../../story_data/scene5/resources.ron");
    pub const RULES: &str = include_str!("../../story_data/scene5/rules.ron");
}

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(serde::Serialize)]
struct TurnResult<'a> {
    render: &'a RenderPayload,
    choice: Option<&'a str>,
    scene: Option<&'a str>,
    ending: Option<&'a str>,
    flags: &'a [String],
}

#[derive(serde::Serialize)]
struct ChoiceInfo<'a> {
    id: &'a str,
    text: &'a str,
    value: &'a str,
}

#[derive(serde::Serialize)]
struct SceneInfo<'a> {
    id: &'a str,
    summary: &'a str,
    choices: Vec<ChoiceInfo<'a>>,
}

fn js_err(context: &str, e: impl std::fmt::Display) -> JsError {
    JsError::new(&format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// StorySession: one player's run through the bundled story
// ---------------------------------------------------------------------------
#[wasm_bindgen]
pub struct StorySession {
    engine: StoryEngine,
    state: GameState,
    seed: u64,
}

#[wasm_bindgen]
impl StorySession {
    /// Create a session at the default scene with a seeded mock generator.
    #[wasm_bindgen(constructor)]
    pub fn new(seed: u64) -> Result<StorySession, JsError> {
        let scenes = SceneCatalog::parse_ron(data::SCENES).map_err(|e| js_err("Scene parse error", e))?;
        let characters = CharacterCatalog::parse_ron(data::CHARACTERS)
            .map_err(|e| js_err("Character parse error", e))?;
        let resources =
            ResourceSet::parse_ron(data::RESOURCES).map_err(|e| js_err("Resource parse error", e))?;
        let rules = StoryRules::parse_ron(data::RULES).map_err(|e| js_err("Rules parse error", e))?;

        let state = GameState::starting_at(&rules.default_scene);
        let engine = StoryEngine::builder()
            .with_scenes(scenes)
            .with_characters(characters)
            .with_resources(resources)
            .with_rules(rules)
            .generator(MockGenerator::new(seed))
            .build()
            .map_err(|e| js_err("Engine build error", e))?;

        Ok(StorySession {
            engine,
            state,
            seed,
        })
    }

    /// Take a turn with free text. Returns the turn result as JSON.
    pub fn say(&mut self, text: &str) -> Result<String, JsError> {
        self.turn(ContextEnvelope::with_message(text))
    }

    /// Take a turn, optionally with a router choice hint for `hint_value`.
    pub fn step(
        &mut self,
        user_msg: &str,
        hint_value: Option<String>,
        hint_confidence: f64,
    ) -> Result<String, JsError> {
        let envelope = ContextEnvelope::with_message(user_msg);
        match hint_value {
            Some(value) => self.turn(envelope.hint(&value, hint_confidence)),
            None => self.turn(envelope),
        }
    }

    /// Return the current scene and its choices as JSON.
    pub fn scene(&self) -> Result<String, JsError> {
        let scene_id = self.engine.current_scene_id(&self.state);
        let scene = self
            .engine
            .scenes()
            .get(scene_id)
            .ok_or_else(|| JsError::new(&format!("Unknown scene: {scene_id}")))?;
        let info = SceneInfo {
            id: &scene.id,
            summary: &scene.summary,
            choices: scene
                .choices
                .iter()
                .map(|c| ChoiceInfo {
                    id: &c.id,
                    text: &c.text,
                    value: &c.value,
                })
                .collect(),
        };
        serde_json::to_string(&info).map_err(|e| js_err("Serialization error", e))
    }

    /// Return the full game state as JSON.
    pub fn state(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.state).map_err(|e| js_err("Serialization error", e))
    }

    /// Replace the game state, e.g. from a saved session.
    pub fn load_state(&mut self, state_json: &str) -> Result<(), JsError> {
        self.state = serde_json::from_str(state_json).map_err(|e| js_err("Invalid state JSON", e))?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Start over with a new seed.
    pub fn reset(&mut self, seed: u64) -> Result<(), JsError> {
        *self = StorySession::new(seed)?;
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

// Private helpers
impl StorySession {
    fn turn(&mut self, envelope: ContextEnvelope) -> Result<String, JsError> {
        let mut envelope = envelope;
        envelope.session_id = self.state.session_id.clone();
        envelope.turn = self.state.turn;

        let outcome = self
            .engine
            .step(&self.state, &envelope)
            .map_err(|e| js_err("Turn error", e))?;
        self.state = outcome.state;

        let result = TurnResult {
            render: &outcome.render,
            choice: outcome.choice.as_ref().map(|c| c.value.as_str()),
            scene: self.state.current_scene(),
            ending: self.state.ending.as_deref(),
            flags: &self.state.flags,
        };
        serde_json::to_string(&result).map_err(|e| js_err("Serialization error", e))
    }
}
