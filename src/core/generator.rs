//! The external content generator: request shape, trait, and a mock.
//!
//! The engine never trusts what comes back. A generator returns raw text
//! that the pipeline parses and validates.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::schema::envelope::{RecentMessage, RouterHint};
use crate::schema::scene::ChoiceSpec;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),
    #[error("request serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub const GENERATOR_RULES: [&str; 3] = [
    "No meta talk about internal state (turns/affinity/etc).",
    "Follow allowed_speakers and choice_spec.",
    "Do not decide a branch; the parent decides based on router hints.",
];

/// The declared output shape, sent so the generator knows what to return.
pub fn output_schema() -> Value {
    serde_json::json!({
        "narration": "str",
        "lines": [{"speaker": "str", "text": "str"}],
        "choices": [{"id": "str", "text": "str", "value?": "str"}],
        "state_patch": "object (subset of GameState)",
        "image_resource_id?": "str"
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSpec {
    pub allowed_speakers: Vec<String>,
    pub beats: BTreeMap<String, String>,
    pub choice_spec: Vec<ChoiceSpec>,
    pub tone_hint: Option<String>,
    pub output_schema: Value,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateView {
    pub current_scene: String,
    pub affinity: BTreeMap<String, u32>,
    pub allies: BTreeMap<String, bool>,
}

/// Everything the generator is told for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorRequest {
    pub system: SystemSpec,
    pub state_view: StateView,
    pub router_hint: Option<RouterHint>,
    pub recent_messages: Vec<RecentMessage>,
    pub rolling_summary: String,
    pub user_msg: String,
}

impl GeneratorRequest {
    pub fn to_json(&self) -> Result<String, GeneratorError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Produces one turn of content. Blocking; any retry policy lives in the
/// implementation, not the engine.
pub trait ContentGenerator {
    fn generate(&self, request: &GeneratorRequest) -> Result<String, GeneratorError>;
}

impl<F> ContentGenerator for F
where
    F: Fn(&GeneratorRequest) -> Result<String, GeneratorError>,
{
    fn generate(&self, request: &GeneratorRequest) -> Result<String, GeneratorError> {
        self(request)
    }
}

const FILLER_LINES: [&str; 4] = [
    "결정을 내려야 해. 어떻게 할래?",
    "시간이 없어. 서두르자.",
    "다들 지켜보고 있어. 네 선택을 믿을게.",
    "숨을 고르고, 다시 생각해 보자.",
];

/// Offline stand-in: echoes the scene's choice spec, speaks as the first
/// allowed speaker, and suggests only `{turn: {inc: 1}}`.
///
/// Deterministic for a given seed and request.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    seed: u64,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MockGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn rng_for(&self, request: &GeneratorRequest) -> StdRng {
        let salt = request
            .user_msg
            .bytes()
            .fold(request.recent_messages.len() as u64, |acc, b| {
                acc.wrapping_mul(31).wrapping_add(u64::from(b))
            });
        StdRng::seed_from_u64(self.seed.wrapping_add(salt))
    }
}

impl ContentGenerator for MockGenerator {
    fn generate(&self, request: &GeneratorRequest) -> Result<String, GeneratorError> {
        let mut rng = self.rng_for(request);
        let system = &request.system;

        let speaker = system
            .allowed_speakers
            .iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("tanjiro");
        let text = FILLER_LINES.choose(&mut rng).copied().unwrap_or_default();
        let narration = system
            .beats
            .get("intro")
            .map(String::as_str)
            .unwrap_or("상황이 긴박하다.");

        let choices: Vec<Value> = system
            .choice_spec
            .iter()
            .map(|c| serde_json::json!({"id": c.id, "text": c.text, "value": c.value}))
            .collect();

        let response = serde_json::json!({
            "narration": narration,
            "lines": [{"speaker": speaker, "text": text}],
            "choices": choices,
            "state_patch": {"turn": {"inc": 1}},
        });
        Ok(response.to_string())
    }
}
