use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line of dialogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Line {
    pub speaker: String,
    pub text: String,
}

/// A choice as echoed back by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadChoice {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// The generator's per-turn output. Untrusted; any field outside this shape
/// is a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratedPayload {
    pub narration: String,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub choices: Vec<PayloadChoice>,
    /// Raw patch suggestion; interpreted by the patch engine after validation.
    pub state_patch: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_resource_id: Option<String>,
}

impl GeneratedPayload {
    /// Parse a raw generator response.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The resource id, treating an empty string as absent.
    pub fn resource_id(&self) -> Option<&str> {
        self.image_resource_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// What the caller shows the player for a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPayload {
    pub narration: String,
    pub lines: Vec<Line>,
    pub choices: Vec<PayloadChoice>,
    pub image: Option<String>,
}

impl From<GeneratedPayload> for RenderPayload {
    fn from(payload: GeneratedPayload) -> Self {
        let image = payload.resource_id().map(str::to_string);
        Self {
            narration: payload.narration,
            lines: payload.lines,
            choices: payload.choices,
            image,
        }
    }
}
