//! Content validation: checks a generated payload against the scene's
//! speaker, choice, and resource constraints. Text content is opaque.

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::schema::payload::GeneratedPayload;
use crate::schema::scene::SceneDefinition;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("speaker not allowed in this scene: {0}")]
    SpeakerNotAllowed(String),
    #[error("invalid choice id: {0}")]
    InvalidChoiceId(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
}

/// Answers whether a resource id exists.
pub trait ResourceOracle {
    fn has(&self, resource_id: &str) -> bool;
}

/// Validates payloads for one scene.
pub struct ContentValidator<'a> {
    scene: &'a SceneDefinition,
    allowed_speakers: FxHashSet<&'a str>,
    resources: Option<&'a dyn ResourceOracle>,
}

impl<'a> ContentValidator<'a> {
    /// `allowed_speakers` is the resolved list from the speaker policy.
    pub fn new(scene: &'a SceneDefinition, allowed_speakers: &'a [String]) -> Self {
        Self {
            scene,
            allowed_speakers: allowed_speakers.iter().map(String::as_str).collect(),
            resources: None,
        }
    }

    pub fn with_resources(mut self, resources: &'a dyn ResourceOracle) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Pass `payload` through unchanged if it is permitted.
    ///
    /// Speaker checks are skipped when the resolved speaker list is empty,
    /// choice checks when the scene declares no choices, and resource checks
    /// when no oracle is attached or the payload names no resource.
    pub fn validate(&self, payload: GeneratedPayload) -> Result<GeneratedPayload, ValidationError> {
        if !self.allowed_speakers.is_empty() {
            if let Some(line) = payload
                .lines
                .iter()
                .find(|l| !self.allowed_speakers.contains(l.speaker.as_str()))
            {
                return Err(ValidationError::SpeakerNotAllowed(line.speaker.clone()));
            }
        }

        if !self.scene.choices.is_empty() {
            if let Some(choice) = payload
                .choices
                .iter()
                .find(|c| !self.scene.has_choice_id(&c.id))
            {
                return Err(ValidationError::InvalidChoiceId(choice.id.clone()));
            }
        }

        if let (Some(oracle), Some(resource_id)) = (self.resources, payload.resource_id()) {
            if !oracle.has(resource_id) {
                return Err(ValidationError::ResourceNotFound(resource_id.to_string()));
            }
        }

        Ok(payload)
    }
}
