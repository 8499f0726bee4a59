//! The turn pipeline: (state, envelope) → (state', render).
//!
//! Wires together the speaker policy, generator request, payload validation,
//! choice resolution, branch resolution, and patch application.

use std::path::Path;
use thiserror::Error;

use crate::core::branch::BranchEngine;
use crate::core::catalog::{CatalogError, CharacterCatalog, ResourceSet, SceneCatalog};
use crate::core::choice::{ChoiceResolver, ResolvedChoice};
use crate::core::generator::{
    output_schema, ContentGenerator, GeneratorError, GeneratorRequest, StateView, SystemSpec,
    GENERATOR_RULES,
};
use crate::core::patch::{Clock, Patch, PatchEngine, PatchError};
use crate::core::rules::{RulesError, StoryRules};
use crate::core::speaker::resolve_allowed_speakers;
use crate::core::validator::{ContentValidator, ValidationError};
use crate::schema::envelope::ContextEnvelope;
use crate::schema::payload::{GeneratedPayload, RenderPayload};
use crate::schema::scene::SceneDefinition;
use crate::schema::state::GameState;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed generator output: {0}")]
    MalformedGeneratorOutput(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("rules error: {0}")]
    Rules(#[from] RulesError),
    #[error("unknown scene: {0}")]
    UnknownScene(String),
    #[error("no generator configured")]
    NoGenerator,
}

impl EngineError {
    /// The failure class name, for callers that report by category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedGeneratorOutput(_) => "MalformedGeneratorOutput",
            Self::Validation(ValidationError::SpeakerNotAllowed(_)) => "SpeakerNotAllowed",
            Self::Validation(ValidationError::InvalidChoiceId(_)) => "InvalidChoiceId",
            Self::Validation(ValidationError::ResourceNotFound(_)) => "ResourceNotFound",
            Self::Patch(PatchError::MalformedPatch { .. }) => "MalformedPatch",
            Self::Generator(_) => "GeneratorFailed",
            Self::Catalog(_) | Self::Rules(_) => "DataLoadFailed",
            Self::UnknownScene(_) => "UnknownScene",
            Self::NoGenerator => "NoGenerator",
        }
    }
}

/// The result of one successful turn.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub state: GameState,
    pub render: RenderPayload,
    /// The effective choice, if any was resolved.
    pub choice: Option<ResolvedChoice>,
}

/// The top-level engine. Built via `StoryEngine::builder()`.
///
/// Holds only read-only data; `step` takes `&self` and never mutates the
/// caller's state, so sessions can run in parallel on one engine.
pub struct StoryEngine {
    scenes: SceneCatalog,
    characters: CharacterCatalog,
    resources: Option<ResourceSet>,
    rules: StoryRules,
    patches: PatchEngine,
    generator: Box<dyn ContentGenerator + Send + Sync>,
}

/// Builder for constructing a `StoryEngine`.
pub struct StoryEngineBuilder {
    scenes_path: Option<String>,
    characters_path: Option<String>,
    resources_path: Option<String>,
    rules_path: Option<String>,
    /// Directly provided data (for testing without files).
    scenes: Option<SceneCatalog>,
    characters: Option<CharacterCatalog>,
    resources: Option<ResourceSet>,
    rules: Option<StoryRules>,
    generator: Option<Box<dyn ContentGenerator + Send + Sync>>,
    clock: Option<Clock>,
}

impl StoryEngine {
    pub fn builder() -> StoryEngineBuilder {
        StoryEngineBuilder {
            scenes_path: None,
            characters_path: None,
            resources_path: None,
            rules_path: None,
            scenes: None,
            characters: None,
            resources: None,
            rules: None,
            generator: None,
            clock: None,
        }
    }

    pub fn scenes(&self) -> &SceneCatalog {
        &self.scenes
    }

    pub fn rules(&self) -> &StoryRules {
        &self.rules
    }

    pub fn patches(&self) -> &PatchEngine {
        &self.patches
    }

    /// The scene id the state is in, falling back to the configured default.
    pub fn current_scene_id<'s>(&'s self, state: &'s GameState) -> &'s str {
        state
            .current_scene()
            .unwrap_or(self.rules.default_scene.as_str())
    }

    fn scene_for(&self, state: &GameState) -> Result<&SceneDefinition, EngineError> {
        let scene_id = self.current_scene_id(state);
        self.scenes
            .get(scene_id)
            .ok_or_else(|| EngineError::UnknownScene(scene_id.to_string()))
    }

    /// Build the generator request for this turn.
    pub fn build_request(
        &self,
        state: &GameState,
        envelope: &ContextEnvelope,
    ) -> Result<GeneratorRequest, EngineError> {
        let scene = self.scene_for(state)?;
        let allowed_speakers = resolve_allowed_speakers(scene, &state.flag_set());
        Ok(self.request_for(scene, &allowed_speakers, state, envelope))
    }

    fn request_for(
        &self,
        scene: &SceneDefinition,
        allowed_speakers: &[String],
        state: &GameState,
        envelope: &ContextEnvelope,
    ) -> GeneratorRequest {
        let tone_character = self.rules.tone_character.as_str();
        let affinity = state
            .affinity
            .get(tone_character)
            .copied()
            .unwrap_or(self.rules.default_affinity);

        GeneratorRequest {
            system: SystemSpec {
                allowed_speakers: allowed_speakers.to_vec(),
                beats: scene.beats.clone(),
                choice_spec: scene.choices.clone(),
                tone_hint: self
                    .characters
                    .tone_hint(tone_character, affinity)
                    .map(str::to_string),
                output_schema: output_schema(),
                rules: GENERATOR_RULES.iter().map(|r| r.to_string()).collect(),
            },
            state_view: StateView {
                current_scene: scene.id.clone(),
                affinity: state.affinity.clone(),
                allies: state.allies.clone(),
            },
            router_hint: envelope.router_choice_hint.clone(),
            recent_messages: envelope.recent_messages.clone(),
            rolling_summary: envelope.rolling_summary.clone(),
            user_msg: envelope.effective_user_msg().to_string(),
        }
    }

    /// Process one turn.
    ///
    /// Fails without touching `state` if the generator output is malformed,
    /// violates the scene's constraints, or carries an uninterpretable patch.
    pub fn step(
        &self,
        state: &GameState,
        envelope: &ContextEnvelope,
    ) -> Result<StepOutcome, EngineError> {
        let user_msg = envelope.effective_user_msg();
        let scene = self.scene_for(state)?;
        let flags = state.flag_set();

        let allowed_speakers = resolve_allowed_speakers(scene, &flags);
        tracing::debug!(scene = %scene.id, speakers = ?allowed_speakers, "resolved speakers");

        let request = self.request_for(scene, &allowed_speakers, state, envelope);
        let raw = self.generator.generate(&request)?;

        let payload = GeneratedPayload::from_json(&raw).map_err(|e| {
            tracing::warn!(error = %e, "generator output does not match schema");
            EngineError::MalformedGeneratorOutput(e.to_string())
        })?;

        let mut validator = ContentValidator::new(scene, &allowed_speakers);
        if let Some(ref resources) = self.resources {
            validator = validator.with_resources(resources);
        }
        let payload = validator.validate(payload).map_err(|e| {
            tracing::warn!(error = %e, scene = %scene.id, "payload rejected");
            e
        })?;

        // Parse before resolving anything so a bad patch fails the whole turn.
        let mut patch = Patch::from_map(&payload.state_patch)?;

        let resolver = ChoiceResolver::new(self.rules.hint_confidence_threshold);
        let choice = resolver.resolve(scene, user_msg, envelope.router_choice_hint.as_ref());
        tracing::debug!(choice = ?choice, "effective choice");

        let branches = BranchEngine::new(&self.rules);
        if let Some(ref resolved) = choice {
            match branches.resolve_branch(scene, &flags, &resolved.value) {
                Some(target) => {
                    tracing::info!(from = %scene.id, to = %target.goto, choice = %resolved.value, "branch");
                    patch.merge(target.into_patch(&resolved.value));
                }
                None => tracing::debug!(choice = %resolved.value, "no branch rule matched"),
            }
        }

        let mut base = state.clone();
        base.last_user_msg = user_msg.to_string();
        let mut next = self.patches.apply(&base, &patch);

        let finishing = match (&choice, &self.rules.finish_choice) {
            (Some(resolved), Some(finish)) => resolved.value == *finish,
            _ => false,
        };
        if finishing {
            next = branches.evaluate_mission_end(&next, &self.patches);
        }

        Ok(StepOutcome {
            state: next,
            render: RenderPayload::from(payload),
            choice,
        })
    }

    /// Judge the mission from `state`; a no-op outside the mission scene.
    pub fn evaluate_mission_end(&self, state: &GameState) -> GameState {
        BranchEngine::new(&self.rules).evaluate_mission_end(state, &self.patches)
    }
}

impl StoryEngineBuilder {
    pub fn scenes_path(mut self, path: &str) -> Self {
        self.scenes_path = Some(path.to_string());
        self
    }

    pub fn characters_path(mut self, path: &str) -> Self {
        self.characters_path = Some(path.to_string());
        self
    }

    pub fn resources_path(mut self, path: &str) -> Self {
        self.resources_path = Some(path.to_string());
        self
    }

    pub fn rules_path(mut self, path: &str) -> Self {
        self.rules_path = Some(path.to_string());
        self
    }

    /// Provide scenes directly (for testing without files).
    pub fn with_scenes(mut self, scenes: SceneCatalog) -> Self {
        self.scenes = Some(scenes);
        self
    }

    pub fn with_characters(mut self, characters: CharacterCatalog) -> Self {
        self.characters = Some(characters);
        self
    }

    pub fn with_resources(mut self, resources: ResourceSet) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_rules(mut self, rules: StoryRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn generator(mut self, generator: impl ContentGenerator + Send + Sync + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    /// Override the `updated_at` clock.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Load everything once. Files override directly provided data.
    pub fn build(self) -> Result<StoryEngine, EngineError> {
        let generator = self.generator.ok_or(EngineError::NoGenerator)?;

        let scenes = match self.scenes_path {
            Some(ref path) => SceneCatalog::load(Path::new(path))?,
            None => self.scenes.unwrap_or_default(),
        };
        let characters = match self.characters_path {
            Some(ref path) => CharacterCatalog::load_from_ron(Path::new(path))?,
            None => self.characters.unwrap_or_default(),
        };
        let resources = match self.resources_path {
            Some(ref path) => Some(ResourceSet::load_from_ron(Path::new(path))?),
            None => self.resources,
        };
        let rules = match self.rules_path {
            Some(ref path) => StoryRules::load_from_ron(Path::new(path))?,
            None => self.rules.unwrap_or_default(),
        };

        let mut patches = PatchEngine::new(rules.limits);
        if let Some(clock) = self.clock {
            patches = patches.with_clock(clock);
        }

        tracing::debug!(
            scenes = scenes.len(),
            resources = resources.as_ref().map_or(0, ResourceSet::len),
            "story engine built"
        );

        Ok(StoryEngine {
            scenes,
            characters,
            resources,
            rules,
            patches,
            generator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::choice::ChoiceSource;
    use crate::core::generator::MockGenerator;
    use crate::schema::scene::{BranchRule, ChoiceSpec};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn fork_catalog() -> SceneCatalog {
        SceneCatalog::from_scenes([
            SceneDefinition {
                id: "scene5_fork".to_string(),
                allowed_speakers: vec!["tanjiro".to_string()],
                choices: vec![
                    ChoiceSpec {
                        id: "c".to_string(),
                        text: "돌진".to_string(),
                        value: "rush".to_string(),
                        aliases: vec![],
                    },
                    ChoiceSpec {
                        id: "d".to_string(),
                        text: "동료 규합".to_string(),
                        value: "gather_allies".to_string(),
                        aliases: vec![],
                    },
                ],
                branch_rules: vec![
                    BranchRule {
                        when: "rush".to_string(),
                        goto: "scene5_end_original".to_string(),
                        require_flags: vec![],
                        forbid_flags: vec![],
                        set: None,
                    },
                    BranchRule {
                        when: "gather_allies".to_string(),
                        goto: "scene5_mission_gather".to_string(),
                        require_flags: vec![],
                        forbid_flags: vec![],
                        set: None,
                    },
                ],
                ..SceneDefinition::default()
            },
            SceneDefinition {
                id: "scene5_mission_gather".to_string(),
                ..SceneDefinition::default()
            },
        ])
    }

    fn engine_with(generator: impl ContentGenerator + Send + Sync + 'static) -> StoryEngine {
        StoryEngine::builder()
            .with_scenes(fork_catalog())
            .generator(generator)
            .clock(fixed_clock)
            .build()
            .unwrap()
    }

    fn canned(raw: &'static str) -> impl ContentGenerator + Send + Sync + 'static {
        move |_: &GeneratorRequest| Ok::<_, GeneratorError>(raw.to_string())
    }

    #[test]
    fn builder_requires_generator() {
        assert!(matches!(
            StoryEngine::builder().build(),
            Err(EngineError::NoGenerator)
        ));
    }

    #[test]
    fn step_resolves_alias_and_branches() {
        let engine = engine_with(MockGenerator::new(1));
        let state = GameState::starting_at("scene5_fork");
        let outcome = engine
            .step(&state, &ContextEnvelope::with_message("동료 규합"))
            .unwrap();

        let choice = outcome.choice.unwrap();
        assert_eq!(choice.value, "gather_allies");
        assert_eq!(choice.source, ChoiceSource::Alias);
        assert_eq!(outcome.state.current_scene(), Some("scene5_mission_gather"));
        assert_eq!(outcome.state.user_choice.as_deref(), Some("gather_allies"));
        assert_eq!(outcome.state.last_user_msg, "동료 규합");
        assert_eq!(outcome.state.turn, 1);
        assert_eq!(outcome.state.updated_at, Some(fixed_clock()));
        assert_eq!(outcome.render.lines[0].speaker, "tanjiro");
        // Caller's state is untouched.
        assert_eq!(state.turn, 0);
    }

    #[test]
    fn step_without_choice_stays_in_scene() {
        let engine = engine_with(MockGenerator::new(1));
        let state = GameState::starting_at("scene5_fork");
        let outcome = engine
            .step(&state, &ContextEnvelope::with_message("음..."))
            .unwrap();
        assert!(outcome.choice.is_none());
        assert_eq!(outcome.state.current_scene(), Some("scene5_fork"));
        assert_eq!(outcome.state.user_choice, None);
    }

    #[test]
    fn branch_patch_wins_over_generator_patch() {
        let engine = engine_with(canned(
            r#"{"narration": "n", "state_patch": {"scene": {"current_scene": "scene5_end_hidden"}, "user_choice": "rush"}}"#,
        ));
        let outcome = engine
            .step(
                &GameState::starting_at("scene5_fork"),
                &ContextEnvelope::with_message("").hint("gather_allies", 0.8),
            )
            .unwrap();
        assert_eq!(outcome.state.current_scene(), Some("scene5_mission_gather"));
        assert_eq!(outcome.state.user_choice.as_deref(), Some("gather_allies"));
    }

    #[test]
    fn malformed_output_is_reported() {
        let engine = engine_with(canned("not json"));
        let err = engine
            .step(&GameState::starting_at("scene5_fork"), &ContextEnvelope::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedGeneratorOutput(_)));
        assert_eq!(err.kind(), "MalformedGeneratorOutput");
    }

    #[test]
    fn extra_field_is_malformed_output() {
        let engine = engine_with(canned(
            r#"{"narration": "n", "state_patch": {}, "branch": "scene5_end_hidden"}"#,
        ));
        let err = engine
            .step(&GameState::starting_at("scene5_fork"), &ContextEnvelope::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedGeneratorOutput(_)));
    }

    #[test]
    fn validation_failure_carries_offending_value() {
        let engine = engine_with(canned(
            r#"{"narration": "n", "lines": [{"speaker": "akaza", "text": "..."}], "state_patch": {}}"#,
        ));
        let err = engine
            .step(&GameState::starting_at("scene5_fork"), &ContextEnvelope::default())
            .unwrap_err();
        assert_eq!(err.kind(), "SpeakerNotAllowed");
        match err {
            EngineError::Validation(ValidationError::SpeakerNotAllowed(speaker)) => {
                assert_eq!(speaker, "akaza")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_patch_fails_turn() {
        let engine = engine_with(canned(r#"{"narration": "n", "state_patch": {"scene": "x"}}"#));
        let err = engine
            .step(&GameState::starting_at("scene5_fork"), &ContextEnvelope::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Patch(PatchError::MalformedPatch { .. })));
    }

    #[test]
    fn null_ending_fields_in_generator_patch() {
        let engine = engine_with(canned(
            r#"{"narration": "n", "state_patch": {"ending": null, "end_reason": null, "turn": {"inc": 1}}}"#,
        ));
        let outcome = engine
            .step(&GameState::starting_at("scene5_fork"), &ContextEnvelope::default())
            .unwrap();
        assert_eq!(outcome.state.turn, 1);
        assert_eq!(outcome.state.ending, None);
        assert_eq!(outcome.state.end_reason, None);
    }

    #[test]
    fn unknown_scene_is_an_error() {
        let engine = engine_with(MockGenerator::default());
        let err = engine
            .step(&GameState::starting_at("nowhere"), &ContextEnvelope::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownScene(id) if id == "nowhere"));
    }

    #[test]
    fn missing_scene_falls_back_to_default() {
        let engine = engine_with(MockGenerator::default());
        let request = engine
            .build_request(&GameState::default(), &ContextEnvelope::default())
            .unwrap();
        assert_eq!(request.state_view.current_scene, "scene5_fork");
        assert_eq!(request.system.allowed_speakers, vec!["tanjiro"]);
    }

    #[test]
    fn generator_sees_sanitized_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let engine = engine_with(move |request: &GeneratorRequest| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.user_msg, "clean");
            Ok::<_, GeneratorError>(r#"{"narration": "n", "state_patch": {}}"#.to_string())
        });
        let mut envelope = ContextEnvelope::with_message("dirty");
        envelope.guardrail = Some(crate::schema::envelope::GuardrailVerdict {
            allowed: true,
            sanitized_user_msg: Some("clean".to_string()),
            reason: None,
        });
        let outcome = engine
            .step(&GameState::starting_at("scene5_fork"), &envelope)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.state.last_user_msg, "clean");
    }
}
