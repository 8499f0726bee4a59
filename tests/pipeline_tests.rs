/// Pipeline integration tests: full turns against the scene 5 story data.
use serde_json::json;
use story_engine::core::branch::{ENDING_HIDDEN, ENDING_ORIGINAL, REASON_FAILED, REASON_SUCCESS};
use story_engine::core::choice::ChoiceSource;
use story_engine::core::generator::{GeneratorError, GeneratorRequest, MockGenerator};
use story_engine::core::pipeline::{EngineError, StoryEngine};
use story_engine::core::rules::{FLAG_HIDDEN_ELIGIBLE, FLAG_ORDER_INOSUKE_THEN_ZENITSU};
use story_engine::core::validator::ValidationError;
use story_engine::schema::envelope::ContextEnvelope;
use story_engine::schema::state::GameState;

fn scene5_engine() -> StoryEngine {
    StoryEngine::builder()
        .scenes_path("story_data/scene5/scenes.ron")
        .characters_path("story_data/scene5/characters.ron")
        .resources_path("story_data/scene5/resources.ron")
        .rules_path("story_data/scene5/rules.ron")
        .generator(MockGenerator::new(42))
        .build()
        .unwrap()
}

fn say(engine: &StoryEngine, state: &GameState, message: &str) -> GameState {
    engine
        .step(state, &ContextEnvelope::with_message(message))
        .unwrap()
        .state
}

#[test]
fn gather_allies_by_alias_enters_mission() {
    let engine = scene5_engine();
    let state = GameState::starting_at("scene5_fork");

    let outcome = engine
        .step(&state, &ContextEnvelope::with_message("동료 규합"))
        .unwrap();

    assert_eq!(outcome.state.current_scene(), Some("scene5_mission_gather"));
    assert_eq!(outcome.state.user_choice.as_deref(), Some("gather_allies"));
    assert_eq!(outcome.choice.unwrap().source, ChoiceSource::Alias);
    assert_eq!(outcome.render.narration, "탄지로: 넌 어떻게 할래?");
    assert_eq!(outcome.render.choices.len(), 2);
    assert!(outcome.state.updated_at.is_some());
}

#[test]
fn confident_hint_beats_text() {
    let engine = scene5_engine();
    let envelope = ContextEnvelope::with_message("돌진").hint("gather_allies", 0.9);
    let outcome = engine
        .step(&GameState::starting_at("scene5_fork"), &envelope)
        .unwrap();
    let choice = outcome.choice.unwrap();
    assert_eq!(choice.value, "gather_allies");
    assert_eq!(choice.source, ChoiceSource::RouterHint);
}

#[test]
fn weak_hint_falls_back_to_text() {
    let engine = scene5_engine();
    let envelope = ContextEnvelope::with_message("돌진").hint("gather_allies", 0.74);
    let outcome = engine
        .step(&GameState::starting_at("scene5_fork"), &envelope)
        .unwrap();
    assert_eq!(outcome.state.current_scene(), Some("scene5_end_original"));
}

#[test]
fn hidden_ending_walkthrough() {
    let engine = scene5_engine();
    let mut state = GameState::starting_at("scene5_fork");

    state = say(&engine, &state, "동료 규합");
    state = say(&engine, &state, "이노스케 설득");
    assert!(state.is_ally("inosuke"));
    state = say(&engine, &state, "젠이츠");
    assert!(state.has_flag(FLAG_HIDDEN_ELIGIBLE));

    // Allies now speak in the mission scene.
    let request = engine
        .build_request(&state, &ContextEnvelope::default())
        .unwrap();
    assert_eq!(
        request.system.allowed_speakers,
        vec!["tanjiro", "inosuke", "zenitsu"]
    );

    state = say(&engine, &state, "이제 끝내자");
    assert_eq!(state.current_scene(), Some("scene5_end_hidden"));
    assert_eq!(state.ending.as_deref(), Some(ENDING_HIDDEN));
    assert_eq!(state.end_reason.as_deref(), Some(REASON_SUCCESS));
    assert_eq!(state.scene_history, vec!["scene5_mission_gather"]);
    assert_eq!(state.turn, 4);
    assert_eq!(state.total_turns_used, 2);
    assert!(state.is_finished());
}

#[test]
fn wrong_order_gets_original_ending() {
    let engine = scene5_engine();
    let mut state = GameState::starting_at("scene5_mission_gather");
    state = say(&engine, &state, "젠이츠");
    state = say(&engine, &state, "이노스케");
    state = say(&engine, &state, "finish");

    assert_eq!(state.current_scene(), Some("scene5_end_original"));
    assert_eq!(state.ending.as_deref(), Some(ENDING_ORIGINAL));
    assert_eq!(state.end_reason.as_deref(), Some(REASON_FAILED));
}

#[test]
fn four_inosuke_turns_get_original_ending() {
    let engine = scene5_engine();
    let mut state = GameState::starting_at("scene5_mission_gather");
    for _ in 0..4 {
        state = say(&engine, &state, "이노스케");
    }
    state = say(&engine, &state, "젠이츠");
    assert!(state.has_flag(FLAG_ORDER_INOSUKE_THEN_ZENITSU));
    assert!(!state.has_flag(FLAG_HIDDEN_ELIGIBLE));

    state = say(&engine, &state, "끝");
    assert_eq!(state.current_scene(), Some("scene5_end_original"));
    assert_eq!(state.ending.as_deref(), Some(ENDING_ORIGINAL));
}

#[test]
fn mission_end_outside_mission_scene_is_noop() {
    let engine = scene5_engine();
    let state = GameState::starting_at("scene5_fork");
    assert_eq!(engine.evaluate_mission_end(&state), state);
}

#[test]
fn tone_hint_follows_affinity() {
    let engine = scene5_engine();
    let mut state = GameState::starting_at("scene5_fork");

    let default = engine
        .build_request(&state, &ContextEnvelope::default())
        .unwrap();
    assert_eq!(
        default.system.tone_hint.as_deref(),
        Some("다정하고 성실한 말투. 상대를 격려한다.")
    );

    state.affinity.insert("tanjiro".to_string(), 900);
    let warm = engine
        .build_request(&state, &ContextEnvelope::default())
        .unwrap();
    assert_eq!(
        warm.system.tone_hint.as_deref(),
        Some("깊이 신뢰하는 말투. 속마음을 털어놓는다.")
    );
}

#[test]
fn unknown_resource_is_rejected() {
    let engine = StoryEngine::builder()
        .scenes_path("story_data/scene5/scenes.ron")
        .resources_path("story_data/scene5/resources.ron")
        .generator(|_: &GeneratorRequest| {
            Ok::<_, GeneratorError>(
                json!({
                    "narration": "n",
                    "state_patch": {},
                    "image_resource_id": "missing_cg",
                })
                .to_string(),
            )
        })
        .build()
        .unwrap();

    let err = engine
        .step(&GameState::starting_at("scene5_fork"), &ContextEnvelope::default())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::ResourceNotFound(id)) if id == "missing_cg"
    ));
}

#[test]
fn undeclared_choice_id_is_rejected() {
    let engine = StoryEngine::builder()
        .scenes_path("story_data/scene5/scenes.ron")
        .generator(|_: &GeneratorRequest| {
            Ok::<_, GeneratorError>(
                json!({
                    "narration": "n",
                    "choices": [{"id": "z", "text": "flee"}],
                    "state_patch": {},
                })
                .to_string(),
            )
        })
        .build()
        .unwrap();

    let state = GameState::starting_at("scene5_fork");
    let err = engine.step(&state, &ContextEnvelope::default()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidChoiceId(id)) if id == "z"
    ));
}

#[test]
fn generator_failure_propagates() {
    let engine = StoryEngine::builder()
        .scenes_path("story_data/scene5/scenes.ron")
        .generator(|_: &GeneratorRequest| {
            Err::<String, _>(GeneratorError::Unavailable("timeout".to_string()))
        })
        .build()
        .unwrap();
    let err = engine
        .step(&GameState::starting_at("scene5_fork"), &ContextEnvelope::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::Generator(_)));
}

#[test]
fn missing_data_file_is_a_catalog_error() {
    let result = StoryEngine::builder()
        .scenes_path("story_data/nowhere/scenes.ron")
        .generator(MockGenerator::default())
        .build();
    assert!(matches!(result, Err(EngineError::Catalog(_))));
}
