/// Mission walkthrough: plays scene 5 twice with the offline mock generator.
///
/// The first run recruits Inosuke then Zenitsu within budget and reaches the
/// hidden ending. The second recruits them the other way round and falls back
/// to the original ending.
///
/// Run with: cargo run --example mission_walkthrough
use story_engine::core::generator::MockGenerator;
use story_engine::core::pipeline::StoryEngine;
use story_engine::schema::envelope::ContextEnvelope;
use story_engine::schema::state::GameState;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let engine = StoryEngine::builder()
        .scenes_path("story_data/scene5/scenes.ron")
        .characters_path("story_data/scene5/characters.ron")
        .resources_path("story_data/scene5/resources.ron")
        .rules_path("story_data/scene5/rules.ron")
        .generator(MockGenerator::new(7))
        .build()
        .expect("Failed to load scene 5 story data");

    println!("========================================");
    println!("   RUN 1: Inosuke, then Zenitsu");
    println!("========================================\n");
    play(
        &engine,
        &[
            ("동료 규합", None),
            ("이노스케 설득", None),
            ("", Some(("try_zenitsu", 0.92))),
            ("이제 끝내자", None),
        ],
    );

    println!("========================================");
    println!("   RUN 2: Zenitsu, then Inosuke");
    println!("========================================\n");
    play(
        &engine,
        &[
            ("gather", None),
            ("젠이츠", None),
            ("이노스케", None),
            ("판정", None),
        ],
    );
}

fn play(engine: &StoryEngine, turns: &[(&str, Option<(&str, f64)>)]) {
    let mut state = GameState::starting_at(&engine.rules().default_scene);
    state.session_id = Some("walkthrough".to_string());

    for (message, hint) in turns {
        let mut envelope = ContextEnvelope::with_message(message);
        if let Some((value, confidence)) = hint {
            envelope = envelope.hint(value, *confidence);
        }

        let scene_before = engine.current_scene_id(&state).to_string();
        match engine.step(&state, &envelope) {
            Ok(outcome) => {
                println!("--- {} ---", scene_before);
                println!("> {}", if message.is_empty() { "(router hint)" } else { *message });
                println!("{}", outcome.render.narration);
                for line in &outcome.render.lines {
                    println!("  {}: {}", line.speaker, line.text);
                }
                state = outcome.state;
                println!(
                    "[turn={} total_turns_used={} flags={:?}]\n",
                    state.turn, state.total_turns_used, state.flags
                );
            }
            Err(e) => {
                println!("[Turn error: {}]", e);
                return;
            }
        }
    }

    println!(
        "Ending: {} / {} / scene={}\n",
        state.ending.as_deref().unwrap_or("-"),
        state.end_reason.as_deref().unwrap_or("-"),
        state.current_scene().unwrap_or("-"),
    );
}
