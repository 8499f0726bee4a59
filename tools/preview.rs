/// Preview: interactive shell for playing through a story data set.
///
/// Usage: preview [--data <dir>] [--scene <id>] [--seed <n>] [--verbose]
///
/// Commands:
///   say <text>                 take a turn with free text
///   hint <value> <conf> [text] take a turn with a router hint
///   patch <json>               apply a raw state patch
///   finish                     judge the mission from the current state
///   state                      print the current state as JSON
///   request                    print the generator request for this turn
///   reset [scene]              start over
///   help                       list commands
///   quit                       exit
use std::io::{self, BufRead, Write};
use std::path::Path;
use story_engine::core::generator::MockGenerator;
use story_engine::core::pipeline::{StepOutcome, StoryEngine};
use story_engine::schema::envelope::{ContextEnvelope, RecentMessage};
use story_engine::schema::state::GameState;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut data_dir = "story_data/scene5".to_string();
    let mut start_scene = None;
    let mut seed: u64 = 42;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return;
            }
            "--data" if i + 1 < args.len() => {
                i += 1;
                data_dir = args[i].clone();
            }
            "--scene" if i + 1 < args.len() => {
                i += 1;
                start_scene = Some(args[i].clone());
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().unwrap_or(42);
            }
            "--verbose" | "-v" => verbose = true,
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let engine = match build_engine(&data_dir, seed) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let first_scene = start_scene.unwrap_or_else(|| engine.rules().default_scene.clone());
    println!("Loaded {} scenes from {}", engine.scenes().len(), data_dir);
    println!("Seed: {}", seed);
    println!("Type 'help' for commands.\n");

    let mut state = GameState::starting_at(&first_scene);
    let mut history: Vec<RecentMessage> = Vec::new();
    print_scene(&engine, &state);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match cmd.to_lowercase().as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "say" => {
                let envelope = envelope_for(&state, &history, rest);
                take_turn(&engine, &mut state, &mut history, &envelope);
            }
            "hint" => {
                let mut parts = rest.splitn(3, ' ');
                let (Some(value), Some(conf)) = (parts.next(), parts.next()) else {
                    println!("Usage: hint <value> <confidence> [text]");
                    continue;
                };
                let Ok(confidence) = conf.parse::<f64>() else {
                    println!("Invalid confidence: {}", conf);
                    continue;
                };
                let text = parts.next().unwrap_or("");
                let envelope = envelope_for(&state, &history, text).hint(value, confidence);
                take_turn(&engine, &mut state, &mut history, &envelope);
            }
            "patch" => {
                let doc: serde_json::Value = match serde_json::from_str(rest) {
                    Ok(doc) => doc,
                    Err(e) => {
                        println!("Invalid JSON: {}", e);
                        continue;
                    }
                };
                match engine.patches().apply_value(&state, &doc) {
                    Ok(next) => {
                        state = next;
                        println!("Patched. Flags: {:?}", state.flags);
                    }
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "finish" => {
                let next = engine.evaluate_mission_end(&state);
                if next == state {
                    println!("Not in the mission scene; nothing to judge.");
                } else {
                    state = next;
                    print_ending(&state);
                    print_scene(&engine, &state);
                }
            }
            "state" => match serde_json::to_string_pretty(&state) {
                Ok(json) => println!("{}", json),
                Err(e) => println!("ERROR: {}", e),
            },
            "request" => {
                let envelope = envelope_for(&state, &history, rest);
                match engine
                    .build_request(&state, &envelope)
                    .map_err(|e| e.to_string())
                    .and_then(|r| serde_json::to_string_pretty(&r).map_err(|e| e.to_string()))
                {
                    Ok(json) => println!("{}", json),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "reset" => {
                let scene = if rest.is_empty() {
                    first_scene.as_str()
                } else {
                    rest
                };
                state = GameState::starting_at(scene);
                history.clear();
                print_scene(&engine, &state);
            }
            other => {
                println!(
                    "Unknown command: '{}'. Type 'help' for available commands.",
                    other
                );
            }
        }
    }
}

fn print_usage() {
    println!("Preview: interactive shell for playing through a story data set.");
    println!();
    println!("Usage: preview [--data <dir>] [--scene <id>] [--seed <n>] [--verbose]");
    println!();
    println!("  --data <dir>   Directory with scenes.ron, characters.ron, resources.ron, rules.ron");
    println!("                 (default: story_data/scene5)");
    println!("  --scene <id>   Starting scene (default: the rules' default scene)");
    println!("  --seed <n>     Mock generator seed (default: 42)");
    println!("  --verbose      Log engine decisions to stderr");
}

fn print_help() {
    println!("Commands:");
    println!("  say <text>                  Take a turn with free text");
    println!("  hint <value> <conf> [text]  Take a turn with a router choice hint");
    println!("  patch <json>                Apply a raw state patch");
    println!("  finish                      Judge the mission from the current state");
    println!("  state                       Print the current state as JSON");
    println!("  request [text]              Print the generator request for this turn");
    println!("  reset [scene]               Start over");
    println!("  help                        Show this help");
    println!("  quit                        Exit");
}

fn build_engine(dir: &str, seed: u64) -> Result<StoryEngine, String> {
    let dir = Path::new(dir);
    if !dir.is_dir() {
        return Err(format!("Data directory not found: {}", dir.display()));
    }
    let file = |name: &str| dir.join(name).to_string_lossy().to_string();

    let mut builder = StoryEngine::builder()
        .scenes_path(&file("scenes.ron"))
        .generator(MockGenerator::new(seed));
    // Everything but the scenes is optional.
    if dir.join("characters.ron").is_file() {
        builder = builder.characters_path(&file("characters.ron"));
    }
    if dir.join("resources.ron").is_file() {
        builder = builder.resources_path(&file("resources.ron"));
    }
    if dir.join("rules.ron").is_file() {
        builder = builder.rules_path(&file("rules.ron"));
    }
    builder.build().map_err(|e| e.to_string())
}

fn envelope_for(state: &GameState, history: &[RecentMessage], text: &str) -> ContextEnvelope {
    let mut envelope = ContextEnvelope::with_message(text);
    envelope.session_id = state.session_id.clone();
    envelope.turn = state.turn;
    envelope.recent_messages = history.iter().rev().take(6).rev().cloned().collect();
    envelope
}

fn take_turn(
    engine: &StoryEngine,
    state: &mut GameState,
    history: &mut Vec<RecentMessage>,
    envelope: &ContextEnvelope,
) {
    match engine.step(state, envelope) {
        Ok(StepOutcome {
            state: next,
            render,
            choice,
        }) => {
            let scene_changed = next.current_scene() != state.current_scene();
            *state = next;

            println!("\n--- Turn {} ---", state.turn);
            println!("{}", render.narration);
            for line in &render.lines {
                println!("  {}: {}", line.speaker, line.text);
                history.push(RecentMessage {
                    role: line.speaker.clone(),
                    content: line.text.clone(),
                });
            }
            history.push(RecentMessage {
                role: "user".to_string(),
                content: envelope.effective_user_msg().to_string(),
            });
            if let Some(image) = render.image {
                println!("  [image: {}]", image);
            }
            match choice {
                Some(c) => println!("[Choice] {} (via {:?})", c.value, c.source),
                None => println!("[Choice] none"),
            }
            println!("--- End ---\n");

            if state.is_finished() {
                print_ending(state);
            }
            if scene_changed {
                print_scene(engine, state);
            }
        }
        Err(e) => println!("ERROR: {}", e),
    }
}

fn print_scene(engine: &StoryEngine, state: &GameState) {
    let scene_id = engine.current_scene_id(state);
    let Some(scene) = engine.scenes().get(scene_id) else {
        println!("[Scene] {} (not in catalog)", scene_id);
        return;
    };
    println!("[Scene] {}: {}", scene.id, scene.summary);
    for choice in &scene.choices {
        println!("  ({}) {}  -> {}", choice.id, choice.text, choice.value);
    }
}

fn print_ending(state: &GameState) {
    println!(
        "[Ending] {} ({})",
        state.ending.as_deref().unwrap_or("-"),
        state.end_reason.as_deref().unwrap_or("-")
    );
}
