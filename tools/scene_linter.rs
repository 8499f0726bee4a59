/// Scene Linter: checks a scene catalog for broken links and dead ends.
///
/// Usage: scene_linter <scenes_file_or_dir> [--rules <path>] [--resources <path>]
use rustc_hash::FxHashSet;
use std::path::Path;
use std::process;
use story_engine::core::catalog::{ResourceSet, SceneCatalog};
use story_engine::core::rules::StoryRules;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: scene_linter <scenes_file_or_dir> [--rules <path>] [--resources <path>]");
        process::exit(0);
    }

    let scenes_path = &args[1];
    let mut rules_path = None;
    let mut resources_path = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--rules" if i + 1 < args.len() => {
                i += 1;
                rules_path = Some(args[i].clone());
            }
            "--resources" if i + 1 < args.len() => {
                i += 1;
                resources_path = Some(args[i].clone());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                process::exit(1);
            }
        }
        i += 1;
    }

    let path = Path::new(scenes_path);
    let mut catalog = SceneCatalog::default();
    if path.is_file() {
        match SceneCatalog::load(path) {
            Ok(loaded) => catalog = loaded,
            Err(e) => {
                eprintln!("ERROR: Failed to load scene file: {}", e);
                process::exit(1);
            }
        }
    } else if path.is_dir() {
        load_scenes_recursive(path, &mut catalog);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", scenes_path);
        process::exit(1);
    }

    println!("Loaded {} scenes", catalog.len());

    let rules = match rules_path {
        Some(ref p) => match StoryRules::load_from_ron(Path::new(p)) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("ERROR: Failed to load rules: {}", e);
                process::exit(1);
            }
        },
        None => StoryRules::default(),
    };

    let resources = match resources_path {
        Some(ref p) => match ResourceSet::load_from_ron(Path::new(p)) {
            Ok(r) => Some(r),
            Err(e) => {
                eprintln!("ERROR: Failed to load resources: {}", e);
                process::exit(1);
            }
        },
        None => None,
    };

    let (errors, warnings) = lint_scenes(&catalog, &rules);

    println!("\n=== Scene Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    if let Some(ref resources) = resources {
        println!("\n{} known resources", resources.len());
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn load_scenes_recursive(dir: &Path, catalog: &mut SceneCatalog) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                load_scenes_recursive(&path, catalog);
                continue;
            }
            let ext = path.extension().and_then(|s| s.to_str());
            let is_scene_file = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with("scenes"));
            if !is_scene_file || !matches!(ext, Some("ron") | Some("json")) {
                continue;
            }
            match SceneCatalog::load(&path).and_then(|loaded| catalog.merge(loaded)) {
                Ok(()) => println!("  Loaded: {}", path.display()),
                Err(e) => {
                    eprintln!("  ERROR loading {}: {}", path.display(), e);
                }
            }
        }
    }
}

fn lint_scenes(catalog: &SceneCatalog, rules: &StoryRules) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Designated scenes must exist
    for (role, id) in [
        ("default", &rules.default_scene),
        ("mission", &rules.mission_scene),
        ("hidden ending", &rules.hidden_end_scene),
        ("original ending", &rules.original_end_scene),
    ] {
        if !catalog.contains(id) {
            errors.push(format!("The {} scene '{}' is not defined", role, id));
        }
    }

    if let Some(ref finish) = rules.finish_choice {
        let offered = catalog
            .get(&rules.mission_scene)
            .is_some_and(|s| s.has_choice_value(finish));
        if !offered {
            warnings.push(format!(
                "Mission scene '{}' offers no '{}' choice, so the ending is never judged",
                rules.mission_scene, finish
            ));
        }
    }

    let mut reachable: FxHashSet<&str> = FxHashSet::default();
    reachable.insert(rules.default_scene.as_str());
    reachable.insert(rules.hidden_end_scene.as_str());
    reachable.insert(rules.original_end_scene.as_str());

    for id in catalog.ids() {
        let Some(scene) = catalog.get(id) else {
            continue;
        };

        let mut seen_ids: FxHashSet<&str> = FxHashSet::default();
        for choice in &scene.choices {
            if !seen_ids.insert(choice.id.as_str()) {
                errors.push(format!("Scene '{}' declares choice id '{}' twice", id, choice.id));
            }
            if choice.value.is_empty() {
                errors.push(format!("Scene '{}' choice '{}' has an empty value", id, choice.id));
            }
            if !scene.branch_rules.iter().any(|r| r.when == choice.value) {
                warnings.push(format!(
                    "Scene '{}' choice '{}' has no branch rule (stays in scene)",
                    id, choice.value
                ));
            }
        }

        for rule in &scene.branch_rules {
            if !catalog.contains(&rule.goto) {
                errors.push(format!(
                    "Scene '{}' branches to non-existent scene '{}'",
                    id, rule.goto
                ));
            }
            if !scene.has_choice_value(&rule.when) {
                warnings.push(format!(
                    "Scene '{}' has a branch rule for '{}', which no choice offers",
                    id, rule.when
                ));
            }
            reachable.insert(rule.goto.as_str());
        }

        for (n, rule) in scene.speaker_rules.iter().enumerate() {
            if rule.r#override.is_none() {
                warnings.push(format!(
                    "Scene '{}' speaker rule #{} has no override list and never applies",
                    id, n
                ));
            }
        }

        if scene.allowed_speakers.is_empty() {
            warnings.push(format!(
                "Scene '{}' has no allowed speakers, so any speaker passes validation",
                id
            ));
        }

        if !scene.beats.contains_key("intro") {
            warnings.push(format!("Scene '{}' has no intro beat", id));
        }
    }

    for id in catalog.ids() {
        if !reachable.contains(id) {
            warnings.push(format!("Scene '{}' is not the target of any branch", id));
        }
    }

    (errors, warnings)
}
