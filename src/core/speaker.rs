//! Speaker policy: which characters may speak in a scene right now.

use rustc_hash::FxHashSet;

use crate::schema::scene::{guard_holds, SceneDefinition};

/// Resolve the allowed speakers for `scene` under `flags`.
///
/// Override rules are scanned in declaration order; the first whose flag
/// guard holds and which carries an override list replaces the base list
/// outright. Otherwise the base list is returned. Either way the result is
/// de-duplicated, keeping first occurrence.
///
/// An empty result means "no restriction": the validator skips speaker
/// checks entirely for such scenes.
pub fn resolve_allowed_speakers(scene: &SceneDefinition, flags: &FxHashSet<String>) -> Vec<String> {
    for rule in &scene.speaker_rules {
        let Some(ref speakers) = rule.r#override else {
            continue;
        };
        if guard_holds(&rule.require_flags, &rule.forbid_flags, flags) {
            return dedup(speakers);
        }
    }
    dedup(&scene.allowed_speakers)
}

fn dedup(speakers: &[String]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    speakers
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}
