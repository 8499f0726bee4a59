//! Choice resolution: router hint first, alias containment second, else none.

use serde::Serialize;

use crate::schema::envelope::RouterHint;
use crate::schema::scene::SceneDefinition;

/// How the effective choice was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceSource {
    RouterHint,
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedChoice {
    pub value: String,
    pub source: ChoiceSource,
}

#[derive(Debug, Clone, Copy)]
pub struct ChoiceResolver {
    threshold: f64,
}

impl Default for ChoiceResolver {
    fn default() -> Self {
        Self::new(0.75)
    }
}

impl ChoiceResolver {
    /// `threshold` is inclusive.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Determine the single effective choice value for the turn.
    ///
    /// 1. A hint naming a declared choice value with confidence at or above
    ///    the threshold.
    /// 2. The first choice, in declaration order, any of whose case-folded
    ///    aliases (value, text, explicit aliases) is a substring of the
    ///    case-folded user text. No scoring, no longest-match preference.
    /// 3. Otherwise `None`.
    pub fn resolve(
        &self,
        scene: &SceneDefinition,
        user_text: &str,
        hint: Option<&RouterHint>,
    ) -> Option<ResolvedChoice> {
        if let Some(value) = hint.and_then(|h| self.accept_hint(scene, h)) {
            return Some(ResolvedChoice {
                value,
                source: ChoiceSource::RouterHint,
            });
        }

        let text = user_text.trim().to_lowercase();
        scene
            .choices
            .iter()
            .find(|choice| choice.alias_set().iter().any(|alias| text.contains(alias.as_str())))
            .map(|choice| ResolvedChoice {
                value: choice.value.clone(),
                source: ChoiceSource::Alias,
            })
    }

    fn accept_hint(&self, scene: &SceneDefinition, hint: &RouterHint) -> Option<String> {
        let value = hint.value.as_deref()?;
        (scene.has_choice_value(value) && hint.confidence >= self.threshold)
            .then(|| value.to_string())
    }
}
