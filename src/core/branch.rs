//! Branch resolution and mission ending judgement.

use rustc_hash::FxHashSet;

use crate::core::derived;
use crate::core::patch::{HistoryOp, Patch, PatchEngine, PatchOp, Scalar};
use crate::core::rules::StoryRules;
use crate::schema::scene::{guard_holds, SceneDefinition};
use crate::schema::state::GameState;

pub const ROUTE_HIDDEN: &str = "hidden_branch";
pub const ROUTE_ORIGINAL: &str = "original_branch";
pub const ENDING_HIDDEN: &str = "hidden:miracle_coordination";
pub const ENDING_ORIGINAL: &str = "original";
pub const REASON_SUCCESS: &str = "mission_success";
pub const REASON_FAILED: &str = "mission_failed_or_timeout";

/// A selected transition.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchTarget {
    pub goto: String,
    pub set: Option<Patch>,
}

impl BranchTarget {
    /// `{user_choice, scene: {current_scene: goto}}` with the rule's `set`
    /// patch merged over it.
    pub fn into_patch(self, choice_value: &str) -> Patch {
        let mut patch = Patch::goto(&self.goto).with(PatchOp::Overwrite(
            Scalar::UserChoice,
            Some(choice_value.to_string()),
        ));
        if let Some(set) = self.set {
            patch.merge(set);
        }
        patch
    }
}

/// Which ending the mission judgement chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionOutcome {
    Hidden,
    Original,
}

pub struct BranchEngine<'a> {
    rules: &'a StoryRules,
}

impl<'a> BranchEngine<'a> {
    pub fn new(rules: &'a StoryRules) -> Self {
        Self { rules }
    }

    /// The first rule, in declaration order, whose `when` equals the choice
    /// and whose flag guard holds. `None` leaves the scene unchanged.
    pub fn resolve_branch(
        &self,
        scene: &SceneDefinition,
        flags: &FxHashSet<String>,
        choice_value: &str,
    ) -> Option<BranchTarget> {
        scene
            .branch_rules
            .iter()
            .find(|rule| {
                rule.when == choice_value && guard_holds(&rule.require_flags, &rule.forbid_flags, flags)
            })
            .map(|rule| BranchTarget {
                goto: rule.goto.clone(),
                set: rule.set.clone(),
            })
    }

    /// Decide the mission ending from the current state.
    ///
    /// Only meaningful in the mission scene; anywhere else `None` is
    /// returned and the state should be left as is.
    pub fn mission_outcome(&self, state: &GameState) -> Option<MissionOutcome> {
        if state.current_scene() != Some(self.rules.mission_scene.as_str()) {
            return None;
        }
        Some(if derived::is_hidden_eligible(state, &self.rules.limits) {
            MissionOutcome::Hidden
        } else {
            MissionOutcome::Original
        })
    }

    /// The ending patch for `outcome`, leaving `from_scene` in the history.
    pub fn ending_patch(&self, outcome: MissionOutcome, from_scene: &str) -> Patch {
        let (route, ending, reason, goto) = match outcome {
            MissionOutcome::Hidden => (
                ROUTE_HIDDEN,
                ENDING_HIDDEN,
                REASON_SUCCESS,
                &self.rules.hidden_end_scene,
            ),
            MissionOutcome::Original => (
                ROUTE_ORIGINAL,
                ENDING_ORIGINAL,
                REASON_FAILED,
                &self.rules.original_end_scene,
            ),
        };
        Patch::goto(goto)
            .with(PatchOp::Overwrite(Scalar::Route, Some(route.to_string())))
            .with(PatchOp::Overwrite(Scalar::Ending, Some(ending.to_string())))
            .with(PatchOp::Sticky(Some(reason.to_string())))
            .with(PatchOp::Append(HistoryOp::Push(from_scene.to_string())))
    }

    /// Judge the mission and move to the matching ending scene.
    ///
    /// Called from any scene other than the mission scene this returns the
    /// state unchanged.
    pub fn evaluate_mission_end(&self, state: &GameState, patches: &PatchEngine) -> GameState {
        let Some(outcome) = self.mission_outcome(state) else {
            return state.clone();
        };
        tracing::info!(?outcome, "mission judged");
        let patch = self.ending_patch(outcome, &self.rules.mission_scene);
        patches.apply(state, &patch)
    }
}
