//! Derived flags: recruitment sync, recruit order, and hidden-ending eligibility.
//!
//! Kept as pure functions of the post-mutation state so they can be tested
//! apart from the patch mechanics. Every derived flag is additive; nothing
//! here ever removes a flag.

use std::collections::BTreeSet;

use crate::core::rules::{
    TurnLimits, FLAG_HIDDEN_ELIGIBLE, FLAG_ORDER_FIRST_INOSUKE, FLAG_ORDER_INOSUKE_THEN_ZENITSU,
    FLAG_RECRUIT_INOSUKE, FLAG_RECRUIT_ZENITSU, INOSUKE, ZENITSU,
};
use crate::schema::state::GameState;

/// Recompute the flag list for `state` after a patch.
///
/// Recruitment flags are synced from `allies` only when the patch touched
/// allies or flags. The order and eligibility chain runs every time, since
/// it also depends on the turn counters.
pub fn derive_flags(
    state: &GameState,
    touched_allies: bool,
    touched_flags: bool,
    limits: &TurnLimits,
) -> Vec<String> {
    let mut flags: BTreeSet<String> = state.flags.iter().cloned().collect();

    if touched_allies || touched_flags {
        if state.is_ally(INOSUKE) {
            flags.insert(FLAG_RECRUIT_INOSUKE.to_string());
        }
        if state.is_ally(ZENITSU) {
            flags.insert(FLAG_RECRUIT_ZENITSU.to_string());
        }
    }

    // Inosuke alone so far: he came first.
    if flags.contains(FLAG_RECRUIT_INOSUKE) && !flags.contains(FLAG_RECRUIT_ZENITSU) {
        flags.insert(FLAG_ORDER_FIRST_INOSUKE.to_string());
    }

    if flags.contains(FLAG_ORDER_FIRST_INOSUKE)
        && flags.contains(FLAG_RECRUIT_INOSUKE)
        && flags.contains(FLAG_RECRUIT_ZENITSU)
    {
        flags.insert(FLAG_ORDER_INOSUKE_THEN_ZENITSU.to_string());
    }

    if hidden_eligible(state, &flags, limits) {
        flags.insert(FLAG_HIDDEN_ELIGIBLE.to_string());
    }

    flags.into_iter().collect()
}

/// Inosuke-then-Zenitsu order held, each within the per-character budget,
/// and the mission within its total budget. All bounds inclusive.
pub fn hidden_eligible(state: &GameState, flags: &BTreeSet<String>, limits: &TurnLimits) -> bool {
    flags.contains(FLAG_ORDER_INOSUKE_THEN_ZENITSU)
        && state.character_turns(INOSUKE) <= limits.character
        && state.character_turns(ZENITSU) <= limits.character
        && state.total_turns_used <= limits.mission
}

/// [`hidden_eligible`] against the state's own flags.
pub fn is_hidden_eligible(state: &GameState, limits: &TurnLimits) -> bool {
    let flags: BTreeSet<String> = state.flags.iter().cloned().collect();
    hidden_eligible(state, &flags, limits)
}
