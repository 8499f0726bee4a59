//! Story Engine: state-patch and branch-resolution for branching narrative sessions.
//!
//! Each turn an external content generator proposes narration, dialogue,
//! choices and a state patch. The engine validates that untrusted payload
//! against the scene catalog, resolves the player's effective choice,
//! selects a branch, and applies a rule-consistent patch to the game state.

pub mod core;
pub mod schema;
