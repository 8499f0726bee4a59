//! Plain data types shared by the engine and its collaborators.

pub mod envelope;
pub mod payload;
pub mod scene;
pub mod state;
