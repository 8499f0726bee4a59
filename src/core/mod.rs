//! Engine components, leaves first.

pub mod branch;
pub mod catalog;
pub mod choice;
pub mod derived;
pub mod generator;
pub mod patch;
pub mod pipeline;
pub mod rules;
pub mod speaker;
pub mod validator;
