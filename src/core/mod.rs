//! Core building blocks: errors, configuration, shared types.

pub mod config;
pub mod errors;
pub mod types;
