//! Shared types, configuration and errors for the AlgoMate notifier.

pub mod config;
pub mod error;
pub mod types;
