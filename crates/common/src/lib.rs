//! Shared types for the saga runtime crates.

pub mod types;

pub use types::CorrelationId;
