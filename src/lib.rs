//! Progression engine for a seasonal league.
//!
//! Per-map results are resolved into match outcomes, regular-season outcomes are aggregated into
//! group standings, and playoff winners are propagated through a fixed single-elimination
//! bracket. Every operation is a full recomputation over persisted records, so re-running any of
//! them is always safe.

/// Settings loaded from the environment.
pub mod config;
/// Traits and types used for interacting with the database.
///
/// Contains the Postgres implementation as well as an in-memory one used by tests and snapshot
/// runs.
pub mod database;
/// The match resolver, the standings calculator and the bracket state machine.
pub mod engine;
/// Table rendering for the command line front end.
pub mod render;
/// Periodic compute-then-apply of bracket advancements.
pub mod scheduler;

pub mod utils;

pub use engine::Engine;

/// The error type used throughout the engine.
///
/// Domain failures are raised as [`utils::error::CommonError`] and can be recovered with
/// `downcast_ref`.
pub type EngineError = anyhow::Error;
