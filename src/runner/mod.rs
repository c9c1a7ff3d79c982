// src/runner/mod.rs

//! Runners: capacity-limited execution slots.
//!
//! - [`pool`] owns live runner state and admission (`acquire`/`release`).
//! - [`profile`] describes what each executor kind costs to start.
//! - [`policy`] decides synthetic durations and outcomes.

pub mod policy;
pub mod pool;
pub mod profile;

pub use policy::{JobPlan, PlanInput, PlannedOutcome};
pub use pool::{Runner, RunnerDelta, RunnerPool, RunnerSpec};
pub use profile::{ExecutorKind, ExecutorProfile};
