// src/engine/mod.rs

//! Orchestration engine for pipesim.
//!
//! This module ties together:
//! - the pure engine state machine ([`core`]) that advances executions on
//!   `tick(now)`
//! - the commands that create, retry, cancel and unblock executions
//!   ([`commands`])
//! - configuration reconciliation ([`reconcile`])
//! - the actor shell that serializes access from async callers
//!   ([`runtime`]) and the clocks that drive it ([`clock`])

pub mod clock;
pub mod commands;
pub mod core;
pub mod reconcile;
pub mod runtime;

pub use clock::{Clock, ManualClock, SystemClock, spawn_ticker};
pub use core::{EngineStep, PipelineEngine};
pub use reconcile::{ReconcileReport, ScheduleDelta};
pub use runtime::{CommandOutcome, EngineActor, EngineHandle, EngineRequest};
