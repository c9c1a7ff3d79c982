// src/engine/clock.rs

//! Time sources for driving the engine.
//!
//! The engine itself never reads a clock; whatever drives it does, through
//! [`Clock`]. Production uses [`SystemClock`]; tests and virtual-time runs use
//! [`ManualClock`], which only moves when told to.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::runtime::EngineHandle;
use crate::errors::EngineError;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared, manually advanced clock. Clones observe the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    /// Move forward by `delta` and return the new time.
    pub fn advance(&self, delta: TimeDelta) -> DateTime<Utc> {
        let mut now = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
        *now
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Step the engine every `interval` of real time with `clock.now()`.
///
/// The task ends when the engine actor goes away.
pub fn spawn_ticker<C: Clock>(
    handle: EngineHandle,
    clock: C,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "ticker started");

        loop {
            timer.tick().await;
            match handle.step(clock.now()).await {
                Ok(step) => {
                    if !step.dispatch.is_quiet() || !step.fired.is_empty() {
                        debug!(
                            fired = step.fired.len(),
                            started = step.dispatch.started.len(),
                            finished = step.dispatch.finished_pipelines.len(),
                            "tick"
                        );
                    }
                }
                Err(EngineError::EngineClosed) => break,
                Err(err) => {
                    debug!(error = %err, "tick failed");
                }
            }
        }
        info!("ticker stopped");
    })
}
