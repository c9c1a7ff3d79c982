// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod logs;
pub mod metrics;
pub mod pipeline;
pub mod resources;
pub mod runner;
pub mod schedule;
pub mod session;
pub mod types;
pub mod watch;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::import::import_yaml;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{Clock, EngineHandle, ManualClock, PipelineEngine, SystemClock, spawn_ticker};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::PipelineExecution;
use crate::session::Session;
use crate::watch::{ConfigReloader, spawn_config_watcher};

const DEFAULT_REALTIME_INTERVAL: Duration = Duration::from_secs(1);

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (TOML or imported YAML)
/// - the engine actor inside a session
/// - virtual-time ticking, or the system clock plus optional hot reload
/// - the final report on stdout
pub async fn run(args: CliArgs) -> Result<()> {
    let (config_path, cfg) = load_config(&args)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mut session = Session::new();
    let handle = session.spawn(&args.component, PipelineEngine::new(cfg))?;

    if args.realtime {
        run_realtime(&args, &handle, config_path).await?;
    } else {
        run_virtual(&args, &handle).await?;
    }

    let metrics = handle.metrics_snapshot().await?;
    let pipelines = handle.list_pipelines().await?;
    print_report(&args, &metrics, &pipelines)?;

    session.shutdown().await;
    Ok(())
}

fn load_config(args: &CliArgs) -> Result<(PathBuf, ConfigFile)> {
    match &args.import {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading YAML import {path}"))?;
            let cfg = import_yaml(&text).with_context(|| format!("importing {path}"))?;
            Ok((PathBuf::from(path), cfg))
        }
        None => {
            let path = PathBuf::from(&args.config);
            let cfg = load_and_validate(&path)
                .with_context(|| format!("loading config {}", path.display()))?;
            Ok((path, cfg))
        }
    }
}

async fn start_requested(args: &CliArgs, handle: &EngineHandle, clock: &impl Clock) -> Result<()> {
    for template_id in &args.start {
        let id = template_id.clone();
        let source = handle
            .inspect(move |e| e.templates().get(&id).map(|t| t.source))
            .await?
            .unwrap_or_default();
        let outcome = handle.start(template_id.as_str(), source, clock.now()).await?;
        match outcome.pipeline_id {
            Some(pipeline_id) => info!(template = %template_id, pipeline_id, "pipeline started"),
            None => warn!(
                template = %template_id,
                reason = outcome.reason.as_deref().unwrap_or_default(),
                "could not start pipeline"
            ),
        }
    }
    Ok(())
}

/// Run `--ticks` steps of `--tick` virtual seconds each.
async fn run_virtual(args: &CliArgs, handle: &EngineHandle) -> Result<()> {
    let clock = ManualClock::new(Utc::now());
    let tick = TimeDelta::seconds(args.tick_secs as i64);
    start_requested(args, handle, &clock).await?;

    for n in 1..=args.ticks {
        let now = clock.advance(tick);
        let step = handle.step(now).await?;
        if !step.dispatch.is_quiet() || !step.fired.is_empty() {
            debug!(
                tick = n,
                fired = step.fired.len(),
                started = step.dispatch.started.len(),
                succeeded = step.dispatch.succeeded.len(),
                failed = step.dispatch.failed.len(),
                finished = step.dispatch.finished_pipelines.len(),
                "tick"
            );
        }
        if args.interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }
    info!(ticks = args.ticks, "virtual run complete");
    Ok(())
}

/// Tick from the system clock until Ctrl-C.
async fn run_realtime(args: &CliArgs, handle: &EngineHandle, config_path: PathBuf) -> Result<()> {
    start_requested(args, handle, &SystemClock).await?;

    let interval = match args.interval_ms {
        0 => DEFAULT_REALTIME_INTERVAL,
        ms => Duration::from_millis(ms),
    };
    let ticker = spawn_ticker(handle.clone(), SystemClock, interval);

    let watcher = if args.watch {
        Some(spawn_config_watcher(ConfigReloader::new(
            config_path,
            handle.clone(),
        ))?)
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    info!("Ctrl+C received; stopping");

    ticker.abort();
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    metrics: &'a MetricsSnapshot,
    pipelines: &'a [PipelineExecution],
}

fn print_report(
    args: &CliArgs,
    metrics: &MetricsSnapshot,
    pipelines: &[PipelineExecution],
) -> Result<()> {
    if args.json {
        let json = serde_json::to_string_pretty(&JsonReport { metrics, pipelines })
            .context("serializing report")?;
        println!("{json}");
        return Ok(());
    }

    println!("pipelines ({}):", pipelines.len());
    for exec in pipelines {
        let duration = exec
            .duration
            .map(|d| format!("{}s", d.num_seconds()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  #{} (iid {}, attempt {}) {} on {} [{}]: {} in {}",
            exec.id,
            exec.iid,
            exec.attempt,
            exec.template_id,
            exec.git_ref,
            exec.source,
            exec.status,
            duration
        );
        for stage in &exec.stages {
            let jobs: Vec<String> = stage
                .jobs
                .iter()
                .map(|j| format!("{}={}", j.name, j.status))
                .collect();
            println!("      {}: {}", stage.name, jobs.join(" "));
        }
    }

    println!();
    println!(
        "success rate {:.0}%, {} jobs ({} running, {} pending, {} manual)",
        metrics.success_rate * 100.0,
        metrics.jobs.total,
        metrics.jobs.running,
        metrics.jobs.pending,
        metrics.jobs.manual
    );
    if let Some(p50) = metrics.pipeline_duration.p50 {
        println!("pipeline duration p50 {p50:.0}s");
    }
    println!(
        "runner utilization {:.0}%, cache hit rate {:.0}%, {} artifacts",
        metrics.overall_utilization * 100.0,
        metrics.cache.hit_rate * 100.0,
        metrics.artifacts.count
    );
    Ok(())
}

/// Simple dry-run output: templates, runners and schedules.
fn print_dry_run(cfg: &ConfigFile) {
    println!("pipesim dry-run");
    println!("  settings.enable_runners = {}", cfg.settings.enable_runners);
    println!("  settings.enable_cache = {}", cfg.settings.enable_cache);
    println!("  settings.enable_artifacts = {}", cfg.settings.enable_artifacts);
    println!("  settings.concurrent_jobs = {}", cfg.settings.concurrent_jobs);
    println!();

    println!("pipelines ({}):", cfg.pipelines.len());
    for template in &cfg.pipelines {
        println!("  - {} (ref {}, source {})", template.id, template.git_ref, template.source);
        for stage in &template.stages {
            println!("      stage {}:", stage.name);
            for job in &stage.jobs {
                let mut extras = Vec::new();
                if job.when != crate::types::WhenPolicy::OnSuccess {
                    extras.push(format!("when={}", job.when));
                }
                if job.allow_failure {
                    extras.push("allow_failure".to_string());
                }
                if !job.tags.is_empty() {
                    let tags: Vec<&str> = job.tags.iter().map(String::as_str).collect();
                    extras.push(format!("tags=[{}]", tags.join(", ")));
                }
                if let Some(target) = &job.trigger {
                    extras.push(format!("trigger={target}"));
                }
                if let Some(env) = &job.environment {
                    extras.push(format!("environment={env}"));
                }
                println!("        - {} {}", job.name, extras.join(" "));
            }
        }
    }

    println!("runners ({}):", cfg.runners.len());
    for runner in &cfg.runners {
        let tags: Vec<&str> = runner.tags.iter().map(String::as_str).collect();
        println!(
            "  - {} [{}] max_jobs={} tags=[{}]{}",
            runner.id,
            runner.profile.kind,
            runner.max_jobs,
            tags.join(", "),
            if runner.active { "" } else { " (paused)" }
        );
    }

    println!("schedules ({}):", cfg.schedules.len());
    for schedule in &cfg.schedules {
        println!(
            "  - {} \"{}\" -> {}{}",
            schedule.id,
            schedule.cron.as_str(),
            schedule.template_id,
            if schedule.active { "" } else { " (inactive)" }
        );
    }

    debug!("dry-run complete (no simulation)");
}
