use std::error::Error;

use pipesim::engine::PipelineEngine;
use pipesim::types::{JobStatus, PipelineSource, PipelineStatus};
use pipesim_test_utils::builders::{
    ConfigFileBuilder, JobBuilder, PipelineBuilder, RunnerBuilder, ScheduleBuilder,
};
use pipesim_test_utils::{at, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

fn build_pipeline(id: &str, duration: &str) -> PipelineBuilder {
    PipelineBuilder::new(id).job("build", JobBuilder::new("compile").duration(duration).build())
}

#[test]
fn removing_a_template_cancels_its_live_executions() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").max_jobs(2).build())
        .with_pipeline(build_pipeline("web", "10m").build())
        .with_pipeline(build_pipeline("api", "10m").build())
        .build();
    let mut engine = PipelineEngine::new(cfg);

    let web = engine.start("web", at(0), PipelineSource::Push)?;
    let api = engine.start("api", at(0), PipelineSource::Push)?;

    let next = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").max_jobs(2).build())
        .with_pipeline(build_pipeline("api", "10m").build())
        .with_pipeline(build_pipeline("docs", "1m").build())
        .build();
    let report = engine.update_config(next);

    assert_eq!(report.templates.added, vec!["docs".to_string()]);
    assert_eq!(report.templates.removed, vec!["web".to_string()]);
    assert!(report.templates.updated.is_empty());
    assert_eq!(report.canceled, vec![web]);

    assert_eq!(engine.pipeline(web)?.status, PipelineStatus::Canceled);
    assert_eq!(engine.pipeline(api)?.status, PipelineStatus::Running);
    assert_eq!(engine.list_runners()[0].current_jobs, 1);
    assert!(engine.templates().get("web").is_none());
    Ok(())
}

#[test]
fn running_executions_keep_their_template_snapshot() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").max_jobs(2).build())
        .with_pipeline(
            build_pipeline("main", "1m")
                .job("test", JobBuilder::new("unit").build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);
    let old = engine.start("main", at(0), PipelineSource::Push)?;

    let next = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").max_jobs(2).build())
        .with_pipeline(build_pipeline("main", "1m").build())
        .build();
    let report = engine.update_config(next);
    assert_eq!(report.templates.updated, vec!["main".to_string()]);

    engine.tick(at(60));
    let exec = engine.pipeline(old)?;
    assert_eq!(exec.stages.len(), 2);
    assert!(exec.jobs().any(|j| j.name == "unit" && j.status == JobStatus::Running));

    let new = engine.start("main", at(60), PipelineSource::Push)?;
    assert_eq!(engine.pipeline(new)?.stages.len(), 1);
    Ok(())
}

#[test]
fn busy_runner_retires_until_drained() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("old").build())
        .with_pipeline(build_pipeline("main", "1m").build())
        .build();
    let mut engine = PipelineEngine::new(cfg);
    let first = engine.start("main", at(0), PipelineSource::Push)?;

    let next = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("new").build())
        .with_pipeline(build_pipeline("main", "1m").build())
        .build();
    let report = engine.update_config(next);
    assert_eq!(report.runners.added, vec!["new".to_string()]);
    assert_eq!(report.runners.retiring, vec!["old".to_string()]);
    assert!(report.runners.removed.is_empty());

    // The retiring runner takes no new work.
    let second = engine.start("main", at(10), PipelineSource::Push)?;
    let bound = |engine: &PipelineEngine, id| -> Result<Option<String>, Box<dyn Error>> {
        Ok(engine
            .pipeline(id)?
            .jobs()
            .next()
            .and_then(|j| j.runner_id.clone()))
    };
    assert_eq!(bound(&engine, first)?, Some("old".to_string()));
    assert_eq!(bound(&engine, second)?, Some("new".to_string()));

    engine.tick(at(60));
    assert_eq!(engine.pipeline(first)?.status, PipelineStatus::Success);
    let ids: Vec<&str> = engine.list_runners().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["new"]);
    Ok(())
}

#[test]
fn shrinking_capacity_never_strands_running_jobs() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").max_jobs(3).build())
        .with_pipeline(
            PipelineBuilder::new("main")
                .job("build", JobBuilder::new("a").build())
                .job("build", JobBuilder::new("b").build())
                .job("build", JobBuilder::new("c").build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);
    let id = engine.start("main", at(0), PipelineSource::Push)?;
    assert_eq!(engine.list_runners()[0].current_jobs, 3);

    let next = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").max_jobs(1).build())
        .with_pipeline(build_pipeline("main", "1m").build())
        .build();
    engine.update_config(next);
    let runner = &engine.list_runners()[0];
    assert!(runner.current_jobs <= runner.max_jobs);

    engine.tick(at(60));
    assert_eq!(engine.pipeline(id)?.status, PipelineStatus::Success);
    assert_eq!(engine.list_runners()[0].max_jobs, 1);
    assert_eq!(engine.list_runners()[0].current_jobs, 0);
    Ok(())
}

#[test]
fn schedules_variables_and_environments_are_reconciled() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_variable("REGISTRY", "registry.local")
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(
            PipelineBuilder::new("main")
                .job("deploy", JobBuilder::new("ship").environment("staging").build())
                .build(),
        )
        .with_schedule(ScheduleBuilder::new("hourly", "main", "0 * * * *").build())
        .with_schedule(ScheduleBuilder::new("daily", "main", "0 3 * * *").build())
        .build();
    let mut engine = PipelineEngine::new(cfg);
    engine.start("main", at(0), PipelineSource::Push)?;
    engine.tick(at(60));
    assert_eq!(engine.list_environments().len(), 1);

    let next = ConfigFileBuilder::new()
        .with_variable("REGISTRY", "registry.example.com")
        .with_variable("RUST_LOG", "debug")
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(
            PipelineBuilder::new("main")
                .job("build", JobBuilder::new("compile").build())
                .build(),
        )
        .with_schedule(ScheduleBuilder::new("hourly", "main", "30 * * * *").build())
        .with_schedule(ScheduleBuilder::new("weekly", "main", "0 0 * * 0").build())
        .build();
    let report = engine.update_config(next);

    assert_eq!(report.schedules.added, vec!["weekly".to_string()]);
    assert_eq!(report.schedules.removed, vec!["daily".to_string()]);
    assert_eq!(report.schedules.updated, vec!["hourly".to_string()]);
    assert_eq!(report.variables, 2);
    let registry = engine
        .list_variables()
        .iter()
        .find(|v| v.key == "REGISTRY")
        .ok_or("REGISTRY missing")?;
    assert_eq!(registry.value, "registry.example.com");

    // Staging saw a deployment, so it stays even though nothing declares it.
    assert_eq!(report.environments, 1);
    assert_eq!(engine.list_environments()[0].name, "staging");
    Ok(())
}
