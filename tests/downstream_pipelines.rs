use std::error::Error;

use pipesim::engine::PipelineEngine;
use pipesim::types::{FailureReason, JobStatus, PipelineId, PipelineSource, PipelineStatus};
use pipesim_test_utils::builders::{ConfigFileBuilder, JobBuilder, PipelineBuilder, RunnerBuilder};
use pipesim_test_utils::{at, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

fn trigger_job_status(engine: &PipelineEngine, parent: PipelineId) -> Result<(JobStatus, Option<PipelineId>), Box<dyn Error>> {
    let job = engine
        .pipeline(parent)?
        .jobs()
        .find(|j| j.is_trigger())
        .ok_or("no trigger job")?;
    Ok((job.status, job.child_pipeline_id))
}

fn parent_with_trigger(child: &str) -> PipelineBuilder {
    PipelineBuilder::new("main")
        .job("build", JobBuilder::new("compile").build())
        .job("downstream", JobBuilder::new("trigger-child").trigger(child).build())
}

#[test]
fn trigger_job_mirrors_successful_child() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(parent_with_trigger("deploy").build())
        .with_pipeline(
            PipelineBuilder::new("deploy")
                .job("rollout", JobBuilder::new("apply").build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);

    let parent = engine.start("main", at(0), PipelineSource::Push)?;
    let step = engine.tick(at(60));

    assert_eq!(step.child_pipelines.len(), 1);
    let child = step.child_pipelines[0];
    assert_eq!(trigger_job_status(&engine, parent)?, (JobStatus::Running, Some(child)));

    let child_exec = engine.pipeline(child)?;
    assert_eq!(child_exec.source, PipelineSource::ParentPipeline);
    assert_eq!(child_exec.parent_pipeline_id, Some(parent));
    assert_eq!(child_exec.git_ref, "main");
    assert_eq!(child_exec.status, PipelineStatus::Running);
    assert_eq!(engine.pipeline(parent)?.child_pipeline_ids, vec![child]);

    // Trigger jobs never hold a runner slot.
    assert_eq!(engine.list_runners()[0].current_jobs, 1);

    let step = engine.tick(at(120));
    assert!(step.finished_pipelines.contains(&parent));
    assert!(step.finished_pipelines.contains(&child));
    assert_eq!(engine.pipeline(child)?.status, PipelineStatus::Success);
    assert_eq!(engine.pipeline(parent)?.status, PipelineStatus::Success);
    assert_eq!(trigger_job_status(&engine, parent)?.0, JobStatus::Success);

    let log: Vec<String> = engine
        .job_logs(
            engine
                .pipeline(parent)?
                .jobs()
                .find(|j| j.is_trigger())
                .ok_or("no trigger job")?
                .id,
        )?
        .lines()
        .collect();
    assert!(log.contains(&format!("Triggered downstream pipeline #{child}")));
    Ok(())
}

#[test]
fn failed_child_fails_the_trigger_job() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(parent_with_trigger("deploy").build())
        .with_pipeline(
            PipelineBuilder::new("deploy")
                .job("rollout", JobBuilder::new("apply").failing().build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);

    let parent = engine.start("main", at(0), PipelineSource::Push)?;
    engine.tick(at(60));
    engine.tick(at(120));

    let trigger = engine
        .pipeline(parent)?
        .jobs()
        .find(|j| j.is_trigger())
        .ok_or("no trigger job")?;
    assert_eq!(trigger.status, JobStatus::Failed);
    assert_eq!(trigger.failure_reason, Some(FailureReason::DownstreamFailed));
    assert_eq!(engine.pipeline(parent)?.status, PipelineStatus::Failed);
    Ok(())
}

#[test]
fn child_without_jobs_for_the_ref_fails_the_trigger() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(parent_with_trigger("release").build())
        .with_pipeline(
            PipelineBuilder::new("release")
                .job("publish", JobBuilder::new("upload").only("v*").build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);

    let parent = engine.start("main", at(0), PipelineSource::Push)?;
    let step = engine.tick(at(60));

    assert!(step.child_pipelines.is_empty());
    let trigger = engine
        .pipeline(parent)?
        .jobs()
        .find(|j| j.is_trigger())
        .ok_or("no trigger job")?;
    assert_eq!(trigger.status, JobStatus::Failed);
    assert_eq!(trigger.failure_reason, Some(FailureReason::TriggerFailed));
    assert_eq!(engine.pipeline(parent)?.status, PipelineStatus::Failed);
    assert_eq!(engine.list_pipelines().count(), 1);
    Ok(())
}

#[test]
fn canceling_parent_cancels_running_child() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(parent_with_trigger("deploy").build())
        .with_pipeline(
            PipelineBuilder::new("deploy")
                .job("rollout", JobBuilder::new("apply").duration("10m").build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);

    let parent = engine.start("main", at(0), PipelineSource::Push)?;
    let step = engine.tick(at(60));
    let child = step.child_pipelines[0];
    assert_eq!(engine.list_runners()[0].current_jobs, 1);

    engine.cancel(parent)?;
    assert_eq!(engine.pipeline(parent)?.status, PipelineStatus::Canceled);
    assert_eq!(engine.pipeline(child)?.status, PipelineStatus::Canceled);
    assert!(engine.pipeline(child)?.jobs().all(|j| j.status == JobStatus::Canceled));
    assert_eq!(engine.list_runners()[0].current_jobs, 0);
    Ok(())
}

#[test]
fn canceling_child_cancels_the_trigger_job() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(parent_with_trigger("deploy").build())
        .with_pipeline(
            PipelineBuilder::new("deploy")
                .job("rollout", JobBuilder::new("apply").duration("10m").build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);

    let parent = engine.start("main", at(0), PipelineSource::Push)?;
    let child = engine.tick(at(60)).child_pipelines[0];

    engine.cancel(child)?;
    engine.tick(at(61));

    assert_eq!(trigger_job_status(&engine, parent)?.0, JobStatus::Canceled);
    assert_eq!(engine.pipeline(parent)?.status, PipelineStatus::Canceled);
    Ok(())
}

#[test]
fn canceled_child_skips_later_on_success_stages() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(
            PipelineBuilder::new("main")
                .job("downstream", JobBuilder::new("kick").trigger("deploy").build())
                .job("after", JobBuilder::new("notify").duration("1m").build())
                .job("after", JobBuilder::new("cleanup").when("always").build())
                .job("after", JobBuilder::new("rollback").when("on_failure").build())
                .build(),
        )
        .with_pipeline(
            PipelineBuilder::new("deploy")
                .job("rollout", JobBuilder::new("apply").duration("10m").build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);

    let parent = engine.start("main", at(0), PipelineSource::Push)?;
    let child = engine.pipeline(parent)?.child_pipeline_ids[0];
    engine.cancel(child)?;

    let step = engine.tick(at(1));
    let status_of = |engine: &PipelineEngine, name: &str| -> Result<JobStatus, Box<dyn Error>> {
        Ok(engine
            .pipeline(parent)?
            .jobs()
            .find(|j| j.name == name)
            .ok_or("job missing")?
            .status)
    };
    assert_eq!(trigger_job_status(&engine, parent)?.0, JobStatus::Canceled);
    assert_eq!(status_of(&engine, "notify")?, JobStatus::Skipped);
    assert_eq!(status_of(&engine, "rollback")?, JobStatus::Skipped);
    assert_eq!(status_of(&engine, "cleanup")?, JobStatus::Running);
    assert_eq!(step.started.len(), 1);
    assert_eq!(engine.list_runners()[0].current_jobs, 1);

    engine.tick(at(61));
    assert_eq!(status_of(&engine, "cleanup")?, JobStatus::Success);
    assert_eq!(status_of(&engine, "notify")?, JobStatus::Skipped);
    assert_eq!(engine.pipeline(parent)?.status, PipelineStatus::Canceled);
    assert_eq!(engine.list_runners()[0].current_jobs, 0);
    Ok(())
}

#[test]
fn retrying_a_child_links_it_to_the_parent() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_runner(RunnerBuilder::new("r1").build())
        .with_pipeline(parent_with_trigger("deploy").build())
        .with_pipeline(
            PipelineBuilder::new("deploy")
                .job("rollout", JobBuilder::new("apply").failing().build())
                .build(),
        )
        .build();
    let mut engine = PipelineEngine::new(cfg);

    let parent = engine.start("main", at(0), PipelineSource::Push)?;
    let child = engine.tick(at(60)).child_pipelines[0];
    engine.tick(at(120));
    assert_eq!(engine.pipeline(child)?.status, PipelineStatus::Failed);

    let retried = engine.retry(child, at(120))?;
    let exec = engine.pipeline(retried)?;
    assert_eq!(exec.parent_pipeline_id, Some(parent));
    assert_eq!(exec.source, PipelineSource::ParentPipeline);
    assert_eq!(exec.attempt, 2);
    assert_eq!(engine.pipeline(parent)?.child_pipeline_ids, vec![child, retried]);
    Ok(())
}
