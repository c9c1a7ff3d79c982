use std::error::Error;
use std::time::Duration;

use pipesim::engine::{Clock, EngineHandle, ManualClock, PipelineEngine, spawn_ticker};
use pipesim::errors::EngineError;
use pipesim::session::Session;
use pipesim::types::{JobStatus, PipelineSource, PipelineStatus};
use pipesim_test_utils::builders::{ConfigFileBuilder, JobBuilder, PipelineBuilder, RunnerBuilder};
use pipesim_test_utils::{at, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn engine() -> PipelineEngine {
    PipelineEngine::new(
        ConfigFileBuilder::new()
            .with_runner(RunnerBuilder::new("r1").build())
            .with_pipeline(
                PipelineBuilder::new("main")
                    .job("build", JobBuilder::new("compile").build())
                    .job("deploy", JobBuilder::new("release").manual().build())
                    .build(),
            )
            .build(),
    )
}

#[tokio::test]
async fn commands_report_outcomes_instead_of_errors() -> TestResult {
    init_tracing();
    let (handle, join) = EngineHandle::spawn(engine());

    with_timeout(async {
        let started = handle.start("main", PipelineSource::Api, at(0)).await?;
        assert!(started.success);
        let id = started.pipeline_id.ok_or("start returned no id")?;

        let missing = handle.start("nope", PipelineSource::Api, at(0)).await?;
        assert!(!missing.success);
        assert!(missing.reason.as_deref().is_some_and(|r| r.contains("nope")));

        let retry = handle.retry(id, at(1)).await?;
        assert!(!retry.success);

        let step = handle.step(at(60)).await?;
        assert_eq!(step.dispatch.succeeded.len(), 1);

        let release = handle
            .list_active_jobs()
            .await?
            .into_iter()
            .find(|j| j.name == "release");
        assert!(release.is_none(), "manual job is not active until played");

        let release = handle
            .pipeline(id)
            .await?
            .jobs()
            .find(|j| j.name == "release")
            .map(|j| (j.id, j.status))
            .ok_or("release job missing")?;
        assert_eq!(release.1, JobStatus::Manual);

        assert!(handle.play_manual_job(release.0, at(60)).await?.success);
        handle.tick(at(60)).await?;
        handle.tick(at(120)).await?;
        assert_eq!(handle.pipeline(id).await?.status, PipelineStatus::Success);

        let cancel = handle.cancel(id).await?;
        assert!(!cancel.success);

        let metrics = handle.metrics_snapshot().await?;
        assert_eq!(metrics.pipelines.success, 1);
        assert_eq!(handle.list_runners().await?[0].jobs_started, 2);

        let lines: Vec<String> = handle.job_logs(release.0).await?.lines().collect();
        assert_eq!(lines.last().map(String::as_str), Some("Job succeeded"));

        Ok::<_, Box<dyn Error>>(())
    })
    .await?;

    handle.shutdown().await?;
    let engine = join.await?;
    assert_eq!(engine.list_pipelines().count(), 1);
    Ok(())
}

#[tokio::test]
async fn closed_actor_rejects_requests() -> TestResult {
    let (handle, join) = EngineHandle::spawn(engine());
    handle.shutdown().await?;
    join.await?;

    assert!(matches!(
        handle.step(at(0)).await,
        Err(EngineError::EngineClosed)
    ));
    assert!(matches!(
        handle.list_pipelines().await,
        Err(EngineError::EngineClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn ticker_follows_the_clock() -> TestResult {
    init_tracing();
    let (handle, join) = EngineHandle::spawn(engine());
    let clock = ManualClock::new(at(0));

    let id = handle
        .start("main", PipelineSource::Push, clock.now())
        .await?
        .pipeline_id
        .ok_or("start returned no id")?;
    let ticker = spawn_ticker(handle.clone(), clock.clone(), Duration::from_millis(5));

    clock.set(at(60));
    with_timeout(async {
        loop {
            let exec = handle.pipeline(id).await?;
            if exec.jobs().any(|j| j.name == "release" && j.status == JobStatus::Manual) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<_, EngineError>(())
    })
    .await?;

    handle.shutdown().await?;
    join.await?;
    with_timeout(ticker).await?;
    Ok(())
}

#[tokio::test]
async fn session_runs_independent_components() -> TestResult {
    let mut session = Session::new();
    let a = session.spawn("team-a", engine())?;
    let b = session.spawn("team-b", engine())?;
    assert_eq!(session.ids().collect::<Vec<_>>(), vec!["team-a", "team-b"]);

    with_timeout(async {
        a.start("main", PipelineSource::Push, at(0)).await?;
        a.start("main", PipelineSource::Push, at(0)).await?;
        b.start("main", PipelineSource::Push, at(0)).await?;
        Ok::<_, EngineError>(())
    })
    .await?;

    assert_eq!(session.handle("team-a")?.list_pipelines().await?.len(), 2);
    assert_eq!(session.handle("team-b")?.list_pipelines().await?.len(), 1);

    let engine_a = session.remove("team-a").await?;
    assert_eq!(engine_a.list_pipelines().count(), 2);
    assert!(matches!(
        a.step(at(10)).await,
        Err(EngineError::EngineClosed)
    ));
    assert_eq!(session.len(), 1);

    let rest = session.shutdown().await;
    assert_eq!(rest.keys().map(String::as_str).collect::<Vec<_>>(), vec!["team-b"]);
    Ok(())
}
