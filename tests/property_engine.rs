use std::collections::HashMap;

use proptest::prelude::*;

use pipesim::config::ConfigFile;
use pipesim::engine::PipelineEngine;
use pipesim::pipeline::derive_stage_status;
use pipesim::types::{JobStatus, PipelineSource};
use pipesim_test_utils::at;
use pipesim_test_utils::builders::{ConfigFileBuilder, JobBuilder, PipelineBuilder, RunnerBuilder};

#[derive(Debug, Clone)]
struct JobShape {
    duration_secs: u32,
    failing: bool,
    allow_failure: bool,
    when: &'static str,
    tagged: bool,
}

#[derive(Debug, Clone)]
enum Op {
    Start(usize),
    Cancel(usize),
    Retry(usize),
    Tick,
}

fn job_shape() -> impl Strategy<Value = JobShape> {
    (
        1..6u32,
        any::<bool>(),
        any::<bool>(),
        prop::sample::select(vec!["on_success", "on_success", "on_failure", "always"]),
        any::<bool>(),
    )
        .prop_map(|(d, failing, allow_failure, when, tagged)| JobShape {
            duration_secs: d * 10,
            failing,
            allow_failure,
            when,
            tagged,
        })
}

/// Up to three templates of up to three stages each, and one to three
/// runners. At least one runner carries the `docker` tag so every job can
/// eventually run.
fn config_strategy() -> impl Strategy<Value = ConfigFile> {
    let stages = prop::collection::vec(prop::collection::vec(job_shape(), 1..4), 1..4);
    let templates = prop::collection::vec(stages, 1..4);
    let runners = prop::collection::vec(1..4usize, 1..4);

    (templates, runners).prop_map(|(templates, runners)| {
        let mut builder = ConfigFileBuilder::new();
        for (i, max_jobs) in runners.into_iter().enumerate() {
            let mut runner = RunnerBuilder::new(&format!("r{i}")).max_jobs(max_jobs);
            if i == 0 {
                runner = runner.tag("docker");
            }
            builder = builder.with_runner(runner.build());
        }
        for (t, stages) in templates.into_iter().enumerate() {
            let mut pipeline = PipelineBuilder::new(&format!("p{t}"));
            for (s, jobs) in stages.into_iter().enumerate() {
                for (j, shape) in jobs.into_iter().enumerate() {
                    let mut job = JobBuilder::new(&format!("job{s}_{j}"))
                        .duration(&format!("{}s", shape.duration_secs))
                        .when(shape.when);
                    if shape.failing {
                        job = job.failing();
                    }
                    if shape.allow_failure {
                        job = job.allow_failure();
                    }
                    if shape.tagged {
                        job = job.tag("docker");
                    }
                    pipeline = pipeline.job(&format!("stage{s}"), job.build());
                }
            }
            builder = builder.with_pipeline(pipeline.build());
        }
        builder.build()
    })
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..3usize).prop_map(Op::Start),
        1 => (0..8usize).prop_map(Op::Cancel),
        1 => (0..8usize).prop_map(Op::Retry),
        5 => Just(Op::Tick),
    ]
}

fn check_invariants(engine: &PipelineEngine) -> Result<(), TestCaseError> {
    let mut bound: HashMap<&str, usize> = HashMap::new();
    for exec in engine.list_pipelines() {
        for job in exec.jobs() {
            if job.status == JobStatus::Running {
                if let Some(runner) = &job.runner_id {
                    *bound.entry(runner.as_str()).or_default() += 1;
                }
            }
        }

        for (idx, stage) in exec.stages.iter().enumerate() {
            prop_assert_eq!(stage.status, derive_stage_status(&stage.jobs));
            // A stage only starts once every earlier stage settled.
            if stage.jobs.iter().any(|j| j.started_at.is_some()) {
                prop_assert!(
                    exec.stages[..idx].iter().all(|s| s.is_settled()),
                    "pipeline {} started stage {} early",
                    exec.id,
                    stage.name
                );
            }
        }
    }

    for runner in engine.list_runners() {
        prop_assert!(runner.current_jobs <= runner.max_jobs);
        prop_assert_eq!(
            runner.current_jobs,
            bound.get(runner.id.as_str()).copied().unwrap_or_default(),
            "runner {} load does not match its running jobs",
            &runner.id
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn capacity_and_stage_order_hold(
        cfg in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let templates: Vec<String> = cfg.pipelines.iter().map(|p| p.id.clone()).collect();
        let mut engine = PipelineEngine::new(cfg);
        let mut started = Vec::new();
        let mut clock = 0;

        for op in ops {
            match op {
                Op::Start(t) => {
                    let template = &templates[t % templates.len()];
                    if let Ok(id) = engine.start(template, at(clock), PipelineSource::Push) {
                        started.push(id);
                    }
                }
                Op::Cancel(i) if !started.is_empty() => {
                    let _ = engine.cancel(started[i % started.len()]);
                }
                Op::Retry(i) if !started.is_empty() => {
                    if let Ok(id) = engine.retry(started[i % started.len()], at(clock)) {
                        started.push(id);
                    }
                }
                Op::Cancel(_) | Op::Retry(_) => {}
                Op::Tick => {
                    clock += 10;
                    engine.tick(at(clock));
                }
            }
            check_invariants(&engine)?;
        }

        // Drain: with a docker runner present everything eventually ends.
        for _ in 0..10_000 {
            if engine.list_pipelines().all(|e| e.is_terminal()) {
                break;
            }
            clock += 10;
            engine.tick(at(clock));
        }
        check_invariants(&engine)?;
        prop_assert!(engine.list_pipelines().all(|e| e.is_terminal()));
        prop_assert!(engine.list_runners().iter().all(|r| r.current_jobs == 0));
    }
}
