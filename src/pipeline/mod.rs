// src/pipeline/mod.rs

//! Pipeline templates, live executions and the dispatcher that advances
//! them.

pub mod dispatch_step;
pub mod dispatcher;
pub mod execution;
pub mod template;
pub mod variables;

pub use dispatch_step::DispatchStep;
pub use dispatcher::{Dispatcher, TriggerRequest};
pub use execution::{Job, PipelineExecution, Stage, Upstream, derive_stage_status};
pub use template::{JobTemplate, PipelineTemplate, RefFilter, StageTemplate, TemplateStore};
pub use variables::{PipelineContext, VariableSet};
