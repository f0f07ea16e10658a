pub mod context;
pub mod engine;
pub mod executor;
pub mod expr;
pub mod processor;
pub mod run_log;

pub use context::{
    EngineServices, NodeExecutionContext, NodeExecutionResult, RunContext, SequenceRunner,
};
pub use engine::{RunHandle, WorkflowEngine};
pub use executor::{executor_for, NodeExecutor};
pub use expr::JsonExprEvaluator;
pub use processor::WorkflowProcessor;
pub use run_log::RunLogger;
