//! Hand-off from the pipeline to the workflow engine.

pub mod dispatcher;
pub mod engine;

pub use dispatcher::Dispatcher;
pub use engine::{EngineError, HttpWorkflowEngine, LoggingEngine, WorkflowEngine};
