pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod node;
pub mod registry;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{CertflowError, Result};
pub use event::{EventBus, RunEvent};
pub use graph::WorkflowGraph;
pub use node::{NodeKind, NodeType, WorkflowNode};
pub use registry::{ProviderFactoryOptions, ProviderRegistry, Registries};
pub use types::*;
