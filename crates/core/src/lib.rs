// Core engine for polyglot, dependency-driven workflows

pub mod action;
pub mod config;
pub mod context;
pub mod error;
pub mod report;
pub mod signature;
pub mod target;
pub mod template;
pub mod types;
pub mod workflow;

pub use action::{Action, ActionOutcome, ActionRegistry, ActionRequest};
pub use config::RunConfig;
pub use context::ExecutionContext;
pub use error::{ActionError, EngineError};
pub use report::{RunReport, StepError, StepReport};
pub use target::{Fingerprint, FingerprintMode, Target};
pub use types::*;
pub use workflow::{Executor, WorkflowDag};
