pub mod dag;
pub mod executor;

pub use dag::WorkflowDag;
pub use executor::Executor;
