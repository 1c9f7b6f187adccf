// Language adapters for the polyflow workflow engine

pub mod interpreter;
mod process;
pub mod protocol;
pub mod shell;

pub use interpreter::InterpreterAction;
pub use shell::ShellAction;

use polyflow_core::action::ActionRegistry;

/// Registry with the stock adapters: shell, python, and R.
pub fn default_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(ShellAction::new());
    registry.register(InterpreterAction::python());
    registry.register(InterpreterAction::rscript());
    registry
}
