//! Shared run environment for variable substitution and variable targets.
//!
//! The context is owned by the executor's control loop. Substeps never
//! touch it directly: they receive a snapshot at dispatch and return the
//! variables they produce, which the control loop merges under a
//! single-writer discipline.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    vars: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new(initial: HashMap<String, serde_json::Value>) -> Self {
        Self { vars: initial }
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get_var(&self, name: &str) -> Option<&serde_json::Value> {
        self.vars.get(name)
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Immutable copy handed to a substep at dispatch time.
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.vars.clone()
    }

    /// Merge variables published by a completed substep. Last write wins;
    /// only the control loop calls this.
    pub fn merge(&mut self, produced: HashMap<String, serde_json::Value>) {
        for (name, value) in produced {
            self.vars.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let mut ctx = ExecutionContext::default();
        ctx.set_var("a", serde_json::json!(1));
        let snap = ctx.snapshot();
        ctx.set_var("a", serde_json::json!(2));

        assert_eq!(snap.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(ctx.get_var("a"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_merge_last_write_wins() {
        let mut ctx = ExecutionContext::default();
        ctx.set_var("x", serde_json::json!("old"));

        let mut produced = HashMap::new();
        produced.insert("x".to_string(), serde_json::json!("new"));
        produced.insert("y".to_string(), serde_json::json!(true));
        ctx.merge(produced);

        assert_eq!(ctx.get_var("x"), Some(&serde_json::json!("new")));
        assert!(ctx.has_var("y"));
    }
}
