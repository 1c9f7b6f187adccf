//! Stdout protocol for publishing variables from subprocess bodies.
//!
//! A body publishes a variable by printing a line of the form
//! `polyflow:var name=value`. Values that parse as JSON keep their type;
//! anything else is taken as a raw string.

use std::collections::HashMap;

const VAR_PREFIX: &str = "polyflow:var ";

/// Extract published variables from captured stdout.
pub fn parse_vars(stdout: &str) -> HashMap<String, serde_json::Value> {
    let mut vars = HashMap::new();
    for line in stdout.lines() {
        let Some(rest) = line.trim().strip_prefix(VAR_PREFIX) else {
            continue;
        };
        let Some((name, raw)) = rest.split_once('=') else {
            continue;
        };
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        vars.insert(name.trim().to_string(), value);
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_values() {
        let stdout = "some output\npolyflow:var count=42\npolyflow:var ok=true\n";
        let vars = parse_vars(stdout);
        assert_eq!(vars.get("count"), Some(&serde_json::json!(42)));
        assert_eq!(vars.get("ok"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_non_json_value_falls_back_to_string() {
        let vars = parse_vars("polyflow:var label=plain text\n");
        assert_eq!(vars.get("label"), Some(&serde_json::json!("plain text")));
    }

    #[test]
    fn test_ordinary_output_is_ignored() {
        let vars = parse_vars("hello\npolyflow:variable nope\n");
        assert!(vars.is_empty());
    }

    #[test]
    fn test_last_assignment_wins() {
        let vars = parse_vars("polyflow:var n=1\npolyflow:var n=2\n");
        assert_eq!(vars.get("n"), Some(&serde_json::json!(2)));
    }
}
