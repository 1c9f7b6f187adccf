//! `${name}` substitution over a step's variable namespace.
//!
//! Rendering is a pure function of (template, namespace) and happens just
//! before an action is invoked. `$$` escapes a literal dollar sign; a bare
//! `$` not followed by `{` passes through untouched so shell bodies can
//! keep using `$VAR`.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("undefined variable `{0}`")]
    Undefined(String),

    #[error("unterminated `${{` in template")]
    Unterminated,
}

/// Render a template against a namespace. String values substitute as-is;
/// other values substitute as their JSON form.
pub fn render(
    template: &str,
    namespace: &HashMap<String, serde_json::Value>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(TemplateError::Unterminated),
                    }
                }
                let name = name.trim();
                let value = namespace
                    .get(name)
                    .ok_or_else(|| TemplateError::Undefined(name.to_string()))?;
                match value {
                    serde_json::Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            _ => out.push('$'),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_variables() {
        let namespace = ns(&[("step_name", serde_json::json!("report"))]);
        assert_eq!(
            render("output goes to ${step_name}.md", &namespace).unwrap(),
            "output goes to report.md"
        );
    }

    #[test]
    fn test_render_non_string_values_use_json_form() {
        let namespace = ns(&[("depth", serde_json::json!(30))]);
        assert_eq!(render("--depth ${depth}", &namespace).unwrap(), "--depth 30");
    }

    #[test]
    fn test_render_undefined_variable_errors() {
        let err = render("${missing}", &HashMap::new()).unwrap_err();
        assert_eq!(err, TemplateError::Undefined("missing".to_string()));
    }

    #[test]
    fn test_render_unterminated_errors() {
        let err = render("${oops", &HashMap::new()).unwrap_err();
        assert_eq!(err, TemplateError::Unterminated);
    }

    #[test]
    fn test_render_leaves_plain_dollars_alone() {
        let namespace = ns(&[("name", serde_json::json!("x"))]);
        assert_eq!(
            render("echo $HOME and ${name} and $$PATH", &namespace).unwrap(),
            "echo $HOME and x and $PATH"
        );
    }

    #[test]
    fn test_render_is_pure() {
        let namespace = ns(&[("a", serde_json::json!("1"))]);
        let first = render("${a}${a}", &namespace).unwrap();
        let second = render("${a}${a}", &namespace).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "11");
    }
}
