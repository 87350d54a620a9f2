use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder pattern is valid"))
}

/// Resolves `{{dot.path}}` placeholders against a JSON scope.
///
/// Resolution never fails: a path that does not lead anywhere renders as an
/// empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateResolver;

impl TemplateResolver {
    pub fn new() -> Self {
        Self
    }

    /// Walk `path` through nested objects. Empty segments are skipped, so
    /// `a..b` reads the same as `a.b`.
    pub fn resolve<'a>(&self, path: &str, scope: &'a Value) -> Option<&'a Value> {
        let mut current = scope;
        for part in path.split('.').filter(|p| !p.is_empty()) {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Render every string leaf of `value`, keeping its shape.
    pub fn render(&self, value: &Value, scope: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.render_str(s, scope)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render(v, scope)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render(v, scope)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn render_str(&self, template: &str, scope: &Value) -> String {
        placeholder()
            .replace_all(template, |caps: &Captures<'_>| {
                self.resolve(caps[1].trim(), scope)
                    .map(stringify)
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

/// Text form of a resolved value: strings verbatim, null as empty, anything
/// else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
