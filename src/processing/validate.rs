use regex::Regex;
use serde_json::Value;

use super::clean::compile;
use crate::cli::config::ValidationRules;
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Validator {
    required: bool,
    min_length: Option<usize>,
    max_length: Option<usize>,
    /// Anchored at the start only, like a prefix match
    pattern: Option<Regex>,
}

impl Validator {
    pub fn new(rules: &ValidationRules) -> Result<Self, ConfigError> {
        let pattern = match &rules.pattern {
            Some(p) => {
                // Surface errors against the pattern as written
                compile(p)?;
                Some(compile(&format!("^(?:{})", p))?)
            }
            None => None,
        };
        Ok(Self {
            required: rules.required,
            min_length: rules.min_length,
            max_length: rules.max_length,
            pattern,
        })
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        if is_empty(value) {
            return !self.required;
        }

        let text = string_form(value);
        let len = text.chars().count();
        if self.min_length.is_some_and(|min| len < min) {
            return false;
        }
        if self.max_length.is_some_and(|max| len > max) {
            return false;
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(&text),
            None => true,
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Text that length and pattern checks run against
fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
