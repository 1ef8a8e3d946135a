use regex::Regex;

use crate::cli::config::CleaningRules;
use crate::error::ConfigError;

/// Text cleaning for one field, with its patterns compiled up front
#[derive(Debug, Clone)]
pub struct Cleaner {
    rules: CleaningRules,
    special_chars: Option<Regex>,
    replacements: Vec<(Regex, String)>,
}

impl Cleaner {
    pub fn new(rules: &CleaningRules) -> Result<Self, ConfigError> {
        let special_chars = if rules.remove_special_chars {
            Some(compile(r"[^\w\s-]")?)
        } else {
            None
        };

        let replacements = rules
            .regex_replace
            .iter()
            .map(|(pattern, replacement)| Ok((compile(pattern)?, replacement.clone())))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            rules: rules.clone(),
            special_chars,
            replacements,
        })
    }

    /// Apply the enabled operations in their fixed order
    pub fn clean(&self, text: &str) -> String {
        let rules = &self.rules;
        let mut text = if rules.trim { text.trim().to_string() } else { text.to_string() };

        if rules.lowercase {
            text = text.to_lowercase();
        }
        if rules.uppercase {
            text = text.to_uppercase();
        }
        if rules.remove_newlines {
            text = text.replace(['\n', '\r'], " ");
        }
        if rules.remove_extra_spaces {
            text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        if let Some(special) = &self.special_chars {
            text = special.replace_all(&text, "").into_owned();
        }
        for (pattern, replacement) in &self.replacements {
            text = pattern.replace_all(&text, replacement.as_str()).into_owned();
        }

        if rules.trim {
            text = text.trim().to_string();
        }
        text
    }
}

pub(crate) fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}
