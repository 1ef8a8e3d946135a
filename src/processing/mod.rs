pub mod clean;
pub mod coerce;
pub mod expr;
pub mod validate;

use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::cli::config::{FieldType, ProcessingRules, TargetType};
use crate::error::{ConfigError, ProcessingError};
use crate::extract::Record;

pub use clean::Cleaner;
pub use expr::{EvalError, Expression};
pub use validate::Validator;

/// Post-extraction normalization: coerce, clean, transform, validate, prune.
///
/// Built once per job from its processing rules; every pattern and expression
/// is compiled here so a bad rule is a configuration error, not a per-record one.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    field_types: Vec<(String, FieldType)>,
    cleaners: Vec<(String, Cleaner)>,
    transformations: Vec<(String, Expression)>,
    validators: Vec<(String, Validator)>,
    drop_fields: Vec<String>,
}

impl RuleEngine {
    pub fn new(rules: &ProcessingRules) -> Result<Self, ConfigError> {
        let cleaners = rules
            .text_cleaning
            .iter()
            .map(|(field, r)| Ok((field.clone(), Cleaner::new(r)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let transformations = rules
            .transformations
            .iter()
            .map(|(field, source)| {
                let expression = Expression::parse(source).map_err(|e| ConfigError::Expression {
                    field: field.clone(),
                    reason: e.to_string(),
                })?;
                Ok((field.clone(), expression))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let validators = rules
            .validations
            .iter()
            .map(|(field, r)| Ok((field.clone(), Validator::new(r)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            field_types: rules.field_types.iter().map(|(f, t)| (f.clone(), t.clone())).collect(),
            cleaners,
            transformations,
            validators,
            drop_fields: rules.drop_fields.clone(),
        })
    }

    /// Process every record; a record that fails is logged and left out
    pub fn process(&self, records: Vec<Record>) -> Vec<Record> {
        let total = records.len();
        let processed: Vec<Record> = records
            .into_iter()
            .enumerate()
            .filter_map(|(i, record)| match self.process_record(record) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping record {}: {}", i + 1, e);
                    None
                }
            })
            .collect();

        debug!("Processed {} of {} records", processed.len(), total);
        processed
    }

    pub fn process_record(&self, mut record: Record) -> Result<Record, ProcessingError> {
        // Coerced dates keep their ISO text through cleaning
        let mut temporal: HashSet<&str> = HashSet::new();

        for (field, field_type) in &self.field_types {
            let Some(value) = record.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let coerced = coerce::coerce(field, value, field_type)?;
            if matches!(field_type.target, TargetType::Date | TargetType::Datetime) && coerced.is_string() {
                temporal.insert(field.as_str());
            }
            record.insert(field.clone(), coerced);
        }

        for (field, cleaner) in &self.cleaners {
            if temporal.contains(field.as_str()) {
                continue;
            }
            if let Some(Value::String(text)) = record.get(field) {
                let cleaned = cleaner.clean(text);
                record.insert(field.clone(), Value::String(cleaned));
            }
        }

        for (field, expression) in &self.transformations {
            let Some(value) = record.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            match expression.evaluate(value, &record) {
                Ok(result) => {
                    record.insert(field.clone(), result);
                }
                Err(EvalError::NonFinite) => {
                    return Err(ProcessingError::NonFinite { field: field.clone() });
                }
                Err(e) => {
                    warn!(
                        "Transformation '{}' failed for field '{}': {}. Keeping original value.",
                        expression.source(),
                        field,
                        e
                    );
                }
            }
        }

        for (field, validator) in &self.validators {
            let valid = match record.get(field) {
                Some(value) => validator.is_valid(value),
                None => !validator.is_required(),
            };
            if !valid {
                debug!("Field '{}' failed validation", field);
                record.insert(field.clone(), Value::Null);
            }
        }

        if !self.drop_fields.is_empty() {
            record = record
                .into_iter()
                .filter(|(key, _)| !self.drop_fields.contains(key))
                .collect();
        }

        Ok(record)
    }
}
