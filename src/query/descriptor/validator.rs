use std::collections::HashSet;

use serde_json::{json, Value};
use thiserror::Error;

use super::QueryDescriptor;
use crate::query::response::SETTINGS_KEY;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid descriptor schema: {0}")]
    InvalidSchema(String),
    #[error(
        "{} descriptor(s) failed validation",
        .0.iter().filter(|e| !e.is_empty()).count()
    )]
    Rejected(Vec<String>),
}

/// Checks a raw descriptor before it is deserialized
pub trait DescriptorValidator: Send + Sync {
    /// Returns every problem found; an empty list means the descriptor is valid
    fn validate(&self, descriptor: &Value) -> Vec<String>;
}

fn descriptor_schema() -> Value {
    let string_or_list = json!({
        "oneOf": [
            {"type": "string"},
            {"type": "array", "items": {"type": "string"}}
        ]
    });

    json!({
        "type": "object",
        "required": ["id"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "table": string_or_list,
            "index": string_or_list,
            "type": {"enum": ["search", "suggestion", "term", "range"]},
            "includeFields": {"type": "array", "items": {"type": "string"}},
            "dataField": {
                "oneOf": [
                    {"type": "string"},
                    {
                        "type": "array",
                        "items": {
                            "oneOf": [
                                {"type": "string"},
                                {
                                    "type": "object",
                                    "required": ["field"],
                                    "properties": {
                                        "field": {"type": "string"},
                                        "weight": {"type": "number"}
                                    }
                                }
                            ]
                        }
                    }
                ]
            },
            "queryFormat": {"enum": ["or", "and"]},
            "sortField": {"type": "string"},
            "sortBy": {"type": "string"},
            "where": {"type": "string"},
            "size": {"type": "integer", "minimum": 0},
            "from": {"type": "integer", "minimum": 0},
            "defaultQuery": {
                "type": "object",
                "properties": {"query": {"type": "string"}}
            },
            "execute": {"type": "boolean"},
            "vectorDataField": {"type": "string"},
            "queryVector": {"type": "array", "items": {"type": "number"}},
            "aggregations": {
                "type": "array",
                "items": {"enum": ["min", "max", "histogram"]},
                "uniqueItems": true
            },
            "interval": {"type": "number", "exclusiveMinimum": 0},
            "aggregationSize": {"type": "integer", "minimum": 1}
        }
    })
}

/// Validates descriptors against the built-in JSON schema
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new() -> Result<Self, ValidationError> {
        Self::with_schema(&descriptor_schema())
    }

    /// Uses a caller-supplied schema instead of the built-in one
    pub fn with_schema(schema: &Value) -> Result<Self, ValidationError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| ValidationError::InvalidSchema(e.to_string()))?;
        Ok(Self { validator })
    }
}

impl DescriptorValidator for SchemaValidator {
    fn validate(&self, descriptor: &Value) -> Vec<String> {
        self.validator
            .iter_errors(descriptor)
            .map(|e| e.to_string())
            .collect()
    }
}

/// Validates a whole batch. Any failure rejects the batch with one message
/// per position, empty for descriptors that passed.
pub fn validate_batch(
    validator: &dyn DescriptorValidator,
    raw: &[Value],
) -> Result<Vec<QueryDescriptor>, ValidationError> {
    let mut messages = Vec::with_capacity(raw.len());
    let mut descriptors = Vec::with_capacity(raw.len());
    let mut seen_ids = HashSet::new();

    for value in raw {
        let mut errors = validator.validate(value);
        if errors.is_empty() {
            match serde_json::from_value::<QueryDescriptor>(value.clone()) {
                Ok(descriptor) => {
                    if descriptor.id() == SETTINGS_KEY {
                        errors.push(format!("id `{}` is reserved", SETTINGS_KEY));
                    } else if !seen_ids.insert(descriptor.id().to_string()) {
                        errors.push(format!("duplicate id `{}`", descriptor.id()));
                    }
                    descriptors.push(descriptor);
                }
                Err(e) => errors.push(e.to_string()),
            }
        }
        messages.push(errors.join(","));
    }

    if messages.iter().any(|m| !m.is_empty()) {
        return Err(ValidationError::Rejected(messages));
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SchemaValidator {
        SchemaValidator::new().unwrap()
    }

    #[test]
    fn test_valid_descriptor() {
        let errors = validator().validate(&json!({
            "id": "books",
            "table": "good-books",
            "dataField": ["title", {"field": "author", "weight": 2}],
            "value": "dune"
        }));
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_missing_id() {
        let errors = validator().validate(&json!({"table": "t"}));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_unknown_type_and_aggregation() {
        let errors = validator().validate(&json!({
            "id": "q",
            "type": "fuzzy",
            "aggregations": ["avg"]
        }));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_batch_reports_per_position() {
        let raw = vec![
            json!({"id": "ok", "table": "t"}),
            json!({"id": 5}),
        ];
        match validate_batch(&validator(), &raw) {
            Err(ValidationError::Rejected(messages)) => {
                assert_eq!(messages.len(), 2);
                assert!(messages[0].is_empty());
                assert!(!messages[1].is_empty());
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_rejects_duplicate_ids() {
        let raw = vec![json!({"id": "a"}), json!({"id": "a"})];
        match validate_batch(&validator(), &raw) {
            Err(ValidationError::Rejected(messages)) => {
                assert!(messages[1].contains("duplicate id"));
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_rejects_settings_id() {
        let raw = vec![json!({"id": "a"}), json!({"id": "settings", "table": "t"})];
        match validate_batch(&validator(), &raw) {
            Err(ValidationError::Rejected(messages)) => {
                assert!(messages[0].is_empty());
                assert!(messages[1].contains("reserved"));
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_accepts_valid() {
        let raw = vec![json!({"id": "a", "table": "t"}), json!({"id": "b", "table": "t"})];
        let descriptors = validate_batch(&validator(), &raw).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1].id(), "b");
    }
}
