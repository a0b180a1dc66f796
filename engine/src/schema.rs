//! Schema validation for collection values.
//!
//! The collection layer only depends on the [`Validator`] trait; any schema
//! system can sit behind it. The bundled implementation is a flat field-level
//! schema: named fields with a type and a required flag, unknown fields
//! allowed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Human-readable description of the failure.
    pub message: String,
    /// Dotted path of the offending field, when one can be named.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Issue {
    /// Create an issue for a named field.
    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create an issue with no field location.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }
}

/// Every failure a validator found in one value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Issues(pub Vec<Issue>);

impl fmt::Display for Issues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match &issue.path {
                Some(path) => write!(f, "{}: {}", path, issue.message)?,
                None => f.write_str(&issue.message)?,
            }
        }
        Ok(())
    }
}

/// Validation contract consumed by collections.
///
/// On success the validator returns the value to store, which may be a
/// transformed or defaulted copy of the input.
pub trait Validator: Send + Sync {
    /// Validate `value`, returning the value to store or the issues found.
    fn validate(&self, value: &Value) -> Result<Value, Issues>;
}

/// Field types supported by the bundled schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    fn check(&self, value: Option<&Value>, issues: &mut Vec<Issue>) {
        match value {
            None | Some(Value::Null) => {
                if self.required {
                    issues.push(Issue::at(&self.name, "missing required field"));
                }
            }
            Some(value) => self.check_type(value, issues),
        }
    }

    fn check_type(&self, value: &Value, issues: &mut Vec<Issue>) {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if !valid {
            issues.push(Issue::at(
                &self.name,
                format!(
                    "expected {}, got {}",
                    self.field_type,
                    json_type_name(value)
                ),
            ));
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// The bundled field-level schema for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl CollectionSchema {
    /// Create a schema from field definitions.
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }
}

impl Validator for CollectionSchema {
    fn validate(&self, value: &Value) -> Result<Value, Issues> {
        let Some(object) = value.as_object() else {
            return Err(Issues(vec![Issue::new("value must be an object")]));
        };

        let mut issues = Vec::new();
        for field in &self.fields {
            field.check(object.get(&field.name), &mut issues);
        }

        if issues.is_empty() {
            Ok(value.clone())
        } else {
            Err(Issues(issues))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_schema() -> CollectionSchema {
        CollectionSchema::new(vec![
            FieldDef::required("name", FieldType::String),
            FieldDef::required("age", FieldType::Int),
            FieldDef::optional("email", FieldType::String),
        ])
    }

    #[test]
    fn validate_valid_value() {
        let schema = test_schema();
        assert!(schema.validate(&json!({"name": "Alice", "age": 30})).is_ok());
        assert!(schema
            .validate(&json!({"name": "Bob", "age": 25, "email": "bob@example.com"}))
            .is_ok());
    }

    #[test]
    fn validate_returns_the_stored_value() {
        let schema = test_schema();
        let value = json!({"name": "Alice", "age": 30});
        assert_eq!(schema.validate(&value).unwrap(), value);
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = test_schema();
        let issues = schema.validate(&json!({"name": "Alice"})).unwrap_err();
        assert_eq!(issues.0.len(), 1);
        assert_eq!(issues.0[0].path.as_deref(), Some("age"));
    }

    #[test]
    fn validate_null_counts_as_missing() {
        let schema = test_schema();
        let issues = schema
            .validate(&json!({"name": null, "age": 30}))
            .unwrap_err();
        assert_eq!(issues.0[0].path.as_deref(), Some("name"));
    }

    #[test]
    fn validate_wrong_type() {
        let schema = test_schema();
        let issues = schema
            .validate(&json!({"name": "Alice", "age": "thirty"}))
            .unwrap_err();
        assert_eq!(issues.to_string(), "age: expected Int, got String");
    }

    #[test]
    fn validate_accumulates_all_issues() {
        let schema = test_schema();
        let issues = schema.validate(&json!({"age": "thirty"})).unwrap_err();
        assert_eq!(issues.0.len(), 2);
    }

    #[test]
    fn validate_non_object_root() {
        let schema = test_schema();
        let issues = schema.validate(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(issues.to_string(), "value must be an object");
    }

    #[test]
    fn unknown_fields_are_allowed() {
        let schema = test_schema();
        assert!(schema
            .validate(&json!({"name": "Alice", "age": 30, "extra": true}))
            .is_ok());
    }

    #[test]
    fn json_field_accepts_any() {
        let schema = CollectionSchema::new(vec![FieldDef::required("data", FieldType::Json)]);
        for value in [
            json!({"data": "string"}),
            json!({"data": 123}),
            json!({"data": true}),
            json!({"data": [1, 2, 3]}),
            json!({"data": {"nested": "object"}}),
        ] {
            assert!(schema.validate(&value).is_ok());
        }
    }

    #[test]
    fn schema_serialization() {
        let schema = test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: CollectionSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
