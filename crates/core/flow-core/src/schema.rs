/*!
# Input and Output Schemas

Declared shapes for node inputs and outputs, with per-field validation
rules and the limited type coercion applied when inputs are resolved.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value types a schema field may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    /// Whether a JSON value satisfies this type.
    ///
    /// Coercion is limited: a JSON number is accepted for `Number`, a JSON
    /// string for `String`. Nothing else coerces.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }

    /// Name used in violation messages
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }
}

/// Validation rules attached to an input field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Minimum length (strings and arrays)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Maximum length (strings and arrays)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Numeric minimum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Numeric maximum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Regex pattern (strings)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Allowed values (strings)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

impl ValidationRule {
    /// Check a value against this rule. Returns a violation message on failure.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if let Some(s) = value.as_str() {
            if let Some(min) = self.min_length {
                if s.chars().count() < min {
                    return Err(format!("length {} is below minimum {}", s.chars().count(), min));
                }
            }
            if let Some(max) = self.max_length {
                if s.chars().count() > max {
                    return Err(format!("length {} exceeds maximum {}", s.chars().count(), max));
                }
            }
            if let Some(ref pattern) = self.pattern {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
                if !re.is_match(s) {
                    return Err(format!("value does not match pattern '{}'", pattern));
                }
            }
            if let Some(ref allowed) = self.allowed_values {
                if !allowed.iter().any(|a| a == s) {
                    return Err(format!("value '{}' is not one of {:?}", s, allowed));
                }
            }
        }

        if let Some(arr) = value.as_array() {
            if let Some(min) = self.min_length {
                if arr.len() < min {
                    return Err(format!("length {} is below minimum {}", arr.len(), min));
                }
            }
            if let Some(max) = self.max_length {
                if arr.len() > max {
                    return Err(format!("length {} exceeds maximum {}", arr.len(), max));
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Err(format!("{} is below minimum {}", n, min));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(format!("{} exceeds maximum {}", n, max));
                }
            }
        }

        Ok(())
    }
}

/// A declared input field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,

    /// Declared type
    pub field_type: FieldType,

    /// Whether the field must be present after resolution
    #[serde(default)]
    pub required: bool,

    /// Fill-in for missing optional inputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Optional validation rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,
}

impl FieldSpec {
    /// Create an optional field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default: None,
            validation: None,
        }
    }

    /// Mark required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set a default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Attach validation rules
    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation = Some(rule);
        self
    }

    /// Validate a resolved value against this spec.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if !self.field_type.matches(value) {
            return Err(format!("expected {}, got {}", self.field_type.name(), json_kind(value)));
        }
        if let Some(ref rule) = self.validation {
            rule.check(value)?;
        }
        Ok(())
    }
}

/// A declared output field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputField {
    /// Field name
    pub name: String,

    /// Declared type
    pub field_type: FieldType,
}

impl OutputField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
