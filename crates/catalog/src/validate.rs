use {
    regex::Regex,
    serde_json::{Map, Value},
};

use crate::{
    error::ValidationError,
    schema::{FieldSchema, FieldType, InputSchema},
};

static EMPTY: std::sync::LazyLock<Map<String, Value>> = std::sync::LazyLock::new(Map::new);

pub(crate) fn arguments<'a, F>(
    schema: &InputSchema,
    args: &Value,
    pattern_for: F,
) -> Result<(), ValidationError>
where
    F: Fn(&str) -> Option<&'a Regex>,
{
    let object = match args {
        Value::Object(map) => map,
        Value::Null => &*EMPTY,
        other => {
            return Err(ValidationError::NotAnObject {
                actual: json_type(other),
            });
        },
    };

    // Report missing fields before checking the ones that are present.
    for name in schema.required_names() {
        if object.get(name).is_none_or(Value::is_null) {
            return Err(ValidationError::MissingField {
                field: name.to_string(),
            });
        }
    }

    for prop in &schema.properties {
        match object.get(&prop.name) {
            None | Some(Value::Null) => continue,
            Some(value) => field(&prop.name, &prop.schema, value, pattern_for(&prop.name))?,
        }
    }
    Ok(())
}

fn field(
    name: &str,
    schema: &FieldSchema,
    value: &Value,
    pattern: Option<&Regex>,
) -> Result<(), ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        field: name.to_string(),
        expected: schema.kind,
        actual: json_type(value),
    };

    match schema.kind {
        FieldType::String => {
            let s = value.as_str().ok_or_else(mismatch)?;
            check_length(name, schema, s.chars().count())?;
            if let Some(regex) = pattern
                && !regex.is_match(s)
            {
                return Err(ValidationError::PatternMismatch {
                    field: name.to_string(),
                    pattern: regex.as_str().to_string(),
                });
            }
            if !schema.allowed.is_empty() && !schema.allowed.iter().any(|a| a == s) {
                return Err(ValidationError::EnumViolation {
                    field: name.to_string(),
                    allowed: schema.allowed.clone(),
                });
            }
        },
        FieldType::Number => {
            let n = value.as_f64().ok_or_else(mismatch)?;
            check_bounds(name, schema, n)?;
        },
        FieldType::Integer => {
            let n = value.as_f64().ok_or_else(mismatch)?;
            if !(value.is_i64() || value.is_u64()) && n.fract() != 0.0 {
                return Err(ValidationError::TypeMismatch {
                    field: name.to_string(),
                    expected: FieldType::Integer,
                    actual: "a fractional number",
                });
            }
            check_bounds(name, schema, n)?;
        },
        FieldType::Boolean => {
            value.as_bool().ok_or_else(mismatch)?;
        },
        FieldType::Array => {
            let items = value.as_array().ok_or_else(mismatch)?;
            check_length(name, schema, items.len())?;
        },
        FieldType::Object => {
            value.as_object().ok_or_else(mismatch)?;
        },
    }
    Ok(())
}

fn check_bounds(name: &str, schema: &FieldSchema, n: f64) -> Result<(), ValidationError> {
    let below = schema.minimum.is_some_and(|min| n < min);
    let above = schema.maximum.is_some_and(|max| n > max);
    if below || above {
        return Err(ValidationError::OutOfRange {
            field: name.to_string(),
            value: n,
            minimum: schema.minimum,
            maximum: schema.maximum,
        });
    }
    Ok(())
}

fn check_length(name: &str, schema: &FieldSchema, length: usize) -> Result<(), ValidationError> {
    let short = schema.min_length.is_some_and(|min| length < min);
    let long = schema.max_length.is_some_and(|max| length > max);
    if short || long {
        return Err(ValidationError::LengthOutOfRange {
            field: name.to_string(),
            length,
            min_length: schema.min_length,
            max_length: schema.max_length,
        });
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
