//! Field-level input schemas and their JSON-Schema rendering.

use std::fmt;

use {
    serde::Serialize,
    serde_json::{Map, Value, json},
};

/// Primitive JSON type a field must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => f.write_str("an integer"),
            Self::Array | Self::Object => write!(f, "an {}", self.as_str()),
            other => write!(f, "a {}", other.as_str()),
        }
    }
}

/// Constraints on a single argument.
///
/// `min_length`/`max_length` count characters for strings and items for arrays.
/// Numeric bounds are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub kind: FieldType,
    pub description: String,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub allowed: Vec<String>,
}

impl FieldSchema {
    fn of(kind: FieldType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            pattern: None,
            allowed: Vec::new(),
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::of(FieldType::String, description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::of(FieldType::Number, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::of(FieldType::Integer, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::of(FieldType::Boolean, description)
    }

    pub fn array(description: impl Into<String>) -> Self {
        Self::of(FieldType::Array, description)
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self::of(FieldType::Object, description)
    }

    #[must_use]
    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    #[must_use]
    pub fn min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    #[must_use]
    pub fn length(mut self, min_length: usize, max_length: usize) -> Self {
        self.min_length = Some(min_length);
        self.max_length = Some(max_length);
        self
    }

    #[must_use]
    pub fn max_len(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    #[must_use]
    pub fn min_len(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    /// JSON-Schema fragment for this field.
    pub fn to_json_schema(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), json!(self.kind.as_str()));
        if !self.description.is_empty() {
            out.insert("description".into(), json!(self.description));
        }
        if let Some(min) = self.minimum {
            out.insert("minimum".into(), number(self.kind, min));
        }
        if let Some(max) = self.maximum {
            out.insert("maximum".into(), number(self.kind, max));
        }
        let (min_key, max_key) = match self.kind {
            FieldType::Array => ("minItems", "maxItems"),
            _ => ("minLength", "maxLength"),
        };
        if let Some(min) = self.min_length {
            out.insert(min_key.into(), json!(min));
        }
        if let Some(max) = self.max_length {
            out.insert(max_key.into(), json!(max));
        }
        if let Some(pattern) = &self.pattern {
            out.insert("pattern".into(), json!(pattern));
        }
        if !self.allowed.is_empty() {
            out.insert("enum".into(), json!(self.allowed));
        }
        Value::Object(out)
    }
}

// Integer bounds render as integers so clients don't see `0.0`.
fn number(kind: FieldType, value: f64) -> Value {
    if kind == FieldType::Integer && value.fract() == 0.0 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub schema: FieldSchema,
    pub required: bool,
}

/// Object schema for an operation's arguments. Property order is declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    pub properties: Vec<Property>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.properties.push(Property {
            name: name.into(),
            schema,
            required: true,
        });
        self
    }

    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.properties.push(Property {
            name: name.into(),
            schema,
            required: false,
        });
        self
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    /// Render as a JSON-Schema object. Extra properties stay allowed.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|p| (p.name.clone(), p.schema.to_json_schema()))
            .collect();
        let required: Vec<&str> = self.required_names().collect();
        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }
}
