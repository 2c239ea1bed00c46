use tabwire_common::FromMessage;

use crate::schema::FieldType;

/// Errors raised while assembling a catalog.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("operation '{0}' is registered twice")]
    DuplicateOperation(String),
    #[error("invalid pattern for {operation}.{field}: {source}")]
    InvalidPattern {
        operation: String,
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("{0}")]
    Message(String),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

tabwire_common::impl_context!();

/// Why a set of arguments was refused for an operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("arguments must be an object, got {actual}")]
    NotAnObject { actual: &'static str },
    #[error("missing required field '{field}'")]
    MissingField { field: String },
    #[error("field '{field}' must be {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        actual: &'static str,
    },
    #[error("field '{field}' is {value}, outside {}", describe_bounds(.minimum, .maximum))]
    OutOfRange {
        field: String,
        value: f64,
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    #[error("field '{field}' has length {length}, outside {}", describe_lengths(.min_length, .max_length))]
    LengthOutOfRange {
        field: String,
        length: usize,
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    #[error("field '{field}' does not match pattern {pattern}")]
    PatternMismatch { field: String, pattern: String },
    #[error("field '{field}' must be one of [{}]", .allowed.join(", "))]
    EnumViolation { field: String, allowed: Vec<String> },
}

impl ValidationError {
    /// The offending field, when the failure is about one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::UnknownOperation(_) | Self::NotAnObject { .. } => None,
            Self::MissingField { field }
            | Self::TypeMismatch { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::LengthOutOfRange { field, .. }
            | Self::PatternMismatch { field, .. }
            | Self::EnumViolation { field, .. } => Some(field),
        }
    }

    /// Stable snake_case tag, used in JSON-RPC error data.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownOperation(_) => "unknown_operation",
            Self::NotAnObject { .. } => "not_an_object",
            Self::MissingField { .. } => "missing_field",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::OutOfRange { .. } => "out_of_range",
            Self::LengthOutOfRange { .. } => "length_out_of_range",
            Self::PatternMismatch { .. } => "pattern_mismatch",
            Self::EnumViolation { .. } => "enum_violation",
        }
    }
}

fn describe_bounds(minimum: &Option<f64>, maximum: &Option<f64>) -> String {
    match (minimum, maximum) {
        (Some(lo), Some(hi)) => format!("[{lo}, {hi}]"),
        (Some(lo), None) => format!("[{lo}, ∞)"),
        (None, Some(hi)) => format!("(-∞, {hi}]"),
        (None, None) => "any range".into(),
    }
}

fn describe_lengths(min: &Option<usize>, max: &Option<usize>) -> String {
    match (min, max) {
        (Some(lo), Some(hi)) => format!("{lo}..={hi}"),
        (Some(lo), None) => format!("{lo}.."),
        (None, Some(hi)) => format!("..={hi}"),
        (None, None) => "any length".into(),
    }
}
