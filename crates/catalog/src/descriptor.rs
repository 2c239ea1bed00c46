use std::collections::HashMap;

use {
    regex::Regex,
    serde_json::{Value, json},
    tabwire_common::ExecutionKind,
    tabwire_protocol::mcp::ToolDef,
};

use crate::{
    error::{Error, Result, ValidationError},
    schema::InputSchema,
    validate,
};

/// One operation the client may call.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub input: InputSchema,
    pub execution: ExecutionKind,
}

impl OperationDescriptor {
    pub fn local(name: impl Into<String>, description: impl Into<String>, input: InputSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input,
            execution: ExecutionKind::Local,
        }
    }

    pub fn delegated(
        name: impl Into<String>,
        description: impl Into<String>,
        input: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input,
            execution: ExecutionKind::Delegated,
        }
    }

    pub fn is_local(&self) -> bool {
        self.execution == ExecutionKind::Local
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input.to_json_schema(),
        }
    }
}

/// Immutable registry of operations, listed in registration order.
#[derive(Debug)]
pub struct Catalog {
    operations: Vec<OperationDescriptor>,
    index: HashMap<String, usize>,
    /// Compiled field patterns keyed by `(operation index, field name)`.
    patterns: HashMap<(usize, String), Regex>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate names and uncompilable patterns.
    pub fn new(operations: Vec<OperationDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(operations.len());
        let mut patterns = HashMap::new();
        for (i, op) in operations.iter().enumerate() {
            if index.insert(op.name.clone(), i).is_some() {
                return Err(Error::DuplicateOperation(op.name.clone()));
            }
            for prop in &op.input.properties {
                let Some(pattern) = &prop.schema.pattern else {
                    continue;
                };
                let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
                    operation: op.name.clone(),
                    field: prop.name.clone(),
                    source,
                })?;
                patterns.insert((i, prop.name.clone()), regex);
            }
        }
        Ok(Self {
            operations,
            index,
            patterns,
        })
    }

    pub fn list(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&OperationDescriptor> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(|op| op.name.as_str())
    }

    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.operations.iter().map(OperationDescriptor::to_tool_def).collect()
    }

    /// Check `args` against the named operation's schema.
    ///
    /// `null` is treated as an empty argument object. Fields the schema does
    /// not mention are accepted.
    pub fn validate(
        &self,
        name: &str,
        args: &Value,
    ) -> std::result::Result<&OperationDescriptor, ValidationError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| ValidationError::UnknownOperation(name.to_string()))?;
        let op = &self.operations[i];
        validate::arguments(&op.input, args, |field| self.patterns.get(&(i, field.to_string())))?;
        Ok(op)
    }

    /// Compact summary suitable for a read-only resource.
    pub fn summary(&self) -> Value {
        let operations: Vec<Value> = self
            .operations
            .iter()
            .map(|op| {
                json!({
                    "name": op.name,
                    "execution": op.execution,
                    "required": op.input.required_names().collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({
            "count": self.operations.len(),
            "local": self.operations.iter().filter(|op| op.is_local()).count(),
            "operations": operations,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::FieldSchema};

    fn op(name: &str) -> OperationDescriptor {
        OperationDescriptor::delegated(name, "test", InputSchema::new())
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Catalog::new(vec![op("a"), op("b"), op("a")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateOperation(name) if name == "a"));
    }

    #[test]
    fn rejects_bad_patterns() {
        let bad = OperationDescriptor::local(
            "bad",
            "",
            InputSchema::new().required("x", FieldSchema::string("").pattern("(")),
        );
        let err = Catalog::new(vec![bad]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { ref field, .. } if field == "x"));
    }

    #[test]
    fn lookup_and_order_follow_registration() {
        let catalog = Catalog::new(vec![op("z"), op("a"), op("m")]).unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), ["z", "a", "m"]);
        assert_eq!(catalog.get("a").unwrap().name, "a");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn tool_def_carries_schema() {
        let catalog = Catalog::new(vec![op("x")]).unwrap();
        let defs = catalog.tool_defs();
        assert_eq!(defs[0].name, "x");
        assert_eq!(defs[0].input_schema["type"], "object");
    }
}
