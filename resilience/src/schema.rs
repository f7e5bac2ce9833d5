//! Schema descriptors: the expected shape of a structured result.

use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use schemars::JsonSchema;
use serde_json::Value;

use crate::error::ContractError;

/// Top-level JSON shape a schema expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootShape {
    /// `"type": "object"`.
    Object,
    /// `"type": "array"`.
    Array,
    /// Anything else, including schemas without a top-level `type`.
    Any,
}

impl RootShape {
    /// Opening and closing delimiters of a balanced span for this shape.
    #[must_use]
    pub const fn delimiters(self) -> (char, char) {
        match self {
            Self::Array => ('[', ']'),
            Self::Object | Self::Any => ('{', '}'),
        }
    }
}

/// A compiled JSON Schema used to validate extraction output.
///
/// Cheap to clone; the compiled validator is shared.
#[derive(Clone)]
pub struct SchemaDescriptor {
    schema: Arc<Value>,
    validator: Arc<Validator>,
    root: RootShape,
}

impl fmt::Debug for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDescriptor")
            .field("schema", &self.schema)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl SchemaDescriptor {
    /// Compiles `schema`.
    ///
    /// # Errors
    ///
    /// Returns `ContractError::InvalidSchema` if the document is not a valid
    /// JSON Schema.
    pub fn new(schema: Value) -> Result<Self, ContractError> {
        let validator =
            Validator::new(&schema).map_err(|e| ContractError::InvalidSchema(e.to_string()))?;
        let root = match schema.get("type").and_then(Value::as_str) {
            Some("object") => RootShape::Object,
            Some("array") => RootShape::Array,
            _ => RootShape::Any,
        };
        Ok(Self {
            schema: Arc::new(schema),
            validator: Arc::new(validator),
            root,
        })
    }

    /// Derives the schema of `T` with `schemars`.
    pub fn for_type<T: JsonSchema>() -> Result<Self, ContractError> {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|e| ContractError::InvalidSchema(e.to_string()))?;
        Self::new(schema)
    }

    /// The raw schema document.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.schema
    }

    /// The top-level shape the schema expects.
    #[must_use]
    pub const fn root_shape(&self) -> RootShape {
        self.root
    }

    /// Returns true when `instance` satisfies the schema.
    #[must_use]
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Validates `instance`, collecting every violation with its instance path.
    ///
    /// # Examples
    ///
    /// ```
    /// use metanovel_resilience::SchemaDescriptor;
    /// use serde_json::json;
    ///
    /// let schema = SchemaDescriptor::new(json!({
    ///     "type": "object",
    ///     "properties": {"name": {"type": "string"}},
    ///     "required": ["name"]
    /// })).unwrap();
    ///
    /// assert!(schema.validate(&json!({"name": "Ada"})).is_ok());
    /// assert!(schema.validate(&json!({"name": 1})).is_err());
    /// ```
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|error| format!("At path '{}': {}", error.instance_path, error))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
