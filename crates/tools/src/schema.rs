//! Tool trait and JSON Schema builders

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::ToolError;

/// Name, description and input schema as advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One property of an object schema
#[derive(Debug, Clone)]
pub struct PropertySchema {
    value: Value,
}

impl PropertySchema {
    pub fn string(description: &str) -> Self {
        Self {
            value: json!({"type": "string", "description": description}),
        }
    }

    pub fn integer(description: &str) -> Self {
        Self {
            value: json!({"type": "integer", "description": description}),
        }
    }

    pub fn boolean(description: &str) -> Self {
        Self {
            value: json!({"type": "boolean", "description": description}),
        }
    }
}

/// Builder for an object input schema
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl InputSchema {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: &str, schema: PropertySchema, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema.value);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> ToolSchema;

    /// Reject input missing a required property
    fn validate(&self, input: &Value) -> Result<(), ToolError> {
        let schema = self.schema();
        let Some(required) = schema.input_schema.get("required").and_then(Value::as_array) else {
            return Ok(());
        };
        for field in required.iter().filter_map(Value::as_str) {
            if input.get(field).map_or(true, Value::is_null) {
                return Err(ToolError::invalid_params(format!("{} is required", field)));
            }
        }
        Ok(())
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError>;

    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Required string argument
pub(crate) fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_params(format!("{} must be a string", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_builder() {
        let schema = InputSchema::object()
            .property("path", PropertySchema::string("File path"), true)
            .property("max_lines", PropertySchema::integer("Line cap"), false)
            .build();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["properties"]["max_lines"]["type"], "integer");
        assert_eq!(schema["required"], json!(["path"]));
    }
}
