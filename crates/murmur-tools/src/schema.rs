// ABOUTME: Fluent builder for the JSON schemas advertised with each tool.
// ABOUTME: Produces plain serde_json values in JSON Schema draft-07 shape.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: Map<String, Value>,
}

impl SchemaBuilder {
    fn typed(kind: &str) -> Self {
        let mut schema = Map::new();
        schema.insert("type".to_string(), Value::String(kind.to_string()));
        Self { schema }
    }

    pub fn object() -> Self {
        let mut builder = Self::typed("object");
        builder
            .schema
            .insert("properties".to_string(), Value::Object(Map::new()));
        builder
    }

    pub fn string() -> Self {
        Self::typed("string")
    }

    pub fn integer() -> Self {
        Self::typed("integer")
    }

    pub fn boolean() -> Self {
        Self::typed("boolean")
    }

    pub fn array(items: SchemaBuilder) -> Self {
        let mut builder = Self::typed("array");
        builder.schema.insert("items".to_string(), items.build());
        builder
    }

    /// Any JSON value.
    pub fn any() -> Self {
        Self { schema: Map::new() }
    }

    pub fn description(mut self, text: &str) -> Self {
        self.schema
            .insert("description".to_string(), Value::String(text.to_string()));
        self
    }

    pub fn enumerated(mut self, values: &[&str]) -> Self {
        self.schema.insert("enum".to_string(), json!(values));
        self
    }

    pub fn minimum(mut self, min: i64) -> Self {
        self.schema.insert("minimum".to_string(), json!(min));
        self
    }

    pub fn property(mut self, name: &str, schema: SchemaBuilder) -> Self {
        if let Some(Value::Object(props)) = self.schema.get_mut("properties") {
            props.insert(name.to_string(), schema.build());
        }
        self
    }

    pub fn required(mut self, names: &[&str]) -> Self {
        self.schema.insert("required".to_string(), json!(names));
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_schema() {
        let schema = SchemaBuilder::object()
            .property("to", SchemaBuilder::string().description("Recipient"))
            .property(
                "topics",
                SchemaBuilder::array(SchemaBuilder::string()),
            )
            .required(&["to"])
            .build();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["to"]["description"], "Recipient");
        assert_eq!(schema["properties"]["topics"]["items"]["type"], "string");
        assert_eq!(schema["required"], json!(["to"]));
    }

    #[test]
    fn test_enum_and_any() {
        let schema = SchemaBuilder::string().enumerated(&["a", "b"]).build();
        assert_eq!(schema["enum"], json!(["a", "b"]));
        assert_eq!(SchemaBuilder::any().build(), json!({}));
    }
}
