//! Strict parameter-schema construction.
//!
//! Every tool schema is a draft-07 subset: an `object` root, every property
//! listed in `required`, `additionalProperties: false`, and nullable enums
//! carrying the literal `null`. [`SchemaBuilder`] produces compliant schemas
//! by construction; [`check_strict_subset`] re-verifies any schema handed to
//! the registry.

use serde_json::{Map, Value, json};

/// Builder for strict tool parameter schemas.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    /// An empty object schema.
    pub fn new() -> Self {
        Self::default()
    }

    fn property(mut self, name: &str, schema: Value) -> Self {
        self.properties.insert(name.to_string(), schema);
        self.required.push(name.to_string());
        self
    }

    /// A required string property.
    pub fn string(self, name: &str, description: &str) -> Self {
        self.property(name, json!({"type": "string", "description": description}))
    }

    /// A string property that accepts `null`.
    pub fn nullable_string(self, name: &str, description: &str) -> Self {
        self.property(name, json!({"type": ["string", "null"], "description": description}))
    }

    /// A required number property.
    pub fn number(self, name: &str, description: &str) -> Self {
        self.property(name, json!({"type": "number", "description": description}))
    }

    /// A number property that accepts `null`.
    pub fn nullable_number(self, name: &str, description: &str) -> Self {
        self.property(name, json!({"type": ["number", "null"], "description": description}))
    }

    /// A required boolean property.
    pub fn boolean(self, name: &str, description: &str) -> Self {
        self.property(name, json!({"type": "boolean", "description": description}))
    }

    /// A required string-enum property.
    pub fn string_enum(self, name: &str, description: &str, values: &[&str]) -> Self {
        self.property(name, json!({"type": "string", "enum": values, "description": description}))
    }

    /// A string-enum property that accepts `null`; the enum itself carries
    /// the literal `null` member.
    pub fn nullable_string_enum(self, name: &str, description: &str, values: &[&str]) -> Self {
        let mut members: Vec<Value> = values.iter().map(|value| json!(value)).collect();
        members.push(Value::Null);

        self.property(
            name,
            json!({"type": ["string", "null"], "enum": members, "description": description}),
        )
    }

    /// A required array-of-strings property.
    pub fn string_array(self, name: &str, description: &str) -> Self {
        self.property(
            name,
            json!({"type": "array", "items": {"type": "string"}, "description": description}),
        )
    }

    /// A required two-dimensional array of strings (spreadsheet values).
    pub fn string_grid(self, name: &str, description: &str) -> Self {
        self.property(
            name,
            json!({
                "type": "array",
                "items": {"type": "array", "items": {"type": "string"}},
                "description": description
            }),
        )
    }

    /// Finish the schema.
    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
            "additionalProperties": false
        })
    }
}

/// Verify a schema satisfies the strict subset the registry requires.
pub fn check_strict_subset(schema: &Value) -> Result<(), String> {
    let object = schema.as_object().ok_or("schema root must be an object")?;

    if object.get("type") != Some(&json!("object")) {
        return Err("schema root must have type \"object\"".to_string());
    }

    if object.get("additionalProperties") != Some(&json!(false)) {
        return Err("schema must set additionalProperties: false".to_string());
    }

    let properties = object
        .get("properties")
        .and_then(Value::as_object)
        .ok_or("schema must declare properties")?;

    let required: Vec<&str> = object
        .get("required")
        .and_then(Value::as_array)
        .ok_or("schema must declare required")?
        .iter()
        .filter_map(Value::as_str)
        .collect();

    for name in properties.keys() {
        if !required.contains(&name.as_str()) {
            return Err(format!("property '{name}' missing from required"));
        }
    }

    for name in &required {
        if !properties.contains_key(*name) {
            return Err(format!("required lists unknown property '{name}'"));
        }
    }

    for (name, property) in properties {
        let nullable = property
            .get("type")
            .and_then(Value::as_array)
            .is_some_and(|types| types.iter().any(|t| t == &json!("null")));

        if let Some(members) = property.get("enum").and_then(Value::as_array)
            && nullable
            && !members.iter().any(Value::is_null)
        {
            return Err(format!("nullable enum '{name}' must include the null member"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_output_satisfies_the_subset() {
        let schema = SchemaBuilder::new()
            .string("query", "Search query")
            .nullable_string_enum("scope", "Restrict by document type", &["documents", "spreadsheets"])
            .nullable_number("limit", "Maximum results")
            .build();

        check_strict_subset(&schema).unwrap();

        assert_eq!(schema["required"], json!(["query", "scope", "limit"]));
        assert_eq!(schema["additionalProperties"], json!(false));

        let members = schema["properties"]["scope"]["enum"].as_array().unwrap();
        assert!(members.iter().any(Value::is_null));
    }

    #[test]
    fn missing_required_entry_is_rejected() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": [],
            "additionalProperties": false
        });

        assert!(check_strict_subset(&schema).is_err());
    }

    #[test]
    fn open_schemas_are_rejected() {
        let schema = json!({
            "type": "object",
            "properties": {},
            "required": []
        });

        assert!(check_strict_subset(&schema).is_err());
    }

    #[test]
    fn nullable_enum_without_null_member_is_rejected() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mode": {"type": ["string", "null"], "enum": ["a", "b"]}
            },
            "required": ["mode"],
            "additionalProperties": false
        });

        assert!(check_strict_subset(&schema).is_err());
    }
}
