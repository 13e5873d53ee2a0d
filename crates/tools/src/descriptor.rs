//! Tool descriptors.

use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Validator;
use llm::messages::{ToolCapability, ToolDefinition};
use serde_json::Value;

use crate::{ToolError, UserContext, schema::check_strict_subset};

/// Executable behavior behind a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool under the calling user's identity.
    ///
    /// Arguments arrive schema-validated. Implementations must be
    /// cancellable; side-effecting handlers record a pending marker before
    /// acting so a retry can detect prior success.
    async fn run(&self, ctx: &UserContext, args: Value) -> Result<Value, ToolError>;
}

/// A registered tool: schema, capability class, and handler.
pub struct ToolDescriptor {
    name: String,
    description: String,
    parameters_schema: Value,
    capability: ToolCapability,
    validator: Validator,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// Build a descriptor, verifying the schema subset and compiling the
    /// argument validator.
    pub fn new(
        name: &str,
        description: &str,
        parameters_schema: Value,
        capability: ToolCapability,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<Self, String> {
        check_strict_subset(&parameters_schema)?;

        let validator = jsonschema::validator_for(&parameters_schema)
            .map_err(|e| format!("schema for '{name}' does not compile: {e}"))?;

        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters_schema,
            capability,
            validator,
            handler,
        })
    }

    /// Globally unique snake_case name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability class.
    pub fn capability(&self) -> ToolCapability {
        self.capability
    }

    /// The canonical definition handed to provider adapters.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters_schema.clone(),
            strict: true,
            capability: self.capability,
        }
    }

    pub(crate) fn validate(&self, args: &Value) -> Result<(), ToolError> {
        if let Err(error) = self.validator.validate(args) {
            return Err(ToolError::ArgumentInvalid(format!(
                "{error} (at {path})",
                path = error.instance_path
            )));
        }

        Ok(())
    }

    pub(crate) fn handler(&self) -> Arc<dyn ToolHandler> {
        self.handler.clone()
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}
