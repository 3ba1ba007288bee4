//! Assistant model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{new_id, ASSISTANT_PREFIX};
use crate::store::Entity;

/// A function tool the assistant may ask the client to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema describing the function arguments
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// An assistant configuration that runs execute against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: Option<String>,
    /// Model identifier handed to the executor
    pub model: String,
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    pub created_at: DateTime<Utc>,
}

impl Assistant {
    /// Create a new assistant for the given model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: new_id(ASSISTANT_PREFIX),
            name: None,
            model: model.into(),
            instructions: None,
            tools: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolSchema) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }
}

impl Entity for Assistant {
    const KIND: &'static str = "assistant";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Partial update applied by `AssistantRegistry::modify`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantUpdate {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ToolSchema>>,
}
