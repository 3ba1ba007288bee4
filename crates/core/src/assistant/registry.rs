//! Assistant registry backed by the instance store

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use super::model::{Assistant, AssistantUpdate, ToolSchema};
use crate::store::InstanceStore;
use crate::{Error, Result};

/// CRUD over assistants
#[derive(Clone)]
pub struct AssistantRegistry {
    store: Arc<InstanceStore>,
}

fn validate_model(model: &str) -> Result<()> {
    if model.trim().is_empty() {
        return Err(Error::InvalidInput("Model cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_tools(tools: &[ToolSchema]) -> Result<()> {
    let mut seen = HashSet::new();
    for tool in tools {
        if tool.name.trim().is_empty() {
            return Err(Error::InvalidInput("Tool name cannot be empty".to_string()));
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(Error::InvalidInput(format!(
                "Tool '{}' is declared more than once",
                tool.name
            )));
        }
    }
    Ok(())
}

impl AssistantRegistry {
    pub fn new(store: Arc<InstanceStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, assistant: Assistant) -> Result<Assistant> {
        validate_model(&assistant.model)?;
        validate_tools(&assistant.tools)?;

        let assistant = self.store.assistants().create(assistant).await?;
        info!("Created assistant {} (model {})", assistant.id, assistant.model);
        Ok(assistant)
    }

    pub async fn get(&self, id: &str) -> Result<Assistant> {
        self.store.assistants().get(id).await
    }

    /// All assistants, newest first
    pub async fn list(&self) -> Vec<Assistant> {
        let mut assistants = self.store.assistants().list().await;
        assistants.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        assistants
    }

    pub async fn modify(&self, id: &str, update: AssistantUpdate) -> Result<Assistant> {
        if let Some(model) = &update.model {
            validate_model(model)?;
        }
        if let Some(tools) = &update.tools {
            validate_tools(tools)?;
        }

        self.store
            .assistants()
            .update(id, |assistant| {
                if let Some(model) = update.model {
                    assistant.model = model;
                }
                if let Some(name) = update.name {
                    assistant.name = Some(name);
                }
                if let Some(instructions) = update.instructions {
                    assistant.instructions = Some(instructions);
                }
                if let Some(tools) = update.tools {
                    assistant.tools = tools;
                }
                Ok(assistant.clone())
            })
            .await
    }

    /// Runs snapshot the assistant configuration when they are created, so
    /// deleting an assistant never disturbs a run already in flight.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.assistants().remove(id).await?;
        info!("Deleted assistant {}", id);
        Ok(())
    }
}
