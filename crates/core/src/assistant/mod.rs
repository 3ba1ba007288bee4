//! Assistant module
//!
//! Assistant configurations that runs are created against.

mod model;
mod registry;

pub use model::{Assistant, AssistantUpdate, ToolSchema};
pub use registry::AssistantRegistry;
