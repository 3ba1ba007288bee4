//! Entity identifiers
//!
//! Ids follow the OpenAI shape: a short kind prefix, an underscore and a
//! random v4 UUID without hyphens (`run_5f0c...`).

use uuid::Uuid;

pub const ASSISTANT_PREFIX: &str = "asst";
pub const THREAD_PREFIX: &str = "thread";
pub const MESSAGE_PREFIX: &str = "msg";
pub const RUN_PREFIX: &str = "run";
pub const STEP_PREFIX: &str = "step";
pub const TOOL_CALL_PREFIX: &str = "call";

pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}
