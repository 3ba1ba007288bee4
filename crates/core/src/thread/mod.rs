//! Thread module
//!
//! Threads, their append-only message lists and the bookkeeping that binds
//! a thread to at most one active run.

mod manager;
mod model;

pub use manager::ThreadManager;
pub use model::{ContentPart, Message, MessageRole, NewMessage, Thread};
