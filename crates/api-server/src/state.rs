//! Application state

use std::sync::Arc;

use agent_runner::RunEngine;

use crate::auth::Authenticator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: RunEngine,
    auth: Authenticator,
    worker_url: String,
}

impl AppState {
    pub fn new(engine: RunEngine, auth: Authenticator, worker_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                engine,
                auth,
                worker_url: worker_url.into(),
            }),
        }
    }

    pub fn engine(&self) -> &RunEngine {
        &self.inner.engine
    }

    pub fn auth(&self) -> &Authenticator {
        &self.inner.auth
    }

    pub fn worker_url(&self) -> &str {
        &self.inner.worker_url
    }
}
