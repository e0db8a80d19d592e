//! Application state shared across request handlers.

use std::sync::Arc;

use crate::deployment::DeploymentService;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    deployments: DeploymentService,
}

impl AppState {
    pub fn new(deployments: DeploymentService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { deployments }),
        }
    }

    pub fn deployments(&self) -> &DeploymentService {
        &self.inner.deployments
    }
}
