use std::sync::Arc;

use misting_core::Controller;

use crate::auth::Sessions;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub sessions: Arc<Sessions>,
}

impl AppState {
    pub fn new(controller: Arc<Controller>) -> Self {
        let sessions = Arc::new(Sessions::from_config(&controller.config().auth));
        Self {
            controller,
            sessions,
        }
    }
}
