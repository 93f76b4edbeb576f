//! Application context shared with transformers.

use std::sync::Arc;

use crate::events::EventService;

/// What the host application exposes to the bridge and its transformers.
#[derive(Clone)]
pub struct AppContext {
    name: String,
    events: Arc<dyn EventService>,
}

impl AppContext {
    pub fn new(name: impl Into<String>, events: Arc<dyn EventService>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    /// Application name, used in log fields.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The application's event service.
    pub fn events(&self) -> &Arc<dyn EventService> {
        &self.events
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
