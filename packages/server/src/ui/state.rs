//! Server state shared across handlers.

use std::sync::Arc;

use crate::core::RealtimeCore;

/// Shared application state
pub struct AppState {
    pub core: Arc<RealtimeCore>,
}
