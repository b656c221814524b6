use std::sync::Arc;

use engram_domain::config::Config;
use engram_kernel::Kernel;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kernel: Arc<Kernel>,
}
