//! Server configuration consumed by the processing core.

use crate::{Result, ServerError};

/// Default bound for each host's recently-used plugin list.
pub const DEFAULT_NUM_RECENTS: usize = 10;

/// Configuration flags handed to the processing core by the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Allow plugins to load concurrently. When false, every load/unload
    /// window is serialized through a process-wide mutex.
    pub parallel_plugin_load: bool,
    /// Maximum entries kept per host in the recents registry.
    pub num_recents: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            parallel_plugin_load: false,
            num_recents: DEFAULT_NUM_RECENTS,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_recents == 0 {
            return Err(ServerError::InvalidConfig(
                "num_recents must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
