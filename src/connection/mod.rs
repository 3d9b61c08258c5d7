pub mod config;

use crate::core::Result;
use crate::storage::{ProfileStore, RestStore};
use std::sync::Arc;
use tracing::info;

pub use config::{HookConfig, StoreConfig};

/// Open a handle to the hosted store described by `config`.
///
/// The handle is owned by the caller and shared by cloning the `Arc`.
pub fn connect(config: StoreConfig) -> Result<Arc<dyn ProfileStore>> {
    info!(store = %config, "connecting to profile store");
    Ok(Arc::new(RestStore::new(config)?))
}
