//! Resolve configured provider names to store instances.

use crate::{FsMessageJournal, FsQueueStore, FsSubscriptionStore};
use courier_bus::ports::{MessageJournal, QueueStore, SubscriptionStore};
use courier_bus::testing::{InMemoryQueueStore, InMemorySubscriptionStore};
use courier_bus::{JournalingConfig, StorageConfig};
use courier_types::BusError;
use std::path::PathBuf;
use std::sync::Arc;

fn require_path(config: &StorageConfig) -> Result<PathBuf, BusError> {
    config.path.clone().ok_or_else(|| {
        BusError::Configuration(format!(
            "provider {} requires a path",
            config.provider
        ))
    })
}

/// Build the queue store named by `config.provider`.
pub fn queue_store_from_config(config: &StorageConfig) -> Result<Arc<dyn QueueStore>, BusError> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryQueueStore::new())),
        "filesystem" => Ok(Arc::new(FsQueueStore::open(require_path(config)?)?)),
        other => Err(BusError::Configuration(format!(
            "unknown queueing provider: {other}"
        ))),
    }
}

/// Build the subscription store named by `config.provider`.
pub fn subscription_store_from_config(
    config: &StorageConfig,
) -> Result<Arc<dyn SubscriptionStore>, BusError> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(InMemorySubscriptionStore::new())),
        "filesystem" => Ok(Arc::new(FsSubscriptionStore::open(require_path(config)?)?)),
        other => Err(BusError::Configuration(format!(
            "unknown subscription tracking provider: {other}"
        ))),
    }
}

/// Build the journal named by `config`, or `None` when journaling is
/// disabled.
pub async fn journal_from_config(
    config: &JournalingConfig,
) -> Result<Option<Arc<dyn MessageJournal>>, BusError> {
    if !config.enabled {
        return Ok(None);
    }
    match config.provider.as_str() {
        "filesystem" => {
            let path = config.path.clone().ok_or_else(|| {
                BusError::Configuration("filesystem journaling requires a path".to_string())
            })?;
            Ok(Some(Arc::new(FsMessageJournal::open(path).await?)))
        }
        other => Err(BusError::Configuration(format!(
            "unknown journaling provider: {other}"
        ))),
    }
}
