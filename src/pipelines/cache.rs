//! Build-once holder for the query pipeline.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Uninitialized,
    Ready,
}

/// Holds at most one instance of `T`, built on first use.
///
/// Concurrent first callers wait on the same construction; a failed
/// construction leaves the cache empty so the next caller retries.
pub struct PipelineCache<T> {
    slot: Mutex<Option<Arc<T>>>,
    constructions: AtomicU64,
}

impl<T> Default for PipelineCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PipelineCache<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            constructions: AtomicU64::new(0),
        }
    }

    pub async fn get_or_try_init<E, F, Fut>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }

        debug!("building cached pipeline");
        let value = Arc::new(init().await?);
        let n = self.constructions.fetch_add(1, Ordering::SeqCst) + 1;
        info!(constructions = n, "pipeline ready");
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    /// The cached instance, if one has been built.
    pub async fn get(&self) -> Option<Arc<T>> {
        self.slot.lock().await.clone()
    }

    /// Drop the cached instance. Holders of an `Arc` keep theirs.
    pub async fn reset(&self) -> bool {
        let dropped = self.slot.lock().await.take().is_some();
        if dropped {
            info!("pipeline cache reset");
        }
        dropped
    }

    pub async fn state(&self) -> CacheState {
        if self.slot.lock().await.is_some() {
            CacheState::Ready
        } else {
            CacheState::Uninitialized
        }
    }

    /// How many times an instance has been built.
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::SeqCst)
    }
}
