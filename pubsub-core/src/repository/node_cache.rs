//! Per-key cache cells with single-flight load-through.

use crate::model::identity::{NodeKey, ServiceId};
use crate::store::provider::StoreError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One cached slot, shared between the container and in-flight loaders.
pub(crate) type CacheCell<T> = Arc<Mutex<Option<T>>>;

type CellContainer<T> = Mutex<HashMap<NodeKey, CacheCell<T>>>;

/// Cache of one node-state collection, keyed by [`NodeKey`].
///
/// The outer container lock is held only to look up or create a cell; the
/// load itself runs under the cell's own lock, so concurrent misses for the
/// same key serialize onto a single store fetch while unrelated keys never
/// contend.
pub(crate) struct NodeScopedCache<T> {
    cells: CellContainer<T>,
}

impl<T: Clone> NodeScopedCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// The cell for `key`, created vacant when absent.
    pub(crate) async fn cell(&self, key: &NodeKey) -> CacheCell<T> {
        let mut cells = self.cells.lock().await;
        cells.entry(key.clone()).or_default().clone()
    }

    /// Load-through read. The first caller to miss runs `load` while holding
    /// the cell lock; callers arriving during that window wait on the lock
    /// and then observe the freshly cached value instead of fetching again.
    pub(crate) async fn get_or_load<F, Fut>(
        &self,
        key: &NodeKey,
        load: F,
    ) -> Result<Option<T>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, StoreError>>,
    {
        let cell = self.cell(key).await;
        let mut slot = cell.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(Some(value.clone()));
        }

        match load().await {
            Ok(Some(value)) => {
                *slot = Some(value.clone());
                Ok(Some(value))
            }
            Ok(None) => {
                drop(slot);
                self.discard_vacant(key, &cell).await;
                Ok(None)
            }
            Err(err) => {
                drop(slot);
                self.discard_vacant(key, &cell).await;
                Err(err)
            }
        }
    }

    /// Drops the container entry again if the load left nothing behind, so
    /// misses for unknown keys do not accumulate vacant cells.
    async fn discard_vacant(&self, key: &NodeKey, cell: &CacheCell<T>) {
        let mut cells = self.cells.lock().await;
        let vacant = match cells.get(key) {
            Some(current) if Arc::ptr_eq(current, cell) => current
                .try_lock()
                .map(|slot| slot.is_none())
                .unwrap_or(false),
            _ => false,
        };
        if vacant {
            cells.remove(key);
        }
    }

    /// Cached value without touching the store.
    pub(crate) async fn peek(&self, key: &NodeKey) -> Option<T> {
        let cell = { self.cells.lock().await.get(key).cloned() }?;
        let slot = cell.lock().await;
        slot.clone()
    }

    pub(crate) async fn insert(&self, key: NodeKey, value: T) {
        let cell = self.cell(&key).await;
        *cell.lock().await = Some(value);
    }

    pub(crate) async fn evict(&self, key: &NodeKey) {
        self.cells.lock().await.remove(key);
    }

    /// Drops every cached entry under one service.
    pub(crate) async fn evict_service(&self, service: &ServiceId) {
        self.cells
            .lock()
            .await
            .retain(|key, _| &key.service != service);
    }
}
