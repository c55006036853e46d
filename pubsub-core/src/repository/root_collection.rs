//! Per-service root-collection set with lazy or eager population.

use crate::config::RootLoadingMode;
use crate::model::identity::{NodeName, ServiceId};
use crate::observability::events;
use crate::repository::caching_repository::RepositoryError;
use crate::store::provider::DurableStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const COMPONENT: &str = "root_collection";

/// Membership change issued while the set was not yet loaded; replayed in
/// order over the loaded snapshot.
enum RootDelta {
    Add(NodeName),
    Remove(NodeName),
}

enum RootState {
    NotLoaded { pending: Vec<RootDelta> },
    Loading { pending: Vec<RootDelta> },
    Loaded { nodes: HashSet<NodeName> },
}

fn apply_delta(nodes: &mut HashSet<NodeName>, delta: RootDelta) {
    match delta {
        RootDelta::Add(node) => {
            nodes.insert(node);
        }
        RootDelta::Remove(node) => {
            nodes.remove(&node);
        }
    }
}

struct ServiceRoots {
    service: ServiceId,
    // Coarse per-service lock: membership changes must be atomic with respect
    // to a load in progress.
    state: Mutex<RootState>,
}

/// Container of every service's root-collection state.
pub(crate) struct RootCollections {
    services: Mutex<HashMap<ServiceId, Arc<ServiceRoots>>>,
    store: Arc<dyn DurableStore>,
    mode: RootLoadingMode,
}

impl RootCollections {
    pub(crate) fn new(store: Arc<dyn DurableStore>, mode: RootLoadingMode) -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            store,
            mode,
        }
    }

    async fn service_roots(&self, service: &ServiceId) -> Arc<ServiceRoots> {
        let mut services = self.services.lock().await;
        services
            .entry(service.clone())
            .or_insert_with(|| {
                Arc::new(ServiceRoots {
                    service: service.clone(),
                    state: Mutex::new(RootState::NotLoaded {
                        pending: Vec::new(),
                    }),
                })
            })
            .clone()
    }

    /// Current root-level node names.
    ///
    /// Lazy mode kicks off the async load on first touch and fails with the
    /// retryable not-yet-loaded condition until it completes. Eager mode
    /// performs the load inline under the service lock, so concurrent callers
    /// block and then share the single fetch.
    pub(crate) async fn get(
        &self,
        service: &ServiceId,
    ) -> Result<HashSet<NodeName>, RepositoryError> {
        let roots = self.service_roots(service).await;
        match self.mode {
            RootLoadingMode::Eager => self.get_eager(roots).await,
            RootLoadingMode::Lazy => self.get_lazy(roots).await,
        }
    }

    async fn get_eager(
        &self,
        roots: Arc<ServiceRoots>,
    ) -> Result<HashSet<NodeName>, RepositoryError> {
        let mut state = roots.state.lock().await;
        if let RootState::Loaded { nodes } = &*state {
            return Ok(nodes.clone());
        }

        let fetched = self.store.child_nodes(&roots.service, None).await?;
        let mut nodes: HashSet<NodeName> = fetched.into_iter().collect();
        if let RootState::NotLoaded { pending } | RootState::Loading { pending } = &mut *state {
            for delta in pending.drain(..) {
                apply_delta(&mut nodes, delta);
            }
        }
        debug!(
            event = events::ROOT_COLLECTION_LOADED,
            component = COMPONENT,
            service = %roots.service,
            nodes = nodes.len(),
            "root collection loaded eagerly"
        );
        *state = RootState::Loaded {
            nodes: nodes.clone(),
        };
        Ok(nodes)
    }

    async fn get_lazy(
        &self,
        roots: Arc<ServiceRoots>,
    ) -> Result<HashSet<NodeName>, RepositoryError> {
        let mut state = roots.state.lock().await;
        match &mut *state {
            RootState::Loaded { nodes } => Ok(nodes.clone()),
            RootState::Loading { .. } => Err(RepositoryError::RootCollectionNotLoaded(
                roots.service.clone(),
            )),
            RootState::NotLoaded { pending } => {
                let pending = std::mem::take(pending);
                *state = RootState::Loading { pending };
                drop(state);
                self.spawn_load(roots.clone());
                Err(RepositoryError::RootCollectionNotLoaded(
                    roots.service.clone(),
                ))
            }
        }
    }

    fn spawn_load(&self, roots: Arc<ServiceRoots>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let fetched = store.child_nodes(&roots.service, None).await;
            let mut state = roots.state.lock().await;
            match fetched {
                Ok(names) => {
                    let mut nodes: HashSet<NodeName> = names.into_iter().collect();
                    if let RootState::Loading { pending } = &mut *state {
                        for delta in pending.drain(..) {
                            apply_delta(&mut nodes, delta);
                        }
                    }
                    debug!(
                        event = events::ROOT_COLLECTION_LOADED,
                        component = COMPONENT,
                        service = %roots.service,
                        nodes = nodes.len(),
                        "root collection loaded"
                    );
                    *state = RootState::Loaded { nodes };
                }
                Err(err) => {
                    warn!(
                        event = events::ROOT_COLLECTION_LOAD_FAILED,
                        component = COMPONENT,
                        service = %roots.service,
                        err = %err,
                        "root collection load failed, will retry on next read"
                    );
                    if let RootState::Loading { pending } = &mut *state {
                        let pending = std::mem::take(pending);
                        *state = RootState::NotLoaded { pending };
                    }
                }
            }
        });
    }

    /// Applies the membership change in memory immediately, or buffers it
    /// while the set is not yet loaded.
    pub(crate) async fn add(&self, service: &ServiceId, node: NodeName) {
        let roots = self.service_roots(service).await;
        let mut state = roots.state.lock().await;
        match &mut *state {
            RootState::Loaded { nodes } => {
                nodes.insert(node);
            }
            RootState::NotLoaded { pending } | RootState::Loading { pending } => {
                pending.push(RootDelta::Add(node));
            }
        }
    }

    pub(crate) async fn remove(&self, service: &ServiceId, node: NodeName) {
        let roots = self.service_roots(service).await;
        let mut state = roots.state.lock().await;
        match &mut *state {
            RootState::Loaded { nodes } => {
                nodes.remove(&node);
            }
            RootState::NotLoaded { pending } | RootState::Loading { pending } => {
                pending.push(RootDelta::Remove(node));
            }
        }
    }

    /// Clears the set and re-arms loading. Lazy mode starts the reload
    /// immediately; eager mode reloads on the next read.
    pub(crate) async fn reset(&self, service: &ServiceId) {
        let roots = self.service_roots(service).await;
        let mut state = roots.state.lock().await;
        match self.mode {
            RootLoadingMode::Eager => {
                *state = RootState::NotLoaded {
                    pending: Vec::new(),
                };
            }
            RootLoadingMode::Lazy => {
                *state = RootState::Loading {
                    pending: Vec::new(),
                };
                drop(state);
                self.spawn_load(roots);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RootCollections;
    use crate::config::RootLoadingMode;
    use crate::model::identity::{Jid, NodeName, ServiceId};
    use crate::model::node_state::{
        Affiliation, ItemId, NodeConfig, NodeMeta, PublishedItem, StoreNodeId, SubscriptionEntry,
        SubscriptionId, SubscriptionState,
    };
    use crate::repository::caching_repository::RepositoryError;
    use crate::store::provider::{DurableStore, StoreError};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Duration;

    /// Store stub that only serves root listings, slowly, and counts fetches.
    struct SlowRootStore {
        roots: Vec<NodeName>,
        delay: Duration,
        fetches: AtomicUsize,
    }

    impl SlowRootStore {
        fn new(roots: &[&str], delay: Duration) -> Self {
            Self {
                roots: roots.iter().map(|s| NodeName::new(*s)).collect(),
                delay,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DurableStore for SlowRootStore {
        async fn create_node(
            &self,
            _service: &ServiceId,
            _node: &NodeName,
            _config: NodeConfig,
            _creator: Jid,
        ) -> Result<NodeMeta, StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn delete_node(&self, _node_id: &StoreNodeId) -> Result<(), StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn node_meta(
            &self,
            _service: &ServiceId,
            _node: &NodeName,
        ) -> Result<Option<NodeMeta>, StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn node_affiliations(
            &self,
            _node_id: &StoreNodeId,
        ) -> Result<Vec<(Jid, Affiliation)>, StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn node_subscriptions(
            &self,
            _node_id: &StoreNodeId,
        ) -> Result<Vec<(Jid, SubscriptionEntry)>, StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn update_node_affiliation(
            &self,
            _node_id: &StoreNodeId,
            _jid: &Jid,
            _affiliation: Affiliation,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn update_node_subscription(
            &self,
            _node_id: &StoreNodeId,
            _jid: &Jid,
            _state: SubscriptionState,
            _subscription_id: Option<&SubscriptionId>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn child_nodes(
            &self,
            _service: &ServiceId,
            parent: Option<&NodeName>,
        ) -> Result<Vec<NodeName>, StoreError> {
            assert!(parent.is_none(), "only root listings in these tests");
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.roots.clone())
        }

        async fn add_to_root_collection(
            &self,
            _service: &ServiceId,
            _node: &NodeName,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn remove_from_root_collection(
            &self,
            _service: &ServiceId,
            _node: &NodeName,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn write_item(
            &self,
            _node_id: &StoreNodeId,
            _item: PublishedItem,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn item(
            &self,
            _node_id: &StoreNodeId,
            _item_id: &ItemId,
        ) -> Result<Option<PublishedItem>, StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn delete_item(
            &self,
            _node_id: &StoreNodeId,
            _item_id: &ItemId,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }

        async fn item_ids_since(
            &self,
            _node_id: &StoreNodeId,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<ItemId>, StoreError> {
            Err(StoreError::Backend("not used in tests".to_string()))
        }
    }

    fn service() -> ServiceId {
        ServiceId::new("pubsub.example.org")
    }

    fn expected(names: &[&str]) -> HashSet<NodeName> {
        names.iter().map(|s| NodeName::new(*s)).collect()
    }

    #[tokio::test]
    async fn lazy_read_fails_until_the_async_load_settles() {
        let store = Arc::new(SlowRootStore::new(&["news"], Duration::from_millis(20)));
        let collections = RootCollections::new(store.clone(), RootLoadingMode::Lazy);

        let first = collections.get(&service()).await;
        assert!(matches!(
            first,
            Err(RepositoryError::RootCollectionNotLoaded(_))
        ));

        // Poll until the spawned load completes.
        let mut loaded = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Ok(nodes) = collections.get(&service()).await {
                loaded = Some(nodes);
                break;
            }
        }

        assert_eq!(loaded, Some(expected(&["news"])));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deltas_issued_during_a_lazy_load_survive_the_snapshot() {
        let store = Arc::new(SlowRootStore::new(
            &["news", "blog"],
            Duration::from_millis(30),
        ));
        let collections = Arc::new(RootCollections::new(store, RootLoadingMode::Lazy));

        // First touch starts the load, then race membership changes into it.
        assert!(collections.get(&service()).await.is_err());
        collections.add(&service(), NodeName::new("fresh")).await;
        collections.remove(&service(), NodeName::new("blog")).await;

        let mut loaded = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Ok(nodes) = collections.get(&service()).await {
                loaded = Some(nodes);
                break;
            }
        }

        assert_eq!(loaded, Some(expected(&["news", "fresh"])));
    }

    #[tokio::test]
    async fn eager_read_blocks_and_concurrent_readers_share_one_fetch() {
        let store = Arc::new(SlowRootStore::new(&["news"], Duration::from_millis(20)));
        let collections = Arc::new(RootCollections::new(store.clone(), RootLoadingMode::Eager));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let collections = collections.clone();
            handles.push(tokio::spawn(async move {
                collections.get(&service()).await
            }));
        }

        for handle in handles {
            let nodes = handle.await.expect("join").expect("eager read succeeds");
            assert_eq!(nodes, expected(&["news"]));
        }
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_under_lazy_mode_reloads_in_the_background() {
        let store = Arc::new(SlowRootStore::new(&["news"], Duration::from_millis(10)));
        let collections = RootCollections::new(store.clone(), RootLoadingMode::Lazy);

        assert!(collections.get(&service()).await.is_err());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(collections.get(&service()).await.is_ok());

        collections.reset(&service()).await;
        assert!(matches!(
            collections.get(&service()).await,
            Err(RepositoryError::RootCollectionNotLoaded(_))
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            collections.get(&service()).await.expect("reloaded"),
            expected(&["news"])
        );
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }
}
