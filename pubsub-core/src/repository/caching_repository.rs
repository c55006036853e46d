/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Caching facade over the durable store.

use crate::config::RepositoryConfig;
use crate::executor::scheduler::PersistenceExecutor;
use crate::executor::task_queue::{PersistenceTask, TaskPriority};
use crate::model::identity::{Jid, NodeKey, NodeName, ServiceId};
use crate::model::node_state::{
    Affiliation, ItemId, NodeAffiliations, NodeConfig, NodeMeta, NodeSubscriptions, PublishedItem,
    SubscriptionState,
};
use crate::repository::node_cache::NodeScopedCache;
use crate::repository::root_collection::RootCollections;
use crate::store::provider::{DurableStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const REPOSITORY_TAG: &str = "CachingNodeRepository:";
const FN_CREATE_NODE_TAG: &str = "create_node():";
const FN_DELETE_NODE_TAG: &str = "delete_node():";
const FN_ON_USER_REMOVED_TAG: &str = "on_user_removed():";

/// Errors surfaced by [`CachingNodeRepository`].
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Mutation aimed at a node with no stored state. Reads report misses as
    /// `None` instead.
    #[error("node {node} not found under service {service}")]
    NodeNotFound { service: ServiceId, node: NodeName },
    /// Root collection read before its first load completed under lazy
    /// loading. Retryable: the load is in flight.
    #[error("root collection for service {0} is not loaded yet")]
    RootCollectionNotLoaded(ServiceId),
    /// Durable-store failure, propagated unchanged; the repository never
    /// retries.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Facade serving node-state reads from memory and shielding the durable
/// store from the live mutation rate.
///
/// Reads load through on miss with at most one store fetch in flight per key.
/// Affiliation/subscription updates are write-behind: the cache reflects them
/// when the call returns while the store write rides the execution queue.
/// `create_node`/`delete_node` are write-through and only return once the
/// store accepted them.
pub struct CachingNodeRepository {
    store: Arc<dyn DurableStore>,
    executor: Arc<PersistenceExecutor>,
    meta: NodeScopedCache<NodeMeta>,
    affiliations: NodeScopedCache<NodeAffiliations>,
    subscriptions: NodeScopedCache<NodeSubscriptions>,
    roots: RootCollections,
}

impl CachingNodeRepository {
    pub fn new(
        store: Arc<dyn DurableStore>,
        executor: Arc<PersistenceExecutor>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            meta: NodeScopedCache::new(),
            affiliations: NodeScopedCache::new(),
            subscriptions: NodeScopedCache::new(),
            roots: RootCollections::new(store.clone(), config.root_loading),
            store,
            executor,
        }
    }

    fn key(service: &ServiceId, node: &NodeName) -> NodeKey {
        NodeKey::new(service.clone(), node.clone())
    }

    fn not_found(service: &ServiceId, node: &NodeName) -> RepositoryError {
        RepositoryError::NodeNotFound {
            service: service.clone(),
            node: node.clone(),
        }
    }

    fn submit_task(&self, priority: TaskPriority, task: PersistenceTask, label: &str) {
        if !self.executor.submit(priority, task) {
            warn!("{REPOSITORY_TAG} dropping {label} task, queue at hard capacity");
        }
    }

    /// Load-through read of a node's identity snapshot.
    pub async fn node_meta(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<Option<NodeMeta>, RepositoryError> {
        let key = Self::key(service, node);
        let store = &self.store;
        Ok(self
            .meta
            .get_or_load(&key, || store.node_meta(service, node))
            .await?)
    }

    /// Load-through read of a node's affiliation map.
    pub async fn node_affiliations(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<Option<NodeAffiliations>, RepositoryError> {
        let Some(meta) = self.node_meta(service, node).await? else {
            return Ok(None);
        };
        let key = Self::key(service, node);
        let store = &self.store;
        let node_id = meta.node_id;
        Ok(self
            .affiliations
            .get_or_load(&key, || async move {
                let rows = store.node_affiliations(&node_id).await?;
                Ok(Some(NodeAffiliations::from_rows(rows)))
            })
            .await?)
    }

    /// Load-through read of a node's subscription map.
    pub async fn node_subscriptions(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<Option<NodeSubscriptions>, RepositoryError> {
        let Some(meta) = self.node_meta(service, node).await? else {
            return Ok(None);
        };
        let key = Self::key(service, node);
        let store = &self.store;
        let node_id = meta.node_id;
        Ok(self
            .subscriptions
            .get_or_load(&key, || async move {
                let rows = store.node_subscriptions(&node_id).await?;
                Ok(Some(NodeSubscriptions::from_rows(rows)))
            })
            .await?)
    }

    /// Write-behind affiliation update.
    ///
    /// The cached map reflects `changes` when this returns; the store write
    /// rides the execution queue at normal priority and its failure, if any,
    /// is logged rather than reported here. Callers needing persistence
    /// confirmation use the write-through operations instead.
    pub async fn update_affiliations(
        &self,
        service: &ServiceId,
        node: &NodeName,
        changes: Vec<(Jid, Affiliation)>,
    ) -> Result<(), RepositoryError> {
        if changes.is_empty() {
            return Ok(());
        }
        let Some(meta) = self.node_meta(service, node).await? else {
            return Err(Self::not_found(service, node));
        };
        self.node_affiliations(service, node).await?;

        let key = Self::key(service, node);
        let cell = self.affiliations.cell(&key).await;
        let version = {
            let mut slot = cell.lock().await;
            let Some(affiliations) = slot.as_mut() else {
                return Err(Self::not_found(service, node));
            };
            for (jid, affiliation) in &changes {
                affiliations.apply(jid.clone(), *affiliation);
            }
            affiliations.version()
        };

        let store = self.store.clone();
        let node_id = meta.node_id;
        let task: PersistenceTask = Box::pin(async move {
            for (jid, affiliation) in &changes {
                store
                    .update_node_affiliation(&node_id, jid, *affiliation)
                    .await?;
            }
            let mut slot = cell.lock().await;
            if let Some(affiliations) = slot.as_mut() {
                affiliations.mark_flushed(version);
            }
            Ok(())
        });
        self.submit_task(TaskPriority::Normal, task, "affiliation flush");
        Ok(())
    }

    /// Write-behind subscription update, same contract as
    /// [`update_affiliations`].
    ///
    /// [`update_affiliations`]: CachingNodeRepository::update_affiliations
    pub async fn update_subscriptions(
        &self,
        service: &ServiceId,
        node: &NodeName,
        changes: Vec<(Jid, SubscriptionState)>,
    ) -> Result<(), RepositoryError> {
        if changes.is_empty() {
            return Ok(());
        }
        let Some(meta) = self.node_meta(service, node).await? else {
            return Err(Self::not_found(service, node));
        };
        self.node_subscriptions(service, node).await?;

        let key = Self::key(service, node);
        let cell = self.subscriptions.cell(&key).await;
        let (version, snapshot) = {
            let mut slot = cell.lock().await;
            let Some(subscriptions) = slot.as_mut() else {
                return Err(Self::not_found(service, node));
            };
            for (jid, state) in &changes {
                subscriptions.apply(jid.clone(), *state);
            }
            let snapshot: Vec<_> = changes
                .iter()
                .map(|(jid, state)| {
                    (
                        jid.clone(),
                        *state,
                        subscriptions.subscription_id(jid).cloned(),
                    )
                })
                .collect();
            (subscriptions.version(), snapshot)
        };

        let store = self.store.clone();
        let node_id = meta.node_id;
        let task: PersistenceTask = Box::pin(async move {
            for (jid, state, subscription_id) in &snapshot {
                store
                    .update_node_subscription(&node_id, jid, *state, subscription_id.as_ref())
                    .await?;
            }
            let mut slot = cell.lock().await;
            if let Some(subscriptions) = slot.as_mut() {
                subscriptions.mark_flushed(version);
            }
            Ok(())
        });
        self.submit_task(TaskPriority::Normal, task, "subscription flush");
        Ok(())
    }

    /// Write-through node creation: the node becomes visible to readers only
    /// once the store accepted it.
    pub async fn create_node(
        &self,
        service: &ServiceId,
        node: &NodeName,
        config: NodeConfig,
        creator: Jid,
    ) -> Result<NodeMeta, RepositoryError> {
        debug!("{REPOSITORY_TAG}{FN_CREATE_NODE_TAG} creating {node} under {service}");
        let meta = self
            .store
            .create_node(service, node, config, creator.clone())
            .await?;

        let key = Self::key(service, node);
        self.meta.insert(key.clone(), meta.clone()).await;
        self.affiliations
            .insert(
                key.clone(),
                NodeAffiliations::from_rows(vec![(creator, Affiliation::Owner)]),
            )
            .await;
        self.subscriptions
            .insert(key, NodeSubscriptions::from_rows(Vec::new()))
            .await;

        if node.is_root_level() {
            self.add_to_root_collection(service, node.clone()).await;
        }
        Ok(meta)
    }

    /// Write-through delete plus eviction of every cached object for the key.
    pub async fn delete_node(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<(), RepositoryError> {
        debug!("{REPOSITORY_TAG}{FN_DELETE_NODE_TAG} deleting {node} under {service}");
        let Some(meta) = self.node_meta(service, node).await? else {
            return Err(Self::not_found(service, node));
        };
        self.store.delete_node(&meta.node_id).await?;

        let key = Self::key(service, node);
        self.meta.evict(&key).await;
        self.affiliations.evict(&key).await;
        self.subscriptions.evict(&key).await;

        if node.is_root_level() {
            self.remove_from_root_collection(service, node.clone()).await;
        }
        Ok(())
    }

    /// Cascade for a removed user: sweeps the user's service node tree from
    /// the store, evicts all cached state under the service, and re-arms the
    /// root-collection load.
    pub async fn on_user_removed(&self, service: &ServiceId) -> Result<(), RepositoryError> {
        debug!("{REPOSITORY_TAG}{FN_ON_USER_REMOVED_TAG} sweeping service {service}");
        let mut frontier = self.store.child_nodes(service, None).await?;
        while let Some(node) = frontier.pop() {
            frontier.extend(self.store.child_nodes(service, Some(&node)).await?);
            if let Some(meta) = self.store.node_meta(service, &node).await? {
                self.store.delete_node(&meta.node_id).await?;
            }
            if node.is_root_level() {
                self.store.remove_from_root_collection(service, &node).await?;
            }
        }

        self.meta.evict_service(service).await;
        self.affiliations.evict_service(service).await;
        self.subscriptions.evict_service(service).await;
        self.roots.reset(service).await;
        Ok(())
    }

    /// Adds the node to the service's root collection in memory immediately;
    /// the store write rides the queue at low priority.
    pub async fn add_to_root_collection(&self, service: &ServiceId, node: NodeName) {
        self.roots.add(service, node.clone()).await;
        let store = self.store.clone();
        let service = service.clone();
        self.submit_task(
            TaskPriority::Low,
            Box::pin(async move { store.add_to_root_collection(&service, &node).await }),
            "root collection add",
        );
    }

    /// Counterpart of [`add_to_root_collection`].
    ///
    /// [`add_to_root_collection`]: CachingNodeRepository::add_to_root_collection
    pub async fn remove_from_root_collection(&self, service: &ServiceId, node: NodeName) {
        self.roots.remove(service, node.clone()).await;
        let store = self.store.clone();
        let service = service.clone();
        self.submit_task(
            TaskPriority::Low,
            Box::pin(async move { store.remove_from_root_collection(&service, &node).await }),
            "root collection remove",
        );
    }

    /// Current root-level node names for a service.
    ///
    /// Under lazy loading this fails with
    /// [`RepositoryError::RootCollectionNotLoaded`] until the first load
    /// completes; callers retry. Under eager loading the first caller blocks
    /// while the one-time load runs.
    pub async fn root_collection(
        &self,
        service: &ServiceId,
    ) -> Result<HashSet<NodeName>, RepositoryError> {
        self.roots.get(service).await
    }

    /// Warms the root collections for a known service list at startup.
    pub async fn preload_root_collections(
        &self,
        services: &[ServiceId],
    ) -> Result<(), RepositoryError> {
        for service in services {
            match self.roots.get(service).await {
                Ok(_) => {}
                // Lazy mode: the touch started the async load, which is all
                // preloading asks for.
                Err(RepositoryError::RootCollectionNotLoaded(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Write-behind publish: the item write rides the queue at high priority.
    pub async fn publish_item(
        &self,
        service: &ServiceId,
        node: &NodeName,
        item: PublishedItem,
    ) -> Result<(), RepositoryError> {
        let Some(meta) = self.node_meta(service, node).await? else {
            return Err(Self::not_found(service, node));
        };
        let store = self.store.clone();
        let node_id = meta.node_id;
        self.submit_task(
            TaskPriority::High,
            Box::pin(async move { store.write_item(&node_id, item).await }),
            "item publish",
        );
        Ok(())
    }

    /// Write-behind item retraction, queued at high priority like publishes.
    pub async fn delete_item(
        &self,
        service: &ServiceId,
        node: &NodeName,
        item_id: ItemId,
    ) -> Result<(), RepositoryError> {
        let Some(meta) = self.node_meta(service, node).await? else {
            return Err(Self::not_found(service, node));
        };
        let store = self.store.clone();
        let node_id = meta.node_id;
        self.submit_task(
            TaskPriority::High,
            Box::pin(async move { store.delete_item(&node_id, &item_id).await }),
            "item delete",
        );
        Ok(())
    }

    /// Items are uncached; reads pass straight through to the store.
    pub async fn item(
        &self,
        service: &ServiceId,
        node: &NodeName,
        item_id: &ItemId,
    ) -> Result<Option<PublishedItem>, RepositoryError> {
        let Some(meta) = self.node_meta(service, node).await? else {
            return Ok(None);
        };
        Ok(self.store.item(&meta.node_id, item_id).await?)
    }

    pub async fn item_ids_since(
        &self,
        service: &ServiceId,
        node: &NodeName,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ItemId>, RepositoryError> {
        let Some(meta) = self.node_meta(service, node).await? else {
            return Ok(Vec::new());
        };
        Ok(self.store.item_ids_since(&meta.node_id, since).await?)
    }

    /// True while a write-behind flush is still owed for the node's cached
    /// affiliation or subscription state.
    pub async fn has_pending_writes(&self, service: &ServiceId, node: &NodeName) -> bool {
        let key = Self::key(service, node);
        let affiliations_dirty = self
            .affiliations
            .peek(&key)
            .await
            .map(|affiliations| affiliations.is_dirty())
            .unwrap_or(false);
        let subscriptions_dirty = self
            .subscriptions
            .peek(&key)
            .await
            .map(|subscriptions| subscriptions.is_dirty())
            .unwrap_or(false);
        affiliations_dirty || subscriptions_dirty
    }

    /// Backpressure signal from the execution queue; producers should stop
    /// submitting mutations while this holds.
    pub fn is_overloaded(&self) -> bool {
        self.executor.is_overloaded()
    }
}
