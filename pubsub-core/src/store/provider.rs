//! Contract consumed by the caching repository.

use crate::model::identity::{Jid, NodeName, ServiceId};
use crate::model::node_state::{
    Affiliation, ItemId, NodeConfig, NodeMeta, PublishedItem, StoreNodeId, SubscriptionEntry,
    SubscriptionId, SubscriptionState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure surfaced by the durable store.
///
/// Opaque to the core: the repository propagates it unchanged and never
/// retries. Retry policy, if any, belongs to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("store constraint violation: {0}")]
    Constraint(String),
}

/// Transactional backend holding authoritative node state.
///
/// Node-scoped reads and writes are keyed by the opaque [`StoreNodeId`]
/// assigned at creation; listing and root-collection calls are keyed by
/// service. Conflicting writes to the same node are serialized by the store
/// itself; the repository imposes no second ordering beyond submission order.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persists a new node and returns its identity snapshot with the
    /// store-assigned id. Fails with a constraint violation when the name is
    /// already taken within the service.
    async fn create_node(
        &self,
        service: &ServiceId,
        node: &NodeName,
        config: NodeConfig,
        creator: Jid,
    ) -> Result<NodeMeta, StoreError>;

    /// Deletes the node and every row hanging off it (affiliations,
    /// subscriptions, items). Deleting an unknown id is a no-op.
    async fn delete_node(&self, node_id: &StoreNodeId) -> Result<(), StoreError>;

    async fn node_meta(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<Option<NodeMeta>, StoreError>;

    async fn node_affiliations(
        &self,
        node_id: &StoreNodeId,
    ) -> Result<Vec<(Jid, Affiliation)>, StoreError>;

    async fn node_subscriptions(
        &self,
        node_id: &StoreNodeId,
    ) -> Result<Vec<(Jid, SubscriptionEntry)>, StoreError>;

    /// Upserts one affiliation row; [`Affiliation::None`] removes it.
    async fn update_node_affiliation(
        &self,
        node_id: &StoreNodeId,
        jid: &Jid,
        affiliation: Affiliation,
    ) -> Result<(), StoreError>;

    /// Upserts one subscription row; [`SubscriptionState::None`] removes it.
    async fn update_node_subscription(
        &self,
        node_id: &StoreNodeId,
        jid: &Jid,
        state: SubscriptionState,
        subscription_id: Option<&SubscriptionId>,
    ) -> Result<(), StoreError>;

    /// Child node names under `parent`, or the root-level names when `parent`
    /// is `None`.
    async fn child_nodes(
        &self,
        service: &ServiceId,
        parent: Option<&NodeName>,
    ) -> Result<Vec<NodeName>, StoreError>;

    async fn add_to_root_collection(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<(), StoreError>;

    async fn remove_from_root_collection(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<(), StoreError>;

    /// Writes one item, replacing any existing item with the same id.
    async fn write_item(
        &self,
        node_id: &StoreNodeId,
        item: PublishedItem,
    ) -> Result<(), StoreError>;

    async fn item(
        &self,
        node_id: &StoreNodeId,
        item_id: &ItemId,
    ) -> Result<Option<PublishedItem>, StoreError>;

    async fn delete_item(&self, node_id: &StoreNodeId, item_id: &ItemId)
        -> Result<(), StoreError>;

    /// Ids of items published at or after `since`, oldest first; all ids when
    /// `since` is `None`.
    async fn item_ids_since(
        &self,
        node_id: &StoreNodeId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ItemId>, StoreError>;
}
