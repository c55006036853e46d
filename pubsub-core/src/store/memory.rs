//! In-memory reference store for tests, doctests, and infrastructure-free
//! embedders.

use crate::model::identity::{Jid, NodeKey, NodeName, ServiceId};
use crate::model::node_state::{
    Affiliation, ItemId, NodeConfig, NodeMeta, PublishedItem, StoreNodeId, SubscriptionEntry,
    SubscriptionId, SubscriptionState,
};
use crate::store::provider::{DurableStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    nodes: HashMap<NodeKey, NodeMeta>,
    node_index: HashMap<StoreNodeId, NodeKey>,
    affiliations: HashMap<StoreNodeId, HashMap<Jid, Affiliation>>,
    subscriptions: HashMap<StoreNodeId, HashMap<Jid, SubscriptionEntry>>,
    roots: HashMap<ServiceId, HashSet<NodeName>>,
    items: HashMap<StoreNodeId, Vec<PublishedItem>>,
}

/// Store backed by plain in-process tables. Serializes every call on one
/// lock, which stands in for the transactional backend's own write
/// serialization.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    next_node_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn create_node(
        &self,
        service: &ServiceId,
        node: &NodeName,
        config: NodeConfig,
        creator: Jid,
    ) -> Result<NodeMeta, StoreError> {
        let mut tables = self.tables.lock().await;
        let key = NodeKey::new(service.clone(), node.clone());
        if tables.nodes.contains_key(&key) {
            return Err(StoreError::Constraint(format!(
                "node {node} already exists under {service}"
            )));
        }

        let node_id = StoreNodeId::new(self.next_node_id.fetch_add(1, Ordering::Relaxed) + 1);
        let meta = NodeMeta {
            node_id: node_id.clone(),
            config,
            creator: creator.clone(),
            created_at: Utc::now(),
        };
        tables.nodes.insert(key.clone(), meta.clone());
        tables.node_index.insert(node_id.clone(), key);
        tables
            .affiliations
            .insert(node_id, HashMap::from([(creator, Affiliation::Owner)]));
        Ok(meta)
    }

    async fn delete_node(&self, node_id: &StoreNodeId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(key) = tables.node_index.remove(node_id) else {
            return Ok(());
        };
        tables.nodes.remove(&key);
        tables.affiliations.remove(node_id);
        tables.subscriptions.remove(node_id);
        tables.items.remove(node_id);
        if let Some(roots) = tables.roots.get_mut(&key.service) {
            roots.remove(&key.node);
        }
        Ok(())
    }

    async fn node_meta(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<Option<NodeMeta>, StoreError> {
        let tables = self.tables.lock().await;
        let key = NodeKey::new(service.clone(), node.clone());
        Ok(tables.nodes.get(&key).cloned())
    }

    async fn node_affiliations(
        &self,
        node_id: &StoreNodeId,
    ) -> Result<Vec<(Jid, Affiliation)>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .affiliations
            .get(node_id)
            .map(|rows| rows.iter().map(|(jid, aff)| (jid.clone(), *aff)).collect())
            .unwrap_or_default())
    }

    async fn node_subscriptions(
        &self,
        node_id: &StoreNodeId,
    ) -> Result<Vec<(Jid, SubscriptionEntry)>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .subscriptions
            .get(node_id)
            .map(|rows| {
                rows.iter()
                    .map(|(jid, entry)| (jid.clone(), entry.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_node_affiliation(
        &self,
        node_id: &StoreNodeId,
        jid: &Jid,
        affiliation: Affiliation,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.node_index.contains_key(node_id) {
            return Err(StoreError::Constraint(format!("no node with id {node_id}")));
        }
        let rows = tables.affiliations.entry(node_id.clone()).or_default();
        if affiliation == Affiliation::None {
            rows.remove(jid);
        } else {
            rows.insert(jid.clone(), affiliation);
        }
        Ok(())
    }

    async fn update_node_subscription(
        &self,
        node_id: &StoreNodeId,
        jid: &Jid,
        state: SubscriptionState,
        subscription_id: Option<&SubscriptionId>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.node_index.contains_key(node_id) {
            return Err(StoreError::Constraint(format!("no node with id {node_id}")));
        }
        let rows = tables.subscriptions.entry(node_id.clone()).or_default();
        match state {
            SubscriptionState::None => {
                rows.remove(jid);
            }
            _ => {
                let id = subscription_id
                    .cloned()
                    .or_else(|| rows.get(jid).map(|entry| entry.id.clone()))
                    .unwrap_or_else(SubscriptionId::generate);
                rows.insert(jid.clone(), SubscriptionEntry { state, id });
            }
        }
        Ok(())
    }

    async fn child_nodes(
        &self,
        service: &ServiceId,
        parent: Option<&NodeName>,
    ) -> Result<Vec<NodeName>, StoreError> {
        let tables = self.tables.lock().await;
        match parent {
            None => Ok(tables
                .roots
                .get(service)
                .map(|roots| roots.iter().cloned().collect())
                .unwrap_or_default()),
            Some(parent) => Ok(tables
                .nodes
                .keys()
                .filter(|key| &key.service == service)
                .filter(|key| key.node.parent().as_ref() == Some(parent))
                .map(|key| key.node.clone())
                .collect()),
        }
    }

    async fn add_to_root_collection(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables
            .roots
            .entry(service.clone())
            .or_default()
            .insert(node.clone());
        Ok(())
    }

    async fn remove_from_root_collection(
        &self,
        service: &ServiceId,
        node: &NodeName,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(roots) = tables.roots.get_mut(service) {
            roots.remove(node);
        }
        Ok(())
    }

    async fn write_item(
        &self,
        node_id: &StoreNodeId,
        item: PublishedItem,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(key) = tables.node_index.get(node_id).cloned() else {
            return Err(StoreError::Constraint(format!("no node with id {node_id}")));
        };
        let max_items = tables
            .nodes
            .get(&key)
            .map(|meta| meta.config.max_items)
            .unwrap_or(0);

        let items = tables.items.entry(node_id.clone()).or_default();
        items.retain(|existing| existing.id != item.id);
        items.push(item);
        if max_items > 0 && items.len() > max_items as usize {
            let overflow = items.len() - max_items as usize;
            items.drain(..overflow);
        }
        Ok(())
    }

    async fn item(
        &self,
        node_id: &StoreNodeId,
        item_id: &ItemId,
    ) -> Result<Option<PublishedItem>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .items
            .get(node_id)
            .and_then(|items| items.iter().find(|item| &item.id == item_id).cloned()))
    }

    async fn delete_item(
        &self,
        node_id: &StoreNodeId,
        item_id: &ItemId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(items) = tables.items.get_mut(node_id) {
            items.retain(|item| &item.id != item_id);
        }
        Ok(())
    }

    async fn item_ids_since(
        &self,
        node_id: &StoreNodeId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ItemId>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .items
            .get(node_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| since.map(|since| item.published_at >= since).unwrap_or(true))
                    .map(|item| item.id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::model::identity::{Jid, NodeName, ServiceId};
    use crate::model::node_state::{Affiliation, NodeConfig, PublishedItem, SubscriptionState};
    use crate::store::provider::{DurableStore, StoreError};

    fn service() -> ServiceId {
        ServiceId::new("pubsub.example.org")
    }

    #[tokio::test]
    async fn create_node_assigns_distinct_ids_and_owner_affiliation() {
        let store = MemoryStore::new();
        let owner = Jid::new("owner@example.org");

        let first = store
            .create_node(&service(), &NodeName::new("news"), NodeConfig::default(), owner.clone())
            .await
            .expect("create first node");
        let second = store
            .create_node(&service(), &NodeName::new("blog"), NodeConfig::default(), owner.clone())
            .await
            .expect("create second node");

        assert_ne!(first.node_id, second.node_id);
        let affiliations = store
            .node_affiliations(&first.node_id)
            .await
            .expect("read affiliations");
        assert_eq!(affiliations, vec![(owner, Affiliation::Owner)]);
    }

    #[tokio::test]
    async fn duplicate_create_is_a_constraint_violation() {
        let store = MemoryStore::new();
        let node = NodeName::new("news");

        store
            .create_node(&service(), &node, NodeConfig::default(), Jid::new("a@example.org"))
            .await
            .expect("first create");
        let duplicate = store
            .create_node(&service(), &node, NodeConfig::default(), Jid::new("b@example.org"))
            .await;

        assert!(matches!(duplicate, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn delete_node_drops_every_dependent_row() {
        let store = MemoryStore::new();
        let node = NodeName::new("news");
        let meta = store
            .create_node(&service(), &node, NodeConfig::default(), Jid::new("a@example.org"))
            .await
            .expect("create");
        store
            .add_to_root_collection(&service(), &node)
            .await
            .expect("root add");
        store
            .update_node_subscription(
                &meta.node_id,
                &Jid::new("s@example.org"),
                SubscriptionState::Subscribed,
                None,
            )
            .await
            .expect("subscribe");

        store.delete_node(&meta.node_id).await.expect("delete");

        assert!(store
            .node_meta(&service(), &node)
            .await
            .expect("meta read")
            .is_none());
        assert!(store
            .node_subscriptions(&meta.node_id)
            .await
            .expect("subscription read")
            .is_empty());
        assert!(store
            .child_nodes(&service(), None)
            .await
            .expect("root listing")
            .is_empty());
    }

    #[tokio::test]
    async fn child_listing_follows_name_prefixes() {
        let store = MemoryStore::new();
        let owner = Jid::new("owner@example.org");
        for name in ["news", "news/updates", "news/sports", "blog/posts"] {
            store
                .create_node(&service(), &NodeName::new(name), NodeConfig::default(), owner.clone())
                .await
                .expect("create");
        }

        let mut children = store
            .child_nodes(&service(), Some(&NodeName::new("news")))
            .await
            .expect("child listing");
        children.sort();

        assert_eq!(
            children,
            vec![NodeName::new("news/sports"), NodeName::new("news/updates")]
        );
    }

    #[tokio::test]
    async fn item_ceiling_drops_oldest_first() {
        let store = MemoryStore::new();
        let config = NodeConfig {
            max_items: 2,
            ..NodeConfig::default()
        };
        let meta = store
            .create_node(&service(), &NodeName::new("news"), config, Jid::new("a@example.org"))
            .await
            .expect("create");

        for payload in ["one", "two", "three"] {
            store
                .write_item(&meta.node_id, PublishedItem::new(Jid::new("a@example.org"), payload))
                .await
                .expect("write item");
        }

        let ids = store
            .item_ids_since(&meta.node_id, None)
            .await
            .expect("item ids");
        assert_eq!(ids.len(), 2);
    }
}
