//! Node-state objects cached by the repository.

use crate::model::identity::Jid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Store-assigned opaque node identifier, valid only against the store that
/// issued it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreNodeId(i64);

impl StoreNodeId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl Display for StoreNodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscriber's authority level over one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Affiliation {
    Owner,
    Publisher,
    PublishOnly,
    Member,
    Outcast,
    None,
}

impl Affiliation {
    pub fn can_publish(self) -> bool {
        matches!(self, Self::Owner | Self::Publisher | Self::PublishOnly)
    }

    pub fn can_subscribe(self) -> bool {
        !matches!(self, Self::Outcast)
    }
}

/// A subscriber's delivery relationship to one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    None,
    Pending,
    Unconfigured,
    Subscribed,
}

/// Identifier of one (subscriber, node) subscription, generated when the
/// subscription is first recorded.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node configuration form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub title: String,
    /// Collection nodes hold child nodes; leaf nodes hold items.
    pub collection: bool,
    pub persist_items: bool,
    /// Retained-item ceiling for leaf nodes; `0` disables the ceiling.
    pub max_items: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            collection: false,
            persist_items: true,
            max_items: 0,
        }
    }
}

/// Immutable snapshot of a node's identity, taken when the store accepted the
/// node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub node_id: StoreNodeId,
    pub config: NodeConfig,
    pub creator: Jid,
    pub created_at: DateTime<Utc>,
}

/// Affiliation map with flush versioning so the cache knows when a store
/// write is still owed.
///
/// Every mutation bumps `version`; the queued persistence task records the
/// version it snapshotted and advances `flushed` once the store accepted the
/// write. A later mutation keeps the object dirty until its own flush lands.
#[derive(Clone, Debug)]
pub struct NodeAffiliations {
    entries: HashMap<Jid, Affiliation>,
    version: u64,
    flushed: u64,
}

impl NodeAffiliations {
    pub fn from_rows(rows: Vec<(Jid, Affiliation)>) -> Self {
        Self {
            entries: rows.into_iter().collect(),
            version: 0,
            flushed: 0,
        }
    }

    /// Affiliation for one subscriber; absent entries are `None`.
    pub fn affiliation(&self, jid: &Jid) -> Affiliation {
        self.entries.get(jid).copied().unwrap_or(Affiliation::None)
    }

    pub fn entries(&self) -> &HashMap<Jid, Affiliation> {
        &self.entries
    }

    /// Applies one change and returns the new version. Setting
    /// [`Affiliation::None`] removes the entry.
    pub fn apply(&mut self, jid: Jid, affiliation: Affiliation) -> u64 {
        if affiliation == Affiliation::None {
            self.entries.remove(&jid);
        } else {
            self.entries.insert(jid, affiliation);
        }
        self.version += 1;
        self.version
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.version > self.flushed
    }

    pub fn mark_flushed(&mut self, version: u64) {
        if version > self.flushed {
            self.flushed = version;
        }
    }
}

/// One subscriber's delivery entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub state: SubscriptionState,
    pub id: SubscriptionId,
}

/// Subscription map, flush-versioned like [`NodeAffiliations`].
#[derive(Clone, Debug)]
pub struct NodeSubscriptions {
    entries: HashMap<Jid, SubscriptionEntry>,
    version: u64,
    flushed: u64,
}

impl NodeSubscriptions {
    pub fn from_rows(rows: Vec<(Jid, SubscriptionEntry)>) -> Self {
        Self {
            entries: rows.into_iter().collect(),
            version: 0,
            flushed: 0,
        }
    }

    /// Delivery state for one subscriber; absent entries are `None`.
    pub fn state(&self, jid: &Jid) -> SubscriptionState {
        self.entries
            .get(jid)
            .map(|entry| entry.state)
            .unwrap_or(SubscriptionState::None)
    }

    pub fn subscription_id(&self, jid: &Jid) -> Option<&SubscriptionId> {
        self.entries.get(jid).map(|entry| &entry.id)
    }

    pub fn entries(&self) -> &HashMap<Jid, SubscriptionEntry> {
        &self.entries
    }

    /// Applies one change and returns the new version. Setting
    /// [`SubscriptionState::None`] removes the entry; a first non-`None`
    /// state mints the subscription id.
    pub fn apply(&mut self, jid: Jid, state: SubscriptionState) -> u64 {
        match state {
            SubscriptionState::None => {
                self.entries.remove(&jid);
            }
            _ => match self.entries.get_mut(&jid) {
                Some(entry) => entry.state = state,
                None => {
                    self.entries.insert(
                        jid,
                        SubscriptionEntry {
                            state,
                            id: SubscriptionId::generate(),
                        },
                    );
                }
            },
        }
        self.version += 1;
        self.version
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.version > self.flushed
    }

    pub fn mark_flushed(&mut self, version: u64) {
        if version > self.flushed {
            self.flushed = version;
        }
    }
}

/// Identifier of one published item within a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A published payload. Items are store-resident only; the repository never
/// caches them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedItem {
    pub id: ItemId,
    pub publisher: Jid,
    pub payload: String,
    pub published_at: DateTime<Utc>,
}

impl PublishedItem {
    pub fn new(publisher: Jid, payload: impl Into<String>) -> Self {
        Self {
            id: ItemId::generate(),
            publisher,
            payload: payload.into(),
            published_at: Utc::now(),
        }
    }
}
