//! Identity newtypes used as cache and store keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};

/// Normalized, case-insensitive identifier of one pub/sub service instance.
///
/// Normalization (trim plus Unicode lowercasing) happens once in [`new`], so
/// the derived equality and hash are equality and hash over the normalized
/// form. Normalization is idempotent: re-normalizing an already-normalized
/// identifier is a no-op.
///
/// [`new`]: ServiceId::new
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ServiceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Case-sensitive, path-like node name, unique within one [`ServiceId`].
///
/// A node is either a leaf (holds items) or a collection (holds child nodes);
/// which one is recorded in the node's configuration, not in the name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the parent collection name: the prefix up to the last `/`
    /// separator. Empty names, separator-free names, and names whose prefix
    /// is empty have no parent.
    pub fn parent(&self) -> Option<NodeName> {
        let separator_index = self.0.rfind('/')?;
        let prefix = &self.0[..separator_index];
        if prefix.is_empty() {
            return None;
        }
        Some(NodeName::new(prefix))
    }

    /// True for top-level names, i.e. members of a service's root collection.
    pub fn is_root_level(&self) -> bool {
        self.parent().is_none()
    }
}

impl Display for NodeName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite cache index over (service, node).
///
/// Two keys are equal iff the services are equal after normalization and the
/// node names match exactly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub service: ServiceId,
    pub node: NodeName,
}

impl NodeKey {
    pub fn new(service: ServiceId, node: NodeName) -> Self {
        Self { service, node }
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.node)
    }
}

/// Opaque subscriber/owner address. Carried verbatim; the core never parses
/// or validates it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Jid(String);

impl Jid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Jid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Jid, NodeKey, NodeName, ServiceId};
    use std::collections::HashMap;

    #[test]
    fn service_id_equality_ignores_case() {
        assert_eq!(ServiceId::new("PubSub.Example.ORG"), ServiceId::new("pubsub.example.org"));
        assert_ne!(ServiceId::new("pubsub.example.org"), ServiceId::new("pubsub.example.net"));
    }

    #[test]
    fn service_id_normalization_is_idempotent() {
        let once = ServiceId::new("  PubSub.Example.ORG ");
        let twice = ServiceId::new(once.as_str());
        assert_eq!(once, twice);
    }

    #[test]
    fn node_key_equality_requires_exact_node_name() {
        let service = ServiceId::new("pubsub.example.org");
        let a = NodeKey::new(service.clone(), NodeName::new("News"));
        let b = NodeKey::new(service.clone(), NodeName::new("news"));
        let c = NodeKey::new(ServiceId::new("PUBSUB.example.org"), NodeName::new("News"));

        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn node_key_is_stable_as_map_key() {
        let mut cache = HashMap::new();
        cache.insert(
            NodeKey::new(ServiceId::new("PubSub.Example.ORG"), NodeName::new("news/updates")),
            42u32,
        );

        let fresh = NodeKey::new(ServiceId::new("pubsub.example.org"), NodeName::new("news/updates"));
        assert_eq!(cache.get(&fresh), Some(&42));
    }

    #[test]
    fn parent_of_root_and_empty_names_is_none() {
        assert_eq!(NodeName::new("").parent(), None);
        assert_eq!(NodeName::new("news").parent(), None);
        assert_eq!(NodeName::new("/news").parent(), None);
    }

    #[test]
    fn parent_is_prefix_up_to_last_separator() {
        assert_eq!(NodeName::new("news/updates").parent(), Some(NodeName::new("news")));
        assert_eq!(
            NodeName::new("news/updates/breaking").parent(),
            Some(NodeName::new("news/updates"))
        );
    }

    #[test]
    fn parent_derivation_is_pure() {
        let name = NodeName::new("news/updates");
        assert_eq!(name.parent(), name.parent());
        assert_eq!(name.as_str(), "news/updates");
    }

    #[test]
    fn jid_is_carried_verbatim() {
        let jid = Jid::new("User@Example.org/Home");
        assert_eq!(jid.as_str(), "User@Example.org/Home");
        assert_ne!(jid, Jid::new("user@example.org/home"));
    }
}
