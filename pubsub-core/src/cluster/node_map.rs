//! Node-to-member assignment map with load reporting.

use crate::model::identity::NodeName;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Address of one cluster member, opaque to the core.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberAddr(String);

impl MemberAddr {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MemberAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct MapState {
    members: HashSet<MemberAddr>,
    assignments: HashMap<NodeName, Option<MemberAddr>>,
}

/// Load-balancing index assigning each pub/sub node to at most one member.
///
/// Every node registered through [`add_pubsub_node`] keeps an entry, possibly
/// unassigned, so load reports never silently omit known nodes.
///
/// [`add_pubsub_node`]: ClusterNodeMap::add_pubsub_node
pub struct ClusterNodeMap {
    state: RwLock<MapState>,
}

impl ClusterNodeMap {
    pub fn new(members: impl IntoIterator<Item = MemberAddr>) -> Self {
        Self {
            state: RwLock::new(MapState {
                members: members.into_iter().collect(),
                assignments: HashMap::new(),
            }),
        }
    }

    pub fn add_member(&self, member: MemberAddr) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.members.insert(member);
    }

    /// Forgets a member; nodes it served revert to unassigned rather than
    /// being dropped from the index.
    pub fn remove_member(&self, member: &MemberAddr) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.members.remove(member);
        for assigned in state.assignments.values_mut() {
            if assigned.as_ref() == Some(member) {
                *assigned = None;
            }
        }
    }

    /// Registers a node in the index; an existing assignment is kept.
    pub fn add_pubsub_node(&self, node: NodeName) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.assignments.entry(node).or_insert(None);
    }

    pub fn remove_pubsub_node(&self, node: &NodeName) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.assignments.remove(node);
    }

    /// Records (or overwrites) the node's assignment. The member is recorded
    /// as known if it was not already.
    pub fn assign(&self, member: MemberAddr, node: NodeName) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        debug!(member = %member, node = %node, "assigning pub/sub node");
        state.members.insert(member.clone());
        state.assignments.insert(node, Some(member));
    }

    pub fn assigned_member(&self, node: &NodeName) -> Option<MemberAddr> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.assignments.get(node).cloned().flatten()
    }

    pub fn is_registered(&self, node: &NodeName) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.assignments.contains_key(node)
    }

    /// Node count per known member. Idle members get an explicit zero entry.
    pub fn load(&self) -> HashMap<MemberAddr, usize> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut load: HashMap<MemberAddr, usize> = state
            .members
            .iter()
            .map(|member| (member.clone(), 0))
            .collect();
        for member in state.assignments.values().flatten() {
            *load.entry(member.clone()).or_insert(0) += 1;
        }
        load
    }

    /// Member with the lowest current load for `node`, chosen uniformly at
    /// random among ties so equally idle members share new nodes instead of
    /// herding onto one. Does not record an assignment; callers follow up
    /// with [`assign`].
    ///
    /// [`assign`]: ClusterNodeMap::assign
    pub fn pick_least_loaded_member(&self, node: &NodeName) -> Option<MemberAddr> {
        let load = self.load();
        let minimum = load.values().copied().min()?;
        let tied: Vec<&MemberAddr> = load
            .iter()
            .filter(|(_, count)| **count == minimum)
            .map(|(member, _)| member)
            .collect();
        let picked = tied
            .choose(&mut rand::thread_rng())
            .map(|member| (*member).clone());
        if let Some(member) = &picked {
            debug!(member = %member, node = %node, tied = tied.len(), "picked least-loaded member");
        }
        picked
    }
}
