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

//! # pubsub-core
//!
//! `pubsub-core` is the stateful core of a publish/subscribe service: it
//! tracks who owns, who is subscribed to, and how each (service, node) pair
//! is configured, and which cluster member serves it — while shielding a slow
//! durable store from the request rate of a live messaging workload.
//!
//! Three tightly-coupled subsystems make up the crate:
//!
//! - [`CachingNodeRepository`] — the caching facade over a [`DurableStore`]:
//!   load-through reads with single-flight misses, write-behind
//!   affiliation/subscription updates, write-through node lifecycle, and a
//!   lazily or eagerly populated per-service root collection.
//! - [`PersistenceExecutor`] — the bounded priority queue plus the single
//!   worker that drains it against the store under a configured rate ceiling,
//!   throttled further as memory pressure rises.
//! - [`ClusterNodeMap`] — the in-memory load index assigning each pub/sub
//!   node to one cluster member.
//!
//! The wire protocol, the storage engine, administrative surfaces, and
//! process bootstrap are external collaborators: everything arrives through
//! constructor-injected trait objects and config structs.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use pubsub_core::{
//!     CachingNodeRepository, ExecutorConfig, Jid, MemoryStore, NodeConfig, NodeName,
//!     PersistenceExecutor, RepositoryConfig, ServiceId, SystemMemoryTelemetry,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let executor = Arc::new(PersistenceExecutor::new(
//!     ExecutorConfig::default(),
//!     Arc::new(SystemMemoryTelemetry::new()),
//! ));
//! let repository =
//!     CachingNodeRepository::new(store, executor.clone(), RepositoryConfig::default());
//!
//! let service = ServiceId::new("PubSub.Example.ORG");
//! let node = NodeName::new("news/updates");
//! repository
//!     .create_node(&service, &node, NodeConfig::default(), Jid::new("owner@example.org"))
//!     .await
//!     .unwrap();
//!
//! // Service identifiers are case-insensitive; the cache serves this read.
//! let meta = repository
//!     .node_meta(&ServiceId::new("pubsub.example.org"), &node)
//!     .await
//!     .unwrap()
//!     .expect("created above");
//! assert_eq!(meta.creator.as_str(), "owner@example.org");
//! executor.shutdown();
//! # });
//! ```
//!
//! ## Consistency contract
//!
//! Once an `update_*` call returns, reads through the repository reflect the
//! new values even though the store write may still be queued; a crash inside
//! that window loses the mutation. Callers that need persistence
//! confirmation use the write-through operations (`create_node`,
//! `delete_node`) instead. Queued-task failures are logged and discarded,
//! and under critical memory pressure the queue silently stops draining —
//! backpressure is observed via `is_overloaded()`, never via errors.
//!
//! ## Internal architecture map
//!
//! - Model: identity keys and node-state value objects
//! - Store: the durable-store contract and the in-memory reference store
//! - Repository: per-key caches, root-collection state machine, facade
//! - Executor: priority queue, memory-pressure classification, drain worker
//! - Cluster: node-to-member load index
//!
//! ## Observability model
//!
//! The crate uses `tracing` for logs/events. Library code emits events/spans
//! and does not unconditionally initialize a global subscriber.
//! Binaries and tests are responsible for one-time `tracing_subscriber`
//! initialization at process boundaries.

mod cluster;
mod config;
mod executor;
mod model;
#[doc(hidden)]
pub mod observability;
mod repository;
mod store;

pub use cluster::node_map::{ClusterNodeMap, MemberAddr};
pub use config::{ExecutorConfig, RepositoryConfig, RootLoadingMode};
pub use executor::memory_pressure::{MemoryPressure, MemoryTelemetry, SystemMemoryTelemetry};
pub use executor::scheduler::PersistenceExecutor;
pub use executor::task_queue::{PersistenceTask, TaskPriority};
pub use model::identity::{Jid, NodeKey, NodeName, ServiceId};
pub use model::node_state::{
    Affiliation, ItemId, NodeAffiliations, NodeConfig, NodeMeta, NodeSubscriptions, PublishedItem,
    StoreNodeId, SubscriptionEntry, SubscriptionId, SubscriptionState,
};
pub use repository::caching_repository::{CachingNodeRepository, RepositoryError};
pub use store::memory::MemoryStore;
pub use store::provider::{DurableStore, StoreError};
