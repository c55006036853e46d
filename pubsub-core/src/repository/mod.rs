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

//! Caching-repository layer.
//!
//! Serves node-state reads from memory wherever possible and shields the
//! durable store from the live request rate: reads load through on miss with
//! at most one store fetch in flight per key, affiliation/subscription writes
//! go write-behind over the execution queue, and node creation/deletion stay
//! write-through so their callers get persistence confirmation.
//!
//! Per-key caches are independent; the per-service root-collection set is the
//! one coarse-locked aggregate, with its own lazy/eager population state
//! machine.

pub(crate) mod caching_repository;
pub(crate) mod node_cache;
pub(crate) mod root_collection;
