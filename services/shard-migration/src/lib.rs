// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2020 Joyent, Inc.
// Copyright 2026 Edgecast Cloud LLC.

//! Shard Migration Library
//!
//! This library provides the core of shard migration: the copy job that
//! moves one bounded batch of rows from a source shard to a destination
//! shard and requeues itself until the copy is complete, the name server
//! interface it consults for shard metadata and busy-state, and the job
//! queue that executes it.

pub mod config;
pub mod jobs;
pub mod memory;
pub mod metrics;
pub mod nameserver;
pub mod scheduler;
