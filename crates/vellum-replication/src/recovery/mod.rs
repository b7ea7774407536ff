// Copyright 2026 Vellum Dev
// SPDX-License-Identifier: Apache-2.0

//! Replication recovery: replaying or discarding a bounded oplog
//! suffix at startup.
//!
//! # How it works
//!
//! Three persistence artefacts describe where the node stopped:
//!
//! 1. The newest durable checkpoint, either *stable* (tied to a
//!    consistent timestamp) or *unstable* (tied to nothing).
//! 2. The oplog, which may end in a ragged tail of writes a crashed
//!    primary never durably ordered.
//! 3. The consistency markers `applied_through` and
//!    `oplog_truncate_after_point`.
//!
//! Recovery reconciles them in a fixed order:
//!
//! 1. If a truncate-after point is set, excise the ragged tail and
//!    clear the point (with a durability fence).
//! 2. Probe the top of the oplog; an empty or missing oplog means
//!    there is nothing to apply.
//! 3. With a stable checkpoint, replay `(stable, top]`. Without one,
//!    replay `(applied_through, top]`, then advance `applied_through`
//!    to the top and fence the update.
//!
//! Replay feeds the applier through a pull-only buffer wrapped
//! directly around the oplog, so entries are consumed exactly once
//! with no double-buffering.
//!
//! A wrong start point, a wrong truncation range, or out-of-order
//! application silently corrupts the database, so every violated
//! precondition terminates the process instead of unwinding.

mod buffer;
mod driver;
mod observer;
mod truncate;

pub use buffer::{OplogBuffer, OplogReplayBuffer};
pub use driver::ReplicationRecovery;
pub use observer::RecoveryObserver;
