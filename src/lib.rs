//! xacoord - two-phase commit coordination with crash recovery
//!
//! Two kernels live here:
//! - `txn`, `objectstore`, `recovery`: a transaction manager that drives
//!   prepare/commit across XA resources, logs in-doubt transactions and
//!   resolves them after a crash
//! - `cache`: configuration derivation and a suspend-aware cache lifecycle

pub mod cache;
pub mod cli;
pub mod crash_point;
pub mod objectstore;
pub mod observability;
pub mod recovery;
pub mod registration;
pub mod txn;
pub mod worker;
pub mod xa;
