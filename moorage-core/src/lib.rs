//! Moorage Core
//!
//! Core library for a declarative provider that reconciles child resources
//! owned by a remote parent (e.g., log sinks of a database cluster).
//!
//! Mutating calls against one parent are serialized through a
//! [`KeyedLockTable`](lock_table::KeyedLockTable) while unrelated parents
//! proceed in parallel.

pub mod apply;
pub mod config;
pub mod differ;
pub mod effect;
pub mod error;
pub mod lock_table;
pub mod plan;
pub mod provider;
pub mod reconciler;
pub mod resource;

#[cfg(test)]
mod test_support;

pub use config::ReconcilerConfig;
pub use error::ReconcileError;
pub use lock_table::{KeyGuard, KeyedLockTable, LockError};
pub use reconciler::{ReadOutcome, Reconciler};
