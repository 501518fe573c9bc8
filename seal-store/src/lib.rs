//! The control-plane relational store.
//!
//! All entities from the data model live here as flat tables keyed by
//! integer ids, behind a [`Db`] handle with real transactional semantics:
//! [`Db::begin`] snapshots the state, [`Tx::commit`] publishes, and dropping
//! a [`Tx`] without committing rolls back. Per-customer write paths are
//! serialized by [`Db::with_customer_lock`].
//!
//! The [`SystemControl`] singleton row carries the derivation-index counters
//! and the per-vault-type sequence counters; it is only mutated through
//! [`Tx`] methods, which renders the original atomic
//! `UPDATE ... SET col = f(col)` discipline in ordinary Rust ownership.
//!
//! [`SystemControl`]: crate::system_control::SystemControl

pub mod alloc;
pub mod db;
pub mod rows;
pub mod state;
pub mod system_control;

pub use db::{Db, Tx};
pub use state::DbState;
