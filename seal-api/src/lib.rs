//! The HTTP plumbing shared by the seal services: the serialized error
//! taxonomy, wire models for the GM / LM / customer surfaces, a thin
//! [`RestClient`], and the axum server builder the binaries serve through.
//!
//! [`RestClient`]: crate::rest::RestClient

pub mod error;
pub mod models;
pub mod rest;
pub mod server;
