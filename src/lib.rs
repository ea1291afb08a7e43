//! Berth - named services, chains and data containers on Docker
//!
//! Berth turns TOML definitions into managed Docker containers. Every
//! container it creates is named and labelled after a (kind, name, number)
//! identity, which lets it find and operate on them later. It provides:
//!
//! - Service and chain lifecycle: start, stop, update, rename, remove
//! - Dependency booting before a service or chain starts
//! - Companion data containers and host/container data transfer
//! - Ephemeral exec containers, interactive or not
//! - An in-memory runtime for testing against

pub mod config;
pub mod container;
pub mod data;
pub mod definition;
pub mod error;
pub mod naming;
pub mod orchestrator;
pub mod prompt;
pub mod runtime;

pub use error::{BerthError, Result};
