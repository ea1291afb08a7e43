//! Service, chain and data definitions
//!
//! Definitions are TOML files under the Berth root. The loader resolves a
//! definition into the containers it maps to; see [`DefinitionLoader`].

pub mod config;
pub mod dependency;
pub mod loader;
pub mod operation;
pub mod parser;

pub use config::{Definition, Dependencies, Maintainer, Service};
pub use dependency::Dependency;
pub use loader::{set_env, DefinitionLoader, DEFAULT_CHAIN};
pub use operation::Operation;
pub use parser::{DefinitionParser, DefinitionStore};
