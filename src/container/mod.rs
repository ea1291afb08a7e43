//! Container management module
//!
//! This module maps definitions onto runtime-neutral container specs and
//! drives their lifecycle through a [`crate::runtime::ContainerRuntime`].

pub mod builder;
pub mod config;
pub mod interactive;
pub mod lifecycle;

pub use config::{ContainerSpec, HostSpec, Port, PortBinding, Protocol, RestartPolicy};
pub use interactive::{RawModeGuard, SessionIo};
pub use lifecycle::ContainerManager;
