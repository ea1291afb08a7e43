//! Error types for Berth

use crate::naming::ContainerKind;
use thiserror::Error;

/// Result type for Berth operations
pub type Result<T> = std::result::Result<T, BerthError>;

/// Berth error types
#[derive(Error, Debug)]
pub enum BerthError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("Container {0} is not running; start it first")]
    NotRunning(String),

    #[error("Container {name} exited with status {code}")]
    ContainerExited { name: String, code: i64 },

    #[error("No {kind} definition named {name}")]
    DefinitionNotFound { kind: ContainerKind, name: String },

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("{dependent} depends on chain {dependency} but {dependency} is not running")]
    DependencyNotRunning { dependent: String, dependency: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid dependency: {0} (expected name[:alias[:link[:mount]]])")]
    InvalidDependency(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Declined: {0}")]
    Declined(String),

    #[error("Setting up {name} failed: {error}; cleaning up also failed: {cleanup}")]
    SetupFailed {
        name: String,
        error: Box<BerthError>,
        cleanup: Box<BerthError>,
    },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl BerthError {
    /// Absence of a container, definition or image.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BerthError::ContainerNotFound(_)
                | BerthError::DefinitionNotFound { .. }
                | BerthError::ImageNotFound(_)
        )
    }

    /// Whether this is the "already exists" sentinel.
    pub fn is_exists(&self) -> bool {
        matches!(self, BerthError::ContainerExists(_))
    }
}
