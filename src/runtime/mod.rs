//! Container runtime seam
//!
//! Every component talks to the container engine through a
//! [`ContainerRuntime`] handed to it at construction time. The Docker
//! backend drives a real engine; the memory backend keeps state in-process
//! and backs the test suite.

pub mod docker;
pub mod image;
pub mod memory;

pub use docker::DockerRuntime;
pub use image::{ImageReference, RegistryAuth};
pub use memory::MemoryRuntime;

use crate::container::ContainerSpec;
use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Shared runtime trait object.
pub type DynContainerRuntime = Arc<dyn ContainerRuntime>;

/// Stream of raw output chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Options for removing a container
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Also remove anonymous volumes
    pub volumes: bool,
    /// Kill the container first if it is running
    pub force: bool,
}

/// Options for reading container logs
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Keep streaming until the container exits
    pub follow: bool,
    /// Number of trailing lines, or all when `None`
    pub tail: Option<usize>,
}

/// Container listing filter
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Include stopped containers
    pub all: bool,
    /// Required label values
    pub labels: HashMap<String, String>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether a label map satisfies every required label.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| labels.get(k).map(|l| l == v).unwrap_or(false))
    }
}

/// Listed container
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
}

/// Inspected container
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Configuration the container was created with
    pub spec: ContainerSpec,
}

/// Streams of an attached container session
pub struct AttachStreams {
    /// Combined stdout and stderr
    pub output: ByteStream,
    /// Container stdin
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Container engine operations used by Berth
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and return its ID. Fails with `ContainerExists`
    /// when the name is taken and `ImageNotFound` when the image is missing.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, name: &str) -> Result<()>;

    /// Stop gracefully, killing after `timeout` seconds.
    async fn stop(&self, name: &str, timeout: u32) -> Result<()>;

    async fn remove(&self, name: &str, opts: RemoveOptions) -> Result<()>;

    /// Inspect a container, `None` if it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerSummary>>;

    async fn logs(&self, name: &str, opts: LogOptions) -> Result<ByteStream>;

    /// Attach to stdin, stdout and stderr.
    async fn attach(&self, name: &str) -> Result<AttachStreams>;

    /// Block until the container exits and return its exit code.
    async fn wait(&self, name: &str) -> Result<i64>;

    async fn pull_image(&self, image: &ImageReference, auth: Option<&RegistryAuth>) -> Result<()>;

    /// Extract a tar archive at `path` inside the container, consuming it
    /// as it streams in.
    async fn upload_archive(&self, name: &str, path: &str, archive: ByteStream) -> Result<()>;

    /// Stream a tar archive of `path` inside the container. The archive is
    /// rooted at the final component of `path`.
    async fn download_archive(&self, name: &str, path: &str) -> Result<ByteStream>;
}
