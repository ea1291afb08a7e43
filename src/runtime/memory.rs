//! In-process container runtime
//!
//! Keeps containers, images and container file trees in memory. Exit codes
//! and output can be scripted per container name, and every mutating call
//! is recorded so callers can assert what actually reached the runtime.

use super::{
    AttachStreams, ByteStream, ContainerDetails, ContainerRuntime, ContainerSummary,
    ImageReference, ListFilter, LogOptions, RegistryAuth, RemoveOptions,
};
use crate::container::ContainerSpec;
use crate::error::{BerthError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::path::{Component, Path};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use uuid::Uuid;

/// Mutating call recorded by [`MemoryRuntime`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    Pull(String),
    Upload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Created,
    Running,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug)]
struct Container {
    id: String,
    spec: ContainerSpec,
    status: Status,
    exit_code: Option<i64>,
    created_at: DateTime<Utc>,
    /// Absolute paths inside the container
    files: BTreeMap<String, Node>,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, Container>,
    images: HashSet<String>,
    unavailable: HashSet<String>,
    exit_codes: HashMap<String, i64>,
    output: HashMap<String, Vec<u8>>,
    /// Containers that keep running until stopped
    held: HashSet<String>,
    failing_starts: HashSet<String>,
    events: Vec<Event>,
}

/// Container runtime backed by process memory
#[derive(Clone, Default)]
pub struct MemoryRuntime {
    state: Arc<RwLock<State>>,
    /// Woken whenever a container stops or is removed
    stopped: Arc<Notify>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an image available locally.
    pub fn with_image(self, image: &str) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.images.insert(ImageReference::parse(image).full_name());
        }
        self
    }

    /// Make pulls of `image` fail as if the registry had no such image.
    pub fn with_unavailable_image(self, image: &str) -> Self {
        if let Ok(mut state) = self.state.write() {
            state
                .unavailable
                .insert(ImageReference::parse(image).full_name());
        }
        self
    }

    /// Exit code reported when the named container finishes.
    pub fn set_exit_code(&self, name: &str, code: i64) -> Result<()> {
        self.write()?.exit_codes.insert(name.to_string(), code);
        Ok(())
    }

    /// Output produced by the named container.
    pub fn set_output(&self, name: &str, output: &[u8]) -> Result<()> {
        self.write()?
            .output
            .insert(name.to_string(), output.to_vec());
        Ok(())
    }

    /// Keep the named container running until it is stopped, so `wait`
    /// blocks instead of finishing it.
    pub fn hold(&self, name: &str) -> Result<()> {
        self.write()?.held.insert(name.to_string());
        Ok(())
    }

    /// Make starting the named container fail.
    pub fn fail_start(&self, name: &str) -> Result<()> {
        self.write()?.failing_starts.insert(name.to_string());
        Ok(())
    }

    /// Mutating calls seen so far.
    pub fn events(&self) -> Vec<Event> {
        self.read().map(|s| s.events.clone()).unwrap_or_default()
    }

    /// Whether an image is available locally.
    pub fn has_image(&self, image: &str) -> bool {
        self.read()
            .map(|s| s.images.contains(&ImageReference::parse(image).full_name()))
            .unwrap_or(false)
    }

    /// Regular files inside a container, keyed by absolute path.
    pub fn files(&self, name: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let state = self.read()?;
        let container = state
            .containers
            .get(name)
            .ok_or_else(|| BerthError::ContainerNotFound(name.to_string()))?;

        Ok(container
            .files
            .iter()
            .filter_map(|(path, node)| match node {
                Node::File(data) => Some((path.clone(), data.clone())),
                Node::Dir => None,
            })
            .collect())
    }

    /// Names of all containers.
    pub fn container_names(&self) -> Vec<String> {
        self.read()
            .map(|s| {
                let mut names: Vec<String> = s.containers.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| BerthError::Runtime("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| BerthError::Runtime("Failed to acquire write lock".to_string()))
    }
}

/// Normalize an in-container path to `/a/b` form.
fn normalize(path: &Path) -> String {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    format!("/{}", parts.join("/"))
}

fn insert_parents(files: &mut BTreeMap<String, Node>, path: &str) {
    let mut current = Path::new(path).parent().map(Path::to_path_buf);
    while let Some(parent) = current {
        let dir = normalize(&parent);
        if dir == "/" {
            break;
        }
        current = Path::new(&dir).parent().map(Path::to_path_buf);
        files.entry(dir).or_insert(Node::Dir);
    }
}

fn tail_lines(output: &[u8], tail: Option<usize>) -> Vec<u8> {
    match tail {
        None => output.to_vec(),
        Some(n) => {
            let text = String::from_utf8_lossy(output);
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(n);
            let mut out = lines[start..].join("\n");
            if !out.is_empty() {
                out.push('\n');
            }
            out.into_bytes()
        }
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.write()?;

        if state.containers.contains_key(&spec.name) {
            return Err(BerthError::ContainerExists(spec.name.clone()));
        }
        if !state
            .images
            .contains(&ImageReference::parse(&spec.image).full_name())
        {
            return Err(BerthError::ImageNotFound(spec.image.clone()));
        }

        let id = Uuid::new_v4().to_string().replace('-', "")[..12].to_string();
        state.containers.insert(
            spec.name.clone(),
            Container {
                id: id.clone(),
                spec: spec.clone(),
                status: Status::Created,
                exit_code: None,
                created_at: Utc::now(),
                files: BTreeMap::new(),
            },
        );
        state.events.push(Event::Create(spec.name.clone()));
        Ok(id)
    }

    async fn start(&self, name: &str) -> Result<()> {
        let mut state = self.write()?;
        if state.failing_starts.contains(name) {
            return Err(BerthError::Runtime(format!("cannot start {}", name)));
        }
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| BerthError::ContainerNotFound(name.to_string()))?;

        if container.status == Status::Running {
            return Ok(());
        }

        container.status = Status::Running;
        container.exit_code = None;
        state.events.push(Event::Start(name.to_string()));
        Ok(())
    }

    async fn stop(&self, name: &str, _timeout: u32) -> Result<()> {
        let mut state = self.write()?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| BerthError::ContainerNotFound(name.to_string()))?;

        if container.status != Status::Running {
            return Ok(());
        }

        container.status = Status::Exited;
        container.exit_code = Some(0);
        state.events.push(Event::Stop(name.to_string()));
        self.stopped.notify_waiters();
        Ok(())
    }

    async fn remove(&self, name: &str, opts: RemoveOptions) -> Result<()> {
        let mut state = self.write()?;
        let container = state
            .containers
            .get(name)
            .ok_or_else(|| BerthError::ContainerNotFound(name.to_string()))?;

        if container.status == Status::Running && !opts.force {
            return Err(BerthError::Runtime(format!(
                "cannot remove running container {}",
                name
            )));
        }

        state.containers.remove(name);
        state.events.push(Event::Remove(name.to_string()));
        self.stopped.notify_waiters();
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>> {
        let state = self.read()?;
        Ok(state.containers.get(name).map(|c| ContainerDetails {
            id: c.id.clone(),
            name: c.spec.name.clone(),
            running: c.status == Status::Running,
            spec: c.spec.clone(),
        }))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerSummary>> {
        let state = self.read()?;
        let mut containers: Vec<&Container> = state
            .containers
            .values()
            .filter(|c| filter.all || c.status == Status::Running)
            .filter(|c| filter.matches(&c.spec.labels))
            .collect();
        containers.sort_by_key(|c| c.created_at);

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.spec.name.clone(),
                image: c.spec.image.clone(),
                labels: c.spec.labels.clone(),
                running: c.status == Status::Running,
            })
            .collect())
    }

    async fn logs(&self, name: &str, opts: LogOptions) -> Result<ByteStream> {
        let state = self.read()?;
        if !state.containers.contains_key(name) {
            return Err(BerthError::ContainerNotFound(name.to_string()));
        }

        let output = state.output.get(name).cloned().unwrap_or_default();
        let chunk = tail_lines(&output, opts.tail);
        Ok(Box::pin(stream::iter(vec![Ok(chunk)])))
    }

    async fn attach(&self, name: &str) -> Result<AttachStreams> {
        let state = self.read()?;
        if !state.containers.contains_key(name) {
            return Err(BerthError::ContainerNotFound(name.to_string()));
        }

        let output = state.output.get(name).cloned().unwrap_or_default();
        Ok(AttachStreams {
            output: Box::pin(stream::iter(vec![Ok(output)])),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn wait(&self, name: &str) -> Result<i64> {
        loop {
            let notified = self.stopped.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.write()?;
                let scripted = state.exit_codes.get(name).copied().unwrap_or(0);
                let held = state.held.contains(name);
                let container = state
                    .containers
                    .get_mut(name)
                    .ok_or_else(|| BerthError::ContainerNotFound(name.to_string()))?;

                if container.status != Status::Running {
                    return Ok(container.exit_code.unwrap_or(scripted));
                }
                if !held {
                    container.status = Status::Exited;
                    container.exit_code = Some(scripted);
                    return Ok(scripted);
                }
            }

            notified.await;
        }
    }

    async fn pull_image(&self, image: &ImageReference, _auth: Option<&RegistryAuth>) -> Result<()> {
        let mut state = self.write()?;
        let full = image.full_name();

        if state.unavailable.contains(&full) {
            return Err(BerthError::ImageNotFound(full));
        }

        state.images.insert(full.clone());
        state.events.push(Event::Pull(full));
        Ok(())
    }

    async fn upload_archive(&self, name: &str, path: &str, mut archive: ByteStream) -> Result<()> {
        let mut received = Vec::new();
        while let Some(chunk) = archive.next().await {
            received.extend_from_slice(&chunk?);
        }

        let mut state = self.write()?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| BerthError::ContainerNotFound(name.to_string()))?;

        let root = normalize(Path::new(path));
        let mut archive = tar::Archive::new(Cursor::new(received));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let target = normalize(&Path::new(&root).join(entry.path()?));
            if target == "/" {
                continue;
            }

            insert_parents(&mut container.files, &target);
            if entry.header().entry_type().is_dir() {
                container.files.insert(target, Node::Dir);
            } else {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                container.files.insert(target, Node::File(data));
            }
        }

        state.events.push(Event::Upload(name.to_string()));
        Ok(())
    }

    async fn download_archive(&self, name: &str, path: &str) -> Result<ByteStream> {
        let state = self.read()?;
        let container = state
            .containers
            .get(name)
            .ok_or_else(|| BerthError::ContainerNotFound(name.to_string()))?;

        let root = normalize(Path::new(path));
        let base = Path::new(&root)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| BerthError::Transfer(format!("cannot export {}", path)))?;

        let prefix = format!("{}/", root);
        let mut builder = tar::Builder::new(Vec::new());
        let mut found = false;

        for (file, node) in &container.files {
            let rel = if *file == root {
                String::new()
            } else if let Some(rel) = file.strip_prefix(&prefix) {
                rel.to_string()
            } else {
                continue;
            };
            found = true;

            let entry_path = if rel.is_empty() {
                base.clone()
            } else {
                format!("{}/{}", base, rel)
            };

            let mut header = tar::Header::new_gnu();
            match node {
                Node::Dir => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append_data(&mut header, &entry_path, std::io::empty())?;
                }
                Node::File(data) => {
                    header.set_mode(0o644);
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append_data(&mut header, &entry_path, data.as_slice())?;
                }
            }
        }

        if !found {
            return Err(BerthError::Transfer(format!(
                "no such path in {}: {}",
                name, path
            )));
        }

        let archive = builder.into_inner()?;
        let chunks: Vec<Result<Vec<u8>>> = archive.chunks(4096).map(|c| Ok(c.to_vec())).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
