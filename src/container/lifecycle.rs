//! Container lifecycle management
//!
//! Every operation checks the runtime afresh before acting, so calling
//! create, start, stop or remove on a container already in the requested
//! state is a no-op.

use super::builder;
use super::config::ContainerSpec;
use super::interactive::{self, SessionIo};
use crate::config::Settings;
use crate::definition::{Definition, Operation};
use crate::error::{BerthError, Result};
use crate::naming::{labels, ContainerIdentity, ContainerKind};
use crate::prompt::Confirm;
use crate::runtime::{
    ContainerDetails, ContainerSummary, DynContainerRuntime, ImageReference, ListFilter,
    LogOptions, RemoveOptions,
};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Container manager for handling container lifecycle
#[derive(Clone)]
pub struct ContainerManager {
    runtime: DynContainerRuntime,
    settings: Arc<Settings>,
    confirm: Arc<dyn Confirm>,
}

impl ContainerManager {
    /// Create a new container manager
    pub fn new(runtime: DynContainerRuntime, settings: Arc<Settings>, confirm: Arc<dyn Confirm>) -> Self {
        Self {
            runtime,
            settings,
            confirm,
        }
    }

    pub fn runtime(&self) -> &DynContainerRuntime {
        &self.runtime
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn confirm(&self) -> &dyn Confirm {
        self.confirm.as_ref()
    }

    /// Whether a container exists
    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.runtime.inspect(name).await?.is_some())
    }

    /// Whether a container exists and is running
    pub async fn running(&self, name: &str) -> Result<bool> {
        Ok(self
            .runtime
            .inspect(name)
            .await?
            .map(|details| details.running)
            .unwrap_or(false))
    }

    /// Inspect a container
    pub async fn inspect(&self, name: &str) -> Result<ContainerDetails> {
        self.runtime
            .inspect(name)
            .await?
            .ok_or_else(|| BerthError::ContainerNotFound(name.to_string()))
    }

    /// List managed containers of `kind`, stopped ones included
    pub async fn list(&self, kind: ContainerKind) -> Result<Vec<(ContainerIdentity, ContainerSummary)>> {
        let filter = ListFilter::all()
            .label(labels::MARKER, "true")
            .label(labels::TYPE, kind.as_str());

        let mut containers: Vec<_> = self
            .runtime
            .list(&filter)
            .await?
            .into_iter()
            .filter_map(|c| ContainerIdentity::from_labels(&c.labels).map(|id| (id, c)))
            .collect();
        containers.sort_by(|a, b| (&a.0.name, a.0.number).cmp(&(&b.0.name, b.0.number)));
        Ok(containers)
    }

    /// Pull an image, with registry credentials from the settings
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let reference = ImageReference::parse(image);
        info!("Pulling image {}", reference);
        self.runtime
            .pull_image(&reference, self.settings.registry.as_ref())
            .await
    }

    /// Create a container.
    ///
    /// Fails with `ContainerExists` without touching the runtime when the
    /// name is taken. A missing image is pulled, after confirmation unless
    /// pulls are pre-approved, and creation is retried once.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        if self.exists(&spec.name).await? {
            return Err(BerthError::ContainerExists(spec.name.clone()));
        }

        debug!("Creating container {} from {}", spec.name, spec.image);
        match self.runtime.create(spec).await {
            Err(BerthError::ImageNotFound(image)) => {
                if !self.settings.pull_approve {
                    let question = format!("The image {} is not available locally. Pull it?", image);
                    if !self.confirm.confirm(&question)? {
                        return Err(BerthError::Declined(format!("pulling image {}", image)));
                    }
                }
                self.pull_image(&spec.image).await?;
                self.runtime.create(spec).await
            }
            result => result,
        }
    }

    /// Start a service or chain container.
    ///
    /// Creates the data container first when the definition asks for one,
    /// then the service container if it is absent. Ephemeral operations
    /// remove the container right after it starts.
    pub async fn start_service(&self, def: &Definition) -> Result<()> {
        let op = &def.operation;
        if self.running(&op.container_name).await? {
            info!("{} is already running", op.container_name);
            return Ok(());
        }

        let mut spec = builder::service_spec(&def.service, op)?;
        if def.service.auto_data {
            let data = builder::data_spec(&def.service, &self.settings, op, Some(&mut spec));
            self.ensure_created(&data).await?;
        }
        self.ensure_created(&spec).await?;

        info!("Starting {}", op.container_name);
        self.runtime.start(&op.container_name).await?;

        if op.remove {
            info!("Removing ephemeral container {}", op.container_name);
            self.runtime
                .remove(
                    &op.container_name,
                    RemoveOptions {
                        volumes: false,
                        force: true,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Create the data container of `op` if it does not exist
    pub async fn ensure_data_container(&self, def: &Definition) -> Result<()> {
        let data = builder::data_spec(&def.service, &self.settings, &def.operation, None);
        self.ensure_created(&data).await
    }

    async fn ensure_created(&self, spec: &ContainerSpec) -> Result<()> {
        match self.create(spec).await {
            Ok(id) => {
                info!("Created {} ({})", spec.name, id);
                Ok(())
            }
            Err(e) if e.is_exists() => {
                debug!("{} already exists", spec.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stop a container if it is running. A timeout of 0 kills it.
    pub async fn stop(&self, name: &str, timeout: u32) -> Result<()> {
        if !self.running(name).await? {
            debug!("{} is not running", name);
            return Ok(());
        }
        info!("Stopping {} (timeout {}s)", name, timeout);
        self.runtime.stop(name, timeout).await
    }

    /// Remove a container if it exists
    pub async fn remove_container(&self, name: &str, volumes: bool) -> Result<()> {
        if !self.exists(name).await? {
            debug!("{} does not exist", name);
            return Ok(());
        }
        info!("Removing {}", name);
        self.runtime
            .remove(
                name,
                RemoveOptions {
                    volumes,
                    force: false,
                },
            )
            .await
    }

    /// Remove the container of `op`, and optionally its data container
    pub async fn remove(&self, op: &Operation, data: bool, volumes: bool) -> Result<()> {
        self.remove_container(&op.container_name, volumes).await?;
        if data && op.data_container_name != op.container_name {
            self.remove_container(&op.data_container_name, volumes).await?;
        }
        Ok(())
    }

    /// Recreate container `old` under the identity `new`.
    ///
    /// The old container's configuration is inspected and reused. Entries
    /// in volumes-from naming a container listed in `moved` follow it to
    /// its new name; entries that no longer resolve are dropped. The
    /// container is restarted if it was running.
    pub async fn rename(
        &self,
        old: &str,
        new: &ContainerIdentity,
        moved: &[(String, String)],
    ) -> Result<String> {
        let details = self.inspect(old).await?;
        let new_name = new.container_name();
        if self.exists(&new_name).await? {
            return Err(BerthError::ContainerExists(new_name));
        }

        info!("Renaming {} to {}", old, new_name);
        if details.running {
            if let Err(e) = self.runtime.stop(old, self.settings.stop_timeout).await {
                warn!("Failed to stop {}: {}", old, e);
            }
        }
        self.runtime
            .remove(
                old,
                RemoveOptions {
                    volumes: false,
                    force: true,
                },
            )
            .await?;

        let mut spec = details.spec;
        let mut identity = new.clone();
        if identity.owner.is_none() {
            identity.owner = ContainerIdentity::from_labels(&spec.labels).and_then(|id| id.owner);
        }
        spec.name = new_name.clone();
        spec.labels.extend(identity.to_labels());

        let mut volumes_from = Vec::with_capacity(spec.host.volumes_from.len());
        for entry in std::mem::take(&mut spec.host.volumes_from) {
            let (source, mode) = match entry.rsplit_once(':') {
                Some((source, mode)) if mode == "ro" || mode == "rw" => (source, Some(mode)),
                _ => (entry.as_str(), None),
            };
            let source = moved
                .iter()
                .find(|(from, _)| from == source)
                .map(|(_, to)| to.as_str())
                .unwrap_or(source);

            if self.exists(source).await? {
                volumes_from.push(match mode {
                    Some(mode) => format!("{}:{}", source, mode),
                    None => source.to_string(),
                });
            } else {
                warn!("Dropping volumes from {}: container no longer exists", source);
            }
        }
        spec.host.volumes_from = volumes_from;

        let id = self.runtime.create(&spec).await?;
        if details.running {
            self.runtime.start(&new_name).await?;
        }
        Ok(id)
    }

    /// Stop, remove and recreate the container of `def`, optionally pulling
    /// its image first. Restarts it if it was running. Without an existing
    /// container there is nothing to rebuild and nothing changes.
    pub async fn rebuild(&self, def: &Definition, pull: bool, timeout: u32) -> Result<()> {
        let op = &def.operation;
        if !self.exists(&op.container_name).await? {
            info!("{} does not exist; nothing to rebuild", op.container_name);
            return Ok(());
        }
        let was_running = self.running(&op.container_name).await?;

        self.stop(&op.container_name, timeout).await?;
        self.remove_container(&op.container_name, true).await?;
        if pull {
            self.pull_image(&def.service.image).await?;
        }

        let mut spec = builder::service_spec(&def.service, op)?;
        if def.service.auto_data {
            let data = builder::data_spec(&def.service, &self.settings, op, Some(&mut spec));
            self.ensure_created(&data).await?;
        }
        self.create(&spec).await?;

        if was_running {
            info!("Restarting {}", op.container_name);
            self.runtime.start(&op.container_name).await?;
        }
        Ok(())
    }

    /// Pull the image of `def`, replacing its container and starting the
    /// service again if it was running.
    pub async fn pull(&self, def: &Definition, timeout: u32) -> Result<()> {
        let op = &def.operation;
        let was_running = self.running(&op.container_name).await?;

        if self.exists(&op.container_name).await? {
            self.stop(&op.container_name, timeout).await?;
            self.remove_container(&op.container_name, false).await?;
        }
        self.pull_image(&def.service.image).await?;

        if was_running {
            self.start_service(def).await?;
        }
        Ok(())
    }

    /// Run an ephemeral container to completion and return its logs.
    ///
    /// The container is removed on every exit path.
    pub async fn run_data(&self, spec: &ContainerSpec) -> Result<Vec<u8>> {
        self.clear_stale(&spec.name).await?;
        self.create(spec).await?;

        let result = self.run_to_completion(&spec.name).await;
        let cleanup = self
            .runtime
            .remove(
                &spec.name,
                RemoveOptions {
                    volumes: true,
                    force: true,
                },
            )
            .await;

        match (result, cleanup) {
            (Ok(logs), Ok(())) => Ok(logs),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!("Failed to remove {}: {}", spec.name, cleanup);
                Err(e)
            }
        }
    }

    async fn run_to_completion(&self, name: &str) -> Result<Vec<u8>> {
        debug!("Running {}", name);
        self.runtime.start(name).await?;
        let code = self.runtime.wait(name).await?;

        let mut logs = Vec::new();
        let mut stream = self.runtime.logs(name, LogOptions::default()).await?;
        while let Some(chunk) = stream.next().await {
            logs.extend(chunk?);
        }

        if code != 0 {
            warn!("{}: {}", name, String::from_utf8_lossy(&logs).trim_end());
            return Err(BerthError::ContainerExited {
                name: name.to_string(),
                code,
            });
        }
        Ok(logs)
    }

    /// Run an ephemeral exec container attached to `io`, removing it when it
    /// exits. Cancelling `cancel` stops it.
    pub async fn exec(&self, spec: &ContainerSpec, io: SessionIo, cancel: CancellationToken) -> Result<()> {
        self.clear_stale(&spec.name).await?;
        self.create(spec).await?;

        let result = interactive::run_session(
            &self.runtime,
            &spec.name,
            io,
            cancel,
            self.settings.stop_timeout,
        )
        .await;

        if let Err(e) = self
            .runtime
            .remove(
                &spec.name,
                RemoveOptions {
                    volumes: true,
                    force: true,
                },
            )
            .await
        {
            warn!("Failed to remove {}: {}", spec.name, e);
        }
        result
    }

    /// Leftover ephemeral container from an interrupted run.
    async fn clear_stale(&self, name: &str) -> Result<()> {
        if self.exists(name).await? {
            warn!("Removing leftover container {}", name);
            self.runtime
                .remove(
                    name,
                    RemoveOptions {
                        volumes: true,
                        force: true,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Copy container logs into `out`
    pub async fn logs<W>(&self, name: &str, opts: LogOptions, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if !self.exists(name).await? {
            return Err(BerthError::ContainerNotFound(name.to_string()));
        }
        let mut stream = self.runtime.logs(name, opts).await?;
        while let Some(chunk) = stream.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        Ok(())
    }
}
