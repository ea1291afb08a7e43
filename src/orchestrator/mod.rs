//! Service, chain and data operations
//!
//! The orchestrator loads definitions, boots their dependencies and hands
//! the result to the container manager. Operations are split by kind:
//! [`services`], [`chains`] and [`data`], with dependency booting in
//! [`boot`].

pub mod boot;
pub mod chains;
pub mod data;
pub mod services;

use crate::config::Settings;
use crate::container::ContainerManager;
use crate::data::DataTransfer;
use crate::definition::{Definition, DefinitionLoader, Operation};
use crate::error::{BerthError, Result};
use crate::naming::ContainerKind;
use crate::prompt::Confirm;
use crate::runtime::DynContainerRuntime;
use std::sync::Arc;

pub use chains::NewChainOptions;

/// Per-invocation options for starting a container
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Publish exposed ports on random host ports
    pub publish_all: bool,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    /// Remove the container right after it starts
    pub ephemeral: bool,
}

impl RunOptions {
    fn apply(&self, op: &mut Operation) {
        op.publish_all_ports |= self.publish_all;
        op.privileged |= self.privileged;
        op.cap_add.extend(self.cap_add.iter().cloned());
        op.cap_drop.extend(self.cap_drop.iter().cloned());
        op.remove |= self.ephemeral;
    }
}

/// Options for stopping a container
#[derive(Debug, Clone, Copy, Default)]
pub struct KillOptions {
    /// Kill without waiting for a graceful stop
    pub force: bool,
    /// Remove the container after stopping it
    pub rm: bool,
    /// Also remove the data container
    pub rm_data: bool,
    /// Also remove volumes
    pub volumes: bool,
    /// Graceful stop timeout, or the configured default
    pub timeout: Option<u32>,
}

/// Arguments of an exec session
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub args: Vec<String>,
    /// Attach a terminal
    pub interactive: bool,
    /// Directory under the Berth root to bind into the container
    pub volume: Option<String>,
}

impl ExecOptions {
    fn apply(&self, op: &mut Operation) {
        op.args = self.args.clone();
        op.interactive = self.interactive;
        op.volume = self.volume.clone();
    }
}

/// Entry point for user-level operations
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<Settings>,
    loader: DefinitionLoader,
    manager: ContainerManager,
    transfer: DataTransfer,
}

impl Orchestrator {
    pub fn new(runtime: DynContainerRuntime, settings: Settings, confirm: Arc<dyn Confirm>) -> Self {
        let settings = Arc::new(settings);
        let loader = DefinitionLoader::new(runtime.clone(), &settings);
        let manager = ContainerManager::new(runtime, settings.clone(), confirm);
        let transfer = DataTransfer::new(manager.clone());

        Self {
            settings,
            loader,
            manager,
            transfer,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn loader(&self) -> &DefinitionLoader {
        &self.loader
    }

    pub fn manager(&self) -> &ContainerManager {
        &self.manager
    }

    pub fn transfer(&self) -> &DataTransfer {
        &self.transfer
    }

    fn stop_timeout(&self, opts: &KillOptions) -> u32 {
        if opts.force {
            0
        } else {
            opts.timeout.unwrap_or(self.settings.stop_timeout)
        }
    }

    /// Load a definition for an operation on an existing instance. A
    /// `number` of 0 picks the highest existing instance, or 1 when there
    /// is none.
    async fn load_existing(&self, kind: ContainerKind, name: &str, number: u32) -> Result<Definition> {
        match self.loader.load(kind, name, false, number).await {
            Err(BerthError::ContainerNotFound(_)) if number == 0 => {
                self.loader.load(kind, name, false, 1).await
            }
            result => result,
        }
    }

    /// Stop the container of `def`, then remove it as `opts` asks.
    async fn kill(&self, def: &Definition, opts: &KillOptions) -> Result<()> {
        let op = &def.operation;
        self.manager
            .stop(&op.container_name, self.stop_timeout(opts))
            .await?;
        if opts.rm {
            self.manager.remove(op, opts.rm_data, opts.volumes).await?;
        }
        Ok(())
    }
}
