//! Runtime identity bound to a loaded definition

use crate::container::RestartPolicy;
use crate::naming::{self, ContainerIdentity, ContainerKind};
use std::collections::HashMap;

/// Resolved container names and per-invocation run options
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: ContainerKind,
    /// Logical name
    pub name: String,
    pub number: u32,
    pub container_name: String,
    /// Set when the container already exists
    pub container_id: Option<String>,
    pub data_container_name: String,
    /// Set when the data container already exists
    pub data_container_id: Option<String>,
    /// Publish exposed ports on random host ports
    pub publish_all_ports: bool,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub restart: RestartPolicy,
    /// Remove the container right after starting it
    pub remove: bool,
    /// Arguments for exec containers
    pub args: Vec<String>,
    /// Attach a terminal
    pub interactive: bool,
    /// Directory under the Berth root to bind into exec containers
    pub volume: Option<String>,
}

impl Default for Operation {
    fn default() -> Self {
        Self::new(ContainerKind::Service, "", 1)
    }
}

impl Operation {
    pub fn new(kind: ContainerKind, name: &str, number: u32) -> Self {
        Self {
            kind,
            name: name.to_string(),
            number,
            container_name: naming::container_name(kind, name, number),
            container_id: None,
            data_container_name: naming::data_container_name(name, number),
            data_container_id: None,
            publish_all_ports: false,
            privileged: false,
            cap_add: Vec::new(),
            cap_drop: Vec::new(),
            restart: RestartPolicy::Never,
            remove: false,
            args: Vec::new(),
            interactive: false,
            volume: None,
        }
    }

    pub fn identity(&self) -> ContainerIdentity {
        ContainerIdentity::new(self.kind, &self.name, self.number)
    }

    pub fn labels(&self) -> HashMap<String, String> {
        self.identity().to_labels()
    }

    /// Identity of the companion data container.
    pub fn data_identity(&self) -> ContainerIdentity {
        ContainerIdentity::new(ContainerKind::Data, &self.name, self.number)
    }

    /// Identity of the ephemeral exec container for this operation.
    pub fn exec_identity(&self) -> ContainerIdentity {
        ContainerIdentity::new(
            ContainerKind::Exec,
            &naming::exec_logical_name(self.kind, &self.name),
            self.number,
        )
    }

    /// Whether the container existed when the operation was loaded.
    pub fn exists(&self) -> bool {
        self.container_id.is_some()
    }
}
