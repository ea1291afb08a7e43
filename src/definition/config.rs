//! Definition file types

use super::operation::Operation;
use serde::{Deserialize, Serialize};

/// Service, chain or data definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definition {
    /// Logical name
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Chain identifier, chains only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    /// Container settings
    #[serde(default)]
    pub service: Service,
    /// Services and chains this definition needs running
    #[serde(default)]
    pub dependencies: Dependencies,
    /// Maintainer contact
    #[serde(default)]
    pub maintainer: Maintainer,
    /// Runtime identity resolved at load time
    #[serde(skip)]
    pub operation: Operation,
}

/// Container settings of a definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Service name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Image name/tag
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Manage a companion data container
    #[serde(default, rename = "data_container")]
    pub auto_data: bool,
    /// Port specs, `[host_ip:][host_port:]container_port[/proto]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Bind mounts, `host:container[:mode]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Environment, `KEY=value`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
    /// Links, `container:alias`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Containers to mount volumes from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<String>,
    /// Entry point, whitespace separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Command, whitespace separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    /// User
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Domain name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domainname: Option<String>,
    /// DNS servers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    /// DNS search domains
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_search: Vec<String>,
    /// Memory limit in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<i64>,
    /// CPU shares
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<i64>,
    /// Restart policy, `always` or `max:<N>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
}

impl Service {
    /// Fill fields left unset from a template service.
    pub fn fill_from(&mut self, template: &Service) {
        fn fill<T: Clone>(field: &mut Option<T>, template: &Option<T>) {
            if field.is_none() {
                *field = template.clone();
            }
        }
        fn fill_vec(field: &mut Vec<String>, template: &[String]) {
            if field.is_empty() {
                *field = template.to_vec();
            }
        }

        if self.image.is_empty() {
            self.image = template.image.clone();
        }
        self.auto_data |= template.auto_data;
        fill_vec(&mut self.ports, &template.ports);
        fill_vec(&mut self.volumes, &template.volumes);
        fill_vec(&mut self.environment, &template.environment);
        fill_vec(&mut self.links, &template.links);
        fill_vec(&mut self.volumes_from, &template.volumes_from);
        fill(&mut self.entry_point, &template.entry_point);
        fill(&mut self.command, &template.command);
        fill(&mut self.work_dir, &template.work_dir);
        fill(&mut self.user, &template.user);
        fill(&mut self.hostname, &template.hostname);
        fill(&mut self.domainname, &template.domainname);
        fill_vec(&mut self.dns, &template.dns);
        fill_vec(&mut self.dns_search, &template.dns_search);
        fill(&mut self.mem_limit, &template.mem_limit);
        fill(&mut self.cpu_shares, &template.cpu_shares);
        fill(&mut self.restart, &template.restart);
    }
}

/// Declared dependencies, each `name[:alias[:link[:mount]]]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chains: Vec<String>,
}

impl Dependencies {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.chains.is_empty()
    }
}

/// Maintainer contact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Maintainer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}
