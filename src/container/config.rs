//! Container configuration

use crate::error::{BerthError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Runtime-neutral description of a container to create
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image name/tag
    pub image: String,
    /// Environment as `KEY=value` strings, in order
    pub env: Vec<String>,
    /// Entry point override; `None` keeps the image default
    pub entrypoint: Option<Vec<String>>,
    /// Command override; `None` keeps the image default
    pub cmd: Option<Vec<String>>,
    /// Working directory
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Hostname
    pub hostname: Option<String>,
    /// Domain name
    pub domainname: Option<String>,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Exposed ports
    pub exposed_ports: Vec<Port>,
    /// Container paths declared as volumes
    pub volumes: Vec<String>,
    /// Allocate a TTY
    pub tty: bool,
    /// Keep stdin open
    pub open_stdin: bool,
    /// Attach stdin, stdout and stderr
    pub attach: bool,
    /// Disable networking
    pub network_disabled: bool,
    /// Host-side configuration
    pub host: HostSpec,
}

impl ContainerSpec {
    /// Create a new container specification
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        }
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    /// Set command to run
    pub fn cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }

    /// Add a bind mount
    pub fn bind(mut self, host_path: &str, container_path: &str) -> Self {
        self.host
            .binds
            .push(format!("{}:{}", host_path, container_path));
        self
    }

    /// Add a port binding, exposing its container port
    pub fn port(mut self, binding: PortBinding) -> Self {
        if !self.exposed_ports.contains(&binding.port) {
            self.exposed_ports.push(binding.port);
        }
        self.host.port_bindings.push(binding);
        self
    }
}

/// Host configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    /// Bind mounts as `host:container[:mode]`
    pub binds: Vec<String>,
    /// Links as `container:alias`
    pub links: Vec<String>,
    /// Containers whose volumes are mounted, optionally suffixed `:ro`/`:rw`
    pub volumes_from: Vec<String>,
    /// Explicit port bindings
    pub port_bindings: Vec<PortBinding>,
    /// Publish every exposed port on a random host port
    pub publish_all_ports: bool,
    /// Privileged mode
    pub privileged: bool,
    /// Capabilities to add
    pub cap_add: Vec<String>,
    /// Capabilities to drop
    pub cap_drop: Vec<String>,
    /// Restart policy
    pub restart: RestartPolicy,
    /// Network mode
    pub network_mode: Option<String>,
    /// DNS servers
    pub dns: Vec<String>,
    /// DNS search domains
    pub dns_search: Vec<String>,
    /// Memory limit in bytes
    pub memory: Option<i64>,
    /// CPU shares
    pub cpu_shares: Option<i64>,
}

/// Network protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(BerthError::InvalidConfig(format!(
                "unknown port protocol: {}",
                other
            ))),
        }
    }
}

/// Container port with protocol, written `8080/tcp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub protocol: Protocol,
}

impl Port {
    pub fn tcp(number: u16) -> Self {
        Self {
            number,
            protocol: Protocol::Tcp,
        }
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

impl FromStr for Port {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        let (number, protocol) = match s.split_once('/') {
            Some((number, protocol)) => (number, protocol.parse()?),
            None => (s, Protocol::Tcp),
        };
        let number = number
            .trim()
            .parse()
            .map_err(|_| BerthError::InvalidConfig(format!("invalid container port: {}", s)))?;
        Ok(Self { number, protocol })
    }
}

/// Binding of a container port to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub port: Port,
    /// Host address; `None` binds every interface
    pub host_ip: Option<String>,
    /// Host port; `None` lets the runtime pick one
    pub host_port: Option<u16>,
}

impl PortBinding {
    /// Parse `[host_ip:][host_port:]container_port[/proto]`.
    ///
    /// The last segment is the container port, the one before it the host
    /// port, and everything earlier the host address. Addresses with more
    /// than one segment are IPv6 and are joined back with colons.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        let n = parts.len();
        let port: Port = parts[n - 1].parse()?;

        let host_port = if n > 1 && !parts[n - 2].is_empty() {
            Some(parts[n - 2].parse().map_err(|_| {
                BerthError::InvalidConfig(format!("invalid host port in {}", spec))
            })?)
        } else {
            None
        };

        let host_ip = if n > 2 {
            let ip = parts[..n - 2].join(":");
            let ip = ip.trim_start_matches('[').trim_end_matches(']');
            (!ip.is_empty()).then(|| ip.to_string())
        } else {
            None
        };

        Ok(Self {
            port,
            host_ip,
            host_port,
        })
    }
}

/// Restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Never,
    Always,
    OnFailure { max_retries: u32 },
}

impl RestartPolicy {
    /// Parse `always`, `max:<N>`, or anything else as never.
    pub fn parse(policy: &str) -> Self {
        let policy = policy.trim();
        if policy == "always" {
            return RestartPolicy::Always;
        }
        if let Some(times) = policy.strip_prefix("max:") {
            match times.trim().parse() {
                Ok(max_retries) => return RestartPolicy::OnFailure { max_retries },
                Err(_) => tracing::warn!("Ignoring malformed restart policy {:?}", policy),
            }
        }
        RestartPolicy::Never
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_container_only() {
        let binding = PortBinding::parse("8080").unwrap();
        assert_eq!(binding.port, Port::tcp(8080));
        assert_eq!(binding.host_port, None);
        assert_eq!(binding.host_ip, None);
    }

    #[test]
    fn test_port_host_and_container() {
        let binding = PortBinding::parse("80:8080").unwrap();
        assert_eq!(binding.port.number, 8080);
        assert_eq!(binding.host_port, Some(80));
        assert_eq!(binding.host_ip, None);
    }

    #[test]
    fn test_port_ipv4_address() {
        let binding = PortBinding::parse("127.0.0.1:80:8080").unwrap();
        assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(binding.host_port, Some(80));
        assert_eq!(binding.port.number, 8080);
    }

    #[test]
    fn test_port_ipv6_address() {
        let binding = PortBinding::parse("::1:80:8080").unwrap();
        assert_eq!(binding.host_ip.as_deref(), Some("::1"));
        assert_eq!(binding.host_port, Some(80));

        let bracketed = PortBinding::parse("[fe80::1]:443:443/tcp").unwrap();
        assert_eq!(bracketed.host_ip.as_deref(), Some("fe80::1"));
    }

    #[test]
    fn test_port_protocol_preserved() {
        let binding = PortBinding::parse("8080/udp").unwrap();
        assert_eq!(binding.port.protocol, Protocol::Udp);
        assert_eq!(binding.port.to_string(), "8080/udp");
    }

    #[test]
    fn test_port_invalid() {
        assert!(PortBinding::parse("http").is_err());
        assert!(PortBinding::parse("80:8080/icmp").is_err());
        assert!(PortBinding::parse("x:8080").is_err());
    }

    #[test]
    fn test_restart_policy() {
        assert_eq!(RestartPolicy::parse("always"), RestartPolicy::Always);
        assert_eq!(
            RestartPolicy::parse("max:3"),
            RestartPolicy::OnFailure { max_retries: 3 }
        );
        assert_eq!(RestartPolicy::parse(""), RestartPolicy::Never);
        assert_eq!(RestartPolicy::parse("sometimes"), RestartPolicy::Never);
        assert_eq!(RestartPolicy::parse("max:lots"), RestartPolicy::Never);
    }

    #[test]
    fn test_spec_builder() {
        let spec = ContainerSpec::new("web", "nginx:latest")
            .env("KEY", "value")
            .bind("/srv", "/data")
            .port(PortBinding::parse("80:8080").unwrap())
            .port(PortBinding::parse("127.0.0.1:81:8080").unwrap());

        assert_eq!(spec.env, vec!["KEY=value"]);
        assert_eq!(spec.host.binds, vec!["/srv:/data"]);
        assert_eq!(spec.exposed_ports, vec![Port::tcp(8080)]);
        assert_eq!(spec.host.port_bindings.len(), 2);
    }
}
