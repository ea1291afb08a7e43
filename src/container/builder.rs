//! Definition to container spec translation
//!
//! Pure functions: no runtime calls happen here.

use super::config::{ContainerSpec, HostSpec, PortBinding, RestartPolicy};
use crate::config::Settings;
use crate::definition::{Operation, Service};
use crate::error::Result;
use tracing::debug;

/// Network mode of service containers
pub const NETWORK_MODE: &str = "bridge";

/// Root user of exec containers
pub const ROOT_USER: &str = "root";

fn split_words(value: &Option<String>) -> Option<Vec<String>> {
    let words: Vec<String> = value
        .as_deref()?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    (!words.is_empty()).then_some(words)
}

/// Container side of a `host:container[:mode]` bind.
fn bind_target(bind: &str) -> Option<&str> {
    bind.split(':').nth(1).filter(|target| !target.is_empty())
}

/// Build the spec of a service or chain container.
pub fn service_spec(service: &Service, op: &Operation) -> Result<ContainerSpec> {
    let mut spec = ContainerSpec::new(&op.container_name, &service.image);
    spec.env = service.environment.clone();
    spec.labels = op.labels();
    spec.entrypoint = split_words(&service.entry_point);
    spec.cmd = split_words(&service.command);
    spec.working_dir = service.work_dir.clone();
    spec.user = service.user.clone();
    spec.hostname = service.hostname.clone();
    spec.domainname = service.domainname.clone();
    spec.volumes = service
        .volumes
        .iter()
        .filter_map(|bind| bind_target(bind))
        .map(str::to_string)
        .collect();
    spec.tty = true;

    spec.host = HostSpec {
        binds: service.volumes.clone(),
        links: service.links.clone(),
        volumes_from: service.volumes_from.clone(),
        publish_all_ports: op.publish_all_ports,
        privileged: op.privileged,
        cap_add: op.cap_add.clone(),
        cap_drop: op.cap_drop.clone(),
        restart: op.restart,
        network_mode: Some(NETWORK_MODE.to_string()),
        dns: service.dns.clone(),
        dns_search: service.dns_search.clone(),
        memory: service.mem_limit,
        cpu_shares: service.cpu_shares,
        ..Default::default()
    };

    for port in &service.ports {
        let binding = PortBinding::parse(port)?;
        if op.publish_all_ports {
            if !spec.exposed_ports.contains(&binding.port) {
                spec.exposed_ports.push(binding.port);
            }
        } else {
            spec = spec.port(binding);
        }
    }

    debug!("Built spec for {}: {:?}", spec.name, spec);
    Ok(spec)
}

/// Build the spec of the data container paired with `op`.
///
/// When the owning service spec is given, it gains a volumes-from mount of
/// the data container and the data container records its owner.
pub fn data_spec(
    service: &Service,
    settings: &Settings,
    op: &Operation,
    owner: Option<&mut ContainerSpec>,
) -> ContainerSpec {
    let image = if service.image.is_empty() {
        &settings.data_image
    } else {
        &service.image
    };

    let mut identity = op.data_identity();
    if let Some(owner) = owner {
        identity = identity.owned_by(&owner.name);
        if !owner.host.volumes_from.contains(&op.data_container_name) {
            owner
                .host
                .volumes_from
                .push(op.data_container_name.clone());
        }
    }

    let mut spec = ContainerSpec::new(&op.data_container_name, image);
    spec.labels = identity.to_labels();
    spec.entrypoint = Some(vec!["true".to_string()]);
    spec.cmd = Some(Vec::new());
    spec.volumes = vec![settings.container_root.clone()];
    spec.network_disabled = true;
    spec
}

/// Build an attachable exec container based on a service's spec.
///
/// Interactive sessions replace the entry point with `op.args`, or the
/// shell when there are none. Otherwise `op.args` becomes the command.
pub fn interactive_spec(service: &Service, settings: &Settings, op: &Operation) -> Result<ContainerSpec> {
    let mut spec = service_spec(service, op)?;
    let identity = op.exec_identity();

    spec.name = identity.container_name();
    spec.labels = identity.to_labels();
    spec.user = Some(ROOT_USER.to_string());
    spec.tty = true;
    spec.attach = true;
    spec.open_stdin = op.interactive;
    spec.host.port_bindings.clear();
    spec.host.restart = RestartPolicy::Never;

    if op.interactive {
        spec.entrypoint = Some(if op.args.is_empty() {
            vec![settings.shell.clone()]
        } else {
            op.args.clone()
        });
        spec.cmd = Some(Vec::new());
    } else {
        spec.cmd = Some(op.args.clone());
    }

    if let Some(ref volume) = op.volume {
        let volume = volume.trim_matches('/');
        spec = spec.bind(
            &settings.root.join(volume).to_string_lossy(),
            &format!("{}/{}", settings.container_root, volume),
        );
    }

    if service.auto_data && !spec.host.volumes_from.contains(&op.data_container_name) {
        spec.host.volumes_from.push(op.data_container_name.clone());
    }
    Ok(spec)
}

/// Build an exec container mounting the volumes of `op`'s data container.
///
/// With a service, its image, user, environment, links and entry point
/// replace the exec defaults.
pub fn volumes_from_spec(op: &Operation, settings: &Settings, service: Option<&Service>) -> ContainerSpec {
    let identity = op.exec_identity();

    let mut spec = ContainerSpec::new(&identity.container_name(), &settings.exec_image);
    spec.labels = identity.to_labels();
    spec.user = Some(ROOT_USER.to_string());
    spec.working_dir = Some(settings.container_root.clone());
    spec.attach = true;
    spec.tty = true;
    spec.host.volumes_from = vec![op.data_container_name.clone()];

    if op.interactive {
        spec.open_stdin = true;
        spec.cmd = Some(if op.args.is_empty() {
            vec![settings.shell.clone()]
        } else {
            op.args.clone()
        });
    } else {
        spec.cmd = Some(op.args.clone());
    }

    if let Some(service) = service {
        if !service.image.is_empty() {
            spec.image = service.image.clone();
        }
        if service.user.is_some() {
            spec.user = service.user.clone();
        }
        spec.env = service.environment.clone();
        spec.host.links = service.links.clone();
        spec.entrypoint = split_words(&service.entry_point);
    }
    spec
}
