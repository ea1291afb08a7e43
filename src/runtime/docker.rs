//! Docker Engine backend

use super::{
    AttachStreams, ByteStream, ContainerDetails, ContainerRuntime, ContainerSummary,
    ImageReference, ListFilter, LogOptions, RegistryAuth, RemoveOptions,
};
use crate::container::{ContainerSpec, HostSpec, Port, PortBinding, RestartPolicy};
use crate::error::{BerthError, Result};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    DownloadFromContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{self, HostConfig, RestartPolicyNameEnum};
use bollard::Docker;
use bytes::Bytes;
use futures_util::{future, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Container runtime speaking the Docker Engine API
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_defaults()
            .map_err(|e| BerthError::Runtime(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn status_code(err: &DockerError) -> Option<u16> {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn map_error(err: DockerError, subject: &str) -> BerthError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => BerthError::ContainerNotFound(subject.to_string()),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => BerthError::Runtime(format!("{} (status {})", message, status_code)),
        other => BerthError::Runtime(other.to_string()),
    }
}

/// Map a failed create. The engine answers 404 both for a missing image
/// and for a missing volumes-from or link target; only the first is
/// `ImageNotFound`.
fn create_error(err: DockerError, spec: &ContainerSpec) -> BerthError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } if message.contains("No such image") => BerthError::ImageNotFound(spec.image.clone()),
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => BerthError::Runtime(format!("Cannot create {}: {}", spec.name, message)),
        DockerError::DockerResponseServerError {
            status_code: 409, ..
        } => BerthError::ContainerExists(spec.name.clone()),
        other => map_error(other, &spec.name),
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

fn restart_policy(policy: RestartPolicy) -> models::RestartPolicy {
    match policy {
        RestartPolicy::Never => models::RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        },
        RestartPolicy::Always => models::RestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            maximum_retry_count: None,
        },
        RestartPolicy::OnFailure { max_retries } => models::RestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(max_retries as i64),
        },
    }
}

fn restart_from(policy: Option<models::RestartPolicy>) -> RestartPolicy {
    let Some(policy) = policy else {
        return RestartPolicy::Never;
    };
    match policy.name {
        Some(RestartPolicyNameEnum::ALWAYS) => RestartPolicy::Always,
        Some(RestartPolicyNameEnum::ON_FAILURE) => RestartPolicy::OnFailure {
            max_retries: policy.maximum_retry_count.unwrap_or(0).max(0) as u32,
        },
        _ => RestartPolicy::Never,
    }
}

fn to_host_config(host: &HostSpec) -> HostConfig {
    let mut port_bindings: HashMap<String, Option<Vec<models::PortBinding>>> = HashMap::new();
    if !host.publish_all_ports {
        for binding in &host.port_bindings {
            port_bindings
                .entry(binding.port.to_string())
                .or_default()
                .get_or_insert_with(Vec::new)
                .push(models::PortBinding {
                    host_ip: binding.host_ip.clone(),
                    host_port: binding.host_port.map(|p| p.to_string()),
                });
        }
    }

    HostConfig {
        binds: non_empty(&host.binds),
        links: non_empty(&host.links),
        volumes_from: non_empty(&host.volumes_from),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        publish_all_ports: Some(host.publish_all_ports),
        privileged: Some(host.privileged),
        cap_add: non_empty(&host.cap_add),
        cap_drop: non_empty(&host.cap_drop),
        restart_policy: Some(restart_policy(host.restart)),
        network_mode: host.network_mode.clone(),
        dns: non_empty(&host.dns),
        dns_search: non_empty(&host.dns_search),
        memory: host.memory,
        cpu_shares: host.cpu_shares,
        ..Default::default()
    }
}

fn to_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|p| (p.to_string(), HashMap::new()))
        .collect();
    let volumes: HashMap<String, HashMap<(), ()>> = spec
        .volumes
        .iter()
        .map(|v| (v.clone(), HashMap::new()))
        .collect();

    Config {
        image: Some(spec.image.clone()),
        env: non_empty(&spec.env),
        entrypoint: spec.entrypoint.clone(),
        cmd: spec.cmd.clone(),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        hostname: spec.hostname.clone(),
        domainname: spec.domainname.clone(),
        labels: Some(spec.labels.clone()),
        exposed_ports: Some(exposed_ports),
        volumes: Some(volumes),
        tty: Some(spec.tty),
        open_stdin: Some(spec.open_stdin),
        attach_stdin: Some(spec.attach),
        attach_stdout: Some(spec.attach),
        attach_stderr: Some(spec.attach),
        network_disabled: Some(spec.network_disabled),
        host_config: Some(to_host_config(&spec.host)),
        ..Default::default()
    }
}

/// Inspected links read `/target:/container/alias`; rewrite to `target:alias`.
fn normalize_link(link: &str) -> String {
    match link.split_once(':') {
        Some((target, alias)) if target.starts_with('/') => {
            let alias = alias.rsplit('/').next().unwrap_or(alias);
            format!("{}:{}", target.trim_start_matches('/'), alias)
        }
        _ => link.to_string(),
    }
}

fn filled(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn spec_from_inspect(name: &str, config: models::ContainerConfig, host: HostConfig) -> ContainerSpec {
    let exposed_ports = config
        .exposed_ports
        .unwrap_or_default()
        .keys()
        .filter_map(|p| p.parse::<Port>().ok())
        .collect();

    let mut port_bindings = Vec::new();
    for (port, bindings) in host.port_bindings.unwrap_or_default() {
        let Ok(port) = port.parse::<Port>() else {
            continue;
        };
        for binding in bindings.unwrap_or_default() {
            port_bindings.push(PortBinding {
                port,
                host_ip: filled(binding.host_ip),
                host_port: binding.host_port.and_then(|p| p.parse().ok()),
            });
        }
    }

    ContainerSpec {
        name: name.to_string(),
        image: config.image.unwrap_or_default(),
        env: config.env.unwrap_or_default(),
        entrypoint: config.entrypoint,
        cmd: config.cmd,
        working_dir: filled(config.working_dir),
        user: filled(config.user),
        hostname: filled(config.hostname),
        domainname: filled(config.domainname),
        labels: config.labels.unwrap_or_default(),
        exposed_ports,
        volumes: config.volumes.unwrap_or_default().into_keys().collect(),
        tty: config.tty.unwrap_or(false),
        open_stdin: config.open_stdin.unwrap_or(false),
        attach: config.attach_stdin.unwrap_or(false),
        network_disabled: config.network_disabled.unwrap_or(false),
        host: HostSpec {
            binds: host.binds.unwrap_or_default(),
            links: host
                .links
                .unwrap_or_default()
                .iter()
                .map(|l| normalize_link(l))
                .collect(),
            volumes_from: host.volumes_from.unwrap_or_default(),
            port_bindings,
            publish_all_ports: host.publish_all_ports.unwrap_or(false),
            privileged: host.privileged.unwrap_or(false),
            cap_add: host.cap_add.unwrap_or_default(),
            cap_drop: host.cap_drop.unwrap_or_default(),
            restart: restart_from(host.restart_policy),
            network_mode: filled(host.network_mode),
            dns: host.dns.unwrap_or_default(),
            dns_search: host.dns_search.unwrap_or_default(),
            memory: host.memory.filter(|m| *m > 0),
            cpu_shares: host.cpu_shares.filter(|c| *c > 0),
        },
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        tracing::debug!("Creating container {} from {}", spec.name, spec.image);
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        match self.docker.create_container(Some(options), to_config(spec)).await {
            Ok(response) => Ok(response.id),
            Err(e) => Err(create_error(e, spec)),
        }
    }

    async fn start(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(map_error(e, name)),
        }
    }

    async fn stop(&self, name: &str, timeout: u32) -> Result<()> {
        let options = StopContainerOptions { t: timeout as i64 };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(map_error(e, name)),
        }
    }

    async fn remove(&self, name: &str, opts: RemoveOptions) -> Result<()> {
        let options = RemoveContainerOptions {
            v: opts.volumes,
            force: opts.force,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| map_error(e, name))
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                let full_name = info
                    .name
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string();
                let running = info.state.and_then(|s| s.running).unwrap_or(false);
                let spec = spec_from_inspect(
                    &full_name,
                    info.config.unwrap_or_default(),
                    info.host_config.unwrap_or_default(),
                );
                Ok(Some(ContainerDetails {
                    id: info.id.unwrap_or_default(),
                    name: full_name,
                    running,
                    spec,
                }))
            }
            Err(e) if status_code(&e) == Some(404) => Ok(None),
            Err(e) => Err(map_error(e, name)),
        }
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        if !filter.labels.is_empty() {
            let labels: Vec<String> = filter
                .labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            filters.insert("label".to_string(), labels);
        }

        let options = ListContainersOptions {
            all: filter.all,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_error(e, "containers"))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                running: c.state.as_deref() == Some("running"),
            })
            .collect())
    }

    async fn logs(&self, name: &str, opts: LogOptions) -> Result<ByteStream> {
        let options = LogsOptions::<String> {
            follow: opts.follow,
            stdout: true,
            stderr: true,
            tail: opts
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let subject = name.to_string();
        let stream = self
            .docker
            .logs(name, Some(options))
            .map(move |chunk| {
                chunk
                    .map(|output| output.into_bytes().to_vec())
                    .map_err(|e| map_error(e, &subject))
            });
        Ok(Box::pin(stream))
    }

    async fn attach(&self, name: &str) -> Result<AttachStreams> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };

        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(name, Some(options))
            .await
            .map_err(|e| map_error(e, name))?;

        let subject = name.to_string();
        let output = output.map(move |chunk| {
            chunk
                .map(|output| output.into_bytes().to_vec())
                .map_err(|e| map_error(e, &subject))
        });

        Ok(AttachStreams {
            output: Box::pin(output),
            input,
        })
    }

    async fn wait(&self, name: &str) -> Result<i64> {
        let mut stream = Box::pin(
            self.docker
                .wait_container(name, None::<WaitContainerOptions<String>>),
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(map_error(e, name)),
            None => Err(BerthError::Runtime(format!(
                "no exit status reported for {}",
                name
            ))),
        }
    }

    async fn pull_image(&self, image: &ImageReference, auth: Option<&RegistryAuth>) -> Result<()> {
        tracing::info!("Pulling image {}", image);
        let options = CreateImageOptions {
            from_image: image.repository.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };
        let credentials = auth.map(|a| DockerCredentials {
            username: a.username.clone(),
            password: a.password.clone(),
            serveraddress: a.server.clone().or_else(|| image.registry.clone()),
            ..Default::default()
        });

        let mut progress = Box::pin(self.docker.create_image(Some(options), None, credentials));
        while let Some(info) = progress.next().await {
            let info = info.map_err(|e| match status_code(&e) {
                Some(404) => BerthError::ImageNotFound(image.full_name()),
                _ => map_error(e, &image.full_name()),
            })?;
            if let Some(status) = info.status {
                tracing::debug!("{}: {}", image, status);
            }
        }
        Ok(())
    }

    async fn upload_archive(&self, name: &str, path: &str, archive: ByteStream) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            no_overwrite_dir_non_dir: "true".to_string(),
        };

        // The request body cannot carry errors; end it at the first one and
        // report that instead of the engine's answer to a truncated archive.
        let failure: Arc<Mutex<Option<BerthError>>> = Arc::new(Mutex::new(None));
        let slot = failure.clone();
        let body = archive.scan((), move |_, chunk| {
            let next = match chunk {
                Ok(data) => Some(Bytes::from(data)),
                Err(e) => {
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some(e);
                    }
                    None
                }
            };
            future::ready(next)
        });

        let uploaded = self
            .docker
            .upload_to_container_streaming(name, Some(options), body)
            .await
            .map_err(|e| map_error(e, name));

        let failed = failure.lock().ok().and_then(|mut slot| slot.take());
        match failed {
            Some(e) => Err(e),
            None => uploaded,
        }
    }

    async fn download_archive(&self, name: &str, path: &str) -> Result<ByteStream> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };

        let subject = format!("{}:{}", name, path);
        let stream = self
            .docker
            .download_from_container(name, Some(options))
            .map(move |chunk| {
                chunk.map(|bytes| bytes.to_vec()).map_err(|e| match status_code(&e) {
                    Some(404) => BerthError::Transfer(format!("no such path: {}", subject)),
                    _ => map_error(e, &subject),
                })
            });
        Ok(Box::pin(stream))
    }
}
