//! Service operations

use super::{ExecOptions, KillOptions, Orchestrator, RunOptions};
use crate::container::{builder, SessionIo};
use crate::definition::Definition;
use crate::error::{BerthError, Result};
use crate::naming::{self, ContainerIdentity, ContainerKind};
use crate::runtime::{ContainerDetails, ContainerSummary, LogOptions};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::info;

impl Orchestrator {
    /// Boot the dependencies of a service, then start it.
    pub async fn start_service(&self, name: &str, number: u32, opts: &RunOptions) -> Result<()> {
        let mut def = self
            .load_existing(ContainerKind::Service, name, number)
            .await?;
        opts.apply(&mut def.operation);

        self.boot_dependencies(&def).await?;
        self.manager.start_service(&def).await
    }

    /// Stop a service, removing it when asked.
    pub async fn kill_service(&self, name: &str, number: u32, opts: &KillOptions) -> Result<()> {
        let def = self
            .load_existing(ContainerKind::Service, name, number)
            .await?;
        self.kill(&def, opts).await
    }

    /// Run a command, or a shell, in a throwaway container built from the
    /// service definition.
    pub async fn exec_service(
        &self,
        name: &str,
        number: u32,
        exec: &ExecOptions,
        io: SessionIo,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut def = self
            .load_existing(ContainerKind::Service, name, number)
            .await?;
        exec.apply(&mut def.operation);

        self.boot_dependencies(&def).await?;
        if def.service.auto_data {
            self.manager.ensure_data_container(&def).await?;
        }
        let spec = builder::interactive_spec(&def.service, &self.settings, &def.operation)?;
        self.manager.exec(&spec, io, cancel).await
    }

    /// Recreate a service container, optionally pulling a fresh image.
    pub async fn update_service(&self, name: &str, number: u32, pull: bool, timeout: Option<u32>) -> Result<()> {
        let def = self
            .load_existing(ContainerKind::Service, name, number)
            .await?;
        let timeout = timeout.unwrap_or(self.settings.stop_timeout);
        self.manager.rebuild(&def, pull, timeout).await
    }

    /// Pull the image of a service, replacing its container.
    pub async fn pull_service(&self, name: &str, number: u32) -> Result<()> {
        let def = self
            .load_existing(ContainerKind::Service, name, number)
            .await?;
        self.manager.pull(&def, self.settings.stop_timeout).await
    }

    /// Give a service container, and its data container, a new logical name.
    pub async fn rename_service(&self, old: &str, new: &str, number: u32) -> Result<()> {
        naming::validate_name(new)?;
        let def = self
            .load_existing(ContainerKind::Service, old, number)
            .await?;
        let op = &def.operation;

        let target = ContainerIdentity::new(ContainerKind::Service, new, op.number);
        let moved = self
            .rename_data_of(&def, new, &target.container_name())
            .await?;
        self.manager
            .rename(&op.container_name, &target, &moved)
            .await?;

        info!("Renamed service {} to {}", old, new);
        Ok(())
    }

    /// Rename the data container of `def`, if it has one, ahead of its
    /// owner. Returns the move for the owner's volumes-from.
    pub(super) async fn rename_data_of(
        &self,
        def: &Definition,
        new: &str,
        owner: &str,
    ) -> Result<Vec<(String, String)>> {
        let op = &def.operation;
        if !def.service.auto_data || !self.manager.exists(&op.data_container_name).await? {
            return Ok(Vec::new());
        }

        let data = ContainerIdentity::new(ContainerKind::Data, new, op.number).owned_by(owner);
        let new_name = data.container_name();
        if self.manager.exists(owner).await? {
            return Err(BerthError::ContainerExists(owner.to_string()));
        }
        self.manager
            .rename(&op.data_container_name, &data, &[])
            .await?;
        Ok(vec![(op.data_container_name.clone(), new_name)])
    }

    /// Remove a service container, and optionally its data container,
    /// volumes and definition file.
    pub async fn rm_service(
        &self,
        name: &str,
        number: u32,
        data: bool,
        volumes: bool,
        file: bool,
    ) -> Result<()> {
        let def = self
            .load_existing(ContainerKind::Service, name, number)
            .await?;
        self.manager.remove(&def.operation, data, volumes).await?;
        if file {
            self.loader.store().remove(ContainerKind::Service, name)?;
        }
        Ok(())
    }

    pub async fn service_logs<W>(&self, name: &str, number: u32, opts: LogOptions, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let def = self
            .load_existing(ContainerKind::Service, name, number)
            .await?;
        self.manager
            .logs(&def.operation.container_name, opts, out)
            .await
    }

    pub async fn inspect_service(&self, name: &str, number: u32) -> Result<ContainerDetails> {
        let def = self
            .load_existing(ContainerKind::Service, name, number)
            .await?;
        self.manager.inspect(&def.operation.container_name).await
    }

    /// Managed containers of `kind`
    pub async fn list(&self, kind: ContainerKind) -> Result<Vec<(ContainerIdentity, ContainerSummary)>> {
        self.manager.list(kind).await
    }

    /// Definition files of `kind`
    pub fn list_definitions(&self, kind: ContainerKind) -> Result<Vec<String>> {
        self.loader.store().list(kind)
    }
}

#[cfg(test)]
mod tests {
    use crate::container::SessionIo;
    use crate::error::BerthError;
    use crate::naming::{labels, ContainerKind};
    use crate::orchestrator::testing::Fixture;
    use crate::orchestrator::{ExecOptions, KillOptions, RunOptions};
    use crate::runtime::LogOptions;
    use tokio_util::sync::CancellationToken;

    const IPFS: (&str, &str) = (
        "services/ipfs.toml",
        "name = \"ipfs\"\n[service]\nimage = \"eris/ipfs\"\ndata_container = true\nports = [\"4001:4001\"]\n",
    );

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let fixture = Fixture::new(&[IPFS]);
        let orchestrator = &fixture.orchestrator;

        orchestrator
            .start_service("ipfs", 1, &RunOptions::default())
            .await
            .unwrap();
        let before = fixture.runtime.events().len();
        orchestrator
            .start_service("ipfs", 0, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(fixture.runtime.events().len(), before);
        assert!(fixture.exists("berth_data_ipfs_1").await);
    }

    #[tokio::test]
    async fn test_start_publish_all() {
        let fixture = Fixture::new(&[IPFS]);
        let opts = RunOptions {
            publish_all: true,
            ..Default::default()
        };
        fixture
            .orchestrator
            .start_service("ipfs", 1, &opts)
            .await
            .unwrap();

        let details = fixture
            .orchestrator
            .inspect_service("ipfs", 1)
            .await
            .unwrap();
        assert!(details.spec.host.publish_all_ports);
        assert!(details.spec.host.port_bindings.is_empty());
    }

    #[tokio::test]
    async fn test_kill_with_rm() {
        let fixture = Fixture::new(&[IPFS]);
        let orchestrator = &fixture.orchestrator;
        orchestrator
            .start_service("ipfs", 1, &RunOptions::default())
            .await
            .unwrap();

        let opts = KillOptions {
            force: true,
            rm: true,
            rm_data: true,
            ..Default::default()
        };
        orchestrator.kill_service("ipfs", 1, &opts).await.unwrap();
        assert!(fixture.runtime.container_names().is_empty());

        orchestrator.kill_service("ipfs", 1, &opts).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_service_with_data() {
        let fixture = Fixture::new(&[IPFS]);
        let orchestrator = &fixture.orchestrator;
        orchestrator
            .start_service("ipfs", 1, &RunOptions::default())
            .await
            .unwrap();

        orchestrator.rename_service("ipfs", "files", 1).await.unwrap();
        assert!(fixture.running("berth_service_files_1").await);
        assert!(!fixture.exists("berth_service_ipfs_1").await);

        let data = orchestrator
            .manager()
            .inspect("berth_data_files_1")
            .await
            .unwrap();
        assert_eq!(
            data.spec.labels.get(labels::SERVICE).map(String::as_str),
            Some("berth_service_files_1")
        );

        assert!(orchestrator.rename_service("ipfs", "bad name", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_rm() {
        let fixture = Fixture::new(&[IPFS]);
        let orchestrator = &fixture.orchestrator;
        orchestrator
            .start_service("ipfs", 1, &RunOptions::default())
            .await
            .unwrap();

        orchestrator.update_service("ipfs", 1, false, Some(1)).await.unwrap();
        assert!(fixture.running("berth_service_ipfs_1").await);

        orchestrator
            .kill_service("ipfs", 1, &KillOptions::default())
            .await
            .unwrap();
        orchestrator.rm_service("ipfs", 1, false, false, true).await.unwrap();
        assert!(!fixture.exists("berth_service_ipfs_1").await);
        assert!(fixture.exists("berth_data_ipfs_1").await);
        assert!(orchestrator
            .list_definitions(ContainerKind::Service)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_exec_service() {
        let fixture = Fixture::new(&[IPFS]);
        fixture
            .runtime
            .set_output("berth_exec_service_ipfs_1", b"hi\n")
            .unwrap();

        let (mut local, remote) = tokio::io::duplex(1024);
        let exec = ExecOptions {
            args: vec!["echo".to_string(), "hi".to_string()],
            ..Default::default()
        };
        fixture
            .orchestrator
            .exec_service(
                "ipfs",
                1,
                &exec,
                SessionIo::new(tokio::io::empty(), remote),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut local, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hi\n");
        assert!(!fixture.exists("berth_exec_service_ipfs_1").await);
        assert!(fixture.exists("berth_data_ipfs_1").await);
    }

    #[tokio::test]
    async fn test_logs_and_missing_definition() {
        let fixture = Fixture::new(&[IPFS]);
        let orchestrator = &fixture.orchestrator;
        orchestrator
            .start_service("ipfs", 1, &RunOptions::default())
            .await
            .unwrap();
        fixture
            .runtime
            .set_output("berth_service_ipfs_1", b"ready\n")
            .unwrap();

        let mut out = Vec::new();
        orchestrator
            .service_logs("ipfs", 1, LogOptions::default(), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"ready\n");

        let err = orchestrator
            .start_service("nope", 1, &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::DefinitionNotFound { .. }));
    }
}
