//! Data container operations

use super::{ExecOptions, Orchestrator};
use crate::container::{builder, SessionIo};
use crate::definition::Definition;
use crate::error::{BerthError, Result};
use crate::naming::{self, ContainerIdentity, ContainerKind};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

impl Orchestrator {
    async fn existing_data(&self, name: &str, number: u32) -> Result<Definition> {
        let def = self.loader.load_data(name, number).await?;
        if def.operation.data_container_id.is_none() {
            return Err(BerthError::ContainerNotFound(
                def.operation.data_container_name,
            ));
        }
        Ok(def)
    }

    /// Create a data container, seeded from `<root>/data/<name>` when that
    /// directory exists.
    pub async fn new_data(&self, name: &str, number: u32) -> Result<()> {
        let def = self.loader.load_data(name, number).await?;
        if def.operation.data_container_id.is_some() {
            return Err(BerthError::ContainerExists(
                def.operation.data_container_name,
            ));
        }

        let dir = self.settings.data_dir(name);
        if dir.is_dir() {
            self.transfer
                .import(&def, &dir, &self.settings.container_root)
                .await
        } else {
            self.manager.ensure_data_container(&def).await
        }
    }

    /// Copy a host directory into a data container, creating the container
    /// when needed. `dest` defaults to the container root.
    pub async fn import_data(&self, name: &str, number: u32, src: &Path, dest: Option<&str>) -> Result<()> {
        if !src.is_dir() {
            return Err(BerthError::Transfer(format!(
                "{} is not a directory",
                src.display()
            )));
        }
        let def = self.loader.load_data(name, number).await?;
        let dest = dest.unwrap_or(&self.settings.container_root);
        self.transfer.import(&def, src, dest).await
    }

    /// Copy a directory out of a data container. `src` defaults to the
    /// container root and `dest` to `<root>/data/<name>`.
    pub async fn export_data(
        &self,
        name: &str,
        number: u32,
        src: Option<&str>,
        dest: Option<&Path>,
    ) -> Result<()> {
        let def = self.existing_data(name, number).await?;
        let src = src.unwrap_or(&self.settings.container_root);
        let dest = dest
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.data_dir(name));
        self.transfer.export(&def, src, &dest).await
    }

    /// Run a command, or a shell, with the volumes of a data container.
    pub async fn exec_data(
        &self,
        name: &str,
        number: u32,
        exec: &ExecOptions,
        io: SessionIo,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut def = self.existing_data(name, number).await?;
        exec.apply(&mut def.operation);

        let spec = builder::volumes_from_spec(&def.operation, &self.settings, None);
        self.manager.exec(&spec, io, cancel).await
    }

    /// Give a data container a new logical name. Its owner, if any, is kept.
    pub async fn rename_data(&self, old: &str, new: &str, number: u32) -> Result<()> {
        naming::validate_name(new)?;
        let def = self.existing_data(old, number).await?;
        let op = &def.operation;

        let target = ContainerIdentity::new(ContainerKind::Data, new, op.number);
        self.manager
            .rename(&op.data_container_name, &target, &[])
            .await?;
        info!("Renamed data container {} to {}", old, new);
        Ok(())
    }

    /// Remove a data container. Removing one that does not exist succeeds.
    pub async fn rm_data(&self, name: &str, number: u32, volumes: bool) -> Result<()> {
        let def = self.loader.load_data(name, number).await?;
        self.manager
            .remove_container(&def.operation.data_container_name, volumes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::{write, Fixture};
    use crate::runtime::memory::Event;

    #[tokio::test]
    async fn test_new_data_seeds_from_root() {
        let fixture = Fixture::new(&[]);
        write(&fixture.root.path().join("data/keys/key.json"), "{\"k\":1}");

        fixture.orchestrator.new_data("keys", 1).await.unwrap();

        let files = fixture.runtime.files("berth_data_keys_1").unwrap();
        assert_eq!(
            files.get("/home/berth/.berth/key.json").map(Vec::as_slice),
            Some(&b"{\"k\":1}"[..])
        );

        let err = fixture.orchestrator.new_data("keys", 1).await.unwrap_err();
        assert!(err.is_exists());
    }

    #[tokio::test]
    async fn test_new_data_without_seed() {
        let fixture = Fixture::new(&[]);
        fixture.orchestrator.new_data("empty", 1).await.unwrap();

        assert!(fixture.exists("berth_data_empty_1").await);
        assert!(!fixture
            .runtime
            .events()
            .iter()
            .any(|e| matches!(e, Event::Upload(_))));
    }

    #[tokio::test]
    async fn test_import_export_round_trip() {
        let fixture = Fixture::new(&[]);
        let src = tempfile::tempdir().unwrap();
        write(&src.path().join("config.toml"), "moniker = \"a\"\n");
        write(&src.path().join("keys/priv"), "secret");

        let orchestrator = &fixture.orchestrator;
        orchestrator
            .import_data("node", 1, src.path(), Some("/home/berth/.berth/node"))
            .await
            .unwrap();

        let dest = tempfile::tempdir().unwrap();
        orchestrator
            .export_data("node", 1, Some("/home/berth/.berth/node"), Some(dest.path()))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.path().join("config.toml")).unwrap(),
            "moniker = \"a\"\n"
        );
        assert_eq!(
            std::fs::read_to_string(dest.path().join("keys/priv")).unwrap(),
            "secret"
        );
    }

    #[tokio::test]
    async fn test_import_missing_source() {
        let fixture = Fixture::new(&[]);
        let missing = fixture.root.path().join("nope");

        let err = fixture
            .orchestrator
            .import_data("node", 1, &missing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::Transfer(_)));
        assert!(fixture.runtime.events().is_empty());
    }

    #[tokio::test]
    async fn test_export_missing_container() {
        let fixture = Fixture::new(&[]);
        let err = fixture
            .orchestrator
            .export_data("ghost", 1, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn test_exec_rename_and_rm() {
        let fixture = Fixture::new(&[]);
        let orchestrator = &fixture.orchestrator;
        orchestrator.new_data("node", 1).await.unwrap();

        let exec = ExecOptions {
            args: vec!["ls".to_string()],
            ..Default::default()
        };
        orchestrator
            .exec_data(
                "node",
                1,
                &exec,
                SessionIo::new(tokio::io::empty(), tokio::io::sink()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(fixture
            .runtime
            .events()
            .contains(&Event::Create("berth_exec_data_node_1".to_string())));
        assert!(!fixture.exists("berth_exec_data_node_1").await);

        orchestrator.rename_data("node", "archive", 1).await.unwrap();
        assert!(fixture.exists("berth_data_archive_1").await);
        assert!(!fixture.exists("berth_data_node_1").await);
        let listed = orchestrator.list(ContainerKind::Data).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0.name, "archive");

        orchestrator.rm_data("archive", 1, true).await.unwrap();
        assert!(fixture.runtime.container_names().is_empty());
        orchestrator.rm_data("archive", 1, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_rm_missing_data_container() {
        let fixture = Fixture::new(&[]);
        fixture.orchestrator.rm_data("ghost", 1, false).await.unwrap();
        assert!(fixture.runtime.events().is_empty());
    }
}
