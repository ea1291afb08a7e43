//! Chain operations
//!
//! Chains always carry a data container. A new chain is set up from the
//! `default` chain definition: its data container is created and seeded
//! from the host, then the chain container runs `new`. Later starts run
//! `start`.

use super::{ExecOptions, KillOptions, Orchestrator, RunOptions};
use crate::container::{builder, SessionIo};
use crate::definition::{set_env, Definition, Operation, DEFAULT_CHAIN};
use crate::error::{BerthError, Result};
use crate::naming::{self, ContainerIdentity, ContainerKind};
use crate::runtime::{ContainerDetails, LogOptions};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Command a chain container runs when it is first set up
pub const NEW_COMMAND: &str = "new";

/// Command a chain container runs on later starts
pub const START_COMMAND: &str = "start";

/// Link alias of the chain inside exec containers
pub const CHAIN_ALIAS: &str = "chain";

/// Options for setting up a new chain
#[derive(Debug, Clone, Default)]
pub struct NewChainOptions {
    /// `key=value` options passed to the chain as `CONFIG_OPTS`
    pub config_opts: Vec<String>,
    /// Host directory seeded into the data container, by default
    /// `<root>/data/<name>`
    pub dir: Option<PathBuf>,
    pub genesis: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub priv_validator: Option<PathBuf>,
    /// One CSV seeds both validators and accounts; two are validators
    /// then accounts.
    pub csv: Vec<PathBuf>,
    pub run: RunOptions,
}

impl NewChainOptions {
    /// Host files to stage for the chain, paired with their file names
    /// under `chains/<name>/`.
    fn chain_files(&self) -> Result<Vec<(&Path, &'static str)>> {
        let mut files = Vec::new();
        if let Some(path) = &self.genesis {
            files.push((path.as_path(), "genesis.json"));
        }
        if let Some(path) = &self.config {
            files.push((path.as_path(), "config.toml"));
        }
        if let Some(path) = &self.priv_validator {
            files.push((path.as_path(), "priv_validator.json"));
        }
        match self.csv.as_slice() {
            [] => {}
            [single] => files.push((single.as_path(), "genesis.csv")),
            [validators, accounts] => {
                files.push((validators.as_path(), "validators.csv"));
                files.push((accounts.as_path(), "accounts.csv"));
            }
            _ => {
                return Err(BerthError::InvalidConfig(
                    "at most two CSV files (validators, accounts) are accepted".to_string(),
                ))
            }
        }
        Ok(files)
    }
}

/// Render `key=value` pairs as ` --key=value` flags.
pub fn config_opts(pairs: &[String]) -> Result<String> {
    let mut rendered = String::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                rendered.push_str(&format!(" --{}={}", key.trim(), value));
            }
            _ => {
                return Err(BerthError::InvalidConfig(format!(
                    "config option {} should be key=value",
                    pair
                )))
            }
        }
    }
    Ok(rendered)
}

impl Orchestrator {
    /// Set up and start a new chain.
    ///
    /// When setup fails, the chain's containers are removed. A failing
    /// cleanup is reported together with the original error.
    pub async fn new_chain(&self, name: &str, opts: &NewChainOptions) -> Result<()> {
        naming::validate_name(name)?;
        let config = config_opts(&opts.config_opts)?;
        opts.chain_files()?;

        let op = Operation::new(ContainerKind::Chain, name, 1);
        let existing = (
            self.manager.exists(&op.container_name).await?,
            self.manager.exists(&op.data_container_name).await?,
        );

        let error = match self.setup_chain(name, &config, opts).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        warn!("Setting up chain {} failed, cleaning up: {}", name, error);
        match self.remove_created(&op, existing).await {
            Ok(()) => Err(error),
            Err(cleanup) => Err(BerthError::SetupFailed {
                name: name.to_string(),
                error: Box::new(error),
                cleanup: Box::new(cleanup),
            }),
        }
    }

    /// Set up a chain under a generated name and return the name.
    pub async fn throwaway_chain(&self, base: &str, opts: &NewChainOptions) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let name = format!("{}_{}", base, &id[..8]);
        self.new_chain(&name, opts).await?;
        Ok(name)
    }

    async fn setup_chain(&self, name: &str, config: &str, opts: &NewChainOptions) -> Result<()> {
        let store = self.loader.store();
        if !store.exists(ContainerKind::Chain, name) {
            let template = store.load(ContainerKind::Chain, DEFAULT_CHAIN)?;
            let def = Definition {
                name: name.to_string(),
                description: template.description,
                chain_id: Some(name.to_string()),
                service: template.service,
                dependencies: template.dependencies,
                maintainer: template.maintainer,
                ..Default::default()
            };
            let path = store.save(ContainerKind::Chain, name, &def)?;
            info!("Wrote chain definition {}", path.display());
        }

        let mut def = self.loader.load_chain(name, false, 1).await?;
        self.manager.ensure_data_container(&def).await?;

        let staged = self.stage_chain_files(name, opts)?;
        let data_dir = self.settings.data_dir(name);
        let mut seeds = vec![opts.dir.clone().unwrap_or_else(|| data_dir.clone())];
        if !staged.is_empty() && seeds[0] != data_dir {
            seeds.push(data_dir);
        }
        for dir in seeds.iter().filter(|dir| dir.is_dir()) {
            self.transfer
                .import(&def, dir, &self.settings.container_root)
                .await?;
        }

        opts.run.apply(&mut def.operation);
        def.service.command = Some(NEW_COMMAND.to_string());
        let container_name = def.operation.container_name.clone();
        set_env(&mut def.service, "CONTAINER_NAME", &container_name);
        set_env(&mut def.service, "CONFIG_OPTS", config);
        let csv: Vec<String> = staged
            .iter()
            .filter(|file| file.ends_with(".csv"))
            .map(|file| format!("{}/chains/{}/{}", self.settings.container_root, name, file))
            .collect();
        if !csv.is_empty() {
            set_env(&mut def.service, "CSV", &csv.join(","));
        }

        self.boot_dependencies(&def).await?;
        self.manager.start_service(&def).await
    }

    /// Copy the chain files named in `opts` into
    /// `<root>/data/<name>/chains/<name>/` and return the staged file names.
    fn stage_chain_files(&self, name: &str, opts: &NewChainOptions) -> Result<Vec<&'static str>> {
        let files = opts.chain_files()?;
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let dest = self.settings.data_dir(name).join("chains").join(name);
        std::fs::create_dir_all(&dest)?;
        let mut staged = Vec::with_capacity(files.len());
        for (src, file) in files {
            debug!("Staging {} as {}", src.display(), file);
            std::fs::copy(src, dest.join(file)).map_err(|e| {
                BerthError::Transfer(format!("cannot copy {}: {}", src.display(), e))
            })?;
            staged.push(file);
        }
        info!("Staged {} chain files in {}", staged.len(), dest.display());
        Ok(staged)
    }

    /// Remove the containers of `op` that did not exist before setup began.
    async fn remove_created(&self, op: &Operation, (chain_existed, data_existed): (bool, bool)) -> Result<()> {
        if !chain_existed {
            self.manager.stop(&op.container_name, 0).await?;
            self.manager.remove_container(&op.container_name, true).await?;
        }
        if !data_existed {
            self.manager
                .remove_container(&op.data_container_name, true)
                .await?;
        }
        Ok(())
    }

    /// Boot the dependencies of a chain, then start it.
    pub async fn start_chain(&self, name: &str, number: u32, opts: &RunOptions) -> Result<()> {
        let mut def = self
            .load_existing(ContainerKind::Chain, name, number)
            .await?;
        opts.apply(&mut def.operation);
        def.service.command = Some(START_COMMAND.to_string());

        self.boot_dependencies(&def).await?;
        self.manager.start_service(&def).await
    }

    /// Stop a chain, removing it when asked.
    pub async fn kill_chain(&self, name: &str, number: u32, opts: &KillOptions) -> Result<()> {
        let def = self
            .load_existing(ContainerKind::Chain, name, number)
            .await?;
        self.kill(&def, opts).await
    }

    /// Run a command, or a shell, next to a chain, linked to it as `chain`.
    pub async fn exec_chain(
        &self,
        name: &str,
        number: u32,
        exec: &ExecOptions,
        io: SessionIo,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut def = self
            .load_existing(ContainerKind::Chain, name, number)
            .await?;
        exec.apply(&mut def.operation);

        def.service.entry_point = None;
        def.service.command = None;
        def.operation.publish_all_ports = true;
        let link = format!("{}:{}", def.operation.container_name, CHAIN_ALIAS);
        def.service.links.push(link);

        self.manager.ensure_data_container(&def).await?;
        let spec = builder::interactive_spec(&def.service, &self.settings, &def.operation)?;
        self.manager.exec(&spec, io, cancel).await
    }

    /// Recreate a chain container, optionally pulling a fresh image.
    pub async fn update_chain(&self, name: &str, number: u32, pull: bool, timeout: Option<u32>) -> Result<()> {
        let mut def = self
            .load_existing(ContainerKind::Chain, name, number)
            .await?;
        def.service.command = Some(START_COMMAND.to_string());
        let timeout = timeout.unwrap_or(self.settings.stop_timeout);
        self.manager.rebuild(&def, pull, timeout).await
    }

    /// Rename a chain: its container, its data container and its
    /// definition file.
    pub async fn rename_chain(&self, old: &str, new: &str, number: u32) -> Result<()> {
        naming::validate_name(new)?;
        let store = self.loader.store();
        if store.exists(ContainerKind::Chain, new) {
            return Err(BerthError::InvalidConfig(format!(
                "a chain definition named {} already exists",
                new
            )));
        }

        let def = self
            .load_existing(ContainerKind::Chain, old, number)
            .await?;
        let op = &def.operation;
        let target = ContainerIdentity::new(ContainerKind::Chain, new, op.number);

        let moved = self
            .rename_data_of(&def, new, &target.container_name())
            .await?;
        if self.manager.exists(&op.container_name).await? {
            self.manager
                .rename(&op.container_name, &target, &moved)
                .await?;
        }

        let mut file = store.load(ContainerKind::Chain, old)?;
        file.name = new.to_string();
        store.save(ContainerKind::Chain, new, &file)?;
        store.remove(ContainerKind::Chain, old)?;

        info!("Renamed chain {} to {}", old, new);
        Ok(())
    }

    /// Remove a chain container, and optionally its data container,
    /// volumes and definition file.
    pub async fn rm_chain(&self, name: &str, number: u32, data: bool, volumes: bool, file: bool) -> Result<()> {
        let def = self
            .load_existing(ContainerKind::Chain, name, number)
            .await?;
        self.manager.remove(&def.operation, data, volumes).await?;
        if file {
            self.loader.store().remove(ContainerKind::Chain, name)?;
        }
        Ok(())
    }

    pub async fn chain_logs<W>(&self, name: &str, number: u32, opts: LogOptions, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let def = self
            .load_existing(ContainerKind::Chain, name, number)
            .await?;
        self.manager
            .logs(&def.operation.container_name, opts, out)
            .await
    }

    pub async fn inspect_chain(&self, name: &str, number: u32) -> Result<ContainerDetails> {
        let def = self
            .load_existing(ContainerKind::Chain, name, number)
            .await?;
        self.manager.inspect(&def.operation.container_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::{write, Fixture};

    const DEFAULT: (&str, &str) = (
        "chains/default.toml",
        "[service]\nimage = \"eris/erisdb\"\nports = [\"46656\"]\nvolumes = [\"/tmp:/tmp\"]\n",
    );

    fn env_of(details: &ContainerDetails, key: &str) -> Option<String> {
        let prefix = format!("{}=", key);
        details
            .spec
            .env
            .iter()
            .find_map(|e| e.strip_prefix(&prefix).map(str::to_string))
    }

    #[test]
    fn test_config_opts() {
        let pairs = vec!["log_level=debug".to_string(), "moniker=a=b".to_string()];
        assert_eq!(
            config_opts(&pairs).unwrap(),
            " --log_level=debug --moniker=a=b"
        );
        assert_eq!(config_opts(&[]).unwrap(), "");
        assert!(config_opts(&["novalue".to_string()]).is_err());
        assert!(config_opts(&["=x".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_new_chain() {
        let fixture = Fixture::new(&[DEFAULT]);
        write(&fixture.root.path().join("data/mychain/genesis.json"), "{}");

        let opts = NewChainOptions {
            config_opts: vec!["moniker=node0".to_string()],
            ..Default::default()
        };
        fixture.orchestrator.new_chain("mychain", &opts).await.unwrap();

        assert!(fixture.running("berth_chain_mychain_1").await);
        let details = fixture
            .orchestrator
            .inspect_chain("mychain", 1)
            .await
            .unwrap();
        assert_eq!(details.spec.cmd, Some(vec![NEW_COMMAND.to_string()]));
        assert_eq!(env_of(&details, "CHAIN_ID").as_deref(), Some("mychain"));
        assert_eq!(
            env_of(&details, "CONTAINER_NAME").as_deref(),
            Some("berth_chain_mychain_1")
        );
        assert_eq!(
            env_of(&details, "CONFIG_OPTS").as_deref(),
            Some(" --moniker=node0")
        );
        assert_eq!(details.spec.host.volumes_from, vec!["berth_data_mychain_1"]);

        let files = fixture.runtime.files("berth_data_mychain_1").unwrap();
        assert!(files.contains_key("/home/berth/.berth/genesis.json"));
        assert!(fixture
            .orchestrator
            .list_definitions(ContainerKind::Chain)
            .unwrap()
            .contains(&"mychain".to_string()));
    }

    #[tokio::test]
    async fn test_new_chain_bad_config_creates_nothing() {
        let fixture = Fixture::new(&[DEFAULT]);
        let opts = NewChainOptions {
            config_opts: vec!["broken".to_string()],
            ..Default::default()
        };

        let err = fixture
            .orchestrator
            .new_chain("mychain", &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::InvalidConfig(_)));
        assert!(fixture.runtime.events().is_empty());
    }

    #[tokio::test]
    async fn test_new_chain_failure_cleans_up() {
        let fixture = Fixture::new(&[
            DEFAULT,
            (
                "chains/mychain.toml",
                "name = \"mychain\"\n[dependencies]\nchains = [\"other\"]\n",
            ),
            ("chains/other.toml", "name = \"other\"\n"),
        ]);

        let err = fixture
            .orchestrator
            .new_chain("mychain", &NewChainOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::DependencyNotRunning { .. }));
        assert!(fixture.runtime.container_names().is_empty());
    }

    #[tokio::test]
    async fn test_new_chain_failure_keeps_existing_containers() {
        let fixture = Fixture::new(&[DEFAULT, ("chains/other.toml", "name = \"other\"\n")]);
        let orchestrator = &fixture.orchestrator;
        orchestrator
            .new_chain("mychain", &NewChainOptions::default())
            .await
            .unwrap();
        orchestrator
            .kill_chain("mychain", 1, &KillOptions::default())
            .await
            .unwrap();

        write(
            &fixture.root.path().join("chains/mychain.toml"),
            "name = \"mychain\"\n[dependencies]\nchains = [\"other\"]\n",
        );
        let err = orchestrator
            .new_chain("mychain", &NewChainOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::DependencyNotRunning { .. }));
        assert!(fixture.exists("berth_chain_mychain_1").await);
        assert!(fixture.exists("berth_data_mychain_1").await);
    }

    #[tokio::test]
    async fn test_new_chain_stages_chain_files() {
        let fixture = Fixture::new(&[DEFAULT]);
        let host = tempfile::tempdir().unwrap();
        let genesis = host.path().join("gen.json");
        let priv_validator = host.path().join("pv.json");
        let validators = host.path().join("vals.csv");
        let accounts = host.path().join("accts.csv");
        write(&genesis, "{\"chain_id\":\"mychain\"}");
        write(&priv_validator, "{}");
        write(&validators, "v1,10\n");
        write(&accounts, "a1,20\n");

        let opts = NewChainOptions {
            genesis: Some(genesis),
            priv_validator: Some(priv_validator),
            csv: vec![validators, accounts],
            ..Default::default()
        };
        fixture.orchestrator.new_chain("mychain", &opts).await.unwrap();

        let staged = fixture.root.path().join("data/mychain/chains/mychain");
        assert!(staged.join("genesis.json").is_file());
        assert!(staged.join("validators.csv").is_file());

        let files = fixture.runtime.files("berth_data_mychain_1").unwrap();
        let root = "/home/berth/.berth/chains/mychain";
        assert_eq!(
            files.get(&format!("{}/genesis.json", root)).map(Vec::as_slice),
            Some(&b"{\"chain_id\":\"mychain\"}"[..])
        );
        assert!(files.contains_key(&format!("{}/priv_validator.json", root)));
        assert!(files.contains_key(&format!("{}/accounts.csv", root)));
        assert!(!files.contains_key(&format!("{}/config.toml", root)));

        let details = fixture
            .orchestrator
            .inspect_chain("mychain", 1)
            .await
            .unwrap();
        assert_eq!(
            env_of(&details, "CSV").as_deref(),
            Some("/home/berth/.berth/chains/mychain/validators.csv,/home/berth/.berth/chains/mychain/accounts.csv")
        );
    }

    #[tokio::test]
    async fn test_new_chain_single_csv_and_bad_files() {
        let fixture = Fixture::new(&[DEFAULT]);
        let host = tempfile::tempdir().unwrap();
        let csv = host.path().join("genesis.csv");
        write(&csv, "v1,10\n");

        let too_many = NewChainOptions {
            csv: vec![csv.clone(), csv.clone(), csv.clone()],
            ..Default::default()
        };
        let err = fixture
            .orchestrator
            .new_chain("mychain", &too_many)
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::InvalidConfig(_)));
        assert!(fixture.runtime.events().is_empty());

        let missing = NewChainOptions {
            config: Some(host.path().join("absent.toml")),
            ..Default::default()
        };
        let err = fixture
            .orchestrator
            .new_chain("mychain", &missing)
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::Transfer(_)));
        assert!(fixture.runtime.container_names().is_empty());

        let single = NewChainOptions {
            csv: vec![csv],
            ..Default::default()
        };
        fixture.orchestrator.new_chain("mychain", &single).await.unwrap();
        let details = fixture
            .orchestrator
            .inspect_chain("mychain", 1)
            .await
            .unwrap();
        assert_eq!(
            env_of(&details, "CSV").as_deref(),
            Some("/home/berth/.berth/chains/mychain/genesis.csv")
        );
    }

    #[tokio::test]
    async fn test_throwaway_chain() {
        let fixture = Fixture::new(&[DEFAULT]);
        let name = fixture
            .orchestrator
            .throwaway_chain("scratch", &NewChainOptions::default())
            .await
            .unwrap();

        assert!(name.starts_with("scratch_"));
        assert_eq!(name.len(), "scratch_".len() + 8);
        assert!(fixture.running(&naming::container_name(ContainerKind::Chain, &name, 1)).await);
    }

    #[tokio::test]
    async fn test_start_and_exec_chain() {
        let fixture = Fixture::new(&[DEFAULT, ("chains/mychain.toml", "name = \"mychain\"\n")]);
        let orchestrator = &fixture.orchestrator;

        orchestrator
            .start_chain("mychain", 0, &RunOptions::default())
            .await
            .unwrap();
        let details = orchestrator.inspect_chain("mychain", 1).await.unwrap();
        assert_eq!(details.spec.cmd, Some(vec![START_COMMAND.to_string()]));

        let exec = ExecOptions {
            args: vec!["status".to_string()],
            ..Default::default()
        };
        orchestrator
            .exec_chain(
                "mychain",
                1,
                &exec,
                SessionIo::new(tokio::io::empty(), tokio::io::sink()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let created = fixture.runtime.events().contains(
            &crate::runtime::memory::Event::Create("berth_exec_chain_mychain_1".to_string()),
        );
        assert!(created);
        assert!(!fixture.exists("berth_exec_chain_mychain_1").await);
    }

    #[tokio::test]
    async fn test_rename_chain() {
        let fixture = Fixture::new(&[DEFAULT, ("chains/mychain.toml", "name = \"mychain\"\n")]);
        let orchestrator = &fixture.orchestrator;
        orchestrator
            .start_chain("mychain", 1, &RunOptions::default())
            .await
            .unwrap();

        orchestrator.rename_chain("mychain", "renamed", 1).await.unwrap();

        assert!(fixture.running("berth_chain_renamed_1").await);
        assert!(fixture.exists("berth_data_renamed_1").await);
        assert!(!fixture.exists("berth_data_mychain_1").await);
        let details = orchestrator.inspect_chain("renamed", 1).await.unwrap();
        assert_eq!(details.spec.host.volumes_from, vec!["berth_data_renamed_1"]);

        let chains = orchestrator.list_definitions(ContainerKind::Chain).unwrap();
        assert_eq!(chains, vec!["default", "renamed"]);
    }

    #[tokio::test]
    async fn test_kill_and_rm_chain() {
        let fixture = Fixture::new(&[DEFAULT, ("chains/mychain.toml", "name = \"mychain\"\n")]);
        let orchestrator = &fixture.orchestrator;
        orchestrator
            .start_chain("mychain", 1, &RunOptions::default())
            .await
            .unwrap();

        orchestrator
            .kill_chain("mychain", 1, &KillOptions::default())
            .await
            .unwrap();
        assert!(!fixture.running("berth_chain_mychain_1").await);

        orchestrator
            .rm_chain("mychain", 1, true, true, false)
            .await
            .unwrap();
        assert!(fixture.runtime.container_names().is_empty());
    }
}
