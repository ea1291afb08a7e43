//! Definition loader
//!
//! Turns a definition file into a [`Definition`] whose [`Operation`] names
//! the concrete containers it maps to. Definitions are loaded fresh for
//! every operation; the runtime is queried for existing containers each
//! time and nothing is cached.

use super::config::{Definition, Service};
use super::dependency::Dependency;
use super::operation::Operation;
use super::parser::{expand_bind, DefinitionParser, DefinitionStore};
use crate::config::Settings;
use crate::container::RestartPolicy;
use crate::error::{BerthError, Result};
use crate::naming::{self, labels, ContainerIdentity, ContainerKind};
use crate::runtime::{DynContainerRuntime, ListFilter};
use std::path::PathBuf;
use tracing::debug;

/// Chain definition whose service settings fill unset chain fields
pub const DEFAULT_CHAIN: &str = "default";

/// Instance number every dependency is resolved at
pub const DEPENDENCY_NUMBER: u32 = 1;

/// Loads definitions and resolves them against the runtime
#[derive(Clone)]
pub struct DefinitionLoader {
    runtime: DynContainerRuntime,
    store: DefinitionStore,
    home: PathBuf,
    data_image: String,
}

impl DefinitionLoader {
    pub fn new(runtime: DynContainerRuntime, settings: &Settings) -> Self {
        Self {
            runtime,
            store: DefinitionStore::new(settings.root.clone()),
            home: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
            data_image: settings.data_image.clone(),
        }
    }

    pub fn store(&self) -> &DefinitionStore {
        &self.store
    }

    /// Load a service or chain definition.
    pub async fn load(
        &self,
        kind: ContainerKind,
        name: &str,
        is_new: bool,
        number: u32,
    ) -> Result<Definition> {
        match kind {
            ContainerKind::Service => self.load_service(name, is_new, number).await,
            ContainerKind::Chain => self.load_chain(name, is_new, number).await,
            ContainerKind::Data => self.load_data(name, number).await,
            ContainerKind::Exec => Err(BerthError::InvalidConfig(
                "exec containers have no definitions".to_string(),
            )),
        }
    }

    /// Load `services/<name>.toml`. A `number` of 0 is auto-assigned.
    pub async fn load_service(&self, name: &str, is_new: bool, number: u32) -> Result<Definition> {
        let def = self.store.load(ContainerKind::Service, name)?;
        self.resolve(def, ContainerKind::Service, is_new, number).await
    }

    /// Load `chains/<name>.toml`, filling unset service fields from the
    /// default chain definition.
    pub async fn load_chain(&self, name: &str, is_new: bool, number: u32) -> Result<Definition> {
        let mut def = self.store.load(ContainerKind::Chain, name)?;
        if name != DEFAULT_CHAIN && self.store.exists(ContainerKind::Chain, DEFAULT_CHAIN) {
            let template = self.store.load(ContainerKind::Chain, DEFAULT_CHAIN)?;
            def.service.fill_from(&template.service);
        }
        if def.name.is_empty() {
            def.name = name.to_string();
        }

        def.service.auto_data = true;
        let chain_id = def.chain_id.clone().unwrap_or_else(|| def.name.clone());
        set_env(&mut def.service, "CHAIN_ID", &chain_id);
        def.chain_id = Some(chain_id);

        self.resolve(def, ContainerKind::Chain, is_new, number).await
    }

    /// Build the definition of a standalone data container. A `number` of 0
    /// selects the highest existing instance, or 1.
    pub async fn load_data(&self, name: &str, number: u32) -> Result<Definition> {
        naming::validate_name(name)?;

        let number = match number {
            0 => match self.auto_number(ContainerKind::Data, name, false).await {
                Ok(n) => n,
                Err(e) if e.is_not_found() => 1,
                Err(e) => return Err(e),
            },
            n => n,
        };

        let mut def = Definition {
            name: name.to_string(),
            service: Service {
                name: name.to_string(),
                image: self.data_image.clone(),
                auto_data: true,
                ..Default::default()
            },
            ..Default::default()
        };
        def.operation = Operation::new(ContainerKind::Data, name, number);
        self.probe(&mut def).await?;
        Ok(def)
    }

    /// Pick an instance number for `kind`/`name` from the containers that
    /// already exist.
    pub async fn auto_number(&self, kind: ContainerKind, name: &str, is_new: bool) -> Result<u32> {
        let filter = ListFilter::all()
            .label(labels::MARKER, "true")
            .label(labels::TYPE, kind.as_str())
            .label(labels::NAME, name);

        let highest = self
            .runtime
            .list(&filter)
            .await?
            .iter()
            .filter_map(|c| ContainerIdentity::from_labels(&c.labels))
            .map(|identity| identity.number)
            .max();

        match (highest, is_new) {
            (Some(n), true) => Ok(n + 1),
            (None, true) => Ok(1),
            (Some(n), false) => Ok(n),
            (None, false) => Err(BerthError::ContainerNotFound(naming::container_name(
                kind, name, 1,
            ))),
        }
    }

    async fn resolve(
        &self,
        mut def: Definition,
        kind: ContainerKind,
        is_new: bool,
        number: u32,
    ) -> Result<Definition> {
        harmonize_names(&mut def);
        naming::validate_name(&def.name)?;
        DefinitionParser::validate(&def)?;

        let number = match number {
            0 => self.auto_number(kind, &def.name, is_new).await?,
            n => n,
        };

        def.service.volumes = def
            .service
            .volumes
            .iter()
            .map(|bind| expand_bind(bind, &self.home))
            .collect::<Result<_>>()?;
        resolve_dependencies(&mut def)?;

        let mut op = Operation::new(kind, &def.name, number);
        op.restart = def
            .service
            .restart
            .as_deref()
            .map(RestartPolicy::parse)
            .unwrap_or_default();
        def.operation = op;

        self.probe(&mut def).await?;
        debug!(
            "Loaded {} {} as {} (exists: {})",
            kind,
            def.name,
            def.operation.container_name,
            def.operation.exists()
        );
        Ok(def)
    }

    /// Record the IDs of the definition's containers that already exist.
    pub async fn probe(&self, def: &mut Definition) -> Result<()> {
        let op = &mut def.operation;
        op.container_id = self
            .runtime
            .inspect(&op.container_name)
            .await?
            .map(|details| details.id);

        if def.service.auto_data {
            op.data_container_id = self
                .runtime
                .inspect(&op.data_container_name)
                .await?
                .map(|details| details.id);
        }
        Ok(())
    }
}

/// Default the definition name from the service name, or from the image.
fn harmonize_names(def: &mut Definition) {
    if def.name.is_empty() {
        def.name = if def.service.name.is_empty() {
            def.service.image.replace(['/', ':'], "_")
        } else {
            def.service.name.clone()
        };
    }
    if def.service.name.is_empty() {
        def.service.name = def.name.clone();
    }
}

/// Set `key` in the environment unless the definition already sets it.
pub fn set_env(service: &mut Service, key: &str, value: &str) {
    let prefix = format!("{}=", key);
    if !service.environment.iter().any(|e| e.starts_with(&prefix)) {
        service.environment.push(format!("{}{}", prefix, value));
    }
}

/// Rewrite dependency specs into links and volume mounts on the service,
/// leaving only logical names in the dependency lists.
fn resolve_dependencies(def: &mut Definition) -> Result<()> {
    let groups = [
        (ContainerKind::Service, std::mem::take(&mut def.dependencies.services)),
        (ContainerKind::Chain, std::mem::take(&mut def.dependencies.chains)),
    ];

    for (kind, specs) in groups {
        let mut names = Vec::with_capacity(specs.len());
        for spec in specs {
            let dep: Dependency = spec.parse()?;
            let container = naming::container_name(kind, &dep.name, DEPENDENCY_NUMBER);

            if dep.link {
                let link = format!("{}:{}", container, dep.alias);
                if !def.service.links.contains(&link) {
                    def.service.links.push(link);
                }
            }
            if dep.mount && !def.service.volumes_from.contains(&container) {
                def.service.volumes_from.push(container);
            }
            names.push(dep.name);
        }

        match kind {
            ContainerKind::Service => def.dependencies.services = names,
            _ => def.dependencies.chains = names,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerSpec;
    use crate::runtime::{ContainerRuntime, MemoryRuntime};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn setup(files: &[(&str, &str)]) -> (TempDir, MemoryRuntime, DefinitionLoader) {
        let temp = tempdir().unwrap();
        for (path, content) in files {
            let path = temp.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let settings = Settings::from_root(temp.path()).unwrap();
        let runtime = MemoryRuntime::new().with_image("eris/ipfs");
        let loader = DefinitionLoader::new(Arc::new(runtime.clone()), &settings);
        (temp, runtime, loader)
    }

    async fn create(runtime: &MemoryRuntime, identity: ContainerIdentity) {
        let mut spec = ContainerSpec::new(&identity.container_name(), "eris/ipfs");
        spec.labels = identity.to_labels();
        runtime.create(&spec).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_service() {
        let (_temp, _runtime, loader) = setup(&[(
            "services/ipfs.toml",
            "[service]\nimage = \"eris/ipfs\"\nrestart = \"max:3\"\nvolumes = [\"~/x:/x\"]\n",
        )]);

        let def = loader.load_service("ipfs", false, 1).await.unwrap();
        assert_eq!(def.name, "eris_ipfs");
        assert_eq!(def.service.name, "eris_ipfs");
        assert_eq!(def.operation.container_name, "berth_service_eris_ipfs_1");
        assert_eq!(
            def.operation.restart,
            RestartPolicy::OnFailure { max_retries: 3 }
        );
        assert!(!def.operation.exists());
        assert!(!def.service.volumes[0].starts_with('~'));
    }

    #[tokio::test]
    async fn test_missing_image_rejected() {
        let (_temp, runtime, loader) = setup(&[("services/bad.toml", "name = \"bad\"\n")]);

        let err = loader.load_service("bad", true, 0).await.unwrap_err();
        assert!(matches!(err, BerthError::InvalidConfig(_)));
        assert!(runtime.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_definition_is_not_found() {
        let (_temp, _runtime, loader) = setup(&[]);
        let err = loader.load_service("nope", false, 1).await.unwrap_err();
        assert!(matches!(err, BerthError::DefinitionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_auto_number() {
        let (_temp, runtime, loader) = setup(&[(
            "services/ipfs.toml",
            "name = \"ipfs\"\n[service]\nimage = \"eris/ipfs\"\n",
        )]);

        let err = loader.load_service("ipfs", false, 0).await.unwrap_err();
        assert!(matches!(err, BerthError::ContainerNotFound(_)));

        let def = loader.load_service("ipfs", true, 0).await.unwrap();
        assert_eq!(def.operation.number, 1);

        create(&runtime, ContainerIdentity::new(ContainerKind::Service, "ipfs", 1)).await;
        create(&runtime, ContainerIdentity::new(ContainerKind::Service, "ipfs", 3)).await;
        create(&runtime, ContainerIdentity::new(ContainerKind::Chain, "ipfs", 7)).await;

        let def = loader.load_service("ipfs", true, 0).await.unwrap();
        assert_eq!(def.operation.number, 4);

        let def = loader.load_service("ipfs", false, 0).await.unwrap();
        assert_eq!(def.operation.number, 3);
        assert!(def.operation.exists());
    }

    #[tokio::test]
    async fn test_dependencies_resolved() {
        let (_temp, _runtime, loader) = setup(&[(
            "services/app.toml",
            r#"
name = "app"
[service]
image = "eris/ipfs"
[dependencies]
services = ["keys:k:true:false", "ipfs::false:true"]
chains = ["mychain"]
"#,
        )]);

        let def = loader.load_service("app", false, 1).await.unwrap();
        assert_eq!(def.dependencies.services, vec!["keys", "ipfs"]);
        assert_eq!(def.dependencies.chains, vec!["mychain"]);
        assert_eq!(
            def.service.links,
            vec!["berth_service_keys_1:k", "berth_chain_mychain_1:mychain"]
        );
        assert_eq!(
            def.service.volumes_from,
            vec!["berth_service_ipfs_1", "berth_chain_mychain_1"]
        );
    }

    #[tokio::test]
    async fn test_load_chain_fills_from_default() {
        let (_temp, runtime, loader) = setup(&[
            (
                "chains/default.toml",
                "[service]\nimage = \"eris/ipfs\"\nports = [\"46656\"]\n",
            ),
            ("chains/mychain.toml", "name = \"mychain\"\nchain_id = \"abc\"\n"),
        ]);
        create(&runtime, ContainerIdentity::new(ContainerKind::Data, "mychain", 1)).await;

        let def = loader.load_chain("mychain", false, 1).await.unwrap();
        assert_eq!(def.service.image, "eris/ipfs");
        assert_eq!(def.service.ports, vec!["46656"]);
        assert!(def.service.auto_data);
        assert!(def.service.environment.contains(&"CHAIN_ID=abc".to_string()));
        assert_eq!(def.operation.container_name, "berth_chain_mychain_1");
        assert!(def.operation.data_container_id.is_some());
    }

    #[tokio::test]
    async fn test_load_data() {
        let (_temp, runtime, loader) = setup(&[]);

        let def = loader.load_data("store", 0).await.unwrap();
        assert_eq!(def.operation.number, 1);
        assert_eq!(def.operation.container_name, "berth_data_store_1");
        assert!(def.operation.data_container_id.is_none());

        create(&runtime, ContainerIdentity::new(ContainerKind::Data, "store", 2)).await;
        let def = loader.load_data("store", 0).await.unwrap();
        assert_eq!(def.operation.number, 2);
        assert!(def.operation.data_container_id.is_some());

        assert!(loader.load_data("bad name", 1).await.is_err());
    }
}
