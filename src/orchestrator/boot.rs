//! Dependency booting
//!
//! Dependencies are booted one level deep: a dependency's own dependencies
//! are not looked at. Service dependencies are started when they are not
//! running. Chain dependencies are never started implicitly; a stopped one
//! fails the operation before anything is started.

use super::Orchestrator;
use crate::definition::loader::DEPENDENCY_NUMBER;
use crate::definition::Definition;
use crate::error::{BerthError, Result};
use crate::naming::ContainerKind;
use tracing::{debug, info};

impl Orchestrator {
    /// Make sure every dependency of `def` is running.
    ///
    /// Services started before a failure are left running.
    pub async fn boot_dependencies(&self, def: &Definition) -> Result<()> {
        if def.dependencies.is_empty() {
            return Ok(());
        }

        for name in &def.dependencies.chains {
            let chain = self
                .loader
                .load_chain(name, false, DEPENDENCY_NUMBER)
                .await?;
            if !self.manager.running(&chain.operation.container_name).await? {
                return Err(BerthError::DependencyNotRunning {
                    dependent: def.name.clone(),
                    dependency: name.clone(),
                });
            }
            debug!("Chain dependency {} is running", name);
        }

        for name in &def.dependencies.services {
            let service = self
                .loader
                .load_service(name, false, DEPENDENCY_NUMBER)
                .await?;
            if self
                .manager
                .running(&service.operation.container_name)
                .await?
            {
                debug!("Service dependency {} is running", name);
                continue;
            }

            info!("Starting {} (needed by {})", name, def.name);
            self.manager.start_service(&service).await?;
        }
        Ok(())
    }

    /// Fail unless the service or chain `name` is running.
    pub async fn ensure_running(&self, kind: ContainerKind, name: &str, number: u32) -> Result<()> {
        let def = self.load_existing(kind, name, number).await?;
        if self.manager.running(&def.operation.container_name).await? {
            Ok(())
        } else {
            Err(BerthError::NotRunning(def.operation.container_name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::super::RunOptions;
    use crate::error::BerthError;
    use crate::naming::ContainerKind;

    const KEYS: (&str, &str) = ("services/keys.toml", "name = \"keys\"\n[service]\nimage = \"eris/keys\"\n");
    const CHAIN: (&str, &str) = ("chains/mychain.toml", "name = \"mychain\"\n[service]\nimage = \"eris/erisdb\"\n");

    #[tokio::test]
    async fn test_service_dependency_started_first() {
        let fixture = Fixture::new(&[
            KEYS,
            (
                "services/app.toml",
                "name = \"app\"\n[service]\nimage = \"eris/ipfs\"\n[dependencies]\nservices = [\"keys\"]\n",
            ),
        ]);

        fixture
            .orchestrator
            .start_service("app", 1, &RunOptions::default())
            .await
            .unwrap();

        assert!(fixture.running("berth_service_keys_1").await);
        assert!(fixture.running("berth_service_app_1").await);

        let starts: Vec<String> = fixture
            .runtime
            .events()
            .into_iter()
            .filter_map(|e| match e {
                crate::runtime::memory::Event::Start(name) => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec!["berth_service_keys_1", "berth_service_app_1"]);

        let app = fixture
            .orchestrator
            .manager()
            .inspect("berth_service_app_1")
            .await
            .unwrap();
        assert_eq!(app.spec.host.links, vec!["berth_service_keys_1:keys"]);
    }

    #[tokio::test]
    async fn test_stopped_chain_dependency_fails_without_starting() {
        let fixture = Fixture::new(&[
            KEYS,
            CHAIN,
            (
                "services/app.toml",
                "name = \"app\"\n[service]\nimage = \"eris/ipfs\"\n[dependencies]\nservices = [\"keys\"]\nchains = [\"mychain\"]\n",
            ),
        ]);

        let err = fixture
            .orchestrator
            .start_service("app", 1, &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::DependencyNotRunning { .. }));
        assert!(fixture.runtime.events().is_empty());
    }

    #[tokio::test]
    async fn test_running_chain_dependency() {
        let fixture = Fixture::new(&[
            CHAIN,
            (
                "services/app.toml",
                "name = \"app\"\n[service]\nimage = \"eris/ipfs\"\n[dependencies]\nchains = [\"mychain\"]\n",
            ),
        ]);

        fixture
            .orchestrator
            .start_chain("mychain", 1, &RunOptions::default())
            .await
            .unwrap();
        fixture
            .orchestrator
            .start_service("app", 1, &RunOptions::default())
            .await
            .unwrap();
        assert!(fixture.running("berth_service_app_1").await);
    }

    #[tokio::test]
    async fn test_ensure_running() {
        let fixture = Fixture::new(&[KEYS]);

        let err = fixture
            .orchestrator
            .ensure_running(ContainerKind::Service, "keys", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::NotRunning(_)));

        fixture
            .orchestrator
            .start_service("keys", 1, &RunOptions::default())
            .await
            .unwrap();
        fixture
            .orchestrator
            .ensure_running(ContainerKind::Service, "keys", 0)
            .await
            .unwrap();
    }
}
