//! Definition file parser and store

use super::config::Definition;
use super::dependency::Dependency;
use crate::error::{BerthError, Result};
use crate::naming::ContainerKind;
use std::path::{Path, PathBuf};

/// Definition file extension
pub const DEFINITION_EXT: &str = "toml";

/// Definition file parser
pub struct DefinitionParser;

impl DefinitionParser {
    /// Parse definition file from path
    pub fn parse_file(path: &Path) -> Result<Definition> {
        let content = std::fs::read_to_string(path)?;

        toml::from_str(&content).map_err(|e| {
            BerthError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Parse definition from string
    pub fn parse_str(content: &str) -> Result<Definition> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize a definition
    pub fn to_string(definition: &Definition) -> Result<String> {
        Ok(toml::to_string_pretty(definition)?)
    }

    /// Write a definition file, creating parent directories
    pub fn write_file(path: &Path, definition: &Definition) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::to_string(definition)?)?;
        Ok(())
    }

    /// Validate a definition before any runtime call
    pub fn validate(definition: &Definition) -> Result<()> {
        if definition.service.image.is_empty() {
            return Err(BerthError::InvalidConfig(format!(
                "An \"image\" field is required in the definition of {}",
                definition.name
            )));
        }

        for bind in &definition.service.volumes {
            if !bind.contains(':') {
                return Err(BerthError::InvalidConfig(format!(
                    "Volume {} should be host:container",
                    bind
                )));
            }
        }

        for dep in definition
            .dependencies
            .services
            .iter()
            .chain(&definition.dependencies.chains)
        {
            dep.parse::<Dependency>()?;
        }

        Ok(())
    }
}

/// Expand a leading `~` in the host side of a bind against `home`.
pub fn expand_bind(bind: &str, home: &Path) -> Result<String> {
    let (host, container) = bind
        .split_once(':')
        .ok_or_else(|| BerthError::InvalidConfig(format!("Volume {} should be host:container", bind)))?;

    let host = match host.strip_prefix('~') {
        Some(rest) => format!("{}{}", home.display(), rest),
        None => host.to_string(),
    };
    Ok(format!("{}:{}", host, container))
}

/// Definition files on disk, one directory per kind
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    root: PathBuf,
}

impl DefinitionStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn dir(&self, kind: ContainerKind) -> PathBuf {
        self.root.join(format!("{}s", kind))
    }

    /// Path of the definition file `name` of `kind`
    pub fn path(&self, kind: ContainerKind, name: &str) -> PathBuf {
        let name = name
            .strip_suffix(&format!(".{}", DEFINITION_EXT))
            .unwrap_or(name);
        self.dir(kind).join(format!("{}.{}", name, DEFINITION_EXT))
    }

    pub fn exists(&self, kind: ContainerKind, name: &str) -> bool {
        self.path(kind, name).is_file()
    }

    pub fn load(&self, kind: ContainerKind, name: &str) -> Result<Definition> {
        let path = self.path(kind, name);
        if !path.is_file() {
            return Err(BerthError::DefinitionNotFound {
                kind,
                name: name.to_string(),
            });
        }
        tracing::debug!("Loading {} definition from {}", kind, path.display());
        DefinitionParser::parse_file(&path)
    }

    pub fn save(&self, kind: ContainerKind, name: &str, definition: &Definition) -> Result<PathBuf> {
        let path = self.path(kind, name);
        DefinitionParser::write_file(&path, definition)?;
        tracing::debug!("Wrote {} definition to {}", kind, path.display());
        Ok(path)
    }

    pub fn remove(&self, kind: ContainerKind, name: &str) -> Result<()> {
        let path = self.path(kind, name);
        if path.is_file() {
            tracing::warn!("Removing file {}", path.display());
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Names of all definitions of `kind`, sorted
    pub fn list(&self, kind: ContainerKind) -> Result<Vec<String>> {
        let dir = self.dir(kind);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(DEFINITION_EXT) {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
