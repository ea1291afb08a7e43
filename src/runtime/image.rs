//! Image references and registry credentials

use serde::{Deserialize, Serialize};

/// Default tag when a reference carries none
pub const DEFAULT_TAG: &str = "latest";

/// Registry credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
    /// Registry server address
    pub server: Option<String>,
}

/// Parsed `[registry/]repository[:tag]` image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, when the reference names one
    pub registry: Option<String>,
    /// Repository including any registry prefix
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Self {
        let (repository, tag) = match image.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() => (repo, tag),
            _ => (image, DEFAULT_TAG),
        };

        let registry = match repository.split_once('/') {
            Some((first, _))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                Some(first.to_string())
            }
            _ => None,
        };

        Self {
            registry,
            repository: repository.to_string(),
            tag: tag.to_string(),
        }
    }

    /// `repository:tag`
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_image() {
        let image = ImageReference::parse("busybox");
        assert_eq!(image.repository, "busybox");
        assert_eq!(image.tag, "latest");
        assert_eq!(image.registry, None);
    }

    #[test]
    fn test_parse_tagged_image() {
        let image = ImageReference::parse("eris/keys:0.12");
        assert_eq!(image.repository, "eris/keys");
        assert_eq!(image.tag, "0.12");
        assert_eq!(image.registry, None);
    }

    #[test]
    fn test_parse_registry_image() {
        let image = ImageReference::parse("quay.io/eris/data");
        assert_eq!(image.registry.as_deref(), Some("quay.io"));
        assert_eq!(image.full_name(), "quay.io/eris/data:latest");

        let ported = ImageReference::parse("localhost:5000/app:v1");
        assert_eq!(ported.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(ported.repository, "localhost:5000/app");
        assert_eq!(ported.tag, "v1");
    }
}
