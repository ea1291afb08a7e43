//! Canonical container names and identity labels
//!
//! Every container Berth manages is named `berth_<kind>_<name>_<number>` and
//! carries labels encoding the same triple. Both are pure functions of the
//! triple, so existing state can always be rediscovered from the runtime
//! without a side database.

use crate::error::{BerthError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

/// Prefix shared by every managed container
pub const NAME_PREFIX: &str = "berth";

/// Label keys attached at creation time
pub mod labels {
    pub const MARKER: &str = "berth:BERTH";
    pub const TYPE: &str = "berth:TYPE";
    pub const NAME: &str = "berth:NAME";
    pub const NUMBER: &str = "berth:NUMBER";
    /// Owning service container of a bound data container
    pub const SERVICE: &str = "berth:SERVICE";
}

/// Kind of managed container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Service,
    Chain,
    Data,
    Exec,
}

impl ContainerKind {
    pub const ALL: [ContainerKind; 4] = [
        ContainerKind::Service,
        ContainerKind::Chain,
        ContainerKind::Data,
        ContainerKind::Exec,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Service => "service",
            ContainerKind::Chain => "chain",
            ContainerKind::Data => "data",
            ContainerKind::Exec => "exec",
        }
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        ContainerKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| BerthError::InvalidConfig(format!("unknown container kind: {}", s)))
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid regex"))
}

/// Check that a logical name can be embedded in a container name.
pub fn validate_name(name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(BerthError::InvalidName(name.to_string()))
    }
}

/// Canonical container name for a (kind, name, number) triple.
pub fn container_name(kind: ContainerKind, name: &str, number: u32) -> String {
    format!("{}_{}_{}_{}", NAME_PREFIX, kind, name, number)
}

/// Data container paired with any service or chain of this logical name.
pub fn data_container_name(name: &str, number: u32) -> String {
    container_name(ContainerKind::Data, name, number)
}

/// Logical name of the ephemeral exec container targeting `kind`/`name`.
pub fn exec_logical_name(target: ContainerKind, name: &str) -> String {
    format!("{}_{}", target, name)
}

/// Typed identity of a managed container.
///
/// Serialized to the label map when a container is created and rebuilt from
/// it when containers are discovered; nothing else handles raw labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerIdentity {
    pub kind: ContainerKind,
    pub name: String,
    pub number: u32,
    /// Owning service container, for data containers bound to a service
    pub owner: Option<String>,
}

impl ContainerIdentity {
    pub fn new(kind: ContainerKind, name: &str, number: u32) -> Self {
        Self {
            kind,
            name: name.to_string(),
            number,
            owner: None,
        }
    }

    /// Record the owning service container.
    pub fn owned_by(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn container_name(&self) -> String {
        container_name(self.kind, &self.name, self.number)
    }

    pub fn to_labels(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(labels::MARKER.to_string(), "true".to_string());
        map.insert(labels::TYPE.to_string(), self.kind.to_string());
        map.insert(labels::NAME.to_string(), self.name.clone());
        map.insert(labels::NUMBER.to_string(), self.number.to_string());
        if let Some(ref owner) = self.owner {
            map.insert(labels::SERVICE.to_string(), owner.clone());
        }
        map
    }

    /// Rebuild an identity from container labels. Containers without the
    /// Berth marker are not ours and yield `None`.
    pub fn from_labels(map: &HashMap<String, String>) -> Option<Self> {
        if map.get(labels::MARKER).map(String::as_str) != Some("true") {
            return None;
        }
        let kind = map.get(labels::TYPE)?.parse().ok()?;
        let name = map.get(labels::NAME)?.clone();
        let number = map.get(labels::NUMBER)?.parse().ok()?;
        Some(Self {
            kind,
            name,
            number,
            owner: map.get(labels::SERVICE).cloned(),
        })
    }

    /// Invert [`container_name`]. The runtime may report names with a
    /// leading slash; it is ignored.
    pub fn parse(full_name: &str) -> Option<Self> {
        let rest = full_name
            .trim_start_matches('/')
            .strip_prefix(NAME_PREFIX)?
            .strip_prefix('_')?;

        ContainerKind::ALL.into_iter().find_map(|kind| {
            let tail = rest.strip_prefix(kind.as_str())?.strip_prefix('_')?;
            let (name, number) = tail.rsplit_once('_')?;
            if name.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let number: u32 = number.parse().ok()?;
            if number == 0 {
                return None;
            }
            Some(ContainerIdentity::new(kind, name, number))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_container_name_format() {
        assert_eq!(
            container_name(ContainerKind::Service, "ipfs", 1),
            "berth_service_ipfs_1"
        );
        assert_eq!(data_container_name("ipfs", 2), "berth_data_ipfs_2");
    }

    #[test]
    fn test_container_name_is_deterministic() {
        let a = container_name(ContainerKind::Chain, "mychain", 3);
        let b = container_name(ContainerKind::Chain, "mychain", 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_container_names_never_collide() {
        let names = ["a", "a_1", "a_b", "1", "data_a", "service", "x.y-z"];
        let mut seen = HashSet::new();

        for kind in ContainerKind::ALL {
            for name in names {
                for number in 1..5 {
                    let full = container_name(kind, name, number);
                    assert!(seen.insert(full.clone()), "collision on {}", full);

                    let parsed = ContainerIdentity::parse(&full).unwrap();
                    assert_eq!(parsed, ContainerIdentity::new(kind, name, number));
                }
            }
        }
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(ContainerIdentity::parse("nginx").is_none());
        assert!(ContainerIdentity::parse("berth_volume_x_1").is_none());
        assert!(ContainerIdentity::parse("berth_service_x_0").is_none());
        assert!(ContainerIdentity::parse("berth_service__1").is_none());
        assert!(ContainerIdentity::parse("berth_service_x").is_none());
    }

    #[test]
    fn test_parse_strips_leading_slash() {
        let id = ContainerIdentity::parse("/berth_data_keys_1").unwrap();
        assert_eq!(id.kind, ContainerKind::Data);
        assert_eq!(id.name, "keys");
    }

    #[test]
    fn test_labels_round_trip_with_owner() {
        let id = ContainerIdentity::new(ContainerKind::Data, "ipfs", 1)
            .owned_by("berth_service_ipfs_1");
        let map = id.to_labels();

        assert_eq!(map.get(labels::TYPE).unwrap(), "data");
        assert_eq!(map.get(labels::SERVICE).unwrap(), "berth_service_ipfs_1");
        assert_eq!(ContainerIdentity::from_labels(&map), Some(id));
    }

    #[test]
    fn test_from_labels_requires_marker() {
        let mut map = ContainerIdentity::new(ContainerKind::Service, "x", 1).to_labels();
        map.remove(labels::MARKER);
        assert!(ContainerIdentity::from_labels(&map).is_none());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("ipfs").is_ok());
        assert!(validate_name("quay.io_eris_keys").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a:b").is_err());
    }
}
