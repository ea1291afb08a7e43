//! Dependency specs

use crate::error::{BerthError, Result};
use std::str::FromStr;

/// Parsed `name[:alias[:link[:mount]]]` dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Logical name of the dependency
    pub name: String,
    /// Name the dependent sees it under
    pub alias: String,
    /// Link the dependency into the dependent
    pub link: bool,
    /// Mount the dependency's volumes into the dependent
    pub mount: bool,
}

fn parse_flag(spec: &str, flag: Option<&str>) -> Result<bool> {
    match flag {
        None | Some("") => Ok(true),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(_) => Err(BerthError::InvalidDependency(spec.to_string())),
    }
}

impl FromStr for Dependency {
    type Err = BerthError;

    fn from_str(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() > 4 || parts[0].trim().is_empty() {
            return Err(BerthError::InvalidDependency(spec.to_string()));
        }

        let name = parts[0].trim().to_string();
        let alias = parts
            .get(1)
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .unwrap_or(&name)
            .to_string();

        Ok(Self {
            link: parse_flag(spec, parts.get(2).map(|f| f.trim()))?,
            mount: parse_flag(spec, parts.get(3).map(|f| f.trim()))?,
            name,
            alias,
        })
    }
}
