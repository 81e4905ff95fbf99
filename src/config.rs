//! Repack configuration.
//!
//! ```toml
//! container_name = "characters"
//! id_order = "discovery"
//! root_types = [1, 28]
//! name_patterns = ["^hero_", "_lod0$"]
//! opaque_types = [115]
//!
//! [[sidecar]]
//! type_id = 28
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RepackError, Result};
use crate::format::{FIRST_ASSIGNABLE_ID, MAX_DEPENDENCIES};
use crate::policy::{RootSelector, TypePolicy};
use crate::registry::IdOrder;
use crate::sidecar::SidecarRule;

/// Everything a [`RepackSession`](crate::session::RepackSession) needs besides its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepackConfig {
    /// Display name written into the output descriptor.
    pub container_name: String,
    /// Ordering of new ids.
    pub id_order: IdOrder,
    /// First id handed out to copied objects.
    pub base_id: i64,
    /// Type ids eligible as roots; empty admits all.
    pub root_types: Vec<i32>,
    /// Case-insensitive regex patterns on root names; empty matches all.
    pub name_patterns: Vec<String>,
    /// Types treated as opaque leaves during expansion.
    pub opaque_types: Vec<i32>,
    /// Side-car relocation rules.
    pub sidecar: Vec<SidecarRule>,
    /// Upper bound on the output dependency list.
    pub max_dependencies: usize,
}

impl Default for RepackConfig {
    fn default() -> Self {
        Self {
            container_name: String::from("repacked"),
            id_order: IdOrder::Discovery,
            base_id: FIRST_ASSIGNABLE_ID,
            root_types: Vec::new(),
            name_patterns: Vec::new(),
            opaque_types: Vec::new(),
            sidecar: Vec::new(),
            max_dependencies: MAX_DEPENDENCIES,
        }
    }
}

impl RepackConfig {
    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| RepackError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<()> {
        if self.base_id < FIRST_ASSIGNABLE_ID {
            return Err(RepackError::Config(format!(
                "base_id must be at least {FIRST_ASSIGNABLE_ID}, got {}",
                self.base_id
            )));
        }
        Ok(())
    }

    /// Compiles the root selector.
    pub fn selector(&self) -> Result<RootSelector> {
        RootSelector::new(self.root_types.iter().copied(), &self.name_patterns)
    }

    /// Builds the expansion policy.
    pub fn policy(&self) -> TypePolicy {
        TypePolicy::with_opaque(self.opaque_types.iter().copied())
    }

    /// The side-car rule for `type_id`, if any.
    pub fn sidecar_rule(&self, type_id: i32) -> Option<&SidecarRule> {
        self.sidecar.iter().find(|r| r.type_id == type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_document() -> Result<()> {
        let cfg = RepackConfig::from_toml(
            r#"
            container_name = "chars"
            id_order = "source"
            root_types = [1]
            name_patterns = ["^hero"]
            opaque_types = [115]

            [[sidecar]]
            type_id = 28
            "#,
        )?;
        assert_eq!(cfg.container_name, "chars");
        assert_eq!(cfg.id_order, IdOrder::Source);
        assert_eq!(cfg.base_id, FIRST_ASSIGNABLE_ID);
        assert_eq!(cfg.sidecar_rule(28).map(|r| r.stream_field.as_str()), Some("m_StreamData"));
        assert!(cfg.selector()?.matches(1, "Hero_A"));
        Ok(())
    }

    #[test]
    fn rejects_reserved_base_id() {
        assert!(matches!(
            RepackConfig::from_toml("base_id = 1"),
            Err(RepackError::Config(_))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(RepackConfig::from_toml("colour = 3").is_err());
    }
}
