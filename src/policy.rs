//! Caller-supplied traversal and selection rules.

use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

use crate::error::{RepackError, Result};
use crate::field::PPtr;
use crate::object::ResolvedObject;

/// Decides how far the tree builder descends.
pub trait ExpandPolicy {
    /// Whether a resolved pointer target becomes part of the tree and has its own
    /// pointers followed. Targets rejected here stay external dependencies.
    fn should_expand(&self, object: &ResolvedObject) -> bool;

    /// The format's "no reference" sentinel.
    fn is_null_pointer(&self, ptr: PPtr) -> bool {
        ptr.is_null()
    }
}

/// Expands everything except a set of opaque type ids.
#[derive(Debug, Clone, Default)]
pub struct TypePolicy {
    opaque: BTreeSet<i32>,
}

impl TypePolicy {
    /// A policy that expands every type.
    pub fn expand_all() -> Self {
        Self::default()
    }

    /// A policy that treats `types` as opaque leaves.
    pub fn with_opaque(types: impl IntoIterator<Item = i32>) -> Self {
        Self {
            opaque: types.into_iter().collect(),
        }
    }

    /// Adds an opaque type.
    pub fn opaque(mut self, type_id: i32) -> Self {
        self.opaque.insert(type_id);
        self
    }
}

impl ExpandPolicy for TypePolicy {
    fn should_expand(&self, object: &ResolvedObject) -> bool {
        !self.opaque.contains(&object.type_id)
    }
}

/// Chooses root objects by type id and case-insensitive name patterns.
///
/// An empty type set admits every type; an empty pattern set matches every name.
#[derive(Debug, Clone, Default)]
pub struct RootSelector {
    types: BTreeSet<i32>,
    patterns: Vec<Regex>,
}

impl RootSelector {
    /// A selector that matches everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Compiles a selector. Patterns are matched case-insensitively anywhere in the name.
    pub fn new<S: AsRef<str>>(
        types: impl IntoIterator<Item = i32>,
        patterns: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| RepackError::InvalidPattern {
                        pattern: p.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            types: types.into_iter().collect(),
            patterns,
        })
    }

    /// Whether an object of `type_id` called `name` is selected.
    pub fn matches(&self, type_id: i32, name: &str) -> bool {
        let type_ok = self.types.is_empty() || self.types.contains(&type_id);
        let name_ok = self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(name));
        type_ok && name_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_everything() {
        assert!(RootSelector::any().matches(28, "anything"));
    }

    #[test]
    fn patterns_are_case_insensitive() -> Result<()> {
        let sel = RootSelector::new([28], ["^hero_"])?;
        assert!(sel.matches(28, "HERO_diffuse"));
        assert!(!sel.matches(28, "villain_diffuse"));
        assert!(!sel.matches(43, "hero_mesh"));
        Ok(())
    }

    #[test]
    fn empty_patterns_still_filter_types() -> Result<()> {
        let sel = RootSelector::new([1, 2], Vec::<String>::new())?;
        assert!(sel.matches(2, ""));
        assert!(!sel.matches(3, "x"));
        Ok(())
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = RootSelector::new(Vec::new(), ["(unclosed"]);
        assert!(matches!(err, Err(RepackError::InvalidPattern { .. })));
    }
}
