//! Parameter collections.
//!
//! `ParamSet` is the name → `ParamSpec` mapping that the template settings
//! carry. Scan workers never share one mutably: they clone it and fix the
//! scanned dimensions on their own copy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{GridSettings, Hierarchy, ParamSpec};
use crate::error::{Result, ScanError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, ParamSpec>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: ParamSpec) -> Option<ParamSpec> {
        self.0.insert(name.into(), spec)
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ParamSpec> {
        self.0.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamSpec)> {
        self.0.iter()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, spec) in &self.0 {
            spec.validate().map_err(|e| e.for_param(name))?;
        }
        Ok(())
    }

    /// Current value of every parameter.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.0.iter().map(|(k, p)| (k.clone(), p.value)).collect()
    }

    /// Names of the parameters the nested fit may vary, in name order.
    pub fn floating_names(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, p)| p.is_floating())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Names of parameters carrying a stepping specification, in name order.
    pub fn scanned_names(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, p)| p.steps.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Pin `name` to `value` and mark it fixed.
    pub fn fix_at(&mut self, name: &str, value: f64) -> Result<()> {
        let spec = self
            .0
            .get_mut(name)
            .ok_or_else(|| ScanError::Config(format!("unknown parameter '{name}'")))?;
        spec.value = value;
        spec.fixed = true;
        Ok(())
    }

    /// Resolve hierarchy-dependent parameters.
    ///
    /// Entries named `<base>_nh` / `<base>_ih` are reduced to `<base>` using the
    /// variant matching `hierarchy`; unsuffixed entries pass through unchanged.
    pub fn select_hierarchy(&self, hierarchy: Hierarchy) -> Result<ParamSet> {
        let suffixes = [Hierarchy::Normal.suffix(), Hierarchy::Inverted.suffix()];

        let mut bases: BTreeSet<&str> = BTreeSet::new();
        for name in self.0.keys() {
            for suffix in suffixes {
                if let Some(base) = name.strip_suffix(suffix) {
                    bases.insert(base);
                }
            }
        }

        for base in &bases {
            if self.0.contains_key(*base) {
                return Err(ScanError::Config(format!(
                    "parameter '{base}' is defined both with and without a hierarchy suffix"
                )));
            }
            for suffix in suffixes {
                let full = format!("{base}{suffix}");
                if !self.0.contains_key(&full) {
                    return Err(ScanError::Config(format!(
                        "hierarchy-dependent parameter '{base}' is missing its '{full}' variant"
                    )));
                }
            }
        }

        let wanted = hierarchy.suffix();
        let mut out = ParamSet::new();
        for (name, spec) in &self.0 {
            let suffixed = suffixes.iter().any(|s| name.ends_with(s));
            if !suffixed {
                out.insert(name.clone(), spec.clone());
            } else if let Some(base) = name.strip_suffix(wanted) {
                out.insert(base.to_string(), spec.clone());
            }
        }
        Ok(out)
    }

    /// Attach grid stepping specifications to the named parameters.
    pub fn apply_grid(&mut self, grid: &GridSettings) -> Result<()> {
        for (name, steps) in &grid.steps {
            let spec = self.0.get_mut(name).ok_or_else(|| {
                ScanError::Config(format!(
                    "grid settings step parameter '{name}', which is not a model parameter"
                ))
            })?;
            spec.steps = Some(steps.clone());
        }
        Ok(())
    }
}

impl FromIterator<(String, ParamSpec)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (String, ParamSpec)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
