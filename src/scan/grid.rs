//! Scan point enumeration.
//!
//! A `ScanGrid` holds the expanded value sequence of every scanned parameter
//! (sorted by name) and enumerates their Cartesian product. The last name
//! varies fastest, matching nested `for` loops over the sorted names.
//!
//! Points are addressable by index, so the same grid can be iterated any number
//! of times, or handed out to parallel workers, and always yields the same order.

use std::collections::BTreeMap;
use std::iter::FusedIterator;

use crate::domain::ParamSet;
use crate::error::{Result, ScanError};
use crate::scan::result::RESERVED_KEYS;
use crate::scan::steps::expand_param;

/// One combination of scanned-parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPoint {
    /// Position in enumeration order.
    pub index: usize,
    /// Scanned parameter name → value at this point.
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanGrid {
    names: Vec<String>,
    axes: Vec<Vec<f64>>,
    len: usize,
}

impl ScanGrid {
    /// Build a grid from name → value sequence pairs.
    pub fn new(axes: BTreeMap<String, Vec<f64>>) -> Result<Self> {
        if axes.is_empty() {
            return Err(ScanError::EmptyScan("no parameters to scan".to_string()));
        }

        let mut len: usize = 1;
        for (name, values) in &axes {
            if values.is_empty() {
                return Err(ScanError::EmptyScan(format!("parameter '{name}' has no scan values")));
            }
            len = len.checked_mul(values.len()).ok_or_else(|| {
                ScanError::Config("scan grid size overflows the address space".to_string())
            })?;
        }

        let (names, axes): (Vec<String>, Vec<Vec<f64>>) = axes.into_iter().unzip();
        Ok(Self { names, axes, len })
    }

    /// Expand the stepping specification of every scanned parameter in `params`.
    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let mut axes = BTreeMap::new();
        for name in params.scanned_names() {
            if RESERVED_KEYS.contains(&name.as_str()) {
                return Err(ScanError::Config(format!(
                    "'{name}' is a reserved result key and cannot be scanned"
                )));
            }
            if let Some(spec) = params.get(&name) {
                axes.insert(name.clone(), expand_param(&name, spec)?);
            }
        }
        Self::new(axes)
    }

    /// Scanned parameter names in enumeration (sorted) order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Expanded values of one scanned parameter.
    pub fn axis(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.axes[i].as_slice())
    }

    /// Total number of points (product of axis lengths).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The point at `index` in enumeration order.
    pub fn point(&self, index: usize) -> Option<ScanPoint> {
        if index >= self.len {
            return None;
        }
        let mut rem = index;
        let mut coords = vec![0.0; self.axes.len()];
        for (slot, axis) in coords.iter_mut().zip(&self.axes).rev() {
            *slot = axis[rem % axis.len()];
            rem /= axis.len();
        }
        let values = self.names.iter().cloned().zip(coords).collect();
        Some(ScanPoint { index, values })
    }

    /// Lazily iterate all points from the start.
    pub fn iter(&self) -> ScanPoints<'_> {
        ScanPoints {
            grid: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a ScanGrid {
    type Item = ScanPoint;
    type IntoIter = ScanPoints<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the points of a [`ScanGrid`].
#[derive(Debug, Clone)]
pub struct ScanPoints<'a> {
    grid: &'a ScanGrid,
    next: usize,
}

impl Iterator for ScanPoints<'_> {
    type Item = ScanPoint;

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.grid.point(self.next)?;
        self.next += 1;
        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.grid.len().saturating_sub(self.next);
        (rem, Some(rem))
    }
}

impl ExactSizeIterator for ScanPoints<'_> {}

impl FusedIterator for ScanPoints<'_> {}
