//! Parameter store and sweep grids.

use std::ops::Deref;
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray as nd;
use rustc_hash::FxHashSet as HashSet;
use crate::{
    error::{ CqedError, CqedResult },
    expr::Subs,
};

/// Ordered collection of named parameter values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamStore {
    values: IndexMap<String, f64>,
}

impl Deref for ParamStore {
    type Target = IndexMap<String, f64>;

    fn deref(&self) -> &Self::Target { &self.values }
}

impl FromIterator<(String, f64)> for ParamStore {
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = (String, f64)>
    {
        Self { values: iter.into_iter().collect() }
    }
}

impl ParamStore {
    pub fn new() -> Self { Self::default() }

    /// Register a parameter, keeping the existing value if it is already
    /// present.
    pub fn add<S>(&mut self, name: S, value: f64)
    where S: Into<String>
    {
        self.values.entry(name.into()).or_insert(value);
    }

    /// Set a parameter, creating it if it does not exist.
    pub fn insert<S>(&mut self, name: S, value: f64)
    where S: Into<String>
    {
        self.values.insert(name.into(), value);
    }

    /// Set an existing parameter.
    pub fn set(&mut self, name: &str, value: f64) -> CqedResult<()> {
        let slot = self.values.get_mut(name)
            .ok_or_else(|| CqedError::config(
                format!("unknown parameter '{name}'")))?;
        *slot = value;
        Ok(())
    }

    /// Get the value of a parameter.
    pub fn value(&self, name: &str) -> CqedResult<f64> {
        self.values.get(name).copied()
            .ok_or_else(|| CqedError::config(
                format!("unknown parameter '{name}'")))
    }

    /// Remove a parameter, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<f64> {
        self.values.shift_remove(name)
    }

    /// Mapping of every parameter.
    pub fn subs(&self) -> Subs {
        self.values.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Mapping of every parameter not named in `excluded`.
    pub fn subs_excluding(&self, excluded: &HashSet<String>) -> Subs {
        self.values.iter()
            .filter(|(k, _)| !excluded.contains(*k))
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// Values taken by a single swept parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepAxis {
    pub name: String,
    pub values: Vec<f64>,
}

impl SweepAxis {
    pub fn new<S>(name: S, values: Vec<f64>) -> Self
    where S: Into<String>
    {
        Self { name: name.into(), values }
    }

    /// `n` evenly spaced values over `[start, stop]`.
    pub fn linspace<S>(name: S, start: f64, stop: f64, n: usize) -> Self
    where S: Into<String>
    {
        Self::new(name, nd::Array1::linspace(start, stop, n).to_vec())
    }
}

/// Description of the parameter values visited by a sweep.
#[derive(Clone, Debug, PartialEq)]
pub enum SweepSpec {
    /// Cartesian product of the axes, with the first axis varying slowest.
    Grid(Vec<SweepAxis>),
    /// Explicit list of points, each holding one value per name.
    Custom { names: Vec<String>, points: Vec<Vec<f64>> },
}

impl SweepSpec {
    pub fn grid<I>(axes: I) -> Self
    where I: IntoIterator<Item = SweepAxis>
    {
        Self::Grid(axes.into_iter().collect())
    }

    /// A sweep consisting of a single point.
    pub fn single<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let (names, point): (Vec<String>, Vec<f64>)
            = values.into_iter().map(|(s, x)| (s.into(), x)).unzip();
        Self::Custom { names, points: vec![point] }
    }

    /// Expand into the flat list of points, checking every name against the
    /// parameter store.
    pub fn expand(&self, store: &ParamStore) -> CqedResult<SweepGrid> {
        let (names, shape, points): (Vec<String>, Vec<usize>, Vec<Vec<f64>>)
            = match self {
                Self::Grid(axes) => {
                    if let Some(ax) = axes.iter().find(|ax| ax.values.is_empty()) {
                        return Err(CqedError::config(
                            format!("sweep axis '{}' has no values", ax.name)));
                    }
                    let names: Vec<String>
                        = axes.iter().map(|ax| ax.name.clone()).collect();
                    let shape: Vec<usize>
                        = axes.iter().map(|ax| ax.values.len()).collect();
                    let points: Vec<Vec<f64>>
                        = if axes.is_empty() {
                            Vec::new()
                        } else {
                            axes.iter()
                                .map(|ax| ax.values.iter().copied())
                                .multi_cartesian_product()
                                .collect()
                        };
                    (names, shape, points)
                },
                Self::Custom { names, points } => {
                    if let Some(p) = points.iter().find(|p| p.len() != names.len()) {
                        return Err(CqedError::config(format!(
                            "custom sweep point has {} values for {} names",
                            p.len(), names.len(),
                        )));
                    }
                    (names.clone(), vec![points.len()], points.clone())
                },
            };
        if names.is_empty() {
            return Err(CqedError::config("sweep has no swept parameters"));
        }
        let mut seen: HashSet<&str> = HashSet::default();
        for name in names.iter() {
            if !seen.insert(name.as_str()) {
                return Err(CqedError::config(
                    format!("parameter '{name}' is swept more than once")));
            }
            if !store.contains_key(name) {
                return Err(CqedError::config(
                    format!("cannot sweep unknown parameter '{name}'")));
            }
        }
        Ok(SweepGrid { names, shape, points })
    }
}

/// Flat list of parameter points visited by a sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepGrid {
    names: Vec<String>,
    shape: Vec<usize>,
    points: Vec<Vec<f64>>,
}

impl SweepGrid {
    pub fn len(&self) -> usize { self.points.len() }

    pub fn is_empty(&self) -> bool { self.points.is_empty() }

    /// Names of the swept parameters.
    pub fn names(&self) -> &[String] { &self.names }

    /// Number of values along each axis.
    pub fn shape(&self) -> &[usize] { &self.shape }

    /// Parameter values at the `k`-th point.
    pub fn point(&self, k: usize) -> Option<IndexMap<String, f64>> {
        self.points.get(k)
            .map(|p| self.names.iter().cloned().zip(p.iter().copied()).collect())
    }

    /// Iterate over all points in order.
    pub fn iter(&self) -> impl Iterator<Item = IndexMap<String, f64>> + '_ {
        self.points.iter()
            .map(|p| self.names.iter().cloned().zip(p.iter().copied()).collect())
    }

    /// Values taken by a single swept parameter over all points.
    pub fn values(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(self.points.iter().map(|p| p[idx]).collect())
    }

    /// Indices of the points where every parameter in `fixed` takes the given
    /// value, ordered by the value of `ind_var`.
    pub fn select(&self, ind_var: &str, fixed: &IndexMap<String, f64>)
        -> CqedResult<Vec<usize>>
    {
        let ind = self.names.iter().position(|n| n == ind_var)
            .ok_or_else(|| CqedError::config(
                format!("'{ind_var}' is not a swept parameter")))?;
        let fixed_idx: Vec<(usize, f64)>
            = fixed.iter()
            .map(|(name, val)| {
                self.names.iter().position(|n| n == name)
                    .map(|k| (k, *val))
                    .ok_or_else(|| CqedError::config(
                        format!("'{name}' is not a swept parameter")))
            })
            .collect::<CqedResult<_>>()?;
        let mut selected: Vec<usize>
            = self.points.iter().enumerate()
            .filter(|(_, p)| fixed_idx.iter().all(|(k, v)| p[*k] == *v))
            .map(|(i, _)| i)
            .collect();
        selected.sort_by(|&a, &b| {
            self.points[a][ind].total_cmp(&self.points[b][ind])
        });
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParamStore {
        [("a", 0.0), ("b", 0.0), ("c", 1.0)].into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn grid_is_row_major() {
        let spec = SweepSpec::grid([
            SweepAxis::new("a", vec![1.0, 2.0]),
            SweepAxis::new("b", vec![10.0, 20.0, 30.0]),
        ]);
        let grid = spec.expand(&store()).unwrap();
        assert_eq!(grid.len(), 6);
        assert_eq!(grid.shape(), &[2, 3]);
        assert_eq!(grid.values("a").unwrap(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert_eq!(grid.point(4).unwrap()["b"], 20.0);
    }

    #[test]
    fn unknown_and_duplicate_names_rejected() {
        let unknown = SweepSpec::grid([SweepAxis::new("z", vec![1.0])]);
        assert!(matches!(
            unknown.expand(&store()), Err(CqedError::Configuration(_))));
        let dup = SweepSpec::grid([
            SweepAxis::new("a", vec![1.0]),
            SweepAxis::new("a", vec![2.0]),
        ]);
        assert!(dup.expand(&store()).is_err());
    }

    #[test]
    fn select_slices_along_axis() {
        let spec = SweepSpec::grid([
            SweepAxis::new("a", vec![2.0, 1.0]),
            SweepAxis::new("b", vec![10.0, 20.0]),
        ]);
        let grid = spec.expand(&store()).unwrap();
        let fixed: IndexMap<String, f64>
            = [("b".to_string(), 20.0)].into_iter().collect();
        assert_eq!(grid.select("a", &fixed).unwrap(), vec![3, 1]);
    }

    #[test]
    fn set_unknown_parameter_fails() {
        let mut s = store();
        assert!(s.set("nope", 1.0).is_err());
        s.set("c", 2.0).unwrap();
        assert_eq!(s.value("c").unwrap(), 2.0);
    }
}
