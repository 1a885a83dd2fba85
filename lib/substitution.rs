//! Two-phase substitution of parameter values into circuit coefficients.
//!
//! Before a sweep, every parameter that is held fixed is substituted into the
//! symbolic coefficients once, leaving expressions in the swept parameters
//! only ([`SubstitutionCache::prepare`]). At each sweep point the remaining
//! parameters are substituted and the expressions evaluated to numbers
//! ([`SubstitutionCache::resolve`]). The per-point phase reads the cache and
//! the point's values and nothing else.

use std::f64::consts::{ PI, TAU };
use indexmap::IndexMap;
use log::{ debug, warn };
use ndarray as nd;
use ndarray_linalg::Inverse;
use num_complex::Complex64 as C64;
use rustc_hash::FxHashSet as HashSet;
use crate::{
    circuit::{ CircuitModel, MatrixForm, NodeId, Resonator },
    error::{ CqedError, CqedResult },
    expr::{ self, Expr, Subs, SymMatrix, SymVector },
    params::ParamStore,
    units::Units,
};

/// Linear change of node coordinates. Inverse capacitances transform as
/// `R · Cinv · Rᵗ` and inverse inductances as `Rᵗ⁻¹ · Linv · R⁻¹`.
#[derive(Clone, Debug, PartialEq)]
pub struct Transform {
    pub R: nd::Array2<f64>,
    pub Rt: nd::Array2<f64>,
    pub Rinv: nd::Array2<f64>,
    pub Rtinv: nd::Array2<f64>,
}

impl Transform {
    pub fn new(R: nd::Array2<f64>) -> CqedResult<Self> {
        if !R.is_square() {
            return Err(CqedError::config(format!(
                "transformation matrix must be square, got shape {:?}",
                R.shape(),
            )));
        }
        let Rt = R.t().to_owned();
        let Rinv = R.inv()?;
        let Rtinv = Rt.inv()?;
        Ok(Self { R, Rt, Rinv, Rtinv })
    }
}

/// The symbolic coefficients entering the Hamiltonian and observables.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolicSet {
    /// Inverse capacitance, in transformed coordinates.
    pub Cinv: SymMatrix,
    /// Inverse inductance, in transformed coordinates.
    pub Linv: SymMatrix,
    /// Branch-form inverse inductance.
    pub Linv_b: SymMatrix,
    pub Jvec: SymVector,
    pub Qb: SymVector,
    /// Branch flux bias matrix.
    pub Pbm: SymMatrix,
}

impl SymbolicSet {
    /// Read the coefficients from a circuit, applying a coordinate
    /// transformation if one is given.
    pub fn from_circuit<C>(circuit: &C, transform: Option<&Transform>)
        -> CqedResult<Self>
    where C: CircuitModel + ?Sized
    {
        let Cinv_node = circuit.inverse_capacitance();
        let Linv_node = circuit.inverse_inductance(MatrixForm::Node);
        let (Cinv, Linv) = match transform {
            Some(T) => (
                expr::sandwich(&T.R, Cinv_node, &T.Rt)?,
                expr::sandwich(&T.Rtinv, Linv_node, &T.Rinv)?,
            ),
            None => (Cinv_node.clone(), Linv_node.clone()),
        };
        Ok(Self {
            Cinv,
            Linv,
            Linv_b: circuit.inverse_inductance(MatrixForm::Branch).clone(),
            Jvec: circuit.josephson_vector().clone(),
            Qb: circuit.charge_bias_vector().clone(),
            Pbm: circuit.flux_bias_matrix().clone(),
        })
    }

    fn map<F>(&self, f: F) -> Self
    where F: Fn(&Expr) -> Expr
    {
        Self {
            Cinv: self.Cinv.map(&f),
            Linv: self.Linv.map(&f),
            Linv_b: self.Linv_b.map(&f),
            Jvec: self.Jvec.map(&f),
            Qb: self.Qb.map(&f),
            Pbm: self.Pbm.map(&f),
        }
    }

    /// Replace each parameter `old` by its registered expression.
    pub fn with_parameterisations(&self, params: &IndexMap<String, Expr>)
        -> Self
    {
        self.map(|e| {
            params.iter()
                .fold(e.clone(), |acc, (old, new)| acc.subs_expr(old, new))
        })
    }

    /// Substitute every parameter with a value in `subs`.
    pub fn presub(&self, subs: &Subs) -> PreSubstituted {
        PreSubstituted(self.map(|e| e.subs(subs)))
    }

    /// Sorted list of every free symbol.
    pub fn free_symbols(&self) -> Vec<String> {
        let mut acc: Vec<String>
            = self.Cinv.iter()
            .chain(self.Linv.iter())
            .chain(self.Linv_b.iter())
            .chain(self.Jvec.iter())
            .chain(self.Qb.iter())
            .chain(self.Pbm.iter())
            .flat_map(|e| e.symbols())
            .collect();
        acc.sort();
        acc.dedup();
        acc
    }
}

/// Coefficients with every sweep-invariant parameter substituted.
#[derive(Clone, Debug, PartialEq)]
pub struct PreSubstituted(SymbolicSet);

impl PreSubstituted {
    pub fn exprs(&self) -> &SymbolicSet { &self.0 }

    /// Evaluate every coefficient with the remaining parameters.
    pub fn postsub(&self, subs: &Subs) -> CqedResult<NumericSnapshot> {
        let set = &self.0;
        let Pbm = expr::eval_array(&set.Pbm, subs, "Pbm")?;
        let Pexp: nd::Array1<C64>
            = Pbm.diag().mapv(|p| C64::from_polar(1.0, TAU * p));
        let Pexp_conj = Pexp.mapv(|z| z.conj());
        Ok(NumericSnapshot {
            Cinv: expr::eval_array(&set.Cinv, subs, "Cinv")?,
            Linv: expr::eval_array(&set.Linv, subs, "Linv")?,
            Linv_b: expr::eval_array(&set.Linv_b, subs, "Linv_b")?,
            Jvec: expr::eval_array(&set.Jvec, subs, "Jvec")?,
            Qb: expr::eval_array(&set.Qb, subs, "Qb")?,
            Pbm,
            Pexp,
            Pexp_conj,
        })
    }
}

/// Numerical coefficients at a single parameter point.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericSnapshot {
    pub Cinv: nd::Array2<f64>,
    pub Linv: nd::Array2<f64>,
    pub Linv_b: nd::Array2<f64>,
    pub Jvec: nd::Array1<f64>,
    pub Qb: nd::Array1<f64>,
    pub Pbm: nd::Array2<f64>,
    /// `exp(2πi φ)` for the external flux `φ` through each branch.
    pub Pexp: nd::Array1<C64>,
    pub Pexp_conj: nd::Array1<C64>,
}

/// Numerical coefficients together with every parameter value at a point.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericState {
    pub numeric: NumericSnapshot,
    pub params: IndexMap<String, f64>,
}

/// Derive resonator parameters from their bare frequencies and impedances.
///
/// For every resonator whose frequency `f` and impedance `Z` both have values
/// in `subs`, this computes `C = 1/(2π f Z)` and `L = Z/(2π f)`, then the
/// coupling strength, loaded frequency and loaded impedance from their
/// expressions. Each derived value is inserted into `subs` and returned. A
/// resonator with a zero frequency or impedance is skipped.
pub fn resonator_substitutions<'a, I>(subs: &mut Subs, resonators: I, units: &Units)
    -> CqedResult<IndexMap<String, f64>>
where I: IntoIterator<Item = &'a Resonator>
{
    let mut derived: IndexMap<String, f64> = IndexMap::new();
    for res in resonators {
        let (fr, zr) = match (subs.get(&res.fr), subs.get(&res.zr)) {
            (Some(&fr), Some(&zr)) => (fr, zr),
            _ => { continue; },
        };
        if fr == 0.0 || zr == 0.0 {
            warn!(
                "resonator has {} = {fr} and {} = {zr}; skipping its \
                substitutions",
                res.fr, res.zr,
            );
            continue;
        }
        let cr = 0.5 / (PI * fr * units.hz * zr * units.ohm) / units.farad;
        let lr = 0.5 * zr * units.ohm / (PI * fr * units.hz) / units.henry;
        subs.insert(res.cr.clone(), cr);
        subs.insert(res.lr.clone(), lr);
        let gc = res.gc_expr.eval(subs)? * units.chg_osc_cpl;
        let frl = res.frl_expr.eval(subs)? * units.freq;
        let zrl = res.zrl_expr.eval(subs)? * units.impe;
        let values = [
            (&res.cr, cr),
            (&res.lr, lr),
            (&res.gc, gc),
            (&res.frl, frl),
            (&res.zrl, zrl),
        ];
        for (name, val) in values {
            if !val.is_finite() {
                return Err(CqedError::non_finite(name.as_str(), val));
            }
            subs.insert(name.clone(), val);
            derived.insert(name.clone(), val);
        }
    }
    Ok(derived)
}

/// Pre-substituted coefficients for a set of swept parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SubstitutionCache {
    exprs: PreSubstituted,
    non_swept: Subs,
    swept: HashSet<String>,
    swept_resonators: Vec<NodeId>,
    base: IndexMap<String, f64>,
}

impl SubstitutionCache {
    /// Substitute every parameter not named in `swept`.
    ///
    /// A resonator whose frequency, impedance or coupling expressions involve
    /// a swept parameter has its derived parameters recomputed at every
    /// point instead. Fails early if a symbol remains that no point can
    /// supply.
    pub fn prepare(
        set: &SymbolicSet,
        parameterisations: &IndexMap<String, Expr>,
        store: &ParamStore,
        swept: &[String],
        resonators: &IndexMap<NodeId, Resonator>,
        units: &Units,
    ) -> CqedResult<Self>
    {
        let mut swept: HashSet<String> = swept.iter().cloned().collect();
        let swept_resonators: Vec<NodeId>
            = resonators.iter()
            .filter(|(_, res)| {
                swept.contains(&res.fr)
                    || swept.contains(&res.zr)
                    || [&res.gc_expr, &res.frl_expr, &res.zrl_expr].iter()
                        .flat_map(|e| e.symbols())
                        .any(|s| swept.contains(&s))
            })
            .map(|(node, _)| *node)
            .collect();
        for node in swept_resonators.iter() {
            swept.extend(
                resonators[node].derived_names().iter().map(|s| s.to_string()));
        }

        let mut non_swept = store.subs_excluding(&swept);
        let fixed = resonators.iter()
            .filter(|(node, _)| !swept_resonators.contains(*node))
            .map(|(_, res)| res);
        let derived = resonator_substitutions(&mut non_swept, fixed, units)?;
        let mut base: IndexMap<String, f64> = (**store).clone();
        base.extend(derived);

        let exprs
            = set.with_parameterisations(parameterisations).presub(&non_swept);
        let free = exprs.exprs().free_symbols();
        if let Some(sym) = free.iter().find(|s| !swept.contains(*s)) {
            return Err(CqedError::unresolved(sym.as_str()));
        }
        debug!(
            "pre-substituted {} fixed parameters; {} symbols left for the sweep",
            non_swept.len(), free.len(),
        );
        Ok(Self { exprs, non_swept, swept, swept_resonators, base })
    }

    pub fn exprs(&self) -> &PreSubstituted { &self.exprs }

    /// Names of every parameter deferred to [`Self::resolve`].
    pub fn swept(&self) -> &HashSet<String> { &self.swept }

    /// Evaluate the coefficients at a point.
    pub fn resolve(
        &self,
        point: &IndexMap<String, f64>,
        resonators: &IndexMap<NodeId, Resonator>,
        units: &Units,
    ) -> CqedResult<NumericState>
    {
        let mut mapping = self.non_swept.clone();
        mapping.extend(point.iter().map(|(k, v)| (k.clone(), *v)));
        let swept_res = self.swept_resonators.iter()
            .filter_map(|node| resonators.get(node));
        let derived = resonator_substitutions(&mut mapping, swept_res, units)?;
        let numeric = self.exprs.postsub(&mapping)?;
        let mut params = self.base.clone();
        params.extend(point.iter().map(|(k, v)| (k.clone(), *v)));
        params.extend(derived);
        Ok(NumericState { numeric, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::circuit::{ transmon, Edge, EdgeKind, GROUND, SymbolicCircuit };

    fn resonator() -> Resonator {
        Resonator::on_node(
            1,
            Expr::sym("Cc") / Expr::sym("C1r"),
            Expr::sym("f1r") * 1.0,
            Expr::sym("Z1r") * 1.0,
        )
    }

    #[test]
    fn resonator_values() {
        let res = resonator();
        let mut subs: Subs = [("f1r", 5.0), ("Z1r", 50.0), ("Cc", 2.0)]
            .into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let derived
            = resonator_substitutions(&mut subs, [&res], &Units::default())
            .unwrap();
        let C = 1.0 / (2.0 * PI * 5.0 * 50.0);
        assert_relative_eq!(derived["C1r"], C, max_relative = 1e-12);
        assert_relative_eq!(
            derived["L1r"], 50.0 / (2.0 * PI * 5.0), max_relative = 1e-12);
        assert_relative_eq!(derived["g1r"], 2.0 / C, max_relative = 1e-12);
        assert_relative_eq!(subs["C1r"], C, max_relative = 1e-12);
    }

    #[test]
    fn zero_resonator_frequency_is_skipped() {
        let res = resonator();
        let mut subs: Subs = [("f1r", 0.0), ("Z1r", 50.0)]
            .into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let derived
            = resonator_substitutions(&mut subs, [&res], &Units::default())
            .unwrap();
        assert!(derived.is_empty());
        assert!(!subs.contains_key("C1r"));
        assert!(!subs.contains_key("L1r"));
    }

    #[test]
    fn transform_applies_to_inverse_matrices() {
        let circuit = SymbolicCircuit::new(
            [1, 2],
            [
                (Edge::new(GROUND, 1), EdgeKind::Capacitive),
                (Edge::new(1, 2), EdgeKind::Inductive),
            ],
        ).unwrap()
            .with_inverse_capacitance(nd::array![
                [Expr::sym("a"), Expr::constant(0.0)],
                [Expr::constant(0.0), Expr::sym("b")],
            ]).unwrap()
            .with_inverse_inductance(nd::array![
                [Expr::sym("l"), Expr::constant(0.0)],
                [Expr::constant(0.0), Expr::sym("l")],
            ]).unwrap();
        let T = Transform::new(nd::array![[1.0, 0.0], [1.0, 1.0]]).unwrap();
        let set = SymbolicSet::from_circuit(&circuit, Some(&T)).unwrap();
        let subs: Subs = [("a", 2.0), ("b", 3.0), ("l", 1.0)]
            .into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let num = set.presub(&subs).postsub(&Subs::default()).unwrap();
        assert_eq!(num.Cinv, nd::array![[2.0, 2.0], [2.0, 5.0]]);
        // Rᵗ⁻¹ R⁻¹ = (R Rᵗ)⁻¹
        assert_relative_eq!(num.Linv[[0, 0]], 2.0, max_relative = 1e-12);
        assert_relative_eq!(num.Linv[[0, 1]], -1.0, max_relative = 1e-12);
        assert_relative_eq!(num.Linv[[1, 1]], 1.0, max_relative = 1e-12);
    }

    #[test]
    fn non_square_transform_rejected() {
        assert!(matches!(
            Transform::new(nd::Array2::zeros((2, 3))),
            Err(CqedError::Configuration(_)),
        ));
    }

    #[test]
    fn cache_defers_swept_parameters() {
        let circuit = transmon(0.5, 1.0, 0.0).unwrap();
        let store: ParamStore = circuit.parameters().clone().into_iter().collect();
        let set = SymbolicSet::from_circuit(&circuit, None).unwrap();
        let cache = SubstitutionCache::prepare(
            &set,
            &IndexMap::new(),
            &store,
            &["C".to_string()],
            circuit.resonators(),
            &Units::default(),
        ).unwrap();
        assert_eq!(cache.exprs().exprs().free_symbols(), vec!["C".to_string()]);
        let point: IndexMap<String, f64>
            = [("C".to_string(), 0.25)].into_iter().collect();
        let state = cache.resolve(&point, circuit.resonators(), &Units::default())
            .unwrap();
        assert_eq!(state.numeric.Cinv[[0, 0]], 4.0);
        assert_eq!(state.params["C"], 0.25);
        assert_eq!(state.params["EJ"], 1.0);
    }

    #[test]
    fn parameterisation_replaces_parameter() {
        let circuit = transmon(0.5, 1.0, 0.0).unwrap();
        let set = SymbolicSet::from_circuit(&circuit, None).unwrap();
        let params: IndexMap<String, Expr>
            = [("C".to_string(), Expr::sym("Cj") + Expr::sym("Cs"))]
            .into_iter().collect();
        let re = set.with_parameterisations(&params);
        assert_eq!(re.free_symbols(), vec!["Cj", "Cs", "EJ", "ng"]);
    }

    #[test]
    fn missing_value_fails_before_sweep() {
        let circuit = transmon(0.5, 1.0, 0.0).unwrap();
        let mut store: ParamStore
            = circuit.parameters().clone().into_iter().collect();
        store.remove("EJ");
        let set = SymbolicSet::from_circuit(&circuit, None).unwrap();
        let res = SubstitutionCache::prepare(
            &set,
            &IndexMap::new(),
            &store,
            &[],
            circuit.resonators(),
            &Units::default(),
        );
        match res {
            Err(CqedError::Substitution { symbol, .. })
                => assert_eq!(symbol, "EJ"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
