//! Numerical quantization of a symbolic circuit.
//!
//! A [`NumericalSystem`] owns a circuit description, the current parameter
//! values, the basis configuration of every mode, and the operators and
//! numerical coefficients derived from them. The usual workflow is
//! 1. [`NumericalSystem::configure_operator`] for every node;
//! 2. [`NumericalSystem::prepare_operators`];
//! 3. [`NumericalSystem::substitute`];
//! 4. any of the evaluables ([`NumericalSystem::hamiltonian`],
//!    [`NumericalSystem::branch_currents`], ...), or a parameter sweep (see
//!    [`crate::sweep`]).

use indexmap::IndexMap;
use log::debug;
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    circuit::{ CircuitModel, Edge, MatrixForm, NodeId },
    compose::{ CompositeMap, OpVectors },
    config::SystemConfig,
    diag::{ DiagConfig, Spectrum },
    error::{ CqedError, CqedResult },
    expr::{ Expr, Subs },
    hamiltonian,
    operators::{ Basis, ModeConfig, OperatorBundle },
    params::ParamStore,
    substitution::{
        NumericState,
        SubstitutionCache,
        SymbolicSet,
        Transform,
        resonator_substitutions,
    },
    units::Units,
};

/// Numerical model of a circuit.
#[derive(Clone, Debug)]
pub struct NumericalSystem<C>
where C: CircuitModel
{
    circuit: C,
    units: Units,
    params: ParamStore,
    parameterisations: IndexMap<String, Expr>,
    transform: Option<Transform>,
    modes: IndexMap<NodeId, ModeConfig>,
    composite: Option<CompositeMap>,
    ops: Option<OpVectors>,
    state: Option<NumericState>,
    branch_ops: IndexMap<Edge, nd::Array2<C64>>,
    node_ops: IndexMap<NodeId, nd::Array2<C64>>,
    diag: DiagConfig,
}

impl<C> NumericalSystem<C>
where C: CircuitModel
{
    /// Create a new system with every parameter at the circuit's default
    /// value and unit prefactors of 1.
    pub fn new(circuit: C) -> Self {
        let params: ParamStore
            = circuit.parameters().iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        Self {
            circuit,
            units: Units::default(),
            params,
            parameterisations: IndexMap::new(),
            transform: None,
            modes: IndexMap::new(),
            composite: None,
            ops: None,
            state: None,
            branch_ops: IndexMap::new(),
            node_ops: IndexMap::new(),
            diag: DiagConfig::default(),
        }
    }

    /// Set the unit prefactors.
    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self.invalidate_operators();
        self
    }

    pub fn circuit(&self) -> &C { &self.circuit }

    pub fn units(&self) -> &Units { &self.units }

    pub fn node_list(&self) -> &[NodeId] { self.circuit.nodes() }

    /// Position of a node in the node list.
    pub fn node_index(&self, node: NodeId) -> CqedResult<usize> {
        self.circuit.nodes().iter().position(|&n| n == node)
            .ok_or_else(|| CqedError::config(
                format!("node {node} is not a valid circuit node")))
    }

    fn edge_index(&self, edge: &Edge) -> CqedResult<usize> {
        self.circuit.edges().iter().position(|e| e == edge)
            .ok_or_else(|| CqedError::config(
                format!("edge {edge} is not a valid circuit branch")))
    }

    fn invalidate_operators(&mut self) {
        self.composite = None;
        self.ops = None;
        self.branch_ops.clear();
        self.node_ops.clear();
    }

    /// Choose the basis and truncation of a node's mode.
    ///
    /// Oscillator modes record their characteristic impedance
    /// `sqrt(Cinv[i, i] / Linv[i, i])`, which is resolved when the operators
    /// are generated. Any previously generated operators are discarded.
    pub fn configure_operator(
        &mut self,
        node: NodeId,
        truncation: usize,
        basis: Basis,
    ) -> CqedResult<()>
    {
        let i = self.node_index(node)?;
        basis.check_truncation(truncation)?;
        let impedance = match basis {
            Basis::Oscillator => {
                let cinv = self.circuit.inverse_capacitance()[[i, i]].clone();
                let linv
                    = self.circuit.inverse_inductance(MatrixForm::Node)[[i, i]]
                    .clone();
                Some((cinv / linv).sqrt())
            },
            Basis::Charge | Basis::Flux { .. } => None,
        };
        debug!(
            "node {node}: {} basis with truncation {truncation}",
            basis.name(),
        );
        self.modes.insert(
            node, ModeConfig { truncation, basis, impedance });
        self.invalidate_operators();
        Ok(())
    }

    /// Configuration of a node's mode, if set.
    pub fn mode(&self, node: NodeId) -> Option<&ModeConfig> {
        self.modes.get(&node)
    }

    /// Dimension of the joint Hilbert space of every configured mode.
    pub fn hilbert_space_size(&self) -> usize {
        self.modes.values().map(|m| m.dim()).product()
    }

    /// Current parameter values with parameterisations and resonator
    /// derivations applied.
    fn full_subs(&self) -> CqedResult<Subs> {
        let mut subs = self.params.subs();
        resonator_substitutions(
            &mut subs, self.circuit.resonators().values(), &self.units)?;
        Ok(subs)
    }

    fn resolve_parameterisations(&self, e: &Expr) -> Expr {
        self.parameterisations.iter()
            .fold(e.clone(), |acc, (old, new)| acc.subs_expr(old, new))
    }

    /// Generate every mode's operators and embed them in the joint space.
    ///
    /// Oscillator impedances are evaluated with the current parameter values.
    pub fn prepare_operators(&mut self) -> CqedResult<()> {
        let subs = self.full_subs()?;
        let mut bundles: IndexMap<NodeId, OperatorBundle> = IndexMap::new();
        for &node in self.circuit.nodes() {
            let mode = self.modes.get(&node)
                .ok_or_else(|| CqedError::config(format!(
                    "node {node} has no operator configuration; call \
                    configure_operator first"
                )))?;
            let resolved = ModeConfig {
                impedance: mode.impedance.as_ref()
                    .map(|z| self.resolve_parameterisations(z)),
                ..mode.clone()
            };
            bundles.insert(node, resolved.bundle(node, &subs, &self.units)?);
        }
        let composite = CompositeMap::build(self.circuit.nodes(), &bundles)?;
        let ops = OpVectors::build(&self.circuit, &composite)?;
        debug!("prepared operators in a space of dimension {}", composite.dim());
        self.invalidate_operators();
        self.composite = Some(composite);
        self.ops = Some(ops);
        Ok(())
    }

    /// Composite operator vectors; fails if the operators have not been
    /// prepared.
    pub fn op_vectors(&self) -> CqedResult<&OpVectors> {
        self.ops.as_ref()
            .ok_or_else(|| CqedError::config(
                "operators have not been prepared; call prepare_operators"))
    }

    pub fn composite(&self) -> CqedResult<&CompositeMap> {
        self.composite.as_ref()
            .ok_or_else(|| CqedError::config(
                "operators have not been prepared; call prepare_operators"))
    }

    /// Use the node coordinates `R · Φ`.
    pub fn apply_transformation(&mut self, R: nd::Array2<f64>)
        -> CqedResult<()>
    {
        let n = self.circuit.nodes().len();
        if R.nrows() != n {
            return Err(CqedError::config(format!(
                "transformation of shape {:?} does not match the {n} degrees \
                of freedom",
                R.shape(),
            )));
        }
        self.transform = Some(Transform::new(R)?);
        self.state = None;
        Ok(())
    }

    pub fn transform(&self) -> Option<&Transform> { self.transform.as_ref() }

    /// Replace the parameter `old` by `expr` wherever it appears, registering
    /// the parameters `expr` is written in.
    pub fn add_parameterisation<I, S>(&mut self, old: &str, expr: Expr, new_params: I)
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.parameterisations.insert(old.to_string(), expr);
        new_params.into_iter()
            .for_each(|(name, value)| { self.params.add(name, value); });
        self.state = None;
    }

    /// Remove the parameterisation of `old`.
    pub fn rm_parameterisation(&mut self, old: &str) -> Option<Expr> {
        self.state = None;
        self.parameterisations.shift_remove(old)
    }

    pub fn parameterisations(&self) -> &IndexMap<String, Expr> {
        &self.parameterisations
    }

    pub fn parameters(&self) -> &ParamStore { &self.params }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.params.keys().map(|k| k.as_str()).collect()
    }

    pub fn parameter(&self, name: &str) -> CqedResult<f64> {
        self.params.value(name)
    }

    /// Set a single parameter. The numerical coefficients are refreshed by the
    /// next call to [`Self::substitute`].
    pub fn set_parameter(&mut self, name: &str, value: f64) -> CqedResult<()> {
        self.params.set(name, value)?;
        self.state = None;
        Ok(())
    }

    /// Set several parameters, then regenerate the operators (if they were
    /// prepared) and the numerical coefficients.
    pub fn set_parameters<'a, I>(&mut self, values: I) -> CqedResult<()>
    where I: IntoIterator<Item = (&'a str, f64)>
    {
        for (name, value) in values {
            self.params.set(name, value)?;
        }
        if self.ops.is_some() {
            self.prepare_operators()?;
        }
        self.substitute()
    }

    pub fn prefactor(&self, name: &str) -> CqedResult<f64> {
        self.units.prefactor(name)
    }

    pub(crate) fn symbolic_set(&self) -> CqedResult<SymbolicSet> {
        SymbolicSet::from_circuit(&self.circuit, self.transform.as_ref())
    }

    pub(crate) fn substitution_cache(&self, swept: &[String])
        -> CqedResult<SubstitutionCache>
    {
        SubstitutionCache::prepare(
            &self.symbolic_set()?,
            &self.parameterisations,
            &self.params,
            swept,
            self.circuit.resonators(),
            &self.units,
        )
    }

    /// Evaluate every coefficient with the current parameter values.
    ///
    /// Derived resonator parameters are written back into the parameter store.
    pub fn substitute(&mut self) -> CqedResult<()> {
        let cache = self.substitution_cache(&[])?;
        let state = cache.resolve(
            &IndexMap::new(), self.circuit.resonators(), &self.units)?;
        for (name, value) in state.params.iter() {
            if self.params.get(name) != Some(value) {
                self.params.insert(name.clone(), *value);
            }
        }
        self.branch_ops.clear();
        self.node_ops.clear();
        self.state = Some(state);
        Ok(())
    }

    /// Numerical coefficients from the last call to [`Self::substitute`].
    pub fn state(&self) -> CqedResult<&NumericState> {
        self.state.as_ref()
            .ok_or_else(|| CqedError::config(
                "no parameter values have been substituted; call substitute"))
    }

    /// Hamiltonian at the current parameter values.
    pub fn hamiltonian(&self) -> CqedResult<nd::Array2<C64>> {
        self.hamiltonian_at(self.state()?)
    }

    pub(crate) fn hamiltonian_at(&self, state: &NumericState)
        -> CqedResult<nd::Array2<C64>>
    {
        hamiltonian::hamiltonian(self.op_vectors()?, &state.numeric, &self.units)
    }

    pub(crate) fn branch_currents_at(&self, state: &NumericState)
        -> CqedResult<IndexMap<Edge, nd::Array2<C64>>>
    {
        hamiltonian::branch_currents(
            &self.circuit, self.op_vectors()?, &state.numeric, &self.units)
    }

    pub(crate) fn node_voltages_at(&self, state: &NumericState)
        -> CqedResult<IndexMap<NodeId, nd::Array2<C64>>>
    {
        hamiltonian::node_voltages(
            &self.circuit, self.op_vectors()?, &state.numeric, &self.units)
    }

    /// Current operator of every branch. The result is kept for
    /// [`Self::branch_current_operator`].
    pub fn branch_currents(&mut self)
        -> CqedResult<&IndexMap<Edge, nd::Array2<C64>>>
    {
        let currents = self.branch_currents_at(self.state()?)?;
        self.branch_ops = currents;
        Ok(&self.branch_ops)
    }

    /// Current operator of a single branch, as last computed by
    /// [`Self::branch_currents`].
    pub fn branch_current_operator(&self, edge: &Edge)
        -> CqedResult<&nd::Array2<C64>>
    {
        self.edge_index(edge)?;
        self.branch_ops.get(edge)
            .ok_or_else(|| CqedError::config(format!(
                "no current operator for edge {edge}; call branch_currents"
            )))
    }

    /// Voltage operator of every node. The result is kept for
    /// [`Self::node_voltage_operator`].
    pub fn node_voltages(&mut self)
        -> CqedResult<&IndexMap<NodeId, nd::Array2<C64>>>
    {
        let voltages = self.node_voltages_at(self.state()?)?;
        self.node_ops = voltages;
        Ok(&self.node_ops)
    }

    pub fn node_voltage_operator(&self, node: NodeId)
        -> CqedResult<&nd::Array2<C64>>
    {
        self.node_index(node)?;
        self.node_ops.get(&node)
            .ok_or_else(|| CqedError::config(format!(
                "no voltage operator for node {node}; call node_voltages"
            )))
    }

    fn per_node(&self, values: nd::Array1<f64>, node: Option<NodeId>)
        -> CqedResult<IndexMap<NodeId, f64>>
    {
        match node {
            Some(n) => {
                let i = self.node_index(n)?;
                Ok([(n, values[i])].into_iter().collect())
            },
            None => {
                Ok(self.circuit.nodes().iter().copied().zip(values.iter().copied())
                    .collect())
            },
        }
    }

    /// Charging energy `Ec/2 · Cinv[i, i]` of every node, or only of `node`.
    pub fn charging_energies(&self, node: Option<NodeId>)
        -> CqedResult<IndexMap<NodeId, f64>>
    {
        let state = self.state()?;
        self.per_node(
            hamiltonian::charging_energies(&state.numeric, &self.units), node)
    }

    /// Inductive energy `El/2 · Linv[i, i]` of every node, or only of `node`.
    pub fn flux_energies(&self, node: Option<NodeId>)
        -> CqedResult<IndexMap<NodeId, f64>>
    {
        let state = self.state()?;
        self.per_node(
            hamiltonian::flux_energies(&state.numeric, &self.units), node)
    }

    /// Josephson energy `Ej · Jvec[e]` of every branch, or only of `edge`.
    pub fn josephson_energies(&self, edge: Option<&Edge>)
        -> CqedResult<IndexMap<Edge, f64>>
    {
        let state = self.state()?;
        let values
            = hamiltonian::josephson_energies(&state.numeric, &self.units);
        match edge {
            Some(e) => {
                let i = self.edge_index(e)?;
                Ok([(*e, values[i])].into_iter().collect())
            },
            None => {
                Ok(self.circuit.edges().iter().copied().zip(values.iter().copied())
                    .collect())
            },
        }
    }

    /// Dressed energies of the system coupled to the resonator on
    /// `cpl_node`, given eigenvalues `E` and eigenvectors `V` (as columns).
    ///
    /// Returns `None` if no coupling node is given. See
    /// [`hamiltonian::resonator_response`].
    pub fn resonator_response(
        &self,
        E: &nd::Array1<f64>,
        V: &nd::Array2<C64>,
        nmax: usize,
        cpl_node: Option<NodeId>,
    ) -> CqedResult<Option<nd::Array2<f64>>>
    {
        self.resonator_response_at(self.state()?, E, V, nmax, cpl_node)
    }

    pub(crate) fn resonator_response_at(
        &self,
        state: &NumericState,
        E: &nd::Array1<f64>,
        V: &nd::Array2<C64>,
        nmax: usize,
        cpl_node: Option<NodeId>,
    ) -> CqedResult<Option<nd::Array2<f64>>>
    {
        let Some(node) = cpl_node else { return Ok(None); };
        let i = self.node_index(node)?;
        let res = self.circuit.resonators().get(&node)
            .ok_or_else(|| CqedError::config(
                format!("no resonator is coupled to node {node}")))?;
        let lookup = |name: &str| {
            state.params.get(name).copied()
                .ok_or_else(|| CqedError::unresolved(name))
        };
        let gc = lookup(&res.gc)?;
        let wr = lookup(&res.frl)?;
        let ops = self.op_vectors()?;
        let Q = ops.charge.get(i)
            .ok_or_else(|| CqedError::config(
                format!("no charge operator for node {node}")))?;
        let qb = state.numeric.Qb.get(i).copied().unwrap_or(0.0);
        let eye: nd::Array2<C64> = nd::Array2::eye(ops.dim);
        let op = Q + &(eye * C64::from(qb));
        hamiltonian::resonator_response(E, V, &op, gc, wr, nmax).map(Some)
    }

    /// Commutator `[P, Q]` of a node's flux and charge operators in its own
    /// (unexpanded) space.
    pub fn commutator(&self, node: NodeId) -> CqedResult<nd::Array2<C64>> {
        let mode = self.modes.get(&node)
            .ok_or_else(|| CqedError::config(
                format!("node {node} has no operator configuration")))?;
        let subs = self.full_subs()?;
        let resolved = ModeConfig {
            impedance: mode.impedance.as_ref()
                .map(|z| self.resolve_parameterisations(z)),
            ..mode.clone()
        };
        let bundle = resolved.bundle(node, &subs, &self.units)?;
        hamiltonian::commutator(&bundle.charge, &bundle.flux, &mode.basis)
    }

    pub fn diag_config(&self) -> &DiagConfig { &self.diag }

    pub fn set_diag_config(&mut self, diag: DiagConfig) { self.diag = diag; }

    /// Diagonalize a matrix with the configured solver.
    pub fn diagonalize(&self, M: &nd::Array2<C64>) -> CqedResult<Spectrum> {
        self.diag.diagonalize(M)
    }

    /// Apply the mode, diagonalizer and unit settings of a configuration.
    pub fn apply_config(&mut self, config: &SystemConfig) -> CqedResult<()> {
        self.units = config.units.clone();
        for entry in config.modes.iter() {
            self.configure_operator(entry.node, entry.truncation, entry.basis())?;
        }
        self.diag = config.diagonalizer.clone();
        self.invalidate_operators();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::circuit::{ transmon, EdgeKind, GROUND, SymbolicCircuit };

    fn charge_system() -> NumericalSystem<SymbolicCircuit> {
        let mut sys = NumericalSystem::new(transmon(1.0, 0.0, 0.0).unwrap());
        sys.configure_operator(1, 3, Basis::Charge).unwrap();
        sys.prepare_operators().unwrap();
        sys.substitute().unwrap();
        sys
    }

    fn lc_circuit() -> SymbolicCircuit {
        SymbolicCircuit::new(
            [1],
            [
                (Edge::new(GROUND, 1), EdgeKind::Capacitive),
                (Edge(GROUND, 1, 1), EdgeKind::Inductive),
            ],
        ).unwrap()
        .with_parameter("C", 2.0)
        .with_parameter("L", 0.5)
        .with_inverse_capacitance(nd::array![[Expr::sym("C").recip()]]).unwrap()
        .with_inverse_inductance(nd::array![[Expr::sym("L").recip()]]).unwrap()
        .with_branch_inverse_inductance(nd::array![
            [Expr::constant(0.0), Expr::constant(0.0)],
            [Expr::constant(0.0), Expr::sym("L").recip()],
        ]).unwrap()
    }

    #[test]
    fn unconfigured_node_is_rejected() {
        let mut sys = NumericalSystem::new(transmon(1.0, 1.0, 0.0).unwrap());
        assert!(matches!(
            sys.prepare_operators(),
            Err(CqedError::Configuration(_)),
        ));
        assert!(sys.configure_operator(7, 3, Basis::Charge).is_err());
    }

    #[test]
    fn hilbert_space_size_counts_modes() {
        let sys = charge_system();
        assert_eq!(sys.hilbert_space_size(), 7);
        assert_eq!(sys.mode(1).unwrap().dim(), 7);
    }

    #[test]
    fn free_charge_spectrum() {
        let sys = charge_system();
        let H = sys.hamiltonian().unwrap();
        let E = sys.diagonalize(&H).unwrap();
        let mut expected: Vec<f64>
            = (-3..=3).map(|i: i32| 0.5 * (i * i) as f64).collect();
        expected.sort_by(|a, b| a.total_cmp(b));
        for (e, x) in E.energies().iter().zip(expected) {
            assert_abs_diff_eq!(*e, x, epsilon = 1e-10);
        }
    }

    #[test]
    fn energies_follow_coefficients() {
        let mut sys = NumericalSystem::new(transmon(0.25, 3.0, 0.1).unwrap());
        sys.configure_operator(1, 2, Basis::Charge).unwrap();
        sys.prepare_operators().unwrap();
        sys.substitute().unwrap();
        assert_abs_diff_eq!(sys.charging_energies(Some(1)).unwrap()[&1], 2.0);
        let ej = sys.josephson_energies(None).unwrap();
        assert_abs_diff_eq!(ej[&Edge::new(GROUND, 1)], 3.0);
        assert!(sys.charging_energies(Some(4)).is_err());
    }

    #[test]
    fn parameter_updates_need_substitution() {
        let mut sys = charge_system();
        sys.set_parameter("C", 0.5).unwrap();
        assert!(sys.hamiltonian().is_err());
        sys.substitute().unwrap();
        assert_abs_diff_eq!(sys.charging_energies(None).unwrap()[&1], 1.0);
        assert!(sys.set_parameter("nope", 1.0).is_err());
        sys.set_parameters([("C", 1.0)]).unwrap();
        assert_abs_diff_eq!(sys.charging_energies(None).unwrap()[&1], 0.5);
    }

    #[test]
    fn operator_lookups() {
        let mut sys = NumericalSystem::new(lc_circuit());
        sys.configure_operator(1, 6, Basis::Oscillator).unwrap();
        sys.prepare_operators().unwrap();
        sys.substitute().unwrap();
        let edge = Edge(GROUND, 1, 1);
        assert!(sys.branch_current_operator(&edge).is_err());
        sys.branch_currents().unwrap();
        assert_eq!(sys.branch_current_operator(&edge).unwrap().shape(), &[6, 6]);
        assert!(sys.branch_current_operator(&Edge::new(1, 2)).is_err());
        sys.node_voltages().unwrap();
        assert!(sys.node_voltage_operator(1).is_ok());
        assert!(sys.node_voltage_operator(2).is_err());
    }

    #[test]
    fn oscillator_spectrum_is_harmonic() {
        let mut sys = NumericalSystem::new(lc_circuit());
        sys.configure_operator(1, 12, Basis::Oscillator).unwrap();
        sys.prepare_operators().unwrap();
        sys.substitute().unwrap();
        let H = sys.hamiltonian().unwrap();
        let E = sys.diagonalize(&H).unwrap();
        // ω = sqrt(Cinv · Linv) = 1
        for k in 0..5 {
            assert_abs_diff_eq!(E.energies()[k], k as f64 + 0.5, epsilon = 1e-8);
        }
        let comm = sys.commutator(1).unwrap();
        assert_abs_diff_eq!(comm[[3, 3]].im, 1.0, epsilon = 1e-10);
        assert_eq!(
            sys.circuit().inverse_inductance(MatrixForm::Branch).shape(),
            &[2, 2],
        );
    }

    #[test]
    fn transformation_must_match_dofs() {
        let mut sys = charge_system();
        assert!(sys.apply_transformation(nd::Array2::eye(2)).is_err());
        sys.apply_transformation(nd::array![[2.0]]).unwrap();
        sys.substitute().unwrap();
        assert_abs_diff_eq!(sys.state().unwrap().numeric.Cinv[[0, 0]], 4.0);
    }

    #[test]
    fn parameterisation_replaces_parameter() {
        let mut sys = charge_system();
        sys.add_parameterisation(
            "C", Expr::sym("Ca") + Expr::sym("Cb"), [("Ca", 0.5), ("Cb", 1.5)]);
        sys.substitute().unwrap();
        assert_abs_diff_eq!(sys.charging_energies(None).unwrap()[&1], 0.25);
        assert!(sys.rm_parameterisation("C").is_some());
        sys.substitute().unwrap();
        assert_abs_diff_eq!(sys.charging_energies(None).unwrap()[&1], 0.5);
    }
}
