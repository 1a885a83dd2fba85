//! Parameter sweeps.
//!
//! A sweep visits every point of a [`SweepGrid`], substitutes the point's
//! parameter values into coefficients that were pre-substituted once with
//! every fixed parameter, and runs a chain of evaluations at each point.
//! Later evaluations may consume the eigenpairs produced by earlier ones.
//! Results are either accumulated in memory or handed to a [`Spool`] one
//! point at a time.

use std::{
    fmt,
    fs,
    path::{ Path, PathBuf },
    str::FromStr,
    time::{ Duration, Instant },
};
use indexmap::IndexMap;
use log::{ debug, info, warn };
use ndarray as nd;
use ndarray_npy::NpzWriter;
use num_complex::Complex64 as C64;
use crate::{
    circuit::{ CircuitModel, NodeId },
    diag::Spectrum,
    error::{ CqedError, CqedResult },
    hamiltonian,
    params::{ SweepGrid, SweepSpec },
    substitution::NumericState,
    system::NumericalSystem,
};

/// Quantities that can be computed at a sweep point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Evaluable {
    Hamiltonian,
    BranchCurrents,
    NodeVoltages,
    ChargingEnergies,
    FluxEnergies,
    JosephsonEnergies,
    ResonatorResponse,
}

impl Evaluable {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hamiltonian => "hamiltonian",
            Self::BranchCurrents => "branch_currents",
            Self::NodeVoltages => "node_voltages",
            Self::ChargingEnergies => "charging_energies",
            Self::FluxEnergies => "flux_energies",
            Self::JosephsonEnergies => "josephson_energies",
            Self::ResonatorResponse => "resonator_response",
        }
    }

    /// Whether the evaluable consumes the eigenpairs of another entry.
    pub fn takes_spectrum(&self) -> bool {
        matches!(self, Self::ResonatorResponse)
    }

    /// Whether the evaluable produces a single matrix that can be
    /// diagonalized.
    pub fn yields_matrix(&self) -> bool {
        matches!(self, Self::Hamiltonian)
    }
}

impl fmt::Display for Evaluable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Evaluable {
    type Err = CqedError;

    fn from_str(s: &str) -> CqedResult<Self> {
        match s {
            "hamiltonian" => Ok(Self::Hamiltonian),
            "branch_currents" => Ok(Self::BranchCurrents),
            "node_voltages" => Ok(Self::NodeVoltages),
            "charging_energies" => Ok(Self::ChargingEnergies),
            "flux_energies" => Ok(Self::FluxEnergies),
            "josephson_energies" => Ok(Self::JosephsonEnergies),
            "resonator_response" => Ok(Self::ResonatorResponse),
            _ => Err(CqedError::config(
                format!("unknown evaluable '{s}'"))),
        }
    }
}

/// Extra arguments passed to an evaluable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EvalKwargs {
    /// Highest excitation number of the resonator response.
    pub nmax: usize,
    /// Node the resonator is coupled to.
    pub cpl_node: Option<NodeId>,
}

impl Default for EvalKwargs {
    fn default() -> Self { Self { nmax: 100, cpl_node: None } }
}

/// One step of an evaluation chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EvalEntry {
    pub eval: Evaluable,
    /// Pass the result through the diagonalizer.
    pub diag: bool,
    /// Earlier entry whose eigenpairs this entry consumes.
    pub depends: Option<Evaluable>,
    pub kwargs: EvalKwargs,
}

impl EvalEntry {
    pub fn new(eval: Evaluable, diag: bool) -> Self {
        Self { eval, diag, depends: None, kwargs: EvalKwargs::default() }
    }

    pub fn depends_on(mut self, depends: Evaluable) -> Self {
        self.depends = Some(depends);
        self
    }

    pub fn with_kwargs(mut self, kwargs: EvalKwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Build an entry from evaluable names.
    pub fn parse(eval: &str, diag: bool, depends: Option<&str>)
        -> CqedResult<Self>
    {
        let entry = Self::new(eval.parse()?, diag);
        match depends {
            Some(dep) => Ok(entry.depends_on(dep.parse()?)),
            None => Ok(entry),
        }
    }
}

/// Validated, ordered evaluation chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalSpec {
    entries: Vec<EvalEntry>,
}

impl Default for EvalSpec {
    fn default() -> Self {
        Self { entries: vec![EvalEntry::new(Evaluable::Hamiltonian, true)] }
    }
}

impl EvalSpec {
    /// Check that every dependency names an earlier, diagonalized entry and
    /// that evaluables are only diagonalized or fed eigenpairs where that makes
    /// sense.
    pub fn new<I>(entries: I) -> CqedResult<Self>
    where I: IntoIterator<Item = EvalEntry>
    {
        let entries: Vec<EvalEntry> = entries.into_iter().collect();
        if entries.is_empty() {
            return Err(CqedError::config("evaluation chain is empty"));
        }
        for (k, entry) in entries.iter().enumerate() {
            if entries[..k].iter().any(|e| e.eval == entry.eval) {
                return Err(CqedError::config(format!(
                    "evaluable '{}' appears more than once", entry.eval)));
            }
            if entry.diag && !entry.eval.yields_matrix() {
                return Err(CqedError::config(format!(
                    "evaluable '{}' does not produce a matrix to diagonalize",
                    entry.eval,
                )));
            }
            match entry.depends {
                Some(dep) => {
                    let source = entries[..k].iter().find(|e| e.eval == dep)
                        .ok_or_else(|| CqedError::DependencyOrder {
                            entry: entry.eval.to_string(),
                            depends: dep.to_string(),
                        })?;
                    if !source.diag {
                        return Err(CqedError::config(format!(
                            "'{}' depends on '{}', which is not diagonalized",
                            entry.eval, dep,
                        )));
                    }
                    if !entry.eval.takes_spectrum() {
                        return Err(CqedError::config(format!(
                            "evaluable '{}' does not take eigenpairs",
                            entry.eval,
                        )));
                    }
                },
                None if entry.eval.takes_spectrum() => {
                    return Err(CqedError::config(format!(
                        "evaluable '{}' needs a dependency supplying \
                        eigenpairs",
                        entry.eval,
                    )));
                },
                None => { },
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[EvalEntry] { &self.entries }
}

/// Result of one evaluation at one point.
#[derive(Clone, Debug, PartialEq)]
pub enum EvalOutput {
    Matrix(nd::Array2<C64>),
    /// One operator per branch or node, in circuit order.
    Operators(Vec<nd::Array2<C64>>),
    Values(nd::Array1<f64>),
    Spectrum(Spectrum),
    /// `None` when no coupling node was given.
    Response(Option<nd::Array2<f64>>),
}

/// Every evaluation at one point.
pub type PointResult = IndexMap<Evaluable, EvalOutput>;

/// Opaque reference to a spooled point.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpoolHandle(pub PathBuf);

/// Out-of-core storage of sweep results.
pub trait Spool {
    fn write_point(&mut self, index: usize, result: &PointResult)
        -> CqedResult<SpoolHandle>;
}

/// Writes each point to `<dir>/point_<index>.npz`.
///
/// Matrices and value arrays are stored under the evaluable's name;
/// operator lists as `<name>_<k>`; spectra as `<name>_energies` and, when
/// present, `<name>_states`.
#[derive(Clone, Debug)]
pub struct NpzSpool {
    dir: PathBuf,
}

impl NpzSpool {
    pub fn new<P>(dir: P) -> CqedResult<Self>
    where P: AsRef<Path>
    {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf() })
    }

    pub fn dir(&self) -> &Path { &self.dir }
}

impl Spool for NpzSpool {
    fn write_point(&mut self, index: usize, result: &PointResult)
        -> CqedResult<SpoolHandle>
    {
        let path = self.dir.join(format!("point_{index}.npz"));
        let mut npz = NpzWriter::new(fs::File::create(&path)?);
        for (eval, output) in result.iter() {
            let name = eval.name();
            match output {
                EvalOutput::Matrix(M) => { npz.add_array(name, M)?; },
                EvalOutput::Operators(ops) => {
                    for (k, O) in ops.iter().enumerate() {
                        npz.add_array(format!("{name}_{k}"), O)?;
                    }
                },
                EvalOutput::Values(x) => { npz.add_array(name, x)?; },
                EvalOutput::Spectrum(Spectrum::Values(E)) => {
                    npz.add_array(format!("{name}_energies"), E)?;
                },
                EvalOutput::Spectrum(Spectrum::Pairs(E, V)) => {
                    npz.add_array(format!("{name}_energies"), E)?;
                    npz.add_array(format!("{name}_states"), V)?;
                },
                EvalOutput::Response(Some(R)) => { npz.add_array(name, R)?; },
                EvalOutput::Response(None) => { },
            }
        }
        npz.finish()?;
        debug!("spooled sweep point {index} to {}", path.display());
        Ok(SpoolHandle(path))
    }
}

/// Where the results of a sweep ended up.
#[derive(Clone, Debug, PartialEq)]
pub enum SweepData {
    /// One output per point for every evaluable.
    InMemory(IndexMap<Evaluable, Vec<EvalOutput>>),
    /// One handle per point.
    Spooled(Vec<SpoolHandle>),
}

/// Wall-clock durations of a sweep.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepTiming {
    pub setup: Duration,
    pub sweep_loop: Duration,
    pub per_point: Duration,
}

/// Results of [`NumericalSystem::param_sweep`].
#[derive(Clone, Debug, PartialEq)]
pub struct SweepResults {
    pub grid: SweepGrid,
    pub data: SweepData,
    pub timing: Option<SweepTiming>,
}

impl SweepResults {
    /// Number of points.
    pub fn len(&self) -> usize { self.grid.len() }

    pub fn is_empty(&self) -> bool { self.grid.is_empty() }

    /// In-memory outputs of an evaluable, one per point.
    pub fn outputs(&self, eval: Evaluable) -> Option<&[EvalOutput]> {
        match &self.data {
            SweepData::InMemory(map) => map.get(&eval).map(|v| v.as_slice()),
            SweepData::Spooled(_) => None,
        }
    }

    /// Spool handles, one per point.
    pub fn handles(&self) -> Option<&[SpoolHandle]> {
        match &self.data {
            SweepData::InMemory(_) => None,
            SweepData::Spooled(h) => Some(h.as_slice()),
        }
    }

    fn require_outputs(&self, eval: Evaluable) -> CqedResult<&[EvalOutput]> {
        match &self.data {
            SweepData::Spooled(_) => Err(CqedError::config(
                "results were spooled; read them from their handles")),
            SweepData::InMemory(map) => {
                map.get(&eval).map(|v| v.as_slice())
                    .ok_or_else(|| CqedError::config(
                        format!("evaluable '{eval}' was not evaluated")))
            },
        }
    }

    /// Energies or values of an evaluable stacked into a `(points, levels)`
    /// array.
    pub fn energies(&self, eval: Evaluable) -> CqedResult<nd::Array2<f64>> {
        let outputs = self.require_outputs(eval)?;
        let rows: Vec<nd::ArrayView1<f64>>
            = outputs.iter()
            .map(|out| match out {
                EvalOutput::Spectrum(spec) => Ok(spec.energies().view()),
                EvalOutput::Values(x) => Ok(x.view()),
                _ => Err(CqedError::incompatible(format!(
                    "outputs of '{eval}' are not energies"))),
            })
            .collect::<CqedResult<_>>()?;
        Ok(nd::stack(nd::Axis(0), &rows)?)
    }

    /// Outputs at the points where every parameter in `static_vars` takes the
    /// given value, ordered along `ind_var`. Returns the values of `ind_var`
    /// alongside.
    pub fn slice(
        &self,
        ind_var: &str,
        static_vars: &IndexMap<String, f64>,
        eval: Evaluable,
    ) -> CqedResult<(Vec<f64>, Vec<&EvalOutput>)>
    {
        let outputs = self.require_outputs(eval)?;
        let indices = self.grid.select(ind_var, static_vars)?;
        let axis = self.grid.values(ind_var)
            .ok_or_else(|| CqedError::config(
                format!("'{ind_var}' is not a swept parameter")))?;
        let x: Vec<f64> = indices.iter().map(|&i| axis[i]).collect();
        let y: Vec<&EvalOutput> = indices.iter().map(|&i| &outputs[i]).collect();
        Ok((x, y))
    }
}

/// Options for [`NumericalSystem::param_sweep`].
#[derive(Default)]
pub struct SweepOptions<'s> {
    /// Record and report durations.
    pub timing: bool,
    /// Write each point out instead of keeping it in memory.
    pub spool: Option<&'s mut dyn Spool>,
}

impl<C> NumericalSystem<C>
where C: CircuitModel
{
    /// Compute one evaluable from the coefficients at a point.
    pub fn evaluate(
        &self,
        state: &NumericState,
        entry: &EvalEntry,
        dep: Option<(&nd::Array1<f64>, &nd::Array2<C64>)>,
    ) -> CqedResult<EvalOutput>
    {
        let units = self.units();
        match entry.eval {
            Evaluable::Hamiltonian => {
                self.hamiltonian_at(state).map(EvalOutput::Matrix)
            },
            Evaluable::BranchCurrents => {
                let ops = self.branch_currents_at(state)?;
                Ok(EvalOutput::Operators(ops.into_values().collect()))
            },
            Evaluable::NodeVoltages => {
                let ops = self.node_voltages_at(state)?;
                Ok(EvalOutput::Operators(ops.into_values().collect()))
            },
            Evaluable::ChargingEnergies => Ok(EvalOutput::Values(
                hamiltonian::charging_energies(&state.numeric, units))),
            Evaluable::FluxEnergies => Ok(EvalOutput::Values(
                hamiltonian::flux_energies(&state.numeric, units))),
            Evaluable::JosephsonEnergies => Ok(EvalOutput::Values(
                hamiltonian::josephson_energies(&state.numeric, units))),
            Evaluable::ResonatorResponse => {
                let (E, V) = dep.ok_or_else(|| CqedError::incompatible(
                    "resonator response needs eigenvalues and eigenvectors"))?;
                let kw = &entry.kwargs;
                self.resonator_response_at(state, E, V, kw.nmax, kw.cpl_node)
                    .map(EvalOutput::Response)
            },
        }
    }

    /// Run an evaluation chain at a point.
    pub fn evaluate_point(&self, state: &NumericState, spec: &EvalSpec)
        -> CqedResult<PointResult>
    {
        let mut results = PointResult::new();
        for entry in spec.entries() {
            let dep = match entry.depends {
                None => None,
                Some(d) => match results.get(&d) {
                    Some(EvalOutput::Spectrum(Spectrum::Pairs(E, V))) => {
                        Some((E, V))
                    },
                    Some(_) => {
                        return Err(CqedError::incompatible(format!(
                            "'{}' needs the eigenvectors of '{d}'; enable \
                            get_vectors in the diagonalizer configuration",
                            entry.eval,
                        )));
                    },
                    None => {
                        return Err(CqedError::DependencyOrder {
                            entry: entry.eval.to_string(),
                            depends: d.to_string(),
                        });
                    },
                },
            };
            let output = match self.evaluate(state, entry, dep)? {
                EvalOutput::Matrix(M) if entry.diag => {
                    EvalOutput::Spectrum(self.diagonalize(&M)?)
                },
                _ if entry.diag => {
                    return Err(CqedError::incompatible(format!(
                        "cannot diagonalize the output of '{}'", entry.eval)));
                },
                out => out,
            };
            results.insert(entry.eval, output);
        }
        Ok(results)
    }

    fn warn_on_swept_impedances(&self, swept: &[String]) {
        for &node in self.node_list() {
            let Some(mode) = self.mode(node) else { continue; };
            let Some(Z) = mode.impedance.as_ref() else { continue; };
            if Z.symbols().iter().any(|s| swept.contains(s)) {
                warn!(
                    "impedance of the oscillator mode on node {node} depends \
                    on a swept parameter; its operators keep the values they \
                    were prepared with"
                );
            }
        }
    }

    /// Evaluate `evals` at every point of `sweep`.
    ///
    /// Fixed parameters are substituted once before the loop; each point then
    /// only evaluates the cached expressions. The parameter store is not
    /// modified. Any error aborts the sweep. When spooling, the error is a
    /// [`CqedError::SweepAborted`] carrying the handles of the points already
    /// written.
    pub fn param_sweep(
        &self,
        sweep: &SweepSpec,
        evals: &EvalSpec,
        mut opts: SweepOptions<'_>,
    ) -> CqedResult<SweepResults>
    {
        let t0 = Instant::now();
        let grid = sweep.expand(self.parameters())?;
        self.op_vectors()?;
        self.warn_on_swept_impedances(grid.names());
        let cache = self.substitution_cache(grid.names())?;
        info!(
            "sweeping {} points over {:?} ({} evaluables)",
            grid.len(), grid.names(), evals.entries().len(),
        );

        let t1 = Instant::now();
        let mut outputs: IndexMap<Evaluable, Vec<EvalOutput>>
            = evals.entries().iter()
            .map(|e| (e.eval, Vec::with_capacity(grid.len())))
            .collect();
        let mut handles: Vec<SpoolHandle> = Vec::new();
        for (k, point) in grid.iter().enumerate() {
            debug!("sweep point {k}: {point:?}");
            let result
                = cache.resolve(&point, self.circuit().resonators(), self.units())
                .and_then(|state| self.evaluate_point(&state, evals));
            let step = match (result, opts.spool.as_mut()) {
                (Ok(result), Some(spool)) => {
                    spool.write_point(k, &result).map(|h| handles.push(h))
                },
                (Ok(result), None) => {
                    for (eval, out) in result.into_iter() {
                        outputs.entry(eval).or_default().push(out);
                    }
                    Ok(())
                },
                (Err(err), _) => Err(err),
            };
            if let Err(err) = step {
                if opts.spool.is_none() { return Err(err); }
                warn!(
                    "sweep aborted at point {k}; {} points remain spooled",
                    handles.len(),
                );
                return Err(CqedError::SweepAborted {
                    index: k,
                    handles,
                    source: Box::new(err),
                });
            }
        }
        let t2 = Instant::now();

        let timing = opts.timing.then(|| {
            let sweep_loop = t2 - t1;
            let timing = SweepTiming {
                setup: t1 - t0,
                sweep_loop,
                per_point: sweep_loop / grid.len().max(1) as u32,
            };
            info!(
                "parameter sweep duration: initialization {:.3} s, loop {:.3} \
                s, average iteration {:.3} s",
                timing.setup.as_secs_f64(),
                timing.sweep_loop.as_secs_f64(),
                timing.per_point.as_secs_f64(),
            );
            timing
        });
        let data
            = if opts.spool.is_some() {
                SweepData::Spooled(handles)
            } else {
                SweepData::InMemory(outputs)
            };
        info!("sweep finished");
        Ok(SweepResults { grid, data, timing })
    }

    /// Diagonalize the Hamiltonian at every point of `sweep` and call `f` with
    /// the point and its spectrum.
    ///
    /// Returns the spectra together with the values returned by `f`.
    pub fn param_sweep_func<F, T>(&self, sweep: &SweepSpec, mut f: F)
        -> CqedResult<(Vec<Spectrum>, Vec<T>)>
    where F: FnMut(&IndexMap<String, f64>, &Spectrum) -> T
    {
        let grid = sweep.expand(self.parameters())?;
        self.op_vectors()?;
        self.warn_on_swept_impedances(grid.names());
        let cache = self.substitution_cache(grid.names())?;
        info!("sweeping {} points over {:?}", grid.len(), grid.names());
        let mut spectra: Vec<Spectrum> = Vec::with_capacity(grid.len());
        let mut values: Vec<T> = Vec::with_capacity(grid.len());
        for point in grid.iter() {
            let state
                = cache.resolve(&point, self.circuit().resonators(), self.units())?;
            let spec = self.diagonalize(&self.hamiltonian_at(&state)?)?;
            values.push(f(&point, &spec));
            spectra.push(spec);
        }
        Ok((spectra, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluable_names_round_trip() {
        for eval in [
            Evaluable::Hamiltonian,
            Evaluable::BranchCurrents,
            Evaluable::ResonatorResponse,
        ] {
            assert_eq!(eval.name().parse::<Evaluable>().unwrap(), eval);
        }
        assert!(matches!(
            "getHamiltonian".parse::<Evaluable>(),
            Err(CqedError::Configuration(_)),
        ));
    }

    #[test]
    fn dependency_must_come_first() {
        let res = EvalSpec::new([
            EvalEntry::new(Evaluable::ResonatorResponse, false)
                .depends_on(Evaluable::Hamiltonian),
            EvalEntry::new(Evaluable::Hamiltonian, true),
        ]);
        match res {
            Err(CqedError::DependencyOrder { entry, depends }) => {
                assert_eq!(entry, "resonator_response");
                assert_eq!(depends, "hamiltonian");
            },
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn chain_rules() {
        assert!(EvalSpec::new(Vec::new()).is_err());
        // diagonalizing a list of operators
        assert!(EvalSpec::new([EvalEntry::new(Evaluable::BranchCurrents, true)])
            .is_err());
        // dependency on a raw matrix
        assert!(EvalSpec::new([
            EvalEntry::new(Evaluable::Hamiltonian, false),
            EvalEntry::new(Evaluable::ResonatorResponse, false)
                .depends_on(Evaluable::Hamiltonian),
        ]).is_err());
        // response without eigenpairs
        assert!(EvalSpec::new([
            EvalEntry::new(Evaluable::ResonatorResponse, false),
        ]).is_err());
        let ok = EvalSpec::new([
            EvalEntry::parse("hamiltonian", true, None).unwrap(),
            EvalEntry::parse("resonator_response", false, Some("hamiltonian"))
                .unwrap(),
        ]).unwrap();
        assert_eq!(ok.entries().len(), 2);
        assert_eq!(EvalSpec::default().entries()[0].eval, Evaluable::Hamiltonian);
    }
}
