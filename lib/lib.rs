#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Numerical quantization of superconducting circuits.
//!
//! A circuit is described symbolically through [`circuit::CircuitModel`]
//! (inverse capacitance and inductance matrices, Josephson energies, bias
//! vectors, all as [`expr::Expr`] trees over named parameters). A
//! [`system::NumericalSystem`] turns this into operators on a truncated
//! Hilbert space, evaluates Hamiltonians and other observables, and runs
//! parameter sweeps over them.

pub mod error;
pub mod expr;
pub mod units;
pub mod params;
pub mod circuit;
pub mod operators;
pub mod compose;
pub mod substitution;
pub mod hamiltonian;
pub mod lanczos;
pub mod diag;
pub mod sweep;
pub mod config;
pub mod system;

pub use error::{ CqedError, CqedResult };
pub use circuit::{ CircuitModel, Edge, EdgeKind, NodeId, SymbolicCircuit };
pub use operators::Basis;
pub use diag::{ DiagConfig, Spectrum };
pub use params::{ SweepAxis, SweepSpec };
pub use sweep::{ EvalEntry, EvalSpec, Evaluable, SweepOptions, SweepResults };
pub use system::NumericalSystem;
