//! Crate-wide error type.

use thiserror::Error;
use crate::sweep::SpoolHandle;

#[derive(Debug, Error)]
pub enum CqedError {
    /// Invalid mode, operator, transformation, or sweep configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A symbol had no value in the substitution mapping, or an expression
    /// evaluated to something non-finite.
    #[error("substitution error for '{symbol}': {detail}")]
    Substitution { symbol: String, detail: String },

    #[error("dependency order error: '{entry}' depends on '{depends}', which is not evaluated before it")]
    DependencyOrder { entry: String, depends: String },

    #[error("incompatible operands: {0}")]
    IncompatibleOperand(String),

    /// The sparse eigensolver could not find the requested eigenpairs.
    #[error("eigensolver error: {0}")]
    Eigensolver(String),

    /// A spooled sweep stopped at point `index`. The points written before it
    /// are still available through `handles`.
    #[error("sweep aborted at point {index} after spooling {} points: {source}", .handles.len())]
    SweepAborted {
        index: usize,
        handles: Vec<SpoolHandle>,
        source: Box<CqedError>,
    },

    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("npz write error: {0}")]
    Npz(#[from] ndarray_npy::WriteNpzError),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type CqedResult<T> = Result<T, CqedError>;

impl CqedError {
    pub(crate) fn config<S>(msg: S) -> Self
    where S: Into<String>
    {
        Self::Configuration(msg.into())
    }

    pub(crate) fn unresolved<S>(symbol: S) -> Self
    where S: Into<String>
    {
        Self::Substitution {
            symbol: symbol.into(),
            detail: "no value in the substitution mapping".into(),
        }
    }

    pub(crate) fn non_finite<S>(what: S, value: f64) -> Self
    where S: Into<String>
    {
        Self::Substitution {
            symbol: what.into(),
            detail: format!("evaluated to non-finite value {value}"),
        }
    }

    pub(crate) fn incompatible<S>(msg: S) -> Self
    where S: Into<String>
    {
        Self::IncompatibleOperand(msg.into())
    }
}

