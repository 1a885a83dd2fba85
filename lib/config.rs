//! TOML system configuration.
//!
//! ```toml
//! [[mode]]
//! node = 1
//! truncation = 10
//! basis = "charge"
//!
//! [[mode]]
//! node = 2
//! truncation = 30
//! basis = "oscillator"
//!
//! [diagonalizer]
//! eigvalues = 6
//! get_vectors = true
//!
//! [units]
//! ec = 0.5
//! ```

use std::{ fs, path::Path };
use serde::{ Deserialize, Serialize };
use crate::{
    circuit::NodeId,
    diag::DiagConfig,
    error::CqedResult,
    operators::{ Basis, DEFAULT_FLUX_MAX },
    units::Units,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasisKind {
    Charge,
    Flux,
    Oscillator,
}

/// Basis and truncation of one node's mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeEntry {
    pub node: NodeId,
    pub truncation: usize,
    pub basis: BasisKind,
    /// Half-width of the flux grid; flux basis only.
    #[serde(default)]
    pub flux_max: Option<f64>,
}

impl ModeEntry {
    pub fn basis(&self) -> Basis {
        match self.basis {
            BasisKind::Charge => Basis::Charge,
            BasisKind::Flux => Basis::Flux {
                flux_max: self.flux_max.unwrap_or(DEFAULT_FLUX_MAX),
            },
            BasisKind::Oscillator => Basis::Oscillator,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default, rename = "mode")]
    pub modes: Vec<ModeEntry>,
    #[serde(default)]
    pub diagonalizer: DiagConfig,
    #[serde(default)]
    pub units: Units,
}

impl SystemConfig {
    pub fn from_toml_str(s: &str) -> CqedResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file<P>(path: P) -> CqedResult<Self>
    where P: AsRef<Path>
    {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ diag::Which, error::CqedError };

    #[test]
    fn parses_full_document() {
        let s = r#"
            [[mode]]
            node = 1
            truncation = 10
            basis = "charge"

            [[mode]]
            node = 2
            truncation = 8
            basis = "flux"
            flux_max = 2.5

            [diagonalizer]
            eigvalues = 6
            get_vectors = true
            sparse = true

            [diagonalizer.sparse_opts]
            which = "LM"
            tol = 1e-8

            [units]
            ec = 0.5
        "#;
        let config = SystemConfig::from_toml_str(s).unwrap();
        assert_eq!(config.modes.len(), 2);
        assert_eq!(config.modes[0].basis(), Basis::Charge);
        assert_eq!(config.modes[1].basis(), Basis::Flux { flux_max: 2.5 });
        assert_eq!(config.diagonalizer.eigvalues, 6);
        assert!(config.diagonalizer.get_vectors);
        assert_eq!(config.diagonalizer.sparse_opts.which, Which::LM);
        assert_eq!(config.diagonalizer.sparse_opts.sigma, None);
        assert_eq!(config.units.ec, 0.5);
        assert_eq!(config.units.ej, 1.0);
    }

    #[test]
    fn defaults_and_errors() {
        let config = SystemConfig::from_toml_str("").unwrap();
        assert!(config.modes.is_empty());
        assert_eq!(config.diagonalizer, DiagConfig::default());
        let flux = ModeEntry {
            node: 1,
            truncation: 4,
            basis: BasisKind::Flux,
            flux_max: None,
        };
        assert_eq!(flux.basis(), Basis::Flux { flux_max: DEFAULT_FLUX_MAX });
        assert!(matches!(
            SystemConfig::from_toml_str("[[mode]]\nnode = 1\nbasis = \"qubit\""),
            Err(CqedError::Toml(_)),
        ));
    }
}
