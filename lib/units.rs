//! Unit-conversion prefactors.
//!
//! Every physical quantity produced by the crate is a dimensionless operator
//! or number multiplied by one of these prefactors. The defaults are all 1,
//! which corresponds to working in natural units where the circuit
//! coefficients are already energies.

use serde::{ Deserialize, Serialize };
use crate::error::{ CqedError, CqedResult };

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Units {
    /// Charging energy.
    pub ec: f64,
    /// Inductive energy.
    pub el: f64,
    /// Josephson energy.
    pub ej: f64,
    /// Charge operator in the oscillator basis.
    pub chg_osc: f64,
    /// Flux operator in the oscillator basis.
    pub flx_osc: f64,
    /// Rescaling of the oscillator flux operator to a phase, `2π/Φ0·sqrt(ħ)`.
    pub osc_phase: f64,
    /// Inductive branch current.
    pub iop_l: f64,
    /// Josephson branch current.
    pub iop_j: f64,
    /// Node voltage.
    pub vop: f64,
    /// Impedance.
    pub impe: f64,
    /// Frequency.
    pub freq: f64,
    /// Resonator charge-coupling strength.
    pub chg_osc_cpl: f64,
    /// Frequency unit of the parameters.
    pub hz: f64,
    /// Impedance unit of the parameters.
    pub ohm: f64,
    /// Capacitance unit of the parameters.
    pub farad: f64,
    /// Inductance unit of the parameters.
    pub henry: f64,
}

impl Default for Units {
    fn default() -> Self {
        Self {
            ec: 1.0,
            el: 1.0,
            ej: 1.0,
            chg_osc: 1.0,
            flx_osc: 1.0,
            osc_phase: 1.0,
            iop_l: 1.0,
            iop_j: 1.0,
            vop: 1.0,
            impe: 1.0,
            freq: 1.0,
            chg_osc_cpl: 1.0,
            hz: 1.0,
            ohm: 1.0,
            farad: 1.0,
            henry: 1.0,
        }
    }
}

impl Units {
    /// Look up a prefactor by its conventional name.
    pub fn prefactor(&self, name: &str) -> CqedResult<f64> {
        let x = match name {
            "Ec" => self.ec,
            "El" => self.el,
            "Ej" => self.ej,
            "ChgOsc" => self.chg_osc,
            "FlxOsc" => self.flx_osc,
            "OscPhase" => self.osc_phase,
            "IopL" => self.iop_l,
            "IopJ" => self.iop_j,
            "Vop" => self.vop,
            "Impe" => self.impe,
            "Freq" => self.freq,
            "ChgOscCpl" => self.chg_osc_cpl,
            "Hz" => self.hz,
            "Ohm" => self.ohm,
            "F" => self.farad,
            "H" => self.henry,
            _ => {
                return Err(CqedError::config(
                    format!("unknown unit prefactor '{name}'")));
            },
        };
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let u: Units = toml::from_str("ec = 2.5\nhz = 1e9").unwrap();
        assert_eq!(u.ec, 2.5);
        assert_eq!(u.hz, 1e9);
        assert_eq!(u.ej, 1.0);
    }

    #[test]
    fn prefactor_lookup() {
        let u = Units { vop: 3.0, ..Units::default() };
        assert_eq!(u.prefactor("Vop").unwrap(), 3.0);
        assert!(u.prefactor("Tesla").is_err());
    }
}
