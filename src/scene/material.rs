//! Absorption spectra of reflecting and diffracting surfaces.
//!
//! Spectra cover the eight octave bands from 63 Hz to 8 kHz, see
//! [`OCTAVE_BANDS`](crate::power::OCTAVE_BANDS).

/// Fraction of incident energy absorbed by a surface, per octave band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMaterial {
    /// Absorption coefficient per band (0.0 - 1.0)
    ///
    /// 0.0 = perfectly reflecting, 1.0 = fully absorbing
    pub absorption: [f64; 8],
}

impl SurfaceMaterial {
    /// Default facade absorption
    pub const GENERIC: Self = Self::uniform(0.1);

    /// Perfectly reflecting surface
    pub const RIGID: Self = Self::uniform(0.0);

    pub const fn uniform(alpha: f64) -> Self {
        Self {
            absorption: [alpha; 8],
        }
    }

    /// Validates that every coefficient is within [0.0, 1.0]
    pub fn validate(&self) -> Result<(), &'static str> {
        for &val in &self.absorption {
            if !(0.0..=1.0).contains(&val) {
                return Err("Absorption values must be between 0.0 and 1.0");
            }
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.absorption.to_vec()
    }
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self::GENERIC
    }
}
