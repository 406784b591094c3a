//! Power and level conversions

/// Octave band centre frequencies, in Hz.
pub const OCTAVE_BANDS: [f64; 8] = [63.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0];

/// Speed of sound used for band wavelengths, in m/s.
pub const SOUND_SPEED: f64 = 340.0;

pub fn db_to_w(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

pub fn w_to_db(w: f64) -> f64 {
    10.0 * w.log10()
}

/// Free-field geometric divergence attenuation at `distance` meters.
pub fn a_div(distance: f64) -> f64 {
    20.0 * distance.log10() + 11.0
}

/// Wavelength of each octave band.
pub fn wavelengths() -> impl Iterator<Item = f64> {
    OCTAVE_BANDS.iter().map(|f| SOUND_SPEED / f)
}
