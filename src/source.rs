//! Source Kernel: waveforms and the four source kinds that inject current
//! into the grid at scheduled points in the step, per `spec.md` §4.4 / §9.
//!
//! `Waveform`'s tagged-variant dispatch and `Source`'s
//! `electric_current_density`/`magnetic_current_density` split are grounded
//! on `GaussianPulse`/`ContinousWave` and the `Source` trait in
//! `src/app/solver/fdtd/legacy/source.rs`, generalised to all eight waveform
//! kinds and four source kinds `spec.md` names.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::CoreError,
    grid::{
        Axis,
        Grid,
    },
    material::{
        Catalogue,
        Material,
        MaterialId,
    },
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Waveform {
    Gaussian { amplitude: f64, frequency: f64 },
    GaussianDot { amplitude: f64, frequency: f64 },
    GaussianDotDot { amplitude: f64, frequency: f64 },
    Ricker { amplitude: f64, frequency: f64 },
    Sine { amplitude: f64, frequency: f64 },
    ContSine { amplitude: f64, frequency: f64 },
    Impulse { amplitude: f64 },
    User { samples: Vec<f64>, dt: f64 },
}

impl Waveform {
    /// The time shift applied to Gaussian-family waveforms so they start
    /// essentially at zero (a standard `chi = 1/zeta` centring), expressed
    /// in periods of `frequency`.
    const GAUSSIAN_CHI_PERIODS: f64 = 4.0 / 3.0;

    pub fn evaluate(&self, t: f64) -> f64 {
        match self {
            Waveform::Gaussian { amplitude, frequency } => {
                let (time, zeta) = Self::gaussian_params(*frequency, t);
                amplitude * (-zeta * time * time).exp()
            }
            Waveform::GaussianDot { amplitude, frequency } => {
                let (time, zeta) = Self::gaussian_params(*frequency, t);
                -2.0 * zeta * time * amplitude * (-zeta * time * time).exp()
            }
            Waveform::GaussianDotDot { amplitude, frequency } => {
                let (time, zeta) = Self::gaussian_params(*frequency, t);
                2.0 * zeta * amplitude * (1.0 - 2.0 * zeta * time * time) * (-zeta * time * time).exp()
            }
            Waveform::Ricker { amplitude, frequency } => {
                let (time, zeta) = Self::gaussian_params(*frequency, t);
                let arg = zeta * time * time;
                amplitude * (1.0 - 2.0 * arg) * (-arg).exp()
            }
            Waveform::Sine { amplitude, frequency } => {
                let period = 1.0 / frequency;
                if t <= period {
                    amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()
                }
                else {
                    0.0
                }
            }
            Waveform::ContSine { amplitude, frequency } => {
                amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()
            }
            Waveform::Impulse { amplitude } => {
                if t == 0.0 {
                    *amplitude
                }
                else {
                    0.0
                }
            }
            Waveform::User { samples, dt } => {
                let index = (t / dt).round() as isize;
                if index < 0 || index as usize >= samples.len() {
                    0.0
                }
                else {
                    samples[index as usize]
                }
            }
        }
    }

    fn gaussian_params(frequency: f64, t: f64) -> (f64, f64) {
        let chi = Self::GAUSSIAN_CHI_PERIODS / frequency;
        let zeta = (std::f64::consts::PI * frequency).powi(2);
        (t - chi, zeta)
    }

    /// Whether a closed-form maximum-frequency estimate exists for
    /// `dispersion_check` (`spec.md` §4.6); only `Sine`/`ContSine` admit one
    /// without an FFT.
    pub fn max_frequency_estimate(&self) -> Option<f64> {
        match self {
            Waveform::Sine { frequency, .. } | Waveform::ContSine { frequency, .. } => {
                Some(4.0 * frequency)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellPosition {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

#[derive(Clone, Debug)]
pub struct VoltageSource {
    pub position: CellPosition,
    pub polarisation: Axis,
    pub waveform: Waveform,
    pub resistance: f64,
    pub material: MaterialId,
    pub start: f64,
    pub stop: f64,
}

#[derive(Clone, Debug)]
pub struct HertzianDipole {
    pub position: CellPosition,
    pub polarisation: Axis,
    pub waveform: Waveform,
    pub start: f64,
    pub stop: f64,
}

#[derive(Clone, Debug)]
pub struct MagneticDipole {
    pub position: CellPosition,
    pub polarisation: Axis,
    pub waveform: Waveform,
    pub start: f64,
    pub stop: f64,
}

/// A one-dimensional auxiliary transmission line coupled to a single E-cell.
#[derive(Clone, Debug)]
pub struct TransmissionLine {
    pub position: CellPosition,
    pub polarisation: Axis,
    pub waveform: Waveform,
    pub resistance: f64,
    pub characteristic_impedance: f64,
    pub n_cells: usize,
    pub start: f64,
    pub stop: f64,
    voltage: Vec<f64>,
    current: Vec<f64>,
}

impl TransmissionLine {
    pub fn new(
        position: CellPosition,
        polarisation: Axis,
        waveform: Waveform,
        resistance: f64,
        characteristic_impedance: f64,
        n_cells: usize,
        start: f64,
        stop: f64,
    ) -> Self {
        Self {
            position,
            polarisation,
            waveform,
            resistance,
            characteristic_impedance,
            n_cells,
            start,
            stop,
            voltage: vec![0.0; n_cells],
            current: vec![0.0; n_cells.saturating_sub(1).max(1)],
        }
    }

    fn step(&mut self, dt: f64, t: f64) -> f64 {
        if t < self.start || t > self.stop {
            return 0.0;
        }
        let source_voltage = self.waveform.evaluate(t);
        let dx = 1.0;
        let l = self.characteristic_impedance * dx;
        let c = dx / self.characteristic_impedance;

        for n in 0..self.current.len() {
            self.current[n] -= dt / l * (self.voltage[n + 1] - self.voltage[n]);
        }
        for n in 1..self.voltage.len() - 1 {
            self.voltage[n] -= dt / c * (self.current[n] - self.current[n - 1]);
        }
        self.voltage[0] = source_voltage - self.current[0] * self.resistance;
        self.voltage[self.voltage.len() - 1]
    }
}

/// Tagged dispatch over the four source kinds, per `spec.md` §9.
#[derive(Clone, Debug)]
pub enum Source {
    Voltage(VoltageSource),
    Hertzian(HertzianDipole),
    Magnetic(MagneticDipole),
    TransmissionLine(TransmissionLine),
}

impl Source {
    pub fn displace(&mut self, step: (i64, i64, i64)) {
        let apply = |pos: &mut CellPosition| {
            pos.i = (pos.i as i64 + step.0).max(0) as usize;
            pos.j = (pos.j as i64 + step.1).max(0) as usize;
            pos.k = (pos.k as i64 + step.2).max(0) as usize;
        };
        match self {
            Source::Voltage(s) => apply(&mut s.position),
            Source::Hertzian(s) => apply(&mut s.position),
            Source::Magnetic(s) => apply(&mut s.position),
            Source::TransmissionLine(s) => apply(&mut s.position),
        }
    }

    fn active(&self, t: f64) -> bool {
        let (start, stop) = match self {
            Source::Voltage(s) => (s.start, s.stop),
            Source::Hertzian(s) => (s.start, s.stop),
            Source::Magnetic(s) => (s.start, s.stop),
            Source::TransmissionLine(s) => (s.start, s.stop),
        };
        t >= start && t <= stop
    }

    /// Applies a voltage source or Hertzian dipole's E contribution, per
    /// `spec.md` §4.4. Must run after the interior E-update (pass A) and
    /// PML correction, before pass B.
    pub fn apply_electric(&mut self, grid: &mut Grid, catalogue: &Catalogue, t: f64) {
        if !self.active(t) {
            return;
        }
        match self {
            Source::Voltage(source) => {
                let material = catalogue.get(source.material);
                let d_alpha = grid.resolution.spatial(source.polarisation);
                let value = -material.srce * source.waveform.evaluate(t) / d_alpha;
                add_to_field(grid, source.polarisation, source.position, value);
            }
            Source::Hertzian(source) => {
                let id_array = grid.ids.e_id(source.polarisation);
                let material_id = id_array.get(source.position.i, source.position.j, source.position.k);
                let material = catalogue.get(material_id);
                let (beta, gamma) = source.polarisation.transverse();
                let d_beta = grid.resolution.spatial(beta);
                let d_gamma = grid.resolution.spatial(gamma);
                let value = -material.srce * source.waveform.evaluate(t) / (d_beta * d_gamma);
                add_to_field(grid, source.polarisation, source.position, value);
            }
            _ => {}
        }
    }

    /// Applies a magnetic dipole or transmission-line H contribution, per
    /// `spec.md` §4.4. Must run after the interior H-update and PML
    /// correction.
    pub fn apply_magnetic(&mut self, grid: &mut Grid, catalogue: &Catalogue, t: f64, dt: f64) {
        if !self.active(t) {
            return;
        }
        match self {
            Source::Magnetic(source) => {
                let id_array = grid.ids.h_id(source.polarisation);
                let material_id = id_array.get(source.position.i, source.position.j, source.position.k);
                let material = catalogue.get(material_id);
                let (beta, gamma) = source.polarisation.transverse();
                let d_beta = grid.resolution.spatial(beta);
                let d_gamma = grid.resolution.spatial(gamma);
                let value = -material.srcm * source.waveform.evaluate(t) / (d_beta * d_gamma);
                add_to_field_h(grid, source.polarisation, source.position, value);
            }
            Source::TransmissionLine(source) => {
                let coupled = source.step(dt, t);
                add_to_field_h(grid, source.polarisation, source.position, coupled);
            }
            _ => {}
        }
    }
}

fn add_to_field(grid: &mut Grid, axis: Axis, position: CellPosition, value: f64) {
    grid.fields
        .e_mut(axis)
        .add_assign(position.i, position.j, position.k, value);
}

fn add_to_field_h(grid: &mut Grid, axis: Axis, position: CellPosition, value: f64) {
    grid.fields
        .h_mut(axis)
        .add_assign(position.i, position.j, position.k, value);
}

/// Synthesises the derived material for a voltage source with non-zero
/// series resistance, per `spec.md` §3's invariant:
/// `sigma += d_parallel / (R . d_perp1 . d_perp2)`.
pub fn derive_voltage_source_material(
    catalogue: &mut Catalogue,
    base: MaterialId,
    grid: &Grid,
    polarisation: Axis,
    resistance: f64,
    name: String,
) -> Result<MaterialId, CoreError> {
    if resistance <= 0.0 {
        return Err(CoreError::InvalidInput(
            "voltage source resistance must be positive to derive a material".to_string(),
        ));
    }
    let mut derived = catalogue.get(base).clone();
    derived.name = name;
    derived.average = false;
    let d_parallel = grid.resolution.spatial(polarisation);
    let (beta, gamma) = polarisation.transverse();
    let d_perp = grid.resolution.spatial(beta) * grid.resolution.spatial(gamma);
    derived.conductivity += d_parallel / (resistance * d_perp);
    catalogue.add_material(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contsine_is_periodic_and_zero_at_origin() {
        let waveform = Waveform::ContSine {
            amplitude: 1.0,
            frequency: 1e9,
        };
        assert!((waveform.evaluate(0.0)).abs() < 1e-9);
    }

    #[test]
    fn sine_vanishes_after_one_period() {
        let waveform = Waveform::Sine {
            amplitude: 1.0,
            frequency: 1e9,
        };
        let period = 1.0 / 1e9;
        assert_eq!(waveform.evaluate(period * 1.5), 0.0);
    }

    #[test]
    fn impulse_fires_once() {
        let waveform = Waveform::Impulse { amplitude: 5.0 };
        assert_eq!(waveform.evaluate(0.0), 5.0);
        assert_eq!(waveform.evaluate(1e-12), 0.0);
    }

    #[test]
    fn only_sine_family_yields_a_dispersion_estimate() {
        assert!(Waveform::Ricker { amplitude: 1.0, frequency: 1e9 }.max_frequency_estimate().is_none());
        assert_eq!(
            Waveform::Sine { amplitude: 1.0, frequency: 1e9 }.max_frequency_estimate(),
            Some(4e9)
        );
    }
}
