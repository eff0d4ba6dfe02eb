use crate::grid::Axis;

/// Errors the core can raise while building a grid or stepping a model run.
///
/// Each variant corresponds to a row of the error table: failures are
/// surfaced immediately to the caller of [`crate::Scheduler::run`], there is
/// no in-loop retry.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "timestep {dt:e}s exceeds the Courant limit {limit:e}s for the configured spatial resolution"
    )]
    CflViolation { dt: f64, limit: f64 },

    #[error("corrupt geometry: ID[{component}, {i}, {j}, {k}] references unknown material {material:?}")]
    CorruptGeometry {
        component: &'static str,
        i: usize,
        j: usize,
        k: usize,
        material: crate::material::MaterialId,
    },

    #[error("numerical instability detected at tick {tick} in {field}")]
    NumericalInstability { tick: usize, field: &'static str },

    #[error("coordinate {value} is out of bounds on axis {axis:?} (grid extent {extent})")]
    OutOfBounds {
        axis: Axis,
        value: i64,
        extent: usize,
    },

    #[error("duplicate material name {0:?}")]
    DuplicateMaterial(String),

    #[error("I/O failure writing simulation output")]
    IoFailure(#[source] std::io::Error),
}

/// Non-fatal: `dispersion_check` found fewer than ten cells per minimum
/// wavelength. Logged and the run continues.
#[derive(Clone, Debug, thiserror::Error)]
#[error(
    "potential numerical dispersion: minimum wavelength is resolved by only {resolution:.2} cells (want >= 10)"
)]
pub struct DispersionWarning {
    pub resolution: f64,
}
