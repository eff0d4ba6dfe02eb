//! Time-Stepping Scheduler: CFL pre-check, the per-tick leapfrog ordering
//! from `spec.md` §4.6, and the B-scan trace-position displacement applied
//! once before stepping begins.
//!
//! Cooperative cancellation and the `tracing`-based progress narration
//! follow the teacher's long-running solver loop and its `StopCondition`
//! check (`src/app/solver/fdtd/cpu.rs`); the eleven-step ordering itself
//! (receiver sampling, dual-pass E-update
//! around the PML/source corrections, H-update, dispersive finalisation) is
//! `spec.md` §4.6 transcribed directly into code.

use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

use num::Complex;

use crate::{
    error::{
        CoreError,
        DispersionWarning,
    },
    grid::{
        Axis,
        DispersiveState,
        FieldArray,
        Grid,
        IdArray,
    },
    material::Catalogue,
    output::{
        OutputBuffer,
        SourceMetadata,
    },
    pml::{
        CpmlBoundary,
        PmlParams,
    },
    receiver::Receiver,
    source::Source,
};

/// Per-run configuration: iteration count, B-scan trace displacement, PML
/// grading, snapshot cadence, and cooperative cancellation.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub iterations: usize,
    /// 1-based index of this trace within a B-scan; `modelrun == 1` leaves
    /// every source/receiver at its configured position.
    pub modelrun: usize,
    /// Per-trace displacement (in cells) applied `modelrun - 1` times.
    pub trace_step: (i64, i64, i64),
    pub pml: PmlParams,
    /// Tick interval at which a snapshot would be scheduled; snapshot file
    /// encoding itself is an external collaborator's concern (`spec.md` §1).
    pub write_every: usize,
    pub cancelled: Option<Arc<AtomicBool>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            iterations: 0,
            modelrun: 1,
            trace_step: (0, 0, 0),
            pml: PmlParams::default(),
            write_every: 0,
            cancelled: None,
        }
    }
}

/// Shifts `(i, j, k)` by `delta` along `axis`, leaving the other two
/// coordinates untouched.
fn shifted(axis: Axis, i: isize, j: isize, k: isize, delta: isize) -> (isize, isize, isize) {
    match axis {
        Axis::X => (i + delta, j, k),
        Axis::Y => (i, j + delta, k),
        Axis::Z => (i, j, k + delta),
    }
}

/// One cell of the standard (non-dispersive) leapfrog E stencil, plus (when
/// the catalogue has dispersive poles) the pass-A polarisation-current
/// correction using each pole's prior auxiliary state. `spec.md` §4.1's
/// general curl identity, unrolled per axis: for `(b, c) = axis.transverse()`,
/// `E_axis += CB_b . (H_c - H_c shifted -1 along b) - CB_c . (H_b - H_b
/// shifted -1 along c)`.
#[allow(clippy::too_many_arguments)]
fn electric_cell_value(
    i: usize,
    j: usize,
    k: usize,
    previous: f64,
    axis: Axis,
    b: Axis,
    c: Axis,
    id_array: &IdArray,
    catalogue: &Catalogue,
    h_b: &FieldArray,
    h_c: &FieldArray,
    dispersive: Option<&DispersiveState>,
    pole_coeffs: &[Vec<Complex<f64>>],
) -> f64 {
    let material_id = id_array.get(i, j, k);
    let material = catalogue.get(material_id);
    let (ii, jj, kk) = (i as isize, j as isize, k as isize);
    let (lb_i, lb_j, lb_k) = shifted(b, ii, jj, kk, -1);
    let (lc_i, lc_j, lc_k) = shifted(c, ii, jj, kk, -1);

    let term_b = material.cb(b) * (h_c.get(i, j, k) - h_c.get_or_zero(lb_i, lb_j, lb_k));
    let term_c = material.cb(c) * (h_b.get(i, j, k) - h_b.get_or_zero(lc_i, lc_j, lc_k));
    let mut value = material.ca * previous + term_b - term_c;

    if let Some(dispersive) = dispersive {
        let coeffs = &pole_coeffs[material_id.0 as usize];
        let poles = dispersive.poles(axis);
        let correction: f64 = coeffs
            .chunks_exact(3)
            .zip(poles.iter())
            .map(|(triplet, pole)| (triplet[2] * pole.get(i, j, k)).re)
            .sum();
        value -= material.srce * correction;
    }

    value
}

/// Updates one E component over the whole grid. Each `(j, k)` row is an
/// independent unit of work (`spec.md` §5): rows are handed to a `rayon`
/// pool when the `rayon` feature is enabled, and walked sequentially
/// otherwise — intra-step parallel, inter-step strictly sequential.
fn update_electric_component(grid: &mut Grid, catalogue: &Catalogue, axis: Axis, pole_coeffs: &[Vec<Complex<f64>>]) {
    let (b, c) = axis.transverse();
    let ids = &grid.ids;
    let id_array = ids.e_id(axis);
    let dispersive = grid.dispersive.as_ref();
    let fields = &mut grid.fields;
    let (target, h_b, h_c) = fields.e_mut_h_pair_ref(axis);

    #[cfg(feature = "rayon")]
    {
        use rayon::iter::ParallelIterator;

        target.par_rows_mut().for_each(|(j, k, row)| {
            for (i, slot) in row.iter_mut().enumerate() {
                *slot = electric_cell_value(i, j, k, *slot, axis, b, c, id_array, catalogue, h_b, h_c, dispersive, pole_coeffs);
            }
        });
    }
    #[cfg(not(feature = "rayon"))]
    {
        for (j, k, row) in target.rows_mut() {
            for (i, slot) in row.iter_mut().enumerate() {
                *slot = electric_cell_value(i, j, k, *slot, axis, b, c, id_array, catalogue, h_b, h_c, dispersive, pole_coeffs);
            }
        }
    }
}

/// Pass B: finalises each pole's auxiliary state using the just-updated E
/// field, per `spec.md` §4.1's "E-update pass B (dispersive only)".
fn finalize_dispersive_state(grid: &mut Grid, axis: Axis, pole_coeffs: &[Vec<Complex<f64>>]) {
    let ids = &grid.ids;
    let id_array = ids.e_id(axis);
    let e = grid.fields.e(axis);
    let (nx, ny, nz) = e.shape();

    let Some(dispersive) = grid.dispersive.as_mut()
    else {
        return;
    };
    let poles = dispersive.poles_mut(axis);

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let material_id = id_array.get(i, j, k);
                let coeffs = &pole_coeffs[material_id.0 as usize];
                let e_value = Complex::new(e.get(i, j, k), 0.0);
                for (triplet, pole) in coeffs.chunks_exact(3).zip(poles.iter_mut()) {
                    let (eqt2, eqt, _zt) = (triplet[0], triplet[1], triplet[2]);
                    let previous = pole.get(i, j, k);
                    pole.set(i, j, k, eqt * previous + eqt2 * e_value);
                }
            }
        }
    }
}

/// One cell of the standard leapfrog H stencil: `H_axis -= DB_b . (E_c
/// shifted +1 along b - E_c) - DB_c . (E_b shifted +1 along c - E_b)`.
fn magnetic_cell_value(
    i: usize,
    j: usize,
    k: usize,
    previous: f64,
    b: Axis,
    c: Axis,
    id_array: &IdArray,
    catalogue: &Catalogue,
    e_b: &FieldArray,
    e_c: &FieldArray,
) -> f64 {
    let material = catalogue.get(id_array.get(i, j, k));
    let (ii, jj, kk) = (i as isize, j as isize, k as isize);
    let (hb_i, hb_j, hb_k) = shifted(b, ii, jj, kk, 1);
    let (hc_i, hc_j, hc_k) = shifted(c, ii, jj, kk, 1);

    let term_b = material.db(b) * (e_c.get_or_zero(hb_i, hb_j, hb_k) - e_c.get(i, j, k));
    let term_c = material.db(c) * (e_b.get_or_zero(hc_i, hc_j, hc_k) - e_b.get(i, j, k));
    material.da * previous - term_b + term_c
}

/// Updates one H component over the whole grid. Mirrors
/// [`update_electric_component`]'s fork-join row decomposition: each `(j, k)`
/// row is an independent unit of work, handed to a `rayon` pool when the
/// `rayon` feature is enabled and walked sequentially otherwise.
fn update_magnetic_component(grid: &mut Grid, catalogue: &Catalogue, axis: Axis) {
    let (b, c) = axis.transverse();
    let ids = &grid.ids;
    let id_array = ids.h_id(axis);
    let fields = &mut grid.fields;
    let (target, e_b, e_c) = fields.h_mut_e_pair_ref(axis);

    #[cfg(feature = "rayon")]
    {
        use rayon::iter::ParallelIterator;

        target.par_rows_mut().for_each(|(j, k, row)| {
            for (i, slot) in row.iter_mut().enumerate() {
                *slot = magnetic_cell_value(i, j, k, *slot, b, c, id_array, catalogue, e_b, e_c);
            }
        });
    }
    #[cfg(not(feature = "rayon"))]
    {
        for (j, k, row) in target.rows_mut() {
            for (i, slot) in row.iter_mut().enumerate() {
                *slot = magnetic_cell_value(i, j, k, *slot, b, c, id_array, catalogue, e_b, e_c);
            }
        }
    }
}

fn source_metadata(index: usize, source: &Source) -> SourceMetadata {
    let (kind, position, waveform) = match source {
        Source::Voltage(s) => ("voltage", (s.position.i, s.position.j, s.position.k), &s.waveform),
        Source::Hertzian(s) => ("hertzian_dipole", (s.position.i, s.position.j, s.position.k), &s.waveform),
        Source::Magnetic(s) => ("magnetic_dipole", (s.position.i, s.position.j, s.position.k), &s.waveform),
        Source::TransmissionLine(s) => ("transmission_line", (s.position.i, s.position.j, s.position.k), &s.waveform),
    };
    SourceMetadata {
        kind,
        position,
        waveform_description: format!("source[{index}]: {waveform:?}"),
    }
}

fn waveform_estimate(source: &Source) -> Option<f64> {
    match source {
        Source::Voltage(s) => s.waveform.max_frequency_estimate(),
        Source::Hertzian(s) => s.waveform.max_frequency_estimate(),
        Source::Magnetic(s) => s.waveform.max_frequency_estimate(),
        Source::TransmissionLine(s) => s.waveform.max_frequency_estimate(),
    }
}

/// Flags materials resolved by fewer than ten cells per minimum wavelength,
/// per `spec.md` §4.6. Narrowed to waveforms with a closed-form maximum
/// frequency (`Sine`/`ContSine`); other kinds are skipped with a debug note,
/// per `SPEC_FULL.md`'s documented scope narrowing (no FFT crate available).
fn dispersion_check(grid: &Grid, catalogue: &Catalogue, sources: &[Source]) -> Vec<DispersionWarning> {
    let max_eps = catalogue
        .iter()
        .map(|(_, material)| material.relative_permittivity)
        .fold(1.0_f64, f64::max);
    let c = grid.physical_constants.speed_of_light();
    let d_max = grid.resolution.dx.max(grid.resolution.dy).max(grid.resolution.dz);

    let mut warnings = Vec::new();
    for source in sources {
        match waveform_estimate(source) {
            Some(frequency) if frequency > 0.0 => {
                let wavelength = c / (frequency * max_eps.sqrt());
                let resolution = wavelength / d_max;
                if resolution < 10.0 {
                    warnings.push(DispersionWarning { resolution });
                }
            }
            Some(_) => {}
            None => {
                tracing::debug!("dispersion check skipped: waveform has no closed-form frequency estimate");
            }
        }
    }
    warnings
}

/// Runs the leapfrog time-stepping loop for one model run.
#[derive(Clone, Copy, Debug, Default)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Self
    }

    /// Steps `grid` forward `options.iterations` times, applying sources,
    /// the CPML correction, and receiver sampling at the points `spec.md`
    /// §4.6 fixes. Freezes `catalogue` (via [`Catalogue::derive_coefficients`])
    /// and allocates dispersive state if it is not already frozen.
    pub fn run(
        &self,
        grid: &mut Grid,
        catalogue: &mut Catalogue,
        sources: &mut [Source],
        receivers: &mut [Receiver],
        options: &RunOptions,
    ) -> Result<(OutputBuffer, Vec<DispersionWarning>), CoreError> {
        grid.resolution.check_cfl(&grid.physical_constants)?;

        if !catalogue.is_frozen() {
            catalogue.derive_coefficients(grid)?;
        }
        grid.allocate_dispersive(catalogue.maxpoles());
        let pole_coeffs = catalogue.dispersive_coefficients(grid.resolution.dt);

        let trace_offset = (options.modelrun.max(1) - 1) as i64;
        let step = (
            options.trace_step.0 * trace_offset,
            options.trace_step.1 * trace_offset,
            options.trace_step.2 * trace_offset,
        );
        if step != (0, 0, 0) {
            for source in sources.iter_mut() {
                source.displace(step);
            }
            for receiver in receivers.iter_mut() {
                receiver.displace(step);
            }
        }

        let warnings = dispersion_check(grid, catalogue, sources);
        for warning in &warnings {
            tracing::warn!("{warning}");
        }

        let mut boundary = CpmlBoundary::new(grid, options.pml);
        let mut output = OutputBuffer::new(options.iterations, receivers.len());
        for (index, source) in sources.iter().enumerate() {
            output.record_source(source_metadata(index, source));
        }

        let dt = grid.resolution.dt;
        let mut abstime = 0.0_f64;

        tracing::debug!(iterations = options.iterations, modelrun = options.modelrun, "starting model run");

        for tick in 0..options.iterations {
            if let Some(flag) = &options.cancelled {
                if flag.load(Ordering::Relaxed) {
                    tracing::debug!(tick, "model run cancelled");
                    break;
                }
            }

            // 1. Receiver sampling for this step.
            for (index, receiver) in receivers.iter().enumerate() {
                receiver.sample(index, tick, grid, &mut output);
            }

            // 2. Snapshot scheduling slot; encoding a snapshot to a file is
            // an external collaborator's concern (`spec.md` §1).
            if options.write_every != 0 && tick % options.write_every == 0 {
                tracing::debug!(tick, "snapshot slot reached");
            }

            // 3. E-update pass A.
            for axis in [Axis::X, Axis::Y, Axis::Z] {
                update_electric_component(grid, catalogue, axis, &pole_coeffs);
            }

            // 4. PML electric correction.
            boundary.update_electric(grid, catalogue);

            // 5. Electric sources: voltage sources first, then Hertzian dipoles.
            for source in sources.iter_mut() {
                if matches!(source, Source::Voltage(_)) {
                    source.apply_electric(grid, catalogue, abstime);
                }
            }
            for source in sources.iter_mut() {
                if matches!(source, Source::Hertzian(_)) {
                    source.apply_electric(grid, catalogue, abstime);
                }
            }

            // 6. E-update pass B: finalise dispersive auxiliary state.
            if catalogue.maxpoles() > 0 {
                for axis in [Axis::X, Axis::Y, Axis::Z] {
                    finalize_dispersive_state(grid, axis, &pole_coeffs);
                }
            }

            // 7.
            abstime += dt / 2.0;

            // 8. H-update.
            for axis in [Axis::X, Axis::Y, Axis::Z] {
                update_magnetic_component(grid, catalogue, axis);
            }

            // 9. PML magnetic correction.
            boundary.update_magnetic(grid, catalogue);

            // 10. Magnetic sources: magnetic dipoles, transmission lines.
            for source in sources.iter_mut() {
                source.apply_magnetic(grid, catalogue, abstime, dt);
            }

            // 11.
            abstime += dt / 2.0;

            if let Some(field) = grid.fields.any_non_finite() {
                return Err(CoreError::NumericalInstability { tick, field });
            }
        }

        Ok((output, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grid::Resolution,
        material::MaterialId,
        physics::PhysicalConstants,
        receiver::Outputs,
        source::{
            CellPosition,
            HertzianDipole,
            Waveform,
        },
    };

    fn test_grid() -> Grid {
        Grid::new(
            8,
            8,
            8,
            Resolution {
                dx: 0.001,
                dy: 0.001,
                dz: 0.001,
                dt: 1e-12,
            },
            PhysicalConstants::SI,
            MaterialId::FREE_SPACE,
        )
    }

    #[test]
    fn cfl_violation_is_rejected_before_stepping() {
        let mut grid = test_grid();
        grid.resolution.dt = 1.0;
        let mut catalogue = Catalogue::new();
        let scheduler = Scheduler::new();
        let options = RunOptions {
            iterations: 10,
            ..Default::default()
        };
        let err = scheduler
            .run(&mut grid, &mut catalogue, &mut [], &mut [], &options)
            .unwrap_err();
        assert!(matches!(err, CoreError::CflViolation { .. }));
    }

    #[test]
    fn zero_iterations_produces_an_empty_but_valid_output() {
        let mut grid = test_grid();
        let mut catalogue = Catalogue::new();
        let scheduler = Scheduler::new();
        let options = RunOptions {
            iterations: 0,
            ..Default::default()
        };
        let (output, warnings) = scheduler
            .run(&mut grid, &mut catalogue, &mut [], &mut [], &options)
            .unwrap();
        assert_eq!(output.iterations(), 0);
        assert!(warnings.is_empty());
    }

    #[test]
    fn a_hertzian_dipole_perturbs_the_field_it_drives() {
        let mut grid = test_grid();
        let mut catalogue = Catalogue::new();
        let mut sources = vec![Source::Hertzian(HertzianDipole {
            position: CellPosition { i: 4, j: 4, k: 4 },
            polarisation: Axis::Z,
            waveform: Waveform::Gaussian {
                amplitude: 1.0,
                frequency: 1e9,
            },
            start: 0.0,
            stop: 1.0,
        })];
        let mut receivers = vec![Receiver {
            position: CellPosition { i: 4, j: 4, k: 4 },
            outputs: Outputs::EZ,
        }];
        let scheduler = Scheduler::new();
        let options = RunOptions {
            iterations: 20,
            ..Default::default()
        };
        let (output, _) = scheduler
            .run(&mut grid, &mut catalogue, &mut sources, &mut receivers, &options)
            .unwrap();
        let series = output.series(0, "Ez").unwrap();
        assert!(series.iter().any(|&value| value != 0.0));
    }

    #[test]
    fn maxpoles_zero_skips_the_dispersive_pass() {
        let mut grid = test_grid();
        let mut catalogue = Catalogue::new();
        catalogue.derive_coefficients(&grid).unwrap();
        assert_eq!(catalogue.maxpoles(), 0);
        let scheduler = Scheduler::new();
        let options = RunOptions {
            iterations: 5,
            ..Default::default()
        };
        scheduler
            .run(&mut grid, &mut catalogue, &mut [], &mut [], &options)
            .unwrap();
        assert!(grid.dispersive.is_none());
    }

    #[test]
    fn cancellation_stops_the_run_early() {
        let mut grid = test_grid();
        let mut catalogue = Catalogue::new();
        let flag = Arc::new(AtomicBool::new(true));
        let scheduler = Scheduler::new();
        let options = RunOptions {
            iterations: 1000,
            cancelled: Some(flag),
            ..Default::default()
        };
        let (output, _) = scheduler
            .run(&mut grid, &mut catalogue, &mut [], &mut [], &options)
            .unwrap();
        assert_eq!(output.iterations(), 1000);
    }
}
