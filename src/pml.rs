//! CPML Boundary: six independently-graded absorbing slabs that correct the
//! interior stencil's results near each face. Grounded on `spec.md` §4.3; the
//! per-depth recursion coefficients `(b, c)` follow the exponential-decay
//! derivation in `src/app/solver/fdtd/legacy/pml.rs::PmlCell::new`/
//! `new_graded`, generalised here from a single per-cell pair to six
//! per-face 1D coefficient vectors as the data model requires.

use crate::{
    grid::{
        Axis,
        FieldArray,
        Grid,
    },
    material::Catalogue,
    physics::PhysicalConstants,
};

/// Per-face grading parameters. Defaults follow the polynomial grading the
/// teacher's `new_graded` documents (`m ~ 3-5`, `m_a ~ 1-5`, `kappa_max ~
/// 1-5`, `alpha_max ~ 0.1`); the exact numeric defaults are an Open Question
/// resolution recorded in `DESIGN.md`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmlParams {
    pub thickness: usize,
    pub m: f64,
    pub m_a: f64,
    pub kappa_max: f64,
    pub alpha_max: f64,
}

impl Default for PmlParams {
    fn default() -> Self {
        Self {
            thickness: 10,
            m: 4.0,
            m_a: 1.0,
            kappa_max: 1.0,
            alpha_max: 0.05,
        }
    }
}

impl PmlParams {
    /// `spec.md` §4.3's "optimal" default: `0.8(m+1) / (η · dα)`.
    pub fn sigma_max(&self, physical_constants: &PhysicalConstants, d_axis: f64) -> f64 {
        0.8 * (self.m + 1.0) / (physical_constants.free_space_impedance() * d_axis)
    }
}

/// Per-depth recursion coefficients for one face, length `thickness`.
struct Grading {
    be: Vec<f64>,
    ce: Vec<f64>,
    kappa_e: Vec<f64>,
    bh: Vec<f64>,
    ch: Vec<f64>,
    kappa_h: Vec<f64>,
}

fn grade(params: &PmlParams, physical_constants: &PhysicalConstants, dt: f64, d_axis: f64) -> Grading {
    let sigma_max = params.sigma_max(physical_constants, d_axis);
    let t = params.thickness;
    let mut grading = Grading {
        be: Vec::with_capacity(t),
        ce: Vec::with_capacity(t),
        kappa_e: Vec::with_capacity(t),
        bh: Vec::with_capacity(t),
        ch: Vec::with_capacity(t),
        kappa_h: Vec::with_capacity(t),
    };
    for depth in 0..t {
        // Electric coefficients sit at integer depth, magnetic at the
        // half-cell-deeper dual position, matching the Yee offset between
        // E- and H-nodes within the slab.
        let rho_e = (depth as f64 + 1.0) / t as f64;
        let rho_h = (depth as f64 + 0.5) / t as f64;
        let (be, ce, kappa_e) = one_depth(params, physical_constants, dt, sigma_max, rho_e);
        let (bh, ch, kappa_h) = one_depth(params, physical_constants, dt, sigma_max, rho_h);
        grading.be.push(be);
        grading.ce.push(ce);
        grading.kappa_e.push(kappa_e);
        grading.bh.push(bh);
        grading.ch.push(ch);
        grading.kappa_h.push(kappa_h);
    }
    grading
}

fn one_depth(
    params: &PmlParams,
    physical_constants: &PhysicalConstants,
    dt: f64,
    sigma_max: f64,
    rho: f64,
) -> (f64, f64, f64) {
    let sigma = sigma_max * rho.powf(params.m);
    let kappa = 1.0 + (params.kappa_max - 1.0) * rho.powf(params.m);
    let alpha = params.alpha_max * (1.0 - rho).powf(params.m_a);

    let b = (-(sigma / kappa + alpha) * dt / physical_constants.vacuum_permittivity).exp();
    let c = if sigma.abs() < f64::EPSILON {
        0.0
    }
    else {
        sigma * (b - 1.0) / (kappa * (sigma + kappa * alpha))
    };
    (b, c, kappa)
}

/// One of the six absorbing slabs.
pub struct PmlFace {
    pub axis: Axis,
    pub low: bool,
    pub thickness: usize,
    grading: Grading,
    /// Auxiliary memory for the two transverse E components corrected on
    /// this face, indexed `[b, c]` where `(b, c) = axis.transverse()`.
    phi_e: [FieldArray; 2],
    /// Auxiliary memory for the two transverse H components, same indexing.
    phi_h: [FieldArray; 2],
}

impl PmlFace {
    fn new(grid: &Grid, axis: Axis, low: bool, params: &PmlParams) -> Self {
        let grading = grade(
            params,
            &grid.physical_constants,
            grid.resolution.dt,
            grid.resolution.spatial(axis),
        );
        let (b, c) = axis.transverse();
        let phi_e = [
            phi_shape_for(grid, axis, b, params.thickness, true),
            phi_shape_for(grid, axis, c, params.thickness, true),
        ];
        let phi_h = [
            phi_shape_for(grid, axis, b, params.thickness, false),
            phi_shape_for(grid, axis, c, params.thickness, false),
        ];
        Self {
            axis,
            low,
            thickness: params.thickness,
            grading,
            phi_e,
            phi_h,
        }
    }
}

/// Builds the auxiliary array for the field component polarised along
/// `component_axis`, with its `axis`-extent clipped to the slab thickness
/// and its other two extents matching the real field array.
fn phi_shape_for(
    grid: &Grid,
    normal_axis: Axis,
    component_axis: Axis,
    thickness: usize,
    electric: bool,
) -> FieldArray {
    let (nx, ny, nz) = if electric {
        grid.fields.e(component_axis).shape()
    }
    else {
        grid.fields.h(component_axis).shape()
    };
    let (sx, sy, sz) = match normal_axis {
        Axis::X => (thickness, ny, nz),
        Axis::Y => (nx, thickness, nz),
        Axis::Z => (nx, ny, thickness),
    };
    FieldArray::zeros(sx, sy, sz)
}

/// The complete CPML boundary: one slab per face.
pub struct CpmlBoundary {
    faces: Vec<PmlFace>,
}

impl CpmlBoundary {
    /// Builds all six faces with the same grading parameters. Per-face
    /// parameters could differ; `spec.md` §3 allows it but this crate uses
    /// one `PmlParams` for all six, an Open Question resolution recorded in
    /// `DESIGN.md`.
    pub fn new(grid: &Grid, params: PmlParams) -> Self {
        let mut faces = Vec::with_capacity(6);
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            faces.push(PmlFace::new(grid, axis, true, &params));
            faces.push(PmlFace::new(grid, axis, false, &params));
        }
        Self { faces }
    }

    /// Applies the electric correction to every face, per `spec.md` §4.3's
    /// per-face recurrence, generalised to all three normal axes via the
    /// cyclic curl identity `E_b -= CB_a . dH_c/da`, `E_c += CB_a . dH_b/da`
    /// (where `(b, c) = a.transverse()`).
    pub fn update_electric(&mut self, grid: &mut Grid, catalogue: &Catalogue) {
        for face in &mut self.faces {
            apply_face(face, grid, catalogue, true);
        }
    }

    /// Applies the magnetic correction to every face, per `spec.md` §4.3,
    /// generalised via the dual curl identity `H_b += DB_a . dE_c/da`,
    /// `H_c -= DB_a . dE_b/da`.
    pub fn update_magnetic(&mut self, grid: &mut Grid, catalogue: &Catalogue) {
        for face in &mut self.faces {
            apply_face(face, grid, catalogue, false);
        }
    }
}

/// Maps a slab-local depth index `d` (`0..thickness`) to the actual index
/// along the normal axis for a face on the low or high side.
fn normal_index(face: &PmlFace, extent: usize, d: usize) -> usize {
    if face.low {
        d
    }
    else {
        extent - face.thickness + d
    }
}

fn compose(axis: Axis, normal: usize, t1: usize, t2: usize) -> (usize, usize, usize) {
    match axis {
        Axis::X => (normal, t1, t2),
        Axis::Y => (t2, normal, t1),
        Axis::Z => (t1, t2, normal),
    }
}

/// Inverse of [`compose`]: splits a physical `(x, y, z)` shape into
/// `(normal_extent, t1_extent, t2_extent)` for the given normal axis.
fn decompose(axis: Axis, shape: (usize, usize, usize)) -> (usize, usize, usize) {
    let (sx, sy, sz) = shape;
    match axis {
        Axis::X => (sx, sy, sz),
        Axis::Y => (sy, sz, sx),
        Axis::Z => (sz, sx, sy),
    }
}

fn apply_face(face: &mut PmlFace, grid: &mut Grid, catalogue: &Catalogue, electric: bool) {
    let (b_axis, c_axis) = face.axis.transverse();
    let d_normal = grid.resolution.spatial(face.axis);

    // Electric: E_b -= CB_a . dH_c/da, E_c += CB_a . dH_b/da.
    // Magnetic (dual curl, opposite sign pairing): H_b += DB_a . dE_c/da,
    // H_c -= DB_a . dE_b/da.
    let (b_sign, c_sign) = if electric { (-1.0, 1.0) } else { (1.0, -1.0) };

    apply_component(
        face, grid, catalogue, electric, b_axis, c_axis, d_normal, 0, b_sign,
    );
    apply_component(
        face, grid, catalogue, electric, c_axis, b_axis, d_normal, 1, c_sign,
    );
}

#[allow(clippy::too_many_arguments)]
fn apply_component(
    face: &mut PmlFace,
    grid: &mut Grid,
    catalogue: &Catalogue,
    electric: bool,
    target_axis: Axis,
    source_axis: Axis,
    d_normal: f64,
    phi_slot: usize,
    sign: f64,
) {
    let normal_axis = face.axis;
    let (be, ce, kappa) = if electric {
        (&face.grading.be, &face.grading.ce, &face.grading.kappa_e)
    }
    else {
        (&face.grading.bh, &face.grading.ch, &face.grading.kappa_h)
    };
    let phi = if electric {
        &mut face.phi_e[phi_slot]
    }
    else {
        &mut face.phi_h[phi_slot]
    };

    let (_, phi_t1, phi_t2) = decompose(normal_axis, phi.shape());

    let ids = &grid.ids;
    let fields = &mut grid.fields;
    let (target, source) = if electric {
        fields.e_mut_h_ref(target_axis, source_axis)
    }
    else {
        fields.h_mut_e_ref(target_axis, source_axis)
    };
    let target_id = if electric { ids.e_id(target_axis) } else { ids.h_id(target_axis) };

    let target_extent = match normal_axis {
        Axis::X => target.shape().0,
        Axis::Y => target.shape().1,
        Axis::Z => target.shape().2,
    };

    for d in 0..face.thickness {
        let normal = normal_index(face, target_extent, d);
        for t1 in 0..phi_t1 {
            for t2 in 0..phi_t2 {
                let (i, j, k) = compose(normal_axis, normal, t1, t2);
                let (pi, pj, pk) = compose(normal_axis, d, t1, t2);
                let (ii, jj, kk) = (i as isize, j as isize, k as isize);

                // Reads of `source` are bounds-clamped to zero: its shape
                // can differ by one along the normal axis from `target`'s
                // (the usual off-by-one between adjacent Yee-staggered
                // components), and zero is the correct value just past the
                // component's last valid plane.
                let here = source.get_or_zero(ii, jj, kk);
                let (lo_i, lo_j, lo_k) = match normal_axis {
                    Axis::X => (ii - 1, jj, kk),
                    Axis::Y => (ii, jj - 1, kk),
                    Axis::Z => (ii, jj, kk - 1),
                };
                let lower = source.get_or_zero(lo_i, lo_j, lo_k);

                // `spec.md` §4.3: the Φ recurrence itself is not
                // κ-stretched; κ instead divides the spatial difference used
                // inside the interior update, within this slab. The interior
                // stencil (`scheduler::update_electric_component`/
                // `update_magnetic_component`) already added the unstretched
                // `raw_diff` term for every cell including this one, so the
                // correction below both finishes the convolutional term and
                // folds in the missing `1/kappa` stretch as the difference
                // between the stretched and unstretched derivative.
                let raw_diff = (here - lower) / d_normal;
                let previous = phi.get(pi, pj, pk);
                let updated = be[d] * previous + ce[d] * raw_diff;
                phi.set(pi, pj, pk, updated);

                let material_id = target_id.get(i, j, k);
                let material = catalogue.get(material_id);
                let coefficient = if electric {
                    material.cb(normal_axis)
                }
                else {
                    material.db(normal_axis)
                };

                let kappa_stretch = raw_diff * (1.0 / kappa[d] - 1.0);
                target.add_assign(i, j, k, sign * coefficient * (updated + kappa_stretch));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grid::Resolution,
        material::MaterialId,
    };

    fn test_grid() -> Grid {
        Grid::new(
            20,
            20,
            20,
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
    fn idle_boundary_leaves_zero_fields_at_zero() {
        let mut grid = test_grid();
        let mut catalogue = Catalogue::new();
        catalogue.derive_coefficients(&grid).unwrap();
        let mut boundary = CpmlBoundary::new(&grid, PmlParams::default());
        boundary.update_electric(&mut grid, &catalogue);
        boundary.update_magnetic(&mut grid, &catalogue);
        assert!(grid.fields.any_non_finite().is_none());
        assert_eq!(grid.fields.ey.get(0, 0, 0), 0.0);
    }

    #[test]
    fn grading_decays_towards_the_interior() {
        let grid = test_grid();
        let params = PmlParams::default();
        let grading = grade(&params, &grid.physical_constants, grid.resolution.dt, grid.resolution.dx);
        assert!(grading.ce[0].abs() <= grading.ce[params.thickness - 1].abs() + 1e-12);
    }
}
