//! Grid & Field Store: owns the Yee-staggered field arrays, the
//! discretisation parameters, and the per-edge material-ID arrays.
//!
//! The indexing scheme generalises the teacher's `Strider`
//! (`cem-solver/src/fdtd/strider.rs`) from one uniform lattice shape to the
//! six distinct Yee-staggered shapes `spec.md` §3 requires.

use num::Complex;
use serde::{
    Deserialize,
    Serialize,
};
use strum::EnumIter;

use crate::{
    error::CoreError,
    material::MaterialId,
    physics::PhysicalConstants,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// The two axes transverse to this one, in a fixed cyclic order.
    pub fn transverse(&self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::Z, Axis::X),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }
}

/// Spatial and temporal discretisation. See `spec.md` §3.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub dt: f64,
}

impl Resolution {
    pub fn spatial(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.dx,
            Axis::Y => self.dy,
            Axis::Z => self.dz,
        }
    }

    /// Courant limit: `dt <= 1 / (c * sqrt(1/dx^2 + 1/dy^2 + 1/dz^2))`.
    pub fn cfl_limit(&self, physical_constants: &PhysicalConstants) -> f64 {
        let c = physical_constants.speed_of_light();
        let sum = 1.0 / self.dx.powi(2) + 1.0 / self.dy.powi(2) + 1.0 / self.dz.powi(2);
        1.0 / (c * sum.sqrt())
    }

    pub fn check_cfl(&self, physical_constants: &PhysicalConstants) -> Result<(), CoreError> {
        let limit = self.cfl_limit(physical_constants);
        if self.dt > limit {
            Err(CoreError::CflViolation { dt: self.dt, limit })
        }
        else {
            Ok(())
        }
    }
}

/// Rounds `val / d` to the nearest integer, ties to even (banker's rounding),
/// per `spec.md` §4.5: `round_value(x*dα)/dα = x` for any staggered-grid node
/// `x`.
pub fn round_value(val: f64) -> i64 {
    val.round_ties_even() as i64
}

/// A flat row-major three-dimensional array, `x` varying fastest so that the
/// innermost loop (the axis of contiguous storage) can stay sequential while
/// outer rows are handed out to worker threads, per `spec.md` §5.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldArray {
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<f64>,
}

impl FieldArray {
    pub fn zeros(nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            nx,
            ny,
            nz,
            data: vec![0.0; nx * ny * nz],
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        i + self.nx * (j + self.ny * k)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.index(i, j, k)]
    }

    /// Returns 0.0 for any index outside the array, used to apply the
    /// implicit Neumann-like boundary condition at the domain faces where a
    /// central-difference neighbour does not exist (`spec.md` §4.5 /
    /// the teacher's `BoundaryCondition::apply_df`).
    #[inline]
    pub fn get_or_zero(&self, i: isize, j: isize, k: isize) -> f64 {
        if i < 0
            || j < 0
            || k < 0
            || i as usize >= self.nx
            || j as usize >= self.ny
            || k as usize >= self.nz
        {
            0.0
        }
        else {
            self.get(i as usize, j as usize, k as usize)
        }
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let idx = self.index(i, j, k);
        self.data[idx] = value;
    }

    #[inline]
    pub fn add_assign(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let idx = self.index(i, j, k);
        self.data[idx] += value;
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn has_non_finite(&self) -> bool {
        self.data.iter().any(|x| !x.is_finite())
    }

    /// Row-major (x-contiguous) mutable rows, one per `(j, k)` pair. Used by
    /// the stencil kernels as the unit of fork-join parallelism: each row is
    /// written by exactly one worker and never aliases another row.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = (usize, usize, &mut [f64])> {
        let nx = self.nx;
        let ny = self.ny;
        self.data.chunks_mut(nx).enumerate().map(move |(row, chunk)| {
            let j = row % ny;
            let k = row / ny;
            (j, k, chunk)
        })
    }

    #[cfg(feature = "rayon")]
    pub fn par_rows_mut(&mut self) -> impl rayon::iter::IndexedParallelIterator<Item = (usize, usize, &mut [f64])> {
        use rayon::prelude::*;

        let nx = self.nx;
        let ny = self.ny;
        self.data
            .par_chunks_mut(nx)
            .enumerate()
            .map(move |(row, chunk)| {
                let j = row % ny;
                let k = row / ny;
                (j, k, chunk)
            })
    }
}

/// A flat row-major complex array, used for the per-pole dispersive
/// auxiliary state `Tx`/`Ty`/`Tz` (`spec.md` §3). An implementation may
/// store these as two real arrays of the same shape (`spec.md` §9); this one
/// uses `num::Complex<f64>` directly, following the teacher's dependency on
/// `num` (`src/app/solver/fdtd/cpu.rs`).
#[derive(Clone, Debug, PartialEq)]
pub struct ComplexFieldArray {
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<Complex<f64>>,
}

impl ComplexFieldArray {
    pub fn zeros(nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            nx,
            ny,
            nz,
            data: vec![Complex::new(0.0, 0.0); nx * ny * nz],
        }
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.nx * (j + self.ny * k)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> Complex<f64> {
        self.data[self.index(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: Complex<f64>) {
        let idx = self.index(i, j, k);
        self.data[idx] = value;
    }
}

/// A flat row-major array of material IDs, used for `ID`, `solid`, and the
/// `rigid` masks (`spec.md` §3).
#[derive(Clone, Debug, PartialEq)]
pub struct IdArray {
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<MaterialId>,
}

impl IdArray {
    pub fn filled(nx: usize, ny: usize, nz: usize, value: MaterialId) -> Self {
        Self {
            nx,
            ny,
            nz,
            data: vec![value; nx * ny * nz],
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.nx * (j + self.ny * k)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> MaterialId {
        self.data[self.index(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: MaterialId) {
        let idx = self.index(i, j, k);
        self.data[idx] = value;
    }
}

/// The six rigid-mask slots indexing into `rigidE` (12 entries: two per
/// axis-pair per the E edge's four surrounding cells) and `rigidH` (6
/// entries), stored as flat `i8` buffers per `spec.md` §3.
#[derive(Clone, Debug, PartialEq)]
pub struct RigidMask {
    planes: usize,
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<i8>,
}

impl RigidMask {
    pub fn zeros(planes: usize, nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            planes,
            nx,
            ny,
            nz,
            data: vec![0; planes * nx * ny * nz],
        }
    }

    #[inline]
    fn index(&self, plane: usize, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(plane < self.planes);
        i + self.nx * (j + self.ny * (k + self.nz * plane))
    }

    pub fn get(&self, plane: usize, i: usize, j: usize, k: usize) -> i8 {
        self.data[self.index(plane, i, j, k)]
    }

    pub fn set(&mut self, plane: usize, i: usize, j: usize, k: usize, value: i8) {
        let idx = self.index(plane, i, j, k);
        self.data[idx] = value;
    }
}

/// The six Yee-staggered field components.
pub struct Fields {
    pub ex: FieldArray,
    pub ey: FieldArray,
    pub ez: FieldArray,
    pub hx: FieldArray,
    pub hy: FieldArray,
    pub hz: FieldArray,
}

impl Fields {
    pub fn zeros(nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            ex: FieldArray::zeros(nx, ny + 1, nz + 1),
            ey: FieldArray::zeros(nx + 1, ny, nz + 1),
            ez: FieldArray::zeros(nx + 1, ny + 1, nz),
            hx: FieldArray::zeros(nx + 1, ny, nz),
            hy: FieldArray::zeros(nx, ny + 1, nz),
            hz: FieldArray::zeros(nx, ny, nz + 1),
        }
    }

    pub fn e(&self, axis: Axis) -> &FieldArray {
        match axis {
            Axis::X => &self.ex,
            Axis::Y => &self.ey,
            Axis::Z => &self.ez,
        }
    }

    pub fn e_mut(&mut self, axis: Axis) -> &mut FieldArray {
        match axis {
            Axis::X => &mut self.ex,
            Axis::Y => &mut self.ey,
            Axis::Z => &mut self.ez,
        }
    }

    pub fn h(&self, axis: Axis) -> &FieldArray {
        match axis {
            Axis::X => &self.hx,
            Axis::Y => &self.hy,
            Axis::Z => &self.hz,
        }
    }

    pub fn h_mut(&mut self, axis: Axis) -> &mut FieldArray {
        match axis {
            Axis::X => &mut self.hx,
            Axis::Y => &mut self.hy,
            Axis::Z => &mut self.hz,
        }
    }

    /// Borrows the `e_axis` component mutably and the `h_axis` component
    /// immutably at the same time, used by the CPML correction which writes
    /// one E component while reading an H component it never writes.
    pub fn e_mut_h_ref(&mut self, e_axis: Axis, h_axis: Axis) -> (&mut FieldArray, &FieldArray) {
        match (e_axis, h_axis) {
            (Axis::X, Axis::X) => (&mut self.ex, &self.hx),
            (Axis::X, Axis::Y) => (&mut self.ex, &self.hy),
            (Axis::X, Axis::Z) => (&mut self.ex, &self.hz),
            (Axis::Y, Axis::X) => (&mut self.ey, &self.hx),
            (Axis::Y, Axis::Y) => (&mut self.ey, &self.hy),
            (Axis::Y, Axis::Z) => (&mut self.ey, &self.hz),
            (Axis::Z, Axis::X) => (&mut self.ez, &self.hx),
            (Axis::Z, Axis::Y) => (&mut self.ez, &self.hy),
            (Axis::Z, Axis::Z) => (&mut self.ez, &self.hz),
        }
    }

    /// The dual of [`Fields::e_mut_h_ref`]: writes an H component while
    /// reading an E component.
    pub fn h_mut_e_ref(&mut self, h_axis: Axis, e_axis: Axis) -> (&mut FieldArray, &FieldArray) {
        match (h_axis, e_axis) {
            (Axis::X, Axis::X) => (&mut self.hx, &self.ex),
            (Axis::X, Axis::Y) => (&mut self.hx, &self.ey),
            (Axis::X, Axis::Z) => (&mut self.hx, &self.ez),
            (Axis::Y, Axis::X) => (&mut self.hy, &self.ex),
            (Axis::Y, Axis::Y) => (&mut self.hy, &self.ey),
            (Axis::Y, Axis::Z) => (&mut self.hy, &self.ez),
            (Axis::Z, Axis::X) => (&mut self.hz, &self.ex),
            (Axis::Z, Axis::Y) => (&mut self.hz, &self.ey),
            (Axis::Z, Axis::Z) => (&mut self.hz, &self.ez),
        }
    }

    /// Borrows the `axis` E component mutably plus the two H components
    /// transverse to it immutably, in the order `(self, b, c)` where
    /// `(b, c) = axis.transverse()` — exactly the three arrays the interior
    /// E stencil touches for one component.
    pub fn e_mut_h_pair_ref(&mut self, axis: Axis) -> (&mut FieldArray, &FieldArray, &FieldArray) {
        match axis {
            Axis::X => (&mut self.ex, &self.hy, &self.hz),
            Axis::Y => (&mut self.ey, &self.hz, &self.hx),
            Axis::Z => (&mut self.ez, &self.hx, &self.hy),
        }
    }

    /// The dual of [`Fields::e_mut_h_pair_ref`]: the `axis` H component
    /// mutably plus the two transverse E components immutably.
    pub fn h_mut_e_pair_ref(&mut self, axis: Axis) -> (&mut FieldArray, &FieldArray, &FieldArray) {
        match axis {
            Axis::X => (&mut self.hx, &self.ey, &self.ez),
            Axis::Y => (&mut self.hy, &self.ez, &self.ex),
            Axis::Z => (&mut self.hz, &self.ex, &self.ey),
        }
    }

    pub fn any_non_finite(&self) -> Option<&'static str> {
        if self.ex.has_non_finite() {
            Some("Ex")
        }
        else if self.ey.has_non_finite() {
            Some("Ey")
        }
        else if self.ez.has_non_finite() {
            Some("Ez")
        }
        else if self.hx.has_non_finite() {
            Some("Hx")
        }
        else if self.hy.has_non_finite() {
            Some("Hy")
        }
        else if self.hz.has_non_finite() {
            Some("Hz")
        }
        else {
            None
        }
    }
}

/// Per-pole dispersive auxiliary state `Tx`/`Ty`/`Tz`, allocated only when
/// the catalogue's `maxpoles > 0` (`spec.md` §3).
pub struct DispersiveState {
    pub tx: Vec<ComplexFieldArray>,
    pub ty: Vec<ComplexFieldArray>,
    pub tz: Vec<ComplexFieldArray>,
}

impl DispersiveState {
    pub fn new(nx: usize, ny: usize, nz: usize, maxpoles: usize) -> Self {
        Self {
            tx: (0..maxpoles).map(|_| ComplexFieldArray::zeros(nx, ny + 1, nz + 1)).collect(),
            ty: (0..maxpoles).map(|_| ComplexFieldArray::zeros(nx + 1, ny, nz + 1)).collect(),
            tz: (0..maxpoles).map(|_| ComplexFieldArray::zeros(nx + 1, ny + 1, nz)).collect(),
        }
    }

    pub fn poles(&self, axis: Axis) -> &[ComplexFieldArray] {
        match axis {
            Axis::X => &self.tx,
            Axis::Y => &self.ty,
            Axis::Z => &self.tz,
        }
    }

    pub fn poles_mut(&mut self, axis: Axis) -> &mut [ComplexFieldArray] {
        match axis {
            Axis::X => &mut self.tx,
            Axis::Y => &mut self.ty,
            Axis::Z => &mut self.tz,
        }
    }
}

/// The per-edge material-ID arrays plus the volumetric solid map and rigid
/// masks, per `spec.md` §3.
pub struct IdArrays {
    /// `ID[0..6]`: Ex, Ey, Ez, Hx, Hy, Hz, each shaped like its field array.
    pub id: [IdArray; 6],
    pub solid: IdArray,
    pub rigid_e: RigidMask,
    pub rigid_h: RigidMask,
}

impl IdArrays {
    pub fn e_id(&self, axis: Axis) -> &IdArray {
        &self.id[axis.index()]
    }

    pub fn h_id(&self, axis: Axis) -> &IdArray {
        &self.id[3 + axis.index()]
    }

    pub fn new(nx: usize, ny: usize, nz: usize, free_space: MaterialId) -> Self {
        let id = [
            IdArray::filled(nx, ny + 1, nz + 1, free_space),
            IdArray::filled(nx + 1, ny, nz + 1, free_space),
            IdArray::filled(nx + 1, ny + 1, nz, free_space),
            IdArray::filled(nx + 1, ny, nz, free_space),
            IdArray::filled(nx, ny + 1, nz, free_space),
            IdArray::filled(nx, ny, nz + 1, free_space),
        ];
        Self {
            id,
            solid: IdArray::filled(nx + 1, ny + 1, nz + 1, free_space),
            rigid_e: RigidMask::zeros(12, nx + 1, ny + 1, nz + 1),
            rigid_h: RigidMask::zeros(6, nx + 1, ny + 1, nz + 1),
        }
    }
}

/// The Yee grid: discretisation parameters, field arrays, and material-ID
/// arrays for a single model run.
pub struct Grid {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub resolution: Resolution,
    pub physical_constants: PhysicalConstants,
    pub fields: Fields,
    pub ids: IdArrays,
    pub dispersive: Option<DispersiveState>,
}

impl Grid {
    pub fn new(
        nx: usize,
        ny: usize,
        nz: usize,
        resolution: Resolution,
        physical_constants: PhysicalConstants,
        free_space: MaterialId,
    ) -> Self {
        Self {
            nx,
            ny,
            nz,
            resolution,
            physical_constants,
            fields: Fields::zeros(nx, ny, nz),
            ids: IdArrays::new(nx, ny, nz, free_space),
            dispersive: None,
        }
    }

    /// Allocates `Tx`/`Ty`/`Tz` for `maxpoles` poles. A no-op (arrays
    /// dropped) when `maxpoles == 0`, per `spec.md` §8's boundary behaviour.
    pub fn allocate_dispersive(&mut self, maxpoles: usize) {
        self.dispersive = if maxpoles == 0 {
            None
        }
        else {
            Some(DispersiveState::new(self.nx, self.ny, self.nz, maxpoles))
        };
    }

    pub fn extent(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.nx,
            Axis::Y => self.ny,
            Axis::Z => self.nz,
        }
    }

    /// Converts a real-valued coordinate (metres) to an integer cell index
    /// along `axis`, using banker's rounding, and checks it lies within
    /// `[0, n]` inclusive (`spec.md` §4.5).
    pub fn coord_to_index(&self, axis: Axis, value: f64) -> Result<usize, CoreError> {
        let d = self.resolution.spatial(axis);
        let co = round_value(value / d);
        let extent = self.extent(axis);
        if co < 0 || co as usize > extent {
            return Err(CoreError::OutOfBounds {
                axis,
                value: co,
                extent,
            });
        }
        Ok(co as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_value_is_tie_to_even() {
        assert_eq!(round_value(0.5), 0);
        assert_eq!(round_value(1.5), 2);
        assert_eq!(round_value(2.5), 2);
        assert_eq!(round_value(-0.5), 0);
        assert_eq!(round_value(-1.5), -2);
    }

    #[test]
    fn field_array_shapes_match_yee_staggering() {
        let fields = Fields::zeros(10, 10, 10);
        assert_eq!(fields.ex.shape(), (10, 11, 11));
        assert_eq!(fields.ey.shape(), (11, 10, 11));
        assert_eq!(fields.ez.shape(), (11, 11, 10));
        assert_eq!(fields.hx.shape(), (11, 10, 10));
        assert_eq!(fields.hy.shape(), (10, 11, 10));
        assert_eq!(fields.hz.shape(), (10, 10, 11));
    }

    #[test]
    fn get_or_zero_clamps_out_of_range_to_zero() {
        let mut a = FieldArray::zeros(2, 2, 2);
        a.set(0, 0, 0, 3.0);
        assert_eq!(a.get_or_zero(0, 0, 0), 3.0);
        assert_eq!(a.get_or_zero(-1, 0, 0), 0.0);
        assert_eq!(a.get_or_zero(2, 0, 0), 0.0);
    }

    #[test]
    fn cfl_limit_rejects_too_large_dt() {
        let resolution = Resolution {
            dx: 0.001,
            dy: 0.001,
            dz: 0.001,
            dt: 1.0,
        };
        assert!(resolution.check_cfl(&PhysicalConstants::SI).is_err());
    }

    #[test]
    fn cfl_limit_accepts_standard_courant_dt() {
        let physical_constants = PhysicalConstants::SI;
        let dx = 0.001;
        let limit = Resolution {
            dx,
            dy: dx,
            dz: dx,
            dt: 0.0,
        }
        .cfl_limit(&physical_constants);
        let resolution = Resolution {
            dx,
            dy: dx,
            dz: dx,
            dt: limit * 0.99,
        };
        assert!(resolution.check_cfl(&physical_constants).is_ok());
    }
}
