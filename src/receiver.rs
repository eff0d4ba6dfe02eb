//! Receiver sampling: copies field components, and derives line currents,
//! into the output buffer each step. Grounded on `spec.md` §4.4; the exact
//! `Ix`/`Iy`/`Iz` formulas and the boundary-zero rule are taken verbatim from
//! `examples/original_source/gprMax/grid.py`.

use bitflags::bitflags;

use crate::{
    grid::{
        Axis,
        Grid,
    },
    output::OutputBuffer,
    source::CellPosition,
};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Outputs: u16 {
        const EX = 1 << 0;
        const EY = 1 << 1;
        const EZ = 1 << 2;
        const HX = 1 << 3;
        const HY = 1 << 4;
        const HZ = 1 << 5;
        const IX = 1 << 6;
        const IY = 1 << 7;
        const IZ = 1 << 8;
    }
}

#[derive(Clone, Debug)]
pub struct Receiver {
    pub position: CellPosition,
    pub outputs: Outputs,
}

impl Receiver {
    pub fn displace(&mut self, step: (i64, i64, i64)) {
        self.position.i = (self.position.i as i64 + step.0).max(0) as usize;
        self.position.j = (self.position.j as i64 + step.1).max(0) as usize;
        self.position.k = (self.position.k as i64 + step.2).max(0) as usize;
    }

    /// Samples this receiver's requested components at the current step
    /// into `output`, per `spec.md` §4.4.
    pub fn sample(&self, index: usize, step: usize, grid: &Grid, output: &mut OutputBuffer) {
        let CellPosition { i, j, k } = self.position;

        if self.outputs.contains(Outputs::EX) {
            output.push(index, "Ex", step, grid.fields.ex.get(i, j, k));
        }
        if self.outputs.contains(Outputs::EY) {
            output.push(index, "Ey", step, grid.fields.ey.get(i, j, k));
        }
        if self.outputs.contains(Outputs::EZ) {
            output.push(index, "Ez", step, grid.fields.ez.get(i, j, k));
        }
        if self.outputs.contains(Outputs::HX) {
            output.push(index, "Hx", step, grid.fields.hx.get(i, j, k));
        }
        if self.outputs.contains(Outputs::HY) {
            output.push(index, "Hy", step, grid.fields.hy.get(i, j, k));
        }
        if self.outputs.contains(Outputs::HZ) {
            output.push(index, "Hz", step, grid.fields.hz.get(i, j, k));
        }
        if self.outputs.contains(Outputs::IX) {
            output.push(index, "Ix", step, line_current(grid, Axis::X, i, j, k));
        }
        if self.outputs.contains(Outputs::IY) {
            output.push(index, "Iy", step, line_current(grid, Axis::Y, i, j, k));
        }
        if self.outputs.contains(Outputs::IZ) {
            output.push(index, "Iz", step, line_current(grid, Axis::Z, i, j, k));
        }
    }
}

/// `Ix(x,y,z) = dy.(Hy[x,y,z-1] - Hy[x,y,z]) + dz.(Hz[x,y,z] - Hz[x,y-1,z])`,
/// cyclic for `Iy`/`Iz`; zero on the two transverse boundary coordinates
/// (the loop integral reads the `y-1`/`z-1` neighbours, so `Ix` is undefined
/// at `y=0` or `z=0`, not at `x=0`).
fn line_current(grid: &Grid, axis: Axis, i: usize, j: usize, k: usize) -> f64 {
    let boundary = match axis {
        Axis::X => j == 0 || k == 0,
        Axis::Y => i == 0 || k == 0,
        Axis::Z => i == 0 || j == 0,
    };
    if boundary {
        return 0.0;
    }

    let (ii, jj, kk) = (i as isize, j as isize, k as isize);
    match axis {
        Axis::X => {
            grid.resolution.dy * (grid.fields.hy.get_or_zero(ii, jj, kk - 1) - grid.fields.hy.get(i, j, k))
                + grid.resolution.dz * (grid.fields.hz.get(i, j, k) - grid.fields.hz.get_or_zero(ii, jj - 1, kk))
        }
        Axis::Y => {
            grid.resolution.dz * (grid.fields.hz.get_or_zero(ii - 1, jj, kk) - grid.fields.hz.get(i, j, k))
                + grid.resolution.dx * (grid.fields.hx.get(i, j, k) - grid.fields.hx.get_or_zero(ii, jj, kk - 1))
        }
        Axis::Z => {
            grid.resolution.dx * (grid.fields.hx.get_or_zero(ii, jj - 1, kk) - grid.fields.hx.get(i, j, k))
                + grid.resolution.dy * (grid.fields.hy.get(i, j, k) - grid.fields.hy.get_or_zero(ii - 1, jj, kk))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grid::Resolution,
        material::MaterialId,
        physics::PhysicalConstants,
    };

    fn test_grid() -> Grid {
        Grid::new(
            4,
            4,
            4,
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
    fn ix_is_zero_on_its_transverse_boundary_coordinates() {
        let mut grid = test_grid();
        grid.fields.hy.set(2, 2, 2, 1.0);
        grid.fields.hz.set(2, 2, 2, 1.0);
        assert_eq!(line_current(&grid, Axis::X, 2, 0, 2), 0.0);
        assert_eq!(line_current(&grid, Axis::X, 2, 2, 0), 0.0);
    }

    #[test]
    fn ix_is_non_zero_away_from_its_transverse_boundary() {
        let mut grid = test_grid();
        grid.fields.hz.set(2, 2, 2, 1.0);
        let current = line_current(&grid, Axis::X, 2, 2, 2);
        assert_eq!(current, grid.resolution.dz * 1.0);
    }
}
