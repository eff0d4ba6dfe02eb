//! Yee-Cell Builder: assigns a material ID to every electric and magnetic
//! edge from the volumetric `solid` map, applying dielectric smoothing where
//! permitted. Grounded on `spec.md` §4.2; the ≤4-neighbour collection uses a
//! `smallvec::SmallVec` consistent with the teacher's small-vector idiom for
//! bounded per-element collections (`cem-solver/src/fdtd/strider.rs` and
//! siblings use the same crate for similar bounded collections).

use smallvec::SmallVec;

use crate::{
    error::CoreError,
    grid::Grid,
    material::{
        Catalogue,
        MaterialId,
    },
};

type Coord = (usize, usize, usize);

/// One candidate cell contributing to an edge: its material and its cell
/// coordinate, kept for the lexicographic tie-break.
#[derive(Clone, Copy)]
struct Candidate {
    material: MaterialId,
    coord: Coord,
}

fn checked_neighbour(i: isize, j: isize, k: isize, bounds: Coord) -> Option<Coord> {
    if i < 0 || j < 0 || k < 0 {
        return None;
    }
    let (i, j, k) = (i as usize, j as usize, k as usize);
    if i < bounds.0 && j < bounds.1 && k < bounds.2 {
        Some((i, j, k))
    }
    else {
        None
    }
}

fn gather_candidates(
    catalogue: &Catalogue,
    solid: &crate::grid::IdArray,
    component: &'static str,
    offsets: &[(isize, isize, isize)],
    base: (isize, isize, isize),
) -> Result<SmallVec<[Candidate; 4]>, CoreError> {
    let bounds = solid.shape();
    let mut out = SmallVec::new();
    for (di, dj, dk) in offsets {
        if let Some(coord) = checked_neighbour(base.0 + di, base.1 + dj, base.2 + dk, bounds) {
            let material = solid.get(coord.0, coord.1, coord.2);
            if material.0 as usize >= catalogue.len() {
                return Err(CoreError::CorruptGeometry {
                    component,
                    i: coord.0,
                    j: coord.1,
                    k: coord.2,
                    material,
                });
            }
            out.push(Candidate { material, coord });
        }
    }
    Ok(out)
}

/// Resolves the material ID written to a single edge from its contributing
/// cells, per `spec.md` §4.2's smoothing policy.
fn resolve_edge(
    catalogue: &mut Catalogue,
    candidates: &[Candidate],
    rigid: bool,
    for_electric: bool,
) -> Result<MaterialId, CoreError> {
    debug_assert!(!candidates.is_empty());

    if candidates.iter().all(|c| c.material == candidates[0].material) {
        return Ok(candidates[0].material);
    }

    let all_average = !rigid && candidates.iter().all(|c| catalogue.get(c.material).average);
    if all_average {
        let ids: Vec<MaterialId> = candidates.iter().map(|c| c.material).collect();
        catalogue.find_or_create_smoothed(ids, for_electric)
    }
    else {
        let winner = candidates.iter().min_by_key(|c| c.coord).expect("non-empty");
        Ok(winner.material)
    }
}

/// The four cell offsets, in the plane transverse to each E edge, that
/// surround it, in a fixed order used both for candidate gathering and for
/// indexing the corresponding `rigidE` planes. Index `0..3` is Ex/Ey/Ez.
const E_NEIGHBOUR_OFFSETS: [[(isize, isize, isize); 4]; 3] = [
    [(0, -1, -1), (0, 0, -1), (0, -1, 0), (0, 0, 0)],
    [(-1, 0, -1), (0, 0, -1), (-1, 0, 0), (0, 0, 0)],
    [(-1, -1, 0), (0, -1, 0), (-1, 0, 0), (0, 0, 0)],
];

/// The two cell offsets along each H component's own axis that surround it.
/// Index `0..3` is Hx/Hy/Hz.
const H_NEIGHBOUR_OFFSETS: [[(isize, isize, isize); 2]; 3] = [
    [(-1, 0, 0), (0, 0, 0)],
    [(0, -1, 0), (0, 0, 0)],
    [(0, 0, -1), (0, 0, 0)],
];

fn any_rigid_plane(
    mask: &crate::grid::RigidMask,
    planes: &[usize],
    coord: Coord,
) -> bool {
    planes.iter().any(|&plane| mask.get(plane, coord.0, coord.1, coord.2) != 0)
}

/// Builds `ID[Ex|Ey|Ez|Hx|Hy|Hz]` from `solid` and the rigid masks. Must run
/// after `solid` and the rigid masks are fully populated by the (external)
/// geometry-rasterisation step.
pub fn build(grid: &mut Grid, catalogue: &mut Catalogue) -> Result<(), CoreError> {
    build_electric_component(grid, catalogue, 0, "Ex")?;
    build_electric_component(grid, catalogue, 1, "Ey")?;
    build_electric_component(grid, catalogue, 2, "Ez")?;
    build_magnetic_component(grid, catalogue, 0, "Hx")?;
    build_magnetic_component(grid, catalogue, 1, "Hy")?;
    build_magnetic_component(grid, catalogue, 2, "Hz")?;
    Ok(())
}

fn build_electric_component(
    grid: &mut Grid,
    catalogue: &mut Catalogue,
    axis: usize,
    component: &'static str,
) -> Result<(), CoreError> {
    let offsets = &E_NEIGHBOUR_OFFSETS[axis];
    let rigid_planes: Vec<usize> = (axis * 4..axis * 4 + 4).collect();
    let (nx, ny, nz) = grid.ids.id[axis].shape();

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let base = (i as isize, j as isize, k as isize);
                let candidates =
                    gather_candidates(catalogue, &grid.ids.solid, component, offsets, base)?;
                let rigid = any_rigid_plane(&grid.ids.rigid_e, &rigid_planes, (i, j, k));
                let material = resolve_edge(catalogue, &candidates, rigid, true)?;
                grid.ids.id[axis].set(i, j, k, material);
            }
        }
    }
    Ok(())
}

fn build_magnetic_component(
    grid: &mut Grid,
    catalogue: &mut Catalogue,
    axis: usize,
    component: &'static str,
) -> Result<(), CoreError> {
    let offsets = &H_NEIGHBOUR_OFFSETS[axis];
    let rigid_planes = [axis * 2, axis * 2 + 1];
    let array_index = 3 + axis;
    let (nx, ny, nz) = grid.ids.id[array_index].shape();

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let base = (i as isize, j as isize, k as isize);
                let candidates =
                    gather_candidates(catalogue, &grid.ids.solid, component, offsets, base)?;
                let rigid = any_rigid_plane(&grid.ids.rigid_h, &rigid_planes, (i, j, k));
                let material = resolve_edge(catalogue, &candidates, rigid, false)?;
                grid.ids.id[array_index].set(i, j, k, material);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grid::{
            Resolution,
        },
        material::Material,
        physics::PhysicalConstants,
    };

    fn uniform_grid(material: MaterialId) -> (Grid, Catalogue) {
        let mut grid = Grid::new(
            2,
            2,
            2,
            Resolution {
                dx: 0.001,
                dy: 0.001,
                dz: 0.001,
                dt: 1e-12,
            },
            PhysicalConstants::SI,
            material,
        );
        for i in 0..grid.ids.solid.shape().0 {
            for j in 0..grid.ids.solid.shape().1 {
                for k in 0..grid.ids.solid.shape().2 {
                    grid.ids.solid.set(i, j, k, material);
                }
            }
        }
        (grid, Catalogue::new())
    }

    #[test]
    fn uniform_solid_map_yields_uniform_ids() {
        let (mut grid, mut catalogue) = uniform_grid(MaterialId::FREE_SPACE);
        build(&mut grid, &mut catalogue).unwrap();
        assert_eq!(grid.ids.id[0].get(0, 0, 0), MaterialId::FREE_SPACE);
        assert_eq!(grid.ids.id[3].get(0, 0, 0), MaterialId::FREE_SPACE);
    }

    #[test]
    fn smoothing_creates_new_material_at_an_interface() {
        let (mut grid, mut catalogue) = uniform_grid(MaterialId::FREE_SPACE);
        let mut soil = Material::free_space();
        soil.name = "soil".to_string();
        soil.relative_permittivity = 9.0;
        soil.average = true;
        let soil_id = catalogue.add_material(soil).unwrap();

        // Split the block in half along x so the x=1 electric edges straddle
        // an interface and must be smoothed.
        grid.ids.solid.set(1, 0, 0, soil_id);
        grid.ids.solid.set(1, 1, 0, soil_id);
        grid.ids.solid.set(1, 0, 1, soil_id);
        grid.ids.solid.set(1, 1, 1, soil_id);

        let materials_before = catalogue.len();
        build(&mut grid, &mut catalogue).unwrap();
        assert!(catalogue.len() > materials_before);
    }

    #[test]
    fn corrupt_geometry_is_reported() {
        let (mut grid, mut catalogue) = uniform_grid(MaterialId(99));
        let err = build(&mut grid, &mut catalogue).unwrap_err();
        assert!(matches!(err, CoreError::CorruptGeometry { .. }));
    }
}
