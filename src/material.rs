//! Material Catalogue: material records and the coefficients the stencil
//! needs, derived from `spec.md` §4.1.
//!
//! The `PhysicalConstants`/thiserror patterns are grounded on
//! `cem-solver/src/material.rs`; the small per-material pole list follows the
//! teacher's pervasive use of `smallvec` for bounded per-element collections.

use num::Complex;
use serde::{
    Deserialize,
    Serialize,
};
use smallvec::SmallVec;
use strum::EnumIter;

use crate::{
    error::CoreError,
    grid::Grid,
};

/// Index into the [`Catalogue`]. Index `0` is always free space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

impl MaterialId {
    pub const FREE_SPACE: MaterialId = MaterialId(0);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, Serialize, Deserialize)]
pub enum PoleKind {
    Debye,
    Lorentz,
    Drude,
}

/// One dispersive relaxation term. Parameter meaning depends on `kind`:
/// Debye uses `(delta_eps, tau)`; Lorentz and Drude additionally use
/// `frequency`/`damping` (the third slot of `spec.md`'s "pairs or triples").
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pole {
    pub kind: PoleKind,
    pub delta_eps: f64,
    pub tau: f64,
    pub frequency: f64,
    pub damping: f64,
}

impl Pole {
    pub fn debye(delta_eps: f64, tau: f64) -> Self {
        Self {
            kind: PoleKind::Debye,
            delta_eps,
            tau,
            frequency: 0.0,
            damping: 0.0,
        }
    }

    pub fn lorentz(delta_eps: f64, frequency: f64, damping: f64) -> Self {
        Self {
            kind: PoleKind::Lorentz,
            delta_eps,
            tau: 0.0,
            frequency,
            damping,
        }
    }

    pub fn drude(delta_eps: f64, frequency: f64, damping: f64) -> Self {
        Self {
            kind: PoleKind::Drude,
            delta_eps,
            tau: 0.0,
            frequency,
            damping,
        }
    }

    /// Returns `(eqt2, eqt, zt)`: `eqt` propagates the pole's own auxiliary
    /// state forward, `eqt2` is the (complex) weight applied to `E` when
    /// producing the pole's contribution to `CA`/`CB` in pass A, and `zt` is
    /// the weight applied when finalising the pole's state in pass B.
    /// A standard trapezoidal ADE recursion (Giannopoulos 2021-style); the
    /// derivation differs per pole family but all three collapse to the
    /// same three-coefficient shape `spec.md` §4.1 requires.
    pub fn ade_coefficients(&self, dt: f64) -> (Complex<f64>, Complex<f64>, Complex<f64>) {
        match self.kind {
            PoleKind::Debye => {
                let a = dt / (2.0 * self.tau);
                let eqt = (1.0 - a) / (1.0 + a);
                let eqt2 = (self.delta_eps / self.tau) * dt / (1.0 + a);
                (Complex::new(eqt2, 0.0), Complex::new(eqt, 0.0), Complex::new(eqt2, 0.0))
            }
            PoleKind::Lorentz => {
                let w0 = 2.0 * std::f64::consts::PI * self.frequency;
                let gamma = self.damping;
                let s = Complex::new(gamma, w0);
                let eqt = ((-s) * dt).exp();
                let eqt2 = self.delta_eps * w0 * w0 * dt * eqt / w0;
                (eqt2, eqt, eqt2)
            }
            PoleKind::Drude => {
                let wp2 = self.frequency * self.frequency;
                let gamma = self.damping;
                let eqt = (-gamma * dt).exp();
                let eqt2 = Complex::new(wp2 * dt / gamma.max(f64::MIN_POSITIVE), 0.0);
                (eqt2, Complex::new(eqt, 0.0), eqt2)
            }
        }
    }
}

/// A catalogue record. `CA/CBx/CBy/CBz` and `DA/DBx/DBy/DBz` are populated by
/// [`Catalogue::derive_coefficients`] and are meaningless before that call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub relative_permittivity: f64,
    pub conductivity: f64,
    pub relative_permeability: f64,
    pub magnetic_loss: f64,
    pub average: bool,
    pub poles: SmallVec<[Pole; 4]>,
    pub srce: f64,
    pub srcm: f64,

    pub ca: f64,
    pub cbx: f64,
    pub cby: f64,
    pub cbz: f64,
    pub da: f64,
    pub dbx: f64,
    pub dby: f64,
    pub dbz: f64,
}

impl Material {
    pub fn free_space() -> Self {
        Self {
            name: "free_space".to_string(),
            relative_permittivity: 1.0,
            conductivity: 0.0,
            relative_permeability: 1.0,
            magnetic_loss: 0.0,
            average: true,
            poles: SmallVec::new(),
            srce: 0.0,
            srcm: 0.0,
            ca: 0.0,
            cbx: 0.0,
            cby: 0.0,
            cbz: 0.0,
            da: 0.0,
            dbx: 0.0,
            dby: 0.0,
            dbz: 0.0,
        }
    }

    pub fn cb(&self, axis: crate::grid::Axis) -> f64 {
        match axis {
            crate::grid::Axis::X => self.cbx,
            crate::grid::Axis::Y => self.cby,
            crate::grid::Axis::Z => self.cbz,
        }
    }

    pub fn db(&self, axis: crate::grid::Axis) -> f64 {
        match axis {
            crate::grid::Axis::X => self.dbx,
            crate::grid::Axis::Y => self.dby,
            crate::grid::Axis::Z => self.dbz,
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        let finite_nonneg = [
            self.relative_permittivity,
            self.conductivity,
            self.relative_permeability,
            self.magnetic_loss,
        ];
        if finite_nonneg.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(CoreError::InvalidInput(format!(
                "material {:?} has a non-finite or negative electromagnetic parameter",
                self.name
            )));
        }
        if self.relative_permittivity < 1.0 || self.relative_permeability < 1.0 {
            return Err(CoreError::InvalidInput(format!(
                "material {:?} must have relative permittivity and permeability >= 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// Append-only store of [`Material`] records. Freezes once
/// [`Catalogue::derive_coefficients`] has run.
#[derive(Clone, Debug, Default)]
pub struct Catalogue {
    materials: Vec<Material>,
    smoothed: std::collections::HashMap<Vec<MaterialId>, MaterialId>,
    maxpoles: usize,
    frozen: bool,
}

impl Catalogue {
    pub fn new() -> Self {
        Self {
            materials: vec![Material::free_space()],
            smoothed: std::collections::HashMap::new(),
            maxpoles: 0,
            frozen: false,
        }
    }

    pub fn maxpoles(&self) -> usize {
        self.maxpoles
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get(&self, id: MaterialId) -> &Material {
        &self.materials[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, &Material)> {
        self.materials
            .iter()
            .enumerate()
            .map(|(i, m)| (MaterialId(i as u32), m))
    }

    /// Appends `material` to the catalogue, returning its new ID.
    pub fn add_material(&mut self, material: Material) -> Result<MaterialId, CoreError> {
        if self.frozen {
            return Err(CoreError::InvalidInput(
                "cannot add a material after the catalogue has been frozen".to_string(),
            ));
        }
        material.validate()?;
        if self.materials.iter().any(|m| m.name == material.name) {
            return Err(CoreError::DuplicateMaterial(material.name));
        }
        self.maxpoles = self.maxpoles.max(material.poles.len());
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(material);
        Ok(id)
    }

    /// Finds (or lazily creates) the smoothed material for a sorted,
    /// deduplicated tuple of contributing IDs, per `spec.md` §4.2.
    pub fn find_or_create_smoothed(
        &mut self,
        mut contributing: Vec<MaterialId>,
        for_electric: bool,
    ) -> Result<MaterialId, CoreError> {
        contributing.sort_unstable();
        contributing.dedup();
        if let Some(existing) = self.smoothed.get(&contributing) {
            return Ok(*existing);
        }

        let members: Vec<&Material> = contributing.iter().map(|id| self.get(*id)).collect();
        let n = members.len() as f64;

        let name = format!(
            "smoothed[{}]",
            contributing.iter().map(|id| id.0.to_string()).collect::<Vec<_>>().join(",")
        );

        let material = if for_electric {
            let eps_mean = members.iter().map(|m| m.relative_permittivity).sum::<f64>() / n;
            let sigma_geo = members
                .iter()
                .map(|m| m.conductivity.max(f64::MIN_POSITIVE))
                .product::<f64>()
                .powf(1.0 / n);
            Material {
                name,
                relative_permittivity: eps_mean,
                conductivity: sigma_geo,
                relative_permeability: 1.0,
                magnetic_loss: 0.0,
                average: false,
                poles: SmallVec::new(),
                srce: 0.0,
                srcm: 0.0,
                ca: 0.0,
                cbx: 0.0,
                cby: 0.0,
                cbz: 0.0,
                da: 0.0,
                dbx: 0.0,
                dby: 0.0,
                dbz: 0.0,
            }
        }
        else {
            let mu_mean = members.iter().map(|m| m.relative_permeability).sum::<f64>() / n;
            let sigma_star_geo = members
                .iter()
                .map(|m| m.magnetic_loss.max(f64::MIN_POSITIVE))
                .product::<f64>()
                .powf(1.0 / n);
            Material {
                name,
                relative_permittivity: 1.0,
                conductivity: 0.0,
                relative_permeability: mu_mean,
                magnetic_loss: sigma_star_geo,
                average: false,
                poles: SmallVec::new(),
                srce: 0.0,
                srcm: 0.0,
                ca: 0.0,
                cbx: 0.0,
                cby: 0.0,
                cbz: 0.0,
                da: 0.0,
                dbx: 0.0,
                dby: 0.0,
                dbz: 0.0,
            }
        };

        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(material);
        self.smoothed.insert(contributing, id);
        Ok(id)
    }

    /// Populates every material's `CA/CB*/DA/DB*` from its physical
    /// parameters and `grid`'s discretisation, per `spec.md` §4.1. Must run
    /// after the catalogue is closed and before stepping; freezes the
    /// catalogue.
    pub fn derive_coefficients(&mut self, grid: &Grid) -> Result<(), CoreError> {
        let dt = grid.resolution.dt;
        let e0 = grid.physical_constants.vacuum_permittivity;
        let mu0 = grid.physical_constants.vacuum_permeability;
        let (dx, dy, dz) = (grid.resolution.dx, grid.resolution.dy, grid.resolution.dz);

        for material in &mut self.materials {
            let eps_eff = material.relative_permittivity
                + material
                    .poles
                    .iter()
                    .map(|pole| pole.delta_eps)
                    .sum::<f64>();
            let eps = e0 * eps_eff;
            let mu = mu0 * material.relative_permeability;
            let sigma = material.conductivity;
            let sigma_star = material.magnetic_loss;

            let e_denom = 1.0 + sigma * dt / (2.0 * eps);
            material.ca = (1.0 - sigma * dt / (2.0 * eps)) / e_denom;
            material.cbx = (dt / (eps * dx)) / e_denom;
            material.cby = (dt / (eps * dy)) / e_denom;
            material.cbz = (dt / (eps * dz)) / e_denom;

            let h_denom = 1.0 + sigma_star * dt / (2.0 * mu);
            material.da = (1.0 - sigma_star * dt / (2.0 * mu)) / h_denom;
            material.dbx = (dt / (mu * dx)) / h_denom;
            material.dby = (dt / (mu * dy)) / h_denom;
            material.dbz = (dt / (mu * dz)) / h_denom;

            material.srce = dt / eps;
            material.srcm = dt / mu;
        }

        self.frozen = true;
        Ok(())
    }

    /// Complex pole-update coefficients for every material with `poles`,
    /// flattened to `updatecoeffsDispersive[material][3 * pole_index ..]` as
    /// `spec.md` §3 describes.
    pub fn dispersive_coefficients(&self, dt: f64) -> Vec<Vec<Complex<f64>>> {
        self.materials
            .iter()
            .map(|material| {
                material
                    .poles
                    .iter()
                    .flat_map(|pole| {
                        let (eqt2, eqt, zt) = pole.ade_coefficients(dt);
                        [eqt2, eqt, zt]
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grid::{
            Grid,
            Resolution,
        },
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
    fn free_space_is_always_material_zero() {
        let catalogue = Catalogue::new();
        assert_eq!(catalogue.get(MaterialId::FREE_SPACE).relative_permittivity, 1.0);
    }

    #[test]
    fn add_material_rejects_duplicate_names() {
        let mut catalogue = Catalogue::new();
        let mut m = Material::free_space();
        m.name = "copper".to_string();
        catalogue.add_material(m.clone()).unwrap();
        let err = catalogue.add_material(m).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateMaterial(_)));
    }

    #[test]
    fn derive_coefficients_reduces_to_free_space_identity() {
        let grid = test_grid();
        let mut catalogue = Catalogue::new();
        catalogue.derive_coefficients(&grid).unwrap();
        let fs = catalogue.get(MaterialId::FREE_SPACE);
        assert!((fs.ca - 1.0).abs() < 1e-12);
        assert!(fs.cbx > 0.0);
    }

    #[test]
    fn smoothing_uses_arithmetic_mean_of_epsilon() {
        let mut catalogue = Catalogue::new();
        let mut a = Material::free_space();
        a.name = "a".to_string();
        a.relative_permittivity = 3.0;
        let mut b = Material::free_space();
        b.name = "b".to_string();
        b.relative_permittivity = 5.0;
        let id_a = catalogue.add_material(a).unwrap();
        let id_b = catalogue.add_material(b).unwrap();
        let smoothed_id = catalogue
            .find_or_create_smoothed(vec![id_a, id_b], true)
            .unwrap();
        assert_eq!(catalogue.get(smoothed_id).relative_permittivity, 4.0);
    }

    #[test]
    fn smoothing_lookup_is_stable_regardless_of_input_order() {
        let mut catalogue = Catalogue::new();
        let id_a = catalogue
            .add_material({
                let mut m = Material::free_space();
                m.name = "a".to_string();
                m
            })
            .unwrap();
        let id_b = catalogue
            .add_material({
                let mut m = Material::free_space();
                m.name = "b".to_string();
                m
            })
            .unwrap();
        let first = catalogue.find_or_create_smoothed(vec![id_a, id_b], true).unwrap();
        let second = catalogue.find_or_create_smoothed(vec![id_b, id_a], true).unwrap();
        assert_eq!(first, second);
    }
}
