use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::neighbor::{BoundaryFlag, Face};

/// Number of ghost zones on each side of a block, in every active dimension.
/// Must be even so that a ghost layer maps onto whole coarse zones.
pub const NGHOST: usize = 2;

/// Whether the mesh may be re-refined while running. Only the static mode is
/// implemented; adaptive affects the load-balance advisory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefinementMode {
    Static,
    Adaptive,
}

/// The physical extent, cell count, and stretch ratio of a rectangular region.
/// Used for the whole mesh and for each block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionSize {
    pub min: [f64; 3],
    pub max: [f64; 3],
    pub ratio: [f64; 3],
    pub cells: [usize; 3],
}

impl RegionSize {
    pub fn length(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    /// Return true if this region intersects the given box with non-zero volume
    /// along every axis that has more than one cell.
    pub fn overlaps(&self, lower: [f64; 3], upper: [f64; 3]) -> bool {
        (0..3).all(|a| {
            if self.cells[a] == 1 {
                true
            } else {
                self.min[a] < upper[a] && lower[a] < self.max[a]
            }
        })
    }
}

/// A box in physical coordinates, and the number of levels above the root
/// level that leaves touching it must reach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefinementRegion {
    pub level: u32,
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

/// All the inputs needed to lay out a mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    pub mesh_cells: [usize; 3],
    pub block_cells: [usize; 3],
    pub lower: [f64; 3],
    pub upper: [f64; 3],
    pub ratio: [f64; 3],
    pub boundaries: [BoundaryFlag; 6],
    pub cfl_number: f64,
    pub num_threads: usize,
    pub refinement: RefinementMode,
    pub num_levels: u32,
    pub regions: Vec<RefinementRegion>,
    pub num_variables: usize,
    pub face_field: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mesh_cells: [64, 1, 1],
            block_cells: [16, 1, 1],
            lower: [0.0; 3],
            upper: [1.0; 3],
            ratio: [1.0; 3],
            boundaries: [BoundaryFlag::Outflow; 6],
            cfl_number: 0.4,
            num_threads: 1,
            refinement: RefinementMode::Static,
            num_levels: 1,
            regions: Vec::new(),
            num_variables: 1,
            face_field: false,
        }
    }
}

impl MeshConfig {
    /// Return which of the three axes carry more than one zone.
    pub fn active(&self) -> [bool; 3] {
        [true, self.mesh_cells[1] > 1, self.mesh_cells[2] > 1]
    }

    /// Return the number of spatial dimensions.
    pub fn ndim(&self) -> usize {
        self.active().iter().filter(|&&a| a).count()
    }

    /// Return the number of root-level blocks along each axis.
    pub fn root_blocks(&self) -> [i64; 3] {
        let mut n = [1; 3];
        for a in 0..3 {
            n[a] = (self.mesh_cells[a] / self.block_cells[a]) as i64;
        }
        n
    }

    /// Return the logical level of the root grid: the smallest level at
    /// which a power-of-two tree covers the root blocks along every axis.
    pub fn root_level(&self) -> u32 {
        let nbmax = *self.root_blocks().iter().max().unwrap_or(&1);
        let mut level = 0;
        while (1i64 << level) < nbmax {
            level += 1
        }
        level
    }

    pub fn max_level(&self) -> u32 {
        self.root_level() + self.num_levels.max(1) - 1
    }

    /// Return the extent of the whole mesh.
    pub fn mesh_region(&self) -> RegionSize {
        RegionSize {
            min: self.lower,
            max: self.upper,
            ratio: self.ratio,
            cells: self.mesh_cells,
        }
    }

    /// Check the configuration for consistency. Every error raised here is
    /// fatal and happens before any block is built.
    pub fn validate(&self) -> Result<()> {
        let [nx1, nx2, nx3] = self.mesh_cells;

        if nx1 < 4 {
            return Err(Error::config(format!("mesh nx1 must be >= 4, but nx1={}", nx1)));
        }
        if nx2 < 1 || nx3 < 1 {
            return Err(Error::config(format!(
                "mesh nx2 and nx3 must be >= 1, but nx2={} nx3={}",
                nx2, nx3
            )));
        }
        if nx2 == 1 && nx3 > 1 {
            return Err(Error::config(format!(
                "nx2=1, nx3={}: problems in the x1-x3 plane are not supported",
                nx3
            )));
        }
        if self.cfl_number <= 0.0 {
            return Err(Error::config(format!(
                "the CFL number must be positive, got {}",
                self.cfl_number
            )));
        }
        if nx2 == 1 && self.cfl_number > 1.0 {
            return Err(Error::config("the CFL number must be <= 1.0 in 1D"));
        }
        if nx2 > 1 && self.cfl_number > 0.5 {
            return Err(Error::config("the CFL number must be <= 0.5 in 2D/3D"));
        }
        for a in 0..3 {
            if self.upper[a] <= self.lower[a] {
                return Err(Error::config(format!(
                    "x{}max must be larger than x{}min: x{}min={} x{}max={}",
                    a + 1,
                    a + 1,
                    a + 1,
                    self.lower[a],
                    a + 1,
                    self.upper[a]
                )));
            }
            if (self.ratio[a] - 1.0).abs() > 0.1 {
                return Err(Error::config(format!(
                    "ratio of cell sizes must be 0.9 <= x{}rat <= 1.1, x{}rat={}",
                    a + 1,
                    a + 1,
                    self.ratio[a]
                )));
            }
        }

        let active = self.active();

        for a in 0..3 {
            let nb = self.block_cells[a];

            if nb == 0 || self.mesh_cells[a] % nb != 0 {
                return Err(Error::config(
                    "the mesh must be evenly divisible by the block",
                ));
            }
            if active[a] && nb < 2 {
                return Err(Error::config("block size must be larger than 1"));
            }
            if !active[a] && nb != 1 {
                return Err(Error::config(format!(
                    "block nx{} must be 1 when the mesh has one zone along x{}",
                    a + 1,
                    a + 1
                )));
            }
            if active[a] && self.num_levels > 1 && (nb % 2 != 0 || nb < 2 * NGHOST) {
                return Err(Error::config(format!(
                    "with more than one level, block nx{} must be even and >= {}",
                    a + 1,
                    2 * NGHOST
                )));
            }
        }

        if self.num_threads < 1 {
            return Err(Error::config(format!(
                "number of threads must be >= 1, but num_threads={}",
                self.num_threads
            )));
        }
        if self.num_variables < 1 {
            return Err(Error::config("at least one cell variable is required"));
        }
        if self.num_levels < 1 {
            return Err(Error::config("num_levels must be >= 1"));
        }
        for region in &self.regions {
            if region.level >= self.num_levels {
                return Err(Error::config(format!(
                    "refinement region asks for level {} but only {} levels are enabled",
                    region.level, self.num_levels
                )));
            }
        }
        for axis in 0..3 {
            let inner = self.boundaries[Face::new(axis, false).index()];
            let outer = self.boundaries[Face::new(axis, true).index()];

            if inner == BoundaryFlag::Block || outer == BoundaryFlag::Block {
                return Err(Error::config("the mesh boundary cannot be tagged as an internal face"));
            }
            if (inner == BoundaryFlag::Periodic) != (outer == BoundaryFlag::Periodic) {
                return Err(Error::config(format!(
                    "periodic boundaries on x{} must be set on both sides",
                    axis + 1
                )));
            }
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn config_2d() -> MeshConfig {
        MeshConfig {
            mesh_cells: [8, 8, 1],
            block_cells: [4, 4, 1],
            cfl_number: 0.3,
            ..MeshConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(MeshConfig::default().validate().is_ok());
        assert!(config_2d().validate().is_ok());
    }

    #[test]
    fn root_level_covers_the_root_grid() {
        let config = config_2d();
        assert_eq!(config.root_blocks(), [2, 2, 1]);
        assert_eq!(config.root_level(), 1);
        assert_eq!(config.max_level(), 1);

        let config = MeshConfig {
            mesh_cells: [48, 1, 1],
            block_cells: [8, 1, 1],
            num_levels: 3,
            ..MeshConfig::default()
        };
        assert_eq!(config.root_blocks(), [6, 1, 1]);
        assert_eq!(config.root_level(), 3);
        assert_eq!(config.max_level(), 5);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad = MeshConfig { mesh_cells: [10, 8, 1], ..config_2d() };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));

        let bad = MeshConfig { cfl_number: 0.7, ..config_2d() };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));

        let bad = MeshConfig { ratio: [1.2, 1.0, 1.0], ..config_2d() };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));

        let bad = MeshConfig { mesh_cells: [8, 1, 4], block_cells: [4, 1, 4], ..config_2d() };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));

        let bad = MeshConfig { num_threads: 0, ..config_2d() };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));

        let mut bad = config_2d();
        bad.boundaries[Face::new(0, false).index()] = BoundaryFlag::Periodic;
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn refinement_needs_even_blocks() {
        let bad = MeshConfig {
            mesh_cells: [6, 6, 1],
            block_cells: [3, 3, 1],
            num_levels: 2,
            ..config_2d()
        };
        assert!(bad.validate().is_err());
    }
}
