use log::debug;

use crate::config::{RegionSize, NGHOST};
use crate::exchange::boundary::BoundaryStatus;
use crate::index_space::IndexSpace;
use crate::logical_location::LogicalLocation;
use crate::neighbor::{BoundaryFlag, Face, NeighborTable};
use crate::patch::{staggered, FaceField, Patch};
use crate::task::TaskState;




/**
 * Map a fractional position `r` in [0, 1] along one axis of a region to a
 * physical coordinate. With a ratio of 1 the spacing is uniform; otherwise
 * successive zones grow by the ratio.
 */
pub fn mesh_generator(r: f64, region: &RegionSize, axis: usize) -> f64 {
    let ratio = region.ratio[axis];
    let (lw, rw) = if ratio == 1.0 {
        (1.0 - r, r)
    } else {
        let n = region.cells[axis] as f64;
        let ratn = ratio.powf(n);
        let rnx = ratio.powf(r * n);
        let lw = (rnx - ratn) / (1.0 - ratn);
        (lw, 1.0 - lw)
    };
    region.min[axis] * lw + region.max[axis] * rw
}




/**
 * Return the physical extent and the face boundary tags of the block at the
 * given address. Faces on the domain edge carry the mesh tag; interior faces
 * carry `BoundaryFlag::Block`.
 */
pub fn block_size_and_boundaries(
    loc: &LogicalLocation,
    mesh: &RegionSize,
    mesh_bcs: &[BoundaryFlag; 6],
    block_cells: [usize; 3],
    root_blocks: [i64; 3],
    root_level: u32,
) -> (RegionSize, [BoundaryFlag; 6]) {
    let mut size = RegionSize {
        min: mesh.min,
        max: mesh.max,
        ratio: mesh.ratio,
        cells: block_cells,
    };
    let mut bcs = *mesh_bcs;

    for axis in 0..3 {
        if mesh.cells[axis] == 1 {
            continue;
        }
        let nrbx = root_blocks[axis] << (loc.level - root_level);
        let lx = loc.lx[axis];
        let inner = Face::new(axis, false).index();
        let outer = Face::new(axis, true).index();

        if lx == 0 {
            size.min[axis] = mesh.min[axis];
        } else {
            size.min[axis] = mesh_generator(lx as f64 / nrbx as f64, mesh, axis);
            bcs[inner] = BoundaryFlag::Block;
        }
        if lx == nrbx - 1 {
            size.max[axis] = mesh.max[axis];
        } else {
            size.max[axis] = mesh_generator((lx + 1) as f64 / nrbx as f64, mesh, axis);
            bcs[outer] = BoundaryFlag::Block;
        }
    }
    (size, bcs)
}




/**
 * Face positions and spacings of a block along each axis, over the interior
 * and ghost zones. Active axes hold `n + 2 NGHOST + 1` face positions; an
 * inactive axis holds the two faces bounding its single zone.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Coordinates {
    faces: [Vec<f64>; 3],
    spacings: [Vec<f64>; 3],
    ghosts: [i64; 3],
}

impl Coordinates {

    /**
     * Compute the coordinates of a block. Stretched axes evaluate the mesh
     * generator at each face, so that blocks on different levels agree on
     * shared faces. Ghost spacings next to a reflecting face mirror the
     * interior ones.
     */
    pub fn new(
        size: &RegionSize,
        mesh: &RegionSize,
        loc: &LogicalLocation,
        root_level: u32,
        bcs: &[BoundaryFlag; 6],
    ) -> Self {
        let mut faces: [Vec<f64>; 3] = Default::default();
        let mut spacings: [Vec<f64>; 3] = Default::default();
        let mut ghosts = [0; 3];

        for axis in 0..3 {
            let n = size.cells[axis] as i64;

            if mesh.cells[axis] == 1 {
                faces[axis] = vec![size.min[axis], size.max[axis]];
                spacings[axis] = vec![size.max[axis] - size.min[axis]];
                continue;
            }
            let ng = NGHOST as i64;
            let mut x = vec![0.0; (n + 2 * ng + 1) as usize];
            let mut dx = vec![0.0; (n + 2 * ng) as usize];
            let at = |i: i64| (i + ng) as usize;

            if size.ratio[axis] == 1.0 {
                let d = (size.max[axis] - size.min[axis]) / n as f64;
                for i in -ng..=n + ng {
                    x[at(i)] = size.min[axis] + i as f64 * d;
                }
            } else {
                let nroot = (mesh.cells[axis] as i64) << (loc.level - root_level);
                for i in -ng..=n + ng {
                    let rx = (i + loc.lx[axis] * n) as f64 / nroot as f64;
                    x[at(i)] = mesh_generator(rx, mesh, axis);
                }
            }
            x[at(0)] = size.min[axis];
            x[at(n)] = size.max[axis];

            for i in -ng..n + ng {
                dx[at(i)] = x[at(i + 1)] - x[at(i)];
            }
            if bcs[Face::new(axis, false).index()] == BoundaryFlag::Reflect {
                for i in 1..=ng {
                    dx[at(-i)] = dx[at(i - 1)];
                    x[at(-i)] = x[at(-i + 1)] - dx[at(-i)];
                }
            }
            if bcs[Face::new(axis, true).index()] == BoundaryFlag::Reflect {
                for i in 1..=ng {
                    dx[at(n + i - 1)] = dx[at(n - i)];
                    x[at(n + i)] = x[at(n + i - 1)] + dx[at(n + i - 1)];
                }
            }
            faces[axis] = x;
            spacings[axis] = dx;
            ghosts[axis] = ng;
        }
        Self { faces, spacings, ghosts }
    }

    /**
     * Rebuild coordinates from stored face positions and spacings.
     */
    pub fn from_arrays(faces: [Vec<f64>; 3], spacings: [Vec<f64>; 3], ghosts: [i64; 3]) -> Self {
        Self { faces, spacings, ghosts }
    }

    /// Face positions along an axis, starting at the outermost ghost face.
    pub fn faces(&self, axis: usize) -> &[f64] {
        &self.faces[axis]
    }

    pub fn spacings(&self, axis: usize) -> &[f64] {
        &self.spacings[axis]
    }

    pub fn x_face(&self, axis: usize, i: i64) -> f64 {
        self.faces[axis][(i + self.ghosts[axis]) as usize]
    }

    pub fn dx(&self, axis: usize, i: i64) -> f64 {
        self.spacings[axis][(i + self.ghosts[axis]) as usize]
    }

    pub fn x_center(&self, axis: usize, i: i64) -> f64 {
        0.5 * (self.x_face(axis, i) + self.x_face(axis, i + 1))
    }

    pub fn volume(&self, index: [i64; 3]) -> f64 {
        self.dx(0, index[0]) * self.dx(1, index[1]) * self.dx(2, index[2])
    }

    /// Area of the face at the low side of the zone `index`, normal to `axis`.
    pub fn area(&self, axis: usize, index: [i64; 3]) -> f64 {
        (0..3).filter(|&a| a != axis).map(|a| self.dx(a, index[a])).product()
    }
}




/**
 * A block owned by this worker: its place in the tree, its geometry and
 * neighbors, the data it evolves, and its per-round scheduling state.
 */
#[derive(Clone, Debug)]
pub struct MeshBlock {
    pub gid: usize,
    pub lid: usize,
    pub loc: LogicalLocation,
    pub size: RegionSize,
    pub bcs: [BoundaryFlag; 6],
    pub neighbors: NeighborTable,
    pub cost: f64,
    pub coords: Coordinates,

    /// Cell-centered conserved variables, over interior and ghost zones.
    pub cons: Patch,

    /// Face-centered vector field, if enabled.
    pub field: Option<FaceField>,

    /// Fluxes through the interior faces normal to each axis.
    pub flux: [Patch; 3],

    /// Stable time step suggested by the last update.
    pub new_dt: f64,

    pub tasks: TaskState,
    pub boundary: BoundaryStatus,
}

impl MeshBlock {

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gid: usize,
        lid: usize,
        loc: LogicalLocation,
        size: RegionSize,
        bcs: [BoundaryFlag; 6],
        neighbors: NeighborTable,
        coords: Coordinates,
        num_fields: usize,
        face_field: bool,
        cost: f64,
    ) -> Self {
        let active = [true, size.cells[1] > 1, size.cells[2] > 1];
        let interior = interior_space(&size);
        let cells = interior.extend(NGHOST as i64, active);

        debug!(
            "block {} (lid {}) at {:?} level {}: x1 = [{}, {}] x2 = [{}, {}] x3 = [{}, {}]",
            gid, lid, loc.lx, loc.level,
            size.min[0], size.max[0],
            size.min[1], size.max[1],
            size.min[2], size.max[2],
        );

        Self {
            gid,
            lid,
            loc,
            size,
            bcs,
            neighbors,
            cost,
            coords,
            cons: Patch::zeros(cells.clone(), num_fields),
            field: if face_field { Some(FaceField::zeros(&cells)) } else { None },
            flux: [
                Patch::zeros(staggered(&interior, 0), num_fields),
                Patch::zeros(staggered(&interior, 1), num_fields),
                Patch::zeros(staggered(&interior, 2), num_fields),
            ],
            new_dt: f64::MAX,
            tasks: TaskState::default(),
            boundary: BoundaryStatus::default(),
        }
    }

    /// Axes along which the block has more than one zone.
    pub fn active(&self) -> [bool; 3] {
        [true, self.size.cells[1] > 1, self.size.cells[2] > 1]
    }

    /// Interior zones, indexed from zero.
    pub fn interior(&self) -> IndexSpace {
        interior_space(&self.size)
    }

    /// Interior plus ghost zones.
    pub fn cells(&self) -> IndexSpace {
        self.interior().extend(NGHOST as i64, self.active())
    }

    /// Cell count along each axis.
    pub fn shape(&self) -> [i64; 3] {
        [self.size.cells[0] as i64, self.size.cells[1] as i64, self.size.cells[2] as i64]
    }
}

fn interior_space(size: &RegionSize) -> IndexSpace {
    IndexSpace::new(
        [0; 3],
        [size.cells[0] as i64, size.cells[1] as i64, size.cells[2] as i64],
    )
}
