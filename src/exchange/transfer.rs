//! Index-space geometry of the data moved across a block face, and the
//! resampling between levels. All blocks have the same zone counts, so a
//! sender can work out the receiver's ghost region from its own shape.
//!
//! Cells are indexed from zero at the low edge of a block's interior. A
//! face-field component along axis `a` is indexed by face planes along `a`:
//! plane `i` is the low face of cell `i`.

use crate::config::NGHOST;
use crate::index_space::IndexSpace;
use crate::mesh_block::Coordinates;
use crate::neighbor::Face;
use crate::patch::Patch;

const NG: i64 = NGHOST as i64;




/**
 * The centering of the data being moved.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stagger {
    Cell,
    Face(usize),
}




/**
 * Zone counts and active axes of a block; identical on every block.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub cells: [i64; 3],
    pub active: [bool; 3],
}

impl Shape {
    fn halves(&self, face: Face, octant: [usize; 3]) -> [Option<i64>; 3] {
        let mut result = [None; 3];
        for &t in &face.tangential() {
            if self.active[t] {
                result[t] = Some(octant[t] as i64)
            }
        }
        result
    }
}




/**
 * A slab of zones next to `face`: inside the block when `ghost` is false,
 * and in the ghost zones beyond the face when it is true. Tangential axes
 * with a half selected cover only that half of the interior.
 */
fn slab(shape: &Shape, face: Face, depth: i64, ghost: bool, half: [Option<i64>; 3], stagger: Stagger) -> IndexSpace {
    let n = face.axis();
    let cells = shape.cells;
    let mut lo = [0; 3];
    let mut hi = cells;

    let (a, b) = match (face.is_outer(), ghost) {
        (true, true) => (cells[n], cells[n] + depth),
        (true, false) => (cells[n] - depth, cells[n]),
        (false, true) => (-depth, 0),
        (false, false) => (0, depth),
    };
    lo[n] = a;
    hi[n] = b;

    for t in 0..3 {
        if let Some(h) = half[t] {
            lo[t] = h * cells[t] / 2;
            hi[t] = lo[t] + cells[t] / 2;
        }
    }
    if let Stagger::Face(c) = stagger {
        if c == n {
            // the shared face plane belongs to neither slab
            if face.is_outer() == ghost {
                lo[n] += 1;
                hi[n] += 1;
            }
        } else {
            hi[c] += 1;
        }
    }
    IndexSpace::new(lo, hi)
}




/**
 * How a destination index along one axis picks its source indices.
 */
#[derive(Clone, Copy, Debug)]
enum AxisMap {
    /// Source is `dest - shift`.
    Shift(i64),
    /// Sources are `2 (dest - shift)` and the zone after, weighted by width.
    Pair(i64),
    /// Source is the fine plane `2 (dest - shift)`.
    Plane(i64),
    /// Source is the coarse zone `floor(dest / 2) + offset`.
    Half(i64),
    /// Even planes coincide with the coarse plane `dest / 2 + offset`; odd
    /// planes take the mean of the two coarse planes either side.
    HalfPlane(i64),
}

impl AxisMap {
    fn taps(self, axis: usize, dest: i64, coords: &Coordinates) -> ([(i64, f64); 2], usize) {
        match self {
            AxisMap::Shift(shift) => ([(dest - shift, 1.0), (0, 0.0)], 1),
            AxisMap::Plane(shift) => ([(2 * (dest - shift), 1.0), (0, 0.0)], 1),
            AxisMap::Pair(shift) => {
                let i = 2 * (dest - shift);
                ([(i, coords.dx(axis, i)), (i + 1, coords.dx(axis, i + 1))], 2)
            }
            AxisMap::Half(offset) => ([(dest.div_euclid(2) + offset, 1.0), (0, 0.0)], 1),
            AxisMap::HalfPlane(offset) => {
                let c = dest.div_euclid(2) + offset;
                if dest.rem_euclid(2) == 0 {
                    ([(c, 1.0), (0, 0.0)], 1)
                } else {
                    ([(c, 0.5), (c + 1, 0.5)], 2)
                }
            }
        }
    }
}




/**
 * For every index of `dest`, in memory order and field by field, push the
 * weighted mean of the source values selected by `maps`.
 */
fn gather(src: &Patch, coords: &Coordinates, dest: &IndexSpace, maps: [AxisMap; 3], out: &mut Vec<f64>) {
    for q in 0..src.num_fields() {
        for d in dest.iter() {
            let (t0, n0) = maps[0].taps(0, d[0], coords);
            let (t1, n1) = maps[1].taps(1, d[1], coords);
            let (t2, n2) = maps[2].taps(2, d[2], coords);
            let mut sum = 0.0;
            let mut weight = 0.0;

            for &(k, wk) in &t2[..n2] {
                for &(j, wj) in &t1[..n1] {
                    for &(i, wi) in &t0[..n0] {
                        let w = wi * wj * wk;
                        sum += w * src.get(q, [i, j, k]);
                        weight += w;
                    }
                }
            }
            out.push(sum / weight)
        }
    }
}




// ============================================================================
// Same level

/**
 * Interior zones sent to a same-level neighbor across `face`.
 */
pub fn same_level_source(shape: &Shape, face: Face, stagger: Stagger) -> IndexSpace {
    slab(shape, face, NG, false, [None; 3], stagger)
}

/**
 * Ghost zones filled by a same-level neighbor across `face`.
 */
pub fn same_level_target(shape: &Shape, face: Face, stagger: Stagger) -> IndexSpace {
    slab(shape, face, NG, true, [None; 3], stagger)
}




// ============================================================================
// Fine to coarse

/**
 * Ghost zones of a coarse block, across its `face`, filled by the finer
 * neighbor at tangential octant `octant`.
 */
pub fn coarser_target(shape: &Shape, face: Face, octant: [usize; 3], stagger: Stagger) -> IndexSpace {
    slab(shape, face, NG, true, shape.halves(face, octant), stagger)
}

/**
 * Restrict the data of a fine block at `octant`, next to its `face`, onto
 * the ghost zones of the coarser neighbor across that face. Cells are
 * averaged by volume and face components by area.
 */
pub fn restrict_to_coarser(
    src: &Patch,
    coords: &Coordinates,
    shape: &Shape,
    face: Face,
    octant: [usize; 3],
    stagger: Stagger,
    out: &mut Vec<f64>,
) {
    let dest = coarser_target(shape, face.opposite(), octant, stagger);
    let n = face.axis();
    let mut maps = [AxisMap::Shift(0); 3];

    for axis in 0..3 {
        if !shape.active[axis] {
            continue;
        }
        let shift = if axis == n {
            if face.is_outer() {
                -shape.cells[n] / 2
            } else {
                shape.cells[n]
            }
        } else {
            octant[axis] as i64 * shape.cells[axis] / 2
        };
        maps[axis] = match stagger {
            Stagger::Face(c) if c == axis => AxisMap::Plane(shift),
            _ => AxisMap::Pair(shift),
        };
    }
    gather(src, coords, &dest, maps, out)
}




// ============================================================================
// Coarse to fine

/**
 * Zones of a coarse block, next to its `face`, needed to fill the ghost
 * zones of the finer neighbor at tangential octant `octant`.
 */
pub fn prolongation_source(shape: &Shape, face: Face, octant: [usize; 3], stagger: Stagger) -> IndexSpace {
    let cells = slab(shape, face, NG / 2, false, shape.halves(face, octant), Stagger::Cell);

    match stagger {
        Stagger::Cell => cells,
        Stagger::Face(c) => {
            let mut end = cells.end();
            end[c] += 1;
            IndexSpace::new(cells.start(), end)
        }
    }
}

/**
 * Fill the ghost zones of a fine block at `octant`, across its `face`,
 * from data packed by the coarser neighbor over `prolongation_source`.
 * Cells take the value of the coarse zone containing them. Returns the
 * number of values consumed, or None if `data` is too short.
 */
pub fn prolong_from_coarser(
    dst: &mut Patch,
    coords: &Coordinates,
    shape: &Shape,
    face: Face,
    octant: [usize; 3],
    stagger: Stagger,
    data: &[f64],
) -> Option<usize> {
    let source = prolongation_source(shape, face.opposite(), octant, stagger);
    let count = source.len() * dst.num_fields();
    let coarse = data.get(..count).and_then(|d| Patch::from_vec(source, dst.num_fields(), d.to_vec()))?;
    let dest = same_level_target(shape, face, stagger);
    let n = face.axis();
    let mut maps = [AxisMap::Shift(0); 3];

    for axis in 0..3 {
        if !shape.active[axis] {
            continue;
        }
        let offset = if axis == n {
            if face.is_outer() {
                -shape.cells[n] / 2
            } else {
                shape.cells[n]
            }
        } else {
            octant[axis] as i64 * shape.cells[axis] / 2
        };
        maps[axis] = match stagger {
            Stagger::Face(c) if c == axis => AxisMap::HalfPlane(offset),
            _ => AxisMap::Half(offset),
        };
    }

    let mut values = Vec::with_capacity(dest.len() * dst.num_fields());
    gather(&coarse, coords, &dest, maps, &mut values);
    dst.unpack(&dest, &values)?;
    Some(count)
}




// ============================================================================
// Flux correction

fn flux_plane(shape: &Shape, face: Face) -> i64 {
    if face.is_outer() {
        shape.cells[face.axis()]
    } else {
        0
    }
}

/**
 * Face fluxes of a coarse block on its `face` plane, overwritten by the
 * finer neighbor at tangential octant `octant`.
 */
pub fn flux_target(shape: &Shape, face: Face, octant: [usize; 3]) -> IndexSpace {
    let n = face.axis();
    let p = flux_plane(shape, face);
    let cells = slab(shape, face, 1, false, shape.halves(face, octant), Stagger::Cell);
    cells.with_range(n, p..p + 1)
}

/**
 * Area-weighted average of a fine block's fluxes on its `face` plane, laid
 * out over the coarse neighbor's `flux_target`.
 */
pub fn restrict_flux(src: &Patch, coords: &Coordinates, shape: &Shape, face: Face, octant: [usize; 3], out: &mut Vec<f64>) {
    let dest = flux_target(shape, face.opposite(), octant);
    let n = face.axis();
    let mut maps = [AxisMap::Shift(0); 3];

    maps[n] = AxisMap::Shift(flux_plane(shape, face.opposite()) - flux_plane(shape, face));

    for &t in &face.tangential() {
        if shape.active[t] {
            maps[t] = AxisMap::Pair(octant[t] as i64 * shape.cells[t] / 2);
        }
    }
    gather(src, coords, &dest, maps, out)
}
