use crate::error::{Error, Result};
use crate::mesh_block::{Coordinates, MeshBlock};
use crate::neighbor::{sub_face_offsets, BoundaryFlag, Face, Link};
use crate::patch::Patch;

use super::transfer::{self, Shape, Stagger};
use super::{Postmaster, Quantity, Tag};




/**
 * Which of a block's expected messages have arrived this round, for each
 * quantity, face, and sub-face.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundaryStatus {
    received: [[[bool; 4]; 6]; 3],
}

impl BoundaryStatus {
    pub fn clear(&mut self, quantity: Quantity) {
        self.received[quantity.index()] = Default::default()
    }

    pub fn is_received(&self, quantity: Quantity, face: Face, sub_face: usize) -> bool {
        self.received[quantity.index()][face.index()][sub_face]
    }

    fn mark(&mut self, quantity: Quantity, face: Face, sub_face: usize) {
        self.received[quantity.index()][face.index()][sub_face] = true
    }
}




/**
 * Tangential octant bits of the finer block on sub-face `sub_face` of `face`.
 */
fn sub_face_octant(face: Face, sub_face: usize) -> [usize; 3] {
    let t = face.tangential();
    let s = sub_face_offsets(sub_face);
    let mut octant = [0; 3];
    octant[t[0]] = s[0];
    octant[t[1]] = s[1];
    octant
}

fn shape_of(block: &MeshBlock) -> Shape {
    Shape {
        cells: block.shape(),
        active: block.active(),
    }
}

/// Whether a quantity is exchanged across a link, from the sender's side.
fn sends_over(quantity: Quantity, link: &Link) -> bool {
    match quantity {
        Quantity::Flux => link.level_diff == -1,
        _ => true,
    }
}

/// Whether a quantity is expected across a link, from the receiver's side.
fn receives_over(quantity: Quantity, link: &Link) -> bool {
    match quantity {
        Quantity::Flux => link.level_diff == 1,
        _ => true,
    }
}




/**
 * Pack one patch for the neighbor on the other side of `link`: a plain copy
 * for a same-level neighbor, a restriction for a coarser one, and the
 * coarse zones it will prolong for a finer one.
 */
fn pack_patch(block: &MeshBlock, patch: &Patch, link: &Link, stagger: Stagger, out: &mut Vec<f64>) {
    let shape = shape_of(block);

    match link.level_diff {
        0 => patch.pack(&transfer::same_level_source(&shape, link.face, stagger), out),
        -1 => transfer::restrict_to_coarser(
            patch,
            &block.coords,
            &shape,
            link.face,
            block.loc.octant(),
            stagger,
            out,
        ),
        _ => {
            let octant = sub_face_octant(link.face, link.sub_face);
            patch.pack(&transfer::prolongation_source(&shape, link.face, octant, stagger), out)
        }
    }
}

/**
 * Number of values a patch with `num_fields` fields expects from the
 * neighbor on the other side of `link`.
 */
fn incoming_len(shape: &Shape, octant: [usize; 3], link: &Link, stagger: Stagger, num_fields: usize) -> usize {
    let region = match link.level_diff {
        0 => transfer::same_level_target(shape, link.face, stagger),
        1 => transfer::coarser_target(shape, link.face, sub_face_octant(link.face, link.sub_face), stagger),
        _ => transfer::prolongation_source(shape, link.face.opposite(), octant, stagger),
    };
    region.len() * num_fields
}

/**
 * Unpack one patch from the neighbor on the other side of `link` into the
 * ghost zones. Returns the number of values consumed, or None if `data` is
 * too short.
 */
fn unpack_patch(
    patch: &mut Patch,
    coords: &Coordinates,
    shape: &Shape,
    octant: [usize; 3],
    link: &Link,
    stagger: Stagger,
    data: &[f64],
) -> Option<usize> {
    match link.level_diff {
        0 => patch.unpack(&transfer::same_level_target(shape, link.face, stagger), data),
        1 => {
            let sender = sub_face_octant(link.face, link.sub_face);
            patch.unpack(&transfer::coarser_target(shape, link.face, sender, stagger), data)
        }
        _ => transfer::prolong_from_coarser(patch, coords, shape, link.face, octant, stagger, data),
    }
}




/**
 * Send a quantity to every neighbor that expects it, and reset the block's
 * receive flags for it.
 */
pub fn send_boundaries(block: &mut MeshBlock, quantity: Quantity, post: &Postmaster) -> Result<()> {
    block.boundary.clear(quantity);

    for link in block.neighbors.links().filter(|l| sends_over(quantity, l)) {
        let mut data = Vec::new();

        match quantity {
            Quantity::Cons => pack_patch(block, &block.cons, &link, Stagger::Cell, &mut data),
            Quantity::Field => {
                let field = block
                    .field
                    .as_ref()
                    .ok_or_else(|| Error::config("face field exchange on a block without a face field"))?;

                for (c, component) in field.x.iter().enumerate() {
                    pack_patch(block, component, &link, Stagger::Face(c), &mut data)
                }
            }
            Quantity::Flux => {
                let shape = shape_of(block);
                let axis = link.face.axis();
                transfer::restrict_flux(
                    &block.flux[axis],
                    &block.coords,
                    &shape,
                    link.face,
                    block.loc.octant(),
                    &mut data,
                )
            }
        }
        let tag = Tag {
            src_rank: post.rank(),
            src_lid: block.lid,
            dst_face: link.face.opposite(),
            quantity,
        };
        post.post(link.block.rank, link.block.lid, tag, data)?;
    }
    Ok(())
}




/**
 * Collect whichever of a quantity's expected messages have arrived and
 * apply them. Returns true once every expected message has been applied.
 */
pub fn receive_boundaries(block: &mut MeshBlock, quantity: Quantity, post: &Postmaster) -> Result<bool> {
    let shape = shape_of(block);
    let octant = block.loc.octant();
    let mut complete = true;
    let links: Vec<Link> = block.neighbors.links().filter(|l| receives_over(quantity, l)).collect();

    for link in links {
        if block.boundary.is_received(quantity, link.face, link.sub_face) {
            continue;
        }
        let tag = Tag {
            src_rank: link.block.rank,
            src_lid: link.block.lid,
            dst_face: link.face,
            quantity,
        };
        let data = match post.take(block.lid, tag)? {
            Some(data) => data,
            None => {
                complete = false;
                continue;
            }
        };
        let expected = match quantity {
            Quantity::Cons => incoming_len(&shape, octant, &link, Stagger::Cell, block.cons.num_fields()),
            Quantity::Field => (0..3).map(|c| incoming_len(&shape, octant, &link, Stagger::Face(c), 1)).sum(),
            Quantity::Flux => {
                let sender = sub_face_octant(link.face, link.sub_face);
                transfer::flux_target(&shape, link.face, sender).len() * block.flux[link.face.axis()].num_fields()
            }
        };
        if data.len() != expected {
            return Err(Error::structure(format!(
                "block {} expected {} {:?} values across {:?} from block {} but got {}",
                block.gid,
                expected,
                quantity,
                link.face,
                link.block.gid,
                data.len()
            )));
        }
        let used = match quantity {
            Quantity::Cons => unpack_patch(&mut block.cons, &block.coords, &shape, octant, &link, Stagger::Cell, &data),
            Quantity::Field => {
                let field = block
                    .field
                    .as_mut()
                    .ok_or_else(|| Error::config("face field exchange on a block without a face field"))?;
                let mut used = Some(0);

                for (c, component) in field.x.iter_mut().enumerate() {
                    let rest = used.and_then(|n| data.get(n..)).unwrap_or_default();
                    used = used.zip(unpack_patch(component, &block.coords, &shape, octant, &link, Stagger::Face(c), rest)).map(|(a, b)| a + b);
                }
                used
            }
            Quantity::Flux => {
                let sender = sub_face_octant(link.face, link.sub_face);
                let region = transfer::flux_target(&shape, link.face, sender);
                block.flux[link.face.axis()].unpack(&region, &data)
            }
        };
        if used != Some(expected) {
            return Err(Error::structure(format!(
                "block {} could not apply {:?} data across {:?} from block {}",
                block.gid, quantity, link.face, link.block.gid
            )));
        }
        block.boundary.mark(quantity, link.face, link.sub_face);
    }
    Ok(complete)
}




/**
 * Index of the zone (or face plane, for `normal_plane`) that a ghost at
 * `i` takes its value from, next to a physical boundary on `face`.
 */
fn boundary_source(face: Face, n: i64, i: i64, flag: BoundaryFlag, normal_plane: bool) -> i64 {
    match (flag, face.is_outer(), normal_plane) {
        (BoundaryFlag::Reflect, true, false) => 2 * n - 1 - i,
        (BoundaryFlag::Reflect, false, false) => -1 - i,
        (BoundaryFlag::Reflect, true, true) => 2 * n - i,
        (BoundaryFlag::Reflect, false, true) => -i,
        (_, true, false) => n - 1,
        (_, false, false) => 0,
        (_, true, true) => n,
        (_, false, true) => 0,
    }
}

fn fill_patch(patch: &mut Patch, shape: &Shape, face: Face, flag: BoundaryFlag, stagger: Stagger) {
    let axis = face.axis();
    let n = shape.cells[axis];
    let normal_plane = stagger == Stagger::Face(axis);
    let sign = if normal_plane && flag == BoundaryFlag::Reflect { -1.0 } else { 1.0 };
    let region = transfer::same_level_target(shape, face, stagger);

    for q in 0..patch.num_fields() {
        for index in region.iter() {
            let mut source = index;
            source[axis] = boundary_source(face, n, index[axis], flag, normal_plane);
            let value = sign * patch.get(q, source);
            patch.set(q, index, value);
        }
    }
}

/**
 * Fill the ghost zones behind every physical boundary face of a block.
 * Outflow faces copy the edge zone outward; reflecting faces mirror the
 * interior and flip the sign of the face-normal field component. Edge and
 * corner ghosts are left alone.
 */
pub fn apply_physical_boundaries(block: &mut MeshBlock) -> Result<()> {
    let shape = shape_of(block);

    for &face in &Face::ALL {
        if !shape.active[face.axis()] || !block.neighbors.is_boundary(face) {
            continue;
        }
        let flag = block.bcs[face.index()];

        match flag {
            BoundaryFlag::Outflow | BoundaryFlag::Reflect => {}
            _ => {
                return Err(Error::structure(format!(
                    "block {} has no neighbor across {:?} but its boundary is {:?}",
                    block.gid, face, flag
                )))
            }
        }
        fill_patch(&mut block.cons, &shape, face, flag, Stagger::Cell);

        if let Some(field) = block.field.as_mut() {
            for (c, component) in field.x.iter_mut().enumerate() {
                fill_patch(component, &shape, face, flag, Stagger::Face(c))
            }
        }
    }
    Ok(())
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::config::RegionSize;
    use crate::logical_location::LogicalLocation;
    use crate::message::LocalCommunicator;
    use crate::neighbor::{FaceNeighbor, NeighborBlock, NeighborTable};

    fn block(bcs: [BoundaryFlag; 6], face_field: bool) -> MeshBlock {
        let size = RegionSize {
            min: [0.0; 3],
            max: [1.0; 3],
            ratio: [1.0; 3],
            cells: [4, 4, 1],
        };
        let loc = LogicalLocation::new([0, 0, 0], 0);
        let coords = Coordinates::new(&size, &size, &loc, 0, &bcs);
        let mut block = MeshBlock::new(0, 0, loc, size, bcs, NeighborTable::default(), coords, 1, face_field, 1.0);

        for index in block.interior().iter() {
            block.cons.set(0, index, (index[0] + 10 * index[1]) as f64);
        }
        block
    }

    #[test]
    fn outflow_copies_the_edge_zone() {
        let mut b = block([BoundaryFlag::Outflow; 6], false);
        apply_physical_boundaries(&mut b).unwrap();
        assert_eq!(b.cons.get(0, [-1, 2, 0]), 20.0);
        assert_eq!(b.cons.get(0, [-2, 2, 0]), 20.0);
        assert_eq!(b.cons.get(0, [5, 1, 0]), 13.0);
        assert_eq!(b.cons.get(0, [1, -2, 0]), 1.0);
        assert_eq!(b.cons.get(0, [-1, -1, 0]), 0.0);
    }

    #[test]
    fn reflection_mirrors_and_flips_the_normal_field() {
        let mut b = block([BoundaryFlag::Reflect; 6], true);
        if let Some(field) = b.field.as_mut() {
            for index in field.x[0].space().clone().iter() {
                field.x[0].set(0, index, index[0] as f64 + 1.0);
            }
        }
        apply_physical_boundaries(&mut b).unwrap();
        assert_eq!(b.cons.get(0, [-1, 0, 0]), 0.0);
        assert_eq!(b.cons.get(0, [-2, 0, 0]), 1.0);
        assert_eq!(b.cons.get(0, [4, 3, 0]), 33.0);
        assert_eq!(b.cons.get(0, [5, 3, 0]), 32.0);

        let bx = &b.field.as_ref().unwrap().x[0];
        assert_eq!(bx.get(0, [-1, 0, 0]), -2.0);
        assert_eq!(bx.get(0, [-2, 0, 0]), -3.0);
        assert_eq!(bx.get(0, [5, 0, 0]), -4.0);
    }

    #[test]
    fn periodic_face_without_neighbor_is_an_error() {
        let mut bcs = [BoundaryFlag::Outflow; 6];
        bcs[2] = BoundaryFlag::Periodic;
        bcs[3] = BoundaryFlag::Periodic;
        assert!(apply_physical_boundaries(&mut block(bcs, false)).is_err());
    }

    fn postmaster() -> Postmaster {
        Postmaster::new(Box::new(LocalCommunicator::group(1).pop().unwrap()))
    }

    fn neighbor(gid: usize, level: u32) -> NeighborBlock {
        NeighborBlock { rank: 0, level, gid, lid: gid }
    }

    fn cons_tag(src_lid: usize) -> Tag {
        Tag { src_rank: 0, src_lid, dst_face: Face::OuterX1, quantity: Quantity::Cons }
    }

    #[test]
    fn short_message_is_rejected_before_unpacking() {
        let mut b = block([BoundaryFlag::Outflow; 6], false);
        b.neighbors.set(Face::OuterX1, FaceNeighbor::Same(neighbor(1, 0)));
        let before = b.cons.clone();
        let post = postmaster();

        post.post(0, 0, cons_tag(1), vec![1.0, 2.0]).unwrap();

        match receive_boundaries(&mut b, Quantity::Cons, &post) {
            Err(Error::Structure(_)) => {}
            other => panic!("expected a structure error, got {:?}", other),
        }
        assert_eq!(b.cons, before);
        assert!(!b.boundary.is_received(Quantity::Cons, Face::OuterX1, 0));
    }

    #[test]
    fn coarse_block_waits_for_both_finer_neighbors() {
        let mut coarse = block([BoundaryFlag::Outflow; 6], false);
        coarse.neighbors.set(Face::OuterX1, FaceNeighbor::Finer([Some(neighbor(1, 1)), Some(neighbor(2, 1)), None, None]));
        let fine = block([BoundaryFlag::Outflow; 6], false);
        let shape = shape_of(&coarse);
        let post = postmaster();

        let restricted: Vec<Vec<f64>> = (0..2)
            .map(|s| {
                let mut out = Vec::new();
                transfer::restrict_to_coarser(&fine.cons, &fine.coords, &shape, Face::InnerX1, [0, s, 0], Stagger::Cell, &mut out);
                out
            })
            .collect();
        let ghosts = |b: &MeshBlock, s: usize| {
            let mut out = Vec::new();
            b.cons.pack(&transfer::coarser_target(&shape, Face::OuterX1, [0, s, 0], Stagger::Cell), &mut out);
            out
        };

        post.post(0, 0, cons_tag(1), restricted[0].clone()).unwrap();
        assert!(!receive_boundaries(&mut coarse, Quantity::Cons, &post).unwrap());
        assert!(coarse.boundary.is_received(Quantity::Cons, Face::OuterX1, 0));
        assert!(!coarse.boundary.is_received(Quantity::Cons, Face::OuterX1, 1));
        assert_eq!(ghosts(&coarse, 0), restricted[0]);
        assert!(ghosts(&coarse, 1).iter().all(|&x| x == 0.0));

        post.post(0, 0, cons_tag(2), restricted[1].clone()).unwrap();
        assert!(receive_boundaries(&mut coarse, Quantity::Cons, &post).unwrap());
        assert!(coarse.boundary.is_received(Quantity::Cons, Face::OuterX1, 1));
        assert_eq!(ghosts(&coarse, 0), restricted[0]);
        assert_eq!(ghosts(&coarse, 1), restricted[1]);
        assert_ne!(restricted[0], restricted[1]);
    }
}
