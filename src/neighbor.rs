use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};




/**
 * One of the six faces of a block. The discriminant is the face index used
 * throughout the crate: twice the axis, plus one for the outer side.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Face {
    InnerX1,
    OuterX1,
    InnerX2,
    OuterX2,
    InnerX3,
    OuterX3,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::InnerX1,
        Face::OuterX1,
        Face::InnerX2,
        Face::OuterX2,
        Face::InnerX3,
        Face::OuterX3,
    ];

    pub fn new(axis: usize, outer: bool) -> Self {
        Self::ALL[2 * axis + outer as usize]
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn axis(self) -> usize {
        self.index() / 2
    }

    pub fn is_outer(self) -> bool {
        self.index() % 2 == 1
    }

    /// Step along the face normal: -1 for inner faces and +1 for outer ones.
    pub fn offset(self) -> i64 {
        if self.is_outer() {
            1
        } else {
            -1
        }
    }

    pub fn opposite(self) -> Self {
        Self::new(self.axis(), !self.is_outer())
    }

    /// The two axes lying in the plane of this face, in ascending order.
    pub fn tangential(self) -> [usize; 2] {
        match self.axis() {
            0 => [1, 2],
            1 => [0, 2],
            _ => [0, 1],
        }
    }
}




/**
 * Boundary condition tag attached to each face of a block. Faces shared
 * with another block carry `Block`; the rest carry the mesh tag.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryFlag {
    Block,
    Reflect,
    Outflow,
    Periodic,
}

impl BoundaryFlag {
    pub fn code(self) -> i32 {
        match self {
            BoundaryFlag::Block => -1,
            BoundaryFlag::Reflect => 1,
            BoundaryFlag::Outflow => 2,
            BoundaryFlag::Periodic => 4,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            -1 => Ok(BoundaryFlag::Block),
            1 => Ok(BoundaryFlag::Reflect),
            2 => Ok(BoundaryFlag::Outflow),
            4 => Ok(BoundaryFlag::Periodic),
            _ => Err(Error::config(format!("unknown boundary flag {}", code))),
        }
    }
}




/**
 * Where a neighboring block lives.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NeighborBlock {
    pub rank: usize,
    pub level: u32,
    pub gid: usize,
    pub lid: usize,
}




/**
 * What lies across one face of a block. A finer face holds one entry per
 * half of the face plane, indexed by `sub_face_index`; in 2D only the first
 * two slots are ever populated.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceNeighbor {
    Boundary,
    Same(NeighborBlock),
    Coarser(NeighborBlock),
    Finer([Option<NeighborBlock>; 4]),
}

impl Default for FaceNeighbor {
    fn default() -> Self {
        FaceNeighbor::Boundary
    }
}

/// Map the child offsets along a face's two tangential axes to a slot index.
pub fn sub_face_index(t: [usize; 2]) -> usize {
    t[0] + 2 * t[1]
}

/// Inverse of `sub_face_index`.
pub fn sub_face_offsets(index: usize) -> [usize; 2] {
    [index & 1, index >> 1]
}




/**
 * A single neighbor record, flattened out of the table.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    pub face: Face,
    /// Neighbor level minus own level: -1, 0, or 1.
    pub level_diff: i32,
    /// Sub-face slot for a finer neighbor, and zero otherwise.
    pub sub_face: usize,
    pub block: NeighborBlock,
}




/**
 * The neighbor records for all six faces of a block.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeighborTable {
    faces: [FaceNeighbor; 6],
}

impl NeighborTable {
    pub fn get(&self, face: Face) -> &FaceNeighbor {
        &self.faces[face.index()]
    }

    pub fn set(&mut self, face: Face, neighbor: FaceNeighbor) {
        self.faces[face.index()] = neighbor
    }

    pub fn is_boundary(&self, face: Face) -> bool {
        matches!(self.get(face), FaceNeighbor::Boundary)
    }

    /// Iterate over every populated neighbor record.
    pub fn links(&self) -> impl Iterator<Item = Link> + '_ {
        Face::ALL.iter().flat_map(move |&face| {
            let records: Vec<Link> = match self.get(face) {
                FaceNeighbor::Boundary => Vec::new(),
                FaceNeighbor::Same(block) => vec![Link { face, level_diff: 0, sub_face: 0, block: *block }],
                FaceNeighbor::Coarser(block) => vec![Link { face, level_diff: -1, sub_face: 0, block: *block }],
                FaceNeighbor::Finer(blocks) => blocks
                    .iter()
                    .enumerate()
                    .filter_map(|(sub_face, b)| b.map(|block| Link { face, level_diff: 1, sub_face, block }))
                    .collect(),
            };
            records.into_iter()
        })
    }

    /// Apply a function to every neighbor record in place. Used on restart
    /// to re-derive rank and local id from a fresh partition.
    pub fn update_blocks<F: FnMut(&mut NeighborBlock)>(&mut self, mut f: F) {
        for face in self.faces.iter_mut() {
            match face {
                FaceNeighbor::Boundary => {}
                FaceNeighbor::Same(block) | FaceNeighbor::Coarser(block) => f(block),
                FaceNeighbor::Finer(blocks) => {
                    for block in blocks.iter_mut().flatten() {
                        f(block)
                    }
                }
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn block(gid: usize) -> NeighborBlock {
        NeighborBlock { rank: 0, level: 1, gid, lid: gid }
    }

    #[test]
    fn faces_know_their_geometry() {
        assert_eq!(Face::new(1, true), Face::OuterX2);
        assert_eq!(Face::OuterX2.index(), 3);
        assert_eq!(Face::OuterX2.opposite(), Face::InnerX2);
        assert_eq!(Face::InnerX3.tangential(), [0, 1]);
        assert_eq!(Face::InnerX1.offset(), -1);
    }

    #[test]
    fn boundary_flag_codes_round_trip() {
        for flag in &[BoundaryFlag::Block, BoundaryFlag::Reflect, BoundaryFlag::Outflow, BoundaryFlag::Periodic] {
            assert_eq!(BoundaryFlag::from_code(flag.code()).unwrap(), *flag);
        }
        assert!(BoundaryFlag::from_code(3).is_err());
    }

    #[test]
    fn links_flatten_finer_faces() {
        let mut table = NeighborTable::default();
        table.set(Face::InnerX1, FaceNeighbor::Same(block(0)));
        table.set(Face::OuterX1, FaceNeighbor::Finer([Some(block(1)), Some(block(2)), None, None]));

        let links: Vec<_> = table.links().collect();
        assert_eq!(links.len(), 3);
        assert_eq!(links[1].sub_face, 0);
        assert_eq!(links[2].sub_face, 1);
        assert_eq!(links[2].block.gid, 2);
        assert!(table.is_boundary(Face::OuterX3));
    }
}
