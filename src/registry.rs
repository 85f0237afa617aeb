use log::debug;

use crate::block_tree::{BlockTree, Lookup, NodeId};
use crate::config::MeshConfig;
use crate::error::{Error, Result};
use crate::logical_location::LogicalLocation;
use crate::mesh_block::{block_size_and_boundaries, Coordinates, MeshBlock};
use crate::neighbor::{sub_face_index, BoundaryFlag, Face, FaceNeighbor, NeighborBlock, NeighborTable};
use crate::partition::PartitionPlan;




/**
 * The blocks owned by one worker, stored in local id order. A block's local
 * id is its position in the list; neighbors in the list are found by index
 * arithmetic rather than links.
 */
#[derive(Clone, Debug, Default)]
pub struct BlockList {
    blocks: Vec<MeshBlock>,
}




// ============================================================================
impl BlockList {

    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Build every block a rank owns under the given plan, querying the tree
     * for the neighbors across each face.
     */
    pub fn build(config: &MeshConfig, tree: &BlockTree, plan: &PartitionPlan, costs: &[f64], rank: usize) -> Result<Self> {
        let leaves = tree.leaves();
        let mesh = config.mesh_region();
        let mut list = Self::new();

        for gid in plan.range(rank) {
            let loc = leaves[gid];
            let (size, bcs) = block_size_and_boundaries(
                &loc,
                &mesh,
                &config.boundaries,
                config.block_cells,
                tree.root_blocks(),
                tree.root_level(),
            );
            let neighbors = find_neighbors(tree, plan, &loc, &bcs, &config.boundaries)?;
            let coords = Coordinates::new(&size, &mesh, &loc, tree.root_level(), &bcs);
            let lid = plan.lid_of(gid);

            list.push(MeshBlock::new(
                gid,
                lid,
                loc,
                size,
                bcs,
                neighbors,
                coords,
                config.num_variables,
                config.face_field,
                costs[gid],
            ))?;
        }
        debug!("rank {} owns {} blocks", rank, list.len());
        Ok(list)
    }

    /**
     * Append a block. Its local id must be the next free one.
     */
    pub fn push(&mut self, block: MeshBlock) -> Result<()> {
        if block.lid != self.blocks.len() {
            return Err(Error::structure(format!(
                "block {} has local id {} but belongs at {}",
                block.gid,
                block.lid,
                self.blocks.len()
            )));
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, lid: usize) -> Option<&MeshBlock> {
        self.blocks.get(lid)
    }

    pub fn get_mut(&mut self, lid: usize) -> Option<&mut MeshBlock> {
        self.blocks.get_mut(lid)
    }

    /// Local id of the block before `lid`, if any.
    pub fn prev(&self, lid: usize) -> Option<usize> {
        lid.checked_sub(1).filter(|&p| p < self.blocks.len())
    }

    /// Local id of the block after `lid`, if any.
    pub fn next(&self, lid: usize) -> Option<usize> {
        Some(lid + 1).filter(|&n| n < self.blocks.len())
    }

    /// Find a block by its global id.
    pub fn by_gid(&self, gid: usize) -> Option<&MeshBlock> {
        let first = self.blocks.first()?.gid;
        gid.checked_sub(first).and_then(|lid| self.blocks.get(lid))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeshBlock> {
        self.blocks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MeshBlock> {
        self.blocks.iter_mut()
    }

    pub fn as_mut_slice(&mut self) -> &mut [MeshBlock] {
        &mut self.blocks
    }
}




fn neighbor_block(tree: &BlockTree, plan: &PartitionPlan, id: NodeId) -> Result<NeighborBlock> {
    let gid = tree.gid(id).ok_or_else(|| {
        Error::structure(format!("neighbor leaf {:?} has no global id", tree.loc(id)))
    })?;
    Ok(NeighborBlock {
        rank: plan.rank_of(gid),
        level: tree.loc(id).level,
        gid,
        lid: plan.lid_of(gid),
    })
}

/**
 * Work out what lies across each face of the block at `loc`. Faces along
 * inactive axes, and faces on a non-periodic domain edge, are physical
 * boundaries. A domain edge behind a face tagged `Block` means the tags and
 * the tree disagree.
 */
pub fn find_neighbors(
    tree: &BlockTree,
    plan: &PartitionPlan,
    loc: &LogicalLocation,
    bcs: &[BoundaryFlag; 6],
    mesh_bcs: &[BoundaryFlag; 6],
) -> Result<NeighborTable> {
    let active = tree.active();
    let mut table = NeighborTable::default();

    for &face in &Face::ALL {
        if !active[face.axis()] {
            continue;
        }
        let periodic = mesh_bcs[face.index()] == BoundaryFlag::Periodic;

        let id = match tree.find_neighbor(loc, face, periodic)? {
            Lookup::DomainEdge => {
                if bcs[face.index()] == BoundaryFlag::Block {
                    return Err(Error::structure(format!(
                        "block {:?} is tagged as having a neighbor across {:?}, but none exists",
                        loc, face
                    )));
                }
                continue;
            }
            Lookup::Node(id) => id,
        };
        let level = tree.loc(id).level;

        let record = if tree.is_leaf(id) && level == loc.level {
            FaceNeighbor::Same(neighbor_block(tree, plan, id)?)
        } else if tree.is_leaf(id) {
            FaceNeighbor::Coarser(neighbor_block(tree, plan, id)?)
        } else {
            let t = face.tangential();
            let n1 = if active[t[0]] { 2 } else { 1 };
            let n2 = if active[t[1]] { 2 } else { 1 };
            let mut slots = [None; 4];

            for s2 in 0..n2 {
                for s1 in 0..n1 {
                    let mut ox = [0; 3];
                    ox[face.axis()] = if face.is_outer() { 0 } else { 1 };
                    ox[t[0]] = s1;
                    ox[t[1]] = s2;

                    let child = tree.leaf_child(id, ox).ok_or_else(|| {
                        Error::structure(format!(
                            "finer neighbor of {:?} across {:?} is missing octant {:?}",
                            loc, face, ox
                        ))
                    })?;
                    slots[sub_face_index([s1, s2])] = Some(neighbor_block(tree, plan, child)?);
                }
            }
            FaceNeighbor::Finer(slots)
        };
        table.set(face, record);
    }
    Ok(table)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::config::{MeshConfig, RefinementMode, RefinementRegion};

    fn config_8x8(bcs: BoundaryFlag) -> MeshConfig {
        MeshConfig {
            mesh_cells: [8, 8, 1],
            block_cells: [4, 4, 1],
            boundaries: [bcs; 6],
            cfl_number: 0.3,
            ..MeshConfig::default()
        }
    }

    fn layout(config: &MeshConfig, num_ranks: usize) -> (BlockTree, PartitionPlan, Vec<f64>) {
        let mut tree = BlockTree::create_root_grid(config.root_blocks(), config.root_level(), config.active());
        let n = tree.assign_global_ids();
        let costs = vec![1.0; n];
        let plan = PartitionPlan::new(&costs, num_ranks, RefinementMode::Static, false).unwrap();
        (tree, plan, costs)
    }

    #[test]
    fn two_ranks_split_a_two_by_two_grid() {
        let config = config_8x8(BoundaryFlag::Periodic);
        let (tree, plan, costs) = layout(&config, 2);
        let rank0 = BlockList::build(&config, &tree, &plan, &costs, 0).unwrap();
        let rank1 = BlockList::build(&config, &tree, &plan, &costs, 1).unwrap();

        assert_eq!(rank0.iter().map(|b| b.gid).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(rank1.iter().map(|b| b.gid).collect::<Vec<_>>(), vec![2, 3]);

        let b0 = rank0.get(0).unwrap();
        match b0.neighbors.get(Face::OuterX1) {
            FaceNeighbor::Same(nb) => {
                assert_eq!(nb.gid, 1);
                assert_eq!(nb.rank, 0);
                assert_eq!(nb.lid, 1);
            }
            other => panic!("unexpected neighbor {:?}", other),
        }
        // periodic wrap
        match b0.neighbors.get(Face::InnerX1) {
            FaceNeighbor::Same(nb) => assert_eq!(nb.gid, 1),
            other => panic!("unexpected neighbor {:?}", other),
        }
        match b0.neighbors.get(Face::InnerX2) {
            FaceNeighbor::Same(nb) => {
                assert_eq!(nb.gid, 2);
                assert_eq!(nb.rank, 1);
                assert_eq!(nb.lid, 0);
            }
            other => panic!("unexpected neighbor {:?}", other),
        }
        assert!(b0.neighbors.is_boundary(Face::InnerX3));
        assert_eq!(rank1.by_gid(3).map(|b| b.lid), Some(1));
        assert_eq!(rank1.next(0), Some(1));
        assert_eq!(rank1.next(1), None);
        assert_eq!(rank1.prev(0), None);
    }

    #[test]
    fn reflecting_edges_are_boundaries() {
        let config = config_8x8(BoundaryFlag::Reflect);
        let (tree, plan, costs) = layout(&config, 1);
        let blocks = BlockList::build(&config, &tree, &plan, &costs, 0).unwrap();
        let b0 = blocks.get(0).unwrap();

        assert!(b0.neighbors.is_boundary(Face::InnerX1));
        assert!(b0.neighbors.is_boundary(Face::InnerX2));
        assert!(!b0.neighbors.is_boundary(Face::OuterX1));
        assert_eq!(b0.bcs[Face::InnerX1.index()], BoundaryFlag::Reflect);
        assert_eq!(b0.bcs[Face::OuterX1.index()], BoundaryFlag::Block);
    }

    #[test]
    fn coarse_block_sees_two_finer_neighbors() {
        let config = MeshConfig {
            num_levels: 2,
            regions: vec![RefinementRegion {
                level: 1,
                lower: [0.5, 0.0, 0.0],
                upper: [1.0, 1.0, 1.0],
            }],
            ..config_8x8(BoundaryFlag::Outflow)
        };
        let mut tree = BlockTree::create_root_grid(config.root_blocks(), config.root_level(), config.active());
        tree.refine_where(config.max_level(), |loc| if loc.lx[0] == 1 && loc.level == 1 { 2 } else { loc.level });
        let n = tree.assign_global_ids();
        let costs = vec![1.0; n];
        let plan = PartitionPlan::new(&costs, 1, RefinementMode::Static, false).unwrap();
        let blocks = BlockList::build(&config, &tree, &plan, &costs, 0).unwrap();

        let coarse = blocks.iter().find(|b| b.loc == LogicalLocation::new([0, 0, 0], 1)).unwrap();
        match coarse.neighbors.get(Face::OuterX1) {
            FaceNeighbor::Finer(slots) => {
                let fine: Vec<_> = slots.iter().flatten().collect();
                assert_eq!(fine.len(), 2);
                assert!(slots[2].is_none() && slots[3].is_none());
                assert_ne!(fine[0].gid, fine[1].gid);
            }
            other => panic!("unexpected neighbor {:?}", other),
        }
        let fine = blocks.iter().find(|b| b.loc == LogicalLocation::new([2, 1, 0], 2)).unwrap();
        assert!(matches!(fine.neighbors.get(Face::InnerX1), FaceNeighbor::Coarser(nb) if nb.level == 1));
    }
}
