use log::debug;

use crate::error::{Error, Result};
use crate::logical_location::LogicalLocation;
use crate::neighbor::Face;




/// Index of a node in the tree's arena.
pub type NodeId = usize;

/// Index of a child within its parent: ox1 + 2 ox2 + 4 ox3.
fn child_slot(ox: [usize; 3]) -> usize {
    ox[0] + 2 * ox[1] + 4 * ox[2]
}

#[derive(Clone, Debug)]
struct Node {
    loc: LogicalLocation,
    children: Option<[Option<NodeId>; 8]>,
    gid: Option<usize>,
}




/**
 * The result of a neighbor search.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The node adjacent across the face. It is a leaf at the same level,
    /// a leaf one level coarser, or an internal node whose children are the
    /// finer neighbors.
    Node(NodeId),

    /// The face lies on a non-periodic edge of the domain.
    DomainEdge,
}




/**
 * A tree of logical addresses covering the root grid. Nodes live in an arena
 * and are never removed. Every node above the root level has either no
 * children or one child per octant spanned by the active axes; nodes at or
 * above the root level may be missing children that fall outside the root
 * grid.
 */
#[derive(Clone, Debug)]
pub struct BlockTree {
    nodes: Vec<Node>,
    root_blocks: [i64; 3],
    root_level: u32,
    active: [bool; 3],
    num_leaves: usize,
}




// ============================================================================
impl BlockTree {




    /**
     * Build the minimal tree whose leaves at the root level cover an array of
     * `root_blocks` blocks. The root level must be large enough that
     * 2^root_level covers every entry of `root_blocks`.
     */
    pub fn create_root_grid(root_blocks: [i64; 3], root_level: u32, active: [bool; 3]) -> Self {
        let mut tree = Self {
            nodes: vec![Node {
                loc: LogicalLocation::root(),
                children: None,
                gid: None,
            }],
            root_blocks,
            root_level,
            active,
            num_leaves: 0,
        };
        tree.grow_root_grid(0);
        tree
    }

    fn grow_root_grid(&mut self, id: NodeId) {
        let loc = self.nodes[id].loc;

        if loc.level == self.root_level {
            return;
        }
        let shift = self.root_level - loc.level - 1;
        let mut children = [None; 8];

        for ox in self.octants() {
            let child = loc.child(ox);

            if (0..3).all(|a| child.lx[a] << shift < self.root_blocks[a]) {
                children[child_slot(ox)] = Some(self.push(child));
            }
        }
        self.nodes[id].children = Some(children);

        for child in children.iter().flatten() {
            self.grow_root_grid(*child)
        }
    }

    fn push(&mut self, loc: LogicalLocation) -> NodeId {
        self.nodes.push(Node { loc, children: None, gid: None });
        self.nodes.len() - 1
    }

    /// Return the octant offsets spanned by the active axes, in child order.
    fn octants(&self) -> Vec<[usize; 3]> {
        let n = |a: usize| if self.active[a] { 2 } else { 1 };
        let mut result = Vec::new();

        for ox3 in 0..n(2) {
            for ox2 in 0..n(1) {
                for ox1 in 0..n(0) {
                    result.push([ox1, ox2, ox3])
                }
            }
        }
        result
    }




    /**
     * Number the leaves 0..N-1 in depth-first order, children visited in
     * slot order. Returns N.
     */
    pub fn assign_global_ids(&mut self) -> usize {
        let mut count = 0;
        self.number_leaves(0, &mut count);
        self.num_leaves = count;
        count
    }

    fn number_leaves(&mut self, id: NodeId, count: &mut usize) {
        match self.nodes[id].children {
            None => {
                self.nodes[id].gid = Some(*count);
                *count += 1;
            }
            Some(children) => {
                self.nodes[id].gid = None;
                for child in children.iter().flatten() {
                    self.number_leaves(*child, count)
                }
            }
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    pub fn root_level(&self) -> u32 {
        self.root_level
    }

    pub fn root_blocks(&self) -> [i64; 3] {
        self.root_blocks
    }

    pub fn active(&self) -> [bool; 3] {
        self.active
    }

    /// Return the deepest level of any node.
    pub fn max_level(&self) -> u32 {
        self.nodes.iter().map(|n| n.loc.level).max().unwrap_or(0)
    }

    pub fn loc(&self, id: NodeId) -> LogicalLocation {
        self.nodes[id].loc
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].children.is_none()
    }

    /// Global id of a leaf, once ids have been assigned.
    pub fn gid(&self, id: NodeId) -> Option<usize> {
        self.nodes[id].gid
    }

    /**
     * Return the addresses of all leaves in global id order.
     */
    pub fn leaves(&self) -> Vec<LogicalLocation> {
        let mut result = Vec::with_capacity(self.num_leaves);
        self.collect_leaves(0, &mut result);
        result
    }

    fn collect_leaves(&self, id: NodeId, result: &mut Vec<LogicalLocation>) {
        match self.nodes[id].children {
            None => result.push(self.nodes[id].loc),
            Some(children) => {
                for child in children.iter().flatten() {
                    self.collect_leaves(*child, result)
                }
            }
        }
    }

    fn leaf_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).filter(|&id| self.is_leaf(id)).collect()
    }




    /**
     * Return the child of an internal node at the given octant offsets.
     */
    pub fn leaf_child(&self, id: NodeId, ox: [usize; 3]) -> Option<NodeId> {
        self.nodes[id].children.and_then(|c| c[child_slot(ox)])
    }

    /**
     * Descend from the root toward the node at the given address. Stops
     * early at a leaf, so the returned node may be coarser than requested.
     */
    fn descend(&self, lx: [i64; 3], level: u32) -> Result<NodeId> {
        let mut id = 0;

        for depth in 0..level {
            let children = match self.nodes[id].children {
                None => return Ok(id),
                Some(children) => children,
            };
            let shift = level - depth - 1;
            let ox = [
                (lx[0] >> shift & 1) as usize,
                (lx[1] >> shift & 1) as usize,
                (lx[2] >> shift & 1) as usize,
            ];
            id = children[child_slot(ox)].ok_or_else(|| {
                Error::structure(format!(
                    "no node on the path to ({} {} {}) at level {}",
                    lx[0], lx[1], lx[2], level
                ))
            })?;
        }
        Ok(id)
    }

    /**
     * Find the node holding the given address, if it exists.
     */
    pub fn find(&self, loc: &LogicalLocation) -> Option<NodeId> {
        match self.descend(loc.lx, loc.level) {
            Ok(id) if self.nodes[id].loc == *loc => Some(id),
            _ => None,
        }
    }

    /**
     * Find the node adjacent to `loc` across `face`. Addresses that step off
     * the root grid wrap around when `periodic` is set, and yield
     * `Lookup::DomainEdge` otherwise. A neighbor more than one level coarser
     * or finer than `loc`, or a missing node on the search path, means the
     * tree is broken.
     */
    pub fn find_neighbor(&self, loc: &LogicalLocation, face: Face, periodic: bool) -> Result<Lookup> {
        let id = match self.adjacent(loc, face, periodic)? {
            Some(id) => id,
            None => return Ok(Lookup::DomainEdge),
        };
        let node = &self.nodes[id];

        if node.loc.level + 1 < loc.level {
            return Err(Error::structure(format!(
                "neighbor of {:?} across {:?} is {} levels coarser",
                loc,
                face,
                loc.level - node.loc.level
            )));
        }
        if let Some(children) = node.children {
            for child in children.iter().flatten() {
                if !self.is_leaf(*child) {
                    return Err(Error::structure(format!(
                        "neighbor of {:?} across {:?} is more than one level finer",
                        loc, face
                    )));
                }
            }
        }
        Ok(Lookup::Node(id))
    }

    fn adjacent(&self, loc: &LogicalLocation, face: Face, periodic: bool) -> Result<Option<NodeId>> {
        if loc.level < self.root_level {
            return Err(Error::structure(format!(
                "neighbor search from {:?} above the root level",
                loc
            )));
        }
        let axis = face.axis();
        let num = self.root_blocks[axis] << (loc.level - self.root_level);
        let mut lx = loc.lx;
        lx[axis] += face.offset();

        if lx[axis] < 0 {
            if periodic {
                lx[axis] += num
            } else {
                return Ok(None);
            }
        }
        if lx[axis] >= num {
            if periodic {
                lx[axis] -= num
            } else {
                return Ok(None);
            }
        }
        self.descend(lx, loc.level).map(Some)
    }




    /**
     * Split a leaf into one child per active octant.
     */
    pub fn refine(&mut self, id: NodeId) {
        if !self.is_leaf(id) {
            return;
        }
        let loc = self.nodes[id].loc;
        let mut children = [None; 8];

        for ox in self.octants() {
            children[child_slot(ox)] = Some(self.push(loc.child(ox)));
        }
        self.nodes[id].children = Some(children);
        self.nodes[id].gid = None;
    }

    /**
     * Repeatedly refine leaves for which `want_level` asks for a deeper
     * level than they have, never going past `max_level`. Returns the number
     * of leaves split.
     */
    pub fn refine_where<F>(&mut self, max_level: u32, want_level: F) -> usize
    where
        F: Fn(&LogicalLocation) -> u32,
    {
        let mut count = 0;

        loop {
            let split: Vec<NodeId> = self
                .leaf_ids()
                .into_iter()
                .filter(|&id| {
                    let loc = self.nodes[id].loc;
                    loc.level < max_level && want_level(&loc) > loc.level
                })
                .collect();

            if split.is_empty() {
                break;
            }
            for id in &split {
                self.refine(*id)
            }
            count += split.len();
        }
        count
    }

    /**
     * Refine coarse leaves until no two face-adjacent leaves differ by more
     * than one level. Returns the number of leaves split.
     */
    pub fn enforce_balance(&mut self, periodic: [bool; 3]) -> Result<usize> {
        let mut count = 0;

        loop {
            let mut split = Vec::new();

            for id in self.leaf_ids() {
                let loc = self.nodes[id].loc;

                for &face in &Face::ALL {
                    if !self.active[face.axis()] {
                        continue;
                    }
                    if let Some(other) = self.adjacent(&loc, face, periodic[face.axis()])? {
                        if self.is_leaf(other) && self.nodes[other].loc.level + 1 < loc.level {
                            split.push(other)
                        }
                    }
                }
            }
            split.sort_unstable();
            split.dedup();

            if split.is_empty() {
                break;
            }
            for id in &split {
                self.refine(*id)
            }
            count += split.len();
        }
        if count > 0 {
            debug!("split {} leaves to restore 2:1 balance", count);
        }
        Ok(count)
    }

    /**
     * Rebuild a tree from a list of leaf addresses, as stored in a
     * checkpoint. The leaves must come back in the same global id order.
     */
    pub fn from_leaves(
        root_blocks: [i64; 3],
        root_level: u32,
        active: [bool; 3],
        leaves: &[LogicalLocation],
    ) -> Result<Self> {
        let mut tree = Self::create_root_grid(root_blocks, root_level, active);

        for loc in leaves {
            loop {
                let id = tree.descend(loc.lx, loc.level)?;
                let level = tree.nodes[id].loc.level;

                if level == loc.level {
                    break;
                }
                tree.refine(id);
            }
        }
        let n = tree.assign_global_ids();

        if n != leaves.len() || tree.leaves() != leaves {
            return Err(Error::structure(
                "stored leaf list does not describe a complete block tree",
            ));
        }
        Ok(tree)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use proptest::prelude::*;

    fn tree_2d(nx: i64, ny: i64) -> BlockTree {
        let nmax = nx.max(ny);
        let mut level = 0;
        while (1 << level) < nmax {
            level += 1
        }
        let mut tree = BlockTree::create_root_grid([nx, ny, 1], level, [true, true, false]);
        tree.assign_global_ids();
        tree
    }

    #[test]
    fn root_grid_leaves_are_numbered_in_order() {
        let tree = tree_2d(2, 2);
        let leaves = tree.leaves();
        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(leaves[0].lx, [0, 0, 0]);
        assert_eq!(leaves[1].lx, [1, 0, 0]);
        assert_eq!(leaves[2].lx, [0, 1, 0]);
        assert_eq!(leaves[3].lx, [1, 1, 0]);
    }

    #[test]
    fn non_power_of_two_root_grid_works() {
        let tree = tree_2d(3, 5);
        assert_eq!(tree.num_leaves(), 15);
        assert!(tree.leaves().iter().all(|l| l.lx[0] < 3 && l.lx[1] < 5 && l.level == 3));
    }

    #[test]
    fn neighbor_search_wraps_when_periodic() {
        let tree = tree_2d(2, 2);
        let loc = tree.leaves()[0];

        match tree.find_neighbor(&loc, Face::OuterX1, false).unwrap() {
            Lookup::Node(id) => assert_eq!(tree.gid(id), Some(1)),
            Lookup::DomainEdge => panic!(),
        }
        match tree.find_neighbor(&loc, Face::InnerX1, true).unwrap() {
            Lookup::Node(id) => assert_eq!(tree.gid(id), Some(1)),
            Lookup::DomainEdge => panic!(),
        }
        assert_eq!(tree.find_neighbor(&loc, Face::InnerX1, false).unwrap(), Lookup::DomainEdge);
    }

    #[test]
    fn neighbor_search_finds_finer_and_coarser_nodes() {
        let mut tree = tree_2d(2, 1);
        let right = tree.find(&LogicalLocation::new([1, 0, 0], 1)).unwrap();
        tree.refine(right);
        tree.assign_global_ids();

        let left = LogicalLocation::new([0, 0, 0], 1);
        let id = match tree.find_neighbor(&left, Face::OuterX1, false).unwrap() {
            Lookup::Node(id) => id,
            Lookup::DomainEdge => panic!(),
        };
        assert!(!tree.is_leaf(id));
        let a = tree.leaf_child(id, [0, 0, 0]).unwrap();
        let b = tree.leaf_child(id, [0, 1, 0]).unwrap();
        assert_eq!(tree.loc(a), LogicalLocation::new([2, 0, 0], 2));
        assert_eq!(tree.loc(b), LogicalLocation::new([2, 1, 0], 2));

        let fine = LogicalLocation::new([2, 1, 0], 2);
        match tree.find_neighbor(&fine, Face::InnerX1, false).unwrap() {
            Lookup::Node(id) => assert_eq!(tree.loc(id), left),
            Lookup::DomainEdge => panic!(),
        }
    }

    #[test]
    fn balance_splits_coarse_leaves() {
        let mut tree = BlockTree::create_root_grid([2, 1, 1], 1, [true, false, false]);
        tree.refine_where(3, |loc| if loc.lx[0] >= (1 << loc.level) / 2 { 3 } else { 0 });
        assert_eq!(tree.enforce_balance([false; 3]).unwrap(), 1);
        tree.assign_global_ids();

        let levels: Vec<u32> = tree.leaves().iter().map(|l| l.level).collect();
        assert_eq!(levels, vec![2, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn tree_rebuilds_from_leaf_list() {
        let mut tree = tree_2d(2, 2);
        let id = tree.find(&LogicalLocation::new([1, 1, 0], 1)).unwrap();
        tree.refine(id);
        tree.assign_global_ids();

        let leaves = tree.leaves();
        let copy = BlockTree::from_leaves([2, 2, 1], 1, [true, true, false], &leaves).unwrap();
        assert_eq!(copy.leaves(), leaves);
        assert!(BlockTree::from_leaves([2, 2, 1], 1, [true, true, false], &leaves[1..]).is_err());
    }

    proptest! {
        #[test]
        fn leaf_ids_cover_the_root_grid(nx in 1i64..7, ny in 1i64..7, nz in 1i64..7) {
            let nmax = nx.max(ny).max(nz);
            let mut level = 0;
            while (1 << level) < nmax {
                level += 1
            }
            let mut tree = BlockTree::create_root_grid([nx, ny, nz], level, [true, true, true]);
            let n = tree.assign_global_ids();
            prop_assert_eq!(n as i64, nx * ny * nz);

            let mut gids: Vec<usize> = (0..tree.nodes.len()).filter_map(|id| tree.gid(id)).collect();
            gids.sort_unstable();
            prop_assert_eq!(gids, (0..n).collect::<Vec<_>>());
        }
    }
}
