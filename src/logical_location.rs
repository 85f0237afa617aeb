/**
 * The logical address of a node in the block tree: its integer position on
 * the grid of nodes at its refinement level, and the level itself. The
 * address is equivalent to the path of octant digits from the root, one
 * digit per level, each digit holding one bit per axis (x1 lowest).
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LogicalLocation {
    pub lx: [i64; 3],
    pub level: u32,
}




// ============================================================================
impl LogicalLocation {

    pub fn root() -> Self {
        Self { lx: [0; 3], level: 0 }
    }

    pub fn new(lx: [i64; 3], level: u32) -> Self {
        Self { lx, level }
    }

    /**
     * Return the path of octant digits from the root to this node. The
     * digit at position d selects the child taken when descending from
     * level d to level d + 1.
     */
    pub fn digits(&self) -> Vec<u8> {
        (0..self.level)
            .map(|d| {
                let shift = self.level - d - 1;
                let bit = |a: usize| ((self.lx[a] >> shift) & 1) as u8;
                bit(0) | bit(1) << 1 | bit(2) << 2
            })
            .collect()
    }

    /**
     * Rebuild an address from its octant digits.
     */
    pub fn from_digits(digits: &[u8]) -> Self {
        digits.iter().fold(Self::root(), |loc, &d| {
            loc.child([(d & 1) as usize, (d >> 1 & 1) as usize, (d >> 2 & 1) as usize])
        })
    }

    /**
     * Return the address of the enclosing node one level up. The root is its
     * own parent.
     */
    pub fn parent(&self) -> Self {
        if self.level == 0 {
            *self
        } else {
            Self {
                lx: [self.lx[0] >> 1, self.lx[1] >> 1, self.lx[2] >> 1],
                level: self.level - 1,
            }
        }
    }

    /**
     * Return the address of the child at the given octant offsets.
     */
    pub fn child(&self, ox: [usize; 3]) -> Self {
        Self {
            lx: [
                2 * self.lx[0] + ox[0] as i64,
                2 * self.lx[1] + ox[1] as i64,
                2 * self.lx[2] + ox[2] as i64,
            ],
            level: self.level + 1,
        }
    }

    /**
     * Return this node's octant offsets within its parent.
     */
    pub fn octant(&self) -> [usize; 3] {
        [
            (self.lx[0] & 1) as usize,
            (self.lx[1] & 1) as usize,
            (self.lx[2] & 1) as usize,
        ]
    }

    /**
     * Return the sibling occupying another octant of the same parent.
     */
    pub fn sibling(&self, ox: [usize; 3]) -> Self {
        self.parent().child(ox)
    }

    /**
     * Return true if `other` is this node or one of its descendants.
     */
    pub fn contains(&self, other: &Self) -> bool {
        other.level >= self.level && {
            let shift = other.level - self.level;
            (0..3).all(|a| other.lx[a] >> shift == self.lx[a])
        }
    }
}
