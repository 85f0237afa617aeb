use core::ops::Range;




#[derive(Clone, Debug, PartialEq, Eq)]


/**
 * Represents a rectangular region in a discrete, three-dimensional index
 * space. Axis 0 is x1 (the i index), and so on. Indexes are signed so that
 * ghost zones sit at negative offsets from a block's interior.
 */
pub struct IndexSpace {
    start: [i64; 3],
    end: [i64; 3],
}




impl IndexSpace {


    pub fn new(start: [i64; 3], end: [i64; 3]) -> Self {

        assert!(
            (0..3).all(|a| start[a] <= end[a]),
            "index space has negative volume");

        Self { start, end }
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> [usize; 3] {
        [(self.end[0] - self.start[0]) as usize,
         (self.end[1] - self.start[1]) as usize,
         (self.end[2] - self.start[2]) as usize]
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn len(&self) -> usize {
        self.dim().iter().product()
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn start(&self) -> [i64; 3] {
        self.start
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn end(&self) -> [i64; 3] {
        self.end
    }


    /**
     * Return the index range along one axis.
     */
    pub fn range(&self, axis: usize) -> Range<i64> {
        self.start[axis]..self.end[axis]
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: [i64; 3]) -> bool {
        (0..3).all(|a| self.start[a] <= index[a] && index[a] < self.end[a])
    }


    /**
     * Determine whether another index space is a subset of this one.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        (0..3).all(|a| other.start[a] >= self.start[a] && other.end[a] <= self.end[a])
    }


    /**
     * Expand this index space by the given number of elements on each of the
     * flagged axes. A negative delta trims.
     */
    pub fn extend(&self, delta: i64, axes: [bool; 3]) -> Self {
        let mut start = self.start;
        let mut end = self.end;

        for a in 0..3 {
            if axes[a] {
                start[a] -= delta;
                end[a] += delta;
            }
        }
        Self::new(start, end)
    }


    /**
     * Replace the range on one axis.
     */
    pub fn with_range(&self, axis: usize, range: Range<i64>) -> Self {
        let mut start = self.start;
        let mut end = self.end;
        start[axis] = range.start;
        end[axis] = range.end;
        Self::new(start, end)
    }


    /**
     * Return the linear offset for the given index, in a buffer aligned with
     * the start of this index space. The i index increases fastest.
     */
    pub fn row_major_offset(&self, index: [i64; 3]) -> usize {
        let [ni, nj, _] = self.dim();
        let i = (index[0] - self.start[0]) as usize;
        let j = (index[1] - self.start[1]) as usize;
        let k = (index[2] - self.start[2]) as usize;
        (k * nj + j) * ni + i
    }


    /**
     * Return an iterator which traverses the index space in memory order (k
     * outermost, i innermost).
     */
    pub fn iter(&self) -> impl Iterator<Item = [i64; 3]> + '_ {
        self.range(2).flat_map(move |k| {
            self.range(1).flat_map(move |j| self.range(0).map(move |i| [i, j, k]))
        })
    }
}




/**
 * Less imposing factory function to construct an IndexSpace object.
 */
pub fn range3d(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> IndexSpace {
    IndexSpace::new([di.start, dj.start, dk.start], [di.end, dj.end, dk.end])
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::range3d;

    #[test]
    fn index_space_size_works() {
        let space = range3d(-2..6, -2..6, 0..1);
        assert_eq!(space.dim(), [8, 8, 1]);
        assert_eq!(space.len(), 64);
        assert_eq!(space.iter().count(), 64);
        assert!(space.contains([-2, 5, 0]));
        assert!(!space.contains([6, 0, 0]));
    }

    #[test]
    fn traversal_is_in_memory_order() {
        let space = range3d(-1..3, 0..2, 4..6);
        for (n, index) in space.iter().enumerate() {
            assert_eq!(space.row_major_offset(index), n);
        }
    }

    #[test]
    fn extend_touches_only_flagged_axes() {
        let space = range3d(0..4, 0..4, 0..1).extend(2, [true, true, false]);
        assert_eq!(space.start(), [-2, -2, 0]);
        assert_eq!(space.end(), [6, 6, 1]);
        assert!(space.contains_space(&range3d(0..4, 0..4, 0..1)));
        assert_eq!(space.extend(-2, [true, true, false]), range3d(0..4, 0..4, 0..1));
    }
}
