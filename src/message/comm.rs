use std::time::Duration;

use super::util;
use crate::error::Result;

/// Interface for a group of processes that can exchange messages. The
/// underlying transport can be in-process channels, TCP, or a higher level
/// abstraction like MPI. Messages between any pair of ranks arrive in the
/// order they were sent.
///
pub trait Communicator: Send + Sync {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted.
    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive a message from any of the peers,
    /// waiting at most `timeout`. Returns `None` if nothing arrived.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Receive a message if one is ready, without waiting.
    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        self.recv_timeout(Duration::from_secs(0))
    }
}

/// The shape of a binomial tree rooted at rank 0, used for reductions (leaves
/// toward the root) and broadcasts (root toward the leaves).
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinomialTree {
    rank: usize,
    size: usize,
}

impl BinomialTree {
    pub fn new(rank: usize, size: usize) -> Self {
        Self { rank, size }
    }

    /// Ranks this rank receives from during a reduce, in the order it
    /// receives them.
    pub fn children(&self) -> Vec<usize> {
        let mut result = Vec::new();

        for level in 0..util::ceil_log2(self.size) {
            let one = 1 << level;
            let two = one << 1;

            if self.rank % two != 0 {
                break;
            }
            if self.rank + one < self.size {
                result.push(self.rank + one)
            }
        }
        result
    }

    /// The rank this rank sends to during a reduce, or `None` at the root.
    pub fn parent(&self) -> Option<usize> {
        for level in 0..util::ceil_log2(self.size) {
            let one = 1 << level;
            let two = one << 1;

            if self.rank % two != 0 {
                return Some(self.rank - one);
            }
        }
        None
    }
}

#[cfg(test)]
mod test {

    use super::BinomialTree;

    #[test]
    fn binomial_tree_reaches_every_rank() {
        for size in 1..20 {
            let mut seen = vec![false; size];
            seen[0] = true;

            for rank in 0..size {
                let tree = BinomialTree::new(rank, size);
                for child in tree.children() {
                    assert_eq!(BinomialTree::new(child, size).parent(), Some(rank));
                    assert!(!seen[child]);
                    seen[child] = true;
                }
            }
            assert!(seen.iter().all(|s| *s));
            assert_eq!(BinomialTree::new(0, size).parent(), None);
        }
    }

    #[test]
    fn binomial_tree_of_eight_works() {
        assert_eq!(BinomialTree::new(0, 8).children(), vec![1, 2, 4]);
        assert_eq!(BinomialTree::new(4, 8).children(), vec![5, 6]);
        assert_eq!(BinomialTree::new(6, 8).parent(), Some(4));
        assert_eq!(BinomialTree::new(7, 8).children(), Vec::<usize>::new());
    }
}
