use std::io::Write;
use std::ops::Range;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::RefinementMode;
use crate::error::{Error, IoErrorKind, Result};
use crate::logical_location::LogicalLocation;




/**
 * Assignment of leaves to ranks. Ranks are a non-decreasing step function of
 * the global id, so each rank owns one contiguous range of ids.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionPlan {
    ranks: Vec<usize>,
    starts: Vec<usize>,
    counts: Vec<usize>,
    advisories: Vec<String>,
}




// ============================================================================
impl PartitionPlan {

    /**
     * Distribute blocks with the given costs over `num_ranks` ranks. Blocks
     * are taken from the last global id down; a rank's bucket closes once it
     * holds the average of what remains, and rank 0 takes whatever is left
     * at the front. Fewer blocks than ranks is an error unless `test_mode`
     * is set, in which case it is only reported.
     */
    pub fn new(costs: &[f64], num_ranks: usize, mode: RefinementMode, test_mode: bool) -> Result<Self> {
        if num_ranks == 0 {
            return Err(Error::config("there must be at least one rank"));
        }
        let num_blocks = costs.len();
        let mut advisories = Vec::new();

        if num_blocks < num_ranks {
            let message = format!(
                "too few mesh blocks: {} blocks for {} ranks",
                num_blocks, num_ranks
            );
            if test_mode {
                warn!("{}", message);
                advisories.push(message);
            } else {
                return Err(Error::config(message));
            }
        }
        if let Some(c) = costs.iter().find(|&&c| !(c > 0.0)) {
            return Err(Error::config(format!("block cost must be positive, got {}", c)));
        }

        let mut ranks = vec![0; num_blocks];
        let mut remaining: f64 = costs.iter().sum();
        let mut rank = num_ranks - 1;
        let mut target = remaining / num_ranks as f64;
        let mut bucket = 0.0;

        for gid in (0..num_blocks).rev() {
            bucket += costs[gid];
            ranks[gid] = rank;

            if bucket >= target && rank > 0 {
                rank -= 1;
                remaining -= bucket;
                bucket = 0.0;
                target = remaining / (rank + 1) as f64;
            }
        }

        let mut counts = vec![0; num_ranks];
        for &r in &ranks {
            counts[r] += 1
        }
        let starts = counts
            .iter()
            .scan(0, |total, &n| {
                let start = *total;
                *total += n;
                Some(start)
            })
            .collect();

        let min_cost = costs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_cost = costs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        if num_blocks % num_ranks != 0 && mode != RefinementMode::Adaptive && max_cost == min_cost {
            let message = format!(
                "the number of mesh blocks ({}) is not divisible by the number of ranks ({}), the load will be imbalanced",
                num_blocks, num_ranks
            );
            warn!("{}", message);
            advisories.push(message);
        }

        Ok(Self { ranks, starts, counts, advisories })
    }

    pub fn num_ranks(&self) -> usize {
        self.counts.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.ranks.len()
    }

    /// Rank owning each global id.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn rank_of(&self, gid: usize) -> usize {
        self.ranks[gid]
    }

    /// Position of a block within its owner's range.
    pub fn lid_of(&self, gid: usize) -> usize {
        gid - self.starts[self.ranks[gid]]
    }

    pub fn start(&self, rank: usize) -> usize {
        self.starts[rank]
    }

    pub fn count(&self, rank: usize) -> usize {
        self.counts[rank]
    }

    /// Global ids owned by a rank.
    pub fn range(&self, rank: usize) -> Range<usize> {
        self.starts[rank]..self.starts[rank] + self.counts[rank]
    }

    /// Non-fatal conditions found while planning; already logged.
    pub fn advisories(&self) -> &[String] {
        &self.advisories
    }
}




/**
 * Per-rank share of the mesh, as listed in the mesh report.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankLoad {
    pub rank: usize,
    pub blocks: usize,
    pub cost: f64,
}

/**
 * One leaf as listed in the mesh report.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub gid: usize,
    pub level: u32,
    pub lx: [i64; 3],
    pub cost: f64,
    pub rank: usize,
}

/**
 * Summary of the mesh layout and its distribution over ranks, produced in
 * test mode instead of building blocks.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshReport {
    pub root_level: u32,
    pub max_level: u32,
    pub blocks_per_level: Vec<usize>,
    pub blocks: Vec<BlockSummary>,
    pub ranks: Vec<RankLoad>,
    pub min_cost: f64,
    pub max_cost: f64,
    pub average_cost: f64,
}

impl MeshReport {
    pub fn new(
        root_level: u32,
        max_level: u32,
        leaves: &[LogicalLocation],
        costs: &[f64],
        plan: &PartitionPlan,
    ) -> Self {
        let mut blocks_per_level = vec![0; (max_level - root_level + 1) as usize];
        let mut ranks: Vec<RankLoad> = (0..plan.num_ranks())
            .map(|rank| RankLoad { rank, blocks: 0, cost: 0.0 })
            .collect();
        let mut blocks = Vec::with_capacity(leaves.len());

        for (gid, (loc, &cost)) in leaves.iter().zip(costs).enumerate() {
            let rank = plan.rank_of(gid);
            let lx = loc.lx;
            blocks_per_level[(loc.level - root_level) as usize] += 1;
            ranks[rank].blocks += 1;
            ranks[rank].cost += cost;
            blocks.push(BlockSummary { gid, level: loc.level - root_level, lx, cost, rank });
        }

        let total: f64 = ranks.iter().map(|r| r.cost).sum();
        let min_cost = ranks.iter().map(|r| r.cost).fold(f64::INFINITY, f64::min);
        let max_cost = ranks.iter().map(|r| r.cost).fold(f64::NEG_INFINITY, f64::max);

        Self {
            root_level,
            max_level,
            blocks_per_level,
            blocks,
            ranks,
            min_cost,
            max_cost,
            average_cost: total / plan.num_ranks() as f64,
        }
    }

    /**
     * Write the report to the log at info level.
     */
    pub fn log(&self) {
        info!("root grid = level {}, deepest level = {}", self.root_level, self.max_level);
        info!("total number of mesh blocks = {}", self.blocks.len());

        for (level, count) in self.blocks_per_level.iter().enumerate() {
            if *count > 0 {
                info!("  level {} (logical level {}): {} blocks", level, level as u32 + self.root_level, count);
            }
        }
        for load in &self.ranks {
            info!("  rank {}: {} blocks, cost = {}", load.rank, load.blocks, load.cost);
        }
        info!(
            "load balance: min cost = {}, max cost = {}, average cost = {}",
            self.min_cost, self.max_cost, self.average_cost
        );
    }

    /**
     * Write the report as CBOR.
     */
    pub fn write_cbor<W: Write>(&self, writer: W) -> Result<()> {
        ciborium::ser::into_writer(self, writer).map_err(|e| match e {
            ciborium::ser::Error::Io(e) => Error::io(IoErrorKind::ShortWrite, "writing the mesh report", e),
            e => Error::Io {
                kind: IoErrorKind::Other,
                context: format!("encoding the mesh report: {}", e),
                source: None,
            },
        })
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn four_blocks_on_two_ranks_split_evenly() {
        let plan = PartitionPlan::new(&[1.0; 4], 2, RefinementMode::Static, false).unwrap();
        assert_eq!(plan.ranks(), &[0, 0, 1, 1]);
        assert_eq!(plan.range(0), 0..2);
        assert_eq!(plan.range(1), 2..4);
        assert_eq!(plan.lid_of(3), 1);
        assert!(plan.advisories().is_empty());
    }

    #[test]
    fn rank_zero_is_kept_lightest() {
        let plan = PartitionPlan::new(&[1.0; 5], 2, RefinementMode::Static, false).unwrap();
        assert_eq!(plan.ranks(), &[0, 0, 1, 1, 1]);
        assert_eq!(plan.advisories().len(), 1);
    }

    #[test]
    fn too_few_blocks_is_fatal_unless_testing() {
        assert!(matches!(
            PartitionPlan::new(&[1.0; 2], 3, RefinementMode::Static, false),
            Err(Error::Config(_))
        ));
        let plan = PartitionPlan::new(&[1.0; 2], 3, RefinementMode::Static, true).unwrap();
        assert_eq!(plan.count(0), 0);
        assert_eq!(plan.range(2), 1..2);
    }

    #[test]
    fn report_sums_rank_loads() {
        let leaves: Vec<_> = (0..4).map(|i| LogicalLocation::new([i, 0, 0], 2)).collect();
        let costs = [1.0; 4];
        let plan = PartitionPlan::new(&costs, 2, RefinementMode::Static, false).unwrap();
        let report = MeshReport::new(2, 2, &leaves, &costs, &plan);
        assert_eq!(report.blocks_per_level, vec![4]);
        assert_eq!(report.ranks[1].blocks, 2);
        assert_eq!(report.average_cost, 2.0);

        let mut buffer = Vec::new();
        report.write_cbor(&mut buffer).unwrap();
        let back: MeshReport = ciborium::de::from_reader(buffer.as_slice()).unwrap();
        assert_eq!(back, report);
    }

    proptest! {
        #[test]
        fn rank_ranges_tile_the_block_list(
            costs in prop::collection::vec(0.1f64..10.0, 1..200),
            num_ranks in 1usize..16)
        {
            prop_assume!(costs.len() >= num_ranks);
            let plan = PartitionPlan::new(&costs, num_ranks, RefinementMode::Adaptive, false).unwrap();
            let mut next = 0;

            for rank in 0..num_ranks {
                let range = plan.range(rank);
                prop_assert_eq!(range.start, next);
                for gid in range.clone() {
                    prop_assert_eq!(plan.rank_of(gid), rank);
                }
                next = range.end;
            }
            prop_assert_eq!(next, costs.len());
        }
    }
}
