use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rayon::prelude::*;

use crate::block_tree::BlockTree;
use crate::config::MeshConfig;
use crate::error::{Error, IoErrorKind, Result};
use crate::exchange::Postmaster;
use crate::integrator::{initial_tasks, step_tasks, BlockUpdate, ProblemGenerator, StepContext};
use crate::logical_location::LogicalLocation;
use crate::mesh_block::{block_size_and_boundaries, MeshBlock};
use crate::message::Communicator;
use crate::neighbor::BoundaryFlag;
use crate::partition::{MeshReport, PartitionPlan};
use crate::registry::BlockList;
use crate::restart::{self, Header};
use crate::task::{run_round, TaskList};

/// How long an idle scheduler pass waits for incoming messages.
const IDLE_WAIT: Duration = Duration::from_millis(5);




/**
 * Build the block tree for a configuration: the root grid, refined over the
 * static refinement regions and then balanced so that face neighbors differ
 * by at most one level. Leaves are numbered on return.
 */
pub fn build_tree(config: &MeshConfig) -> Result<BlockTree> {
    config.validate()?;

    let root_level = config.root_level();
    let root_blocks = config.root_blocks();
    let mesh = config.mesh_region();
    let mut tree = BlockTree::create_root_grid(root_blocks, root_level, config.active());

    if !config.regions.is_empty() {
        let split = tree.refine_where(config.max_level(), |loc| {
            let (size, _) = block_size_and_boundaries(loc, &mesh, &config.boundaries, config.block_cells, root_blocks, root_level);
            config
                .regions
                .iter()
                .filter(|r| size.overlaps(r.lower, r.upper))
                .map(|r| root_level + r.level)
                .max()
                .unwrap_or(root_level)
        });
        let periodic = [0, 1, 2].map(|a| config.boundaries[2 * a] == BoundaryFlag::Periodic);
        let balanced = tree.enforce_balance(periodic)?;
        debug!("refined {} leaves inside refinement regions and {} for balance", split, balanced);
    }
    let n = tree.assign_global_ids();
    debug!("block tree has {} leaves", n);
    Ok(tree)
}

/**
 * Lay out the mesh and plan its distribution over `num_ranks` workers
 * without building any blocks. Fewer blocks than workers is tolerated.
 */
pub fn mesh_report(config: &MeshConfig, num_ranks: usize) -> Result<MeshReport> {
    let tree = build_tree(config)?;
    let leaves = tree.leaves();
    let costs = vec![1.0; leaves.len()];
    let plan = PartitionPlan::new(&costs, num_ranks, config.refinement, true)?;
    let max_level = leaves.iter().map(|l| l.level).max().unwrap_or(tree.root_level());
    Ok(MeshReport::new(tree.root_level(), max_level, &leaves, &costs, &plan))
}




/**
 * One worker's share of a distributed block mesh, and the clock that
 * advances it.
 */
pub struct Mesh {
    config: MeshConfig,
    root_level: u32,
    root_blocks: [i64; 3],
    leaves: Vec<LogicalLocation>,
    costs: Vec<f64>,
    plan: PartitionPlan,
    blocks: BlockList,
    post: Arc<Postmaster>,
    pool: rayon::ThreadPool,
    physics: Arc<dyn BlockUpdate>,
    initial: TaskList<StepContext>,
    step: TaskList<StepContext>,
    round: u64,
    pub time: f64,
    pub dt: f64,
    pub cycle: u64,
}




// ============================================================================
impl Mesh {

    /**
     * Lay out a new mesh and build the blocks owned by this worker.
     */
    pub fn new(config: MeshConfig, comm: Box<dyn Communicator>, physics: Arc<dyn BlockUpdate>) -> Result<Self> {
        let tree = build_tree(&config)?;
        let leaves = tree.leaves();
        let costs = vec![1.0; leaves.len()];
        let plan = PartitionPlan::new(&costs, comm.size(), config.refinement, false)?;
        let blocks = BlockList::build(&config, &tree, &plan, &costs, comm.rank())?;

        if comm.rank() == 0 {
            let max_level = leaves.iter().map(|l| l.level).max().unwrap_or(tree.root_level());
            MeshReport::new(tree.root_level(), max_level, &leaves, &costs, &plan).log();
        }
        Self::assemble(config, tree.root_level(), tree.root_blocks(), leaves, costs, plan, blocks, comm, physics)
    }

    /**
     * Rebuild this worker's share of a mesh from a checkpoint. The stored
     * costs are partitioned over the current number of workers, which need
     * not match the run that wrote the checkpoint.
     */
    pub fn from_checkpoint(
        path: &Path,
        config: MeshConfig,
        comm: Box<dyn Communicator>,
        physics: Arc<dyn BlockUpdate>,
    ) -> Result<Self> {
        config.validate()?;

        let mut file = File::open(path)
            .map_err(|e| Error::io(IoErrorKind::Other, format!("opening {}", path.display()), e))?;
        let (header, table) = restart::read_preamble(&mut file)?;

        if header.mesh.cells != config.mesh_cells
            || header.block_cells != config.block_cells
            || header.num_variables != config.num_variables
            || header.face_field != config.face_field
        {
            return Err(Error::config(format!(
                "checkpoint {} was written for a different mesh layout",
                path.display()
            )));
        }
        let leaves: Vec<_> = table.iter().map(|l| l.loc).collect();
        let costs: Vec<_> = table.iter().map(|l| l.cost).collect();
        BlockTree::from_leaves(header.root_blocks, header.root_level, config.active(), &leaves)?;
        let plan = PartitionPlan::new(&costs, comm.size(), config.refinement, false)?;
        let mut blocks = BlockList::new();

        for gid in plan.range(comm.rank()) {
            let record = restart::read_block(&mut file, &header, &table[gid])?;
            let mut neighbors = record.neighbors;
            neighbors.update_blocks(|b| {
                b.rank = plan.rank_of(b.gid);
                b.lid = plan.lid_of(b.gid);
            });
            let mut block = MeshBlock::new(
                gid,
                plan.lid_of(gid),
                leaves[gid],
                record.size,
                record.bcs,
                neighbors,
                record.coords,
                config.num_variables,
                config.face_field,
                costs[gid],
            );
            block.cons.data_mut().copy_from_slice(&record.cons);

            if let (Some(field), Some(stored)) = (block.field.as_mut(), record.field) {
                for (component, data) in field.x.iter_mut().zip(stored.iter()) {
                    component.data_mut().copy_from_slice(data);
                }
            }
            blocks.push(block)?;
        }
        info!(
            "restarted from {} at cycle {}, t = {}, with {} of {} blocks",
            path.display(),
            header.cycle,
            header.time,
            blocks.len(),
            leaves.len()
        );

        let mut mesh = Self::assemble(config, header.root_level, header.root_blocks, leaves, costs, plan, blocks, comm, physics)?;
        mesh.time = header.time;
        mesh.dt = header.dt;
        mesh.cycle = header.cycle;
        Ok(mesh)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: MeshConfig,
        root_level: u32,
        root_blocks: [i64; 3],
        leaves: Vec<LogicalLocation>,
        costs: Vec<f64>,
        plan: PartitionPlan,
        blocks: BlockList,
        comm: Box<dyn Communicator>,
        physics: Arc<dyn BlockUpdate>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
            .map_err(|e| Error::config(format!("cannot start the thread pool: {}", e)))?;

        Ok(Self {
            initial: initial_tasks(config.face_field)?,
            step: step_tasks(config.face_field)?,
            config,
            root_level,
            root_blocks,
            leaves,
            costs,
            plan,
            blocks,
            post: Arc::new(Postmaster::new(comm)),
            pool,
            physics,
            round: 0,
            time: 0.0,
            dt: f64::MAX,
            cycle: 0,
        })
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn rank(&self) -> usize {
        self.post.rank()
    }

    pub fn plan(&self) -> &PartitionPlan {
        &self.plan
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockList {
        &mut self.blocks
    }

    pub fn postmaster(&self) -> &Postmaster {
        &self.post
    }

    /**
     * Prepare the mesh to take its first step. A fresh run passes the
     * problem generator, which fills every block; a restart passes None.
     * Every ghost zone is then filled (exchange round 0) and the first time
     * step is chosen.
     */
    pub fn initialize(&mut self, generator: Option<&dyn ProblemGenerator>) -> Result<()> {
        if let Some(generator) = generator {
            let blocks = self.blocks.as_mut_slice();
            self.pool.install(|| {
                blocks
                    .par_iter_mut()
                    .map(|block| generator.generate(block))
                    .collect::<Result<Vec<_>>>()
            })?;
        }
        self.run(0, false)?;
        self.post.barrier()?;
        self.new_time_step()?;
        info!("initialized at t = {}, first dt = {}", self.time, self.dt);
        Ok(())
    }

    /**
     * Advance every block by one time step and choose the next one.
     */
    pub fn update_one_step(&mut self) -> Result<()> {
        self.run(self.round + 1, true)?;
        self.time += self.dt;
        self.cycle += 1;
        self.new_time_step()
    }

    fn run(&mut self, round: u64, step: bool) -> Result<()> {
        self.round = round;
        self.post.begin_round(round);

        let context = StepContext {
            dt: self.dt,
            post: self.post.clone(),
            physics: self.physics.clone(),
        };
        let list = if step { &self.step } else { &self.initial };
        let post = &self.post;
        let patience = post.patience();
        let mut idle = Duration::from_secs(0);

        run_round(list, self.blocks.as_mut_slice(), &context, &self.pool, || {
            if post.wait(IDLE_WAIT)? > 0 {
                idle = Duration::from_secs(0);
            } else {
                idle += IDLE_WAIT;
            }
            if idle > patience {
                return Err(Error::transport(format!(
                    "rank {} waited {:?} in round {} without receiving boundary data",
                    post.rank(),
                    idle,
                    round
                )));
            }
            Ok(())
        })
    }

    /**
     * Choose the next time step: the Courant number times the smallest
     * stable step of any block on any worker, growing by at most a factor
     * of two.
     */
    pub fn new_time_step(&mut self) -> Result<()> {
        let local = self.blocks.iter().map(|b| b.new_dt).fold(f64::MAX, f64::min);
        let global = self.post.all_reduce_min(local)?;
        self.dt = (self.config.cfl_number * global).min(2.0 * self.dt);
        Ok(())
    }

    /**
     * Sum of each cell variable times zone volume over this worker's blocks.
     */
    pub fn local_totals(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.config.num_variables];

        for block in self.blocks.iter() {
            for index in block.interior().iter() {
                let volume = block.coords.volume(index);
                for (q, total) in totals.iter_mut().enumerate() {
                    *total += block.cons.get(q, index) * volume;
                }
            }
        }
        totals
    }

    fn header(&self) -> Header {
        Header {
            num_blocks: self.leaves.len() as u64,
            root_level: self.root_level,
            max_level: self.leaves.iter().map(|l| l.level).max().unwrap_or(self.root_level),
            root_blocks: self.root_blocks,
            mesh: self.config.mesh_region(),
            block_cells: self.config.block_cells,
            boundaries: self.config.boundaries,
            time: self.time,
            dt: self.dt,
            cycle: self.cycle,
            num_variables: self.config.num_variables,
            face_field: self.config.face_field,
        }
    }

    /**
     * Write a checkpoint of the whole mesh. Every worker must call this:
     * rank 0 creates the file and writes the preamble, then each worker
     * writes its own blocks in place.
     */
    pub fn write_checkpoint(&self, path: &Path) -> Result<()> {
        let header = self.header();
        let opening = |e| Error::io(IoErrorKind::Other, format!("opening {}", path.display()), e);

        if self.rank() == 0 {
            let file = File::create(path).map_err(opening)?;
            file.set_len(header.total_len()).map_err(|e| Error::io(IoErrorKind::ShortWrite, "sizing the checkpoint", e))?;
            let mut stream = BufWriter::new(file);
            restart::write_preamble(&mut stream, &header, &self.leaves, &self.costs)?;
            stream.into_inner().map_err(|e| Error::io(IoErrorKind::ShortWrite, "flushing the checkpoint", e.into_error()))?;
        }
        self.post.barrier()?;

        {
            let file = OpenOptions::new().write(true).open(path).map_err(opening)?;
            let mut stream = BufWriter::new(file);

            for block in self.blocks.iter() {
                restart::write_block(&mut stream, &header, block)?;
            }
            stream.into_inner().map_err(|e| Error::io(IoErrorKind::ShortWrite, "flushing the checkpoint", e.into_error()))?;
        }
        self.post.barrier()?;

        if self.rank() == 0 {
            info!("wrote checkpoint {} at cycle {}", path.display(), self.cycle);
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::advection::{GaussianPulse, UpwindAdvection};
    use crate::config::RefinementRegion;
    use crate::message::LocalCommunicator;

    fn config() -> MeshConfig {
        MeshConfig {
            mesh_cells: [32, 1, 1],
            block_cells: [8, 1, 1],
            boundaries: [BoundaryFlag::Periodic; 6],
            cfl_number: 0.5,
            ..MeshConfig::default()
        }
    }

    fn single(config: MeshConfig) -> Mesh {
        let comm = LocalCommunicator::group(1).pop().unwrap();
        let physics = Arc::new(UpwindAdvection { velocity: [1.0, 0.0, 0.0] });
        Mesh::new(config, Box::new(comm), physics).unwrap()
    }

    #[test]
    fn refinement_regions_are_balanced() {
        let config = MeshConfig {
            mesh_cells: [64, 1, 1],
            block_cells: [8, 1, 1],
            num_levels: 3,
            regions: vec![RefinementRegion { level: 2, lower: [0.0; 3], upper: [0.1, 1.0, 1.0] }],
            ..MeshConfig::default()
        };
        let tree = build_tree(&config).unwrap();
        let levels: Vec<_> = tree.leaves().iter().map(|l| l.level - tree.root_level()).collect();
        assert_eq!(levels, vec![2, 2, 2, 2, 1, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn report_tolerates_too_few_blocks() {
        let report = mesh_report(&config(), 8).unwrap();
        assert_eq!(report.blocks.len(), 4);
        assert_eq!(report.ranks.len(), 8);
        assert_eq!(report.ranks[0].blocks, 0);
        assert_eq!(report.ranks[7].blocks, 1);
        assert!(PartitionPlan::new(&[1.0; 4], 8, config().refinement, false).is_err());
    }

    #[test]
    fn periodic_advection_conserves_mass() {
        let mut mesh = single(config());
        let pulse = GaussianPulse { center: [0.5, 0.0, 0.0], width: 0.1, background: 0.0 };
        mesh.initialize(Some(&pulse)).unwrap();
        assert!((mesh.dt - 0.5 / 32.0).abs() < 1e-12);

        let before = mesh.local_totals()[0];
        for _ in 0..20 {
            mesh.update_one_step().unwrap();
        }
        assert_eq!(mesh.cycle, 20);
        assert!((mesh.local_totals()[0] - before).abs() < 1e-12);
    }

    #[test]
    fn checkpoint_restores_the_mesh() {
        let dir = std::env::temp_dir().join(format!("octmesh-mesh-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("restart.chk");

        let mut mesh = single(config());
        mesh.initialize(Some(&GaussianPulse { center: [0.3, 0.0, 0.0], width: 0.1, background: 1.0 })).unwrap();
        mesh.update_one_step().unwrap();
        mesh.write_checkpoint(&path).unwrap();

        let comm = LocalCommunicator::group(1).pop().unwrap();
        let restored = Mesh::from_checkpoint(&path, config(), Box::new(comm), Arc::new(UpwindAdvection { velocity: [1.0, 0.0, 0.0] })).unwrap();

        assert_eq!(restored.cycle, 1);
        assert_eq!(restored.time, mesh.time);
        assert_eq!(restored.dt, mesh.dt);
        for (a, b) in mesh.blocks().iter().zip(restored.blocks().iter()) {
            assert_eq!(a.cons, b.cons);
            assert_eq!(a.neighbors, b.neighbors);
            assert_eq!(a.coords, b.coords);
            assert_eq!(a.bcs, b.bcs);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
