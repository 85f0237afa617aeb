use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;

use octmesh::advection::{GaussianPulse, UpwindAdvection};
use octmesh::config::{MeshConfig, RefinementMode, RefinementRegion};
use octmesh::error::{Error, IoErrorKind, Result};
use octmesh::mesh::{mesh_report, Mesh};
use octmesh::message::{Communicator, LocalCommunicator, TcpHost};
use octmesh::neighbor::BoundaryFlag;

#[derive(Debug, Parser)]
#[clap(version = "0.1", author = "J. Zrake <jzrake@clemson.edu>")]
struct Opts {
    #[clap(long, default_value = "64")]
    nx1: usize,

    #[clap(long, default_value = "1")]
    nx2: usize,

    #[clap(long, default_value = "1")]
    nx3: usize,

    /// Zones per block along each axis
    #[clap(long, default_value = "16")]
    mb1: usize,

    #[clap(long, default_value = "1")]
    mb2: usize,

    #[clap(long, default_value = "1")]
    mb3: usize,

    /// Boundary condition on every domain face: outflow, reflect or periodic
    #[clap(short = 'b', long, default_value = "periodic", parse(try_from_str = parse_boundary))]
    boundary: BoundaryFlag,

    #[clap(long, default_value = "0.4")]
    cfl: f64,

    #[clap(long, default_value = "1")]
    num_levels: u32,

    /// A static refinement region, as level,x1min,x1max[,x2min,x2max[,x3min,x3max]]
    #[clap(short = 'r', long = "region", parse(try_from_str = parse_region))]
    regions: Vec<RefinementRegion>,

    #[clap(long)]
    adaptive: bool,

    #[clap(long, default_value = "1")]
    num_variables: usize,

    #[clap(long)]
    face_field: bool,

    /// Advection velocity along x1, x2 and x3
    #[clap(long, default_value = "1.0")]
    v1: f64,

    #[clap(long, default_value = "0.0")]
    v2: f64,

    #[clap(long, default_value = "0.0")]
    v3: f64,

    #[clap(long, default_value = "0.1")]
    pulse_width: f64,

    /// Simulation time at which to stop
    #[clap(long, default_value = "1.0")]
    tlim: f64,

    /// Rayon threads per worker
    #[clap(short = 't', long, default_value = "1")]
    num_threads: usize,

    /// In-process workers, each pinned to a core when possible
    #[clap(short = 'w', long, default_value = "1")]
    workers: usize,

    /// This process's rank among the TCP peers
    #[clap(long)]
    rank: Option<usize>,

    /// Address of every TCP peer, in rank order
    #[clap(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Checkpoint to restart from
    #[clap(long)]
    restart: Option<PathBuf>,

    /// Where the final checkpoint is written
    #[clap(short = 'o', long, default_value = "octmesh.chk")]
    output: PathBuf,

    /// Lay out and partition the mesh, report, and exit
    #[clap(long)]
    test: bool,

    /// With --test, also write the mesh report as CBOR
    #[clap(long)]
    report: Option<PathBuf>,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: LevelFilter,
}




// ============================================================================
impl Opts {

    fn config(&self) -> MeshConfig {
        MeshConfig {
            mesh_cells: [self.nx1, self.nx2, self.nx3],
            block_cells: [self.mb1, self.mb2, self.mb3],
            boundaries: [self.boundary; 6],
            cfl_number: self.cfl,
            num_threads: self.num_threads,
            refinement: if self.adaptive { RefinementMode::Adaptive } else { RefinementMode::Static },
            num_levels: self.num_levels,
            regions: self.regions.clone(),
            num_variables: self.num_variables,
            face_field: self.face_field,
            ..MeshConfig::default()
        }
    }

    fn num_ranks(&self) -> usize {
        if self.rank.is_some() {
            self.peers.len()
        } else {
            self.workers
        }
    }
}

fn parse_boundary(s: &str) -> std::result::Result<BoundaryFlag, String> {
    match s {
        "outflow" => Ok(BoundaryFlag::Outflow),
        "reflect" => Ok(BoundaryFlag::Reflect),
        "periodic" => Ok(BoundaryFlag::Periodic),
        _ => Err(format!("unknown boundary condition '{}'", s)),
    }
}

fn parse_region(s: &str) -> std::result::Result<RefinementRegion, String> {
    let mut words = s.split(',');
    let level = words
        .next()
        .and_then(|w| w.trim().parse().ok())
        .ok_or_else(|| format!("region '{}' must start with a level", s))?;
    let bounds = words
        .map(|w| w.trim().parse::<f64>().map_err(|e| format!("bad region bound '{}': {}", w, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if bounds.is_empty() || bounds.len() % 2 != 0 || bounds.len() > 6 {
        return Err(format!("region '{}' needs a lower and upper bound per axis", s));
    }
    let mut region = RefinementRegion { level, lower: [0.0; 3], upper: [1.0; 3] };

    for (axis, pair) in bounds.chunks(2).enumerate() {
        region.lower[axis] = pair[0];
        region.upper[axis] = pair[1];
    }
    Ok(region)
}




// ============================================================================
fn drive(opts: &Opts, comm: Box<dyn Communicator>, stop: &AtomicBool) -> Result<()> {
    let config = opts.config();
    let physics = Arc::new(UpwindAdvection { velocity: [opts.v1, opts.v2, opts.v3] });

    let mut mesh = match &opts.restart {
        Some(path) => {
            let mut mesh = Mesh::from_checkpoint(path, config, comm, physics)?;
            mesh.initialize(None)?;
            mesh
        }
        None => {
            let center = [0, 1, 2].map(|a| 0.5 * (config.lower[a] + config.upper[a]));
            let pulse = GaussianPulse { center, width: opts.pulse_width, background: 1.0 };
            let mut mesh = Mesh::new(config, comm, physics)?;
            mesh.initialize(Some(&pulse))?;
            mesh
        }
    };
    let start = std::time::Instant::now();

    while mesh.time < opts.tlim {
        let local = if stop.load(Ordering::SeqCst) { 0.0 } else { 1.0 };

        if mesh.postmaster().all_reduce_min(local)? == 0.0 {
            warn!("stopping early at cycle {}", mesh.cycle);
            break;
        }
        mesh.dt = mesh.dt.min(opts.tlim - mesh.time);
        mesh.update_one_step()?;

        if mesh.rank() == 0 {
            info!("[{:06}] t={:.5} dt={:.3e}", mesh.cycle, mesh.time, mesh.dt);
        }
    }
    if mesh.rank() == 0 {
        info!("ran {} cycles in {:.3}s", mesh.cycle, start.elapsed().as_secs_f64());
    }
    mesh.write_checkpoint(&opts.output)
}

fn run_local(opts: Arc<Opts>, stop: Arc<AtomicBool>) -> Result<()> {
    let cores = core_affinity::get_core_ids().unwrap_or_default();

    if cores.len() < opts.workers {
        warn!("{} workers on {} cores, workers will not be pinned", opts.workers, cores.len());
    }
    let pin = cores.len() >= opts.workers;

    let handles: Vec<_> = LocalCommunicator::group(opts.workers)
        .into_iter()
        .zip(cores.into_iter().map(Some).chain(std::iter::repeat(None)))
        .map(|(comm, core)| {
            let opts = opts.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                if let (true, Some(core)) = (pin, core) {
                    core_affinity::set_for_current(core);
                }
                drive(&opts, Box::new(comm), &stop)
            })
        })
        .collect();

    let mut result = Ok(());

    for (rank, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("worker {}: {}", rank, e);
                result = Err(e);
            }
            Err(_) => {
                error!("worker {} panicked", rank);
                result = Err(Error::transport(format!("worker {} panicked", rank)));
            }
        }
    }
    result
}

fn run_tcp(opts: &Opts, rank: usize, stop: &AtomicBool) -> Result<()> {
    let (mut host, comm) = TcpHost::new(rank, opts.peers.clone())?;
    let result = drive(opts, Box::new(comm), stop);
    host.join();
    result
}

fn write_report(opts: &Opts) -> Result<()> {
    let report = mesh_report(&opts.config(), opts.num_ranks())?;
    report.log();

    if let Some(path) = &opts.report {
        let file = File::create(path).map_err(|e| {
            Error::io(IoErrorKind::Other, format!("creating {}", path.display()), e)
        })?;
        report.write_cbor(file)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn run(opts: Opts) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));

    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, stop.clone())
            .map_err(|e| Error::config(format!("cannot install a signal handler: {}", e)))?;
    }
    if opts.test {
        return write_report(&opts);
    }
    match opts.rank {
        Some(rank) => run_tcp(&opts, rank, &stop),
        None => run_local(Arc::new(opts), stop),
    }
}

fn main() {
    let opts = Opts::parse();

    if let Err(e) = SimpleLogger::new().with_level(opts.log_level).init() {
        eprintln!("{}", e);
    }
    info!("{:?}", opts);

    if let Err(e) = run(opts) {
        error!("{}", e);
        std::process::exit(1);
    }
}
