use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use octmesh::advection::{GaussianPulse, UpwindAdvection};
use octmesh::config::{MeshConfig, RefinementRegion};
use octmesh::mesh::Mesh;
use octmesh::message::{Communicator, LocalCommunicator};
use octmesh::neighbor::{BoundaryFlag, Face, FaceNeighbor};

/// Interior values of one block, keyed by global id.
type Snapshot = Vec<(usize, Vec<f64>)>;

fn run_workers<F, T>(num_workers: usize, f: F) -> Vec<T>
where
    F: Fn(Box<dyn Communicator>) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = LocalCommunicator::group(num_workers)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(Box::new(comm)))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn physics(velocity: [f64; 3]) -> Arc<UpwindAdvection> {
    Arc::new(UpwindAdvection { velocity })
}

fn pulse() -> GaussianPulse {
    GaussianPulse { center: [0.5, 0.5, 0.5], width: 0.15, background: 1.0 }
}

fn snapshot(mesh: &Mesh) -> Snapshot {
    mesh.blocks()
        .iter()
        .map(|b| (b.gid, b.interior().iter().map(|i| b.cons.get(0, i)).collect()))
        .collect()
}

fn merged(parts: Vec<Snapshot>) -> Snapshot {
    let mut all: Snapshot = parts.into_iter().flatten().collect();
    all.sort_by_key(|(gid, _)| *gid);
    all
}

fn assert_same(a: &Snapshot, b: &Snapshot) {
    assert_eq!(a.len(), b.len());
    for ((ga, da), (gb, db)) in a.iter().zip(b) {
        assert_eq!(ga, gb);
        for (x, y) in da.iter().zip(db) {
            assert!((x - y).abs() < 1e-14, "block {} differs: {} vs {}", ga, x, y);
        }
    }
}

fn advance(config: MeshConfig, velocity: [f64; 3], steps: usize, comm: Box<dyn Communicator>) -> Snapshot {
    let mut mesh = Mesh::new(config, comm, physics(velocity)).unwrap();
    mesh.initialize(Some(&pulse())).unwrap();
    for _ in 0..steps {
        mesh.update_one_step().unwrap();
    }
    snapshot(&mesh)
}

fn config_8x8() -> MeshConfig {
    MeshConfig {
        mesh_cells: [8, 8, 1],
        block_cells: [4, 4, 1],
        boundaries: [BoundaryFlag::Periodic; 6],
        cfl_number: 0.3,
        ..MeshConfig::default()
    }
}

fn refined_2d() -> MeshConfig {
    MeshConfig {
        mesh_cells: [16, 16, 1],
        block_cells: [4, 4, 1],
        boundaries: [BoundaryFlag::Periodic; 6],
        cfl_number: 0.4,
        num_levels: 2,
        regions: vec![RefinementRegion { level: 1, lower: [0.3, 0.3, 0.0], upper: [0.45, 0.45, 1.0] }],
        ..MeshConfig::default()
    }
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("octmesh-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}




#[test]
fn two_workers_split_the_8x8_grid() {
    let layouts = run_workers(2, |comm| {
        let mesh = Mesh::new(config_8x8(), comm, physics([1.0, 1.0, 0.0])).unwrap();
        let block0 = mesh.blocks().get(0).map(|b| (b.gid, b.neighbors.get(Face::OuterX1).clone()));
        (mesh.rank(), mesh.blocks().iter().map(|b| b.gid).collect::<Vec<_>>(), block0)
    });

    assert_eq!(layouts[0].1, vec![0, 1]);
    assert_eq!(layouts[1].1, vec![2, 3]);

    match &layouts[0].2 {
        Some((0, FaceNeighbor::Same(nb))) => {
            assert_eq!(nb.gid, 1);
            assert_eq!(nb.rank, 0);
        }
        other => panic!("unexpected block 0 neighbor {:?}", other),
    }
}

#[test]
fn split_runs_match_a_single_worker() {
    let velocity = [1.0, 0.5, 0.0];
    let serial = merged(run_workers(1, move |comm| advance(config_8x8(), velocity, 12, comm)));
    let split = merged(run_workers(2, move |comm| advance(config_8x8(), velocity, 12, comm)));
    let spread = merged(run_workers(4, move |comm| advance(config_8x8(), velocity, 12, comm)));

    assert_eq!(serial.len(), 4);
    assert_same(&serial, &split);
    assert_same(&serial, &spread);
}

#[test]
fn refined_runs_match_a_single_worker() {
    let velocity = [1.0, 0.5, 0.0];
    let serial = merged(run_workers(1, move |comm| advance(refined_2d(), velocity, 8, comm)));
    let split = merged(run_workers(3, move |comm| advance(refined_2d(), velocity, 8, comm)));

    assert_eq!(serial.len(), 19);
    assert_same(&serial, &split);
}

#[test]
fn coarse_block_hears_from_both_finer_neighbors() {
    let found = run_workers(2, |comm| {
        let mesh = Mesh::new(refined_2d(), comm, physics([1.0, 0.0, 0.0])).unwrap();
        mesh.blocks()
            .iter()
            .filter_map(|b| match b.neighbors.get(Face::OuterX1) {
                FaceNeighbor::Finer(slots) => Some(slots.iter().flatten().count()),
                _ => None,
            })
            .collect::<Vec<_>>()
    });
    let counts: Vec<usize> = found.into_iter().flatten().collect();
    assert_eq!(counts, vec![2]);
}

#[test]
fn periodic_advection_conserves_mass_across_levels() {
    for config in vec![
        refined_2d(),
        MeshConfig {
            mesh_cells: [64, 1, 1],
            block_cells: [8, 1, 1],
            boundaries: [BoundaryFlag::Periodic; 6],
            num_levels: 2,
            regions: vec![RefinementRegion { level: 1, lower: [0.3, 0.0, 0.0], upper: [0.6, 1.0, 1.0] }],
            ..MeshConfig::default()
        },
    ] {
        let totals = run_workers(2, move |comm| {
            let mut mesh = Mesh::new(config.clone(), comm, physics([1.0, 0.5, 0.0])).unwrap();
            mesh.initialize(Some(&pulse())).unwrap();
            let before = mesh.local_totals()[0];
            for _ in 0..30 {
                mesh.update_one_step().unwrap();
            }
            (before, mesh.local_totals()[0])
        });
        let before: f64 = totals.iter().map(|t| t.0).sum();
        let after: f64 = totals.iter().map(|t| t.1).sum();
        assert!(((after - before) / before).abs() < 1e-12, "mass went from {} to {}", before, after);
    }
}

#[test]
fn restart_on_a_different_number_of_workers() {
    let dir = scratch("restart");
    let path = dir.join("mesh.chk");
    let velocity = [1.0, 0.5, 0.0];

    let reference = merged(run_workers(1, move |comm| advance(refined_2d(), velocity, 10, comm)));

    let written = path.clone();
    run_workers(2, move |comm| {
        let mut mesh = Mesh::new(refined_2d(), comm, physics(velocity)).unwrap();
        mesh.initialize(Some(&pulse())).unwrap();
        for _ in 0..4 {
            mesh.update_one_step().unwrap();
        }
        mesh.write_checkpoint(&written).unwrap();
    });

    let read = path.clone();
    let parts = run_workers(3, move |comm| {
        let mut mesh = Mesh::from_checkpoint(&read, refined_2d(), comm, physics(velocity)).unwrap();
        assert_eq!(mesh.cycle, 4);
        mesh.initialize(None).unwrap();
        for _ in 0..6 {
            mesh.update_one_step().unwrap();
        }
        snapshot(&mesh)
    });
    assert_same(&reference, &merged(parts));

    let mismatched = MeshConfig { block_cells: [8, 8, 1], ..refined_2d() };
    let comm = LocalCommunicator::group(1).pop().unwrap();
    assert!(Mesh::from_checkpoint(&path, mismatched, Box::new(comm), physics(velocity)).is_err());

    std::fs::remove_dir_all(&dir).unwrap();
}
