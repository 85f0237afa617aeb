//! Octmesh is a distributed block-structured mesh for time-dependent
//! solvers of conservation laws. The domain is cut into a forest of
//! equally sized blocks addressed by an octree (a quadtree or binary tree in
//! fewer dimensions), with neighboring blocks differing by at most one level
//! of refinement. Blocks are partitioned over workers in global id order,
//! and each worker advances its blocks through a dependency-ordered list of
//! tasks, exchanging ghost zones and flux corrections with its neighbors as
//! their data becomes available. Whole meshes can be checkpointed to a
//! single file and restarted on a different number of workers.

pub mod advection;
pub mod block_tree;
pub mod config;
pub mod error;
pub mod exchange;
pub mod index_space;
pub mod integrator;
pub mod logical_location;
pub mod mesh;
pub mod mesh_block;
pub mod message;
pub mod neighbor;
pub mod partition;
pub mod patch;
pub mod registry;
pub mod restart;
pub mod task;
