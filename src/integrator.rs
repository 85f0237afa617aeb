//! The per-block capabilities a solver plugs into the mesh, and the task
//! lists that drive them through a round.

use std::sync::Arc;

use crate::error::Result;
use crate::exchange::boundary::{apply_physical_boundaries, receive_boundaries, send_boundaries};
use crate::exchange::{Postmaster, Quantity};
use crate::mesh_block::MeshBlock;
use crate::task::{TaskId, TaskList, TaskOutcome};

/// Advances the data on a single block. Implementations see the block's
/// ghost zones already filled by the boundary exchange.
///
pub trait BlockUpdate: Send + Sync {
    /// Fill `block.flux` from the conserved variables, ghosts included.
    fn calculate_fluxes(&self, block: &mut MeshBlock) -> Result<()>;

    /// Advance the interior of the block by `dt` using `block.flux`.
    fn integrate(&self, block: &mut MeshBlock, dt: f64) -> Result<()>;

    /// Return the largest stable time step on the block, before the Courant
    /// number is applied.
    fn stable_time_step(&self, block: &MeshBlock) -> f64;
}

/// Populates a freshly built block with its initial state. Called once per
/// block on a new run, and never on a restart.
///
pub trait ProblemGenerator: Send + Sync {
    fn generate(&self, block: &mut MeshBlock) -> Result<()>;
}

/// What every task in a round can see besides its own block.
///
#[derive(Clone)]
pub struct StepContext {
    pub dt: f64,
    pub post: Arc<Postmaster>,
    pub physics: Arc<dyn BlockUpdate>,
}

fn send(block: &mut MeshBlock, context: &StepContext, arg: usize) -> Result<TaskOutcome> {
    send_boundaries(block, Quantity::from_index(arg), &context.post)?;
    Ok(TaskOutcome::Done)
}

fn receive(block: &mut MeshBlock, context: &StepContext, arg: usize) -> Result<TaskOutcome> {
    let complete = receive_boundaries(block, Quantity::from_index(arg), &context.post)?;
    Ok(TaskOutcome::done_if(complete))
}

fn physical_boundaries(block: &mut MeshBlock, _: &StepContext, _: usize) -> Result<TaskOutcome> {
    apply_physical_boundaries(block)?;
    Ok(TaskOutcome::Done)
}

fn new_block_dt(block: &mut MeshBlock, context: &StepContext, _: usize) -> Result<TaskOutcome> {
    block.new_dt = context.physics.stable_time_step(block);
    Ok(TaskOutcome::Done)
}

/// Append the exchange of cell data (and the face field, if enabled) after
/// `after`, followed by the physical boundaries and the new time step.
fn add_boundary_tasks(list: &mut TaskList<StepContext>, after: &[TaskId], face_field: bool) -> Result<()> {
    let cons = Quantity::Cons.index();
    let field = Quantity::Field.index();

    list.add("send_cons", after, cons, send)?;
    let mut received = vec![list.add("receive_cons", after, cons, receive)?];

    if face_field {
        list.add("send_field", after, field, send)?;
        received.push(list.add("receive_field", after, field, receive)?);
    }
    let bc = list.add("physical_boundaries", &received, 0, physical_boundaries)?;
    list.add("new_block_dt", &[bc], 0, new_block_dt)?;
    Ok(())
}

/// The task list run once when a mesh starts: fill every ghost zone and
/// find the first time step.
///
pub fn initial_tasks(face_field: bool) -> Result<TaskList<StepContext>> {
    let mut list = TaskList::new();
    add_boundary_tasks(&mut list, &[], face_field)?;
    Ok(list)
}

/// The task list for one time step: fluxes, flux correction at level
/// interfaces, the update, and the boundary exchange for the next step.
///
pub fn step_tasks(face_field: bool) -> Result<TaskList<StepContext>> {
    let flux = Quantity::Flux.index();
    let mut list = TaskList::new();

    let calc = list.add("calculate_fluxes", &[], 0, |block, context: &StepContext, _| {
        context.physics.calculate_fluxes(block)?;
        Ok(TaskOutcome::Done)
    })?;
    let sent = list.add("send_flux", &[calc], flux, send)?;
    let received = list.add("receive_flux", &[calc], flux, receive)?;

    let integrate = list.add("integrate", &[sent, received], 0, |block, context: &StepContext, _| {
        context.physics.integrate(block, context.dt)?;
        Ok(TaskOutcome::Done)
    })?;
    add_boundary_tasks(&mut list, &[integrate], face_field)?;
    Ok(list)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn task_lists_have_the_expected_shape() {
        let names: Vec<_> = step_tasks(false).unwrap().names().map(String::from).collect();
        assert_eq!(
            names,
            vec![
                "calculate_fluxes",
                "send_flux",
                "receive_flux",
                "integrate",
                "send_cons",
                "receive_cons",
                "physical_boundaries",
                "new_block_dt",
            ]
        );
        assert_eq!(initial_tasks(true).unwrap().len(), 6);
    }
}
