//! A first-order upwind scheme for passive advection at a constant
//! velocity, and a Gaussian initial state. Every cell variable is advected
//! the same way.

use crate::error::Result;
use crate::integrator::{BlockUpdate, ProblemGenerator};
use crate::mesh_block::MeshBlock;
use crate::patch::Patch;

/// Passive advection at a fixed velocity.
///
#[derive(Clone, Copy, Debug)]
pub struct UpwindAdvection {
    pub velocity: [f64; 3],
}

impl UpwindAdvection {
    fn compute_flux(&self, cons: &Patch, axis: usize, flux: &mut Patch) {
        let v = self.velocity[axis];

        for q in 0..flux.num_fields() {
            for index in flux.space().clone().iter() {
                let mut upwind = index;
                if v > 0.0 {
                    upwind[axis] -= 1;
                }
                flux.set(q, index, v * cons.get(q, upwind));
            }
        }
    }
}

impl BlockUpdate for UpwindAdvection {
    fn calculate_fluxes(&self, block: &mut MeshBlock) -> Result<()> {
        let active = block.active();

        for axis in (0..3).filter(|&a| active[a]) {
            self.compute_flux(&block.cons, axis, &mut block.flux[axis]);
        }
        Ok(())
    }

    fn integrate(&self, block: &mut MeshBlock, dt: f64) -> Result<()> {
        let active = block.active();

        for q in 0..block.cons.num_fields() {
            for index in block.interior().iter() {
                let mut du = 0.0;

                for axis in (0..3).filter(|&a| active[a]) {
                    let mut upper = index;
                    upper[axis] += 1;
                    let f = &block.flux[axis];
                    du -= f.get(q, upper) * block.coords.area(axis, upper) - f.get(q, index) * block.coords.area(axis, index);
                }
                *block.cons.get_mut(q, index) += dt * du / block.coords.volume(index);
            }
        }
        Ok(())
    }

    fn stable_time_step(&self, block: &MeshBlock) -> f64 {
        let active = block.active();
        let mut dt = f64::MAX;

        for axis in (0..3).filter(|&a| active[a] && self.velocity[a] != 0.0) {
            for i in block.interior().range(axis) {
                dt = dt.min(block.coords.dx(axis, i) / self.velocity[axis].abs());
            }
        }
        dt
    }
}

/// A Gaussian bump on a uniform background, the same in every variable.
///
#[derive(Clone, Copy, Debug)]
pub struct GaussianPulse {
    pub center: [f64; 3],
    pub width: f64,
    pub background: f64,
}

impl ProblemGenerator for GaussianPulse {
    fn generate(&self, block: &mut MeshBlock) -> Result<()> {
        let active = block.active();

        for index in block.interior().iter() {
            let r2: f64 = (0..3)
                .filter(|&a| active[a])
                .map(|a| (block.coords.x_center(a, index[a]) - self.center[a]).powi(2))
                .sum();
            let u = self.background + (-r2 / (self.width * self.width)).exp();

            for q in 0..block.cons.num_fields() {
                block.cons.set(q, index, u);
            }
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::config::RegionSize;
    use crate::exchange::boundary::apply_physical_boundaries;
    use crate::logical_location::LogicalLocation;
    use crate::mesh_block::Coordinates;
    use crate::neighbor::{BoundaryFlag, NeighborTable};

    fn block() -> MeshBlock {
        let size = RegionSize {
            min: [0.0; 3],
            max: [1.0; 3],
            ratio: [1.0; 3],
            cells: [8, 1, 1],
        };
        let bcs = [BoundaryFlag::Outflow; 6];
        let loc = LogicalLocation::root();
        let coords = Coordinates::new(&size, &size, &loc, 0, &bcs);
        MeshBlock::new(0, 0, loc, size, bcs, NeighborTable::default(), coords, 1, false, 1.0)
    }

    #[test]
    fn uniform_state_is_unchanged() {
        let scheme = UpwindAdvection { velocity: [1.0, 0.0, 0.0] };
        let mut b = block();
        for x in b.cons.data_mut() {
            *x = 2.0;
        }
        scheme.calculate_fluxes(&mut b).unwrap();
        scheme.integrate(&mut b, 0.1).unwrap();
        assert!(b.interior().iter().all(|i| (b.cons.get(0, i) - 2.0).abs() < 1e-14));
    }

    #[test]
    fn step_moves_mass_downwind() {
        let scheme = UpwindAdvection { velocity: [1.0, 0.0, 0.0] };
        let mut b = block();
        b.cons.set(0, [3, 0, 0], 1.0);
        apply_physical_boundaries(&mut b).unwrap();

        let dt = scheme.stable_time_step(&b);
        assert!((dt - 0.125).abs() < 1e-14);

        scheme.calculate_fluxes(&mut b).unwrap();
        scheme.integrate(&mut b, dt).unwrap();
        assert!(b.cons.get(0, [3, 0, 0]).abs() < 1e-14);
        assert!((b.cons.get(0, [4, 0, 0]) - 1.0).abs() < 1e-14);
    }

    #[test]
    fn pulse_peaks_at_its_center() {
        let mut b = block();
        GaussianPulse { center: [0.5625, 0.0, 0.0], width: 0.1, background: 0.0 }.generate(&mut b).unwrap();
        assert!((b.cons.get(0, [4, 0, 0]) - 1.0).abs() < 1e-14);
        assert!(b.cons.get(0, [0, 0, 0]) < 1e-6);
    }
}
