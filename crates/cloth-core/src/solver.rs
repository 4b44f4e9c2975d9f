use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, error, trace};

use crate::cloth::Cloth;
use crate::config::{InterCollisionConfig, SolverConfig};
use crate::error::{ClothError, Result};
use crate::factory::Platform;
use crate::inter_collision::{inter_collide, InterCollisionBuffers, InterCollisionFilter, InterCollisionInstance, InterCollisionSizing};
use crate::kernel::{simulate_cloth, KernelReport, KernelScratch};
use crate::scratch::ScratchArena;

/// Stable reference to a cloth owned by a [`Solver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClothHandle {
    index: u32,
    generation: u32,
}

/// Totals of one [`Solver::simulate`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameSummary {
    pub num_simulated: usize,
    pub num_sleeping: usize,
    /// Cloths skipped because their scratch memory could not be reserved.
    pub num_failed: usize,
    pub num_iterations: u32,
    pub num_constraints: usize,
    pub num_self_collisions: usize,
    pub num_inter_collisions: usize,
}

struct Entry {
    cloth: Cloth,
    scratch: ScratchArena<KernelScratch>,
    simulating: bool,
    report: KernelReport,
}

impl Entry {
    /// Particles times sub-steps per second.
    fn cost(&self) -> f32 {
        self.cloth.num_particles() as f32 * self.cloth.solver_frequency()
    }

    fn simulate(&mut self, dt: f32) {
        self.report = simulate_cloth(&mut self.cloth, dt, &mut self.scratch.buffers);
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Simulates a set of cloths of one platform, frame by frame.
///
/// Every frame first runs each awake cloth's kernel (concurrently with the
/// `parallel` feature), then one inter-collision pass over all cloths that
/// ran. Backend failures do not panic or drop cloths: they latch an error
/// that stays set until [`Solver::clear_error`].
pub struct Solver {
    platform: Platform,
    config: SolverConfig,
    slots: Vec<Slot>,
    free: Vec<u32>,
    inter_collision: ScratchArena<InterCollisionBuffers>,
    filter: Option<Box<InterCollisionFilter>>,
    error: Option<ClothError>,
}

impl fmt::Debug for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("platform", &self.platform)
            .field("config", &self.config)
            .field("num_cloths", &self.num_cloths())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Solver {
    pub fn new(platform: Platform, config: SolverConfig) -> Self {
        debug!(?platform, scratch_limit = ?config.scratch_limit, "solver created");
        Self {
            platform,
            config,
            slots: Vec::new(),
            free: Vec::new(),
            inter_collision: ScratchArena::new(),
            filter: None,
            error: None,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn set_scratch_limit(&mut self, limit: Option<usize>) {
        self.config.scratch_limit = limit;
    }

    // --- cloth ownership ---

    /// Take ownership of `cloth`. The cloth must belong to the solver's
    /// platform.
    pub fn add_cloth(&mut self, cloth: Cloth) -> Result<ClothHandle> {
        if cloth.platform() != self.platform {
            return Err(ClothError::PlatformMismatch);
        }
        let particles = cloth.num_particles();
        let entry = Entry {
            cloth,
            scratch: ScratchArena::new(),
            simulating: false,
            report: KernelReport::default(),
        };

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                ClothHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                ClothHandle {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        };
        debug!(index = handle.index, particles, "cloth added");
        Ok(handle)
    }

    /// Give back the cloth behind `handle`; the handle becomes invalid.
    pub fn remove_cloth(&mut self, handle: ClothHandle) -> Option<Cloth> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        debug!(index = handle.index, "cloth removed");
        Some(entry.cloth)
    }

    fn entry(&self, handle: ClothHandle) -> Option<&Entry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn cloth(&self, handle: ClothHandle) -> Result<&Cloth> {
        self.entry(handle).map(|e| &e.cloth).ok_or(ClothError::UnknownCloth)
    }

    pub fn cloth_mut(&mut self, handle: ClothHandle) -> Result<&mut Cloth> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .map(|e| &mut e.cloth)
            .ok_or(ClothError::UnknownCloth)
    }

    pub fn num_cloths(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    /// Handles of all owned cloths.
    pub fn handles(&self) -> impl Iterator<Item = ClothHandle> + '_ {
        self.slots.iter().enumerate().filter(|(_, slot)| slot.entry.is_some()).map(|(index, slot)| ClothHandle {
            index: index as u32,
            generation: slot.generation,
        })
    }

    // --- inter-collision ---

    pub fn set_inter_collision_distance(&mut self, distance: f32) {
        self.config.inter_collision.distance = distance;
    }

    pub fn inter_collision_distance(&self) -> f32 {
        self.config.inter_collision.distance
    }

    pub fn set_inter_collision_stiffness(&mut self, stiffness: f32) {
        self.config.inter_collision.stiffness = stiffness;
    }

    pub fn inter_collision_stiffness(&self) -> f32 {
        self.config.inter_collision.stiffness
    }

    pub fn set_inter_collision_iterations(&mut self, iterations: u32) {
        self.config.inter_collision.iterations = iterations;
    }

    pub fn inter_collision_iterations(&self) -> u32 {
        self.config.inter_collision.iterations
    }

    /// Fraction of an inter-collision correction applied to velocity.
    pub fn set_inter_collision_elasticity(&mut self, elasticity: f32) {
        self.config.inter_collision.elasticity = elasticity;
    }

    pub fn inter_collision_elasticity(&self) -> f32 {
        self.config.inter_collision.elasticity
    }

    /// Only pairs of cloths whose user data the filter accepts collide.
    pub fn set_inter_collision_filter<F>(&mut self, filter: F)
    where
        F: Fn(u64, u64) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
    }

    pub fn clear_inter_collision_filter(&mut self) {
        self.filter = None;
    }

    // --- errors ---

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn last_error(&self) -> Option<&ClothError> {
        self.error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    fn record_error(slot: &mut Option<ClothError>, err: ClothError) {
        error!(%err, "solver error");
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    // --- simulation ---

    /// Advance every awake cloth by `dt` seconds and resolve collisions
    /// between them.
    pub fn simulate(&mut self, dt: f32) -> FrameSummary {
        let mut summary = FrameSummary::default();
        if dt == 0.0 {
            return summary;
        }

        self.begin_frame(&mut summary);
        self.run_kernels(dt, &mut summary);
        self.end_frame(&mut summary);

        trace!(
            dt,
            simulated = summary.num_simulated,
            sleeping = summary.num_sleeping,
            inter_collisions = summary.num_inter_collisions,
            "frame simulated"
        );
        summary
    }

    /// Select awake cloths, size their scratch and push particles to the
    /// device.
    fn begin_frame(&mut self, summary: &mut FrameSummary) {
        let limit = self.config.scratch_limit;
        for entry in self.slots.iter_mut().filter_map(|slot| slot.entry.as_mut()) {
            entry.simulating = false;
            entry.report = KernelReport::default();

            if entry.cloth.is_asleep() {
                summary.num_sleeping += 1;
                continue;
            }

            if let Err(err) = entry.scratch.reserve(&entry.cloth, limit) {
                summary.num_failed += 1;
                Self::record_error(&mut self.error, err);
                continue;
            }

            entry.cloth.particles.sync_to_device();
            entry.simulating = true;
            summary.num_simulated += 1;
        }
    }

    fn run_kernels(&mut self, dt: f32, summary: &mut FrameSummary) {
        let mut tasks: Vec<&mut Entry> = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.entry.as_mut())
            .filter(|entry| entry.simulating)
            .collect();

        // most expensive first so parallel tasks finish evenly
        tasks.sort_by(|a, b| b.cost().total_cmp(&a.cost()));

        #[cfg(feature = "parallel")]
        tasks.par_iter_mut().for_each(|entry| entry.simulate(dt));
        #[cfg(not(feature = "parallel"))]
        tasks.iter_mut().for_each(|entry| entry.simulate(dt));

        for entry in &tasks {
            summary.num_iterations += entry.report.num_iterations;
            summary.num_constraints += entry.report.num_constraints;
            summary.num_self_collisions += entry.report.num_self_collisions;
        }
    }

    /// Advance double buffers, collide cloths with each other and pull
    /// particles back to the host.
    fn end_frame(&mut self, summary: &mut FrameSummary) {
        let mut entries: Vec<&mut Entry> = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.entry.as_mut())
            .filter(|entry| entry.simulating)
            .collect();

        for entry in entries.iter_mut() {
            entry.cloth.end_frame();
        }

        summary.num_inter_collisions = Self::collide_cloths(
            &mut entries,
            &self.config,
            self.filter.as_deref(),
            &mut self.inter_collision,
            &mut self.error,
        );

        for entry in entries.iter_mut() {
            entry.cloth.particles.sync_to_host();
        }
    }

    fn collide_cloths(
        entries: &mut [&mut Entry],
        config: &SolverConfig,
        filter: Option<&InterCollisionFilter>,
        buffers: &mut ScratchArena<InterCollisionBuffers>,
        error: &mut Option<ClothError>,
    ) -> usize {
        let params: &InterCollisionConfig = &config.inter_collision;
        if params.iterations == 0 || params.distance == 0.0 || entries.len() < 2 {
            return 0;
        }

        let sizing = InterCollisionSizing {
            num_cloths: entries.len(),
            num_particles: entries.iter().map(|e| e.cloth.num_particles()).sum(),
        };
        if let Err(err) = buffers.reserve(&sizing, config.scratch_limit) {
            Self::record_error(error, err);
            return 0;
        }

        let mut instances: Vec<InterCollisionInstance> = entries
            .iter_mut()
            .map(|entry| {
                let impulse_scale = params.elasticity * entry.report.inv_num_iterations;
                instance(&mut entry.cloth, impulse_scale)
            })
            .collect();

        let accept_all = |_: u64, _: u64| true;
        let filter = filter.unwrap_or(&accept_all);
        inter_collide(&mut instances, params, filter, &mut buffers.buffers)
    }
}

/// World-space view of one cloth for the inter-collision pass.
fn instance(cloth: &mut Cloth, impulse_scale: f32) -> InterCollisionInstance<'_> {
    let Cloth {
        num_particles,
        particles,
        self_collision_indices,
        target_motion,
        particle_bounds,
        user_data,
        ..
    } = cloth;

    let (current, previous) = particles.device_mut().split_at_mut(*num_particles);
    InterCollisionInstance {
        current,
        previous,
        indices: self_collision_indices.as_slice(),
        pose: *target_motion,
        bounds: *particle_bounds,
        impulse_scale,
        user_data: *user_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::FabricData;
    use crate::factory::Factory;
    use glam::{Vec3, Vec4};

    fn cloth(factory: &mut Factory, n: usize) -> Cloth {
        let fabric = factory
            .create_fabric(&FabricData {
                num_particles: n as u32,
                ..Default::default()
            })
            .unwrap();
        let particles: Vec<Vec4> = (0..n).map(|i| Vec4::new(i as f32, 0.0, 0.0, 1.0)).collect();
        factory.create_cloth(&particles, fabric).unwrap()
    }

    #[test]
    fn handles_are_not_reused_after_removal() {
        let mut factory = Factory::new(Platform::Cpu);
        let mut solver = factory.create_solver(SolverConfig::default());

        let a = solver.add_cloth(cloth(&mut factory, 2)).unwrap();
        assert!(solver.remove_cloth(a).is_some());
        let b = solver.add_cloth(cloth(&mut factory, 3)).unwrap();

        assert_ne!(a, b);
        assert_eq!(solver.cloth(a).unwrap_err(), ClothError::UnknownCloth);
        assert_eq!(solver.cloth(b).unwrap().num_particles(), 3);
        assert!(solver.remove_cloth(a).is_none());
        assert_eq!(solver.num_cloths(), 1);
    }

    #[test]
    fn foreign_platform_cloth_is_rejected() {
        let mut factory = Factory::new(Platform::Cpu);
        let mut solver = Solver::new(Platform::Accelerated, SolverConfig::default());
        let err = solver.add_cloth(cloth(&mut factory, 2)).unwrap_err();
        assert_eq!(err, ClothError::PlatformMismatch);
    }

    #[test]
    fn sleeping_cloth_is_skipped() {
        let mut factory = Factory::new(Platform::Cpu);
        let mut solver = factory.create_solver(SolverConfig::default());
        let handle = solver.add_cloth(cloth(&mut factory, 2)).unwrap();
        {
            let c = solver.cloth_mut(handle).unwrap();
            c.set_gravity(Vec3::new(0.0, -10.0, 0.0));
            c.put_to_sleep();
        }

        let summary = solver.simulate(1.0 / 60.0);
        assert_eq!(summary.num_sleeping, 1);
        assert_eq!(summary.num_simulated, 0);
        assert_eq!(solver.cloth(handle).unwrap().current_particles()[0].y, 0.0);
    }

    #[test]
    fn scratch_limit_latches_error() {
        let mut factory = Factory::new(Platform::Cpu);
        let mut solver = factory.create_solver(SolverConfig {
            scratch_limit: Some(16),
            ..Default::default()
        });
        let handle = solver.add_cloth(cloth(&mut factory, 2)).unwrap();

        let summary = solver.simulate(1.0 / 60.0);
        assert_eq!(summary.num_failed, 1);
        assert!(solver.has_error());
        assert!(matches!(solver.last_error(), Some(ClothError::ScratchExhausted { limit: 16, .. })));
        // the cloth is kept
        assert!(solver.cloth(handle).is_ok());

        solver.set_scratch_limit(None);
        solver.clear_error();
        let summary = solver.simulate(1.0 / 60.0);
        assert_eq!(summary.num_simulated, 1);
        assert!(!solver.has_error());
    }

    #[test]
    fn zero_dt_does_nothing() {
        let mut factory = Factory::new(Platform::Cpu);
        let mut solver = factory.create_solver(SolverConfig::default());
        solver.add_cloth(cloth(&mut factory, 2)).unwrap();
        assert_eq!(solver.simulate(0.0), FrameSummary::default());
    }
}
