use std::collections::HashMap;
use std::sync::{Arc, Weak};

use glam::Vec4;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::Residency;
use crate::cloth::Cloth;
use crate::config::SolverConfig;
use crate::error::Result;
use crate::fabric::{Fabric, FabricData, FabricId, FabricIdAllocator};
use crate::solver::Solver;

/// Backend a factory builds for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    /// Host memory, kernels on worker threads.
    #[default]
    Cpu,
    /// Particle storage mirrored to device memory.
    Accelerated,
}

impl Platform {
    pub(crate) fn residency(self) -> Residency {
        match self {
            Platform::Cpu => Residency::Host,
            Platform::Accelerated => Residency::Device,
        }
    }
}

/// Builds fabrics, cloths and solvers of one platform.
///
/// The factory remembers the fabrics it built by id, so cloning a cloth
/// across factories reuses an equivalent fabric instead of rebuilding one
/// per clone.
#[derive(Debug)]
pub struct Factory {
    platform: Platform,
    ids: Arc<FabricIdAllocator>,
    fabrics: HashMap<FabricId, Weak<Fabric>>,
}

impl Factory {
    pub fn new(platform: Platform) -> Self {
        Self::with_id_allocator(platform, Arc::new(FabricIdAllocator::new()))
    }

    /// Factory drawing fabric ids from a shared allocator.
    pub fn with_id_allocator(platform: Platform, ids: Arc<FabricIdAllocator>) -> Self {
        Self {
            platform,
            ids,
            fabrics: HashMap::new(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn id_allocator(&self) -> &Arc<FabricIdAllocator> {
        &self.ids
    }

    pub fn create_fabric(&mut self, data: &FabricData) -> Result<Arc<Fabric>> {
        let id = self.ids.allocate();
        let fabric = Arc::new(Fabric::new(data, id, self.platform)?);
        self.register(&fabric);
        debug!(
            id = id.0,
            particles = fabric.num_particles(),
            phases = fabric.num_phases(),
            constraints = fabric.num_constraints(),
            "fabric created"
        );
        Ok(fabric)
    }

    pub fn create_cloth(&self, particles: &[Vec4], fabric: Arc<Fabric>) -> Result<Cloth> {
        let cloth = Cloth::new(particles, fabric, self.platform)?;
        debug!(
            particles = particles.len(),
            fabric = cloth.fabric().id().0,
            platform = ?self.platform,
            "cloth created"
        );
        Ok(cloth)
    }

    pub fn create_solver(&self, config: SolverConfig) -> Solver {
        Solver::new(self.platform, config)
    }

    /// Unpadded arrays of `fabric`, for rebuilding it elsewhere.
    pub fn extract_fabric_data(&self, fabric: &Fabric) -> FabricData {
        fabric.data()
    }

    /// Copy `cloth` into this factory's platform.
    ///
    /// The copy shares the fabric identity of the original; the fabric is
    /// rebuilt at most once per factory while any of its cloths live.
    pub fn clone_cloth(&mut self, cloth: &Cloth) -> Result<Cloth> {
        let fabric = self.equivalent_fabric(cloth.fabric())?;
        let mut copy = cloth.clone();
        copy.rebind(fabric)?;
        debug!(
            fabric = copy.fabric().id().0,
            from = ?cloth.platform(),
            to = ?self.platform,
            "cloth cloned"
        );
        Ok(copy)
    }

    fn equivalent_fabric(&mut self, fabric: &Arc<Fabric>) -> Result<Arc<Fabric>> {
        if fabric.platform() == self.platform {
            return Ok(Arc::clone(fabric));
        }
        if let Some(existing) = self.fabrics.get(&fabric.id()).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let rebuilt = Arc::new(Fabric::new(&fabric.data(), fabric.id(), self.platform)?);
        self.register(&rebuilt);
        Ok(rebuilt)
    }

    fn register(&mut self, fabric: &Arc<Fabric>) {
        self.fabrics.retain(|_, weak| weak.strong_count() > 0);
        self.fabrics.insert(fabric.id(), Arc::downgrade(fabric));
    }
}
