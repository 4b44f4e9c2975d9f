//! Position-based cloth simulation.
//!
//! A [`Factory`] builds shared [`Fabric`] topologies and [`Cloth`]
//! instances over them; a [`Solver`] owns cloths and advances them frame
//! by frame. Particles are `Vec4` with the inverse mass in `w`.

pub mod buffer;
pub mod cloth;
pub mod collision;
pub mod config;
pub mod constraints;
pub mod error;
pub mod fabric;
pub mod factory;
pub mod forces;
pub mod grid;
pub mod inter_collision;
pub mod iteration_state;
pub mod kernel;
pub mod math;
pub mod scheduler;
pub mod scratch;
pub mod self_collision;
pub mod sleep;
pub mod solver;
pub mod virtual_particles;

pub use cloth::Cloth;
pub use config::{ClothConfig, InterCollisionConfig, PhaseConfig, SolverConfig};
pub use error::{ClothError, Result};
pub use fabric::{Fabric, FabricData, FabricId, FabricIdAllocator, IndexPair};
pub use factory::{Factory, Platform};
pub use solver::{ClothHandle, FrameSummary, Solver};
pub use virtual_particles::VirtualParticle;
