use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::math::safe_log2;

/// Every scalar and vector tunable of a cloth, in linear units.
///
/// Coefficients such as damping or stiffness are fractions in [0, 1] of the
/// error removed per `1 / stiffness_frequency` seconds. The cloth stores them
/// in log space internally so they compose across variable sub-step counts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClothConfig {
    pub gravity: Vec3,
    pub damping: Vec3,
    pub linear_drag: Vec3,
    pub angular_drag: Vec3,
    pub linear_inertia: Vec3,
    pub angular_inertia: Vec3,
    pub centrifugal_inertia: Vec3,
    /// Sub-steps per second.
    pub solver_frequency: f32,
    pub stiffness_frequency: f32,
    /// Number of sub-steps averaged for the gravity time step.
    pub acceleration_filter_width: u32,
    pub tether_constraint_scale: f32,
    pub tether_constraint_stiffness: f32,
    pub motion_constraint_scale: f32,
    pub motion_constraint_bias: f32,
    pub motion_constraint_stiffness: f32,
    pub friction: f32,
    pub collision_mass_scale: f32,
    pub continuous_collision: bool,
    pub self_collision_distance: f32,
    pub self_collision_stiffness: f32,
    pub sleep_threshold: f32,
    pub sleep_test_interval: u32,
    pub sleep_after_count: u32,
    pub wind_velocity: Vec3,
    pub drag_coefficient: f32,
    pub lift_coefficient: f32,
}

impl Default for ClothConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::ZERO,
            damping: Vec3::ZERO,
            linear_drag: Vec3::ZERO,
            angular_drag: Vec3::ZERO,
            linear_inertia: Vec3::ONE,
            angular_inertia: Vec3::ONE,
            centrifugal_inertia: Vec3::ONE,
            solver_frequency: 300.0,
            stiffness_frequency: 10.0,
            acceleration_filter_width: 30,
            tether_constraint_scale: 1.0,
            tether_constraint_stiffness: 1.0,
            motion_constraint_scale: 1.0,
            motion_constraint_bias: 0.0,
            motion_constraint_stiffness: 1.0,
            friction: 0.0,
            collision_mass_scale: 0.0,
            continuous_collision: false,
            self_collision_distance: 0.0,
            self_collision_stiffness: 1.0,
            sleep_threshold: 0.0,
            sleep_test_interval: u32::MAX,
            sleep_after_count: u32::MAX,
            wind_velocity: Vec3::ZERO,
            drag_coefficient: 0.0,
            lift_coefficient: 0.0,
        }
    }
}

/// Solver parameters of one fabric phase.
///
/// `compression_limit` and `stretch_limit` are length ratios (>= 1 for
/// stretch, <= 1 for compression) within which the stiffness is scaled by
/// `stiffness_multiplier`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub phase_index: u16,
    pub stiffness: f32,
    pub stiffness_multiplier: f32,
    pub compression_limit: f32,
    pub stretch_limit: f32,
}

impl PhaseConfig {
    pub fn new(phase_index: u16) -> Self {
        Self {
            phase_index,
            stiffness: 1.0,
            stiffness_multiplier: 1.0,
            compression_limit: 1.0,
            stretch_limit: 1.0,
        }
    }

    /// Convert to the representation consumed by the constraint solver.
    pub(crate) fn transformed(&self) -> PhaseConfig {
        PhaseConfig {
            phase_index: self.phase_index,
            stiffness: safe_log2(1.0 - self.stiffness),
            stiffness_multiplier: safe_log2(self.stiffness_multiplier),
            // negative for compression, positive for stretch
            compression_limit: 1.0 - 1.0 / self.compression_limit,
            stretch_limit: 1.0 - 1.0 / self.stretch_limit,
        }
    }
}

/// Parameters of the collision pass between cloth instances.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterCollisionConfig {
    /// Minimum distance between particles of different cloths; 0 disables.
    pub distance: f32,
    pub stiffness: f32,
    pub iterations: u32,
    /// Fraction of the inter-collision impulse fed back into velocity.
    pub elasticity: f32,
}

impl Default for InterCollisionConfig {
    fn default() -> Self {
        Self {
            distance: 0.0,
            stiffness: 1.0,
            iterations: 1,
            elasticity: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Upper bound of the kernel scratch arena; `None` grows without limit.
    pub scratch_limit: Option<usize>,
    pub inter_collision: InterCollisionConfig,
}
