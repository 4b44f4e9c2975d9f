pub mod integrate;
pub mod wind;

pub use integrate::integrate_particles;
pub use wind::apply_wind;
