use thiserror::Error;

/// Errors raised while building or simulating cloth.
///
/// Construction errors are returned synchronously and never leave a
/// partially built object behind. Solver errors are sticky: they are
/// recorded on the solver and polled with `Solver::has_error`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClothError {
    #[error("particle index {index} out of range for {num_particles} particles")]
    IndexOutOfRange { index: u32, num_particles: u32 },

    #[error("cloth needs at least one particle")]
    EmptyParticles,

    #[error("{what}: expected {expected} elements, got {actual}")]
    MismatchedLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("phase {phase} is invalid for a fabric with {num_phases} phases and {num_sets} sets")]
    InvalidPhase {
        phase: usize,
        num_phases: usize,
        num_sets: usize,
    },

    #[error("too many {kind}: {count} exceeds the limit of 32")]
    TooManyPrimitives { kind: &'static str, count: usize },

    #[error("range {first}..{last} is invalid for {len} elements")]
    InvalidRange { first: usize, last: usize, len: usize },

    #[error("scratch memory exhausted: requested {requested} bytes, limit {limit}")]
    ScratchExhausted { requested: usize, limit: usize },

    #[error("cloth handle does not belong to this solver")]
    UnknownCloth,

    #[error("cloth was created by a factory of another platform")]
    PlatformMismatch,
}

pub type Result<T> = std::result::Result<T, ClothError>;
