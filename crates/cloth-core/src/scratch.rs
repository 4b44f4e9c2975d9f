use crate::error::{ClothError, Result};

/// Typed storage a [`ScratchArena`] sizes before each frame.
pub trait ScratchBuffers {
    /// What the worst case is derived from.
    type Sizing: ?Sized;

    /// Worst-case bytes the buffers need for `sizing`.
    fn estimate(sizing: &Self::Sizing) -> usize;

    /// Allocate room for the worst case of `sizing` up front.
    fn reserve(&mut self, sizing: &Self::Sizing);
}

/// Grow `buffer` so it holds `len` elements without reallocating.
pub(crate) fn reserve_len<T>(buffer: &mut Vec<T>, len: usize) {
    buffer.reserve(len.saturating_sub(buffer.len()));
}

/// Temporary storage of one simulation task.
///
/// Capacity is sized to the task's declared worst case before each frame,
/// grows monotonically and is reused across frames. `buffers` holds the
/// typed storage that the capacity accounts for.
#[derive(Clone, Debug, Default)]
pub struct ScratchArena<B> {
    capacity: usize,
    pub buffers: B,
}

impl<B: Default> ScratchArena<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: ScratchBuffers> ScratchArena<B> {
    /// Bytes reserved so far.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Make room for the worst case of `sizing`, failing if that exceeds
    /// `limit` bytes.
    ///
    /// A failed reservation leaves the arena unchanged.
    pub fn reserve(&mut self, sizing: &B::Sizing, limit: Option<usize>) -> Result<()> {
        let bytes = B::estimate(sizing);
        if let Some(limit) = limit {
            if bytes > limit {
                return Err(ClothError::ScratchExhausted {
                    requested: bytes,
                    limit,
                });
            }
        }
        self.buffers.reserve(sizing);
        self.capacity = self.capacity.max(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ScratchBuffers for () {
        type Sizing = usize;

        fn estimate(bytes: &usize) -> usize {
            *bytes
        }

        fn reserve(&mut self, _: &usize) {}
    }

    #[derive(Default)]
    struct Keys(Vec<u32>);

    impl ScratchBuffers for Keys {
        type Sizing = usize;

        fn estimate(len: &usize) -> usize {
            len * std::mem::size_of::<u32>()
        }

        fn reserve(&mut self, len: &usize) {
            reserve_len(&mut self.0, *len);
        }
    }

    #[test]
    fn capacity_only_grows() {
        let mut arena = ScratchArena::<()>::new();
        arena.reserve(&100, None).unwrap();
        arena.reserve(&10, None).unwrap();
        assert_eq!(arena.capacity(), 100);
    }

    #[test]
    fn limit_is_enforced() {
        let mut arena = ScratchArena::<()>::new();
        arena.reserve(&64, Some(128)).unwrap();
        let err = arena.reserve(&256, Some(128)).unwrap_err();
        assert_eq!(
            err,
            ClothError::ScratchExhausted {
                requested: 256,
                limit: 128
            }
        );
        assert_eq!(arena.capacity(), 64);
    }

    #[test]
    fn buffers_are_allocated_up_front() {
        let mut arena = ScratchArena::<Keys>::new();
        arena.buffers.0.push(7);
        arena.reserve(&64, None).unwrap();
        assert_eq!(arena.capacity(), 256);
        assert!(arena.buffers.0.capacity() >= 64);

        let err = arena.reserve(&1000, Some(1024)).unwrap_err();
        assert!(matches!(err, ClothError::ScratchExhausted { requested: 4000, .. }));
        assert!(arena.buffers.0.capacity() < 1000);
    }
}
