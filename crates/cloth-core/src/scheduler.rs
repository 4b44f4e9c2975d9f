/// Groups index triplets into sets whose members share no particle.
///
/// Triplets within one set can be processed in any order or in parallel
/// without two of them writing the same particle. Sets hold at most
/// `width` triplets; the last set of a schedule may be shorter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TripletScheduler {
    /// Triplet indices in scheduled order.
    pub order: Vec<usize>,
    /// Exclusive end of each set in `order`.
    pub set_ends: Vec<usize>,
}

impl TripletScheduler {
    /// Greedily fill sets in input order: each pass over the unscheduled
    /// triplets starts a new set and takes every triplet that does not
    /// touch a particle already in the set, until the set is full.
    pub fn new(triplets: &[[u32; 3]], num_particles: usize, width: usize) -> Self {
        let width = width.max(1);
        let mut order = Vec::with_capacity(triplets.len());
        let mut set_ends = Vec::new();

        // stamp of the set that last claimed each particle
        let mut claimed = vec![usize::MAX; num_particles];
        let mut pending: Vec<usize> = (0..triplets.len()).collect();

        while !pending.is_empty() {
            let set = set_ends.len();
            let mut size = 0;
            pending.retain(|&t| {
                if size == width {
                    return true;
                }
                let triplet = &triplets[t];
                if triplet.iter().any(|&p| claimed[p as usize] == set) {
                    return true;
                }
                for &p in triplet {
                    claimed[p as usize] = set;
                }
                order.push(t);
                size += 1;
                false
            });
            set_ends.push(order.len());
        }

        Self { order, set_ends }
    }

    pub fn num_sets(&self) -> usize {
        self.set_ends.len()
    }
}
