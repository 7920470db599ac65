//! Partition planning: how the flat scalar arrays split across the worker group.

use crate::{Error, Result};
use std::ops::Range;

/// Number of scalars per vector; the arrays are flat sequences of x, y, z triples.
pub const SCALARS_PER_VECTOR: usize = 3;

/// The equal-chunk split of a run, fixed once `N` has been broadcast.
///
/// Every worker derives the same plan from the same broadcast value, so the
/// validity verdict needs no further coordination: either all workers proceed
/// to the scatter or all of them abort before any data moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Number of vectors in each input array.
    pub vectors: usize,
    /// Fixed size of the worker group.
    pub workers: usize,
    /// Flat scalar count of one full array, `3 * vectors`.
    pub total_elements: usize,
    /// Flat scalar count of one worker's chunk.
    pub elements_per_worker: usize,
}

impl PartitionPlan {
    /// Computes the split, rejecting any count that does not divide evenly.
    ///
    /// A chunk must also hold whole vectors: a split whose chunk size is not
    /// a multiple of 3 would hand part of a vector to one worker and the
    /// rest to its neighbor, and neither could compute the cross product
    /// locally. Such plans are rejected the same way as uneven ones.
    pub fn new(vectors: usize, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Init("Worker count must be positive".into()));
        }

        let total_elements = vectors * SCALARS_PER_VECTOR;
        if total_elements % workers != 0 {
            return Err(Error::UnevenPartition { vectors, workers });
        }

        let elements_per_worker = total_elements / workers;
        if elements_per_worker % SCALARS_PER_VECTOR != 0 {
            return Err(Error::UnevenPartition { vectors, workers });
        }

        Ok(Self {
            vectors,
            workers,
            total_elements,
            elements_per_worker,
        })
    }

    /// Flat index range of the chunk owned by `rank`.
    ///
    /// Chunk order follows ascending rank; this is the contract that lets the
    /// gather reassemble the output array correctly.
    pub fn chunk_range(&self, rank: usize) -> Range<usize> {
        rank * self.elements_per_worker..(rank + 1) * self.elements_per_worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split() {
        let plan = PartitionPlan::new(4, 2).unwrap();
        assert_eq!(plan.total_elements, 12);
        assert_eq!(plan.elements_per_worker, 6);
    }

    #[test]
    fn whole_array_on_one_worker() {
        let plan = PartitionPlan::new(5, 1).unwrap();
        assert_eq!(plan.elements_per_worker, 15);
    }

    #[test]
    fn uneven_split_is_rejected() {
        match PartitionPlan::new(5, 2) {
            Err(Error::UnevenPartition { vectors, workers }) => {
                assert_eq!(vectors, 5);
                assert_eq!(workers, 2);
            }
            other => panic!("expected UnevenPartition, got {other:?}"),
        }
    }

    #[test]
    fn vector_splitting_chunk_is_rejected() {
        // 2 vectors is 6 scalars; 6 % 3 == 0, but 2 scalars per worker would
        // tear each vector across two ranks.
        match PartitionPlan::new(2, 3) {
            Err(Error::UnevenPartition { vectors, workers }) => {
                assert_eq!(vectors, 2);
                assert_eq!(workers, 3);
            }
            other => panic!("expected UnevenPartition, got {other:?}"),
        }
    }

    #[test]
    fn chunks_always_hold_whole_vectors() {
        for vectors in 0..12 {
            for workers in 1..8 {
                if let Ok(plan) = PartitionPlan::new(vectors, workers) {
                    assert_eq!(plan.elements_per_worker % SCALARS_PER_VECTOR, 0);
                }
            }
        }
    }

    #[test]
    fn zero_vectors_divide_everywhere() {
        for workers in 1..=8 {
            let plan = PartitionPlan::new(0, workers).unwrap();
            assert_eq!(plan.elements_per_worker, 0);
        }
    }

    #[test]
    fn zero_workers_is_an_init_error() {
        assert!(matches!(PartitionPlan::new(4, 0), Err(Error::Init(_))));
    }

    #[test]
    fn chunk_ranges_tile_the_array_in_rank_order() {
        let plan = PartitionPlan::new(4, 4).unwrap();
        let mut next = 0;
        for rank in 0..plan.workers {
            let range = plan.chunk_range(rank);
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, plan.total_elements);
    }
}
