//! Worker partitioning
//!
//! Splits the stable index space `[0, total)` into contiguous ranges, one per
//! worker. The first `total % workers` workers get one extra case.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::WorkerIdentity;
use crate::models::CaseSet;

/// Half-open range of case indices owned by one worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRange {
    pub start: usize,
    pub end: usize,
}

impl WorkerRange {
    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for WorkerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Range owned by worker `ordinal` out of `workers`.
///
/// A zero worker count is treated as one worker.
pub fn worker_range(total: usize, ordinal: usize, workers: usize) -> WorkerRange {
    let workers = workers.max(1);
    let base = total / workers;
    let rem = total % workers;

    let start = (ordinal * base + ordinal.min(rem)).min(total);
    let len = base + usize::from(ordinal < rem);
    WorkerRange {
        start,
        end: (start + len).min(total),
    }
}

/// Whether worker `ordinal` owns `index`
pub fn owns(index: usize, total: usize, ordinal: usize, workers: usize) -> bool {
    worker_range(total, ordinal, workers).contains(index)
}

/// Every worker's range, in ordinal order
pub fn all_ranges(total: usize, workers: usize) -> Vec<WorkerRange> {
    (0..workers.max(1))
        .map(|ordinal| worker_range(total, ordinal, workers))
        .collect()
}

/// Ownership test bound to one worker and one published total
#[derive(Clone, Copy, Debug)]
pub struct WorkerPartitioner {
    identity: WorkerIdentity,
    total: usize,
}

impl WorkerPartitioner {
    pub fn new(identity: WorkerIdentity, total: usize) -> Self {
        Self { identity, total }
    }

    pub fn range(&self) -> WorkerRange {
        worker_range(self.total, self.identity.ordinal, self.identity.count)
    }

    pub fn owns(&self, index: usize) -> bool {
        owns(index, self.total, self.identity.ordinal, self.identity.count)
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }
}

/// One worker's share of a loaded case set
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub worker: String,
    pub range: WorkerRange,
    /// Cases in the range that are still to run
    pub cases: usize,
}

/// How `set` would be split across `workers`
pub fn plan(set: &CaseSet, workers: usize) -> Vec<PlanEntry> {
    all_ranges(set.index_span, workers)
        .into_iter()
        .enumerate()
        .map(|(ordinal, range)| PlanEntry {
            worker: format!("gw{ordinal}"),
            range,
            cases: set.cases.iter().filter(|c| range.contains(c.index)).count(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ten_over_three() {
        let ranges = all_ranges(10, 3);
        assert_eq!(
            ranges,
            vec![
                WorkerRange { start: 0, end: 4 },
                WorkerRange { start: 4, end: 7 },
                WorkerRange { start: 7, end: 10 },
            ]
        );
    }

    #[test]
    fn test_zero_total() {
        for workers in 1..=8 {
            assert!(all_ranges(0, workers).iter().all(WorkerRange::is_empty));
        }
        assert!(!owns(0, 0, 0, 1));
    }

    #[test]
    fn test_single_worker_owns_everything() {
        assert_eq!(worker_range(7, 0, 1), WorkerRange { start: 0, end: 7 });
        assert!((0..7).all(|i| owns(i, 7, 0, 1)));
        assert!(!owns(7, 7, 0, 1));
    }

    #[test]
    fn test_fewer_cases_than_workers() {
        let ranges = all_ranges(2, 4);
        assert_eq!(ranges[0], WorkerRange { start: 0, end: 1 });
        assert_eq!(ranges[1], WorkerRange { start: 1, end: 2 });
        assert!(ranges[2].is_empty());
        assert!(ranges[3].is_empty());
    }

    #[test]
    fn test_partitioner() {
        let identity = WorkerIdentity::new(1, 2).unwrap();
        let partitioner = WorkerPartitioner::new(identity, 6);
        assert_eq!(partitioner.range(), WorkerRange { start: 3, end: 6 });
        assert!(partitioner.owns(3));
        assert!(!partitioner.owns(2));
        assert_eq!(partitioner.range().to_string(), "[3, 6)");
    }

    #[test]
    fn test_partitioner_agrees_with_owns() {
        for workers in 1..=4 {
            for ordinal in 0..workers {
                let identity = WorkerIdentity::new(ordinal, workers).unwrap();
                let partitioner = WorkerPartitioner::new(identity, 9);
                for index in 0..11 {
                    assert_eq!(partitioner.owns(index), owns(index, 9, ordinal, workers));
                }
            }
        }
    }

    #[test]
    fn test_plan_counts_remaining_cases() {
        let mut set = CaseSet::empty("r");
        set.index_span = 6;
        set.total_count = 5;
        set.cases = [0, 1, 3, 4, 5]
            .into_iter()
            .map(|i| crate::models::Case::new(i, "echo"))
            .collect();

        let entries = plan(&set, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].worker, "gw0");
        assert_eq!(entries[0].cases, 2);
        assert_eq!(entries[1].range, WorkerRange { start: 3, end: 6 });
        assert_eq!(entries[1].cases, 3);
    }

    proptest! {
        #[test]
        fn prop_ranges_partition_index_space(total in 0usize..=500, workers in 1usize..=16) {
            let ranges = all_ranges(total, workers);
            let base = total / workers;

            let mut next = 0;
            for range in &ranges {
                prop_assert_eq!(range.start, next);
                prop_assert!(range.len() == base || range.len() == base + 1);
                next = range.end;
            }
            prop_assert_eq!(next, total);

            for index in 0..total {
                let owners = (0..workers).filter(|&w| owns(index, total, w, workers)).count();
                prop_assert_eq!(owners, 1);
            }
        }
    }
}
