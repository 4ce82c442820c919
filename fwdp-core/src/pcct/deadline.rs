//! Deadline ordering of pending records.
//!
//! An indexed binary min-heap over `(deadline, slot)`. Both the heap array and
//! the slot-to-position map are reserved for every slot when the table is
//! created; a slot is queued at most once, so no operation ever grows them.

use fwdp_common::Timestamp;

use crate::mempool::AllocationError;

const NOT_QUEUED: u32 = u32::MAX;

pub(crate) struct DeadlineHeap {
    heap: Vec<(Timestamp, u32)>,
    /// Heap position of each slot, or `NOT_QUEUED`
    pos: Vec<u32>,
}

impl DeadlineHeap {
    pub(crate) fn new(capacity: usize) -> Result<Self, AllocationError> {
        let oom = |_| AllocationError::OutOfMemory {
            requested: capacity,
        };
        let mut heap = Vec::new();
        heap.try_reserve_exact(capacity).map_err(oom)?;
        let mut pos = Vec::new();
        pos.try_reserve_exact(capacity).map_err(oom)?;
        pos.resize(capacity, NOT_QUEUED);
        Ok(Self { heap, pos })
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn contains(&self, slot: u32) -> bool {
        self.pos[slot as usize] != NOT_QUEUED
    }

    /// Earliest deadline and its slot
    pub(crate) fn peek(&self) -> Option<(Timestamp, u32)> {
        self.heap.first().copied()
    }

    pub(crate) fn push(&mut self, slot: u32, deadline: Timestamp) {
        debug_assert!(!self.contains(slot), "slot {} queued twice", slot);
        let i = self.heap.len();
        self.heap.push((deadline, slot));
        self.pos[slot as usize] = i as u32;
        self.sift_up(i);
    }

    /// Move `slot` to `deadline`, queueing it if absent
    pub(crate) fn update(&mut self, slot: u32, deadline: Timestamp) {
        let i = self.pos[slot as usize];
        if i == NOT_QUEUED {
            self.push(slot, deadline);
            return;
        }
        let i = i as usize;
        let old = self.heap[i].0;
        self.heap[i].0 = deadline;
        if deadline < old {
            self.sift_up(i);
        } else {
            self.sift_down(i);
        }
    }

    /// Dequeue `slot`, returning its deadline
    pub(crate) fn remove(&mut self, slot: u32) -> Option<Timestamp> {
        let i = self.pos[slot as usize];
        if i == NOT_QUEUED {
            return None;
        }
        let i = i as usize;
        let last = self.heap.len() - 1;
        self.swap(i, last);
        let (deadline, _) = self.heap.pop()?;
        self.pos[slot as usize] = NOT_QUEUED;
        if i < self.heap.len() {
            self.sift_down(i);
            self.sift_up(i);
        }
        Some(deadline)
    }

    pub(crate) fn pop(&mut self) -> Option<(Timestamp, u32)> {
        let (_, slot) = self.peek()?;
        self.remove(slot).map(|deadline| (deadline, slot))
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.pos[self.heap[a].1 as usize] = a as u32;
        self.pos[self.heap[b].1 as usize] = b as u32;
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent] <= self.heap[i] {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let child = if right < n && self.heap[right] < self.heap[left] {
                right
            } else {
                left
            };
            if self.heap[i] <= self.heap[child] {
                break;
            }
            self.swap(i, child);
            i = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Timestamp {
        Timestamp::from_millis(n)
    }

    fn drain(h: &mut DeadlineHeap) -> Vec<u32> {
        std::iter::from_fn(|| h.pop().map(|(_, slot)| slot)).collect()
    }

    #[test]
    fn test_pops_in_deadline_order() {
        let mut h = DeadlineHeap::new(8).unwrap();
        for (slot, t) in [(0, 50), (1, 10), (2, 40), (3, 20), (4, 30)] {
            h.push(slot, ms(t));
        }
        assert_eq!(h.peek(), Some((ms(10), 1)));
        assert_eq!(drain(&mut h), vec![1, 3, 4, 2, 0]);
        assert_eq!(h.len(), 0);
    }

    #[test]
    fn test_equal_deadlines_break_ties_by_slot() {
        let mut h = DeadlineHeap::new(4).unwrap();
        h.push(3, ms(5));
        h.push(1, ms(5));
        h.push(2, ms(5));
        assert_eq!(drain(&mut h), vec![1, 2, 3]);
    }

    #[test]
    fn test_update_moves_both_ways() {
        let mut h = DeadlineHeap::new(4).unwrap();
        h.push(0, ms(10));
        h.push(1, ms(20));
        h.push(2, ms(30));
        h.update(0, ms(40));
        h.update(2, ms(5));
        assert_eq!(drain(&mut h), vec![2, 1, 0]);

        h.update(3, ms(1));
        assert!(h.contains(3));
        assert_eq!(h.pop(), Some((ms(1), 3)));
    }

    #[test]
    fn test_remove_from_middle() {
        let mut h = DeadlineHeap::new(8).unwrap();
        for slot in 0..8 {
            h.push(slot, ms(100 - slot as u64 * 10));
        }
        assert_eq!(h.remove(4), Some(ms(60)));
        assert_eq!(h.remove(4), None);
        assert!(!h.contains(4));
        assert_eq!(drain(&mut h), vec![7, 6, 5, 3, 2, 1, 0]);
    }

    #[test]
    fn test_full_heap_never_grows() {
        let mut h = DeadlineHeap::new(16).unwrap();
        let reserved = h.heap.capacity();
        for round in 0..4u64 {
            for slot in 0..16 {
                h.push(slot, ms((slot as u64 * 7 + round) % 11));
            }
            assert_eq!(h.len(), 16);
            assert_eq!(drain(&mut h).len(), 16);
        }
        assert_eq!(h.heap.capacity(), reserved);
    }
}
