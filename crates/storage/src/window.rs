//! Sliding window over the parts of one multipart upload.
//!
//! Parts are handed out in ascending order. A part may only be dispatched
//! while it lies within `window_parts` of the smallest part still in flight,
//! which bounds both concurrency and the memory held by buffered part bodies.

use std::collections::BTreeSet;

/// Dispatch bookkeeping for one file's parts.
#[derive(Debug, Clone)]
pub struct PartWindow {
    total_parts: u32,
    window_parts: u32,
    in_flight: BTreeSet<u32>,
    completed: BTreeSet<u32>,
    /// Smallest part number not yet handed out.
    cursor: u32,
}

impl PartWindow {
    /// Create a window for `total_parts` parts.
    ///
    /// # Arguments
    /// * `total_parts` - Number of parts in the upload
    /// * `part_size` - Size of each part in bytes
    /// * `window_size` - Byte budget for parts in flight; raised to
    ///   `part_size` when smaller
    /// * `completed` - Part numbers accepted by the store in earlier runs
    pub fn new(
        total_parts: u32,
        part_size: u64,
        window_size: u64,
        completed: impl IntoIterator<Item = u32>,
    ) -> Self {
        let part_size: u64 = part_size.max(1);
        let window_parts: u64 = window_size.max(part_size) / part_size;
        let completed: BTreeSet<u32> = completed
            .into_iter()
            .filter(|p| *p >= 1 && *p <= total_parts)
            .collect();

        Self {
            total_parts,
            window_parts: window_parts.min(u32::MAX as u64) as u32,
            in_flight: BTreeSet::new(),
            completed,
            cursor: 1,
        }
    }

    /// Maximum number of parts in flight at once.
    pub fn window_parts(&self) -> u32 {
        self.window_parts
    }

    /// Hand out the next part if the window allows it.
    ///
    /// Returns `None` when every part has been handed out or the next
    /// candidate is too far ahead of the oldest part in flight.
    pub fn next_dispatchable(&mut self) -> Option<u32> {
        while self.cursor <= self.total_parts && self.completed.contains(&self.cursor) {
            self.cursor += 1;
        }
        if self.cursor > self.total_parts {
            return None;
        }

        if let Some(&oldest) = self.in_flight.first() {
            if self.cursor as u64 >= oldest as u64 + self.window_parts as u64 {
                return None;
            }
        }

        let part_number: u32 = self.cursor;
        self.in_flight.insert(part_number);
        self.cursor += 1;
        Some(part_number)
    }

    /// Record that the store accepted a part.
    ///
    /// Returns false if the part was not in flight.
    pub fn complete(&mut self, part_number: u32) -> bool {
        if !self.in_flight.remove(&part_number) {
            return false;
        }
        self.completed.insert(part_number);
        true
    }

    /// Drop a part from flight without marking it completed.
    pub fn release(&mut self, part_number: u32) -> bool {
        self.in_flight.remove(&part_number)
    }

    /// Parts currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Parts accepted so far, including those from earlier runs.
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Whether every part has been handed out (it may still be in flight).
    pub fn is_exhausted(&self) -> bool {
        let mut cursor: u32 = self.cursor;
        while cursor <= self.total_parts && self.completed.contains(&cursor) {
            cursor += 1;
        }
        cursor > self.total_parts
    }

    /// Whether every part has been accepted.
    pub fn is_finished(&self) -> bool {
        self.completed.len() == self.total_parts as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(window: &mut PartWindow) -> Vec<u32> {
        let mut dispatched: Vec<u32> = Vec::new();
        while let Some(p) = window.next_dispatchable() {
            dispatched.push(p);
        }
        dispatched
    }

    #[test]
    fn test_window_parts_computation() {
        assert_eq!(PartWindow::new(10, 100, 1000, []).window_parts(), 10);
        assert_eq!(PartWindow::new(10, 100, 250, []).window_parts(), 2);
        // Window smaller than one part still allows one part
        assert_eq!(PartWindow::new(10, 100, 10, []).window_parts(), 1);
    }

    #[test]
    fn test_dispatch_bounded_by_window() {
        let mut window: PartWindow = PartWindow::new(10, 100, 300, []);
        assert_eq!(drain(&mut window), vec![1, 2, 3]);
        assert_eq!(window.in_flight_count(), 3);

        // Completing a later part does not move the window
        assert!(window.complete(3));
        assert_eq!(window.next_dispatchable(), None);

        // Completing the oldest part unblocks up to two more
        assert!(window.complete(1));
        assert_eq!(drain(&mut window), vec![4]);
        assert!(window.complete(2));
        assert_eq!(drain(&mut window), vec![5, 6]);
    }

    #[test]
    fn test_resume_skips_completed_parts() {
        let mut window: PartWindow = PartWindow::new(5, 100, 1000, [1, 2, 3]);
        assert_eq!(drain(&mut window), vec![4, 5]);
        assert!(window.complete(4));
        assert!(window.complete(5));
        assert!(window.is_finished());
    }

    #[test]
    fn test_resume_with_gaps() {
        let mut window: PartWindow = PartWindow::new(6, 100, 1000, [1, 3, 4]);
        assert_eq!(drain(&mut window), vec![2, 5, 6]);
        assert_eq!(window.completed_count(), 3);
        assert!(window.is_exhausted());
        assert!(!window.is_finished());
    }

    #[test]
    fn test_completed_outside_range_ignored() {
        let window: PartWindow = PartWindow::new(3, 100, 1000, [0, 2, 9]);
        assert_eq!(window.completed_count(), 1);
    }

    #[test]
    fn test_complete_unknown_part() {
        let mut window: PartWindow = PartWindow::new(3, 100, 1000, []);
        assert!(!window.complete(2));
        assert_eq!(window.next_dispatchable(), Some(1));
        assert!(!window.complete(2));
        assert!(window.complete(1));
        assert!(!window.complete(1));
    }

    #[test]
    fn test_release_frees_slot_without_completing() {
        let mut window: PartWindow = PartWindow::new(3, 100, 100, []);
        assert_eq!(window.next_dispatchable(), Some(1));
        assert_eq!(window.next_dispatchable(), None);
        assert!(window.release(1));
        assert_eq!(window.next_dispatchable(), Some(2));
        assert_eq!(window.completed_count(), 0);
    }

    #[test]
    fn test_in_flight_never_exceeds_window_with_out_of_order_completion() {
        let total: u32 = 200;
        let mut window: PartWindow = PartWindow::new(total, 10, 70, []);
        let limit: usize = window.window_parts() as usize;

        // Deterministic pseudo-random completion order
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut in_flight: Vec<u32> = Vec::new();
        while !window.is_finished() {
            while let Some(p) = window.next_dispatchable() {
                in_flight.push(p);
                assert!(window.in_flight_count() <= limit);
            }
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let idx: usize = (state % in_flight.len() as u64) as usize;
            let part: u32 = in_flight.swap_remove(idx);
            assert!(window.complete(part));
        }
        assert_eq!(window.completed_count(), total as usize);
        assert_eq!(window.in_flight_count(), 0);
    }
}
