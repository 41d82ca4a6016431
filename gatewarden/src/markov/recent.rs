// gatewarden/src/markov/recent.rs
//
// Fixed-capacity ring of (from, to) transitions. Oldest entries are
// overwritten when full; snapshots read oldest → newest.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentTransitionBuffer {
    capacity: usize,
    buf:      VecDeque<(String, String)>,
}

impl RecentTransitionBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, buf: VecDeque::with_capacity(capacity) }
    }

    pub fn add(&mut self, from: &str, to: &str) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back((from.to_string(), to.to_string()));
    }

    /// Oldest-first snapshot.
    pub fn get_recent(&self) -> Vec<(String, String)> {
        self.buf.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_oldest_when_full() {
        let mut b = RecentTransitionBuffer::new(3);
        for i in 0..5 {
            b.add(&format!("/f{i}"), &format!("/t{i}"));
        }
        let recent = b.get_recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].0, "/f2");
        assert_eq!(recent[2].1, "/t4");
    }
}
