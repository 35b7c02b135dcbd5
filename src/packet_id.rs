//! Packet identifier allocation and tracking
//!
//! Hands out identifiers from an inclusive range. Released identifiers are
//! reused oldest-first, except that releasing the most recently handed out
//! one simply moves the allocation pointer back. The same allocator backs
//! topic alias numbering.

use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Errors from the packet identifier provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketIdError {
    /// Every identifier in the range is in use
    Exhausted,
}

impl fmt::Display for PacketIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "no packet identifier available"),
        }
    }
}

impl std::error::Error for PacketIdError {}

/// Allocator over `[start, end]`
#[derive(Debug)]
pub struct PacketIdProvider {
    start: u16,
    end: u16,
    /// Next never-handed-out candidate; `end + 1` once the range is walked
    next: u32,
    /// Released identifiers below `next`, oldest first
    reuse: VecDeque<u16>,
    in_use: HashSet<u16>,
}

impl Default for PacketIdProvider {
    fn default() -> Self {
        Self::new(1, u16::MAX)
    }
}

impl PacketIdProvider {
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start >= 1 && start <= end);
        Self {
            start,
            end,
            next: start as u32,
            reuse: VecDeque::new(),
            in_use: HashSet::new(),
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Take an unused identifier
    pub fn acquire(&mut self) -> Result<u16, PacketIdError> {
        if let Some(id) = self.reuse.pop_front() {
            self.in_use.insert(id);
            return Ok(id);
        }

        // ids registered out of order may already sit ahead of the pointer
        while self.next <= self.end as u32 && self.in_use.contains(&(self.next as u16)) {
            self.next += 1;
        }
        if self.next > self.end as u32 {
            return Err(PacketIdError::Exhausted);
        }

        let id = self.next as u16;
        self.next += 1;
        self.in_use.insert(id);
        Ok(id)
    }

    /// Return an identifier; `false` if it was not in use
    pub fn release(&mut self, id: u16) -> bool {
        if !self.in_use.remove(&id) {
            return false;
        }
        if id as u32 + 1 == self.next {
            self.next -= 1;
        } else {
            self.reuse.push_back(id);
        }
        true
    }

    /// Mark `id` in use without acquiring it
    ///
    /// Used when replaying stored packets whose identifiers were assigned in
    /// an earlier connection. Returns `false` for out-of-range or already
    /// used identifiers.
    pub fn register_if_not_in_use(&mut self, id: u16) -> bool {
        if id < self.start || id > self.end || self.in_use.contains(&id) {
            return false;
        }
        if let Some(pos) = self.reuse.iter().position(|&r| r == id) {
            self.reuse.remove(pos);
        }
        if id as u32 == self.next {
            self.next += 1;
        }
        self.in_use.insert(id);
        true
    }

    pub fn in_use(&self, id: u16) -> bool {
        self.in_use.contains(&id)
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Forget every allocation
    pub fn clear(&mut self) {
        self.next = self.start as u32;
        self.reuse.clear();
        self.in_use.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_until_exhausted() {
        let mut ids = PacketIdProvider::new(1, 9);
        for expected in 1..=9 {
            assert_eq!(ids.acquire(), Ok(expected));
        }
        assert_eq!(ids.acquire(), Err(PacketIdError::Exhausted));
        assert_eq!(ids.in_use_count(), 9);
    }

    #[test]
    fn test_tail_reclamation() {
        let mut ids = PacketIdProvider::new(1, 9);
        assert_eq!(ids.acquire(), Ok(1));
        assert_eq!(ids.acquire(), Ok(2));
        assert!(ids.release(2));
        // 2 went back to the pointer, not to the reuse pool
        assert_eq!(ids.acquire(), Ok(2));
        assert_eq!(ids.acquire(), Ok(3));
    }

    #[test]
    fn test_reuse_pool_is_fifo_and_first() {
        let mut ids = PacketIdProvider::new(1, 9);
        for _ in 0..5 {
            ids.acquire().unwrap();
        }
        assert!(ids.release(3));
        assert!(ids.release(1));
        assert_eq!(ids.acquire(), Ok(3));
        assert_eq!(ids.acquire(), Ok(1));
        assert_eq!(ids.acquire(), Ok(6));
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut ids = PacketIdProvider::default();
        assert!(!ids.release(42));
        assert_eq!(ids.acquire(), Ok(1));
        assert!(ids.release(1));
        assert!(!ids.release(1));
    }

    #[test]
    fn test_register_skips_ahead() {
        let mut ids = PacketIdProvider::new(1, 9);
        assert!(ids.register_if_not_in_use(1));
        assert!(ids.register_if_not_in_use(3));
        assert!(!ids.register_if_not_in_use(3));
        assert!(!ids.register_if_not_in_use(10));
        assert!(!ids.register_if_not_in_use(0));

        assert_eq!(ids.acquire(), Ok(2));
        assert_eq!(ids.acquire(), Ok(4));
        assert!(ids.in_use(3));
    }

    #[test]
    fn test_register_takes_from_reuse_pool() {
        let mut ids = PacketIdProvider::new(1, 9);
        for _ in 0..3 {
            ids.acquire().unwrap();
        }
        ids.release(1);
        assert!(ids.register_if_not_in_use(1));
        assert_eq!(ids.acquire(), Ok(4));
    }

    #[test]
    fn test_full_range_and_clear() {
        let mut ids = PacketIdProvider::default();
        for _ in 0..u16::MAX {
            ids.acquire().unwrap();
        }
        assert!(ids.in_use(u16::MAX));
        assert_eq!(ids.acquire(), Err(PacketIdError::Exhausted));

        ids.clear();
        assert_eq!(ids.in_use_count(), 0);
        assert_eq!(ids.acquire(), Ok(1));
    }
}
