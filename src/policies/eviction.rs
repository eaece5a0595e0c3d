//! # Victim selection for forced starts.
//!
//! When a group is at its `max_active` ceiling and a caller forces a Start,
//! one active entry has to make room. By default [`Eviction::pick`] draws a
//! uniformly random index; no order is promised.

use rand::Rng;

/// Strategy used to choose the entry evicted by a forced start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Eviction {
    /// Uniformly random active entry (default).
    #[default]
    Random,
    /// The entry activated first. Deterministic; mostly useful in tests.
    Oldest,
}

impl Eviction {
    /// Picks an index in `0..len`, or `None` if there is nothing to evict.
    pub fn pick(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        match self {
            Eviction::Random => {
                let mut rng = rand::rng();
                Some(rng.random_range(0..len))
            }
            Eviction::Oldest => Some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_has_no_victim() {
        assert_eq!(Eviction::Random.pick(0), None);
        assert_eq!(Eviction::Oldest.pick(0), None);
    }

    #[test]
    fn test_random_stays_in_bounds() {
        for _ in 0..200 {
            let i = Eviction::Random.pick(3).unwrap();
            assert!(i < 3);
        }
    }

    #[test]
    fn test_oldest_is_first() {
        assert_eq!(Eviction::Oldest.pick(5), Some(0));
    }
}
