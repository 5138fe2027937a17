//! Vector views for causal-prefix tracking.

use crate::event::Event;

/// A vector clock indexed by thread ID.
///
/// Entry `t` holds one past the highest index of thread `t` that the owner
/// of the view can see, so a zeroed entry means "nothing from this thread".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct View {
    clocks: Vec<u32>,
}

impl View {
    pub fn new() -> Self {
        Self { clocks: Vec::new() }
    }

    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            clocks: vec![0; num_threads],
        }
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.iter().all(|&c| c == 0)
    }

    /// Highest visible index of `thread`, if any.
    pub fn get(&self, thread: u32) -> Option<u32> {
        match self.clocks.get(thread as usize) {
            Some(&c) if c > 0 => Some(c - 1),
            _ => None,
        }
    }

    pub fn contains(&self, e: Event) -> bool {
        self.clocks
            .get(e.thread as usize)
            .is_some_and(|&c| e.index < c)
    }

    /// Extends the view so that it contains `e` (and its po-prefix).
    pub fn update_idx(&mut self, e: Event) {
        let t = e.thread as usize;
        if t >= self.clocks.len() {
            self.clocks.resize(t + 1, 0);
        }
        self.clocks[t] = self.clocks[t].max(e.index + 1);
    }

    /// Point-wise maximum: self = max(self, other).
    pub fn update(&mut self, other: &View) {
        if other.clocks.len() > self.clocks.len() {
            self.clocks.resize(other.clocks.len(), 0);
        }
        for (a, b) in self.clocks.iter_mut().zip(other.clocks.iter()) {
            *a = (*a).max(*b);
        }
    }

    /// Returns true if self <= other (component-wise).
    pub fn partial_le(&self, other: &View) -> bool {
        let max_len = self.clocks.len().max(other.clocks.len());
        for i in 0..max_len {
            let a = self.clocks.get(i).copied().unwrap_or(0);
            let b = other.clocks.get(i).copied().unwrap_or(0);
            if a > b {
                return false;
            }
        }
        true
    }

    /// Returns true if neither self <= other nor other <= self.
    pub fn concurrent_with(&self, other: &View) -> bool {
        !self.partial_le(other) && !other.partial_le(self)
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.clocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match c {
                0 => write!(f, "-")?,
                c => write!(f, "{}", c - 1)?,
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let v = View::with_threads(3);
        assert!(v.is_empty());
        assert!(!v.contains(Event::new(0, 0)));
        assert_eq!(v.get(1), None);
    }

    #[test]
    fn test_update_idx_contains_prefix() {
        let mut v = View::new();
        v.update_idx(Event::new(1, 2));
        assert!(v.contains(Event::new(1, 0)));
        assert!(v.contains(Event::new(1, 2)));
        assert!(!v.contains(Event::new(1, 3)));
        assert!(!v.contains(Event::new(0, 0)));
        assert_eq!(v.get(1), Some(2));
    }

    #[test]
    fn test_update_idx_never_retracts() {
        let mut v = View::new();
        v.update_idx(Event::new(0, 4));
        v.update_idx(Event::new(0, 1));
        assert_eq!(v.get(0), Some(4));
    }

    #[test]
    fn test_update_is_pointwise_max() {
        let mut a = View::new();
        a.update_idx(Event::new(0, 2));
        a.update_idx(Event::new(1, 0));
        let mut b = View::new();
        b.update_idx(Event::new(0, 1));
        b.update_idx(Event::new(1, 3));
        b.update_idx(Event::new(2, 1));
        a.update(&b);
        assert_eq!(a.get(0), Some(2));
        assert_eq!(a.get(1), Some(3));
        assert_eq!(a.get(2), Some(1));
    }

    #[test]
    fn test_partial_le_and_concurrent() {
        let mut a = View::new();
        a.update_idx(Event::new(0, 1));
        let mut b = a.clone();
        b.update_idx(Event::new(1, 0));
        assert!(a.partial_le(&b));
        assert!(!b.partial_le(&a));
        assert!(!a.concurrent_with(&b));

        let mut c = View::new();
        c.update_idx(Event::new(2, 0));
        assert!(b.concurrent_with(&c));
    }

    #[test]
    fn test_display() {
        let mut v = View::new();
        v.update_idx(Event::new(1, 3));
        assert_eq!(v.to_string(), "[-, 3]");
    }
}
