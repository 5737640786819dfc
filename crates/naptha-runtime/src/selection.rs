//! Worker selection for plan steps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use naptha_core::NodeAddress;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Chooses a worker from a pool, avoiding `exclude` when possible.
///
/// When every node is excluded the selector falls back to the full pool,
/// so a retry always has somewhere to go.
pub trait NodeSelector: Send + Sync {
    fn select(&self, pool: &[NodeAddress], exclude: &[NodeAddress]) -> Option<NodeAddress>;
}

fn candidates<'a>(pool: &'a [NodeAddress], exclude: &[NodeAddress]) -> Vec<&'a NodeAddress> {
    let preferred: Vec<&NodeAddress> = pool.iter().filter(|n| !exclude.contains(n)).collect();
    if preferred.is_empty() {
        pool.iter().collect()
    } else {
        preferred
    }
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeSelector for RoundRobin {
    fn select(&self, pool: &[NodeAddress], exclude: &[NodeAddress]) -> Option<NodeAddress> {
        let candidates = candidates(pool, exclude);
        if candidates.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        Some(candidates[i % candidates.len()].clone())
    }
}

#[derive(Debug, Default)]
pub struct RandomSelector;

impl NodeSelector for RandomSelector {
    fn select(&self, pool: &[NodeAddress], exclude: &[NodeAddress]) -> Option<NodeAddress> {
        candidates(pool, exclude)
            .choose(&mut rand::rng())
            .map(|n| (*n).clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    RoundRobin,
    Random,
}

impl SelectionPolicy {
    pub fn selector(self) -> Arc<dyn NodeSelector> {
        match self {
            Self::RoundRobin => Arc::new(RoundRobin::new()),
            Self::Random => Arc::new(RandomSelector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<NodeAddress> {
        (1..=3)
            .map(|i| NodeAddress::new(format!("http://w{}:7001", i)).unwrap())
            .collect()
    }

    #[test]
    fn test_round_robin_cycles() {
        let rr = RoundRobin::new();
        let pool = pool();
        let picks: Vec<_> = (0..6).map(|_| rr.select(&pool, &[]).unwrap()).collect();
        assert_eq!(&picks[..3], &pool[..]);
        assert_eq!(&picks[3..], &pool[..]);
    }

    #[test]
    fn test_exclusion_and_fallback() {
        let pool = pool();
        for selector in [SelectionPolicy::RoundRobin.selector(), SelectionPolicy::Random.selector()] {
            for _ in 0..10 {
                let pick = selector.select(&pool, &pool[..2]).unwrap();
                assert_eq!(pick, pool[2]);
            }
            assert!(selector.select(&pool, &pool).is_some());
            assert!(selector.select(&[], &[]).is_none());
        }
    }
}
