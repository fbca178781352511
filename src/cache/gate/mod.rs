
use super::keywords::overlap;
use crate::config::CacheConfig;

/// Outcome of checking a nearest neighbor against the acceptance rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accepted,
    TooFar,
    NoKeywordOverlap,
}

impl GateDecision {
    #[inline]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// Distance threshold plus keyword-overlap confirmation.
///
/// The threshold is inclusive: a neighbor exactly at `distance_threshold` is
/// accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptanceGate {
    pub distance_threshold: f32,
    pub min_overlap: usize,
}

impl AcceptanceGate {
    #[inline]
    pub fn new(distance_threshold: f32, min_overlap: usize) -> Self {
        Self {
            distance_threshold,
            min_overlap,
        }
    }

    #[inline]
    pub fn evaluate(&self, distance: f32, candidate: &str, incoming: &str) -> GateDecision {
        if !self.within_distance(distance) {
            return GateDecision::TooFar;
        }
        if overlap(candidate, incoming) < self.min_overlap {
            return GateDecision::NoKeywordOverlap;
        }
        GateDecision::Accepted
    }

    #[inline]
    pub fn within_distance(&self, distance: f32) -> bool {
        distance <= self.distance_threshold
    }
}

impl From<&CacheConfig> for AcceptanceGate {
    fn from(config: &CacheConfig) -> Self {
        Self::new(config.distance_threshold, config.min_overlap)
    }
}
