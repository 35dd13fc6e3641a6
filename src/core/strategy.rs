// src/core/strategy.rs

//! Host selection strategies used for reader routing and failover candidate
//! ordering.

use crate::core::errors::WrapperError;
use crate::core::host::{HostAvailability, HostInfo, HostRole};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;

pub const STRATEGY_RANDOM: &str = "random";
pub const STRATEGY_ROUND_ROBIN: &str = "roundRobin";

/// Picks one host of the requested role from a topology snapshot.
pub trait HostSelector: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, hosts: &[HostInfo], role: HostRole) -> Result<HostInfo, WrapperError>;
}

fn eligible<'a>(hosts: &'a [HostInfo], role: HostRole) -> Vec<&'a HostInfo> {
    hosts
        .iter()
        .filter(|host| host.role == role)
        .filter(|host| host.effective_availability() == HostAvailability::Available)
        .collect()
}

/// Uniform random selection.
pub struct RandomHostSelector;

impl HostSelector for RandomHostSelector {
    fn name(&self) -> &'static str {
        STRATEGY_RANDOM
    }

    fn select(&self, hosts: &[HostInfo], role: HostRole) -> Result<HostInfo, WrapperError> {
        let candidates = eligible(hosts, role);
        if candidates.is_empty() {
            return Err(WrapperError::UnavailableHost(format!(
                "No available host found for role {role}"
            )));
        }
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[index].clone())
    }
}

/// Cycles through the hosts of a cluster in name order. The cursor is keyed by
/// the sorted member list so every selector instance over the same cluster
/// agrees on the rotation.
pub struct RoundRobinHostSelector {
    cursors: DashMap<String, usize>,
}

impl RoundRobinHostSelector {
    pub fn new() -> Self {
        Self {
            cursors: DashMap::new(),
        }
    }
}

impl Default for RoundRobinHostSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSelector for RoundRobinHostSelector {
    fn name(&self) -> &'static str {
        STRATEGY_ROUND_ROBIN
    }

    fn select(&self, hosts: &[HostInfo], role: HostRole) -> Result<HostInfo, WrapperError> {
        let mut candidates = eligible(hosts, role);
        if candidates.is_empty() {
            return Err(WrapperError::UnavailableHost(format!(
                "No available host found for role {role}"
            )));
        }
        candidates.sort_by(|a, b| a.url().cmp(&b.url()));
        let key = candidates
            .iter()
            .map(|host| host.url())
            .collect::<Vec<_>>()
            .join(",");

        let mut cursor = self.cursors.entry(key).or_insert(0);
        let selected = candidates[*cursor % candidates.len()].clone();
        *cursor = (*cursor + 1) % candidates.len();
        Ok(selected)
    }
}

/// Resolves a strategy by its configuration name.
pub fn selector_for(name: &str) -> Result<Arc<dyn HostSelector>, WrapperError> {
    match name {
        STRATEGY_RANDOM => Ok(Arc::new(RandomHostSelector)),
        STRATEGY_ROUND_ROBIN => Ok(Arc::new(RoundRobinHostSelector::new())),
        unknown => Err(WrapperError::IllegalArgument(format!(
            "Unknown host selector strategy '{unknown}'; supported strategies: {STRATEGY_RANDOM}, {STRATEGY_ROUND_ROBIN}"
        ))),
    }
}
