//! Per-session cost accounting and per-IP-subnet fair-share grouping
//! Ported from `electrumx.server.session.SessionGroup`
//! and the `bump_cost`/`recalc_concurrency` machinery in
//! `electrumx.server.session.SessionBase`.
//!
//! A session's `cost` only ever grows within a recalculation period; a
//! session's *group* retained cost is what decays, so one abusive
//! connection's cost still throttles its sibling connections sharing the
//! same `/24`/`/48` even after it disconnects.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// `soft_limit`/`hard_limit`/`bw_unit_cost` from the server's config table.
#[derive(Debug, Clone, Copy)]
pub struct CostLimits {
    pub soft_limit: f64,
    pub hard_limit: f64,
    pub bw_unit_cost: f64,
    pub initial_concurrent: f64,
}

impl Default for CostLimits {
    fn default() -> Self {
        CostLimits {
            soft_limit: 1_000.0,
            hard_limit: 10_000.0,
            bw_unit_cost: 1_000_000.0 / 5_000.0,
            initial_concurrent: 10.0,
        }
    }
}

impl CostLimits {
    /// Retained group cost decays at `hard_limit / 5000` cost/second,
    /// matching the upstream's `self.cost_hard_limit / 5000`.
    pub fn decay_per_second(&self) -> f64 {
        self.hard_limit / 5000.0
    }
}

/// A fair-share bucket of sessions from the same netmasked address.
pub struct SessionGroup {
    pub name: String,
    retained_cost: f64,
    session_count: usize,
    last_decay: Instant,
}

impl SessionGroup {
    fn new(name: String, now: Instant) -> Self {
        SessionGroup {
            name,
            retained_cost: 0.0,
            session_count: 0,
            last_decay: now,
        }
    }

    /// Applies linear decay for the time elapsed since the last touch, then
    /// returns the up-to-date retained cost.
    fn decayed_cost(&mut self, now: Instant, limits: &CostLimits) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_decay).as_secs_f64();
        self.retained_cost = (self.retained_cost - elapsed * limits.decay_per_second()).max(0.0);
        self.last_decay = now;
        self.retained_cost
    }

    pub fn retained_cost(&self) -> f64 {
        self.retained_cost
    }

    pub fn session_count(&self) -> usize {
        self.session_count
    }
}

/// Computes a session's group key: the address truncated to the configured
/// prefix length for its family (the
/// `session_group_by_subnet_ipv4/6`).
pub fn group_key(addr: IpAddr, ipv4_prefix: u8, ipv6_prefix: u8) -> String {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let prefix = ipv4_prefix.min(32);
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            format!("{}/{}", std::net::Ipv4Addr::from(bits & mask), prefix)
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let prefix = ipv6_prefix.min(128);
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix)
            };
            format!("{}/{}", std::net::Ipv6Addr::from(bits & mask), prefix)
        }
    }
}

/// All live groups, keyed by [`group_key`]. Owned by the session manager,
/// not by individual sessions, since it's shared state across connections.
#[derive(Default)]
pub struct GroupTable {
    groups: HashMap<String, SessionGroup>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session under `key`, returning its group's current
    /// retained cost (used as the group-cost term in `recalc_concurrency`).
    pub fn join(&mut self, key: &str, now: Instant) -> f64 {
        let group = self
            .groups
            .entry(key.to_string())
            .or_insert_with(|| SessionGroup::new(key.to_string(), now));
        group.session_count += 1;
        group.decayed_cost(now, &CostLimits::default())
    }

    pub fn leave(&mut self, key: &str) {
        if let Some(group) = self.groups.get_mut(key) {
            group.session_count = group.session_count.saturating_sub(1);
        }
    }

    /// Folds `cost` into the group's retained cost (after decay) and
    /// returns the up-to-date total.
    pub fn bump(&mut self, key: &str, cost: f64, now: Instant, limits: &CostLimits) -> f64 {
        let group = self
            .groups
            .entry(key.to_string())
            .or_insert_with(|| SessionGroup::new(key.to_string(), now));
        let decayed = group.decayed_cost(now, limits);
        group.retained_cost = decayed + cost;
        group.retained_cost
    }

    /// Drops every group with no live sessions and fully decayed cost.
    pub fn collect_garbage(&mut self, now: Instant, limits: &CostLimits) {
        self.groups.retain(|_, group| {
            group.decayed_cost(now, limits);
            group.session_count > 0 || group.retained_cost > 0.0
        });
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, usize, f64)> {
        self.groups
            .values()
            .map(|g| (g.name.as_str(), g.session_count(), g.retained_cost()))
    }
}

/// Per-session cost state. `cost` only grows between `reset`s; concurrency
/// throttling is derived from it plus the session's group's retained cost.
#[derive(Debug, Clone, Copy)]
pub struct SessionCost {
    pub cost: f64,
    pub concurrent: f64,
}

impl SessionCost {
    pub fn new(initial_concurrent: f64) -> Self {
        SessionCost {
            cost: 0.0,
            concurrent: initial_concurrent,
        }
    }

    pub fn bump(&mut self, amount: f64) {
        self.cost += amount;
    }

    /// `true` once this session has crossed the hard limit and must be
    /// disconnected.
    pub fn over_hard_limit(&self, limits: &CostLimits) -> bool {
        self.cost > limits.hard_limit
    }

    /// `true` once the session should throttle its own per-request
    /// concurrency.
    pub fn over_soft_limit(&self, limits: &CostLimits) -> bool {
        self.cost > limits.soft_limit
    }

    /// Recomputes the allowed concurrency from this session's own cost plus
    /// its group's retained cost, the way `recalc_concurrency` blends the
    /// two before deciding how many requests may run at once.
    pub fn recalc_concurrency(&mut self, group_cost: f64, limits: &CostLimits) {
        let target = if self.over_soft_limit(limits) {
            let excess = (self.cost + group_cost - limits.soft_limit).max(0.0);
            let band = (limits.hard_limit - limits.soft_limit).max(1.0);
            (limits.initial_concurrent * (1.0 - excess / band)).max(0.0)
        } else {
            limits.initial_concurrent
        };
        self.concurrent = target;
    }
}

/// How often `recalc_concurrency`/decay should run, matching the upstream's
/// fixed 300-second recalculation period ("one
/// recalculation period").
pub const RECALC_PERIOD: Duration = Duration::from_secs(300);

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn group_key_masks_to_the_configured_prefix() {
        let addr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 42));
        assert_eq!(group_key(addr, 24, 48), "203.0.113.0/24");
    }

    #[test]
    fn decay_reduces_retained_cost_over_time() {
        let mut table = GroupTable::new();
        let limits = CostLimits {
            hard_limit: 5000.0,
            ..CostLimits::default()
        };
        let t0 = Instant::now();
        table.bump("k", 10.0, t0, &limits);
        let later = t0 + Duration::from_secs(10);
        let decayed = table.bump("k", 0.0, later, &limits);
        assert!(decayed < 10.0);
    }

    #[test]
    fn hard_limit_crossed_disconnects() {
        let limits = CostLimits {
            hard_limit: 100.0,
            ..CostLimits::default()
        };
        let mut cost = SessionCost::new(10.0);
        cost.bump(150.0);
        assert!(cost.over_hard_limit(&limits));
    }

    #[test]
    fn garbage_collection_drops_empty_decayed_groups() {
        let mut table = GroupTable::new();
        let limits = CostLimits::default();
        let t0 = Instant::now();
        table.join("k", t0);
        table.leave("k");
        table.collect_garbage(t0, &limits);
        assert!(table.is_empty());
    }
}
