//! Sharded, concurrent set of accepted rules.
//!
//! Rules are routed to one of a fixed number of shards by their stable hash,
//! and each shard is guarded by its own lock. Two workers holding equal rules
//! always contend on the same shard, so insert-if-absent is atomic per rule
//! while unrelated inserts proceed in parallel.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::rule::Rule;

/// Default number of shards; prime so hash low bits spread evenly.
pub const SHARD_COUNT: usize = 307;

/// Concurrent dedup store for mined rules.
#[derive(Debug)]
pub struct RuleStore {
    shards: Box<[Mutex<HashSet<Rule>>]>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::with_shards(SHARD_COUNT)
    }

    /// A store with `n` shards (at least one).
    pub fn with_shards(n: usize) -> Self {
        Self {
            shards: (0..n.max(1)).map(|_| Mutex::new(HashSet::new())).collect(),
        }
    }

    fn shard(&self, rule: &Rule) -> &Mutex<HashSet<Rule>> {
        let i = (rule.stable_hash() % self.shards.len() as u64) as usize;
        &self.shards[i]
    }

    /// Insert `rule` unless an equal rule is already stored.
    ///
    /// Returns `true` if this call inserted it. Of any number of concurrent
    /// calls with equal rules, exactly one returns `true`.
    pub fn try_store(&self, rule: Rule) -> bool {
        let mut shard = self.shard(&rule).lock().expect("rule shard lock poisoned");
        if shard.contains(&rule) {
            return false;
        }
        shard.insert(rule)
    }

    pub fn contains(&self, rule: &Rule) -> bool {
        self.shard(rule)
            .lock()
            .expect("rule shard lock poisoned")
            .contains(rule)
    }

    /// Total stored rules.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("rule shard lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored rule, shard by shard.
    ///
    /// Consistent only while no worker is inserting.
    pub fn snapshot(&self) -> Vec<Rule> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            out.extend(shard.lock().expect("rule shard lock poisoned").iter().cloned());
        }
        out
    }

    /// Stored rules per kind name.
    pub fn counts_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for shard in self.shards.iter() {
            for rule in shard.lock().expect("rule shard lock poisoned").iter() {
                *counts.entry(rule.kind().name()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}
