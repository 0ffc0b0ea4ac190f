//! Replica placement
//!
//! Shards are placed with rendezvous (HRW) hashing: every live host is scored
//! against the shard and the top `replication_factor` hosts win. A host joining
//! or leaving only moves shards whose top-R set it enters or leaves.

use crate::common::{select_replicas, Host, LiveHostSet, ShardId};

/// Pure mapping from shards and live hosts to replica lists
pub trait ShardAssigner: Send + Sync {
    /// Replicas for one shard; fewer than R when fewer hosts are live
    fn assign_shard(&self, shard: &ShardId, hosts: &LiveHostSet) -> Vec<Host>;

    fn replication_factor(&self) -> usize;

    /// Replicas for every shard, in input order
    fn assign(&self, shards: &[ShardId], hosts: &LiveHostSet) -> Vec<(ShardId, Vec<Host>)> {
        shards
            .iter()
            .map(|shard| (shard.clone(), self.assign_shard(shard, hosts)))
            .collect()
    }
}

/// HRW assigner over BLAKE3 scores
#[derive(Debug, Clone)]
pub struct MinHashShardAssigner {
    replication_factor: usize,
}

impl MinHashShardAssigner {
    pub fn new(replication_factor: usize) -> Self {
        Self { replication_factor }
    }
}

impl ShardAssigner for MinHashShardAssigner {
    fn assign_shard(&self, shard: &ShardId, hosts: &LiveHostSet) -> Vec<Host> {
        select_replicas(shard, &hosts.hosts, self.replication_factor)
    }

    fn replication_factor(&self) -> usize {
        self.replication_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn live(names: &[&str]) -> LiveHostSet {
        LiveHostSet::new(names.iter().map(|n| Host::new(*n, 9000)), 0)
    }

    fn numbered(n: usize) -> LiveHostSet {
        LiveHostSet::new((0..n).map(|i| Host::new(format!("host-{}", i), 9000)), 0)
    }

    fn shards(n: usize) -> Vec<ShardId> {
        (0..n)
            .map(|i| ShardId::new("orders", format!("index{:05}", i)))
            .collect()
    }

    #[test]
    fn test_every_shard_gets_min_r_distinct_hosts() {
        for host_count in 0..7 {
            for r in 1..5 {
                let hosts = numbered(host_count);
                let assigner = MinHashShardAssigner::new(r);
                for (_, replicas) in assigner.assign(&shards(50), &hosts) {
                    assert_eq!(replicas.len(), r.min(host_count));
                    let distinct: HashSet<_> = replicas.iter().collect();
                    assert_eq!(distinct.len(), replicas.len());
                    assert!(replicas.iter().all(|h| hosts.hosts.contains(h)));
                }
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let assigner = MinHashShardAssigner::new(3);
        let hosts = numbered(8);
        let shards = shards(100);
        assert_eq!(assigner.assign(&shards, &hosts), assigner.assign(&shards, &hosts));
    }

    #[test]
    fn test_empty_host_set_leaves_shard_unassigned() {
        let assigner = MinHashShardAssigner::new(2);
        let replicas = assigner.assign_shard(&ShardId::new("orders", "s"), &LiveHostSet::default());
        assert!(replicas.is_empty());
    }

    #[test]
    fn test_removing_a_host_only_moves_its_shards() {
        let assigner = MinHashShardAssigner::new(2);
        let before_hosts = live(&["h1", "h2", "h3"]);
        let after_hosts = live(&["h1", "h3"]);
        let removed = Host::new("h2", 9000);
        let shards = shards(10);

        let before = assigner.assign(&shards, &before_hosts);
        let after = assigner.assign(&shards, &after_hosts);

        for ((shard, old), (_, new)) in before.iter().zip(after.iter()) {
            if old.contains(&removed) {
                assert!(!new.contains(&removed), "{} still on removed host", shard);
                // surviving replica stays
                for h in old.iter().filter(|h| **h != removed) {
                    assert!(new.contains(h));
                }
            } else {
                assert_eq!(old, new, "{} moved without touching h2", shard);
            }
        }
    }

    #[test]
    fn test_adding_a_host_only_moves_shards_it_wins() {
        let assigner = MinHashShardAssigner::new(2);
        let before_hosts = numbered(10);
        let mut after_hosts = before_hosts.clone();
        let added = Host::new("host-new", 9000);
        after_hosts.hosts.insert(added.clone());
        let shards = shards(2000);

        let before = assigner.assign(&shards, &before_hosts);
        let after = assigner.assign(&shards, &after_hosts);

        let mut moved = 0;
        for ((_, old), (_, new)) in before.iter().zip(after.iter()) {
            if old != new {
                moved += 1;
                assert!(new.contains(&added));
            }
        }
        // expect about R/(n+1) = 2/11 of shards to move
        let fraction = moved as f64 / shards.len() as f64;
        assert!(fraction > 0.10 && fraction < 0.27, "moved fraction {}", fraction);
    }

    #[test]
    fn test_even_distribution() {
        let assigner = MinHashShardAssigner::new(1);
        let hosts = numbered(4);
        let mut counts: HashMap<Host, usize> = HashMap::new();
        for (_, replicas) in assigner.assign(&shards(10000), &hosts) {
            *counts.entry(replicas[0].clone()).or_default() += 1;
        }

        // Each host should get ~25% (allow 10% deviation)
        let expected = 10000 / 4;
        let tolerance = expected / 10;
        for (host, count) in counts {
            let diff = (count as i64 - expected as i64).unsigned_abs() as usize;
            assert!(diff < tolerance, "{}: got {}, expected ~{}", host, count, expected);
        }
    }
}
