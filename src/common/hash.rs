//! Hashing utilities for shardmaster
//!
//! - BLAKE3 as the scoring function
//! - HRW (Highest Random Weight) ranking for replica placement

use crate::common::{Host, ShardId};

/// HRW score of `host` for the shard identified by `placement_key`.
pub fn hrw_score(placement_key: &[u8], host: &Host) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(placement_key);
    hasher.update(&[0xff]);
    hasher.update(host.hostname.as_bytes());
    hasher.update(&host.port.to_be_bytes());
    let hash = hasher.finalize();

    let mut word = [0u8; 8];
    word.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(word)
}

/// HRW (Highest Random Weight) hashing for replica placement
///
/// Returns `hosts` sorted by descending weight for this shard. Equal weights
/// fall back to host order so the ranking never depends on input order.
pub fn hrw_rank<'a>(shard: &ShardId, hosts: impl IntoIterator<Item = &'a Host>) -> Vec<Host> {
    let key = shard.placement_key();
    let mut weights: Vec<(u64, &Host)> = hosts
        .into_iter()
        .map(|host| (hrw_score(&key, host), host))
        .collect();

    weights.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    weights.dedup_by(|a, b| a.1 == b.1);

    weights.into_iter().map(|(_, host)| host.clone()).collect()
}

/// Select N replicas using HRW hashing
pub fn select_replicas<'a>(
    shard: &ShardId,
    hosts: impl IntoIterator<Item = &'a Host>,
    n: usize,
) -> Vec<Host> {
    let mut ranked = hrw_rank(shard, hosts);
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(n: usize) -> Vec<Host> {
        (1..=n).map(|i| Host::new(format!("node{}", i), 9000)).collect()
    }

    #[test]
    fn test_hrw_rank_consistent() {
        let shard = ShardId::new("orders", "shard-1");
        let nodes = hosts(3);

        let sorted1 = hrw_rank(&shard, &nodes);
        let sorted2 = hrw_rank(&shard, &nodes);

        assert_eq!(sorted1, sorted2);
        assert_eq!(sorted1.len(), 3);
    }

    #[test]
    fn test_hrw_rank_ignores_input_order() {
        let shard = ShardId::new("orders", "shard-1");
        let nodes = hosts(5);
        let mut reversed = nodes.clone();
        reversed.reverse();

        assert_eq!(hrw_rank(&shard, &nodes), hrw_rank(&shard, &reversed));
    }

    #[test]
    fn test_hrw_rank_different_shards() {
        let nodes = hosts(8);
        let rankings: std::collections::HashSet<Vec<Host>> = (0..20)
            .map(|i| hrw_rank(&ShardId::new("orders", format!("shard-{}", i)), &nodes))
            .collect();

        // Different shards should produce different orderings
        assert!(rankings.len() > 1);
    }

    #[test]
    fn test_port_is_part_of_identity() {
        let key = ShardId::new("orders", "shard-1").placement_key();
        assert_ne!(
            hrw_score(&key, &Host::new("node1", 9000)),
            hrw_score(&key, &Host::new("node1", 9001))
        );
    }

    #[test]
    fn test_select_replicas() {
        let shard = ShardId::new("orders", "shard-1");
        let nodes = hosts(4);

        let replicas = select_replicas(&shard, &nodes, 2);
        assert_eq!(replicas.len(), 2);
        assert_ne!(replicas[0], replicas[1]);
        assert_eq!(replicas, hrw_rank(&shard, &nodes)[..2].to_vec());
    }

    #[test]
    fn test_duplicate_hosts_collapse() {
        let shard = ShardId::new("orders", "shard-1");
        let mut nodes = hosts(2);
        nodes.push(nodes[0].clone());

        assert_eq!(select_replicas(&shard, &nodes, 3).len(), 2);
    }
}
