//! Shard lookup and scan-range clamping.
//!
//! A cursor serves exactly one shard. Before opening a remote scan it asks a
//! [`ShardDirectory`] for that shard's bounds and leaseholder endpoint, then
//! intersects the requested key range with the shard range.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ShardNotFound;

/// Bounds and serving endpoint of one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    /// Stable shard id.
    pub shard_id: u64,
    /// Endpoint currently serving the shard.
    pub endpoint: SocketAddr,
    /// Inclusive start key; empty means the start of the key space.
    pub start_key: Vec<u8>,
    /// Exclusive end key; empty means unbounded.
    pub end_key: Vec<u8>,
}

/// Resolves a shard id to its current descriptor.
#[async_trait]
pub trait ShardDirectory: Send + Sync + 'static {
    async fn locate(&self, shard_id: u64) -> Result<ShardDescriptor>;

    /// Shard whose range contains `key`.
    async fn locate_key(&self, key: &[u8]) -> Result<ShardDescriptor>;
}

/// Materialized view of cluster members and shard ownership.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    /// Endpoint used when a shard's leaseholder is unknown or removed.
    local_endpoint: SocketAddr,
    /// All members keyed by node id.
    members: BTreeMap<u64, TopologyMember>,
    /// Shards keyed by shard id.
    shards: BTreeMap<u64, TopologyShard>,
}

#[derive(Debug, Clone)]
struct TopologyMember {
    endpoint: SocketAddr,
    state: String,
}

#[derive(Debug, Clone)]
struct TopologyShard {
    leaseholder: u64,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
}

impl ClusterTopology {
    pub fn new(local_endpoint: SocketAddr) -> Self {
        Self {
            local_endpoint,
            members: BTreeMap::new(),
            shards: BTreeMap::new(),
        }
    }

    pub fn add_member(&mut self, node_id: u64, endpoint: SocketAddr) {
        self.members.insert(
            node_id,
            TopologyMember {
                endpoint,
                state: "active".to_string(),
            },
        );
    }

    pub fn add_shard(&mut self, shard_id: u64, leaseholder: u64, start_key: &[u8], end_key: &[u8]) {
        self.shards.insert(
            shard_id,
            TopologyShard {
                leaseholder,
                start_key: start_key.to_vec(),
                end_key: end_key.to_vec(),
            },
        );
    }

    /// Parses the cluster-state JSON document published by the store.
    pub fn from_json(raw: &str, local_endpoint: SocketAddr) -> Result<Self> {
        let parsed: ClusterStateView =
            serde_json::from_str(raw).context("parse cluster state json")?;

        let mut topology = Self::new(local_endpoint);
        for (_, member) in parsed.members {
            // Members without an address cannot serve scans.
            if member.grpc_addr.is_empty() {
                continue;
            }
            let endpoint: SocketAddr = member
                .grpc_addr
                .parse()
                .with_context(|| format!("invalid member addr in cluster state: {}", member.grpc_addr))?;
            topology.members.insert(
                member.node_id,
                TopologyMember {
                    endpoint,
                    state: member.state,
                },
            );
        }
        for shard in parsed.shards {
            topology.add_shard(
                shard.shard_id,
                shard.leaseholder,
                &shard.start_key,
                &shard.end_key,
            );
        }
        Ok(topology)
    }

    pub fn descriptor(&self, shard_id: u64) -> Option<ShardDescriptor> {
        let shard = self.shards.get(&shard_id)?;
        let endpoint = self
            .members
            .get(&shard.leaseholder)
            .filter(|member| member_is_usable(member))
            .map(|member| member.endpoint)
            .unwrap_or(self.local_endpoint);
        Some(ShardDescriptor {
            shard_id,
            endpoint,
            start_key: shard.start_key.clone(),
            end_key: shard.end_key.clone(),
        })
    }

    pub fn descriptor_for_key(&self, key: &[u8]) -> Option<ShardDescriptor> {
        let (shard_id, _) = self
            .shards
            .iter()
            .find(|(_, shard)| key_in_range(key, &shard.start_key, &shard.end_key))?;
        self.descriptor(*shard_id)
    }
}

#[async_trait]
impl ShardDirectory for ClusterTopology {
    async fn locate(&self, shard_id: u64) -> Result<ShardDescriptor> {
        self.descriptor(shard_id)
            .ok_or_else(|| ShardNotFound { shard_id }.into())
    }

    async fn locate_key(&self, key: &[u8]) -> Result<ShardDescriptor> {
        self.descriptor_for_key(key)
            .ok_or_else(|| anyhow!("no shard covers key {}", hex::encode(key)))
    }
}

/// Returns `true` when a member should receive traffic.
fn member_is_usable(member: &TopologyMember) -> bool {
    !member.state.eq_ignore_ascii_case("removed")
}

/// Intersects `[start, end)` with the shard's range. An empty `end` means
/// "to the end of the shard".
pub fn clamp_scan_range(start: &[u8], end: &[u8], shard: &ShardDescriptor) -> (Vec<u8>, Vec<u8>) {
    let effective_start = max_bytes(start, &shard.start_key);
    let effective_end = min_end_bound(end, &shard.end_key);
    (effective_start, effective_end)
}

/// Returns the lexicographically larger of two byte keys.
pub fn max_bytes(left: &[u8], right: &[u8]) -> Vec<u8> {
    if right.is_empty() || left >= right {
        left.to_vec()
    } else {
        right.to_vec()
    }
}

/// Returns the tighter exclusive end bound; empty bounds are unbounded.
pub fn min_end_bound(left: &[u8], right: &[u8]) -> Vec<u8> {
    match (left.is_empty(), right.is_empty()) {
        (true, true) => Vec::new(),
        (true, false) => right.to_vec(),
        (false, true) => left.to_vec(),
        (false, false) => {
            if left <= right {
                left.to_vec()
            } else {
                right.to_vec()
            }
        }
    }
}

/// Checks whether `key` is within `[start, end)` where empty bounds are open.
pub fn key_in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    let in_start = start.is_empty() || key >= start;
    let in_end = end.is_empty() || key < end;
    in_start && in_end
}

/// Wire model for cluster state JSON payload.
#[derive(Debug, Deserialize)]
struct ClusterStateView {
    #[serde(default)]
    members: BTreeMap<String, MemberView>,
    #[serde(default)]
    shards: Vec<ShardView>,
}

#[derive(Debug, Deserialize)]
struct MemberView {
    node_id: u64,
    grpc_addr: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct ShardView {
    shard_id: u64,
    leaseholder: u64,
    #[serde(default)]
    start_key: Vec<u8>,
    #[serde(default)]
    end_key: Vec<u8>,
}
