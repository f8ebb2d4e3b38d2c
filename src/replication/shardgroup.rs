//! The read-only shard-group directory.
//!
//! A shard group names a remote Raft cluster owning a range of keys; the
//! migration engine resolves the target group here and dials its peers in
//! order.

use std::collections::HashMap;

use crate::replication::NodeAddr;

#[derive(Clone, Debug)]
pub struct ShardGroup {
    pub id: String,
    pub peers: Vec<NodeAddr>,
}

impl ShardGroup {
    pub fn new<I: Into<String>>(id: I, peers: Vec<NodeAddr>) -> Self {
        ShardGroup {
            id: id.into(),
            peers,
        }
    }
}

/// The directory view handed to the coordinator at startup.
#[derive(Clone, Debug, Default)]
pub struct ShardGroupTable {
    groups: HashMap<String, ShardGroup>,
}

impl ShardGroupTable {
    pub fn new(groups: Vec<ShardGroup>) -> Self {
        ShardGroupTable {
            groups: groups
                .into_iter()
                .map(|group| (group.id.clone(), group))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ShardGroup> {
        self.groups.get(id)
    }
}
