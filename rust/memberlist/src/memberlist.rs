use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A member in a memberlist represents a kubernetes pod
/// who's been deemed eligible to participate in the memberlist
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub struct Member {
    // The ID of the member
    pub member_id: String,
    // The IP address of the member
    pub member_ip: String,
    // The k8s node name of the member
    pub member_node_name: String,
}

pub type Memberlist = Vec<Member>;

/// Liveness of a worker as last observed. Only `Ready` workers are published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Ready,
    NotReady,
    Unknown,
}

/// Sorts by member id, the order in which memberlists are published.
pub fn sort_memberlist(memberlist: &mut Memberlist) {
    memberlist.sort_by(|a, b| a.member_id.cmp(&b.member_id));
}

/// Order-insensitive comparison.
pub fn memberlists_equal(a: &Memberlist, b: &Memberlist) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let a: HashSet<&Member> = a.iter().collect();
    b.iter().all(|member| a.contains(member))
}
