//! The sticky assignment strategy.
//!
//! Given the members of a consumer group and the partitions that exist, the
//! assignor hands every partition to exactly one subscribed member, keeps
//! partition counts within one of each other whenever subscriptions allow,
//! and preserves as much of the previous assignment as possible. The
//! previous assignment is recovered from the user data each member attached
//! to its subscription, see
//! [`StickyUserData`](crate::protocol::messages::StickyUserData).

use std::collections::BTreeMap;

mod heap;
mod sticky;

use self::sticky::StickyBalancer;

/// Protocol name under which this strategy is announced to the group
/// coordinator.
pub const BALANCE_STRATEGY_STICKY: &str = "sticky";

/// A member of the consumer group, as the leader sees it after a join-group
/// round.
#[derive(Debug, Clone)]
pub struct GroupMember {
    /// Member id assigned by the group coordinator, unique within the
    /// group.
    pub id: String,

    /// Version of the sticky user data the member encodes.
    pub version: i16,

    /// Topics the member wants to consume.
    pub topics: Vec<String>,

    /// Opaque user data carried over from the previous rebalance.
    pub user_data: Vec<u8>,
}

/// A finished assignment: member id to topic to partitions.
pub type Assignment = BTreeMap<String, BTreeMap<String, Vec<i32>>>;

/// Distribute the partitions of `topics` over `members`.
///
/// Every member appears in the returned assignment, possibly with no
/// partitions. Partitions of topics nobody subscribes to stay unassigned,
/// and topics a member references but the caller does not know are ignored.
/// Malformed user data never fails the call, the member simply joins
/// without history.
///
/// The result is deterministic: equal inputs produce equal assignments
/// regardless of member order.
pub fn balance(members: &[GroupMember], topics: &BTreeMap<String, Vec<i32>>) -> Assignment {
    let mut members = members.iter().collect::<Vec<_>>();
    members.sort_by(|a, b| a.id.cmp(&b.id));
    members.dedup_by(|a, b| a.id == b.id);

    if members.is_empty() {
        return Assignment::default();
    }

    StickyBalancer::new(&members, topics).balance()
}
