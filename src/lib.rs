//! Sticky partition assignment for Kafka consumer groups.
//!
//! The group leader runs [`balance`] after a join-group round to decide
//! which member consumes which partition. The strategy is *sticky*: every
//! assignable partition goes to exactly one subscribed member, partition
//! counts stay within one of each other whenever the subscriptions permit,
//! and members keep as many of their previously owned partitions as
//! possible across rebalances.
//!
//! The crate is the assignment algorithm alone. Joining the group, syncing
//! the result, and fetching topic metadata belong to the surrounding
//! client; the assignor consumes decoded member subscriptions plus a
//! topic-to-partitions map and returns a plan.
//!
//! ```
//! use std::collections::BTreeMap;
//!
//! use sticky_assignor::{balance, GroupMember};
//!
//! let members = vec![
//!     GroupMember {
//!         id: "a".to_string(),
//!         version: 1,
//!         topics: vec!["logs".to_string()],
//!         user_data: vec![],
//!     },
//!     GroupMember {
//!         id: "b".to_string(),
//!         version: 1,
//!         topics: vec!["logs".to_string()],
//!         user_data: vec![],
//!     },
//! ];
//! let topics = BTreeMap::from([("logs".to_string(), vec![0, 1, 2, 3])]);
//!
//! let plan = balance(&members, &topics);
//!
//! assert_eq!(plan["a"]["logs"], vec![0, 2]);
//! assert_eq!(plan["b"]["logs"], vec![1, 3]);
//! ```
//!
//! Prior ownership travels in the opaque user data each member attaches to
//! its subscription, see
//! [`StickyUserData`](protocol::messages::StickyUserData). Anything that
//! fails to decode simply makes that member a newcomer; no member input can
//! fail the call.

pub mod assignor;
pub mod protocol;
pub mod topic;

pub use assignor::{balance, Assignment, GroupMember, BALANCE_STRATEGY_STICKY};
pub use protocol::messages::{StickyUserData, TopicPartitions, DEFAULT_GENERATION};
pub use topic::TopicPartition;
