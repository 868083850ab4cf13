mod sticky;

pub use sticky::{StickyUserData, TopicPartitions, DEFAULT_GENERATION};
