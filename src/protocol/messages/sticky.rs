use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use tracing::debug;

use crate::protocol::traits::{ReadError, ReadType, WriteError, WriteType};
use crate::topic::TopicPartition;

/// Generation reported for members whose user data carries none, either
/// because it is version 0 or because it could not be decoded.
pub const DEFAULT_GENERATION: i32 = -1;

/// The partitions of one topic a member owned when it last synced.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, proptest_derive::Arbitrary))]
pub struct TopicPartitions {
    pub topic: String,
    pub partitions: Vec<i32>,
}

impl<R> ReadType<R> for TopicPartitions
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let topic = String::read(reader)?;

        let len = usize::try_from(i32::read(reader)?)?;
        let mut partitions = Vec::new();
        for _i in 0..len {
            let p = i32::read(reader)?;
            partitions.push(p);
        }

        Ok(Self { topic, partitions })
    }
}

impl<W> WriteType<W> for TopicPartitions
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.topic.write(writer)?;

        let len = i32::try_from(self.partitions.len())?;
        len.write(writer)?;

        for p in &self.partitions {
            p.write(writer)?;
        }

        Ok(())
    }
}

/// The user data a member attaches to its join-group subscription under the
/// sticky protocol: the assignment it received in the previous generation.
///
/// Two encoded shapes exist. Version 0 is the assignment list alone, version
/// 1 appends the generation of the rebalance that produced it.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq))]
pub struct StickyUserData {
    // Version >= 0
    pub assignments: Vec<TopicPartitions>,
    // Version >= 1
    pub generation: i32,
}

impl Default for StickyUserData {
    fn default() -> Self {
        Self {
            assignments: vec![],
            generation: DEFAULT_GENERATION,
        }
    }
}

impl StickyUserData {
    pub fn read<R>(reader: &mut R, version: i16) -> Result<Self, ReadError>
    where
        R: Read,
    {
        if !(0..=1).contains(&version) {
            return Err(ReadError::Malformed(
                format!("Unsupported sticky user data version: {version}").into(),
            ));
        }

        let len = usize::try_from(i32::read(reader)?)?;
        let mut assignments = Vec::new();
        for _i in 0..len {
            assignments.push(TopicPartitions::read(reader)?);
        }

        let generation = if version >= 1 {
            i32::read(reader)?
        } else {
            DEFAULT_GENERATION
        };

        Ok(Self {
            assignments,
            generation,
        })
    }

    pub fn write<W>(&self, writer: &mut W, version: i16) -> Result<(), WriteError>
    where
        W: Write,
    {
        let len = i32::try_from(self.assignments.len())?;
        len.write(writer)?;

        for tp in &self.assignments {
            tp.write(writer)?;
        }

        if version >= 1 {
            self.generation.write(writer)?;
        }

        Ok(())
    }

    /// Decode a member's user data blob.
    ///
    /// Peer clients encode this, so nothing about it can be trusted. A blob
    /// that cannot be decoded (truncation, bad length prefix, unrecognized
    /// version) means the member joins without prior history, it is not an
    /// error.
    pub fn decode(version: i16, data: &[u8]) -> Self {
        if data.is_empty() {
            return Self::default();
        }

        let mut cursor = Cursor::new(data);
        match Self::read(&mut cursor, version) {
            Ok(user_data) => user_data,
            Err(err) => {
                debug!(version, %err, "discarding malformed sticky user data");
                Self::default()
            }
        }
    }

    /// Build the user data a member should attach to its next subscription
    /// from the assignment it was handed, keyed by topic.
    pub fn from_assignment(topics: &BTreeMap<String, Vec<i32>>, generation: i32) -> Self {
        Self {
            assignments: topics
                .iter()
                .map(|(topic, partitions)| TopicPartitions {
                    topic: topic.clone(),
                    partitions: partitions.clone(),
                })
                .collect(),
            generation,
        }
    }

    /// The owned partitions in encoded order.
    pub fn partitions(&self) -> impl Iterator<Item = TopicPartition> + '_ {
        self.assignments.iter().flat_map(|tp| {
            tp.partitions
                .iter()
                .map(|partition| TopicPartition::new(tp.topic.clone(), *partition))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn sticky_user_data_v0() {
        let user_data = StickyUserData {
            assignments: vec![TopicPartitions {
                topic: "one".into(),
                partitions: vec![0, 2, 4],
            }],
            generation: DEFAULT_GENERATION,
        };
        let data = [
            0, 0, 0, 1, // Topic array length
            0, 3, b'o', b'n', b'e', // Topic one
            0, 0, 0, 3, // Topic one, partition array length
            0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 4, // 0, 2, 4
        ]
        .as_ref();

        let mut cursor = Cursor::new([0u8; 64]);
        user_data.write(&mut cursor, 0).unwrap();
        let len = cursor.position() as usize;
        let buf = &cursor.get_ref().as_slice()[..len];
        assert_eq!(buf, data);

        cursor.set_position(0);
        let new = StickyUserData::read(&mut cursor, 0).unwrap();
        assert_eq!(new, user_data);
    }

    #[test]
    fn sticky_user_data_v1() {
        let user_data = StickyUserData {
            assignments: vec![
                TopicPartitions {
                    topic: "one".into(),
                    partitions: vec![1],
                },
                TopicPartitions {
                    topic: "two".into(),
                    partitions: vec![0, 3],
                },
            ],
            generation: 64,
        };
        let data = [
            0, 0, 0, 2, // Topic array length
            0, 3, b'o', b'n', b'e', // Topic one
            0, 0, 0, 1, // Topic one, partition array length
            0, 0, 0, 1, // 1
            0, 3, b't', b'w', b'o', // Topic two
            0, 0, 0, 2, // Topic two, partition array length
            0, 0, 0, 0, 0, 0, 0, 3, // 0, 3
            0, 0, 0, 64, // Generation
        ]
        .as_ref();

        let mut cursor = Cursor::new([0u8; 64]);
        user_data.write(&mut cursor, 1).unwrap();
        let len = cursor.position() as usize;
        let buf = &cursor.get_ref().as_slice()[..len];
        assert_eq!(buf, data);

        cursor.set_position(0);
        let new = StickyUserData::read(&mut cursor, 1).unwrap();
        assert_eq!(new, user_data);
    }

    #[test]
    fn sticky_user_data_v1_missing_generation() {
        let data = [
            0, 0, 0, 1, // Topic array length
            0, 3, b'o', b'n', b'e', // Topic one
            0, 0, 0, 1, // Topic one, partition array length
            0, 0, 0, 7, // 7
        ];

        let mut cursor = Cursor::new(data);
        StickyUserData::read(&mut cursor, 0).unwrap();

        let mut cursor = Cursor::new(data);
        let err = StickyUserData::read(&mut cursor, 1).unwrap_err();
        assert_matches!(err, ReadError::IO(_));
    }

    #[test]
    fn sticky_user_data_unsupported_version() {
        let mut cursor = Cursor::new([0, 0, 0, 0]);
        let err = StickyUserData::read(&mut cursor, 2).unwrap_err();
        assert_matches!(err, ReadError::Malformed(_));
    }

    #[test]
    fn decode_is_lenient() {
        // a newcomer carries no user data at all
        assert_eq!(StickyUserData::decode(1, &[]), StickyUserData::default());

        // negative block count
        let got = StickyUserData::decode(0, &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(got, StickyUserData::default());

        // truncated mid-topic
        let got = StickyUserData::decode(0, &[0, 0, 0, 1, 0, 3, b'o']);
        assert_eq!(got, StickyUserData::default());

        // version nobody speaks
        let got = StickyUserData::decode(9, &[0, 0, 0, 0]);
        assert_eq!(got, StickyUserData::default());
    }

    #[test]
    fn partitions_preserve_encoded_order() {
        let user_data = StickyUserData {
            assignments: vec![
                TopicPartitions {
                    topic: "b".into(),
                    partitions: vec![1, 0],
                },
                TopicPartitions {
                    topic: "a".into(),
                    partitions: vec![2],
                },
            ],
            generation: 3,
        };

        let got = user_data.partitions().collect::<Vec<_>>();
        assert_eq!(
            got,
            vec![
                TopicPartition::new("b", 1),
                TopicPartition::new("b", 0),
                TopicPartition::new("a", 2),
            ],
        );
    }

    proptest! {
        #[test]
        fn roundtrip_v1(assignments: Vec<TopicPartitions>, generation: i32) {
            let orig = StickyUserData {
                assignments,
                generation,
            };

            let mut cursor = Cursor::new(Vec::new());
            orig.write(&mut cursor, 1).unwrap();

            cursor.set_position(0);
            let restored = StickyUserData::read(&mut cursor, 1).unwrap();
            assert_eq!(orig, restored);
        }
    }
}
