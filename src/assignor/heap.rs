use std::collections::BTreeSet;

/// Members ordered by how many partitions they currently hold, ties broken
/// by member id.
///
/// The sort key is the partition count, so callers must remove an entry
/// before growing or shrinking the member's partition list and reinsert it
/// with the new count afterwards.
#[derive(Debug, Default)]
pub(crate) struct BalanceHeap {
    entries: BTreeSet<(usize, String)>,
}

impl BalanceHeap {
    pub(crate) fn insert(&mut self, partitions: usize, member: String) {
        self.entries.insert((partitions, member));
    }

    pub(crate) fn remove(&mut self, partitions: usize, member: &str) {
        self.entries.remove(&(partitions, member.to_owned()));
    }

    /// The least loaded member.
    pub(crate) fn min(&self) -> Option<(usize, &str)> {
        self.entries.first().map(|(count, member)| (*count, member.as_str()))
    }

    /// The most loaded member.
    pub(crate) fn max(&self) -> Option<(usize, &str)> {
        self.entries.last().map(|(count, member)| (*count, member.as_str()))
    }

    /// Walk members from least to most loaded.
    pub(crate) fn ascending(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries.iter().map(|(count, member)| (*count, member.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_count_then_id() {
        let mut heap = BalanceHeap::default();
        heap.insert(2, "a".into());
        heap.insert(0, "c".into());
        heap.insert(0, "b".into());

        let got = heap.ascending().collect::<Vec<_>>();
        assert_eq!(got, vec![(0, "b"), (0, "c"), (2, "a")]);
        assert_eq!(heap.min(), Some((0, "b")));
        assert_eq!(heap.max(), Some((2, "a")));
    }

    #[test]
    fn remove_reinsert_moves_entry() {
        let mut heap = BalanceHeap::default();
        heap.insert(1, "a".into());
        heap.insert(1, "b".into());

        heap.remove(1, "a");
        heap.insert(2, "a".into());

        let got = heap.ascending().collect::<Vec<_>>();
        assert_eq!(got, vec![(1, "b"), (2, "a")]);
    }

    #[test]
    fn empty() {
        let heap = BalanceHeap::default();
        assert_eq!(heap.min(), None);
        assert_eq!(heap.max(), None);
        assert_eq!(heap.ascending().count(), 0);
    }
}
