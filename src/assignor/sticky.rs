use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, trace};

use crate::assignor::heap::BalanceHeap;
use crate::assignor::{Assignment, GroupMember};
use crate::protocol::messages::StickyUserData;
use crate::topic::TopicPartition;

/// One-shot state of a sticky rebalance.
///
/// Everything here lives for a single [`balance`](crate::assignor::balance)
/// call: the previous assignment reconstructed from member user data, the
/// subscription graph between members and the partitions they may consume,
/// and the ownership index kept in lock-step with the plan while partitions
/// move around.
pub(crate) struct StickyBalancer {
    /// Current assignment, member id to owned partitions in order.
    plan: BTreeMap<String, Vec<TopicPartition>>,

    /// Partitions each member may consume.
    candidates_of: BTreeMap<String, BTreeSet<TopicPartition>>,

    /// Members that may consume each partition.
    candidates_for: BTreeMap<TopicPartition, BTreeSet<String>>,

    /// Current owner of every assigned partition.
    partition_owner: HashMap<TopicPartition, String>,

    /// Whether every participating partition has the same candidate set.
    subscriptions_identical: bool,

    /// Whether no member brought a decodable previous assignment.
    fresh_assignment: bool,
}

impl StickyBalancer {
    /// `members` must be sorted and deduplicated by id, the conflict rules
    /// below depend on that order.
    pub(crate) fn new(members: &[&GroupMember], topics: &BTreeMap<String, Vec<i32>>) -> Self {
        // Reconstruct the previous assignment from the user data the members
        // carried over. A partition claimed twice goes to the claim with the
        // strictly highest generation, later claimants lose ties.
        let mut plan: BTreeMap<String, Vec<TopicPartition>> = BTreeMap::new();
        let mut claims: HashMap<TopicPartition, (String, i32)> = HashMap::new();

        for member in members {
            let user_data = StickyUserData::decode(member.version, &member.user_data);

            for partition in user_data.partitions() {
                let evicted = match claims.get(&partition) {
                    Some((_, generation)) if *generation >= user_data.generation => {
                        trace!(
                            %partition,
                            member = member.id.as_str(),
                            "dropping duplicate or outdated claim"
                        );
                        continue;
                    }
                    Some((owner, _)) => Some(owner.clone()),
                    None => None,
                };

                if let Some(previous) = evicted {
                    debug!(
                        %partition,
                        winner = member.id.as_str(),
                        loser = previous.as_str(),
                        generation = user_data.generation,
                        "conflicting claims, higher generation wins"
                    );
                    if let Some(owned) = plan.get_mut(&previous) {
                        owned.retain(|p| p != &partition);
                    }
                }

                claims.insert(partition.clone(), (member.id.clone(), user_data.generation));
                plan.entry(member.id.clone()).or_default().push(partition);
            }
        }

        let fresh_assignment = plan.is_empty();

        // The subscription graph, restricted to topics the caller knows.
        let mut candidates_of: BTreeMap<String, BTreeSet<TopicPartition>> = BTreeMap::new();
        let mut candidates_for: BTreeMap<TopicPartition, BTreeSet<String>> = BTreeMap::new();
        for member in members {
            let candidates = candidates_of.entry(member.id.clone()).or_default();
            for topic in &member.topics {
                if let Some(partitions) = topics.get(topic) {
                    for &partition in partitions {
                        let partition = TopicPartition::new(topic.clone(), partition);
                        candidates_for
                            .entry(partition.clone())
                            .or_default()
                            .insert(member.id.clone());
                        candidates.insert(partition);
                    }
                }
            }
            plan.entry(member.id.clone()).or_default();
        }

        let mut sets = candidates_for.values();
        let subscriptions_identical = match sets.next() {
            Some(reference) => sets.all(|set| set == reference),
            None => true,
        };

        Self {
            plan,
            candidates_of,
            candidates_for,
            partition_owner: HashMap::new(),
            subscriptions_identical,
            fresh_assignment,
        }
    }

    pub(crate) fn balance(mut self) -> Assignment {
        let unassigned = self.sweep();

        let mut heap = BalanceHeap::default();
        for (member, partitions) in &self.plan {
            heap.insert(partitions.len(), member.clone());
        }

        self.place(&mut heap, unassigned);
        self.rebalance(&mut heap);
        self.into_assignment()
    }

    /// Drop reconstructed partitions that no longer exist or have no
    /// subscriber, and strip the ones whose owner lost interest in the
    /// topic. Returns every partition that needs an owner.
    fn sweep(&mut self) -> Vec<TopicPartition> {
        let mut unassigned = Vec::new();
        let mut seen: HashSet<TopicPartition> = HashSet::new();

        let candidates_for = &self.candidates_for;
        let candidates_of = &self.candidates_of;
        let partition_owner = &mut self.partition_owner;

        for (member, partitions) in self.plan.iter_mut() {
            partitions.retain(|partition| {
                if !candidates_for.contains_key(partition) {
                    // topic deleted, or nobody subscribes to it anymore
                    return false;
                }

                partition_owner.insert(partition.clone(), member.clone());
                seen.insert(partition.clone());

                match candidates_of.get(member) {
                    Some(candidates) if candidates.contains(partition) => true,
                    _ => {
                        // the member narrowed its subscription
                        unassigned.push(partition.clone());
                        false
                    }
                }
            });
        }

        for partition in self.candidates_for.keys() {
            if !seen.contains(partition) {
                unassigned.push(partition.clone());
            }
        }

        unassigned
    }

    /// Hand every orphaned partition to the least loaded member that may
    /// consume it.
    fn place(&mut self, heap: &mut BalanceHeap, unassigned: Vec<TopicPartition>) {
        for partition in unassigned {
            let target = heap
                .ascending()
                .find(|(_, member)| {
                    self.candidates_of
                        .get(*member)
                        .is_some_and(|candidates| candidates.contains(&partition))
                })
                .map(|(count, member)| (count, member.to_owned()));

            if let Some((count, member)) = target {
                heap.remove(count, &member);
                if let Some(owned) = self.plan.get_mut(&member) {
                    owned.push(partition.clone());
                }
                self.partition_owner.insert(partition, member.clone());
                heap.insert(count + 1, member);
            }
        }
    }

    /// Move partitions from more loaded members to less loaded ones until
    /// the plan is balanced or no further move is possible, then keep the
    /// result only if it scores strictly better than the plan it started
    /// from.
    fn rebalance(&mut self, heap: &mut BalanceHeap) {
        let starting: HashMap<String, HashSet<TopicPartition>> = self
            .plan
            .iter()
            .map(|(member, partitions)| (member.clone(), partitions.iter().cloned().collect()))
            .collect();
        let pre_balance = self.plan.clone();

        // every member that held a partition during this rebalance, and the
        // members proven to be part of an unresolvable oscillation
        let mut cyclers: HashMap<TopicPartition, HashSet<String>> = HashMap::new();
        let mut frozen: HashSet<String> = HashSet::new();

        let mut reassigned = false;
        let mut modified = true;

        while modified && !self.is_balanced(heap) {
            modified = false;

            let ascent = heap
                .ascending()
                .map(|(count, member)| (count, member.to_owned()))
                .collect::<Vec<_>>();

            for (count, member) in ascent {
                if frozen.contains(&member) {
                    continue;
                }

                // Partitions this member could take from a more loaded
                // owner, keeping only the ties for the most loaded donor.
                let mut donor_size = 0;
                let mut candidates: Vec<(String, TopicPartition)> = Vec::new();
                if let Some(wanted) = self.candidates_of.get(&member) {
                    for partition in wanted {
                        let owner = match self.partition_owner.get(partition) {
                            Some(owner) if *owner != member && !frozen.contains(owner) => owner,
                            _ => continue,
                        };
                        let size = self.plan.get(owner).map_or(0, Vec::len);
                        if size <= count {
                            continue;
                        }
                        if size > donor_size {
                            donor_size = size;
                            candidates.clear();
                        }
                        if size == donor_size {
                            candidates.push((owner.clone(), partition.clone()));
                        }
                    }
                }

                if candidates.is_empty() {
                    frozen.insert(member);
                    continue;
                }
                candidates.sort();

                // Reclaim a partition the member held before this rebalance
                // if it can. Otherwise raid the first donor, taking from the
                // tail of its list.
                let held_before = candidates
                    .iter()
                    .find(|(_, partition)| {
                        starting
                            .get(&member)
                            .is_some_and(|owned| owned.contains(partition))
                    })
                    .cloned();
                let (victim, partition) = match held_before {
                    Some(choice) => choice,
                    None => self.tail_candidate(&candidates),
                };

                let holders = cyclers.entry(partition.clone()).or_default();
                if holders.contains(&member) {
                    // the partition came back to a member that already held
                    // it this rebalance
                    debug!(
                        member = member.as_str(),
                        %partition,
                        "cycle detected, freezing member"
                    );
                    frozen.insert(member.clone());
                }
                holders.insert(member.clone());
                holders.insert(victim.clone());

                let victim_count = self.plan.get(&victim).map_or(0, Vec::len);
                heap.remove(victim_count, &victim);
                heap.remove(count, &member);

                if let Some(owned) = self.plan.get_mut(&victim) {
                    owned.retain(|p| p != &partition);
                }
                if let Some(owned) = self.plan.get_mut(&member) {
                    owned.push(partition.clone());
                }
                self.partition_owner.insert(partition.clone(), member.clone());

                heap.insert(victim_count - 1, victim.clone());
                heap.insert(count + 1, member.clone());

                trace!(
                    %partition,
                    from = victim.as_str(),
                    to = member.as_str(),
                    "moved partition"
                );

                reassigned = true;
                modified = true;
                break;
            }
        }

        if !self.fresh_assignment && reassigned {
            let before = score(&pre_balance);
            let after = score(&self.plan);
            if after >= before {
                debug!(
                    before,
                    after,
                    "rebalancing did not improve the balance, keeping the previous plan"
                );
                self.plan = pre_balance;
            }
        }
    }

    /// Of the candidates belonging to the first donor, the one sitting
    /// deepest in that donor's list.
    fn tail_candidate(&self, candidates: &[(String, TopicPartition)]) -> (String, TopicPartition) {
        let victim = &candidates[0].0;
        let owned = match self.plan.get(victim) {
            Some(owned) => owned,
            None => return candidates[0].clone(),
        };

        let mut choice = candidates[0].clone();
        let mut deepest = owned.iter().position(|p| *p == choice.1).unwrap_or(0);
        for (owner, partition) in &candidates[1..] {
            if owner != victim {
                // candidates are sorted, the first donor's entries are a
                // prefix
                break;
            }
            if let Some(position) = owned.iter().position(|p| p == partition) {
                if position > deepest {
                    deepest = position;
                    choice = (owner.clone(), partition.clone());
                }
            }
        }
        choice
    }

    fn is_balanced(&self, heap: &BalanceHeap) -> bool {
        let (min, max) = match (heap.min(), heap.max()) {
            (Some((min, _)), Some((max, _))) => (min, max),
            _ => return true,
        };
        if max <= min + 1 {
            return true;
        }
        if self.subscriptions_identical {
            return false;
        }

        // A wider spread is still balanced if no member that wants more
        // could actually take a partition from a more loaded owner.
        for (count, member) in heap.ascending() {
            let wanted = match self.candidates_of.get(member) {
                Some(wanted) => wanted,
                None => continue,
            };
            if count >= wanted.len() {
                continue;
            }
            for partition in wanted {
                if let Some(owner) = self.partition_owner.get(partition) {
                    if self.plan.get(owner).map_or(0, Vec::len) > count {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Project the internal plan into its wire-facing shape, keeping the
    /// partition order of each member's list.
    fn into_assignment(self) -> Assignment {
        self.plan
            .into_iter()
            .map(|(member, partitions)| {
                let mut topics: BTreeMap<String, Vec<i32>> = BTreeMap::new();
                for partition in partitions {
                    topics
                        .entry(partition.topic)
                        .or_default()
                        .push(partition.partition);
                }
                (member, topics)
            })
            .collect()
    }
}

/// Total pairwise imbalance of a plan, lower is better.
fn score(plan: &BTreeMap<String, Vec<TopicPartition>>) -> usize {
    let counts = plan.values().map(Vec::len).collect::<Vec<_>>();
    let mut total = 0;
    for (i, a) in counts.iter().enumerate() {
        for b in &counts[i + 1..] {
            total += a.abs_diff(*b);
        }
    }
    total
}
