/**
 * BprReco
 * Copyright (C) 2018 Sebastian Schelter
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use fnv::FnvHashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::incidence::IncidenceStore;
use crate::types::{ItemId, SampleTriple, UserId};

/// Which triples an epoch is made of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingPolicy {
    /// Random valid user, random positive item of that user.
    UniformUserWithReplacement,
    /// Random valid user, positive items drawn from a per-user pool that is refilled once empty.
    UniformUserWithoutReplacement,
    /// Random edge, repetitions allowed.
    UniformPairWithReplacement,
    /// Every edge once per epoch in random order, negatives drawn from the item column of all
    /// edges, which favours popular items.
    UniformPairWithoutReplacement,
}

impl SamplingPolicy {

    pub fn from_flags(uniform_user: bool, with_replacement: bool) -> Self {
        match (uniform_user, with_replacement) {
            (true, true) => SamplingPolicy::UniformUserWithReplacement,
            (true, false) => SamplingPolicy::UniformUserWithoutReplacement,
            (false, true) => SamplingPolicy::UniformPairWithReplacement,
            (false, false) => SamplingPolicy::UniformPairWithoutReplacement,
        }
    }

    fn needs_edges(self) -> bool {
        match self {
            SamplingPolicy::UniformPairWithReplacement |
            SamplingPolicy::UniformPairWithoutReplacement => true,
            _ => false,
        }
    }
}

/// Explicit positive and negative item lists of a single user.
#[derive(Clone, Debug, PartialEq)]
struct UserItemLists {
    positives: Vec<ItemId>,
    negatives: Vec<ItemId>,
}

impl UserItemLists {

    fn build(store: &IncidenceStore, user: UserId, num_items: usize) -> Self {
        let seen = store.items_of(user);

        let mut positives: Vec<ItemId> = seen.iter().cloned().collect();
        positives.sort_unstable();

        let negatives = (0..num_items as ItemId)
            .filter(|item| !seen.contains(item))
            .collect();

        UserItemLists { positives, negatives }
    }
}

/// Precomputed per-user item lists, a cache derived from the incidence store.
///
/// Entries are built on first use and dropped whenever the feedback of their user or the set of
/// items changes, the store always remains the source of truth.
#[derive(Clone, Debug, Default)]
struct FastSamplingCache {
    lists: Vec<Option<UserItemLists>>,
}

impl FastSamplingCache {

    fn lists_for(&mut self, store: &IncidenceStore, user: UserId, num_items: usize)
        -> &UserItemLists {

        let user_idx = user as usize;
        if self.lists.len() <= user_idx {
            self.lists.resize(user_idx + 1, None);
        }

        self.lists[user_idx].get_or_insert_with(|| UserItemLists::build(store, user, num_items))
    }

    fn invalidate_user(&mut self, user: UserId) {
        if let Some(entry) = self.lists.get_mut(user as usize) {
            *entry = None;
        }
    }

    fn invalidate_all(&mut self) {
        for entry in self.lists.iter_mut() {
            *entry = None;
        }
    }
}

/// Estimated size in MiB of the fast sampling lists for the given dimensions.
pub fn fast_sampling_memory_mib(num_users: usize, num_items: usize) -> usize {
    let bytes = (num_users as u128) * (num_items as u128) * 4;
    (bytes / (1024 * 1024)) as usize
}

/// Draws training triples from an incidence store.
///
/// The sampler keeps a snapshot of the valid anchor users (and for the pair policies the edge
/// list), which `refresh` rebuilds. The store must not change between `begin_epoch` and the end
/// of the epoch, incremental updates happen in between epochs.
#[derive(Clone, Debug)]
pub struct Sampler {
    policy: SamplingPolicy,
    num_users: usize,
    num_items: usize,
    valid_users: Vec<UserId>,
    edges: Vec<(UserId, ItemId)>,
    pools: FnvHashMap<UserId, Vec<ItemId>>,
    fast_sampling: Option<FastSamplingCache>,
    cursor: usize,
    remaining: usize,
}

impl Sampler {

    pub fn new(policy: SamplingPolicy) -> Self {
        Sampler {
            policy,
            num_users: 0,
            num_items: 0,
            valid_users: Vec::new(),
            edges: Vec::new(),
            pools: FnvHashMap::default(),
            fast_sampling: None,
            cursor: 0,
            remaining: 0,
        }
    }

    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    /// Sets the number of user and item slots known to the model. Ids in the store beyond these
    /// are ignored.
    pub fn resize(&mut self, num_users: usize, num_items: usize) {
        if num_items != self.num_items {
            if let Some(cache) = self.fast_sampling.as_mut() {
                cache.invalidate_all();
            }
        }
        self.num_users = num_users;
        self.num_items = num_items;
    }

    /// Turns on the precomputed item lists if they fit into `memory_limit_mib`, returns whether
    /// they are active. Exceeding the budget just means rejection sampling is used.
    pub fn configure_fast_sampling(&mut self, memory_limit_mib: usize) -> bool {
        let required = fast_sampling_memory_mib(self.num_users, self.num_items);

        if required <= memory_limit_mib {
            if self.fast_sampling.is_none() {
                self.fast_sampling = Some(FastSamplingCache::default());
            }
            true
        } else {
            info!(
                "Fast sampling would need {} MiB (budget {} MiB), using rejection sampling",
                required, memory_limit_mib);
            self.fast_sampling = None;
            false
        }
    }

    pub fn uses_fast_sampling(&self) -> bool {
        self.fast_sampling.is_some()
    }

    /// Eagerly fills the fast sampling lists for all users with feedback.
    pub fn precompute(&mut self, store: &IncidenceStore) {
        let num_items = self.num_items;
        let num_users = self.num_users;
        if let Some(cache) = self.fast_sampling.as_mut() {
            for user in 0..num_users as UserId {
                if !store.items_of(user).is_empty() {
                    cache.lists_for(store, user, num_items);
                }
            }
        }
    }

    /// Called after the feedback of `user` changed. Only touches state of `user`, the edge
    /// snapshot is left alone until the next `refresh`.
    pub fn refresh_user(&mut self, store: &IncidenceStore, user: UserId) {
        self.pools.remove(&user);

        let is_valid = self.is_valid_user(store, user);
        match (self.valid_users.binary_search(&user), is_valid) {
            (Ok(position), false) => {
                self.valid_users.remove(position);
            },
            (Err(position), true) => self.valid_users.insert(position, user),
            _ => {},
        }

        let num_items = self.num_items;
        if let Some(cache) = self.fast_sampling.as_mut() {
            cache.invalidate_user(user);
            if !store.items_of(user).is_empty() {
                cache.lists_for(store, user, num_items);
            }
        }
    }

    /// Called after `user` was removed.
    pub fn forget_user(&mut self, user: UserId) {
        self.pools.remove(&user);
        if let Some(cache) = self.fast_sampling.as_mut() {
            cache.invalidate_user(user);
        }
    }

    /// Called after an item was added or removed.
    pub fn forget_items(&mut self) {
        self.pools.clear();
        if let Some(cache) = self.fast_sampling.as_mut() {
            cache.invalidate_all();
        }
    }

    /// Rebuilds the snapshot of valid anchor users and edges.
    pub fn refresh(&mut self, store: &IncidenceStore) {
        self.refresh_valid_users(store);

        let num_items = self.num_items;
        if self.policy.needs_edges() {
            let num_users = self.num_users;
            self.edges = store.edges()
                .into_iter()
                .filter(|&(user, item)| (user as usize) < num_users && (item as usize) < num_items)
                .collect();
        } else {
            self.edges.clear();
        }
    }

    /// Rebuilds the snapshot of valid anchor users only, in ascending id order.
    pub fn refresh_valid_users(&mut self, store: &IncidenceStore) {
        let num_items = self.num_items;

        self.valid_users = (0..self.num_users as UserId)
            .filter(|user| is_valid_anchor(store.items_of(*user).len(), num_items))
            .collect();
    }

    pub fn num_valid_users(&self) -> usize {
        self.valid_users.len()
    }

    /// Whether `user` can anchor a triple: at least one, but not all items observed.
    pub fn is_valid_user(&self, store: &IncidenceStore, user: UserId) -> bool {
        (user as usize) < self.num_users &&
            is_valid_anchor(store.items_of(user).len(), self.num_items)
    }

    /// Prepares an epoch of `store.size() * iteration_length` triples (one triple per edge for
    /// the uniform pair policy without replacement). Fails if no triple can be sampled at all.
    pub fn begin_epoch<R: Rng>(
        &mut self,
        store: &IncidenceStore,
        rng: &mut R,
        iteration_length: usize,
    ) -> Result<usize> {

        self.refresh(store);
        self.pools.clear();
        self.cursor = 0;

        if self.valid_users.is_empty() {
            return Err(Error::SamplingExhausted);
        }

        self.remaining = match self.policy {
            SamplingPolicy::UniformPairWithoutReplacement => {
                let num_active_items = store.num_active_items();
                let samplable = self.edges.iter()
                    .any(|&(user, _)| store.items_of(user).len() < num_active_items);

                if !samplable {
                    return Err(Error::SamplingExhausted);
                }

                self.edges.shuffle(rng);
                self.edges.len()
            },
            _ => store.size() * iteration_length,
        };

        debug!("Epoch with {:?} prepared, {} triples from {} valid users",
            self.policy, self.remaining, self.valid_users.len());

        Ok(self.remaining)
    }

    /// Next triple of the current epoch, `None` once the epoch is exhausted.
    pub fn next_triple<R: Rng>(&mut self, store: &IncidenceStore, rng: &mut R)
        -> Option<SampleTriple> {

        match self.policy {
            SamplingPolicy::UniformPairWithoutReplacement => self.next_unvisited_edge(store, rng),
            _ => {
                if self.remaining == 0 {
                    return None;
                }
                self.remaining -= 1;

                match self.policy {
                    SamplingPolicy::UniformUserWithReplacement => self.uniform_user_triple(store, rng),
                    SamplingPolicy::UniformUserWithoutReplacement => {
                        let user = self.sample_user(rng)?;
                        let positive = self.draw_from_pool(store, user, rng);
                        let negative = self.sample_negative(store, user, rng);
                        Some(SampleTriple { user, positive, negative })
                    },
                    _ => {
                        let (user, positive) = self.sample_valid_edge(store, rng)?;
                        let negative = self.sample_negative(store, user, rng);
                        Some(SampleTriple { user, positive, negative })
                    },
                }
            },
        }
    }

    /// A triple drawn uniformly over valid users, independent of the epoch state. Used for the
    /// loss sample.
    pub fn uniform_user_triple<R: Rng>(&mut self, store: &IncidenceStore, rng: &mut R)
        -> Option<SampleTriple> {

        let user = self.sample_user(rng)?;
        let (positive, negative) = self.sample_item_pair(store, user, rng)?;
        Some(SampleTriple { user, positive, negative })
    }

    /// A uniformly random valid user.
    pub fn sample_user<R: Rng>(&self, rng: &mut R) -> Option<UserId> {
        self.valid_users.choose(rng).cloned()
    }

    /// A positive and a negative item for `user`, `None` if `user` is no valid anchor.
    pub fn sample_item_pair<R: Rng>(&mut self, store: &IncidenceStore, user: UserId, rng: &mut R)
        -> Option<(ItemId, ItemId)> {

        if !self.is_valid_user(store, user) {
            return None;
        }

        let positive = self.sample_positive(store, user, rng)?;
        let negative = self.sample_negative(store, user, rng);

        Some((positive, negative))
    }

    /// An item whose polarity for `user` is the opposite of `item`'s. Returns the item and
    /// whether `item` itself is positive for `user`.
    pub fn sample_other_item<R: Rng>(
        &mut self,
        store: &IncidenceStore,
        user: UserId,
        item: ItemId,
        rng: &mut R,
    ) -> Option<(ItemId, bool)> {

        if !self.is_valid_user(store, user) {
            return None;
        }

        if store.contains(user, item) {
            Some((self.sample_negative(store, user, rng), true))
        } else {
            self.sample_positive(store, user, rng).map(|positive| (positive, false))
        }
    }

    fn next_unvisited_edge<R: Rng>(&mut self, store: &IncidenceStore, rng: &mut R)
        -> Option<SampleTriple> {

        let num_active_items = store.num_active_items();

        while self.cursor < self.edges.len() {
            let (user, positive) = self.edges[self.cursor];
            self.cursor += 1;
            self.remaining = self.remaining.saturating_sub(1);

            // Such a user has no unobserved item among those that appear in the edge list
            if store.items_of(user).len() >= num_active_items {
                continue;
            }

            let negative = loop {
                let (_, candidate) = self.edges[rng.gen_range(0..self.edges.len())];
                if !store.contains(user, candidate) {
                    break candidate;
                }
            };

            return Some(SampleTriple { user, positive, negative });
        }

        None
    }

    fn sample_valid_edge<R: Rng>(&self, store: &IncidenceStore, rng: &mut R)
        -> Option<(UserId, ItemId)> {

        if self.edges.is_empty() {
            return None;
        }

        // Terminates as every valid user has at least one edge
        loop {
            let (user, item) = self.edges[rng.gen_range(0..self.edges.len())];
            if self.is_valid_user(store, user) {
                return Some((user, item));
            }
        }
    }

    fn sample_positive<R: Rng>(&mut self, store: &IncidenceStore, user: UserId, rng: &mut R)
        -> Option<ItemId> {

        let num_items = self.num_items;
        match self.fast_sampling.as_mut() {
            Some(cache) => cache.lists_for(store, user, num_items).positives.choose(rng).cloned(),
            None => {
                let items = store.items_of(user);
                if items.is_empty() {
                    return None;
                }
                let index = rng.gen_range(0..items.len());
                items.iter().nth(index).cloned()
            },
        }
    }

    fn sample_negative<R: Rng>(&mut self, store: &IncidenceStore, user: UserId, rng: &mut R)
        -> ItemId {

        let num_items = self.num_items;
        match self.fast_sampling.as_mut() {
            Some(cache) => {
                let negatives = &cache.lists_for(store, user, num_items).negatives;
                negatives[rng.gen_range(0..negatives.len())]
            },
            None => {
                // Terminates as valid users have not seen every item
                loop {
                    let item = rng.gen_range(0..num_items) as ItemId;
                    if !store.contains(user, item) {
                        return item;
                    }
                }
            },
        }
    }

    fn draw_from_pool<R: Rng>(&mut self, store: &IncidenceStore, user: UserId, rng: &mut R)
        -> ItemId {

        let pool = self.pools.entry(user).or_insert_with(Vec::new);

        if pool.is_empty() {
            pool.extend(store.items_of(user).iter().cloned());
            pool.sort_unstable();
        }

        let index = rng.gen_range(0..pool.len());
        pool.swap_remove(index)
    }
}

fn is_valid_anchor(num_seen: usize, num_items: usize) -> bool {
    num_seen > 0 && num_seen < num_items
}

#[cfg(test)]
mod tests {

    use fnv::FnvHashSet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    /// user 0 -> {0, 1}, user 1 -> {2}, user 2 -> {0, 2, 3}, user 3 -> {}
    fn scenario() -> IncidenceStore {
        let mut store = IncidenceStore::with_dimensions(4, 5);
        for &(user, item) in &[(0, 0), (0, 1), (1, 2), (2, 0), (2, 2), (2, 3)] {
            store.add(user, item);
        }
        store
    }

    fn sampler(policy: SamplingPolicy, store: &IncidenceStore) -> Sampler {
        let mut sampler = Sampler::new(policy);
        sampler.resize(store.num_users(), store.num_items());
        sampler
    }

    const POLICIES: [SamplingPolicy; 4] = [
        SamplingPolicy::UniformUserWithReplacement,
        SamplingPolicy::UniformUserWithoutReplacement,
        SamplingPolicy::UniformPairWithReplacement,
        SamplingPolicy::UniformPairWithoutReplacement,
    ];

    #[test]
    fn flags_select_policies() {
        assert_eq!(SamplingPolicy::from_flags(true, true), POLICIES[0]);
        assert_eq!(SamplingPolicy::from_flags(true, false), POLICIES[1]);
        assert_eq!(SamplingPolicy::from_flags(false, true), POLICIES[2]);
        assert_eq!(SamplingPolicy::from_flags(false, false), POLICIES[3]);
    }

    #[test]
    fn triples_are_always_valid() {
        let store = scenario();

        for &policy in POLICIES.iter() {
            for &fast in &[false, true] {
                let mut rng = StdRng::seed_from_u64(13);
                let mut sampler = sampler(policy, &store);
                if fast {
                    assert!(sampler.configure_fast_sampling(1));
                }

                let length = sampler.begin_epoch(&store, &mut rng, 5).unwrap();
                let mut drawn = 0;

                while let Some(triple) = sampler.next_triple(&store, &mut rng) {
                    assert_ne!(triple.user, 3, "user without feedback was sampled");
                    assert!(store.contains(triple.user, triple.positive));
                    assert!(!store.contains(triple.user, triple.negative));
                    assert!(triple.negative < 5);
                    drawn += 1;
                }

                assert_eq!(drawn, length);
            }
        }
    }

    #[test]
    fn uniform_user_epoch_length() {
        let store = scenario();
        let mut rng = StdRng::seed_from_u64(1);
        let mut sampler = sampler(SamplingPolicy::UniformUserWithReplacement, &store);

        assert_eq!(sampler.begin_epoch(&store, &mut rng, 3).unwrap(), 18);
        assert_eq!(sampler.num_valid_users(), 3);
    }

    #[test]
    fn pair_policy_without_replacement_visits_each_edge_once() {
        let store = scenario();
        let mut rng = StdRng::seed_from_u64(3);
        let mut sampler = sampler(SamplingPolicy::UniformPairWithoutReplacement, &store);

        sampler.begin_epoch(&store, &mut rng, 5).unwrap();

        let mut visited = Vec::new();
        while let Some(triple) = sampler.next_triple(&store, &mut rng) {
            visited.push((triple.user, triple.positive));
        }
        visited.sort_unstable();

        assert_eq!(visited, store.edges());
    }

    #[test]
    fn pools_hand_out_every_positive_before_repeating() {
        let store = scenario();
        let mut rng = StdRng::seed_from_u64(5);
        let mut sampler = sampler(SamplingPolicy::UniformUserWithoutReplacement, &store);

        let first: FnvHashSet<ItemId> = (0..3)
            .map(|_| sampler.draw_from_pool(&store, 2, &mut rng))
            .collect();

        assert_eq!(first.len(), 3);
        assert!(store.contains(2, sampler.draw_from_pool(&store, 2, &mut rng)));
    }

    #[test]
    fn no_valid_user_is_a_hard_error() {
        let mut store = IncidenceStore::with_dimensions(3, 2);
        store.add(0, 0);
        store.add(0, 1);

        for &policy in POLICIES.iter() {
            let mut rng = StdRng::seed_from_u64(9);
            let mut sampler = sampler(policy, &store);

            match sampler.begin_epoch(&store, &mut rng, 5) {
                Err(Error::SamplingExhausted) => {},
                other => panic!("expected sampling to fail for {:?}, got {:?}", policy, other),
            }
        }
    }

    #[test]
    fn anchored_sampling() {
        let store = scenario();
        let mut rng = StdRng::seed_from_u64(21);
        let mut sampler = sampler(SamplingPolicy::UniformUserWithReplacement, &store);
        sampler.refresh(&store);

        assert_eq!(sampler.sample_item_pair(&store, 3, &mut rng), None);

        for _ in 0..50 {
            let (positive, negative) = sampler.sample_item_pair(&store, 2, &mut rng).unwrap();
            assert!(store.contains(2, positive));
            assert!(!store.contains(2, negative));

            let (other, is_positive) = sampler.sample_other_item(&store, 0, 1, &mut rng).unwrap();
            assert!(is_positive);
            assert!(!store.contains(0, other));

            let (other, is_positive) = sampler.sample_other_item(&store, 0, 4, &mut rng).unwrap();
            assert!(!is_positive);
            assert!(store.contains(0, other));
        }
    }

    #[test]
    fn fast_sampling_respects_memory_budget() {
        let store = scenario();
        let mut sampler = sampler(SamplingPolicy::UniformUserWithReplacement, &store);

        assert_eq!(fast_sampling_memory_mib(1024, 1024), 4);

        sampler.resize(1024, 1024);
        assert!(!sampler.configure_fast_sampling(3));
        assert!(!sampler.uses_fast_sampling());
        assert!(sampler.configure_fast_sampling(4));
    }

    #[test]
    fn fast_sampling_lists_follow_feedback_changes() {
        let mut store = scenario();
        let mut rng = StdRng::seed_from_u64(17);
        let mut sampler = sampler(SamplingPolicy::UniformUserWithReplacement, &store);
        assert!(sampler.configure_fast_sampling(16));
        sampler.precompute(&store);

        store.add(1, 4);
        store.remove(1, 2);
        sampler.refresh_user(&store, 1);
        sampler.refresh(&store);

        for _ in 0..50 {
            let (positive, negative) = sampler.sample_item_pair(&store, 1, &mut rng).unwrap();
            assert_eq!(positive, 4);
            assert_ne!(negative, 4);
        }
    }

    #[test]
    fn valid_users_follow_single_user_changes() {
        let mut store = scenario();
        let mut sampler = sampler(SamplingPolicy::UniformPairWithoutReplacement, &store);
        sampler.refresh(&store);
        let edges_before = sampler.edges.clone();
        assert_eq!(sampler.valid_users, vec![0, 1, 2]);

        store.add(3, 1);
        sampler.refresh_user(&store, 3);
        assert_eq!(sampler.valid_users, vec![0, 1, 2, 3]);

        store.remove(1, 2);
        sampler.refresh_user(&store, 1);
        assert_eq!(sampler.valid_users, vec![0, 2, 3]);

        for item in 0..5 {
            store.add(0, item);
        }
        sampler.refresh_user(&store, 0);
        assert_eq!(sampler.valid_users, vec![2, 3]);

        // the edge snapshot is only rebuilt by a full refresh
        assert_eq!(sampler.edges, edges_before);
        sampler.refresh(&store);
        assert_eq!(sampler.valid_users, vec![2, 3]);
        assert_ne!(sampler.edges, edges_before);
    }
}
