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

use fnv::FnvHashSet;

use crate::types;
use crate::types::{ItemId, SparseBinaryMatrix, UserId};

/// Positive-only feedback as a sparse boolean relation between users and items.
///
/// The relation is held twice, once per user (the items a user has interacted with) and once per
/// item (the users that interacted with an item). Both views are always mutated together, so an
/// edge is present in one view iff it is present in the other.
#[derive(Clone, Debug, Default)]
pub struct IncidenceStore {
    user_items: SparseBinaryMatrix,
    item_users: SparseBinaryMatrix,
    num_edges: usize,
    num_active_items: usize,
    empty: FnvHashSet<u32>,
}

impl IncidenceStore {

    pub fn new() -> Self {
        IncidenceStore::default()
    }

    /// Creates a store whose addressable space already covers `num_users` users and `num_items`
    /// items, even if some of them never get an edge.
    pub fn with_dimensions(num_users: usize, num_items: usize) -> Self {
        let mut store = IncidenceStore::new();
        store.grow(num_users, num_items);
        store
    }

    /// Builds a store from `(user, item)` pairs, duplicates are ignored.
    pub fn from_pairs<I>(pairs: I) -> Self
        where I: IntoIterator<Item=(UserId, ItemId)> {

        let mut store = IncidenceStore::new();
        for (user, item) in pairs {
            store.add(user, item);
        }
        store
    }

    /// Extends the addressable id space, never shrinks it.
    pub fn grow(&mut self, num_users: usize, num_items: usize) {
        if num_users > self.user_items.len() {
            self.user_items.resize(num_users, FnvHashSet::default());
        }
        if num_items > self.item_users.len() {
            self.item_users.resize(num_items, FnvHashSet::default());
        }
    }

    /// Inserts the edge `(user, item)`, returns false if it was already present.
    pub fn add(&mut self, user: UserId, item: ItemId) -> bool {
        self.grow(user as usize + 1, item as usize + 1);

        let inserted = self.user_items[user as usize].insert(item);

        if inserted {
            let users_of_item = &mut self.item_users[item as usize];
            let was_inserted = users_of_item.insert(user);
            debug_assert!(was_inserted, "column view diverged for ({}, {})", user, item);

            if users_of_item.len() == 1 {
                self.num_active_items += 1;
            }
            self.num_edges += 1;
        }

        inserted
    }

    /// Deletes the edge `(user, item)`, returns false if there was no such edge.
    pub fn remove(&mut self, user: UserId, item: ItemId) -> bool {
        let removed = match self.user_items.get_mut(user as usize) {
            Some(items) => items.remove(&item),
            None => false,
        };

        if removed {
            let users_of_item = &mut self.item_users[item as usize];
            let was_removed = users_of_item.remove(&user);
            debug_assert!(was_removed, "column view diverged for ({}, {})", user, item);

            if users_of_item.is_empty() {
                self.num_active_items -= 1;
            }
            self.num_edges -= 1;
        }

        removed
    }

    /// Drops every edge of `user`, returns the number of removed edges.
    pub fn remove_user(&mut self, user: UserId) -> usize {
        let items: Vec<ItemId> = self.items_of(user).iter().cloned().collect();
        for item in items.iter() {
            self.remove(user, *item);
        }
        items.len()
    }

    /// Drops every edge of `item`, returns the number of removed edges.
    pub fn remove_item(&mut self, item: ItemId) -> usize {
        let users: Vec<UserId> = self.users_of(item).iter().cloned().collect();
        for user in users.iter() {
            self.remove(*user, item);
        }
        users.len()
    }

    pub fn contains(&self, user: UserId, item: ItemId) -> bool {
        self.user_items
            .get(user as usize)
            .map_or(false, |items| items.contains(&item))
    }

    /// The items `user` has interacted with, empty for unknown users.
    pub fn items_of(&self, user: UserId) -> &FnvHashSet<ItemId> {
        self.user_items.get(user as usize).unwrap_or(&self.empty)
    }

    /// The users that interacted with `item`, empty for unknown items.
    pub fn users_of(&self, item: ItemId) -> &FnvHashSet<UserId> {
        self.item_users.get(item as usize).unwrap_or(&self.empty)
    }

    /// Total number of edges.
    pub fn size(&self) -> usize {
        self.num_edges
    }

    pub fn is_empty(&self) -> bool {
        self.num_edges == 0
    }

    /// Number of items with at least one user.
    pub fn num_active_items(&self) -> usize {
        self.num_active_items
    }

    pub fn num_users(&self) -> usize {
        self.user_items.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_users.len()
    }

    pub fn max_user_id(&self) -> Option<UserId> {
        types::max_id(self.num_users())
    }

    pub fn max_item_id(&self) -> Option<ItemId> {
        types::max_id(self.num_items())
    }

    /// All edges in user-major order, items of a user in ascending order.
    pub fn edges(&self) -> Vec<(UserId, ItemId)> {
        let mut edges = Vec::with_capacity(self.num_edges);

        for (user, items) in self.user_items.iter().enumerate() {
            let start = edges.len();
            edges.extend(items.iter().map(|item| (user as UserId, *item)));
            edges[start..].sort_unstable();
        }

        edges
    }
}

#[cfg(test)]
mod tests {

    use proptest::prelude::*;

    use super::IncidenceStore;

    fn scenario() -> IncidenceStore {
        let mut store = IncidenceStore::with_dimensions(4, 5);
        for &(user, item) in &[(0, 0), (0, 1), (1, 2), (2, 0), (2, 2), (2, 3)] {
            store.add(user, item);
        }
        store
    }

    #[test]
    fn scenario_dimensions_and_growth() {
        let mut store = scenario();

        assert_eq!(store.max_user_id(), Some(3));
        assert_eq!(store.max_item_id(), Some(4));
        assert_eq!(store.size(), 6);
        assert!(store.items_of(3).is_empty());

        assert!(store.add(3, 4));

        assert_eq!(store.items_of(3).len(), 1);
        assert!(store.items_of(3).contains(&4));
        assert!(store.users_of(4).contains(&3));
        assert_eq!(store.size(), 7);
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut store = scenario();

        assert!(!store.add(0, 1));
        assert_eq!(store.size(), 6);
        assert_eq!(store.users_of(1).len(), 1);
    }

    #[test]
    fn unknown_ids_have_empty_adjacency() {
        let mut store = scenario();

        assert!(store.items_of(100).is_empty());
        assert!(store.users_of(100).is_empty());
        assert!(!store.remove(100, 0));
        assert!(!store.remove(0, 100));
    }

    #[test]
    fn adding_beyond_maximum_grows_id_space() {
        let mut store = IncidenceStore::new();
        assert_eq!(store.max_user_id(), None);

        store.add(7, 2);

        assert_eq!(store.max_user_id(), Some(7));
        assert_eq!(store.max_item_id(), Some(2));
        assert_eq!(store.num_users(), 8);
    }

    #[test]
    fn removing_entities_drops_incident_edges() {
        let mut store = scenario();

        assert_eq!(store.remove_item(0), 2);
        assert!(store.users_of(0).is_empty());
        assert!(!store.items_of(2).contains(&0));
        assert_eq!(store.size(), 4);
        assert_eq!(store.num_active_items(), 2);

        assert_eq!(store.remove_user(2), 2);
        assert!(store.users_of(2).contains(&1));
        assert_eq!(store.size(), 2);
        // id space is untouched
        assert_eq!(store.max_user_id(), Some(3));
    }

    #[test]
    fn edges_are_user_major_and_sorted() {
        let store = scenario();

        assert_eq!(store.edges(), vec![(0, 0), (0, 1), (1, 2), (2, 0), (2, 2), (2, 3)]);
    }

    fn operations() -> impl Strategy<Value=Vec<(bool, u32, u32)>> {
        prop::collection::vec((any::<bool>(), 0u32..12, 0u32..9), 0..200)
    }

    proptest! {

        #[test]
        fn views_stay_consistent(ops in operations()) {
            let mut store = IncidenceStore::new();

            for (insert, user, item) in ops {
                if insert {
                    store.add(user, item);
                } else {
                    store.remove(user, item);
                }
            }

            let mut edges_from_rows = 0;
            for user in 0..store.num_users() as u32 {
                for item in store.items_of(user).iter() {
                    prop_assert!(store.users_of(*item).contains(&user));
                    edges_from_rows += 1;
                }
            }

            let mut edges_from_columns = 0;
            for item in 0..store.num_items() as u32 {
                for user in store.users_of(item).iter() {
                    prop_assert!(store.items_of(*user).contains(&item));
                    edges_from_columns += 1;
                }
            }

            let active_items = (0..store.num_items() as u32)
                .filter(|item| !store.users_of(*item).is_empty())
                .count();

            prop_assert_eq!(edges_from_rows, store.size());
            prop_assert_eq!(edges_from_columns, store.size());
            prop_assert_eq!(active_items, store.num_active_items());
        }

        #[test]
        fn add_then_remove_restores_state(ops in operations(), user in 0u32..12, item in 0u32..9) {
            let mut store = IncidenceStore::new();
            for (insert, u, i) in ops {
                if insert {
                    store.add(u, i);
                }
            }
            store.remove(user, item);

            let edges_before = store.edges();
            let size_before = store.size();

            store.add(user, item);
            store.remove(user, item);

            prop_assert_eq!(store.edges(), edges_before);
            prop_assert_eq!(store.size(), size_before);
        }
    }
}
