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

use crate::types::{ItemId, UserId};

/// Maps arbitrary string identifiers to the consecutive integer ids used internally and back.
#[derive(Clone, Debug, Default)]
pub struct IdMapping {
    user_dict: FnvHashMap<String, UserId>,
    item_dict: FnvHashMap<String, ItemId>,
    user_names: Vec<String>,
    item_names: Vec<String>,
}

fn intern(dict: &mut FnvHashMap<String, u32>, names: &mut Vec<String>, name: &str) -> u32 {
    if let Some(index) = dict.get(name) {
        return *index;
    }

    let index = names.len() as u32;
    dict.insert(name.to_string(), index);
    names.push(name.to_string());
    index
}

impl IdMapping {

    pub fn new() -> Self {
        IdMapping::default()
    }

    pub fn num_users(&self) -> usize {
        self.user_names.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_names.len()
    }

    /// The id of user `name`, a fresh one if the user has not been seen before.
    pub fn intern_user(&mut self, name: &str) -> UserId {
        intern(&mut self.user_dict, &mut self.user_names, name)
    }

    /// The id of item `name`, a fresh one if the item has not been seen before.
    pub fn intern_item(&mut self, name: &str) -> ItemId {
        intern(&mut self.item_dict, &mut self.item_names, name)
    }

    pub fn user_index(&self, name: &str) -> Option<UserId> {
        self.user_dict.get(name).cloned()
    }

    pub fn item_index(&self, name: &str) -> Option<ItemId> {
        self.item_dict.get(name).cloned()
    }

    pub fn user_name(&self, user_index: UserId) -> Option<&str> {
        self.user_names.get(user_index as usize).map(|name| name.as_str())
    }

    pub fn item_name(&self, item_index: ItemId) -> Option<&str> {
        self.item_names.get(item_index as usize).map(|name| name.as_str())
    }
}

#[cfg(test)]
mod tests {

    use super::IdMapping;

    #[test]
    fn consecutive_ids() {
        let mut mapping = IdMapping::new();

        assert_eq!(mapping.intern_user("alice"), 0);
        assert_eq!(mapping.intern_user("bob"), 1);
        assert_eq!(mapping.intern_user("alice"), 0);
        assert_eq!(mapping.intern_item("pony"), 0);

        assert_eq!(mapping.num_users(), 2);
        assert_eq!(mapping.num_items(), 1);
    }

    #[test]
    fn names_and_indices() {
        let mut mapping = IdMapping::new();
        mapping.intern_user("alice");
        mapping.intern_item("apple");
        mapping.intern_item("dog");

        assert_eq!(mapping.user_index("alice"), Some(0));
        assert_eq!(mapping.user_index("charles"), None);
        assert_eq!(mapping.item_index("dog"), Some(1));
        assert_eq!(mapping.item_name(1), Some("dog"));
        assert_eq!(mapping.user_name(3), None);
    }
}
