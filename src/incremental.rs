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

// Online updates of a trained model.
//
// New or removed feedback only retrains the rows of the user and the item involved, everything
// else stays as it was. This is an approximation of what a full re-fit would produce, but it is
// cheap enough to run after every single interaction.

use std::collections::BTreeSet;

use tracing::debug;

use crate::engine::TrainingEngine;
use crate::error::Result;
use crate::gradient;
use crate::gradient::UpdateTargets;
use crate::types;
use crate::types::{ItemId, SampleTriple, UserId};

impl TrainingEngine {

    /// Makes `user` known to the model. New rows are drawn from the initialization distribution,
    /// this includes rows of previously removed users that come back into the id range.
    pub fn add_user(&mut self, user: UserId) -> Result<()> {
        let previous_max = self.max_user_id;
        let is_new = previous_max.map_or(true, |max_user_id| user > max_user_id);
        if is_new {
            self.max_user_id = Some(user);
        }

        self.store.grow(user as usize + 1, 0);

        if let Some(model) = self.model.as_mut() {
            if is_new {
                let first_returning = types::slots(previous_max) as UserId;
                let last_allocated = model.num_users() as UserId;
                for returning in first_returning..last_allocated.min(user.saturating_add(1)) {
                    model.reinit_user_row(returning, &self.normal, &mut self.rng);
                }
            }
            model.add_user_row(user, &self.normal, &mut self.rng);
        }

        self.resize_sampler();
        Ok(())
    }

    /// Makes `item` known to the model. New rows are drawn from the initialization distribution
    /// and new biases are zero, this includes previously removed items that come back into the id
    /// range.
    pub fn add_item(&mut self, item: ItemId) -> Result<()> {
        let previous_max = self.max_item_id;
        let is_new = previous_max.map_or(true, |max_item_id| item > max_item_id);
        if is_new {
            self.max_item_id = Some(item);
        }

        self.store.grow(0, item as usize + 1);

        if let Some(model) = self.model.as_mut() {
            if is_new {
                let first_returning = types::slots(previous_max) as ItemId;
                let last_allocated = model.num_items() as ItemId;
                for returning in first_returning..last_allocated.min(item.saturating_add(1)) {
                    model.reset_item_row(returning, &self.normal, &mut self.rng);
                }
            }
            model.add_item_row(item, &self.normal, &mut self.rng);
        }

        self.resize_sampler();
        if is_new {
            self.sampler.forget_items();
            self.sampler.refresh_valid_users(&self.store);
        }
        Ok(())
    }

    /// Drops all feedback of `user` and zeroes its row. The row itself is kept so that ids stay
    /// aligned with rows.
    pub fn remove_user(&mut self, user: UserId) -> Result<()> {
        self.check_user(user)?;

        let num_removed = self.store.remove_user(user);
        debug!("Removed user {} with {} interactions", user, num_removed);

        if let Some(model) = self.model.as_mut() {
            model.zero_user_row(user);
        }

        if self.max_user_id == Some(user) {
            self.max_user_id = user.checked_sub(1);
        }

        self.sampler.forget_user(user);
        self.resize_sampler();
        self.sampler.refresh_valid_users(&self.store);
        Ok(())
    }

    /// Drops all feedback of `item` and zeroes its row and bias.
    pub fn remove_item(&mut self, item: ItemId) -> Result<()> {
        self.check_item(item)?;

        let num_removed = self.store.remove_item(item);
        debug!("Removed item {} with {} interactions", item, num_removed);

        if let Some(model) = self.model.as_mut() {
            model.zero_item_row(item);
        }

        if self.max_item_id == Some(item) {
            self.max_item_id = item.checked_sub(1);
        }

        self.sampler.forget_items();
        self.resize_sampler();
        self.sampler.refresh_valid_users(&self.store);
        Ok(())
    }

    /// Records that `user` interacted with `item` and retrains both rows.
    pub fn add_feedback(&mut self, user: UserId, item: ItemId) -> Result<()> {
        self.add_feedback_batch(&[(user, item)])
    }

    /// Removes the interaction of `user` with `item` and retrains both rows. Removing an
    /// interaction that was never recorded changes nothing.
    pub fn remove_feedback(&mut self, user: UserId, item: ItemId) -> Result<()> {
        self.remove_feedback_batch(&[(user, item)])
    }

    /// Records several interactions, then retrains every touched user and item once.
    pub fn add_feedback_batch(&mut self, feedback: &[(UserId, ItemId)]) -> Result<()> {
        let mut touched_users = BTreeSet::new();
        let mut touched_items = BTreeSet::new();

        for &(user, item) in feedback {
            if self.check_user(user).is_err() {
                self.add_user(user)?;
            }
            if self.check_item(item).is_err() {
                self.add_item(item)?;
            }

            if self.store.add(user, item) {
                self.sampler.refresh_user(&self.store, user);
                touched_users.insert(user);
                touched_items.insert(item);
            }
        }

        self.retrain(&touched_users, &touched_items);
        Ok(())
    }

    /// Removes several interactions, then retrains every touched user and item once.
    pub fn remove_feedback_batch(&mut self, feedback: &[(UserId, ItemId)]) -> Result<()> {
        for &(user, item) in feedback {
            self.check_user(user)?;
            self.check_item(item)?;
        }

        let mut touched_users = BTreeSet::new();
        let mut touched_items = BTreeSet::new();

        for &(user, item) in feedback {
            if self.store.remove(user, item) {
                self.sampler.refresh_user(&self.store, user);
                touched_users.insert(user);
                touched_items.insert(item);
            } else {
                debug!("No interaction between user {} and item {} to remove", user, item);
            }
        }

        self.retrain(&touched_users, &touched_items);
        Ok(())
    }

    fn resize_sampler(&mut self) {
        let (num_users, num_items) = (self.num_user_slots(), self.num_item_slots());
        self.sampler.resize(num_users, num_items);
    }

    fn retrain(&mut self, users: &BTreeSet<UserId>, items: &BTreeSet<ItemId>) {
        if self.model.is_none() || (users.is_empty() && items.is_empty()) {
            return;
        }

        if self.config.update_users {
            for user in users.iter() {
                self.retrain_user(*user);
            }
        }
        if self.config.update_items {
            for item in items.iter() {
                self.retrain_item(*item);
            }
        }
    }

    /// Re-estimates the row of `user` from scratch, using `iteration_length` steps per
    /// interaction of the user. Only the user row changes.
    pub fn retrain_user(&mut self, user: UserId) {
        let step = self.config.step(self.learn_rate());
        let model = match self.model.as_mut() {
            Some(model) if (user as usize) < model.num_users() => model,
            _ => return,
        };

        model.reinit_user_row(user, &self.normal, &mut self.rng);

        let num_steps = self.store.items_of(user).len() * self.config.iteration_length;

        for _ in 0..num_steps {
            match self.sampler.sample_item_pair(&self.store, user, &mut self.rng) {
                Some((positive, negative)) => {
                    let triple = SampleTriple { user, positive, negative };
                    gradient::apply(self.config.gradient_rule, model, &triple, &step,
                        UpdateTargets::USER);
                },
                None => break,
            }
        }
    }

    /// Re-estimates the row of `item` from scratch, using as many steps as an average item gets
    /// per epoch. Only the row and bias of `item` change.
    pub fn retrain_item(&mut self, item: ItemId) {
        let num_item_slots = types::slots(self.max_item_id);
        let step = self.config.step(self.learn_rate());
        let model = match self.model.as_mut() {
            Some(model) if (item as usize) < model.num_items() => model,
            _ => return,
        };

        model.reinit_item_row(item, &self.normal, &mut self.rng);

        if num_item_slots == 0 {
            return;
        }

        let steps_per_item = (self.store.size() / num_item_slots).max(1);
        let num_steps = steps_per_item * self.config.iteration_length;

        for _ in 0..num_steps {
            let user = match self.sampler.sample_user(&mut self.rng) {
                Some(user) => user,
                None => break,
            };

            let sampled = self.sampler.sample_other_item(&self.store, user, item, &mut self.rng);

            let (triple, targets) = match sampled {
                Some((other, true)) => (
                    SampleTriple { user, positive: item, negative: other },
                    UpdateTargets::POSITIVE,
                ),
                Some((other, false)) => (
                    SampleTriple { user, positive: other, negative: item },
                    UpdateTargets::NEGATIVE,
                ),
                None => continue,
            };

            gradient::apply(self.config.gradient_rule, model, &triple, &step, targets);
        }
    }
}
