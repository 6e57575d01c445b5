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

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::{ItemId, UserId};

/// The read side of a trained model, all that evaluation and downstream consumers need.
pub trait PredictionPort {

    /// Score of `item` for `user`, higher means more relevant. Returns `f64::MIN` for pairs
    /// that cannot be predicted.
    fn score(&self, user: UserId, item: ItemId) -> f64;

    /// Whether both ids fall into the id range of the model.
    fn can_predict(&self, user: UserId, item: ItemId) -> bool;
}

/// Result type used to find the top-k items per user via a binary heap
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct ScoredItem {
    pub item: ItemId,
    pub score: f64,
}

/// Ordering for our heap, note that we must use a special implementation here as there is no
/// total order on floating point numbers. Higher scores compare as smaller, so the heap top is
/// always the weakest of the current top-k.
fn cmp_reverse(scored_item_a: &ScoredItem, scored_item_b: &ScoredItem) -> Ordering {
    match scored_item_a.score.partial_cmp(&scored_item_b.score) {
        Some(Ordering::Less) => Ordering::Greater,
        Some(Ordering::Greater) => Ordering::Less,
        _ => scored_item_a.item.cmp(&scored_item_b.item),
    }
}

impl Eq for ScoredItem {}

impl Ord for ScoredItem {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_reverse(self, other)
    }
}

impl PartialOrd for ScoredItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(cmp_reverse(self, other))
    }
}

/// The `k` highest scoring `candidates` for `user`, best first. Ties prefer smaller item ids.
pub fn top_k<P, I>(port: &P, user: UserId, candidates: I, k: usize) -> Vec<ScoredItem>
    where P: PredictionPort + ?Sized, I: IntoIterator<Item=ItemId> {

    if k == 0 {
        return Vec::new();
    }

    let mut heap = BinaryHeap::with_capacity(k);

    for item in candidates {
        if !port.can_predict(user, item) {
            continue;
        }

        let scored_item = ScoredItem { item, score: port.score(user, item) };

        if heap.len() < k {
            heap.push(scored_item);
        } else if let Some(mut top) = heap.peek_mut() {
            if scored_item < *top {
                *top = scored_item;
            }
        }
    }

    heap.into_sorted_vec()
}
