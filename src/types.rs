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

/// Dense, non-negative user identifier.
pub type UserId = u32;
/// Dense, non-negative item identifier.
pub type ItemId = u32;

/// One adjacency set per row, indexed by the dense identifier of the row.
pub type SparseBinaryMatrix = Vec<FnvHashSet<u32>>;

/// A sampled training example: user `user` prefers `positive` over `negative`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SampleTriple {
    pub user: UserId,
    pub positive: ItemId,
    pub negative: ItemId,
}

/// Converts an optional maximum identifier into the number of addressable slots.
pub fn slots(max_id: Option<u32>) -> usize {
    max_id.map_or(0, |id| id as usize + 1)
}

/// Inverse of `slots`.
pub fn max_id(slots: usize) -> Option<u32> {
    if slots == 0 {
        None
    } else {
        Some((slots - 1) as u32)
    }
}
