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

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::types::{ItemId, UserId};

/// Dense row-major matrix whose rows are addressed by entity id.
///
/// Rows are only ever appended. Removing an entity zeroes its row so that row `n` always belongs
/// to id `n`, which keeps the matrix aligned with the ids used in the incidence store.
#[derive(Clone, Debug, PartialEq)]
pub struct FactorMatrix {
    num_rows: usize,
    num_cols: usize,
    values: Vec<f64>,
}

impl FactorMatrix {

    pub fn zeros(num_rows: usize, num_cols: usize) -> Self {
        FactorMatrix { num_rows, num_cols, values: vec![0.0; num_rows * num_cols] }
    }

    pub fn from_values(num_rows: usize, num_cols: usize, values: Vec<f64>) -> Self {
        assert_eq!(values.len(), num_rows * num_cols);
        FactorMatrix { num_rows, num_cols, values }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.num_cols;
        &self.values[start..start + self.num_cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let start = row * self.num_cols;
        &mut self.values[start..start + self.num_cols]
    }

    /// Draws every entry from `normal`.
    pub fn init_normal<R: Rng>(&mut self, normal: &Normal<f64>, rng: &mut R) {
        for value in self.values.iter_mut() {
            *value = normal.sample(rng);
        }
    }

    pub fn init_row_normal<R: Rng>(&mut self, row: usize, normal: &Normal<f64>, rng: &mut R) {
        for value in self.row_mut(row).iter_mut() {
            *value = normal.sample(rng);
        }
    }

    /// Appends rows until there are at least `num_rows`, new rows are drawn from `normal`.
    pub fn add_rows<R: Rng>(&mut self, num_rows: usize, normal: &Normal<f64>, rng: &mut R) {
        if num_rows <= self.num_rows {
            return;
        }

        let first_new_row = self.num_rows;
        self.values.resize(num_rows * self.num_cols, 0.0);
        self.num_rows = num_rows;

        for row in first_new_row..num_rows {
            self.init_row_normal(row, normal, rng);
        }
    }

    pub fn zero_row(&mut self, row: usize) {
        for value in self.row_mut(row).iter_mut() {
            *value = 0.0;
        }
    }

    pub fn squared_norm(&self, row: usize) -> f64 {
        self.row(row).iter().map(|value| value * value).sum()
    }
}

#[inline(always)]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// The learned parameters: user factors, item factors and item biases.
#[derive(Clone, Debug, PartialEq)]
pub struct LatentFactorModel {
    pub(crate) user_factors: FactorMatrix,
    pub(crate) item_factors: FactorMatrix,
    pub(crate) item_bias: Vec<f64>,
}

impl LatentFactorModel {

    /// A model with all parameters set to zero.
    pub fn new(num_users: usize, num_items: usize, num_factors: usize) -> Self {
        LatentFactorModel {
            user_factors: FactorMatrix::zeros(num_users, num_factors),
            item_factors: FactorMatrix::zeros(num_items, num_factors),
            item_bias: vec![0.0; num_items],
        }
    }

    /// Assembles a model from its parts, callers are responsible for consistent dimensions.
    pub fn from_parts(
        user_factors: FactorMatrix,
        item_bias: Vec<f64>,
        item_factors: FactorMatrix,
    ) -> Self {
        debug_assert_eq!(user_factors.num_cols(), item_factors.num_cols());
        debug_assert_eq!(item_bias.len(), item_factors.num_rows());
        LatentFactorModel { user_factors, item_factors, item_bias }
    }

    /// Draws all factors from `normal`, biases start at zero.
    pub fn init_normal<R: Rng>(&mut self, normal: &Normal<f64>, rng: &mut R) {
        self.user_factors.init_normal(normal, rng);
        self.item_factors.init_normal(normal, rng);
        for bias in self.item_bias.iter_mut() {
            *bias = 0.0;
        }
    }

    pub fn num_users(&self) -> usize {
        self.user_factors.num_rows()
    }

    pub fn num_items(&self) -> usize {
        self.item_factors.num_rows()
    }

    pub fn num_factors(&self) -> usize {
        self.user_factors.num_cols()
    }

    pub fn user_factors(&self) -> &FactorMatrix {
        &self.user_factors
    }

    pub fn item_factors(&self) -> &FactorMatrix {
        &self.item_factors
    }

    pub fn item_biases(&self) -> &[f64] {
        &self.item_bias
    }

    pub fn item_bias(&self, item: ItemId) -> f64 {
        self.item_bias[item as usize]
    }

    pub fn user_row(&self, user: UserId) -> &[f64] {
        self.user_factors.row(user as usize)
    }

    pub fn item_row(&self, item: ItemId) -> &[f64] {
        self.item_factors.row(item as usize)
    }

    /// `bias[item] + <user factors, item factors>`, the ids must be within the allocated rows.
    pub fn score(&self, user: UserId, item: ItemId) -> f64 {
        self.item_bias[item as usize] + dot(self.user_row(user), self.item_row(item))
    }

    /// Makes sure that `user` has a row.
    pub fn add_user_row<R: Rng>(&mut self, user: UserId, normal: &Normal<f64>, rng: &mut R) {
        self.user_factors.add_rows(user as usize + 1, normal, rng);
    }

    /// Makes sure that `item` has a row and a bias, new biases are zero.
    pub fn add_item_row<R: Rng>(&mut self, item: ItemId, normal: &Normal<f64>, rng: &mut R) {
        let num_items = item as usize + 1;
        self.item_factors.add_rows(num_items, normal, rng);
        if self.item_bias.len() < num_items {
            self.item_bias.resize(num_items, 0.0);
        }
    }

    pub fn reinit_user_row<R: Rng>(&mut self, user: UserId, normal: &Normal<f64>, rng: &mut R) {
        self.user_factors.init_row_normal(user as usize, normal, rng);
    }

    pub fn reinit_item_row<R: Rng>(&mut self, item: ItemId, normal: &Normal<f64>, rng: &mut R) {
        self.item_factors.init_row_normal(item as usize, normal, rng);
    }

    /// Gives `item` the parameters of a newly added item: a fresh row and a zero bias.
    pub fn reset_item_row<R: Rng>(&mut self, item: ItemId, normal: &Normal<f64>, rng: &mut R) {
        self.item_factors.init_row_normal(item as usize, normal, rng);
        self.item_bias[item as usize] = 0.0;
    }

    pub fn zero_user_row(&mut self, user: UserId) {
        self.user_factors.zero_row(user as usize);
    }

    pub fn zero_item_row(&mut self, item: ItemId) {
        self.item_factors.zero_row(item as usize);
        self.item_bias[item as usize] = 0.0;
    }
}

#[cfg(test)]
mod tests {

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::Normal;

    use super::{dot, FactorMatrix, LatentFactorModel};

    fn normal() -> Normal<f64> {
        Normal::new(0.0, 0.1).unwrap()
    }

    #[test]
    fn score_is_bias_plus_dot_product() {
        let user_factors = FactorMatrix::from_values(1, 2, vec![1.0, 2.0]);
        let item_factors = FactorMatrix::from_values(2, 2, vec![0.5, 0.5, -1.0, 3.0]);
        let model = LatentFactorModel::from_parts(user_factors, vec![0.25, -1.0], item_factors);

        assert!((model.score(0, 0) - 1.75).abs() < 1e-12);
        assert!((model.score(0, 1) - 4.0).abs() < 1e-12);
        assert!((dot(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn rows_grow_but_never_shrink() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = LatentFactorModel::new(2, 2, 4);
        model.init_normal(&normal(), &mut rng);

        let first_row = model.user_row(1).to_vec();

        model.add_user_row(5, &normal(), &mut rng);
        model.add_item_row(3, &normal(), &mut rng);
        model.add_user_row(2, &normal(), &mut rng);

        assert_eq!(model.num_users(), 6);
        assert_eq!(model.num_items(), 4);
        assert_eq!(model.item_biases().len(), 4);
        assert_eq!(model.item_bias(3), 0.0);
        assert_eq!(model.user_row(1), first_row.as_slice());
        assert!(model.user_row(5).iter().any(|value| *value != 0.0));
    }

    #[test]
    fn zeroing_keeps_alignment() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut model = LatentFactorModel::new(3, 3, 2);
        model.init_normal(&normal(), &mut rng);
        model.item_bias[1] = 0.7;

        let untouched = model.item_row(2).to_vec();

        model.zero_item_row(1);
        model.zero_user_row(0);

        assert_eq!(model.num_items(), 3);
        assert_eq!(model.item_row(1), &[0.0, 0.0]);
        assert_eq!(model.item_bias(1), 0.0);
        assert_eq!(model.user_row(0), &[0.0, 0.0]);
        assert_eq!(model.item_row(2), untouched.as_slice());
        assert_eq!(model.user_factors().squared_norm(0), 0.0);
    }
}
