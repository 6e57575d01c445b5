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

use crate::factors::LatentFactorModel;
use crate::types::SampleTriple;

/// How the score difference of a triple is turned into the weight of its gradient step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradientRule {
    /// Bayesian personalised ranking, `1 / (1 + exp(x))`.
    Logistic,
    /// Margin style, a full step while the pair is ranked wrongly and none afterwards.
    Hinge,
}

impl Default for GradientRule {
    fn default() -> Self {
        GradientRule::Logistic
    }
}

impl GradientRule {

    #[inline(always)]
    pub fn weight(self, x: f64) -> f64 {
        match self {
            GradientRule::Logistic => 1.0 / (1.0 + x.exp()),
            GradientRule::Hinge => if x < 0.0 { 1.0 } else { 0.0 },
        }
    }
}

/// Selects which rows a single step may modify. The positive and negative item flags also cover
/// the corresponding item biases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateTargets {
    pub user: bool,
    pub positive: bool,
    pub negative: bool,
}

impl UpdateTargets {
    pub const ALL: UpdateTargets = UpdateTargets { user: true, positive: true, negative: true };
    pub const USER: UpdateTargets = UpdateTargets { user: true, positive: false, negative: false };
    pub const POSITIVE: UpdateTargets =
        UpdateTargets { user: false, positive: true, negative: false };
    pub const NEGATIVE: UpdateTargets =
        UpdateTargets { user: false, positive: false, negative: true };
}

/// Step size and regularization constants of a single update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepParameters {
    pub learn_rate: f64,
    pub reg_u: f64,
    pub reg_i: f64,
    pub reg_j: f64,
    pub bias_reg: f64,
}

/// The score difference `x` between the positive and the negative item of a triple.
#[inline(always)]
pub fn score_difference(model: &LatentFactorModel, triple: &SampleTriple) -> f64 {
    model.score(triple.user, triple.positive) - model.score(triple.user, triple.negative)
}

/// Applies one pairwise ranking step for `triple` to `model`. All factor updates of a dimension
/// are computed from the values before the step.
pub fn apply(
    rule: GradientRule,
    model: &mut LatentFactorModel,
    triple: &SampleTriple,
    step: &StepParameters,
    targets: UpdateTargets,
) {
    debug_assert_ne!(triple.positive, triple.negative);

    let x = score_difference(model, triple);
    let g = rule.weight(x);
    let learn_rate = step.learn_rate;

    let user = triple.user as usize;
    let positive = triple.positive as usize;
    let negative = triple.negative as usize;

    if targets.positive {
        let bias = model.item_bias[positive];
        model.item_bias[positive] += learn_rate * (g - step.bias_reg * bias);
    }
    if targets.negative {
        let bias = model.item_bias[negative];
        model.item_bias[negative] += learn_rate * (-g - step.bias_reg * bias);
    }

    let num_factors = model.num_factors();
    let user_offset = user * num_factors;
    let positive_offset = positive * num_factors;
    let negative_offset = negative * num_factors;

    let user_factors = model.user_factors.values_mut();
    let item_factors = model.item_factors.values_mut();

    for f in 0..num_factors {
        let w_uf = user_factors[user_offset + f];
        let h_if = item_factors[positive_offset + f];
        let h_jf = item_factors[negative_offset + f];

        if targets.user {
            user_factors[user_offset + f] += learn_rate * ((h_if - h_jf) * g - step.reg_u * w_uf);
        }
        if targets.positive {
            item_factors[positive_offset + f] += learn_rate * (w_uf * g - step.reg_i * h_if);
        }
        if targets.negative {
            item_factors[negative_offset + f] += learn_rate * (-w_uf * g - step.reg_j * h_jf);
        }
    }
}
