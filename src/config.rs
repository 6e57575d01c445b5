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

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::gradient::{GradientRule, StepParameters};
use crate::sampling::SamplingPolicy;

/// All hyperparameters of a training session. Field names double as keys for `from_pairs` and
/// for the JSON representation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Dimensionality of the latent factors.
    pub num_factors: usize,
    pub init_mean: f64,
    pub init_stdev: f64,
    pub learn_rate: f64,
    /// Regularization of user factors.
    pub reg_u: f64,
    /// Regularization of positive item factors.
    pub reg_i: f64,
    /// Regularization of negative item factors.
    pub reg_j: f64,
    pub bias_reg: f64,
    /// Number of epochs run by `train()`.
    pub num_iter: usize,
    /// An epoch samples `iteration_length` triples per positive edge.
    pub iteration_length: usize,
    pub uniform_user: bool,
    pub with_replacement: bool,
    /// Memory budget in MiB for the precomputed per-user item lists.
    pub fast_sampling_memory_limit: usize,
    pub bold_driver: bool,
    /// Whether full training also updates the negative item of a triple.
    pub update_negative: bool,
    /// Whether feedback changes retrain the affected user.
    pub update_users: bool,
    /// Whether feedback changes retrain the affected item.
    pub update_items: bool,
    pub gradient_rule: GradientRule,
    pub random_seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            num_factors: 10,
            init_mean: 0.0,
            init_stdev: 0.1,
            learn_rate: 0.05,
            reg_u: 0.0025,
            reg_i: 0.0025,
            reg_j: 0.00025,
            bias_reg: 1.0,
            num_iter: 30,
            iteration_length: 5,
            uniform_user: false,
            with_replacement: false,
            fast_sampling_memory_limit: 1024,
            bold_driver: false,
            update_negative: true,
            update_users: true,
            update_items: true,
            gradient_rule: GradientRule::Logistic,
            random_seed: None,
        }
    }
}

impl TrainingConfig {

    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrainingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a configuration from `key=value` style pairs as they come from command lines or
    /// property files. Missing keys keep their defaults, unknown keys are rejected.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
        where I: IntoIterator<Item=(K, V)>, K: AsRef<str>, V: AsRef<str> {

        let mut fields = Map::new();

        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();

            // Numbers and booleans parse as JSON, everything else is taken as a string
            let parsed = serde_json::from_str::<Value>(value)
                .unwrap_or_else(|_| Value::String(value.to_lowercase()));

            fields.insert(key.to_string(), parsed);
        }

        let config: TrainingConfig = serde_json::from_value(Value::Object(fields))
            .map_err(|failure| Error::Config(failure.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_factors == 0 {
            return Err(Error::Config("num_factors must be positive".to_string()));
        }
        if !(self.learn_rate > 0.0) {
            return Err(Error::Config(format!("learn_rate must be positive, got {}", self.learn_rate)));
        }
        if !(self.init_stdev >= 0.0) || !self.init_mean.is_finite() {
            return Err(Error::Config(format!(
                "invalid initialization N({}, {})", self.init_mean, self.init_stdev)));
        }
        for &(name, value) in &[
            ("reg_u", self.reg_u),
            ("reg_i", self.reg_i),
            ("reg_j", self.reg_j),
            ("bias_reg", self.bias_reg),
        ] {
            if !(value >= 0.0) {
                return Err(Error::Config(format!("{} must not be negative, got {}", name, value)));
            }
        }
        if self.iteration_length == 0 {
            return Err(Error::Config("iteration_length must be positive".to_string()));
        }
        Ok(())
    }

    pub fn sampling_policy(&self) -> SamplingPolicy {
        SamplingPolicy::from_flags(self.uniform_user, self.with_replacement)
    }

    /// Step parameters for the given learning rate, which may differ from the configured one
    /// once the bold driver adapted it.
    pub fn step(&self, learn_rate: f64) -> StepParameters {
        StepParameters {
            learn_rate,
            reg_u: self.reg_u,
            reg_i: self.reg_i,
            reg_j: self.reg_j,
            bias_reg: self.bias_reg,
        }
    }
}
