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

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Normal;
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::factors::LatentFactorModel;
use crate::gradient;
use crate::gradient::UpdateTargets;
use crate::incidence::IncidenceStore;
use crate::io;
use crate::predict;
use crate::predict::{PredictionPort, ScoredItem};
use crate::sampling::Sampler;
use crate::types;
use crate::types::{ItemId, SampleTriple, UserId};

/// Lifecycle of a training session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainingState {
    /// No model has been allocated yet.
    Uninitialized,
    /// The model is allocated (or restored), no epoch has run since.
    Initialized,
    /// At least one epoch has run.
    Iterating,
    /// `train()` ran all configured epochs.
    Converged,
    /// An external driver ended the session.
    Stopped,
}

/// Bold driver adaptation: halve the learning rate if the loss went up, grow it by 10% if it
/// went down.
pub fn bold_driver_step(learn_rate: f64, last_loss: f64, loss: f64) -> f64 {
    if loss > last_loss {
        learn_rate * 0.5
    } else if loss < last_loss {
        learn_rate * 1.1
    } else {
        learn_rate
    }
}

/// `ln(1 + exp(-x))`, the logistic ranking loss of a score difference `x`.
fn logistic_loss(x: f64) -> f64 {
    if x > 0.0 {
        (-x).exp().ln_1p()
    } else {
        -x + x.exp().ln_1p()
    }
}

/// Pairwise ranking matrix factorization over an incidence store.
///
/// The engine owns the feedback, the learned parameters, the sampler and the random number
/// generator, so a training session is fully determined by its configuration and its input.
pub struct TrainingEngine {
    pub(crate) config: TrainingConfig,
    pub(crate) store: IncidenceStore,
    pub(crate) model: Option<LatentFactorModel>,
    pub(crate) sampler: Sampler,
    pub(crate) rng: StdRng,
    pub(crate) normal: Normal<f64>,
    pub(crate) max_user_id: Option<UserId>,
    pub(crate) max_item_id: Option<ItemId>,
    state: TrainingState,
    learn_rate: f64,
    loss_sample: Vec<SampleTriple>,
    last_loss: Option<f64>,
    epochs: usize,
}

impl TrainingEngine {

    pub fn new(config: TrainingConfig, store: IncidenceStore) -> Result<Self> {
        config.validate()?;

        let normal = Normal::new(config.init_mean, config.init_stdev)
            .map_err(|failure| Error::Config(format!("{:?}", failure)))?;

        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(TrainingEngine {
            sampler: Sampler::new(config.sampling_policy()),
            learn_rate: config.learn_rate,
            max_user_id: store.max_user_id(),
            max_item_id: store.max_item_id(),
            config,
            store,
            model: None,
            rng,
            normal,
            state: TrainingState::Uninitialized,
            loss_sample: Vec::new(),
            last_loss: None,
            epochs: 0,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn store(&self) -> &IncidenceStore {
        &self.store
    }

    pub fn model(&self) -> Option<&LatentFactorModel> {
        self.model.as_ref()
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// The current learning rate, which the bold driver may have moved away from the configured one.
    pub fn learn_rate(&self) -> f64 {
        self.learn_rate
    }

    pub fn max_user_id(&self) -> Option<UserId> {
        self.max_user_id
    }

    pub fn max_item_id(&self) -> Option<ItemId> {
        self.max_item_id
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn uses_fast_sampling(&self) -> bool {
        self.sampler.uses_fast_sampling()
    }

    pub fn loss_sample(&self) -> &[SampleTriple] {
        &self.loss_sample
    }

    pub(crate) fn num_user_slots(&self) -> usize {
        types::slots(self.max_user_id)
    }

    pub(crate) fn num_item_slots(&self) -> usize {
        types::slots(self.max_item_id)
    }

    /// Allocates a freshly initialized model and prepares sampling. Any previous model is
    /// discarded.
    pub fn initialize(&mut self) -> Result<()> {
        self.max_user_id = self.max_user_id.max(self.store.max_user_id());
        self.max_item_id = self.max_item_id.max(self.store.max_item_id());

        let mut model = LatentFactorModel::new(
            self.num_user_slots(),
            self.num_item_slots(),
            self.config.num_factors,
        );
        model.init_normal(&self.normal, &mut self.rng);
        self.model = Some(model);

        self.reset_session()
    }

    /// Trains a model from scratch by running `num_iter` epochs. The session ends as
    /// `Converged` and rejects further `iterate()` calls, drivers that evaluate between epochs
    /// call `initialize()` once and then `iterate()` as often as they like.
    pub fn train(&mut self) -> Result<()> {
        info!(
            "Training {} factors on {} interactions between {} users and {} items",
            self.config.num_factors,
            self.store.size(),
            self.num_user_slots(),
            self.num_item_slots());

        let training_start = Instant::now();

        self.initialize()?;

        for _ in 0..self.config.num_iter {
            self.iterate()?;
        }

        self.state = TrainingState::Converged;

        info!("Training finished after {} epochs in {}ms",
            self.epochs, training_start.elapsed().as_millis());

        Ok(())
    }

    /// Runs a single epoch, applying each sampled triple immediately in sampling order.
    pub fn iterate(&mut self) -> Result<()> {
        match self.state {
            TrainingState::Initialized | TrainingState::Iterating => {},
            found => {
                return Err(Error::InvalidState { expected: "Initialized or Iterating", found });
            },
        }

        let epoch_start = Instant::now();

        let model = self.model.as_mut().ok_or(Error::NotTrained)?;
        let rule = self.config.gradient_rule;
        let step = self.config.step(self.learn_rate);
        let targets = UpdateTargets { negative: self.config.update_negative, ..UpdateTargets::ALL };

        let num_triples =
            self.sampler.begin_epoch(&self.store, &mut self.rng, self.config.iteration_length)?;

        while let Some(triple) = self.sampler.next_triple(&self.store, &mut self.rng) {
            gradient::apply(rule, model, &triple, &step, targets);
        }

        self.state = TrainingState::Iterating;
        self.epochs += 1;

        if self.config.bold_driver {
            self.adapt_learn_rate()?;
        }

        debug!("Epoch {} with {} triples took {}ms",
            self.epochs, num_triples, epoch_start.elapsed().as_millis());

        Ok(())
    }

    /// Ends the session, further epochs are rejected. The model stays available for prediction
    /// and incremental updates.
    pub fn stop(&mut self) {
        self.state = TrainingState::Stopped;
    }

    /// Approximate loss over the fixed loss sample: logistic ranking loss plus the weighted
    /// squared norms of all parameters involved. Only meaningful relative to other epochs.
    pub fn compute_loss(&mut self) -> Result<f64> {
        if self.loss_sample.is_empty() {
            self.draw_loss_sample()?;
        }

        let model = self.model.as_ref().ok_or(Error::NotTrained)?;
        let config = &self.config;

        let mut ranking_loss = 0.0;
        let mut complexity = 0.0;

        for triple in self.loss_sample.iter() {
            ranking_loss += logistic_loss(gradient::score_difference(model, triple));

            let bias_i = model.item_bias(triple.positive);
            let bias_j = model.item_bias(triple.negative);

            complexity += config.reg_u * model.user_factors().squared_norm(triple.user as usize)
                + config.reg_i * model.item_factors().squared_norm(triple.positive as usize)
                + config.reg_j * model.item_factors().squared_norm(triple.negative as usize)
                + config.bias_reg * (bias_i * bias_i + bias_j * bias_j);
        }

        Ok(ranking_loss + 0.5 * complexity)
    }

    fn adapt_learn_rate(&mut self) -> Result<()> {
        let loss = self.compute_loss()?;

        if let Some(last_loss) = self.last_loss {
            let learn_rate = bold_driver_step(self.learn_rate, last_loss, loss);
            if learn_rate != self.learn_rate {
                debug!("Loss moved from {} to {}, learning rate is now {}",
                    last_loss, loss, learn_rate);
            }
            self.learn_rate = learn_rate;
        }

        self.last_loss = Some(loss);
        Ok(())
    }

    /// Draws `100 * ceil(sqrt(#users))` triples which are reused for every loss computation.
    fn draw_loss_sample(&mut self) -> Result<()> {
        self.sampler.refresh(&self.store);

        if self.sampler.num_valid_users() == 0 {
            return Err(Error::SamplingExhausted);
        }

        let num_triples = 100 * (self.num_user_slots() as f64).sqrt().ceil() as usize;

        let mut loss_sample = Vec::with_capacity(num_triples);
        for _ in 0..num_triples {
            if let Some(triple) = self.sampler.uniform_user_triple(&self.store, &mut self.rng) {
                loss_sample.push(triple);
            }
        }

        debug!("Drew {} triples to estimate the loss", loss_sample.len());
        self.loss_sample = loss_sample;

        Ok(())
    }

    /// Brings the sampler in line with the current id space and checks the fast sampling budget.
    fn prepare_sampler(&mut self) {
        let (num_users, num_items) = (self.num_user_slots(), self.num_item_slots());
        self.sampler.resize(num_users, num_items);

        if self.sampler.configure_fast_sampling(self.config.fast_sampling_memory_limit) {
            self.sampler.precompute(&self.store);
        }

        self.sampler.refresh(&self.store);
    }

    fn reset_session(&mut self) -> Result<()> {
        self.learn_rate = self.config.learn_rate;
        self.epochs = 0;
        self.loss_sample.clear();
        self.last_loss = None;

        self.prepare_sampler();
        self.state = TrainingState::Initialized;

        if self.config.bold_driver {
            self.draw_loss_sample()?;
            self.last_loss = Some(self.compute_loss()?);
        }

        Ok(())
    }

    /// Installs a previously trained model. Rows are added for ids the store knows but the model
    /// does not, the session can continue with `iterate()` afterwards.
    pub fn restore(&mut self, model: LatentFactorModel) -> Result<()> {
        let mut model = model;

        self.config.num_factors = model.num_factors();
        self.max_user_id = types::max_id(model.num_users()).max(self.store.max_user_id());
        self.max_item_id = types::max_id(model.num_items()).max(self.store.max_item_id());

        if let Some(user) = self.max_user_id {
            model.add_user_row(user, &self.normal, &mut self.rng);
        }
        if let Some(item) = self.max_item_id {
            model.add_item_row(item, &self.normal, &mut self.rng);
        }

        self.model = Some(model);
        self.reset_session()
    }

    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let model = self.model.as_ref().ok_or(Error::NotTrained)?;

        let mut writer = BufWriter::new(File::create(path)?);
        io::write_model(model, &mut writer)?;
        writer.flush()?;

        Ok(())
    }

    pub fn load_model<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        let model = io::read_model(&mut reader)?;
        self.restore(model)
    }

    /// Like `score`, but unknown ids and a missing model are errors instead of a sentinel.
    pub fn predict(&self, user: UserId, item: ItemId) -> Result<f64> {
        let model = self.model.as_ref().ok_or(Error::NotTrained)?;
        self.check_user(user)?;
        self.check_item(item)?;
        Ok(model.score(user, item))
    }

    /// The `n` best scored items for `user`, optionally leaving out items the user has already
    /// interacted with.
    pub fn recommend(&self, user: UserId, n: usize, ignore_seen: bool) -> Result<Vec<ScoredItem>> {
        if self.model.is_none() {
            return Err(Error::NotTrained);
        }
        self.check_user(user)?;

        let seen = self.store.items_of(user);
        let candidates = (0..self.num_item_slots() as ItemId)
            .filter(|item| !(ignore_seen && seen.contains(item)));

        Ok(predict::top_k(self, user, candidates, n))
    }

    pub(crate) fn check_user(&self, user: UserId) -> Result<()> {
        match self.max_user_id {
            Some(max_user_id) if user <= max_user_id => Ok(()),
            _ => Err(Error::UnknownUser(user)),
        }
    }

    pub(crate) fn check_item(&self, item: ItemId) -> Result<()> {
        match self.max_item_id {
            Some(max_item_id) if item <= max_item_id => Ok(()),
            _ => Err(Error::UnknownItem(item)),
        }
    }
}

impl PredictionPort for TrainingEngine {

    fn score(&self, user: UserId, item: ItemId) -> f64 {
        match self.model {
            Some(ref model) if self.can_predict(user, item) => model.score(user, item),
            _ => std::f64::MIN,
        }
    }

    fn can_predict(&self, user: UserId, item: ItemId) -> bool {
        self.check_user(user).is_ok() && self.check_item(item).is_ok()
    }
}
