//! Pairwise ranking matrix factorization for positive-only feedback.
//!
//! A `TrainingEngine` learns user and item factors from an `IncidenceStore` of observed
//! user-item interactions by sampling (user, positive item, negative item) triples, and keeps
//! the model up to date when feedback is added or removed later on.

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

#[macro_use]
extern crate serde_derive;

pub mod types;
pub mod error;
pub mod incidence;
pub mod factors;
pub mod gradient;
pub mod sampling;
pub mod config;
pub mod engine;
mod incremental;
pub mod predict;
pub mod io;
pub mod stats;


pub use crate::config::TrainingConfig;
pub use crate::engine::{TrainingEngine, TrainingState};
pub use crate::error::{Error, Result};
pub use crate::factors::LatentFactorModel;
pub use crate::gradient::GradientRule;
pub use crate::incidence::IncidenceStore;
pub use crate::predict::{PredictionPort, ScoredItem};
pub use crate::sampling::SamplingPolicy;
