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

use std::io;

use thiserror::Error;

use crate::engine::TrainingState;
use crate::types::{ItemId, UserId};

/// Everything that can go wrong while training, updating or persisting a model.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("unknown item {0}")]
    UnknownItem(ItemId),

    /// No user (or edge) satisfies the precondition of the configured sampling policy.
    #[error("no user has observed at least one but not all items, cannot sample training triples")]
    SamplingExhausted,

    #[error("the model has to be trained or loaded first")]
    NotTrained,

    #[error("invalid training state: expected {expected}, found {found:?}")]
    InvalidState {
        expected: &'static str,
        found: TrainingState,
    },

    #[error("dimension mismatch in persisted model: {0}")]
    DimensionMismatch(String),

    #[error("malformed input in line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
