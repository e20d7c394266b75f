//! Parallel lanes.
//!
//! Each lane is decoded by its own driver over its own freshly opened stacks;
//! the only thing the lanes share is the read-only model.

use candle_core::Tensor;
use rayon::prelude::*;
use tracing::instrument;

use crate::decode::{DecodeMode, DecodeTrace};
use crate::embed::Token;
use crate::error::Result;
use crate::model::TransitionNer;
use crate::vocab::Action;

/// One sequence of a batch, with gold actions when training.
#[derive(Debug, Clone, Copy)]
pub struct Lane<'a> {
    pub tokens: &'a [Token],
    pub gold: Option<&'a [Action]>,
}

impl<'a> Lane<'a> {
    pub fn train(tokens: &'a [Token], gold: &'a [Action]) -> Self {
        Self {
            tokens,
            gold: Some(gold),
        }
    }

    pub fn predict(tokens: &'a [Token]) -> Self {
        Self { tokens, gold: None }
    }

    fn mode(&self) -> DecodeMode<'a> {
        match self.gold {
            Some(gold) => DecodeMode::Train { gold },
            None => DecodeMode::Predict,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchTrace {
    pub lanes: Vec<DecodeTrace>,
    /// Sum of the lane losses; `None` when no lane produced one.
    pub loss: Option<Tensor>,
    pub correct: usize,
}

impl TransitionNer {
    #[instrument(skip_all, fields(lanes = lanes.len()))]
    pub fn decode_batch(&self, lanes: &[Lane<'_>]) -> Result<BatchTrace> {
        let traces = lanes
            .par_iter()
            .map(|lane| self.decode(lane.tokens, lane.mode()))
            .collect::<Result<Vec<_>>>()?;

        let losses: Vec<&Tensor> = traces.iter().filter_map(|t| t.loss.as_ref()).collect();
        let loss = if losses.is_empty() {
            None
        } else {
            Some(Tensor::stack(losses.as_slice(), 0)?.sum_all()?)
        };
        let correct = traces.iter().map(|t| t.correct).sum();

        Ok(BatchTrace {
            lanes: traces,
            loss,
            correct,
        })
    }
}
