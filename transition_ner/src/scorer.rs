//! Action scoring.
//!
//! The four live stack summaries are concatenated, projected to the hidden
//! size through a tanh layer and then to action logits. Logits are restricted
//! to the legal subset before log-softmax, so illegal actions carry exactly
//! zero probability.

use candle_core::{Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};

use crate::error::Result;
use crate::stack::DropoutHook;

/// Summaries of buffer, stack, output and action history at one step.
#[derive(Debug, Clone)]
pub struct StateFeatures {
    pub buffer: Tensor,
    pub stack: Tensor,
    pub output: Tensor,
    pub history: Tensor,
}

/// The scoring capability consulted by the decoder on steps with more than one legal action.
pub trait ActionScorer {
    /// Log-probabilities over `legal_ids`, one entry per id, in the given order.
    fn score(&self, features: &StateFeatures, legal_ids: &[u32], train: bool) -> Result<Tensor>;
}

impl<S: ActionScorer + ?Sized> ActionScorer for &S {
    fn score(&self, features: &StateFeatures, legal_ids: &[u32], train: bool) -> Result<Tensor> {
        (**self).score(features, legal_ids, train)
    }
}

/// Two-layer perceptron scorer.
#[derive(Debug, Clone)]
pub struct MlpScorer {
    hidden: Linear,
    output: Linear,
    dropout: f32,
}

impl MlpScorer {
    pub fn new(hidden_dim: usize, num_actions: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let hidden = candle_nn::linear(hidden_dim * 4, hidden_dim, vb.pp("hidden"))?;
        let output = candle_nn::linear(hidden_dim, num_actions, vb.pp("output"))?;
        Ok(Self {
            hidden,
            output,
            dropout,
        })
    }
}

impl ActionScorer for MlpScorer {
    fn score(&self, features: &StateFeatures, legal_ids: &[u32], train: bool) -> Result<Tensor> {
        let joined = Tensor::cat(
            &[
                &features.buffer,
                &features.stack,
                &features.output,
                &features.history,
            ],
            1,
        )?;
        let joined = DropoutHook::new(self.dropout, train).apply(&joined)?;
        let hidden = self.hidden.forward(&joined)?.tanh()?;
        let logits = self.output.forward(&hidden)?.squeeze(0)?;

        let ids = Tensor::new(legal_ids, logits.device())?;
        let restricted = logits.index_select(&ids, 0)?;
        Ok(candle_nn::ops::log_softmax(&restricted, D::Minus1)?)
    }
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    const HIDDEN: usize = 5;

    fn features() -> StateFeatures {
        let dev = Device::Cpu;
        StateFeatures {
            buffer: Tensor::randn(0f32, 1.0, (1, HIDDEN), &dev).unwrap(),
            stack: Tensor::randn(0f32, 1.0, (1, HIDDEN), &dev).unwrap(),
            output: Tensor::randn(0f32, 1.0, (1, HIDDEN), &dev).unwrap(),
            history: Tensor::randn(0f32, 1.0, (1, HIDDEN), &dev).unwrap(),
        }
    }

    #[test]
    fn test_distribution_covers_legal_subset_only() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let scorer = MlpScorer::new(HIDDEN, 6, 0.5, vb).unwrap();

        for legal in [vec![0u32, 1], vec![0, 2, 3, 4, 5], vec![2, 3]] {
            let log_probs = scorer.score(&features(), &legal, false).unwrap();
            let values = log_probs.to_vec1::<f32>().unwrap();
            assert_eq!(values.len(), legal.len());
            assert!(values.iter().all(|&v| v <= 0.0));

            let total: f32 = values.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-4, "probabilities sum to {total}");
        }
    }

    #[test]
    fn test_scoring_is_deterministic_outside_training() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let scorer = MlpScorer::new(HIDDEN, 4, 0.5, vb).unwrap();
        let f = features();

        let a = scorer.score(&f, &[0, 1, 2], false).unwrap().to_vec1::<f32>().unwrap();
        let b = scorer.score(&f, &[0, 1, 2], false).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[-1.0, -0.5, -0.5]), Some(1));
        assert_eq!(argmax(&[-0.1]), Some(0));
        assert_eq!(argmax(&[]), None);
    }
}
