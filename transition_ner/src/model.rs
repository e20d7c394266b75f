//! Model parameters.

use candle_core::{Module, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder};
use tracing::info;

use crate::config::NerConfig;
use crate::error::Result;
use crate::scorer::MlpScorer;
use crate::stack::{DropoutHook, StackCell};
use crate::transition::TransitionSystem;
use crate::vocab::{Action, ActionVocab};

/// Parameters of the transition-based recognizer.
///
/// Read-only during decoding; every decode opens its own stacks over these
/// cells, so one model can serve many sequences in parallel.
#[derive(Debug, Clone)]
pub struct TransitionNer {
    config: NerConfig,
    system: TransitionSystem,
    action_embeds: Embedding,
    relation_embeds: Embedding,
    pub(crate) buffer_cell: StackCell,
    pub(crate) stack_cell: StackCell,
    pub(crate) output_cell: StackCell,
    pub(crate) action_cell: StackCell,
    pub(crate) entity_forward_cell: StackCell,
    pub(crate) entity_backward_cell: StackCell,
    pub(crate) empty: Tensor,
    pub(crate) scorer: MlpScorer,
    pub(crate) entity_to_output: Linear,
}

impl TransitionNer {
    pub fn new(config: &NerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let vocab = ActionVocab::new(&config.entity_types);
        let num_actions = vocab.len();
        let (token, hidden, layers) = (config.token_dim, config.hidden_dim, config.stack_layers);

        let action_embeds = candle_nn::embedding(num_actions, config.action_dim, vb.pp("action_embeds"))?;
        let relation_embeds =
            candle_nn::embedding(num_actions, config.action_dim, vb.pp("relation_embeds"))?;

        let buffer_cell = StackCell::new(token, hidden, layers, vb.pp("buffer_lstm"))?;
        let stack_cell = StackCell::new(token, hidden, layers, vb.pp("stack_lstm"))?;
        let output_cell = StackCell::new(token, hidden, layers, vb.pp("output_lstm"))?;
        let action_cell = StackCell::new(config.action_dim, hidden, layers, vb.pp("action_lstm"))?;
        let entity_forward_cell =
            StackCell::new(token, hidden, layers, vb.pp("entity_forward_lstm"))?;
        let entity_backward_cell =
            StackCell::new(token, hidden, layers, vb.pp("entity_backward_lstm"))?;

        let empty = vb.get_with_hints(
            (1, hidden),
            "empty_emb",
            candle_nn::init::Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        let scorer = MlpScorer::new(hidden, num_actions, config.dropout, vb.pp("scorer"))?;
        let entity_to_output = candle_nn::linear(
            hidden * 2 + config.action_dim,
            token,
            vb.pp("entity_to_output"),
        )?;

        info!(
            entity_types = config.entity_types.len(),
            actions = num_actions,
            hidden,
            stack_layers = layers,
            "transition NER model ready"
        );

        Ok(Self {
            config: config.clone(),
            system: TransitionSystem::new(vocab),
            action_embeds,
            relation_embeds,
            buffer_cell,
            stack_cell,
            output_cell,
            action_cell,
            entity_forward_cell,
            entity_backward_cell,
            empty,
            scorer,
            entity_to_output,
        })
    }

    pub fn config(&self) -> &NerConfig {
        &self.config
    }

    pub fn system(&self) -> &TransitionSystem {
        &self.system
    }

    pub fn vocab(&self) -> &ActionVocab {
        self.system.vocab()
    }

    pub fn scorer(&self) -> &MlpScorer {
        &self.scorer
    }

    pub(crate) fn hook(&self, train: bool) -> DropoutHook {
        DropoutHook::new(self.config.dropout, train)
    }

    /// Action embedding (fed to the action history) and relation embedding
    /// (fed to entity composition) for `action`.
    pub(crate) fn action_inputs(&self, action: Action, train: bool) -> Result<(Tensor, Tensor)> {
        let id = self.vocab().id(action) as u32;
        let ids = Tensor::new(&[id], self.empty.device())?;
        let hook = self.hook(train);
        let action_repr = hook.apply(&self.action_embeds.forward(&ids)?)?;
        let relation = hook.apply(&self.relation_embeds.forward(&ids)?)?;
        Ok((action_repr, relation))
    }
}
